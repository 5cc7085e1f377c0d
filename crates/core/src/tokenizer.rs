//! Word scanner over a stack of sources, with bounded backtracking.
//!
//! Words are delimited by ASCII whitespace; other characters, Unicode
//! spaces included, belong to words. Line comments (`#`, `//`), block
//! comments (`/* */`), `$define` lines (backslash-newline continued) and
//! `$<name:...>$` markers are consumed here and recorded per source.
//!
//! Delivered words go into a bounded history; [`Tokenizer::rewind`] moves
//! them back onto a replay stack so the next reads see them again. The
//! position counter numbers words in stream order, so a rewind followed by
//! a re-read revisits the same positions.

use crate::error::ParseFatal;
use crate::source::{DocRange, SourceId};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, trace, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Word {
    pub text: String,
    pub range: DocRange,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Comment {
    pub range: DocRange,
    pub text: String,
    pub block: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreprocessorEntry {
    pub range: DocRange,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IncludeRecord {
    pub range: DocRange,
    pub path: String,
    pub resolved: Option<String>,
    /// Why the include was not pushed.
    pub error: Option<String>,
}

/// What one source contributed besides words.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct SourceRecord {
    pub comments: Vec<Comment>,
    pub preprocessor: Vec<PreprocessorEntry>,
    pub includes: Vec<IncludeRecord>,
}

/// Stream position, for [`Tokenizer::rewind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Mark(pub u64);

#[derive(Debug, Clone)]
struct Cursor {
    source: SourceId,
    text: Arc<str>,
    pos: usize,
    line: u32,
    record: bool,
}

#[derive(Debug, Clone)]
pub struct Tokenizer {
    cursors: Vec<Cursor>,
    history: VecDeque<Word>,
    replay: Vec<Word>,
    position: u64,
    recall: usize,
    terminators: Vec<String>,
    high_water: Option<(u64, Word)>,
    recording: bool,
    records: BTreeMap<SourceId, SourceRecord>,
}

impl Tokenizer {
    pub fn new(recall: usize) -> Self {
        Tokenizer {
            cursors: Vec::new(),
            history: VecDeque::new(),
            replay: Vec::new(),
            position: 0,
            recall: recall.max(1),
            terminators: Vec::new(),
            high_water: None,
            recording: true,
            records: BTreeMap::new(),
        }
    }

    /// A tokenizer that starts reading `text` at `offset` and records
    /// nothing. Used for delay-load replays.
    pub fn starting_at(
        source: SourceId,
        text: Arc<str>,
        offset: usize,
        line: u32,
        recall: usize,
    ) -> Self {
        let mut tok = Tokenizer::new(recall);
        tok.recording = false;
        tok.cursors.push(Cursor {
            source,
            text,
            pos: offset,
            line,
            record: false,
        });
        tok
    }

    pub fn push_source(&mut self, source: SourceId, text: Arc<str>) {
        let record = self.recording && !self.records.contains_key(&source);
        if record {
            self.records.insert(source, SourceRecord::default());
        }
        debug!(source = source.0, "source pushed");
        self.cursors.push(Cursor {
            source,
            text,
            pos: 0,
            line: 1,
            record,
        });
    }

    pub fn source_depth(&self) -> usize {
        self.cursors.len()
    }

    pub fn current_source(&self) -> Option<SourceId> {
        self.cursors.last().map(|c| c.source)
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn records(&self) -> &BTreeMap<SourceId, SourceRecord> {
        &self.records
    }

    pub fn into_records(self) -> BTreeMap<SourceId, SourceRecord> {
        self.records
    }

    pub fn record_include(&mut self, source: SourceId, include: IncludeRecord) {
        if let Some(r) = self.records.get_mut(&source) {
            r.includes.push(include);
        }
    }

    // ── Raw scanning ────────────────────────────────────────────────

    /// Next word straight from the sources, past comments and
    /// preprocessor forms. Exhausted sources are popped.
    pub fn scan(&mut self) -> Option<Word> {
        loop {
            let cursor = self.cursors.last_mut()?;
            let text = cursor.text.clone();
            let bytes = text.as_bytes();
            while cursor.pos < bytes.len() && bytes[cursor.pos].is_ascii_whitespace() {
                if bytes[cursor.pos] == b'\n' {
                    cursor.line += 1;
                }
                cursor.pos += 1;
            }
            if cursor.pos >= bytes.len() {
                debug!(source = cursor.source.0, "source popped");
                self.cursors.pop();
                continue;
            }
            let start = cursor.pos;
            let rest = &text[start..];
            if rest.starts_with('#') || rest.starts_with("//") {
                let end = rest.find('\n').map_or(text.len(), |i| start + i);
                self.advance_recording(start, end, Recorded::Comment { block: false });
                continue;
            }
            if rest.starts_with("/*") {
                let end = rest[2..].find("*/").map_or(text.len(), |i| start + 2 + i + 2);
                self.advance_recording(start, end, Recorded::Comment { block: true });
                continue;
            }
            if is_define(rest) {
                let end = define_end(&text, start);
                self.advance_recording(start, end, Recorded::Preprocessor);
                continue;
            }
            if rest.starts_with("$<") {
                if let Some(i) = rest.find(">$") {
                    self.advance_recording(start, start + i + 2, Recorded::Preprocessor);
                    continue;
                }
            }
            let len = rest
                .find(|c: char| c.is_ascii_whitespace())
                .unwrap_or(rest.len());
            let end = start + len;
            cursor.pos = end;
            let word = Word {
                text: text[start..end].to_owned(),
                range: DocRange::new(cursor.source, start, end),
                line: cursor.line,
            };
            trace!(word = %word.text, line = word.line, "scanned");
            return Some(word);
        }
    }

    fn advance_recording(&mut self, start: usize, end: usize, what: Recorded) {
        let Some(cursor) = self.cursors.last_mut() else {
            return;
        };
        let piece = &cursor.text[start..end];
        let newlines = piece.bytes().filter(|b| *b == b'\n').count() as u32;
        let range = DocRange::new(cursor.source, start, end);
        let record = cursor.record;
        let source = cursor.source;
        let piece = piece.to_owned();
        cursor.pos = end;
        cursor.line += newlines;
        if !record {
            return;
        }
        if let Some(r) = self.records.get_mut(&source) {
            match what {
                Recorded::Comment { block } => r.comments.push(Comment {
                    range,
                    text: piece,
                    block,
                }),
                Recorded::Preprocessor => r.preprocessor.push(PreprocessorEntry {
                    range,
                    text: piece,
                }),
            }
        }
    }

    // ── History ─────────────────────────────────────────────────────

    /// Take the next word from the replay stack, if any.
    pub fn replayed(&mut self) -> Option<Word> {
        let w = self.replay.pop()?;
        Some(self.deliver(w))
    }

    /// Hand a freshly scanned word to the caller, keeping it for rewinds.
    pub fn deliver(&mut self, word: Word) -> Word {
        let at = self.position;
        if self.high_water.as_ref().map_or(true, |(p, _)| at >= *p) {
            self.high_water = Some((at, word.clone()));
        }
        self.history.push_back(word.clone());
        if self.history.len() > self.recall {
            self.history.pop_front();
        }
        self.position += 1;
        word
    }

    pub fn mark(&self) -> Mark {
        Mark(self.position)
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// Move back to `mark`. Fails without moving when the words since
    /// `mark` no longer fit in the history.
    pub fn rewind(&mut self, mark: Mark) -> Result<(), ParseFatal> {
        let back = self.position.saturating_sub(mark.0);
        if back > self.history.len() as u64 {
            warn!(
                position = self.position,
                target = mark.0,
                recall = self.recall,
                "token history exhausted"
            );
            return Err(ParseFatal::HistoryExhausted {
                recall: self.recall,
            });
        }
        for _ in 0..back {
            if let Some(w) = self.history.pop_back() {
                self.replay.push(w);
                self.position -= 1;
            }
        }
        Ok(())
    }

    /// Forget words before the current position.
    pub fn commit(&mut self) {
        self.history.clear();
    }

    /// True once every source and the replay stack are exhausted.
    pub fn is_exhausted(&self) -> bool {
        self.replay.is_empty() && self.cursors.is_empty()
    }

    /// Zero-length range just after the last delivered word.
    pub fn here(&self) -> DocRange {
        if let Some(w) = self.history.back() {
            return DocRange::new(w.range.source, w.range.end, w.range.end);
        }
        if let Some(w) = self.replay.last() {
            return DocRange::new(w.range.source, w.range.begin, w.range.begin);
        }
        match self.cursors.last() {
            Some(c) => DocRange::new(c.source, c.pos, c.pos),
            None => DocRange::new(SourceId(0), 0, 0),
        }
    }

    // ── Terminators and high water ──────────────────────────────────

    pub fn push_terminator(&mut self, text: impl Into<String>) {
        self.terminators.push(text.into());
    }

    pub fn pop_terminator(&mut self) {
        self.terminators.pop();
    }

    pub fn is_terminator(&self, text: &str) -> bool {
        self.terminators.iter().any(|t| t == text)
    }

    pub fn reset_high_water(&mut self) {
        self.high_water = None;
    }

    /// Furthest word delivered since the last reset, with its position.
    pub fn high_water(&self) -> Option<&(u64, Word)> {
        self.high_water.as_ref()
    }
}

enum Recorded {
    Comment { block: bool },
    Preprocessor,
}

fn is_define(rest: &str) -> bool {
    rest.strip_prefix("$define")
        .is_some_and(|after| after.is_empty() || after.starts_with(|c: char| c.is_ascii_whitespace()))
}

/// End of a `$define` starting at `start`: the first newline not preceded
/// by a backslash.
fn define_end(text: &str, start: usize) -> usize {
    let bytes = text.as_bytes();
    let mut i = start;
    while i < bytes.len() {
        if bytes[i] == b'\n' {
            let continued = i > start
                && (bytes[i - 1] == b'\\' || (bytes[i - 1] == b'\r' && i >= 2 && bytes[i - 2] == b'\\'));
            if !continued {
                return i;
            }
        }
        i += 1;
    }
    bytes.len()
}

// ── Tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn tokenizer(text: &str) -> Tokenizer {
        let mut tok = Tokenizer::new(64);
        tok.push_source(SourceId(0), Arc::from(text));
        tok
    }

    fn next(tok: &mut Tokenizer) -> Option<String> {
        if let Some(w) = tok.replayed() {
            return Some(w.text);
        }
        let w = tok.scan()?;
        Some(tok.deliver(w).text)
    }

    fn all(tok: &mut Tokenizer) -> Vec<String> {
        std::iter::from_fn(|| next(tok)).collect()
    }

    #[test]
    fn comments_and_preprocessor_forms_are_skipped_and_recorded() {
        let mut tok = tokenizer(
            "a # line\nb // other\n/* block\n */ c $define X \\\n  1\nd $<v:3>$ e",
        );
        assert_eq!(all(&mut tok), vec!["a", "b", "c", "d", "e"]);
        let r = &tok.records()[&SourceId(0)];
        assert_eq!(r.comments.len(), 3);
        assert!(r.comments[2].block);
        assert_eq!(r.preprocessor.len(), 2);
        assert_eq!(r.preprocessor[0].text, "$define X \\\n  1");
    }

    #[test]
    fn lines_count_through_comments() {
        let mut tok = tokenizer("a\n/* x\ny */ b\n\nc");
        let lines: Vec<u32> = std::iter::from_fn(|| tok.scan().map(|w| w.line)).collect();
        assert_eq!(lines, vec![1, 3, 5]);
    }

    #[test]
    fn rewind_replays_in_order() {
        let mut tok = tokenizer("a b c d");
        next(&mut tok);
        let m = tok.mark();
        assert_eq!(next(&mut tok).as_deref(), Some("b"));
        assert_eq!(next(&mut tok).as_deref(), Some("c"));
        tok.rewind(m).unwrap();
        assert_eq!(tok.position(), 1);
        assert_eq!(all(&mut tok), vec!["b", "c", "d"]);
    }

    #[test]
    fn high_water_survives_rewind() {
        let mut tok = tokenizer("a b c");
        let m = tok.mark();
        next(&mut tok);
        next(&mut tok);
        tok.rewind(m).unwrap();
        next(&mut tok);
        let (pos, w) = tok.high_water().unwrap();
        assert_eq!((*pos, w.text.as_str()), (1, "b"));
    }

    #[test]
    fn sources_stack_and_pop() {
        let mut tok = tokenizer("outer1 outer2");
        assert_eq!(next(&mut tok).as_deref(), Some("outer1"));
        tok.push_source(SourceId(1), Arc::from("inner"));
        assert_eq!(all(&mut tok), vec!["inner", "outer2"]);
        assert!(tok.is_exhausted());
    }

    #[test]
    fn replay_tokenizer_starts_mid_text_without_recording() {
        let text: Arc<str> = Arc::from("x # c\ny z");
        let mut tok = Tokenizer::starting_at(SourceId(3), text, 6, 2, 8);
        let w = tok.scan().unwrap();
        assert_eq!((w.text.as_str(), w.line), ("y", 2));
        assert!(tok.records().is_empty());
    }

    #[test]
    fn repushed_source_is_recorded_once() {
        let mut tok = tokenizer("# one");
        all(&mut tok);
        tok.push_source(SourceId(0), Arc::from("# one"));
        all(&mut tok);
        assert_eq!(tok.records()[&SourceId(0)].comments.len(), 1);
    }

    #[test]
    fn unicode_spaces_stay_inside_words() {
        let mut tok = tokenizer("a\u{00A0}b \u{3000}c\td");
        assert_eq!(all(&mut tok), vec!["a\u{00A0}b", "\u{3000}c", "d"]);
        assert!(tok.is_exhausted());
    }

    #[test]
    fn rewind_past_history_fails_without_moving() {
        let mut tok = Tokenizer::new(2);
        tok.push_source(SourceId(0), Arc::from("a b c d"));
        let m = tok.mark();
        for _ in 0..3 {
            next(&mut tok);
        }
        assert_eq!(
            tok.rewind(m),
            Err(ParseFatal::HistoryExhausted { recall: 2 })
        );
        assert_eq!(tok.position(), 3);
        assert_eq!(all(&mut tok), vec!["d"]);
    }
}
