//! Parser Driver: applies a compiled grammar to input documents.
//!
//! One [`Driver`] runs per parse. It owns the source table, tokenizer,
//! Type/Proxy Index and node pool for that parse, runs the root loop, and
//! handles what the tokenizer hands it besides words: include and
//! path-variable directives. After the main pass it replays delay-load
//! definitions for the requirements collected on the way.
//!
//! Replays swap in a fresh [`Tokenizer`] positioned at the definition, so
//! they share the grammar, index and pool but never disturb the main
//! token stream.

use crate::compile::Grammar;
use crate::config::ParseOptions;
use crate::error::{ParseError, ParseFatal};
use crate::index::TypeIndex;
use crate::node::{NodeAux, NodeFlags, NodeId, NodePool, ParseNode, ParseTree};
use crate::read::Outcome;
use crate::rules::RuleId;
use crate::source::{DocRange, SourceId, SourceProvider, SourceSet};
use crate::tokenizer::{IncludeRecord, Tokenizer, Word};
use crate::trace::{ParseResult, Requirement, ResultsSink, TraceEntry};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// A definition skimmed by a `delay-load` rule, waiting to be parsed.
#[derive(Debug, Clone)]
pub(crate) struct DelayRecord {
    pub req: Requirement,
    pub placeholder: NodeId,
    pub rule: RuleId,
    pub source: SourceId,
    pub offset: usize,
    pub line: u32,
    pub resolved: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Directive {
    Include { once: bool },
    DefinePathVariable,
    UndefinePathVariable,
    ResetFilePath,
    FilePath,
}

impl Directive {
    fn parse(word: &str) -> Option<Self> {
        Some(match word {
            "include" => Directive::Include { once: false },
            "include_once" => Directive::Include { once: true },
            "define_path_variable" => Directive::DefinePathVariable,
            "undefine_path_variable" => Directive::UndefinePathVariable,
            "reset_file_path" => Directive::ResetFilePath,
            "file_path" => Directive::FilePath,
            _ => return None,
        })
    }

    fn arity(self) -> usize {
        match self {
            Directive::DefinePathVariable => 2,
            Directive::ResetFilePath => 0,
            _ => 1,
        }
    }
}

pub(crate) fn trim_quotes(text: &str) -> &str {
    text.strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .unwrap_or(text)
}

pub struct Driver<'a> {
    pub(crate) grammar: &'a Grammar,
    pub(crate) options: &'a ParseOptions,
    provider: &'a dyn SourceProvider,
    pub(crate) sources: SourceSet,
    pub(crate) tok: Tokenizer,
    pub(crate) index: TypeIndex,
    pub(crate) pool: NodePool,
    /// Nodes matched so far by each active sequence, innermost last.
    pub(crate) frames: Vec<Vec<Option<NodeId>>>,
    pub(crate) trace: Vec<TraceEntry>,
    pub(crate) delay: Vec<DelayRecord>,
    /// Requirements raised during the main pass.
    pub(crate) pending: Vec<Requirement>,
    pub(crate) replay_depth: usize,
    in_progress: BTreeSet<Requirement>,
    unsatisfied: Vec<Requirement>,
    errors: Vec<ParseError>,
    pending_directives: Vec<ParseNode>,
    /// Sources pushed by include directives, keyed by where the directive
    /// starts. Replays push the same sources again.
    included: BTreeMap<(SourceId, usize), SourceId>,
    top: Vec<NodeId>,
    deferred: VecDeque<PathBuf>,
}

impl<'a> Driver<'a> {
    pub fn new(
        grammar: &'a Grammar,
        provider: &'a dyn SourceProvider,
        options: &'a ParseOptions,
    ) -> Self {
        Driver {
            grammar,
            options,
            provider,
            sources: SourceSet::new(),
            tok: Tokenizer::new(options.recall_size),
            index: TypeIndex::new(options.name_conflict),
            pool: NodePool::new(options.max_nodes),
            frames: Vec::new(),
            trace: Vec::new(),
            delay: Vec::new(),
            pending: Vec::new(),
            replay_depth: 0,
            in_progress: BTreeSet::new(),
            unsatisfied: Vec::new(),
            errors: Vec::new(),
            pending_directives: Vec::new(),
            included: BTreeMap::new(),
            top: Vec::new(),
            deferred: VecDeque::new(),
        }
    }

    /// Push a document that does not come from the provider.
    pub fn push_text(&mut self, path: PathBuf, text: String) {
        self.index.add_include(&path);
        let id = self.sources.add(path, text);
        let text = self.sources.text(id);
        self.tok.push_source(id, text);
    }

    /// Words delivered so far.
    pub fn position(&self) -> u64 {
        self.tok.position()
    }

    pub fn index(&self) -> &TypeIndex {
        &self.index
    }

    /// Locate and push a top-level file.
    fn push_file(&mut self, path: &Path) -> Result<(), ParseFatal> {
        let not_found = || ParseFatal::SourceNotFound {
            path: path.display().to_string(),
        };
        let resolved = self.locate(&path.to_string_lossy(), None, false).ok_or_else(not_found)?;
        let text = self.provider.read_source(&resolved).map_err(|_| not_found())?;
        self.push_text(resolved, text);
        Ok(())
    }

    // ── Words ───────────────────────────────────────────────────────

    /// Next word, after any directives in front of it.
    pub(crate) fn next_word(&mut self) -> Option<Word> {
        if let Some(w) = self.tok.replayed() {
            return Some(w);
        }
        loop {
            let w = self.tok.scan()?;
            match Directive::parse(&w.text) {
                Some(d) => self.directive(d, w),
                None => return Some(self.tok.deliver(w)),
            }
        }
    }

    /// Next word, or `None` at the end of input or at an active
    /// terminator. A terminator still counts as consumed.
    pub(crate) fn read_word(&mut self) -> Option<Word> {
        let w = self.next_word()?;
        if self.tok.is_terminator(&w.text) {
            return None;
        }
        Some(w)
    }

    /// Like [`Driver::read_word`], without the terminator check.
    pub(crate) fn read_terminator(&mut self) -> Option<Word> {
        self.next_word()
    }

    pub(crate) fn peek_word(&mut self) -> Result<Option<Word>, ParseFatal> {
        let mark = self.tok.mark();
        let w = self.read_word();
        self.tok.rewind(mark)?;
        Ok(w)
    }

    // ── Directives ──────────────────────────────────────────────────

    /// A raw directive argument; quoted arguments may span words.
    fn directive_arg(&mut self) -> Option<(String, DocRange)> {
        let first = self.tok.scan()?;
        let mut range = first.range;
        if first.text.starts_with('"') && !(first.text.len() >= 2 && first.text.ends_with('"')) {
            while let Some(w) = self.tok.scan() {
                range = range.cover(&w.range).unwrap_or(range);
                if w.text.ends_with('"') {
                    break;
                }
            }
        }
        let text = trim_quotes(self.sources.slice(&range)).to_owned();
        Some((text, range))
    }

    fn directive(&mut self, d: Directive, word: Word) {
        let mut range = word.range;
        let mut args = Vec::new();
        for _ in 0..d.arity() {
            let Some((arg, r)) = self.directive_arg() else { break };
            range = range.cover(&r).unwrap_or(range);
            args.push(arg);
        }
        if self.replay_depth > 0 {
            // Path state and include counts were settled by the main pass.
            if let Some(id) = self.included.get(&(word.range.source, word.range.begin)).copied() {
                let text = self.sources.text(id);
                self.tok.push_source(id, text);
            }
            return;
        }
        let mut node = ParseNode::new(None, range)
            .with_type(word.text.clone())
            .with_value(args.join(" "))
            .with_flags(NodeFlags::DIRECTIVE);
        match (d, args.as_slice()) {
            (Directive::DefinePathVariable, [name, value]) => {
                self.index.define_path_variable(name.clone(), value.clone())
            }
            (Directive::UndefinePathVariable, [name]) => self.index.undefine_path_variable(name),
            (Directive::ResetFilePath, _) => self.index.reset_file_path(),
            (Directive::FilePath, [dir]) => {
                let dir = self.index.substitute_path_variables(dir);
                self.index.add_file_path(dir);
            }
            (Directive::Include { once }, [path]) => {
                let aux = self.include(once, path, range);
                node = node.with_aux(aux);
            }
            _ => warn!(directive = %word.text, "directive is missing arguments"),
        }
        self.pending_directives.push(node);
    }

    fn include(&mut self, once: bool, raw: &str, range: DocRange) -> NodeAux {
        let path = self.index.substitute_path_variables(raw);
        let including = self.sources.path(range.source).map(Path::to_path_buf);
        let mut record = IncludeRecord {
            range,
            path: path.clone(),
            resolved: None,
            error: None,
        };
        match self.locate(&path, including.as_deref(), false) {
            None => {
                warn!(path = %path, "include not found");
                record.error = Some("not found".into());
            }
            Some(resolved) => {
                record.resolved = Some(resolved.display().to_string());
                if once && self.index.include_count(&resolved) > 0 {
                    record.error = Some("already included".into());
                } else if self.index.add_include(&resolved) > self.options.max_reinclude_count {
                    debug!(
                        path = %resolved.display(),
                        limit = self.options.max_reinclude_count,
                        "include refused by the re-include bound"
                    );
                    record.error = Some("re-include limit reached".into());
                } else {
                    match self.provider.read_source(&resolved) {
                        Ok(text) => {
                            let id = self.sources.add(resolved, text);
                            let text: Arc<str> = self.sources.text(id);
                            self.tok.push_source(id, text);
                            self.included.insert((range.source, range.begin), id);
                        }
                        Err(e) => record.error = Some(e.to_string()),
                    }
                }
            }
        }
        let aux = NodeAux::FileReference {
            path: record.path.clone(),
            resolved: record.resolved.clone(),
            output: false,
        };
        self.tok.record_include(range.source, record);
        aux
    }

    /// Search order: the including file's directory, the `file_path`
    /// list (first entry only for outputs), then the working directory.
    pub(crate) fn locate(&self, path: &str, including: Option<&Path>, output: bool) -> Option<PathBuf> {
        let p = Path::new(path);
        if p.is_absolute() {
            return self.provider.canonicalize(p).ok();
        }
        let mut bases: Vec<PathBuf> = Vec::new();
        if let Some(dir) = including.and_then(Path::parent) {
            bases.push(dir.to_path_buf());
        }
        if output {
            bases.extend(self.index.file_path().first().cloned());
        } else {
            bases.extend(self.index.file_path().iter().cloned());
        }
        bases.push(self.provider.working_dir());
        bases.into_iter().find_map(|base| {
            let candidate = self.provider.resolve_import(&base, path).ok()?;
            self.provider.canonicalize(&candidate).ok()
        })
    }

    fn flush_directives(&mut self) -> Result<(), ParseFatal> {
        for node in std::mem::take(&mut self.pending_directives) {
            let id = self.pool.alloc(node)?;
            self.top.push(id);
        }
        Ok(())
    }

    // ── Root loop ───────────────────────────────────────────────────

    fn run(&mut self) -> Result<(), ParseFatal> {
        let root = self.grammar.root_rule.ok_or(ParseFatal::NoRootRule)?;
        let root_name = self.grammar.rules.full_name(root);
        loop {
            if self.peek_word()?.is_none() {
                self.flush_directives()?;
                match self.deferred.pop_front() {
                    Some(next) => {
                        if let Err(e) = self.push_file(&next) {
                            warn!(error = %e, "deferred file skipped");
                        }
                        continue;
                    }
                    None => break,
                }
            }
            self.tok.reset_high_water();
            let save = self.save_point();
            let start = self.tok.mark();
            let depth = self.index.depth();
            let outcome = self.read(root)?;
            self.flush_directives()?;
            match outcome {
                Outcome::Hit(node) if self.tok.position() > start.0 => {
                    self.top.extend(node);
                    self.index.truncate_stack(depth);
                }
                _ => {
                    self.restore(save)?;
                    self.root_miss(&root_name, start.0)?;
                }
            }
            self.index.commit();
            self.tok.commit();
        }
        self.resolve_requirements()
    }

    /// Record an error at the furthest word the failed attempt reached and
    /// skip past it.
    fn root_miss(&mut self, rule: &str, start: u64) -> Result<(), ParseFatal> {
        let high_water = self.tok.high_water().cloned();
        let target = high_water.as_ref().map_or(start, |(p, _)| *p);
        let mut skipped = None;
        while self.tok.position() <= target {
            match self.next_word() {
                Some(w) => skipped = Some(w),
                None => break,
            }
        }
        self.flush_directives()?;
        let Some(word) = high_water.map(|(_, w)| w).or(skipped) else {
            return Ok(());
        };
        if self.errors.len() < self.options.max_errors {
            self.errors.push(ParseError {
                rule: rule.to_owned(),
                range: word.range,
                text: word.text,
            });
            if self.errors.len() == self.options.max_errors {
                warn!(max = self.options.max_errors, "error ceiling reached");
            }
        }
        Ok(())
    }

    // ── Forward references ──────────────────────────────────────────

    /// Ask for the definition `req`. Queued during the main pass and
    /// replayed on the spot during replays.
    pub(crate) fn require(&mut self, req: Requirement) -> Result<(), ParseFatal> {
        if self.replay_depth == 0 {
            self.pending.push(req);
        } else {
            self.satisfy(&req)?;
        }
        Ok(())
    }

    fn mark_unsatisfied(&mut self, req: &Requirement) {
        if !self.unsatisfied.contains(req) {
            warn!(kind = %req.kind, name = %req.name, "requirement not satisfied");
            self.unsatisfied.push(req.clone());
        }
    }

    /// Parse the recorded definition of `req` once and splice it over its
    /// placeholder. A requirement already being replayed is not satisfied.
    pub(crate) fn satisfy(&mut self, req: &Requirement) -> Result<bool, ParseFatal> {
        let Some(i) = self.delay.iter().position(|r| &r.req == req) else {
            self.mark_unsatisfied(req);
            return Ok(false);
        };
        if self.delay[i].resolved {
            return Ok(true);
        }
        if self.in_progress.contains(req) {
            self.mark_unsatisfied(req);
            return Ok(false);
        }
        let rec = self.delay[i].clone();
        debug!(kind = %req.kind, name = %req.name, "delay-load replay");
        self.in_progress.insert(req.clone());
        let replay = Tokenizer::starting_at(
            rec.source,
            self.sources.text(rec.source),
            rec.offset,
            rec.line,
            self.options.recall_size,
        );
        let saved = std::mem::replace(&mut self.tok, replay);
        self.replay_depth += 1;
        let outcome = self.read(rec.rule);
        self.replay_depth -= 1;
        self.tok = saved;
        self.in_progress.remove(req);
        match outcome? {
            Outcome::Hit(node) => {
                if let Some(n) = node {
                    self.pool.replace(rec.placeholder, n);
                }
                self.delay[i].resolved = true;
                self.unsatisfied.retain(|r| r != req);
                Ok(true)
            }
            Outcome::Miss => {
                self.mark_unsatisfied(req);
                Ok(false)
            }
        }
    }

    /// Post-pass: requirements in the order they were raised, then every
    /// definition nobody asked for.
    fn resolve_requirements(&mut self) -> Result<(), ParseFatal> {
        for req in std::mem::take(&mut self.pending) {
            self.satisfy(&req)?;
            self.index.commit();
        }
        let rest: Vec<Requirement> = self
            .delay
            .iter()
            .filter(|r| !r.resolved)
            .map(|r| r.req.clone())
            .collect();
        for req in rest {
            self.satisfy(&req)?;
            self.index.commit();
        }
        Ok(())
    }

    fn finish(mut self) -> Result<ParseResult, ParseFatal> {
        self.flush_directives()?;
        let range = match self.sources.get(SourceId(0)) {
            Some(f) => DocRange::new(SourceId(0), 0, f.text.len()),
            None => DocRange::new(SourceId(0), 0, 0),
        };
        let root = self.pool.alloc(ParseNode::new(None, range))?;
        for n in std::mem::take(&mut self.top) {
            self.pool.append_child(root, n);
        }
        debug!(
            nodes = self.pool.len(),
            errors = self.errors.len(),
            unsatisfied = self.unsatisfied.len(),
            "parse finished"
        );
        Ok(ParseResult {
            tree: ParseTree::finalize(self.pool, root),
            errors: self.errors,
            trace: self.trace,
            unsatisfied: self.unsatisfied,
            index: self.index,
            sources: self.sources,
            records: self.tok.into_records(),
        })
    }
}

/// Parses documents with one compiled grammar. Cheap to create; each parse
/// gets its own driver.
pub struct Parser<'a> {
    grammar: &'a Grammar,
    provider: &'a dyn SourceProvider,
    options: ParseOptions,
}

impl<'a> Parser<'a> {
    pub fn new(
        grammar: &'a Grammar,
        provider: &'a dyn SourceProvider,
        options: ParseOptions,
    ) -> Result<Self, ParseFatal> {
        if !grammar.is_usable() {
            return Err(ParseFatal::UnusableGrammar {
                errors: grammar.errors.clone(),
            });
        }
        if grammar.root_rule.is_none() {
            return Err(ParseFatal::NoRootRule);
        }
        Ok(Parser {
            grammar,
            provider,
            options,
        })
    }

    pub fn options(&self) -> &ParseOptions {
        &self.options
    }

    /// Parse text that does not come from the provider. Includes are still
    /// resolved through it.
    pub fn parse_text(&self, path: impl AsRef<Path>, text: &str) -> Result<ParseResult, ParseFatal> {
        let mut driver = Driver::new(self.grammar, self.provider, &self.options);
        driver.push_text(path.as_ref().to_path_buf(), text.to_owned());
        driver.run()?;
        driver.finish()
    }

    pub fn parse_file(&self, path: impl AsRef<Path>) -> Result<ParseResult, ParseFatal> {
        self.parse_files(&[path.as_ref().to_path_buf()])
    }

    /// Parse several files as one document: each file starts once the
    /// previous one, includes and all, is exhausted.
    pub fn parse_files(&self, paths: &[PathBuf]) -> Result<ParseResult, ParseFatal> {
        let Some((first, rest)) = paths.split_first() else {
            return Err(ParseFatal::SourceNotFound {
                path: String::new(),
            });
        };
        let mut driver = Driver::new(self.grammar, self.provider, &self.options);
        driver.push_file(first)?;
        driver.deferred.extend(rest.iter().cloned());
        debug!(files = paths.len(), "parse started");
        driver.run()?;
        driver.finish()
    }

    pub fn parse_into(&self, paths: &[PathBuf], sink: &mut dyn ResultsSink) -> Result<(), ParseFatal> {
        sink.accept(self.parse_files(paths)?);
        Ok(())
    }
}

// ── Tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::compile_grammar;
    use crate::config::ResolveOptions;
    use crate::source::InMemoryProvider;
    use pretty_assertions::assert_eq;

    const COMMANDS: &str = "(rule root-command { set <string> <integer> | show <string> })";

    fn grammar(src: &str) -> Grammar {
        let g = compile_grammar(src, &ResolveOptions::default());
        assert!(g.is_usable(), "{:?}", g.errors);
        g
    }

    fn types(result: &ParseResult) -> Vec<String> {
        let tree = &result.tree;
        tree.children(tree.root())
            .into_iter()
            .map(|c| tree.node(c).node_type.clone().unwrap_or_default())
            .collect()
    }

    #[test]
    fn unusable_grammar_is_refused() {
        let g = compile_grammar("(rule other { a })", &ResolveOptions::default());
        let provider = InMemoryProvider::default();
        let err = Parser::new(&g, &provider, ParseOptions::default()).err().unwrap();
        assert!(matches!(err, ParseFatal::UnusableGrammar { .. }));
    }

    #[test]
    fn commands_become_root_children() {
        let g = grammar(COMMANDS);
        let provider = InMemoryProvider::default();
        let parser = Parser::new(&g, &provider, ParseOptions::default()).unwrap();
        let result = parser.parse_text("/in.txt", "set a 1\nshow a\nset b 2").unwrap();
        assert!(result.is_clean(), "{:?}", result.errors);
        assert_eq!(types(&result), vec!["set", "show", "set"]);
    }

    #[test]
    fn root_miss_skips_and_caps_errors() {
        let g = grammar(COMMANDS);
        let provider = InMemoryProvider::default();
        let options = ParseOptions {
            max_errors: 2,
            ..ParseOptions::default()
        };
        let parser = Parser::new(&g, &provider, options).unwrap();
        let result = parser
            .parse_text("/in.txt", "junk1 junk2 set a x junk3 show b")
            .unwrap();
        let texts: Vec<&str> = result.errors.iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["junk1", "junk2"]);
        assert_eq!(result.errors[0].rule, "root-command");
        assert_eq!(types(&result), vec!["show"]);
    }

    #[test]
    fn directives_update_path_state_and_appear_in_tree() {
        let g = grammar(COMMANDS);
        let provider = InMemoryProvider::default();
        let parser = Parser::new(&g, &provider, ParseOptions::default()).unwrap();
        let result = parser
            .parse_text(
                "/in.txt",
                "define_path_variable ROOT /data\nfile_path \"$(ROOT)/inc\"\nshow a\nundefine_path_variable ROOT",
            )
            .unwrap();
        assert!(result.is_clean(), "{:?}", result.errors);
        assert_eq!(
            types(&result),
            vec!["define_path_variable", "file_path", "show", "undefine_path_variable"]
        );
        assert_eq!(result.index.file_path(), &[PathBuf::from("/data/inc")]);
        assert_eq!(result.index.path_variable("ROOT"), None);
    }

    #[test]
    fn includes_search_the_including_directory_first() {
        let g = grammar(COMMANDS);
        let provider = InMemoryProvider::default()
            .with_file("/proj/main.txt", "include \"parts/a.txt\"\nshow main")
            .with_file("/proj/parts/a.txt", "show a")
            .with_file("/parts/a.txt", "show wrong");
        let parser = Parser::new(&g, &provider, ParseOptions::default()).unwrap();
        let result = parser.parse_file("/proj/main.txt").unwrap();
        assert!(result.is_clean(), "{:?}", result.errors);
        let tree = &result.tree;
        let shown: Vec<&str> = tree
            .find_by_type("show")
            .into_iter()
            .map(|n| tree.text(n, &result.sources))
            .collect();
        assert_eq!(shown, vec!["show a", "show main"]);
        let include = &result.records[&SourceId(0)].includes[0];
        assert_eq!(include.resolved.as_deref(), Some("/proj/parts/a.txt"));
        assert_eq!(tree.file_transitions().len(), 2);
    }

    #[test]
    fn missing_include_is_recorded_not_fatal() {
        let g = grammar(COMMANDS);
        let provider = InMemoryProvider::default();
        let parser = Parser::new(&g, &provider, ParseOptions::default()).unwrap();
        let result = parser.parse_text("/in.txt", "include nowhere.txt show a").unwrap();
        assert!(result.errors.is_empty());
        let include = &result.records[&SourceId(0)].includes[0];
        assert_eq!(include.error.as_deref(), Some("not found"));
    }

    #[test]
    fn include_once_skips_repeats() {
        let g = grammar(COMMANDS);
        let provider = InMemoryProvider::default()
            .with_file("/main.txt", "include_once a.txt include_once a.txt")
            .with_file("/a.txt", "show a");
        let parser = Parser::new(&g, &provider, ParseOptions::default()).unwrap();
        let result = parser.parse_file("/main.txt").unwrap();
        assert_eq!(result.tree.find_by_type("show").len(), 1);
    }

    #[test]
    fn multiple_files_run_in_order() {
        let g = grammar(COMMANDS);
        let provider = InMemoryProvider::default()
            .with_file("/one.txt", "show one")
            .with_file("/two.txt", "show two");
        let parser = Parser::new(&g, &provider, ParseOptions::default()).unwrap();
        let mut sink: Vec<ParseResult> = Vec::new();
        parser
            .parse_into(
                &[PathBuf::from("/one.txt"), PathBuf::from("/two.txt")],
                &mut sink,
            )
            .unwrap();
        let result = &sink[0];
        let tree = &result.tree;
        let shown: Vec<&str> = tree
            .find_by_type("show")
            .into_iter()
            .map(|n| tree.text(n, &result.sources))
            .collect();
        assert_eq!(shown, vec!["show one", "show two"]);
    }

    #[test]
    fn missing_first_file_is_fatal() {
        let g = grammar(COMMANDS);
        let provider = InMemoryProvider::default();
        let parser = Parser::new(&g, &provider, ParseOptions::default()).unwrap();
        let err = parser.parse_file("/nope.txt").unwrap_err();
        assert_eq!(
            err,
            ParseFatal::SourceNotFound {
                path: "/nope.txt".into()
            }
        );
    }

    #[test]
    fn node_pool_exhaustion_aborts() {
        let g = grammar(COMMANDS);
        let provider = InMemoryProvider::default();
        let options = ParseOptions {
            max_nodes: 5,
            ..ParseOptions::default()
        };
        let parser = Parser::new(&g, &provider, options).unwrap();
        let err = parser.parse_text("/in.txt", "show a show b show c").unwrap_err();
        assert_eq!(err, ParseFatal::NodePoolExhausted { limit: 5 });
    }

    #[test]
    fn long_failed_attempt_is_fatal_past_the_history() {
        let g = grammar("(rule root-command { list <integer>* end | list <string> })");
        let provider = InMemoryProvider::default();
        let options = ParseOptions {
            recall_size: 4,
            ..ParseOptions::default()
        };
        let parser = Parser::new(&g, &provider, options).unwrap();
        let err = parser.parse_text("/in.txt", "list 1 2 3 4 5 6 x").unwrap_err();
        assert_eq!(err, ParseFatal::HistoryExhausted { recall: 4 });

        let parser = Parser::new(&g, &provider, ParseOptions::default()).unwrap();
        let result = parser.parse_text("/in.txt", "list 1 2 3 4 5 6 end").unwrap();
        assert!(result.is_clean(), "{:?}", result.errors);
    }

    #[test]
    fn replayed_definitions_follow_their_includes() {
        let g = grammar(
            "(rule root-command {
                use <string> [require(macro, $2)]
              | macro (delay-load macro end_macro { <string> (string-except end_macro)* end_macro })
            })",
        );
        let provider = InMemoryProvider::default()
            .with_file("/main.txt", "use foo\nmacro foo a\ninclude part.txt\nend_macro")
            .with_file("/part.txt", "b c");
        let parser = Parser::new(&g, &provider, ParseOptions::default()).unwrap();
        let result = parser.parse_file("/main.txt").unwrap();
        assert!(result.is_clean(), "{:?}", result.errors);
        assert!(result.unsatisfied.is_empty());

        let tree = &result.tree;
        let body = tree.children(tree.find_by_type("macro")[0])[1];
        let words: Vec<&str> = tree
            .children(tree.children(body)[1])
            .into_iter()
            .map(|n| tree.text(n, &result.sources))
            .collect();
        assert_eq!(words, vec!["a", "b", "c"]);
        assert_eq!(result.index.include_count(Path::new("/part.txt")), 1);
    }
}
