//! Rule reading.
//!
//! `Driver::read` matches one rule against the token stream. A miss
//! leaves the driver exactly as it was: the tokenizer is rewound, index
//! changes are rolled back through the journal, and delay records, trace
//! entries and queued requirements made during the attempt are dropped.
//! Nodes allocated by a failed attempt stay in the pool, detached.

use crate::action::ActionPart;
use crate::compile::Grammar;
use crate::driver::{trim_quotes, DelayRecord, Driver};
use crate::error::ParseFatal;
use crate::index::Checkpoint;
use crate::node::{NodeAux, NodeFlags, NodeId, ParseNode};
use crate::rules::{
    Alternate, Count, Delimited, FileReferenceKind, NamedKind, PassthroughKind, PathSegment, Rule,
    RuleFlags, RuleId, Sequence, TypeLoad, TypeOp, TypePathSpec,
};
use crate::source::DocRange;
use crate::tokenizer::Mark;
use crate::trace::{Requirement, TraceEntry};
use tracing::warn;

/// Result of reading one rule. A hit may produce no node, as an optional
/// element that matched nothing does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Miss,
    Hit(Option<NodeId>),
}

impl Outcome {
    pub fn is_hit(self) -> bool {
        matches!(self, Outcome::Hit(_))
    }

    pub fn node(self) -> Option<NodeId> {
        match self {
            Outcome::Hit(n) => n,
            Outcome::Miss => None,
        }
    }
}

pub(crate) struct SavePoint {
    mark: Mark,
    journal: Checkpoint,
    delay: usize,
    pending: usize,
    trace: usize,
}

fn node_flags(flags: RuleFlags) -> NodeFlags {
    let mut out = NodeFlags::default();
    for (rule, node) in [
        (RuleFlags::NAMED_NODE, NodeFlags::NAMED),
        (RuleFlags::ERROR_INCOMPLETE, NodeFlags::ERROR_INCOMPLETE),
        (RuleFlags::LAZY_TYPENAME, NodeFlags::LAZY_TYPENAME),
        (RuleFlags::LAZY_TYPE_REFERENCE, NodeFlags::LAZY_TYPE_REFERENCE),
    ] {
        if flags.contains(rule) {
            out.insert(node);
        }
    }
    out
}

fn matches_literal(word: &str, text: &str, case_sensitive: bool) -> bool {
    if case_sensitive {
        word == text
    } else {
        word.eq_ignore_ascii_case(text)
    }
}

fn starts_with_at(text: &str, pos: usize, prefix: &str, case_sensitive: bool) -> bool {
    text.get(pos..pos + prefix.len())
        .is_some_and(|s| matches_literal(s, prefix, case_sensitive))
}

fn find_from(text: &str, pos: usize, needle: &str, case_sensitive: bool) -> Option<usize> {
    let rest = text.get(pos..)?;
    let found = if case_sensitive {
        rest.find(needle)
    } else {
        rest.to_ascii_lowercase().find(&needle.to_ascii_lowercase())
    };
    found.map(|i| pos + i)
}

/// Cut a word into its delimited sections: `(rule, begin, end)` byte
/// offsets. The whole word must be consumed.
pub(crate) fn split_delimited(d: &Delimited, text: &str) -> Option<Vec<(RuleId, usize, usize)>> {
    let cs = d.case_sensitive;
    let mut pos = 0;
    let mut out = Vec::new();
    for (k, section) in d.sections.iter().enumerate() {
        if let Some(delim) = &section.delimiter {
            if !starts_with_at(text, pos, delim, cs) {
                return None;
            }
            pos += delim.len();
        }
        if let Some(rule) = section.rule {
            let end = match d.sections.get(k + 1).and_then(|s| s.delimiter.as_deref()) {
                Some(next) => find_from(text, pos, next, cs)?,
                None => text.len(),
            };
            out.push((rule, pos, end));
            pos = end;
        }
    }
    (pos == text.len()).then_some(out)
}

impl<'a> Driver<'a> {
    pub(crate) fn save_point(&self) -> SavePoint {
        SavePoint {
            mark: self.tok.mark(),
            journal: self.index.checkpoint(),
            delay: self.delay.len(),
            pending: self.pending.len(),
            trace: self.trace.len(),
        }
    }

    pub(crate) fn restore(&mut self, sp: SavePoint) -> Result<(), ParseFatal> {
        self.tok.rewind(sp.mark)?;
        self.index.rollback(sp.journal);
        self.delay.truncate(sp.delay);
        self.pending.truncate(sp.pending);
        self.trace.truncate(sp.trace);
        Ok(())
    }

    /// Match rule `id` at the current position.
    pub fn read(&mut self, id: RuleId) -> Result<Outcome, ParseFatal> {
        let sp = self.save_point();
        let outcome = self.read_rule(id)?;
        match outcome {
            Outcome::Miss => self.restore(sp)?,
            Outcome::Hit(Some(n)) => self.mark_node(id, n),
            Outcome::Hit(None) => {}
        }
        Ok(outcome)
    }

    fn mark_node(&mut self, id: RuleId, n: NodeId) {
        let g = self.grammar;
        let rule = g.rules.node(id);
        let node = self.pool.get_mut(n);
        node.flags.insert(node_flags(rule.flags));
        if let Some(t) = &rule.node_type {
            node.node_type = Some(t.clone());
        }
    }

    fn read_rule(&mut self, id: RuleId) -> Result<Outcome, ParseFatal> {
        let g = self.grammar;
        match g.rules.rule(id) {
            Rule::Literal {
                text,
                case_sensitive,
            } => self.read_leaf(id, |w| matches_literal(w, text, *case_sensitive)),
            Rule::Int => self.read_leaf(id, |w| w.parse::<i64>().is_ok()),
            Rule::Real => self.read_leaf(id, |w| w.parse::<f64>().is_ok()),
            Rule::String => self.read_leaf(id, |_| true),
            Rule::StringExcept { exceptions } => self.read_leaf(id, |w| !exceptions.contains(w)),
            Rule::QuotedString { file_reference } => self.read_quoted(id, *file_reference),
            Rule::LineString => self.read_line(id),
            Rule::Sequence(s) => self.read_sequence(id, s),
            Rule::Alternate(a) => self.read_alternate(a),
            Rule::Recurrence { rule, count } => self.read_recurrence(id, *rule, *count),
            Rule::Delimited(d) => self.read_delimited(id, d),
            Rule::Named(n) => match (&n.kind, n.definition) {
                (_, Some(def)) => self.read(def),
                (NamedKind::Enumeration(values), None) => {
                    self.read_leaf(id, |w| values.iter().any(|v| v.name == w))
                }
                _ => Ok(Outcome::Miss),
            },
            Rule::Reference(r) => match r.target {
                Some(t) => self.read(t),
                None => Ok(Outcome::Miss),
            },
            Rule::TypeLoad(t) => self.read_type_load(id, t),
            Rule::Passthrough { kind, rule } => match kind {
                PassthroughKind::Error => {
                    let outcome = self.read(*rule)?;
                    if let Outcome::Hit(Some(n)) = outcome {
                        self.pool.get_mut(n).flags.insert(NodeFlags::ERROR_INCOMPLETE);
                    }
                    Ok(outcome)
                }
                PassthroughKind::DelayLoad { kind, terminator } => {
                    self.read_delay_load(id, kind, terminator, *rule)
                }
            },
        }
    }

    fn read_leaf(&mut self, id: RuleId, accept: impl Fn(&str) -> bool) -> Result<Outcome, ParseFatal> {
        let Some(w) = self.read_word() else {
            return Ok(Outcome::Miss);
        };
        if !accept(&w.text) {
            return Ok(Outcome::Miss);
        }
        let node = self.pool.alloc(ParseNode::new(Some(id), w.range))?;
        Ok(Outcome::Hit(Some(node)))
    }

    pub(crate) fn node_text(&self, n: NodeId) -> String {
        let node = self.pool.get(n);
        match &node.value {
            Some(v) => v.clone(),
            None => self.sources.slice(&node.range).to_owned(),
        }
    }

    fn span(&self, nodes: &[NodeId]) -> DocRange {
        let mut it = nodes.iter().map(|n| self.pool.get(*n).range);
        let Some(first) = it.next() else {
            return self.tok.here();
        };
        it.fold(first, |acc, r| acc.cover(&r).unwrap_or(acc))
    }

    // ── Strings ─────────────────────────────────────────────────────

    /// One word, or a run of words from `"` to the word ending in `"`.
    fn read_quoted(
        &mut self,
        id: RuleId,
        file_reference: Option<FileReferenceKind>,
    ) -> Result<Outcome, ParseFatal> {
        let Some(first) = self.read_word() else {
            return Ok(Outcome::Miss);
        };
        let mut range = first.range;
        if first.text.starts_with('"') && !(first.text.len() >= 2 && first.text.ends_with('"')) {
            loop {
                let Some(w) = self.read_terminator() else {
                    return Ok(Outcome::Miss);
                };
                if w.range.source != first.range.source {
                    return Ok(Outcome::Miss);
                }
                range = range.cover(&w.range).unwrap_or(range);
                if w.text.ends_with('"') {
                    break;
                }
            }
        }
        let value = trim_quotes(self.sources.slice(&range)).to_owned();
        let mut node = ParseNode::new(Some(id), range).with_value(value.clone());
        if let Some(kind) = file_reference {
            let path = self.index.substitute_path_variables(&value);
            let output = kind == FileReferenceKind::Output;
            let including = self.sources.path(range.source).map(|p| p.to_path_buf());
            let resolved = self
                .locate(&path, including.as_deref(), output)
                .map(|p| p.display().to_string());
            node = node.with_aux(NodeAux::FileReference {
                path,
                resolved,
                output,
            });
        }
        let node = self.pool.alloc(node)?;
        Ok(Outcome::Hit(Some(node)))
    }

    /// The next word and every following word on the same line.
    fn read_line(&mut self, id: RuleId) -> Result<Outcome, ParseFatal> {
        let Some(first) = self.read_word() else {
            return Ok(Outcome::Miss);
        };
        let mut range = first.range;
        loop {
            let mark = self.tok.mark();
            match self.read_word() {
                Some(w) if w.line == first.line && w.range.source == first.range.source => {
                    range = range.cover(&w.range).unwrap_or(range);
                }
                _ => {
                    self.tok.rewind(mark)?;
                    break;
                }
            }
        }
        let node = self.pool.alloc(ParseNode::new(Some(id), range))?;
        Ok(Outcome::Hit(Some(node)))
    }

    // ── Composites ──────────────────────────────────────────────────

    fn literal_text(&self, id: RuleId) -> Option<&'a str> {
        let g: &'a Grammar = self.grammar;
        match g.rules.rule(id) {
            Rule::Literal { text, .. } => Some(text.as_str()),
            _ => None,
        }
    }

    fn read_sequence(&mut self, id: RuleId, s: &'a Sequence) -> Result<Outcome, ParseFatal> {
        let n = s.elements.len();
        let leading = s.elements.first().and_then(|e| self.literal_text(*e));
        let closing = match (self.options.block_terminators && n >= 3, leading) {
            (true, Some(_)) => self.literal_text(s.elements[n - 1]),
            _ => None,
        };
        let depth = self.index.depth();
        self.frames.push(Vec::with_capacity(n));
        let mut terminated = false;
        let mut matched = true;
        for (i, el) in s.elements.iter().enumerate() {
            if let Some(t) = closing {
                if i == 1 {
                    self.tok.push_terminator(t);
                    terminated = true;
                } else if i == n - 1 && terminated {
                    self.tok.pop_terminator();
                    terminated = false;
                }
            }
            let outcome = match self.read(*el) {
                Ok(o) => o,
                Err(e) => {
                    if terminated {
                        self.tok.pop_terminator();
                    }
                    self.frames.pop();
                    return Err(e);
                }
            };
            match outcome {
                Outcome::Hit(node) => {
                    if let Some(frame) = self.frames.last_mut() {
                        frame.push(node);
                    }
                }
                Outcome::Miss => {
                    matched = false;
                    break;
                }
            }
        }
        if terminated {
            self.tok.pop_terminator();
        }
        let nodes = self.frames.pop().unwrap_or_default();
        if !matched {
            return Ok(Outcome::Miss);
        }
        self.index.truncate_stack(depth);
        self.run_actions(s, &nodes)?;

        let children: Vec<NodeId> = nodes.iter().flatten().copied().collect();
        let mut node = ParseNode::new(Some(id), self.span(&children));
        if let Some(t) = self.grammar.rules.node(id).node_type.as_deref().or(leading) {
            node = node.with_type(t);
        }
        let node = self.pool.alloc(node)?;
        for c in children {
            self.pool.append_child(node, c);
        }
        if s.has_actions() {
            self.trace.push(TraceEntry { node, rule: id });
        }
        Ok(Outcome::Hit(Some(node)))
    }

    /// The parse-time share of a sequence's actions: `skip` marks and
    /// `require` calls. Everything else is left to consumers of the trace.
    fn run_actions(&mut self, s: &Sequence, nodes: &[Option<NodeId>]) -> Result<(), ParseFatal> {
        for (slot, action) in &s.actions {
            for part in &action.parts {
                match part {
                    ActionPart::Skip => {
                        if let Some(Some(n)) = nodes.get(*slot) {
                            self.pool.get_mut(*n).flags.insert(NodeFlags::SKIPPED);
                        }
                    }
                    ActionPart::Call { function, args } if function.as_str() == "require" => {
                        let [kind, name] = args.as_slice() else { continue };
                        let (Some(kind), Some(name)) =
                            (self.action_text(kind, nodes), self.action_text(name, nodes))
                        else {
                            continue;
                        };
                        self.require(Requirement::new(kind, name))?;
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }

    fn action_text(&self, part: &ActionPart, nodes: &[Option<NodeId>]) -> Option<String> {
        match part {
            ActionPart::Literal(s) => Some(s.clone()),
            ActionPart::Access(a) => match a.text.strip_prefix('$').map(str::parse::<usize>) {
                Some(Ok(n)) => {
                    let node = (*nodes.get(n.checked_sub(1)?)?)?;
                    Some(trim_quotes(&self.node_text(node)).to_owned())
                }
                _ => Some(a.text.clone()),
            },
            _ => None,
        }
    }

    /// First branch that matches, in declaration order. An accelerator
    /// only removes branches that cannot match the next word.
    fn read_alternate(&mut self, a: &Alternate) -> Result<Outcome, ParseFatal> {
        let order: Vec<usize> = match &a.accelerator {
            Some(acc) => match self.peek_word()?.and_then(|w| w.text.bytes().next()) {
                Some(b) => acc.candidates(b),
                None => (0..a.branches.len()).collect(),
            },
            None => (0..a.branches.len()).collect(),
        };
        for i in order {
            if let Outcome::Hit(n) = self.read(a.branches[i])? {
                return Ok(Outcome::Hit(n));
            }
        }
        Ok(Outcome::Miss)
    }

    fn read_recurrence(&mut self, id: RuleId, rule: RuleId, count: Count) -> Result<Outcome, ParseFatal> {
        let mut children = Vec::new();
        let mut matched = 0;
        loop {
            if !count.allows_many() && matched == 1 {
                break;
            }
            let before = self.tok.position();
            match self.read(rule)? {
                Outcome::Miss => break,
                Outcome::Hit(node) => {
                    matched += 1;
                    children.extend(node);
                    // A match that consumed nothing would repeat forever.
                    if self.tok.position() == before {
                        break;
                    }
                }
            }
        }
        if matched < count.min() {
            return Ok(Outcome::Miss);
        }
        if children.is_empty() {
            return Ok(Outcome::Hit(None));
        }
        let node = self.pool.alloc(ParseNode::new(Some(id), self.span(&children)))?;
        for c in children {
            self.pool.append_child(node, c);
        }
        Ok(Outcome::Hit(Some(node)))
    }

    // ── Delimited words ─────────────────────────────────────────────

    fn read_delimited(&mut self, id: RuleId, d: &Delimited) -> Result<Outcome, ParseFatal> {
        let Some(w) = self.read_word() else {
            return Ok(Outcome::Miss);
        };
        self.delimited_in(id, d, w.range, &w.text, true)
    }

    /// Validate every section before creating any node.
    fn delimited_in(
        &mut self,
        id: RuleId,
        d: &Delimited,
        range: DocRange,
        text: &str,
        create: bool,
    ) -> Result<Outcome, ParseFatal> {
        let Some(parts) = split_delimited(d, text) else {
            return Ok(Outcome::Miss);
        };
        let sub = |b: usize, e: usize| DocRange::new(range.source, range.begin + b, range.begin + e);
        for (rule, b, e) in &parts {
            if !self.read_range(*rule, sub(*b, *e), &text[*b..*e], false)?.is_hit() {
                return Ok(Outcome::Miss);
            }
        }
        if !create {
            return Ok(Outcome::Hit(None));
        }
        let mut children = Vec::new();
        for (rule, b, e) in &parts {
            if let Outcome::Hit(Some(n)) = self.read_range(*rule, sub(*b, *e), &text[*b..*e], true)? {
                children.push(n);
            }
        }
        let node = self.pool.alloc(ParseNode::new(Some(id), range))?;
        for c in children {
            self.pool.append_child(node, c);
        }
        Ok(Outcome::Hit(Some(node)))
    }

    /// Match a rule against part of one word. Without `create` only
    /// validates.
    fn read_range(
        &mut self,
        id: RuleId,
        range: DocRange,
        text: &str,
        create: bool,
    ) -> Result<Outcome, ParseFatal> {
        let outcome = self.range_rule(id, range, text, create)?;
        if let Outcome::Hit(Some(n)) = outcome {
            self.mark_node(id, n);
        }
        Ok(outcome)
    }

    fn range_rule(
        &mut self,
        id: RuleId,
        range: DocRange,
        text: &str,
        create: bool,
    ) -> Result<Outcome, ParseFatal> {
        let g = self.grammar;
        let accepted = match g.rules.rule(id) {
            Rule::Literal {
                text: lit,
                case_sensitive,
            } => matches_literal(text, lit, *case_sensitive),
            Rule::Int => text.parse::<i64>().is_ok(),
            Rule::Real => text.parse::<f64>().is_ok(),
            Rule::String => !text.is_empty(),
            Rule::StringExcept { exceptions } => !text.is_empty() && !exceptions.contains(text),
            Rule::Named(n) => match (&n.kind, n.definition) {
                (_, Some(def)) => return self.read_range(def, range, text, create),
                (NamedKind::Enumeration(values), None) => values.iter().any(|v| v.name == text),
                _ => false,
            },
            Rule::Reference(r) => match r.target {
                Some(t) => return self.read_range(t, range, text, create),
                None => false,
            },
            Rule::Alternate(a) => {
                for b in &a.branches {
                    let outcome = self.read_range(*b, range, text, create)?;
                    if outcome.is_hit() {
                        return Ok(outcome);
                    }
                }
                false
            }
            Rule::Sequence(s) if s.elements.len() == 1 => {
                return self.read_range(s.elements[0], range, text, create)
            }
            Rule::Passthrough {
                kind: PassthroughKind::Error,
                rule,
            } => {
                let outcome = self.read_range(*rule, range, text, create)?;
                if let Outcome::Hit(Some(n)) = outcome {
                    self.pool.get_mut(n).flags.insert(NodeFlags::ERROR_INCOMPLETE);
                }
                return Ok(outcome);
            }
            Rule::Delimited(d) => return self.delimited_in(id, d, range, text, create),
            _ => false,
        };
        match (accepted, create) {
            (false, _) => Ok(Outcome::Miss),
            (true, false) => Ok(Outcome::Hit(None)),
            (true, true) => {
                let node = self.pool.alloc(ParseNode::new(Some(id), range))?;
                Ok(Outcome::Hit(Some(node)))
            }
        }
    }

    // ── Types ───────────────────────────────────────────────────────

    fn type_path(&mut self, spec: &TypePathSpec) -> Option<Vec<String>> {
        let mut out = Vec::new();
        for seg in &spec.segments {
            match seg {
                PathSegment::Name(s) => out.push(s.clone()),
                PathSegment::Generated => out.push(self.index.generated_name()),
                PathSegment::Word(n) => {
                    let frame = self.frames.last()?;
                    let node = (*frame.get(n.checked_sub(1)?)?)?;
                    let text = self.node_text(node);
                    out.extend(trim_quotes(&text).split('.').map(str::to_owned));
                }
            }
        }
        (!out.is_empty()).then_some(out)
    }

    /// Zero-width: a type command consumes no words.
    fn read_type_load(&mut self, id: RuleId, t: &TypeLoad) -> Result<Outcome, ParseFatal> {
        let g = self.grammar;
        let Some(load) = self.type_path(&t.load) else {
            return Ok(Outcome::Miss);
        };
        let mut node = ParseNode::new(Some(id), self.tok.here());
        let (save, renamed) = match t.op {
            TypeOp::Load => {
                let Some(ct) = self.index.load(&load, t.load.nested, &g.default_types) else {
                    return Ok(Outcome::Miss);
                };
                self.index.push_current(ct);
                (None, None)
            }
            TypeOp::Create => {
                let Some(save_spec) = &t.save else {
                    return Ok(Outcome::Miss);
                };
                let Some(save) = self.type_path(save_spec) else {
                    return Ok(Outcome::Miss);
                };
                let Some(created) = self.index.create(
                    &save,
                    save_spec.nested,
                    &load,
                    t.load.nested,
                    t.allow_replace,
                    &g.default_types,
                ) else {
                    return Ok(Outcome::Miss);
                };
                if created.renamed.is_some() {
                    node = node.with_flags(NodeFlags::DUPLICATE_NAME);
                }
                self.index.push_current(created.current);
                (Some(save), created.renamed)
            }
            TypeOp::Delete => {
                if !self.index.delete(&load, t.load.nested) {
                    return Ok(Outcome::Miss);
                }
                (None, None)
            }
        };
        let node = self.pool.alloc(node.with_aux(NodeAux::TypeInfo {
            op: t.op,
            path: load,
            save,
            renamed,
        }))?;
        Ok(Outcome::Hit(Some(node)))
    }

    // ── Delay-load ──────────────────────────────────────────────────

    /// Main pass: skim the definition up to its terminator and leave a
    /// placeholder. Replays read the body itself.
    fn read_delay_load(
        &mut self,
        id: RuleId,
        kind: &str,
        terminator: &str,
        body: RuleId,
    ) -> Result<Outcome, ParseFatal> {
        if self.replay_depth > 0 {
            return self.read(body);
        }
        let Some(name) = self.read_word() else {
            return Ok(Outcome::Miss);
        };
        let mut range = name.range;
        loop {
            let Some(w) = self.read_terminator() else {
                return Ok(Outcome::Miss);
            };
            range = range.cover(&w.range).unwrap_or(range);
            if w.text == terminator {
                break;
            }
        }
        let req = Requirement::new(kind, trim_quotes(&name.text));
        let order = self.delay.len() as u32;
        let node = self.pool.alloc(
            ParseNode::new(Some(id), range)
                .with_value(req.name.clone())
                .with_flags(NodeFlags::DELAY_LOAD)
                .with_aux(NodeAux::DelayLoadOrder(order)),
        )?;
        if self.delay.iter().any(|r| r.req == req) {
            warn!(kind = %req.kind, name = %req.name, "definition recorded twice; keeping the first");
        } else {
            self.delay.push(DelayRecord {
                req,
                placeholder: node,
                rule: body,
                source: name.range.source,
                offset: name.range.begin,
                line: name.line,
                resolved: false,
            });
        }
        Ok(Outcome::Hit(Some(node)))
    }
}

// ── Tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::compile_grammar;
    use crate::config::{ParseOptions, ResolveOptions};
    use crate::driver::Parser;
    use crate::source::InMemoryProvider;
    use crate::trace::ParseResult;
    use pretty_assertions::assert_eq;

    fn parse(grammar: &str, input: &str) -> (Grammar, ParseResult) {
        let g = compile_grammar(grammar, &ResolveOptions::default());
        assert!(g.is_usable(), "{:?}", g.errors);
        let provider = InMemoryProvider::default();
        let result = {
            let parser = Parser::new(&g, &provider, ParseOptions::default()).unwrap();
            parser.parse_text("/in.txt", input).unwrap()
        };
        (g, result)
    }

    fn texts(result: &ParseResult, node_type: &str) -> Vec<String> {
        result
            .tree
            .find_by_type(node_type)
            .into_iter()
            .map(|n| result.tree.text(n, &result.sources).to_owned())
            .collect()
    }

    #[test]
    fn block_sequence_names_its_node_after_the_leading_literal() {
        let (_, result) = parse(
            "(rule root-command { platform <name> end_platform })",
            "platform \"p1\" end_platform",
        );
        assert!(result.is_clean(), "{:?}", result.errors);
        let tree = &result.tree;
        let platform = tree.find_by_type("platform")[0];
        let children = tree.children(platform);
        assert_eq!(children.len(), 3);
        let name = tree.node(children[1]);
        assert_eq!(tree.text(children[1], &result.sources), "\"p1\"");
        assert_eq!(name.value, None);
        assert!(name.flags.contains(NodeFlags::NAMED));
    }

    #[test]
    fn block_terminator_stops_inner_reads() {
        let (_, result) = parse(
            "(rule root-command { platform <name> end_platform })",
            "platform end_platform",
        );
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].text, "end_platform");
    }

    #[test]
    fn case_insensitive_literal() {
        let (_, result) = parse("(rule root-command { (nocase show) <string> })", "SHOW x Show y");
        assert!(result.is_clean(), "{:?}", result.errors);
        assert_eq!(texts(&result, "show"), vec!["SHOW x", "Show y"]);
    }

    #[test]
    fn quoted_strings_span_words() {
        let (_, result) = parse(
            "(rule root-command { title <quotable-string> })",
            "title \"two words here\" title plain",
        );
        assert!(result.is_clean(), "{:?}", result.errors);
        let tree = &result.tree;
        let values: Vec<&str> = tree
            .find_by_type("title")
            .into_iter()
            .map(|n| tree.text(tree.children(n)[1], &result.sources))
            .collect();
        assert_eq!(values, vec!["two words here", "plain"]);
    }

    #[test]
    fn line_string_stops_at_end_of_line() {
        let (_, result) = parse(
            "(rule root-command { note <line-string> | show <string> })",
            "note all of this\nshow x",
        );
        assert!(result.is_clean(), "{:?}", result.errors);
        assert_eq!(texts(&result, "note"), vec!["note all of this"]);
        assert_eq!(texts(&result, "show"), vec!["show x"]);
    }

    #[test]
    fn optional_recurrence_leaves_no_node() {
        let (_, result) = parse("(rule root-command { item <integer>? })", "item item 4");
        assert!(result.is_clean(), "{:?}", result.errors);
        let tree = &result.tree;
        let counts: Vec<usize> = tree
            .find_by_type("item")
            .into_iter()
            .map(|n| tree.children(n).len())
            .collect();
        assert_eq!(counts, vec![1, 2]);
    }

    #[test]
    fn delimited_word_reads_sections() {
        let (_, result) = parse(
            "(rule root-command { pair (delimited \"[\" <integer> \",\" <string> \"]\") })",
            "pair [12,abc] pair [x,abc] pair [12,abc",
        );
        assert_eq!(result.errors.len(), 2);
        let tree = &result.tree;
        let pair = tree.find_by_type("pair")[0];
        let word = tree.children(pair)[1];
        let parts: Vec<&str> = tree
            .children(word)
            .into_iter()
            .map(|n| tree.text(n, &result.sources))
            .collect();
        assert_eq!(parts, vec!["12", "abc"]);
    }

    #[test]
    fn split_delimited_requires_the_whole_word() {
        let d = Delimited {
            sections: vec![
                crate::rules::DelimitedSection {
                    delimiter: Some("[".into()),
                    rule: Some(RuleId(1)),
                },
                crate::rules::DelimitedSection {
                    delimiter: Some("]".into()),
                    rule: None,
                },
            ],
            case_sensitive: true,
        };
        assert_eq!(split_delimited(&d, "[ab]"), Some(vec![(RuleId(1), 1, 3)]));
        assert_eq!(split_delimited(&d, "[ab]x"), None);
        assert_eq!(split_delimited(&d, "ab]"), None);
    }

    #[test]
    fn skip_marks_the_element() {
        let (_, result) = parse(
            "(rule root-command { tag [skip] <string> })",
            "tag hidden",
        );
        let tree = &result.tree;
        let tag = tree.find_by_type("tag")[0];
        let value = tree.children(tag)[1];
        assert!(tree.node(value).flags.contains(NodeFlags::SKIPPED));
    }

    #[test]
    fn trace_lists_sequences_with_actions() {
        let (g, result) = parse(
            "(rule root-command { tag <string> [skip] | show <string> })",
            "tag a show b tag c",
        );
        assert_eq!(result.trace.len(), 2);
        for entry in &result.trace {
            assert_eq!(result.tree.node(entry.node).node_type.as_deref(), Some("tag"));
            assert!(matches!(g.rules.rule(entry.rule), Rule::Sequence(_)));
        }
    }
}
