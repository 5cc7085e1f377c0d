//! Grammar pipeline: grammar text -> resolved, immutable [`Grammar`].
//!
//! This is a thin orchestrator that calls each pass module in order.
//! Errors from every pass accumulate on the grammar; resolution always runs
//! to completion so one run reports everything.

use crate::config::ResolveOptions;
use crate::error::{DefinitionError, Stage};
use crate::grammar::parse_grammar;
use crate::pass1_compile;
use crate::pass2_resolve;
use crate::pass3_types;
use crate::pass4_init;
use crate::pass5_check;
use crate::rules::{
    FileReferenceKind, Named, NamedKind, Rule, RuleArena, RuleFlags, RuleId, ScriptVar, StructDef,
};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Name of the rule every root-level command is read with.
pub const ROOT_COMMAND: &str = "root-command";
/// Name of the struct that roots the action type graph.
pub const ROOT_STRUCT: &str = "root";

/// Declared signature of a grammar function.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionSig {
    pub name: String,
    pub return_type: Option<String>,
    pub params: Vec<ScriptVar>,
}

/// A grammar-default type registered with `symbol`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DefaultType {
    pub struct_name: String,
    pub struct_rule: Option<RuleId>,
}

/// A compiled grammar. Immutable once [`GrammarCompiler::finish`] returns it,
/// and shareable read-only between independent parses.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Grammar {
    pub rules: RuleArena,
    /// Unnamed scope holding every top-level declaration.
    pub global: RuleId,
    pub root_rule: Option<RuleId>,
    pub root_struct: Option<RuleId>,
    pub functions: BTreeMap<String, FunctionSig>,
    pub default_types: BTreeMap<Vec<String>, DefaultType>,
    pub version: Option<String>,
    pub errors: Vec<DefinitionError>,
}

impl Grammar {
    /// A grammar holding only the global scope and the built-in rules.
    pub fn empty() -> Self {
        let mut rules = RuleArena::new();
        let global = rules.add(Rule::Named(Named::new("", NamedKind::Rule, None)), None, 0);
        let mut grammar = Grammar {
            rules,
            global,
            root_rule: None,
            root_struct: None,
            functions: BTreeMap::new(),
            default_types: BTreeMap::new(),
            version: None,
            errors: Vec::new(),
        };
        grammar.add_builtins();
        grammar
    }

    fn add_builtins(&mut self) {
        let builtins: Vec<(&str, Rule, RuleFlags)> = vec![
            ("string", Rule::String, RuleFlags::default()),
            ("ignore", Rule::String, RuleFlags::default()),
            (
                "quotable-string",
                Rule::QuotedString {
                    file_reference: None,
                },
                RuleFlags::default(),
            ),
            (
                "file-reference",
                Rule::QuotedString {
                    file_reference: Some(FileReferenceKind::Input),
                },
                RuleFlags::default(),
            ),
            ("line-string", Rule::LineString, RuleFlags::default()),
            ("real", Rule::Real, RuleFlags::default()),
            ("integer", Rule::Int, RuleFlags::default()),
            ("typename", Rule::String, RuleFlags::LAZY_TYPENAME),
            (
                "string-except",
                Rule::StringExcept {
                    exceptions: BTreeSet::new(),
                },
                RuleFlags::default(),
            ),
            ("typeref", Rule::String, RuleFlags::LAZY_TYPE_REFERENCE),
            ("name", Rule::String, RuleFlags::NAMED_NODE),
            ("Error", Rule::String, RuleFlags::ERROR_INCOMPLETE),
        ];
        for (name, leaf, flags) in builtins {
            let named = self.rules.add(
                Rule::Named(Named::new(name, NamedKind::Rule, Some(self.global))),
                Some(self.global),
                0,
            );
            let def = self.rules.add(leaf, Some(named), 0);
            self.rules.node_mut(named).flags = flags;
            if let Some(n) = self.rules.named_mut(named) {
                n.definition = Some(def);
            }
            if let Some(g) = self.rules.named_mut(self.global) {
                g.nested.insert(name.to_owned(), named);
            }
        }
    }

    /// Look up a declaration by dotted path from the global scope.
    pub fn find(&self, path: &str) -> Option<RuleId> {
        self.rules.resolve_path(self.global, path)
    }

    /// A grammar with definition errors must not be used for parsing.
    pub fn is_usable(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn errors(&self) -> &[DefinitionError] {
        &self.errors
    }

    pub(crate) fn error(&mut self, stage: Stage, rule: Option<RuleId>, message: impl Into<String>) {
        let name = rule.map(|r| self.rules.full_name(r));
        let line = rule.map(|r| self.rules.node(r).line).filter(|l| *l > 0);
        let mut e = DefinitionError::new(stage, name.as_deref().filter(|n| !n.is_empty()), message);
        e.line = line;
        // Re-running resolution reports each problem once.
        if !self.errors.contains(&e) {
            self.errors.push(e);
        }
    }

    /// Text merged after a resolve can change accelerators and single-token
    /// flags anywhere, so initialization starts over from its second pass.
    fn reopen(&mut self) {
        let ids: Vec<RuleId> = self.rules.ids().collect();
        for id in ids {
            let node = self.rules.node_mut(id);
            node.init_pass = node.init_pass.min(1);
        }
    }

    /// Check the root rule and make sure the root struct exists.
    fn finalize_roots(&mut self) {
        if self.root_rule.is_some() {
            return;
        }
        match self.find(ROOT_COMMAND) {
            Some(id) => self.root_rule = Some(id),
            None => self.error(
                Stage::Compile,
                None,
                format!("missing '{}' rule", ROOT_COMMAND),
            ),
        }
        match self.find(ROOT_STRUCT) {
            Some(id) if self.rules.struct_def(id).is_some() => self.root_struct = Some(id),
            Some(id) => self.error(
                Stage::Compile,
                Some(id),
                format!("'{}' must be a struct", ROOT_STRUCT),
            ),
            None => {
                let id = self.rules.add(
                    Rule::Named(Named::new(
                        ROOT_STRUCT,
                        NamedKind::Struct(StructDef::default()),
                        Some(self.global),
                    )),
                    Some(self.global),
                    0,
                );
                if let Some(g) = self.rules.named_mut(self.global) {
                    g.nested.insert(ROOT_STRUCT.to_owned(), id);
                }
                self.root_struct = Some(id);
            }
        }
    }
}

/// Incremental grammar builder: add one or more grammar texts, then resolve.
pub struct GrammarCompiler {
    grammar: Grammar,
    options: ResolveOptions,
}

impl GrammarCompiler {
    pub fn new(options: ResolveOptions) -> Self {
        GrammarCompiler {
            grammar: Grammar::empty(),
            options,
        }
    }

    /// Parse and compile one grammar text. Declarations merge with those
    /// added earlier.
    pub fn add_grammar(&mut self, text: &str) -> &mut Self {
        let (exprs, syntax_errors) = parse_grammar(text);
        let before = self.grammar.errors.len();
        self.grammar.errors.extend(syntax_errors);
        pass1_compile::compile(&mut self.grammar, exprs);
        self.grammar.reopen();
        debug!(
            declarations = self.grammar.rules.len(),
            errors = self.grammar.errors.len() - before,
            "grammar text compiled"
        );
        self
    }

    /// Run every resolution pass. Safe to call more than once.
    pub fn resolve(&mut self) -> &mut Self {
        let g = &mut self.grammar;
        g.finalize_roots();
        // Pass 2: references
        pass2_resolve::resolve_references(g);
        // Pass 3: struct bases, attribute types, default types
        pass3_types::resolve_types(g);
        // Pass 2 (continued): `:`/`$` shorthands need attribute types
        pass2_resolve::expand_shorthands(g);
        pass2_resolve::eliminate_wrappers(g);
        // Pass 4: guarded initialization passes
        pass4_init::initialize(g, &self.options);
        // Pass 5: action type-check
        pass5_check::check_actions(g);
        debug!(
            rules = g.rules.len(),
            errors = g.errors.len(),
            "grammar resolved"
        );
        self
    }

    pub fn grammar(&self) -> &Grammar {
        &self.grammar
    }

    pub fn options(&self) -> &ResolveOptions {
        &self.options
    }

    /// Resolve and hand out the finished grammar.
    pub fn finish(mut self) -> Grammar {
        self.resolve();
        self.grammar
    }
}

/// Compile and resolve a single grammar text.
pub fn compile_grammar(text: &str, options: &ResolveOptions) -> Grammar {
    let mut compiler = GrammarCompiler::new(options.clone());
    compiler.add_grammar(text);
    compiler.finish()
}
