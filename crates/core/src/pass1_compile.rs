//! Pass 1: grammar expressions -> Rule Model.
//!
//! Declarations land in nested named-rule tables; bodies become the
//! alternation each named rule owns as its definition. Action blocks are
//! lowered into [`ActionPart`]s here. Errors are recorded and compilation
//! carries on with the next construct.

use crate::action::{Access, Action, ActionPart, MapOp};
use crate::compile::{DefaultType, FunctionSig, Grammar};
use crate::error::Stage;
use crate::grammar::{ActionExpr, ActionStmt, Expr, ExprKind, KeywordExpr};
use crate::rules::{
    Alternate, Attribute, Delimited, DelimitedSection, Enumerator, FileReferenceKind, Named,
    NamedKind, PassthroughKind, PathSegment, Reference, Rule, RuleId, ScriptVar, Sequence,
    StructDef, TypeLoad, TypeOp, TypePathSpec,
};
use std::collections::BTreeSet;

/// Compile top-level grammar expressions into `grammar`.
pub fn compile(grammar: &mut Grammar, exprs: Vec<Expr>) {
    let mut c = Compiler { g: grammar };
    for e in exprs {
        c.top_level(e);
    }
}

struct Compiler<'g> {
    g: &'g mut Grammar,
}

impl<'g> Compiler<'g> {
    fn error(&mut self, scope: Option<RuleId>, line: u32, msg: impl Into<String>) {
        let rule = scope.map(|s| self.g.rules.full_name(s)).filter(|n| !n.is_empty());
        let mut e = crate::error::DefinitionError::new(Stage::Compile, rule.as_deref(), msg);
        e.line = Some(line);
        self.g.errors.push(e);
    }

    fn top_level(&mut self, e: Expr) {
        let line = e.line;
        let ExprKind::Keyword(k) = e.kind else {
            self.error(None, line, "expected a parenthesized declaration");
            return;
        };
        match k.keyword.as_str() {
            "rule" | "struct" | "value" | "enumeration" => {
                let global = self.g.global;
                self.declare(global, k, line);
            }
            "function" => self.function(k, line),
            "symbol" => self.symbol(k, line),
            "grammar-version" => {
                self.g.version = k.args.first().and_then(Expr::as_text).map(str::to_owned);
            }
            kw if kw.starts_with("aux-") => {}
            kw => self.error(None, line, format!("unexpected top-level '{}'", kw)),
        }
    }

    // -- Declarations -------------------------------------------

    fn declare(&mut self, scope: RuleId, k: KeywordExpr, line: u32) -> Option<RuleId> {
        let Some(name) = k.args.first().and_then(Expr::as_text).map(str::to_owned) else {
            self.error(Some(scope), line, format!("'{}' needs a name", k.keyword));
            return None;
        };
        let kind = match k.keyword.as_str() {
            "struct" => NamedKind::Struct(StructDef::default()),
            "value" => NamedKind::Value,
            "enumeration" => NamedKind::Enumeration(Vec::new()),
            _ => NamedKind::Rule,
        };

        let existing = self.g.rules.named(scope).and_then(|n| n.nested.get(&name).copied());
        let id = match existing {
            Some(id) => {
                let same = self
                    .g
                    .rules
                    .named(id)
                    .map(|n| n.kind.same_kind(&kind))
                    .unwrap_or(false);
                if !same {
                    let was = self.g.rules.rule(id).kind_name();
                    self.error(
                        Some(scope),
                        line,
                        format!("'{}' already declared as {}, not {}", name, was, kind.name()),
                    );
                    return None;
                }
                id
            }
            None => {
                let id = self.g.rules.add(
                    Rule::Named(Named::new(name.clone(), kind, Some(scope))),
                    Some(scope),
                    line,
                );
                if let Some(n) = self.g.rules.named_mut(scope) {
                    n.nested.insert(name.clone(), id);
                }
                id
            }
        };

        self.declaration_labels(id, &k, line);
        for arg in k.args.into_iter().skip(1) {
            self.declaration_body(id, arg);
        }
        Some(id)
    }

    fn declaration_labels(&mut self, id: RuleId, k: &KeywordExpr, line: u32) {
        for label in &k.labels {
            let text = label.value.as_ref().and_then(Expr::as_text).map(str::to_owned);
            match label.name.as_str() {
                "base_type" => {
                    if self.g.rules.struct_def(id).is_none() {
                        self.error(Some(id), line, "only structs have a base type");
                    } else if text.is_none() {
                        self.error(Some(id), line, ":base_type needs a name");
                    } else if let Some(s) = self.struct_mut(id) {
                        s.base_name = text;
                    }
                }
                "input" => {
                    if let Some(n) = self.g.rules.named_mut(id) {
                        n.input_type = text;
                    }
                }
                "output" => {
                    if let Some(n) = self.g.rules.named_mut(id) {
                        n.output_type = text;
                    }
                }
                "node_type" => self.g.rules.node_mut(id).node_type = text,
                "id" => match text.as_deref().map(str::parse::<i64>) {
                    Some(Ok(n)) => self.g.rules.node_mut(id).user_id = Some(n),
                    _ => self.error(Some(id), line, ":id needs an integer"),
                },
                "symbol" => {
                    let path = label.value.as_ref().and_then(|v| self.symbol_path(v));
                    match path {
                        Some(path) => {
                            let struct_name = self.g.rules.full_name(id);
                            match self.struct_mut(id) {
                                Some(s) => s.symbols.push(path.clone()),
                                None => {
                                    self.error(Some(id), line, "only structs register symbols");
                                    continue;
                                }
                            }
                            self.g.default_types.insert(
                                path,
                                DefaultType {
                                    struct_name,
                                    struct_rule: None,
                                },
                            );
                        }
                        None => self.error(Some(id), line, ":symbol needs (type NAME ...)"),
                    }
                }
                other if other.starts_with("aux") => {}
                other => self.error(Some(id), line, format!("unknown label ':{}'", other)),
            }
        }
    }

    fn declaration_body(&mut self, id: RuleId, arg: Expr) {
        let line = arg.line;
        match arg.kind {
            ExprKind::Keyword(k) => match k.keyword.as_str() {
                "rule" | "struct" | "value" | "enumeration" => {
                    self.declare(id, k, line);
                }
                "var" => self.attribute(id, k, line),
                "script-var" => match var_parts(&k) {
                    Some((type_name, name)) => match self.struct_mut(id) {
                        Some(s) => s.script_vars.push(ScriptVar { type_name, name }),
                        None => self.error(Some(id), line, "script-var outside a struct"),
                    },
                    None => self.error(Some(id), line, "script-var needs a type and a name"),
                },
                "initially" => {
                    let mut parts = Vec::new();
                    for a in k.args {
                        match a.kind {
                            ExprKind::Actions(stmts) => {
                                for s in stmts {
                                    match lower_statement(&s) {
                                        Ok(p) => parts.push(p),
                                        Err(msg) => self.error(Some(id), s.line, msg),
                                    }
                                }
                            }
                            _ => self.error(Some(id), a.line, "initially takes action blocks"),
                        }
                    }
                    match self.struct_mut(id) {
                        Some(s) => s.initially.extend(parts),
                        None => self.error(Some(id), line, "initially outside a struct"),
                    }
                }
                "values" => self.enumerators(id, k, line),
                kw if kw.starts_with("aux-") => {}
                _ => {
                    let expr = Expr::new(ExprKind::Keyword(k), line);
                    self.body_element(id, expr);
                }
            },
            ExprKind::Sequence(items) => {
                if let Some(seq) = self.sequence(id, items, true, line) {
                    self.add_branch(id, seq);
                }
            }
            ExprKind::Alternation(branches) => {
                for b in branches {
                    let bl = b.line;
                    if let ExprKind::Sequence(items) = b.kind {
                        if let Some(seq) = self.sequence(id, items, true, bl) {
                            self.add_branch(id, seq);
                        }
                    }
                }
            }
            ExprKind::Actions(_) => {
                self.error(Some(id), line, "action block outside a sequence")
            }
            other => self.body_element(id, Expr::new(other, line)),
        }
    }

    /// A bare element in a declaration body is wrapped in a sequence.
    fn body_element(&mut self, id: RuleId, expr: Expr) {
        let line = expr.line;
        if let Some(seq) = self.sequence(id, vec![expr], true, line) {
            self.add_branch(id, seq);
        }
    }

    fn add_branch(&mut self, named: RuleId, branch: RuleId) {
        let line = self.g.rules.node(named).line;
        let def = match self.g.rules.named(named).and_then(|n| n.definition) {
            Some(def) if matches!(self.g.rules.rule(def), Rule::Alternate(_)) => def,
            existing => {
                // A resolved grammar may have bypassed the alternation; wrap
                // the surviving definition again.
                let mut alt = Alternate::default();
                alt.branches.extend(existing);
                let def = self.g.rules.add(Rule::Alternate(alt), Some(named), line);
                if let Some(old) = existing {
                    self.g.rules.node_mut(old).parent = Some(def);
                }
                if let Some(n) = self.g.rules.named_mut(named) {
                    n.definition = Some(def);
                }
                def
            }
        };
        self.g.rules.node_mut(branch).parent = Some(def);
        if let Rule::Alternate(a) = self.g.rules.rule_mut(def) {
            a.branches.push(branch);
            a.accelerator = None;
        }
    }

    fn struct_mut(&mut self, id: RuleId) -> Option<&mut StructDef> {
        self.g.rules.struct_def_mut(id)
    }

    fn attribute(&mut self, id: RuleId, k: KeywordExpr, line: u32) {
        let Some((type_name, name)) = var_parts(&k) else {
            self.error(Some(id), line, "var needs a type and a name");
            return;
        };
        let (type_name, is_pointer) = match type_name.strip_suffix('&') {
            Some(t) => (t.to_owned(), true),
            None => (type_name, false),
        };
        let attr = Attribute {
            name: name.clone(),
            type_name,
            is_pointer,
            default: k.label_text("default").map(str::to_owned),
            fixed: k.has_label("fixed"),
            value_type: None,
            type_rule: None,
        };
        let Some(s) = self.struct_mut(id) else {
            self.error(Some(id), line, "var outside a struct");
            return;
        };
        if s.attributes.iter().any(|a| a.name == name) {
            self.error(Some(id), line, format!("duplicate attribute '{}'", name));
            return;
        }
        s.attributes.push(attr);
    }

    fn enumerators(&mut self, id: RuleId, k: KeywordExpr, line: u32) {
        let texts: Vec<String> = k
            .args
            .iter()
            .filter_map(Expr::as_text)
            .map(str::to_owned)
            .collect();
        if texts.len() != k.args.len() || texts.len() % 2 != 0 {
            self.error(Some(id), line, "values takes name/value pairs");
            return;
        }
        let values: Vec<Enumerator> = texts
            .chunks(2)
            .map(|p| Enumerator {
                name: p[0].clone(),
                value: p[1].clone(),
            })
            .collect();
        match self.g.rules.named_mut(id).map(|n| &mut n.kind) {
            Some(NamedKind::Enumeration(list)) => list.extend(values),
            _ => self.error(Some(id), line, "values outside an enumeration"),
        }
    }

    fn function(&mut self, k: KeywordExpr, line: u32) {
        let Some(name) = k.args.first().and_then(Expr::as_text).map(str::to_owned) else {
            self.error(None, line, "function needs a name");
            return;
        };
        if self.g.functions.contains_key(&name) {
            self.error(None, line, format!("duplicate function '{}'", name));
            return;
        }
        let mut params = Vec::new();
        for a in k.args.iter().skip(1) {
            match a.as_keyword() {
                Some(v) if v.keyword == "var" => match var_parts(v) {
                    Some((type_name, name)) => params.push(ScriptVar { type_name, name }),
                    None => self.error(None, a.line, "var needs a type and a name"),
                },
                _ => self.error(None, a.line, "function parameters are (var TYPE NAME)"),
            }
        }
        let sig = FunctionSig {
            name: name.clone(),
            return_type: k.label_text("return").map(str::to_owned),
            params,
        };
        self.g.functions.insert(name, sig);
    }

    fn symbol(&mut self, k: KeywordExpr, line: u32) {
        let path = k.args.first().and_then(|a| self.symbol_path(a));
        let struct_name = k.args.get(1).and_then(Expr::as_text).map(str::to_owned);
        match (path, struct_name) {
            (Some(path), Some(struct_name)) => {
                self.g.default_types.insert(
                    path,
                    DefaultType {
                        struct_name,
                        struct_rule: None,
                    },
                );
            }
            _ => self.error(None, line, "symbol needs (type NAME ...) and a struct"),
        }
    }

    /// `(type a b)` with plain names only.
    fn symbol_path(&self, e: &Expr) -> Option<Vec<String>> {
        let k = e.as_keyword().filter(|k| k.keyword == "type")?;
        let names: Vec<String> = k
            .args
            .iter()
            .filter_map(Expr::as_text)
            .map(str::to_owned)
            .collect();
        (!names.is_empty() && names.len() == k.args.len()).then_some(names)
    }

    // -- Rule expressions ---------------------------------------

    fn sequence(
        &mut self,
        parent: RuleId,
        items: Vec<Expr>,
        case_sensitive: bool,
        line: u32,
    ) -> Option<RuleId> {
        let id = self
            .g
            .rules
            .add(Rule::Sequence(Sequence::default()), Some(parent), line);
        let mut seq = Sequence::default();
        for item in items {
            let item_line = item.line;
            match item.kind {
                ExprKind::Actions(stmts) => {
                    let slot = seq.elements.len();
                    let mut parts = Vec::new();
                    for s in &stmts {
                        match lower_statement(s) {
                            Ok(p) => parts.push(p),
                            Err(msg) => self.error(Some(parent), s.line, msg),
                        }
                    }
                    let applies = parts
                        .iter()
                        .any(|p| matches!(p, ActionPart::ObjectMap { op: MapOp::Apply, .. }));
                    let after_type_load = slot
                        .checked_sub(1)
                        .map(|i| matches!(self.g.rules.rule(seq.elements[i]), Rule::TypeLoad(_)))
                        .unwrap_or(false);
                    if applies && !after_type_load {
                        self.error(
                            Some(parent),
                            item_line,
                            "apply($$) must directly follow a type load",
                        );
                    }
                    seq.slot_mut(slot).parts.extend(parts);
                }
                other => {
                    if let Some(el) =
                        self.element(id, Expr::new(other, item_line), case_sensitive)
                    {
                        seq.elements.push(el);
                    }
                }
            }
        }
        seq.actions.retain(|_, a: &mut Action| !a.is_empty());
        *self.g.rules.rule_mut(id) = Rule::Sequence(seq);
        Some(id)
    }

    fn adopt(&mut self, parent: RuleId, child: RuleId) {
        self.g.rules.node_mut(child).parent = Some(parent);
    }

    fn element(&mut self, parent: RuleId, e: Expr, case_sensitive: bool) -> Option<RuleId> {
        let line = e.line;
        let rule = match e.kind {
            ExprKind::Word(text) | ExprKind::Quoted(text) => Rule::Literal {
                text,
                case_sensitive,
            },
            ExprKind::Ref(path) => Rule::Reference(Reference { path, target: None }),
            ExprKind::Sequence(items) => return self.sequence(parent, items, case_sensitive, line),
            ExprKind::Alternation(branches) => {
                let id = self
                    .g
                    .rules
                    .add(Rule::Alternate(Alternate::default()), Some(parent), line);
                let mut alt = Alternate::default();
                for b in branches {
                    let bl = b.line;
                    if let ExprKind::Sequence(items) = b.kind {
                        if let Some(s) = self.sequence(id, items, case_sensitive, bl) {
                            alt.branches.push(s);
                        }
                    }
                }
                *self.g.rules.rule_mut(id) = Rule::Alternate(alt);
                return Some(id);
            }
            ExprKind::Recurrence(inner, count) => {
                let child = self.element(parent, *inner, case_sensitive)?;
                let id = self
                    .g
                    .rules
                    .add(Rule::Recurrence { rule: child, count }, Some(parent), line);
                self.adopt(id, child);
                return Some(id);
            }
            ExprKind::Keyword(k) => return self.keyword_element(parent, k, case_sensitive, line),
            ExprKind::Actions(_) => {
                self.error(Some(parent), line, "action block outside a sequence");
                return None;
            }
        };
        Some(self.g.rules.add(rule, Some(parent), line))
    }

    /// Compile keyword arguments as one rule: the rule itself when there is
    /// one argument, otherwise a sequence of them.
    fn group(
        &mut self,
        parent: RuleId,
        args: Vec<Expr>,
        case_sensitive: bool,
        line: u32,
    ) -> Option<RuleId> {
        if args.len() == 1 {
            let arg = args.into_iter().next()?;
            return self.element(parent, arg, case_sensitive);
        }
        self.sequence(parent, args, case_sensitive, line)
    }

    fn keyword_element(
        &mut self,
        parent: RuleId,
        k: KeywordExpr,
        case_sensitive: bool,
        line: u32,
    ) -> Option<RuleId> {
        let rule = match k.keyword.as_str() {
            "nocase" => return self.group(parent, k.args, false, line),
            "load" | "delete" => {
                let op = if k.keyword == "load" {
                    TypeOp::Load
                } else {
                    TypeOp::Delete
                };
                let load = self.path_spec(parent, k.args.first(), line)?;
                Rule::TypeLoad(TypeLoad {
                    op,
                    load,
                    save: None,
                    allow_replace: false,
                })
            }
            "new" | "new_replace" => {
                let save = self.path_spec(parent, k.args.first(), line)?;
                let load = self.path_spec(parent, k.args.get(1), line)?;
                Rule::TypeLoad(TypeLoad {
                    op: TypeOp::Create,
                    load,
                    save: Some(save),
                    allow_replace: k.keyword == "new_replace",
                })
            }
            "error" => {
                let child = self.group(parent, k.args, case_sensitive, line)?;
                let id = self.g.rules.add(
                    Rule::Passthrough {
                        kind: PassthroughKind::Error,
                        rule: child,
                    },
                    Some(parent),
                    line,
                );
                self.adopt(id, child);
                return Some(id);
            }
            "delay-load" => {
                let mut args = k.args.into_iter();
                let kind = args.next().and_then(|a| a.as_text().map(str::to_owned));
                let terminator = args.next().and_then(|a| a.as_text().map(str::to_owned));
                let body: Vec<Expr> = args.collect();
                let (Some(kind), Some(terminator), false) = (kind, terminator, body.is_empty())
                else {
                    self.error(Some(parent), line, "delay-load needs KIND TERMINATOR RULE");
                    return None;
                };
                let child = self.group(parent, body, case_sensitive, line)?;
                let id = self.g.rules.add(
                    Rule::Passthrough {
                        kind: PassthroughKind::DelayLoad { kind, terminator },
                        rule: child,
                    },
                    Some(parent),
                    line,
                );
                self.adopt(id, child);
                return Some(id);
            }
            "delimited" => return self.delimited(parent, k, case_sensitive, line),
            "string-except" => Rule::StringExcept {
                exceptions: k
                    .args
                    .iter()
                    .filter_map(Expr::as_text)
                    .map(str::to_owned)
                    .collect::<BTreeSet<_>>(),
            },
            "file-reference" => Rule::QuotedString {
                file_reference: Some(FileReferenceKind::Input),
            },
            "output-file-reference" => Rule::QuotedString {
                file_reference: Some(FileReferenceKind::Output),
            },
            "rule_ref" => match k.args.first().and_then(Expr::as_text) {
                Some(path) => Rule::Reference(Reference {
                    path: path.to_owned(),
                    target: None,
                }),
                None => {
                    self.error(Some(parent), line, "rule_ref needs a path");
                    return None;
                }
            },
            "typeref" | "typename" | "name" => Rule::Reference(Reference {
                path: k.keyword.clone(),
                target: None,
            }),
            "rule" | "struct" | "value" | "enumeration" => {
                self.error(
                    Some(parent),
                    line,
                    format!("'{}' declarations are not allowed inside a sequence", k.keyword),
                );
                return None;
            }
            other => {
                self.error(Some(parent), line, format!("unknown keyword '{}'", other));
                return None;
            }
        };
        Some(self.g.rules.add(rule, Some(parent), line))
    }

    /// `(delimited "[" <a> "," <b> "]")`: delimiters and rules alternate.
    fn delimited(
        &mut self,
        parent: RuleId,
        k: KeywordExpr,
        case_sensitive: bool,
        line: u32,
    ) -> Option<RuleId> {
        let id = self.g.rules.add(
            Rule::Delimited(Delimited {
                sections: Vec::new(),
                case_sensitive,
            }),
            Some(parent),
            line,
        );
        let mut sections = Vec::new();
        let mut pending: Option<String> = None;
        let mut last_was_rule = false;
        for arg in k.args {
            let arg_line = arg.line;
            if let Some(text) = arg.as_text() {
                if pending.is_some() {
                    self.error(Some(parent), arg_line, "delimited: two delimiters in a row");
                    return None;
                }
                pending = Some(text.to_owned());
                last_was_rule = false;
            } else {
                if last_was_rule {
                    self.error(Some(parent), arg_line, "delimited: two rules without a delimiter");
                    return None;
                }
                let rule = self.element(id, arg, case_sensitive)?;
                sections.push(DelimitedSection {
                    delimiter: pending.take(),
                    rule: Some(rule),
                });
                last_was_rule = true;
            }
        }
        if let Some(d) = pending {
            sections.push(DelimitedSection {
                delimiter: Some(d),
                rule: None,
            });
        }
        if sections.is_empty() {
            self.error(Some(parent), line, "empty delimited rule");
            return None;
        }
        *self.g.rules.rule_mut(id) = Rule::Delimited(Delimited {
            sections,
            case_sensitive,
        });
        Some(id)
    }

    /// `(type a $1)` or `(subtype $2)`.
    fn path_spec(&mut self, parent: RuleId, e: Option<&Expr>, line: u32) -> Option<TypePathSpec> {
        let Some(k) = e.and_then(Expr::as_keyword) else {
            self.error(Some(parent), line, "expected (type ...) or (subtype ...)");
            return None;
        };
        let nested = match k.keyword.as_str() {
            "type" => false,
            "subtype" => true,
            other => {
                self.error(Some(parent), line, format!("expected type path, got '{}'", other));
                return None;
            }
        };
        let mut segments = Vec::new();
        for (i, a) in k.args.iter().enumerate() {
            let Some(text) = a.as_text() else {
                self.error(Some(parent), line, "type path segments are words");
                return None;
            };
            let seg = if text == "generated_name" {
                PathSegment::Generated
            } else if let Some(n) = text.strip_prefix('$') {
                match n.parse::<usize>() {
                    Ok(n) if n > 0 => {
                        if i + 1 != k.args.len() {
                            self.error(
                                Some(parent),
                                line,
                                format!("'{}' must be the last segment of a type path", text),
                            );
                            return None;
                        }
                        PathSegment::Word(n)
                    }
                    _ => {
                        self.error(Some(parent), line, format!("bad word reference '{}'", text));
                        return None;
                    }
                }
            } else {
                PathSegment::Name(text.to_owned())
            };
            segments.push(seg);
        }
        if segments.is_empty() {
            self.error(Some(parent), line, "empty type path");
            return None;
        }
        Some(TypePathSpec { segments, nested })
    }
}

/// `(var TYPE NAME)` parts.
fn var_parts(k: &KeywordExpr) -> Option<(String, String)> {
    let t = k.args.first()?.as_text()?;
    let n = k.args.get(1)?.as_text()?;
    Some((t.to_owned(), n.to_owned()))
}

// ── Action compiler ──────────────────────────────────────────────────

fn is_literal_word(w: &str) -> bool {
    w == "true" || w == "false" || w.parse::<f64>().is_ok()
}

/// Lower one action statement.
pub fn lower_statement(stmt: &ActionStmt) -> Result<ActionPart, String> {
    if let Some(target) = &stmt.target {
        return Ok(ActionPart::Assign {
            target: Access::new(target.clone()),
            value: Box::new(lower_operand(&stmt.value)?),
        });
    }
    match &stmt.value {
        ActionExpr::Word(w) if w == "skip" => Ok(ActionPart::Skip),
        other => lower_operand(other),
    }
}

fn lower_operand(e: &ActionExpr) -> Result<ActionPart, String> {
    match e {
        ActionExpr::Word(w) if is_literal_word(w) => Ok(ActionPart::Literal(w.clone())),
        ActionExpr::Word(w) => Ok(ActionPart::Access(Access::new(w.clone()))),
        ActionExpr::Quoted(q) => Ok(ActionPart::Literal(q.clone())),
        ActionExpr::Call { name, args } => lower_call(name, args),
    }
}

fn expect_access(e: &ActionExpr, func: &str) -> Result<Access, String> {
    match e {
        ActionExpr::Word(w) if !is_literal_word(w) => Ok(Access::new(w.clone())),
        _ => Err(format!("{}: expected an attribute or node reference", func)),
    }
}

fn arity(name: &str, args: &[ActionExpr], expected: usize) -> Result<(), String> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(format!(
            "{} takes {} argument(s), got {}",
            name,
            expected,
            args.len()
        ))
    }
}

fn lower_call(name: &str, args: &[ActionExpr]) -> Result<ActionPart, String> {
    let part = match name {
        "copy" => {
            arity(name, args, 2)?;
            ActionPart::Copy {
                target: expect_access(&args[0], name)?,
                source: expect_access(&args[1], name)?,
            }
        }
        "negate" => {
            arity(name, args, 1)?;
            ActionPart::Negate(expect_access(&args[0], name)?)
        }
        "pushBack" => {
            arity(name, args, 2)?;
            ActionPart::PushBack {
                target: expect_access(&args[0], name)?,
                value: Box::new(lower_operand(&args[1])?),
            }
        }
        "new" => {
            arity(name, args, 1)?;
            ActionPart::ObjectMap {
                op: MapOp::New,
                target: expect_access(&args[0], name)?,
                key: None,
            }
        }
        "mapSet" | "get" | "delete" => {
            arity(name, args, 2)?;
            let op = match name {
                "mapSet" => MapOp::MapSet,
                "get" => MapOp::Get,
                _ => MapOp::Delete,
            };
            ActionPart::ObjectMap {
                op,
                target: expect_access(&args[0], name)?,
                key: Some(Box::new(lower_operand(&args[1])?)),
            }
        }
        "apply" => {
            arity(name, args, 1)?;
            if args[0] != ActionExpr::Word("$$".into()) {
                return Err("apply takes $$".into());
            }
            ActionPart::ObjectMap {
                op: MapOp::Apply,
                target: Access::new("$$"),
                key: None,
            }
        }
        "skip" => {
            arity(name, args, 0)?;
            ActionPart::Skip
        }
        "push" => {
            arity(name, args, 1)?;
            ActionPart::Push(expect_access(&args[0], name)?)
        }
        "print" => {
            arity(name, args, 1)?;
            ActionPart::Print(Box::new(lower_operand(&args[0])?))
        }
        _ => ActionPart::Call {
            function: name.to_owned(),
            args: args.iter().map(lower_operand).collect::<Result<_, _>>()?,
        },
    };
    Ok(part)
}
