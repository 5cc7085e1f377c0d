//! Grammar-source expression tree.
//!
//! Built once by the grammar parser and consumed by move during
//! compilation. No resolution is done here.

use crate::rules::Count;

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    /// Bare word.
    Word(String),
    /// Quoted literal.
    Quoted(String),
    /// `<path>`
    Ref(String),
    /// `{ a b c }`
    Sequence(Vec<Expr>),
    /// `{ a b | c d }`; every branch is a `Sequence`.
    Alternation(Vec<Expr>),
    /// `(keyword args... :label value ...)`
    Keyword(KeywordExpr),
    /// `x*`, `x+`, `x?`
    Recurrence(Box<Expr>, Count),
    /// `[ stmt; stmt ]`
    Actions(Vec<ActionStmt>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct KeywordExpr {
    pub keyword: String,
    pub args: Vec<Expr>,
    pub labels: Vec<Label>,
}

impl KeywordExpr {
    pub fn label(&self, name: &str) -> Option<&Label> {
        self.labels.iter().find(|l| l.name == name)
    }

    pub fn has_label(&self, name: &str) -> bool {
        self.label(name).is_some()
    }

    /// Text of a label whose value is a single word or quoted literal.
    pub fn label_text(&self, name: &str) -> Option<&str> {
        self.label(name)
            .and_then(|l| l.value.as_ref())
            .and_then(Expr::as_text)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Label {
    pub name: String,
    pub value: Option<Expr>,
}

impl Expr {
    pub fn new(kind: ExprKind, line: u32) -> Self {
        Expr { kind, line }
    }

    /// Word or quoted text.
    pub fn as_text(&self) -> Option<&str> {
        match &self.kind {
            ExprKind::Word(w) | ExprKind::Quoted(w) => Some(w),
            _ => None,
        }
    }

    pub fn as_keyword(&self) -> Option<&KeywordExpr> {
        match &self.kind {
            ExprKind::Keyword(k) => Some(k),
            _ => None,
        }
    }
}

/// One statement of an action block: `target = value` or `value`.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionStmt {
    pub target: Option<String>,
    pub value: ActionExpr,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ActionExpr {
    Word(String),
    Quoted(String),
    Call { name: String, args: Vec<ActionExpr> },
}
