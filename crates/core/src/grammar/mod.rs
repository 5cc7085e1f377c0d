//! Grammar-source reader: text -> expression tree.

pub mod expr;
pub mod lexer;
pub mod parser;

pub use expr::{ActionExpr, ActionStmt, Expr, ExprKind, KeywordExpr, Label};
pub use parser::parse_grammar;
