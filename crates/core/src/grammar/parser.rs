//! Grammar-source parser: tokens -> expression tree.
//!
//! Syntax errors are collected; the parser resynchronizes at the next
//! declaration so one bad declaration does not hide the rest.

use super::expr::{ActionExpr, ActionStmt, Expr, ExprKind, KeywordExpr, Label};
use super::lexer::{lex, Spanned, Token};
use crate::error::DefinitionError;

/// Default maximum number of syntax errors collected before giving up.
pub const DEFAULT_MAX_ERRORS: usize = 50;

/// Keywords that start a declaration; recovery resumes at these.
const DECLARATION_KEYWORDS: &[&str] = &[
    "rule",
    "struct",
    "value",
    "enumeration",
    "function",
    "symbol",
    "grammar-version",
];

// ──────────────────────────────────────────────
// Parser
// ──────────────────────────────────────────────

struct Parser<'a> {
    tokens: &'a [Spanned],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Spanned]) -> Self {
        Parser { tokens, pos: 0 }
    }

    fn cur(&self) -> &Spanned {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek(&self) -> &Token {
        &self.cur().token
    }

    fn peek_at(&self, offset: usize) -> &Token {
        let i = (self.pos + offset).min(self.tokens.len() - 1);
        &self.tokens[i].token
    }

    fn cur_line(&self) -> u32 {
        self.cur().line
    }

    fn advance(&mut self) -> &Spanned {
        let t = &self.tokens[self.pos.min(self.tokens.len() - 1)];
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        t
    }

    fn err(&self, msg: impl Into<String>) -> DefinitionError {
        DefinitionError::syntax(self.cur_line(), msg)
    }

    fn expect(&mut self, expected: Token, what: &str) -> Result<(), DefinitionError> {
        if self.peek() == &expected {
            self.advance();
            Ok(())
        } else {
            Err(self.err(format!("expected {}, got {:?}", what, self.peek())))
        }
    }

    // -- Top level ---------------------------------------------

    fn parse_recovering(&mut self, max_errors: usize) -> (Vec<Expr>, Vec<DefinitionError>) {
        let mut exprs = Vec::new();
        let mut errors = Vec::new();
        while self.peek() != &Token::Eof {
            if errors.len() >= max_errors {
                break;
            }
            if self.peek() != &Token::LParen {
                errors.push(self.err(format!(
                    "expected '(' at top level, got {:?}",
                    self.peek()
                )));
                self.skip_to_top_level_paren();
                continue;
            }
            let start = self.pos;
            match self.parse_element() {
                Ok(e) => exprs.push(e),
                Err(e) => {
                    errors.push(e);
                    self.recover_to_next_construct(start);
                }
            }
        }
        (exprs, errors)
    }

    fn skip_to_top_level_paren(&mut self) {
        while !matches!(self.peek(), Token::LParen | Token::Eof) {
            self.advance();
        }
    }

    /// Skip forward from the failure point to the next `(` that opens a
    /// declaration. Always makes progress.
    fn recover_to_next_construct(&mut self, start: usize) {
        if self.pos <= start {
            self.pos = start;
            self.advance();
        }
        loop {
            match (self.peek(), self.peek_at(1)) {
                (Token::Eof, _) => return,
                (Token::LParen, Token::Word(w)) if DECLARATION_KEYWORDS.contains(&w.as_str()) => {
                    return
                }
                _ => {
                    self.advance();
                }
            }
        }
    }

    // -- Rule expressions ---------------------------------------

    fn parse_element(&mut self) -> Result<Expr, DefinitionError> {
        let line = self.cur_line();
        let mut expr = match self.peek().clone() {
            Token::Word(w) => {
                self.advance();
                Expr::new(ExprKind::Word(w), line)
            }
            Token::Quoted(q) => {
                self.advance();
                Expr::new(ExprKind::Quoted(q), line)
            }
            Token::Ref(r) => {
                self.advance();
                Expr::new(ExprKind::Ref(r), line)
            }
            Token::LBrace => self.parse_braces()?,
            Token::LParen => self.parse_keyword()?,
            Token::LBracket => self.parse_actions()?,
            other => return Err(self.err(format!("unexpected {:?}", other))),
        };
        while let Token::Repeat(count) = self.peek().clone() {
            self.advance();
            expr = Expr::new(ExprKind::Recurrence(Box::new(expr), count), line);
        }
        Ok(expr)
    }

    fn parse_braces(&mut self) -> Result<Expr, DefinitionError> {
        let line = self.cur_line();
        self.expect(Token::LBrace, "'{'")?;
        let mut branches: Vec<(u32, Vec<Expr>)> = vec![(line, Vec::new())];
        loop {
            match self.peek() {
                Token::RBrace => {
                    self.advance();
                    break;
                }
                Token::Pipe => {
                    let l = self.cur_line();
                    self.advance();
                    branches.push((l, Vec::new()));
                }
                Token::Eof => return Err(self.err("unclosed '{'")),
                _ => {
                    let e = self.parse_element()?;
                    if let Some((_, items)) = branches.last_mut() {
                        items.push(e);
                    }
                }
            }
        }
        if branches.len() == 1 {
            let (_, items) = branches.remove(0);
            return Ok(Expr::new(ExprKind::Sequence(items), line));
        }
        let seqs = branches
            .into_iter()
            .map(|(l, items)| Expr::new(ExprKind::Sequence(items), l))
            .collect();
        Ok(Expr::new(ExprKind::Alternation(seqs), line))
    }

    fn parse_keyword(&mut self) -> Result<Expr, DefinitionError> {
        let line = self.cur_line();
        self.expect(Token::LParen, "'('")?;
        let keyword = match self.peek().clone() {
            Token::Word(w) => {
                self.advance();
                w
            }
            other => {
                return Err(self.err(format!("expected keyword after '(', got {:?}", other)))
            }
        };
        let mut args = Vec::new();
        let mut labels = Vec::new();
        loop {
            match self.peek().clone() {
                Token::RParen => {
                    self.advance();
                    break;
                }
                Token::Eof => return Err(self.err(format!("unclosed '({}'", keyword))),
                Token::Label(name) => {
                    self.advance();
                    let value = match self.peek() {
                        Token::RParen | Token::Label(_) => None,
                        _ => Some(self.parse_element()?),
                    };
                    labels.push(Label { name, value });
                }
                _ => args.push(self.parse_element()?),
            }
        }
        Ok(Expr::new(
            ExprKind::Keyword(KeywordExpr {
                keyword,
                args,
                labels,
            }),
            line,
        ))
    }

    // -- Action blocks ------------------------------------------

    fn parse_actions(&mut self) -> Result<Expr, DefinitionError> {
        let line = self.cur_line();
        self.expect(Token::LBracket, "'['")?;
        let mut stmts = Vec::new();
        loop {
            match self.peek() {
                Token::RBracket => {
                    self.advance();
                    break;
                }
                Token::Semi => {
                    self.advance();
                }
                Token::Eof => return Err(self.err("unclosed '['")),
                _ => {
                    stmts.push(self.parse_statement()?);
                    match self.peek() {
                        Token::Semi | Token::RBracket => {}
                        other => {
                            return Err(self.err(format!(
                                "expected ';' or ']' after action, got {:?}",
                                other
                            )))
                        }
                    }
                }
            }
        }
        Ok(Expr::new(ExprKind::Actions(stmts), line))
    }

    fn parse_statement(&mut self) -> Result<ActionStmt, DefinitionError> {
        let line = self.cur_line();
        let target = match (self.peek().clone(), self.peek_at(1)) {
            (Token::Word(w), Token::Eq) => {
                self.advance();
                self.advance();
                Some(w)
            }
            _ => None,
        };
        let value = self.parse_action_expr()?;
        Ok(ActionStmt {
            target,
            value,
            line,
        })
    }

    fn parse_action_expr(&mut self) -> Result<ActionExpr, DefinitionError> {
        match self.peek().clone() {
            Token::Word(w) => {
                self.advance();
                if self.peek() != &Token::LParen {
                    return Ok(ActionExpr::Word(w));
                }
                self.advance();
                let mut args = Vec::new();
                if self.peek() == &Token::RParen {
                    self.advance();
                    return Ok(ActionExpr::Call { name: w, args });
                }
                loop {
                    args.push(self.parse_action_expr()?);
                    match self.peek() {
                        Token::Comma => {
                            self.advance();
                        }
                        Token::RParen => {
                            self.advance();
                            break;
                        }
                        other => {
                            return Err(self.err(format!(
                                "expected ',' or ')' in call to '{}', got {:?}",
                                w, other
                            )))
                        }
                    }
                }
                Ok(ActionExpr::Call { name: w, args })
            }
            Token::Quoted(q) => {
                self.advance();
                Ok(ActionExpr::Quoted(q))
            }
            other => Err(self.err(format!("expected action operand, got {:?}", other))),
        }
    }
}

/// Parse grammar source text, collecting syntax errors.
pub fn parse_grammar(src: &str) -> (Vec<Expr>, Vec<DefinitionError>) {
    match lex(src) {
        Ok(tokens) => Parser::new(&tokens).parse_recovering(DEFAULT_MAX_ERRORS),
        Err(e) => (Vec::new(), vec![e]),
    }
}

// ── Tests ────────────────────────────────────────────────────────────
