use crate::error::DefinitionError;
use crate::rules::Count;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Bare run of non-delimiter characters
    Word(String),
    /// Quoted literal (content without quotes, escapes resolved)
    Quoted(String),
    /// `<...>` reference, verbatim text inside the brackets
    Ref(String),
    /// `:label`
    Label(String),
    /// `*`, `+` or `?` directly after a closer
    Repeat(Count),
    // Punctuation
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Pipe,
    Semi,
    Comma,
    Eq,
    // End of input
    Eof,
}

#[derive(Debug, Clone)]
pub struct Spanned {
    pub token: Token,
    pub line: u32,
}

fn is_delimiter(c: char) -> bool {
    c.is_whitespace() || matches!(c, '(' | ')' | '{' | '}' | '[' | ']' | '|' | ';' | ',' | '=' | '<' | '"' | '#')
}

pub fn lex(src: &str) -> Result<Vec<Spanned>, DefinitionError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = src.chars().collect();
    let mut pos = 0usize;
    let mut line: u32 = 1;
    // True right after `>`, `}`, `)` or a closing quote.
    let mut after_closer = false;

    while pos < chars.len() {
        let c = chars[pos];

        if after_closer {
            let count = match c {
                '*' => Some(Count::ZeroOrMore),
                '+' => Some(Count::OneOrMore),
                '?' => Some(Count::ZeroOrOne),
                _ => None,
            };
            after_closer = false;
            if let Some(count) = count {
                tokens.push(Spanned {
                    token: Token::Repeat(count),
                    line,
                });
                pos += 1;
                continue;
            }
        }

        // Comment
        if c == '#' {
            while pos < chars.len() && chars[pos] != '\n' {
                pos += 1;
            }
            continue;
        }

        // Whitespace
        if c.is_whitespace() {
            if c == '\n' {
                line += 1;
            }
            pos += 1;
            continue;
        }

        let tok_line = line;

        // Quoted literal
        if c == '"' {
            pos += 1;
            let mut s = String::new();
            loop {
                if pos >= chars.len() {
                    return Err(DefinitionError::syntax(tok_line, "unterminated quoted literal"));
                }
                let sc = chars[pos];
                if sc == '"' {
                    pos += 1;
                    break;
                }
                if sc == '\\' && pos + 1 < chars.len() {
                    pos += 1;
                    match chars[pos] {
                        '"' => s.push('"'),
                        '\\' => s.push('\\'),
                        'n' => s.push('\n'),
                        't' => s.push('\t'),
                        other => {
                            s.push('\\');
                            s.push(other);
                        }
                    }
                    pos += 1;
                    continue;
                }
                if sc == '\n' {
                    line += 1;
                }
                s.push(sc);
                pos += 1;
            }
            tokens.push(Spanned {
                token: Token::Quoted(s),
                line: tok_line,
            });
            after_closer = true;
            continue;
        }

        // Reference
        if c == '<' {
            pos += 1;
            let start = pos;
            while pos < chars.len() && chars[pos] != '>' {
                if chars[pos] == '\n' {
                    return Err(DefinitionError::syntax(tok_line, "unterminated reference"));
                }
                pos += 1;
            }
            if pos >= chars.len() {
                return Err(DefinitionError::syntax(tok_line, "unterminated reference"));
            }
            let text: String = chars[start..pos].iter().collect();
            pos += 1;
            if text.trim().is_empty() {
                return Err(DefinitionError::syntax(tok_line, "empty reference '<>'"));
            }
            tokens.push(Spanned {
                token: Token::Ref(text.trim().to_owned()),
                line: tok_line,
            });
            after_closer = true;
            continue;
        }

        let punct = match c {
            '(' => Some(Token::LParen),
            ')' => Some(Token::RParen),
            '{' => Some(Token::LBrace),
            '}' => Some(Token::RBrace),
            '[' => Some(Token::LBracket),
            ']' => Some(Token::RBracket),
            '|' => Some(Token::Pipe),
            ';' => Some(Token::Semi),
            ',' => Some(Token::Comma),
            '=' => Some(Token::Eq),
            _ => None,
        };
        if let Some(token) = punct {
            after_closer = matches!(token, Token::RParen | Token::RBrace);
            tokens.push(Spanned {
                token,
                line: tok_line,
            });
            pos += 1;
            continue;
        }

        // Label or bare word
        let is_label = c == ':' && pos + 1 < chars.len() && !is_delimiter(chars[pos + 1]);
        let start = if is_label { pos + 1 } else { pos };
        pos = start;
        while pos < chars.len() && !is_delimiter(chars[pos]) {
            pos += 1;
        }
        let word: String = chars[start..pos].iter().collect();
        tokens.push(Spanned {
            token: if is_label {
                Token::Label(word)
            } else {
                Token::Word(word)
            },
            line: tok_line,
        });
    }

    tokens.push(Spanned {
        token: Token::Eof,
        line,
    });
    Ok(tokens)
}

// ── Tests ────────────────────────────────────────────────────────────
