use std::{fmt, iter::Fuse};

use tracing::trace;

#[derive(Debug, PartialEq, Clone)]
pub enum Token {
    Eof,
    Func,
    Extern,
    Ident(String),
    Number(f64),
    /// any other single character: operators, parentheses, delimiters
    Char(char),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Eof => write!(f, "end of input"),
            Token::Func => write!(f, "'func'"),
            Token::Extern => write!(f, "'extern'"),
            Token::Ident(name) => write!(f, "identifier '{}'", name),
            Token::Number(value) => write!(f, "number {}", value),
            Token::Char(c) => write!(f, "'{}'", c),
        }
    }
}

const COMMENT: char = '#';

/// Streaming lexer with a single character of lookahead.
///
/// `last_char` is `None` once the input is exhausted, which is also the
/// only way `Token::Eof` is produced.
pub struct Lexer<I: Iterator<Item = char>> {
    input: Fuse<I>,
    last_char: Option<char>,
}

impl<I: Iterator<Item = char>> Lexer<I> {
    pub fn new(input: I) -> Self {
        Lexer {
            input: input.fuse(),
            last_char: Some(' '),
        }
    }

    fn advance(&mut self) -> Option<char> {
        self.last_char = self.input.next();
        self.last_char
    }

    pub fn next_token(&mut self) -> Token {
        let token = self.scan();
        trace!(%token, "lexed");
        token
    }

    fn scan(&mut self) -> Token {
        loop {
            while matches!(self.last_char, Some(c) if c.is_whitespace()) {
                self.advance();
            }

            let current = match self.last_char {
                Some(c) => c,
                None => return Token::Eof,
            };

            if current.is_ascii_alphabetic() {
                let mut ident = current.to_string();
                while let Some(c) = self.advance().filter(|c| c.is_ascii_alphanumeric()) {
                    ident.push(c);
                }

                return match ident.as_str() {
                    "func" => Token::Func,
                    "extern" => Token::Extern,
                    _ => Token::Ident(ident),
                };
            }

            if is_numeric(current) {
                let mut text = current.to_string();
                while let Some(c) = self.advance().filter(|&c| is_numeric(c)) {
                    text.push(c);
                }

                return Token::Number(parse_number(&text));
            }

            if current == COMMENT {
                while let Some(c) = self.advance() {
                    if c == '\n' || c == '\r' {
                        break;
                    }
                }
                // an unterminated comment runs into end of input and the
                // next iteration yields Eof
                continue;
            }

            self.advance();
            return Token::Char(current);
        }
    }
}

/// Yields every token up to, but not including, `Token::Eof`.
impl<I: Iterator<Item = char>> Iterator for Lexer<I> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        match self.next_token() {
            Token::Eof => None,
            token => Some(token),
        }
    }
}

fn is_numeric(c: char) -> bool {
    c.is_ascii_digit() || c == '.'
}

/// Parses the longest well-formed prefix of `text`, so `1.2.3` reads as
/// `1.2` and a lone `.` reads as `0`.
fn parse_number(text: &str) -> f64 {
    (1..=text.len())
        .rev()
        .find_map(|end| text[..end].parse().ok())
        .unwrap_or(0.0)
}
