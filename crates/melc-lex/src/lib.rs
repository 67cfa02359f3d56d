//! melc-lex - Lexer
//!
//! Hand-written scanner over the source bytes. Produces the full token
//! stream in one pass, each token tagged with the line it starts on; the
//! parser indexes into that stream. Comments are `--` to end of line and
//! `(* ... *)`, which nests.

mod token;

pub use token::{Tok, Token};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LexError {
    #[error("line {line}: illegal character '{ch}'")]
    IllegalChar { ch: char, line: u32 },

    #[error("line {line}: unterminated string literal")]
    UnterminatedString { line: u32 },

    #[error("line {line}: unterminated character literal")]
    UnterminatedChar { line: u32 },

    #[error("line {line}: unterminated comment")]
    UnterminatedComment { line: u32 },

    #[error("line {line}: bad escape sequence")]
    BadEscape { line: u32 },

    #[error("line {line}: integer literal out of range")]
    IntOutOfRange { line: u32 },
}

/// Scan the whole input. The returned stream always ends with an `Eof` token
/// carrying the last line number.
pub fn scan(source: &str) -> Result<Vec<Tok>, LexError> {
    Lexer::new(source).run()
}

struct Lexer<'src> {
    bytes: &'src [u8],
    pos: usize,
    line: u32,
}

impl<'src> Lexer<'src> {
    fn new(source: &'src str) -> Self {
        Self {
            bytes: source.as_bytes(),
            pos: 0,
            line: 1,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn peek2(&self) -> Option<u8> {
        self.bytes.get(self.pos + 1).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        if b == b'\n' {
            self.line += 1;
        }
        Some(b)
    }

    fn run(mut self) -> Result<Vec<Tok>, LexError> {
        let mut toks = Vec::new();
        loop {
            self.skip_trivia()?;
            let line = self.line;
            let Some(b) = self.peek() else {
                toks.push(Tok {
                    kind: Token::Eof,
                    line,
                });
                return Ok(toks);
            };
            let kind = match b {
                b'0'..=b'9' => self.number(line)?,
                b'a'..=b'z' | b'_' => self.word(false),
                b'A'..=b'Z' => self.word(true),
                b'\'' => self.char_literal(line)?,
                b'"' => self.string_literal(line)?,
                _ => self.symbol(line)?,
            };
            toks.push(Tok { kind, line });
        }
    }

    fn skip_trivia(&mut self) -> Result<(), LexError> {
        loop {
            match self.peek() {
                Some(b' ' | b'\t' | b'\r' | b'\n') => {
                    self.bump();
                }
                Some(b'-') if self.peek2() == Some(b'-') => {
                    while let Some(b) = self.peek() {
                        if b == b'\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                Some(b'(') if self.peek2() == Some(b'*') => {
                    let open_line = self.line;
                    self.bump();
                    self.bump();
                    let mut depth = 1usize;
                    loop {
                        match (self.peek(), self.peek2()) {
                            (Some(b'*'), Some(b')')) => {
                                self.bump();
                                self.bump();
                                depth -= 1;
                                if depth == 0 {
                                    break;
                                }
                            }
                            (Some(b'('), Some(b'*')) => {
                                self.bump();
                                self.bump();
                                depth += 1;
                            }
                            (Some(_), _) => {
                                self.bump();
                            }
                            (None, _) => {
                                return Err(LexError::UnterminatedComment { line: open_line })
                            }
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn number(&mut self, line: u32) -> Result<Token, LexError> {
        let start = self.pos;
        while matches!(self.peek(), Some(b'0'..=b'9')) {
            self.bump();
        }
        let is_float = self.peek() == Some(b'.') && matches!(self.peek2(), Some(b'0'..=b'9'));
        if is_float {
            self.bump();
            while matches!(self.peek(), Some(b'0'..=b'9')) {
                self.bump();
            }
            if matches!(self.peek(), Some(b'e' | b'E')) {
                self.bump();
                if matches!(self.peek(), Some(b'+' | b'-')) {
                    self.bump();
                }
                while matches!(self.peek(), Some(b'0'..=b'9')) {
                    self.bump();
                }
            }
            let text = std::str::from_utf8(&self.bytes[start..self.pos]).unwrap_or("");
            let v: f64 = text.parse().map_err(|_| LexError::IntOutOfRange { line })?;
            Ok(Token::Float(v))
        } else {
            let text = std::str::from_utf8(&self.bytes[start..self.pos]).unwrap_or("");
            let n: i32 = text.parse().map_err(|_| LexError::IntOutOfRange { line })?;
            Ok(Token::Int(n))
        }
    }

    fn word(&mut self, capital: bool) -> Token {
        let start = self.pos;
        while matches!(
            self.peek(),
            Some(b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'_')
        ) {
            self.bump();
        }
        let text = std::str::from_utf8(&self.bytes[start..self.pos])
            .unwrap_or("")
            .to_string();
        if capital {
            Token::CapIdent(text)
        } else {
            Token::keyword(&text).unwrap_or(Token::Ident(text))
        }
    }

    fn escape(&mut self, line: u32) -> Result<u8, LexError> {
        // caller consumed the backslash
        let Some(b) = self.bump() else {
            return Err(LexError::BadEscape { line });
        };
        Ok(match b {
            b'n' => b'\n',
            b't' => b'\t',
            b'r' => b'\r',
            b'0' => 0,
            b'\\' => b'\\',
            b'\'' => b'\'',
            b'"' => b'"',
            b'x' => {
                let hi = self.bump().ok_or(LexError::BadEscape { line })?;
                let lo = self.bump().ok_or(LexError::BadEscape { line })?;
                let hex = |d: u8| -> Result<u8, LexError> {
                    (d as char)
                        .to_digit(16)
                        .map(|v| v as u8)
                        .ok_or(LexError::BadEscape { line })
                };
                hex(hi)? * 16 + hex(lo)?
            }
            _ => return Err(LexError::BadEscape { line }),
        })
    }

    fn char_literal(&mut self, line: u32) -> Result<Token, LexError> {
        self.bump(); // opening quote
        let c = match self.bump() {
            Some(b'\\') => self.escape(line)?,
            Some(b'\'') | Some(b'\n') | None => {
                return Err(LexError::UnterminatedChar { line })
            }
            Some(b) => b,
        };
        match self.bump() {
            Some(b'\'') => Ok(Token::Char(c)),
            _ => Err(LexError::UnterminatedChar { line }),
        }
    }

    fn string_literal(&mut self, line: u32) -> Result<Token, LexError> {
        self.bump(); // opening quote
        let mut s = Vec::new();
        loop {
            match self.bump() {
                Some(b'"') => break,
                Some(b'\\') => s.push(self.escape(line)?),
                Some(b'\n') | None => return Err(LexError::UnterminatedString { line }),
                Some(b) => s.push(b),
            }
        }
        Ok(Token::Str(String::from_utf8_lossy(&s).into_owned()))
    }

    fn symbol(&mut self, line: u32) -> Result<Token, LexError> {
        let b = self.bump().unwrap_or(0);
        let two = |lexer: &mut Self, next: u8, yes: Token, no: Token| {
            if lexer.peek() == Some(next) {
                lexer.bump();
                yes
            } else {
                no
            }
        };
        Ok(match b {
            b'+' => two(self, b'.', Token::PlusDot, Token::Plus),
            b'-' => {
                if self.peek() == Some(b'.') {
                    self.bump();
                    Token::MinusDot
                } else if self.peek() == Some(b'>') {
                    self.bump();
                    Token::Arrow
                } else {
                    Token::Minus
                }
            }
            b'*' => {
                if self.peek() == Some(b'.') {
                    self.bump();
                    Token::StarDot
                } else if self.peek() == Some(b'*') {
                    self.bump();
                    Token::StarStar
                } else {
                    Token::Star
                }
            }
            b'/' => two(self, b'.', Token::SlashDot, Token::Slash),
            b'!' => two(self, b'=', Token::BangEq, Token::Bang),
            b';' => Token::Semicolon,
            b'(' => Token::LParen,
            b')' => Token::RParen,
            b'[' => Token::LBracket,
            b']' => Token::RBracket,
            b',' => Token::Comma,
            b':' => two(self, b'=', Token::Assign, Token::Colon),
            b'=' => two(self, b'=', Token::EqEq, Token::Eq),
            b'<' => {
                if self.peek() == Some(b'>') {
                    self.bump();
                    Token::Neq
                } else if self.peek() == Some(b'=') {
                    self.bump();
                    Token::Leq
                } else {
                    Token::Lt
                }
            }
            b'>' => two(self, b'=', Token::Geq, Token::Gt),
            b'&' => {
                if self.peek() == Some(b'&') {
                    self.bump();
                    Token::AmpAmp
                } else {
                    return Err(LexError::IllegalChar { ch: '&', line });
                }
            }
            b'|' => two(self, b'|', Token::BarBar, Token::Bar),
            other => {
                return Err(LexError::IllegalChar {
                    ch: other as char,
                    line,
                })
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<Token> {
        scan(src).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn scans_definition() {
        assert_eq!(
            kinds("let id x = x"),
            vec![
                Token::Let,
                Token::Ident("id".into()),
                Token::Ident("x".into()),
                Token::Eq,
                Token::Ident("x".into()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn distinguishes_int_and_float_operators() {
        assert_eq!(
            kinds("1 + 2 +. 3.5 ** 2.0"),
            vec![
                Token::Int(1),
                Token::Plus,
                Token::Int(2),
                Token::PlusDot,
                Token::Float(3.5),
                Token::StarStar,
                Token::Float(2.0),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn distinguishes_equality_operators() {
        assert_eq!(
            kinds("= <> == != := <="),
            vec![
                Token::Eq,
                Token::Neq,
                Token::EqEq,
                Token::BangEq,
                Token::Assign,
                Token::Leq,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn capitalized_names_are_constructor_tokens() {
        assert_eq!(
            kinds("Pair 3 5"),
            vec![
                Token::CapIdent("Pair".into()),
                Token::Int(3),
                Token::Int(5),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn tracks_lines_through_comments() {
        let toks = scan("let a = 1\n-- comment\n(* block\n comment *) let b = 2").unwrap();
        let b_tok = toks.iter().find(|t| t.kind == Token::Ident("b".into())).unwrap();
        assert_eq!(b_tok.line, 4);
    }

    #[test]
    fn nested_block_comments() {
        assert_eq!(kinds("(* a (* b *) c *) 1"), vec![Token::Int(1), Token::Eof]);
    }

    #[test]
    fn char_and_string_escapes() {
        assert_eq!(
            kinds("'\\n' \"a\\x41b\""),
            vec![Token::Char(b'\n'), Token::Str("aAb".into()), Token::Eof]
        );
    }

    #[test]
    fn unterminated_string_is_an_error() {
        assert!(matches!(
            scan("\"abc"),
            Err(LexError::UnterminatedString { .. })
        ));
    }
}
