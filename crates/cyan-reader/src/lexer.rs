//! Hand-written tokenizer for the textual IR format (spec §0/§6.1). No
//! external lexer-generator crate is warranted for a format this small —
//! `cranelift-reader`'s own lexer is hand-rolled the same way.

use std::fmt;

#[derive(Clone, Debug, PartialEq)]
pub enum Tok {
    Ident(String),
    Num(i64),
    Str(String),
    Colon,
    Comma,
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    LAngle,
    RAngle,
    Equals,
    Dot,
    Arrow,
    Eof,
}

impl fmt::Display for Tok {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Tok::Ident(s) => write!(f, "`{}`", s),
            Tok::Num(n) => write!(f, "`{}`", n),
            Tok::Str(s) => write!(f, "{:?}", s),
            Tok::Colon => write!(f, "`:`"),
            Tok::Comma => write!(f, "`,`"),
            Tok::LParen => write!(f, "`(`"),
            Tok::RParen => write!(f, "`)`"),
            Tok::LBrace => write!(f, "`{{`"),
            Tok::RBrace => write!(f, "`}}`"),
            Tok::LBracket => write!(f, "`[`"),
            Tok::RBracket => write!(f, "`]`"),
            Tok::LAngle => write!(f, "`<`"),
            Tok::RAngle => write!(f, "`>`"),
            Tok::Equals => write!(f, "`=`"),
            Tok::Dot => write!(f, "`.`"),
            Tok::Arrow => write!(f, "`->`"),
            Tok::Eof => write!(f, "end of input"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub tok: Tok,
    pub line: u32,
    pub column: u32,
}

pub struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    line: u32,
    column: u32,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Lexer {
            chars: src.char_indices().peekable(),
            line: 1,
            column: 1,
        }
    }

    fn bump(&mut self) -> Option<char> {
        let (_, ch) = self.chars.next()?;
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(ch)
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().map(|&(_, c)| c)
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some('#') => {
                    while !matches!(self.peek(), Some('\n') | None) {
                        self.bump();
                    }
                }
                _ => break,
            }
        }
    }

    /// Tokenize the whole input. Lexical errors (an unterminated string, a
    /// stray character) are reported as `Err((message, line, column))`
    /// rather than panicking, so the parser can route them through
    /// `cyan_codegen::diagnostics::Diagnostics` like any other malformed
    /// input.
    pub fn tokenize(mut self) -> Result<Vec<Token>, (String, u32, u32)> {
        let mut out = Vec::new();
        loop {
            self.skip_trivia();
            let (line, column) = (self.line, self.column);
            let Some(c) = self.peek() else {
                out.push(Token { tok: Tok::Eof, line, column });
                break;
            };
            let tok = match c {
                ':' => { self.bump(); Tok::Colon }
                ',' => { self.bump(); Tok::Comma }
                '(' => { self.bump(); Tok::LParen }
                ')' => { self.bump(); Tok::RParen }
                '{' => { self.bump(); Tok::LBrace }
                '}' => { self.bump(); Tok::RBrace }
                '[' => { self.bump(); Tok::LBracket }
                ']' => { self.bump(); Tok::RBracket }
                '<' => { self.bump(); Tok::LAngle }
                '>' => { self.bump(); Tok::RAngle }
                '=' => { self.bump(); Tok::Equals }
                '.' => { self.bump(); Tok::Dot }
                '-' => {
                    self.bump();
                    if self.peek() == Some('>') {
                        self.bump();
                        Tok::Arrow
                    } else if matches!(self.peek(), Some(d) if d.is_ascii_digit()) {
                        let n = self.lex_number(true)?;
                        Tok::Num(n)
                    } else {
                        return Err(("expected `>` or a digit after `-`".to_string(), line, column));
                    }
                }
                d if d.is_ascii_digit() => Tok::Num(self.lex_number(false)?),
                '"' => Tok::Str(self.lex_string()?),
                c if c.is_alphabetic() || c == '_' => Tok::Ident(self.lex_ident()),
                other => return Err((format!("unexpected character `{}`", other), line, column)),
            };
            out.push(Token { tok, line, column });
        }
        Ok(out)
    }

    fn lex_number(&mut self, negative: bool) -> Result<i64, (String, u32, u32)> {
        let (line, column) = (self.line, self.column);
        let mut digits = String::new();
        while let Some(d) = self.peek() {
            if d.is_ascii_digit() {
                digits.push(d);
                self.bump();
            } else {
                break;
            }
        }
        let value: i64 = digits.parse().map_err(|_| ("integer literal out of range".to_string(), line, column))?;
        Ok(if negative { -value } else { value })
    }

    fn lex_ident(&mut self) -> String {
        let mut s = String::new();
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                s.push(c);
                self.bump();
            } else {
                break;
            }
        }
        s
    }

    fn lex_string(&mut self) -> Result<String, (String, u32, u32)> {
        let (line, column) = (self.line, self.column);
        self.bump(); // opening quote
        let mut s = String::new();
        loop {
            match self.bump() {
                None => return Err(("unterminated string literal".to_string(), line, column)),
                Some('"') => break,
                Some('\\') => match self.bump() {
                    Some('n') => s.push('\n'),
                    Some('t') => s.push('\t'),
                    Some('r') => s.push('\r'),
                    Some('\\') => s.push('\\'),
                    Some('"') => s.push('"'),
                    Some(other) => s.push(other),
                    None => return Err(("unterminated string literal".to_string(), line, column)),
                },
                Some(c) => s.push(c),
            }
        }
        Ok(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_a_simple_instruction_line() {
        let toks = Lexer::new("v3 = add.i64 v1, v2").tokenize().unwrap();
        let kinds: Vec<&Tok> = toks.iter().map(|t| &t.tok).collect();
        assert_eq!(
            kinds,
            vec![
                &Tok::Ident("v3".into()),
                &Tok::Equals,
                &Tok::Ident("add".into()),
                &Tok::Dot,
                &Tok::Ident("i64".into()),
                &Tok::Ident("v1".into()),
                &Tok::Comma,
                &Tok::Ident("v2".into()),
                &Tok::Eof,
            ]
        );
    }

    #[test]
    fn negative_immediates_lex_as_one_token() {
        let toks = Lexer::new("imm.i64 -7").tokenize().unwrap();
        assert!(toks.iter().any(|t| t.tok == Tok::Num(-7)));
    }

    #[test]
    fn comments_are_skipped() {
        let toks = Lexer::new("# a comment\nret").tokenize().unwrap();
        assert_eq!(toks[0].tok, Tok::Ident("ret".into()));
    }
}
