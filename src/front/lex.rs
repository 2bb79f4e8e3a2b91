//! The scanner: turns source text into a stream of [`Token`]s.
//!
//! Modeled on the teacher's `front::lex::Lexer` (a regex-driven matcher
//! table plus a whitespace-skipping prefix match), extended with the line
//! tracking and single-token pushback the compiler driver needs.

use derive_more::Display;
use regex::Regex;

use crate::common::Error;

/// Token classes. `Logic` carries `true`/`false`; `Nil` carries the `nil`
/// keyword; `Number`/`String`/`Identifier` carry their lexeme in
/// [`Token::text`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Display)]
pub enum TokenKind {
    #[display("identifier")]
    Identifier,
    #[display("number")]
    Number,
    #[display("string")]
    String,
    #[display("logic")]
    Logic,
    #[display("nil")]
    Nil,
    #[display("if")]
    If,
    #[display("else")]
    Else,
    #[display("end")]
    End,
    #[display("while")]
    While,
    #[display("function")]
    Function,
    #[display("return")]
    Return,
    #[display("=")]
    Assign,
    #[display(",")]
    Comma,
    #[display(":")]
    Colon,
    #[display("(")]
    BracketLeft,
    #[display(")")]
    BracketRight,
    #[display("[")]
    SquareBracketLeft,
    #[display("]")]
    SquareBracketRight,
    #[display("+")]
    Plus,
    #[display("-")]
    Minus,
    #[display("*")]
    Star,
    #[display("/")]
    Slash,
    #[display("^")]
    Caret,
    #[display("<")]
    Lt,
    #[display(">")]
    Gt,
    #[display("==")]
    EqEq,
    #[display("<=")]
    Leq,
    #[display(">=")]
    Geq,
    #[display("!=")]
    Neq,
    #[display("eol")]
    Eol,
    #[display("eof")]
    Eof,
}

/// A single lexed token, borrowing its lexeme from the source text.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Display)]
#[display("{kind} '{text}' (line {line})")]
pub struct Token<'src> {
    pub kind: TokenKind,
    pub text: &'src str,
    pub line: u32,
}

impl<'src> Token<'src> {
    /// Parses a `Number` token's lexeme.
    pub fn as_number(&self) -> f64 {
        debug_assert_eq!(self.kind, TokenKind::Number);
        self.text.parse().unwrap_or(f64::NAN)
    }

    /// Unquotes and unescapes a `String` token's lexeme.
    pub fn as_string(&self) -> String {
        debug_assert_eq!(self.kind, TokenKind::String);
        let inner = &self.text[1..self.text.len() - 1];
        let mut out = String::with_capacity(inner.len());
        let mut chars = inner.chars();
        while let Some(c) = chars.next() {
            if c == '\\' {
                match chars.next() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('"') => out.push('"'),
                    Some('\\') => out.push('\\'),
                    Some(other) => out.push(other),
                    None => {}
                }
            } else {
                out.push(c);
            }
        }
        out
    }

    /// Parses a `Logic` token's lexeme (`true`/`false`).
    pub fn as_bool(&self) -> bool {
        debug_assert_eq!(self.kind, TokenKind::Logic);
        self.text == "true"
    }
}

/// The scanner. Produces tokens on demand; supports a single level of
/// pushback so the compiler can peek one token ahead without a separate
/// buffer of its own.
pub struct Lexer<'src> {
    input: &'src str,
    pos: usize,
    line: u32,
    whitespace: Regex,
    matchers: Vec<(Regex, TokenKind)>,
    pushed_back: Option<Token<'src>>,
}

const KEYWORDS: &[(&str, TokenKind)] = &[
    ("if", TokenKind::If),
    ("else", TokenKind::Else),
    ("end", TokenKind::End),
    ("while", TokenKind::While),
    ("function", TokenKind::Function),
    ("return", TokenKind::Return),
    ("nil", TokenKind::Nil),
    ("true", TokenKind::Logic),
    ("false", TokenKind::Logic),
];

impl<'src> Lexer<'src> {
    pub fn new(input: &'src str) -> Self {
        // Order matters: longer lexemes must be tried before shorter
        // prefixes of themselves (`:=` before `:`, `==` before nothing
        // shorter since there is no bare `=`).
        let matchers = vec![
            (Regex::new(r"\A[0-9]+(?:\.[0-9]+)?").unwrap(), TokenKind::Number),
            (Regex::new(r#"\A"(?:[^"\\]|\\.)*""#).unwrap(), TokenKind::String),
            (Regex::new(r"\A[A-Za-z_][A-Za-z0-9_]*").unwrap(), TokenKind::Identifier),
            (Regex::new(r"\A==").unwrap(), TokenKind::EqEq),
            (Regex::new(r"\A<=").unwrap(), TokenKind::Leq),
            (Regex::new(r"\A>=").unwrap(), TokenKind::Geq),
            (Regex::new(r"\A!=").unwrap(), TokenKind::Neq),
            (Regex::new(r"\A=").unwrap(), TokenKind::Assign),
            (Regex::new(r"\A,").unwrap(), TokenKind::Comma),
            (Regex::new(r"\A:").unwrap(), TokenKind::Colon),
            (Regex::new(r"\A\(").unwrap(), TokenKind::BracketLeft),
            (Regex::new(r"\A\)").unwrap(), TokenKind::BracketRight),
            (Regex::new(r"\A\[").unwrap(), TokenKind::SquareBracketLeft),
            (Regex::new(r"\A\]").unwrap(), TokenKind::SquareBracketRight),
            (Regex::new(r"\A\+").unwrap(), TokenKind::Plus),
            (Regex::new(r"\A-").unwrap(), TokenKind::Minus),
            (Regex::new(r"\A\*").unwrap(), TokenKind::Star),
            (Regex::new(r"\A/").unwrap(), TokenKind::Slash),
            (Regex::new(r"\A\^").unwrap(), TokenKind::Caret),
            (Regex::new(r"\A<").unwrap(), TokenKind::Lt),
            (Regex::new(r"\A>").unwrap(), TokenKind::Gt),
            (Regex::new(r"\A\n").unwrap(), TokenKind::Eol),
        ];
        Lexer {
            input,
            pos: 0,
            line: 1,
            whitespace: Regex::new(r"\A(?:[ \t\r]|//[^\n]*)*").unwrap(),
            matchers,
            pushed_back: None,
        }
    }

    pub fn line(&self) -> u32 {
        self.line
    }

    fn skip_whitespace(&mut self) {
        if let Some(m) = self.whitespace.find(&self.input[self.pos..]) {
            self.pos += m.end();
        }
    }

    /// Pushes a single token back, to be returned by the next call to
    /// [`Lexer::next`]. At most one token of lookahead is supported.
    pub fn return_token(&mut self, token: Token<'src>) {
        debug_assert!(self.pushed_back.is_none(), "only one token of pushback is supported");
        self.pushed_back = Some(token);
    }

    /// Produces the next token, or a lexical error on unrecognized input.
    pub fn next(&mut self) -> Result<Token<'src>, Error> {
        if let Some(tok) = self.pushed_back.take() {
            return Ok(tok);
        }

        self.skip_whitespace();

        if self.pos >= self.input.len() {
            return Ok(Token { kind: TokenKind::Eof, text: "", line: self.line });
        }

        let rest = &self.input[self.pos..];
        for (re, kind) in &self.matchers {
            if let Some(m) = re.find(rest) {
                let text = &rest[..m.end()];
                let kind = if *kind == TokenKind::Identifier {
                    KEYWORDS
                        .iter()
                        .find(|(kw, _)| *kw == text)
                        .map(|(_, k)| *k)
                        .unwrap_or(TokenKind::Identifier)
                } else {
                    *kind
                };
                let line = self.line;
                self.pos += m.end();
                if kind == TokenKind::Eol {
                    self.line += 1;
                }
                return Ok(Token { kind, text, line });
            }
        }

        let bad = rest.chars().next().unwrap();
        Err(Error::Lexical {
            line: self.line,
            message: format!("unexpected character {bad:?}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        let mut lexer = Lexer::new(src);
        let mut out = vec![];
        loop {
            let tok = lexer.next().unwrap();
            if tok.kind == TokenKind::Eof {
                break;
            }
            out.push(tok.kind);
        }
        out
    }

    #[test]
    fn lexes_assignment() {
        assert_eq!(
            kinds("a = 1 + 2"),
            vec![TokenKind::Identifier, TokenKind::Assign, TokenKind::Number, TokenKind::Plus, TokenKind::Number]
        );
    }

    #[test]
    fn eq_eq_is_not_split_into_two_assigns() {
        assert_eq!(kinds("a == b"), vec![TokenKind::Identifier, TokenKind::EqEq, TokenKind::Identifier]);
    }

    #[test]
    fn keywords_win_over_identifiers() {
        assert_eq!(kinds("if end while function return"), vec![
            TokenKind::If,
            TokenKind::End,
            TokenKind::While,
            TokenKind::Function,
            TokenKind::Return,
        ]);
    }

    #[test]
    fn string_literal_unescapes() {
        let mut lexer = Lexer::new(r#""a\nb""#);
        let tok = lexer.next().unwrap();
        assert_eq!(tok.kind, TokenKind::String);
        assert_eq!(tok.as_string(), "a\nb");
    }

    #[test]
    fn tracks_line_numbers() {
        let mut lexer = Lexer::new("a\nb");
        let a = lexer.next().unwrap();
        let _eol = lexer.next().unwrap();
        let b = lexer.next().unwrap();
        assert_eq!(a.line, 1);
        assert_eq!(b.line, 2);
    }

    #[test]
    fn pushback_replays_token() {
        let mut lexer = Lexer::new("a b");
        let a = lexer.next().unwrap();
        lexer.return_token(a);
        let replayed = lexer.next().unwrap();
        assert_eq!(replayed.text, "a");
        let b = lexer.next().unwrap();
        assert_eq!(b.text, "b");
    }

    #[test]
    fn rejects_unknown_character() {
        let mut lexer = Lexer::new("a @ b");
        lexer.next().unwrap();
        assert!(lexer.next().is_err());
    }
}
