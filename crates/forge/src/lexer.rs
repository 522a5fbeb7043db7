//! Tokenizer for C constant expressions and macro bodies.

use std::fmt;

use logos::{Lexer, Logos};

use crate::ConstantEvalError;

#[derive(Debug, PartialEq, Clone, Default)]
pub enum LexError {
    InvalidChar(String),
    #[default]
    Unrecognized,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LexError::InvalidChar(s) => write!(f, "invalid character literal {}", s),
            LexError::Unrecognized => write!(f, "unrecognized token"),
        }
    }
}

#[derive(Logos, Debug, PartialEq, Clone)]
#[logos(skip r"[ \t\f\r\n]+")]
#[logos(error = LexError)]
pub enum Token {
    #[regex(r"//[^\n]*", logos::skip)]
    #[regex(r"/\*(?:[^*]|\*[^/])*\*/", logos::skip)]
    #[regex(r"\\\r?\n", logos::skip)]
    Ignored,

    /// Raw pp-number text; typed later by `int::parse_literal`.
    #[regex(r"[0-9][0-9a-zA-Z_]*", |lex| lex.slice().to_string())]
    Number(String),
    #[regex(r"'(?:[^'\\\n]|\\[^\n])+'", lex_char)]
    Char(i64),
    #[regex(r"[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),
    #[regex(r#""(?:[^"\\\n]|\\[^\n])*""#, |lex| lex.slice().to_string())]
    Str(String),

    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token(",")]
    Comma,
    #[token("?")]
    Question,
    #[token(":")]
    Colon,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("<<")]
    Shl,
    #[token(">>")]
    Shr,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,
    #[token("<=")]
    Le,
    #[token(">=")]
    Ge,
    #[token("==")]
    EqEq,
    #[token("!=")]
    Ne,
    #[token("&")]
    Amp,
    #[token("|")]
    Pipe,
    #[token("^")]
    Caret,
    #[token("~")]
    Tilde,
    #[token("!")]
    Bang,
    #[token("&&")]
    AndAnd,
    #[token("||")]
    OrOr,
    #[token("#")]
    Hash,
    #[token("##")]
    HashHash,
    #[token("...")]
    Ellipsis,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Token::Number(s) | Token::Ident(s) | Token::Str(s) => return f.write_str(s),
            Token::Char(c) => return write!(f, "'\\x{:x}'", c),
            Token::Ignored => "",
            Token::LParen => "(",
            Token::RParen => ")",
            Token::Comma => ",",
            Token::Question => "?",
            Token::Colon => ":",
            Token::Plus => "+",
            Token::Minus => "-",
            Token::Star => "*",
            Token::Slash => "/",
            Token::Percent => "%",
            Token::Shl => "<<",
            Token::Shr => ">>",
            Token::Lt => "<",
            Token::Gt => ">",
            Token::Le => "<=",
            Token::Ge => ">=",
            Token::EqEq => "==",
            Token::Ne => "!=",
            Token::Amp => "&",
            Token::Pipe => "|",
            Token::Caret => "^",
            Token::Tilde => "~",
            Token::Bang => "!",
            Token::AndAnd => "&&",
            Token::OrOr => "||",
            Token::Hash => "#",
            Token::HashHash => "##",
            Token::Ellipsis => "...",
        };
        f.write_str(s)
    }
}

fn lex_char(lexer: &mut Lexer<Token>) -> Result<i64, LexError> {
    let slice = lexer.slice();
    let invalid = || LexError::InvalidChar(slice.to_string());
    let inner = &slice[1..slice.len() - 1];
    let bytes = inner.as_bytes();

    // Multi-character constants pack bytes big-endian into an int.
    let mut value: i64 = 0;
    let mut i = 0;
    while i < bytes.len() {
        let byte = if bytes[i] == b'\\' {
            i += 1;
            let esc = *bytes.get(i).ok_or_else(invalid)?;
            match esc {
                b'n' => b'\n' as i64,
                b't' => b'\t' as i64,
                b'r' => b'\r' as i64,
                b'a' => 0x07,
                b'b' => 0x08,
                b'f' => 0x0c,
                b'v' => 0x0b,
                b'\\' | b'\'' | b'"' | b'?' => esc as i64,
                b'x' => {
                    let start = i + 1;
                    let mut end = start;
                    while end < bytes.len() && bytes[end].is_ascii_hexdigit() {
                        end += 1;
                    }
                    let v = i64::from_str_radix(&inner[start..end], 16).map_err(|_| invalid())?;
                    i = end - 1;
                    v & 0xff
                }
                b'0'..=b'7' => {
                    let start = i;
                    let mut end = start;
                    while end < bytes.len() && end < start + 3 && (b'0'..=b'7').contains(&bytes[end]) {
                        end += 1;
                    }
                    let v = i64::from_str_radix(&inner[start..end], 8).map_err(|_| invalid())?;
                    i = end - 1;
                    v & 0xff
                }
                _ => return Err(invalid()),
            }
        } else {
            bytes[i] as i64
        };
        value = (value << 8) | byte;
        i += 1;
    }
    // A single char is a signed char promoted to int.
    if bytes.len() == 1 || (inner.starts_with('\\') && value <= 0xff) {
        value = value as u8 as i8 as i64;
    }
    Ok(value)
}

/// Tokenizes `text`, failing on the first unrecognized input.
pub fn tokenize(text: &str) -> Result<Vec<Token>, ConstantEvalError> {
    let mut lexer = Token::lexer(text);
    let mut tokens = Vec::new();
    while let Some(result) = lexer.next() {
        match result {
            Ok(tok) => tokens.push(tok),
            Err(e) => {
                return Err(ConstantEvalError::Lex(format!("{} at `{}`", e, lexer.slice())));
            }
        }
    }
    Ok(tokens)
}
