//! Precedence-climbing parser and evaluator for C constant expressions.

use crate::int::{parse_literal, CInt, DataModel, IntType};
use crate::lexer::Token;
use crate::ConstantEvalError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Plus,
    BitNot,
    LogicalNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Mul,
    Div,
    Rem,
    Add,
    Sub,
    Shl,
    Shr,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
    BitAnd,
    BitXor,
    BitOr,
    LogicalAnd,
    LogicalOr,
}

impl BinaryOp {
    fn from_token(token: &Token) -> Option<(BinaryOp, u8)> {
        let op = match token {
            Token::Star => (BinaryOp::Mul, 10),
            Token::Slash => (BinaryOp::Div, 10),
            Token::Percent => (BinaryOp::Rem, 10),
            Token::Plus => (BinaryOp::Add, 9),
            Token::Minus => (BinaryOp::Sub, 9),
            Token::Shl => (BinaryOp::Shl, 8),
            Token::Shr => (BinaryOp::Shr, 8),
            Token::Lt => (BinaryOp::Lt, 7),
            Token::Gt => (BinaryOp::Gt, 7),
            Token::Le => (BinaryOp::Le, 7),
            Token::Ge => (BinaryOp::Ge, 7),
            Token::EqEq => (BinaryOp::Eq, 6),
            Token::Ne => (BinaryOp::Ne, 6),
            Token::Amp => (BinaryOp::BitAnd, 5),
            Token::Caret => (BinaryOp::BitXor, 4),
            Token::Pipe => (BinaryOp::BitOr, 3),
            Token::AndAnd => (BinaryOp::LogicalAnd, 2),
            Token::OrOr => (BinaryOp::LogicalOr, 1),
            _ => return None,
        };
        Some(op)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Int(CInt),
    Ident(String),
    /// Function-like use of an identifier that no macro expanded.
    Call(String, Vec<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
    Cast(IntType, Box<Expr>),
}

impl Expr {
    /// Evaluates the tree. `lookup` resolves bare identifiers (enum
    /// constants, already-evaluated names). `&&`, `||` and `?:` only
    /// evaluate the operand they select.
    pub fn eval<F>(&self, lookup: &F) -> Result<CInt, ConstantEvalError>
    where
        F: Fn(&str) -> Option<CInt>,
    {
        match self {
            Expr::Int(v) => Ok(*v),
            Expr::Ident(name) => {
                lookup(name).ok_or_else(|| ConstantEvalError::Unresolved(name.clone()))
            }
            Expr::Call(name, _) => Err(ConstantEvalError::Unresolved(name.clone())),
            Expr::Cast(ty, inner) => Ok(inner.eval(lookup)?.convert(*ty)),
            Expr::Unary(op, inner) => {
                let v = inner.eval(lookup)?;
                Ok(match op {
                    UnaryOp::Neg => v.wrapping_neg(),
                    UnaryOp::Plus => v.promote(),
                    UnaryOp::BitNot => v.bitnot(),
                    UnaryOp::LogicalNot => v.logical_not(),
                })
            }
            Expr::Ternary(cond, then, otherwise) => {
                let (t, o) = if cond.eval(lookup)?.is_zero() {
                    (otherwise, then)
                } else {
                    (then, otherwise)
                };
                let picked = t.eval(lookup)?;
                // The result type still follows both arms when the other one
                // happens to be evaluable.
                match o.eval(lookup) {
                    Ok(other) => Ok(picked.convert(IntType::common(picked.ty(), other.ty()))),
                    Err(_) => Ok(picked),
                }
            }
            Expr::Binary(BinaryOp::LogicalAnd, lhs, rhs) => {
                if lhs.eval(lookup)?.is_zero() {
                    return Ok(CInt::int(0));
                }
                Ok(CInt::int(!rhs.eval(lookup)?.is_zero() as i64))
            }
            Expr::Binary(BinaryOp::LogicalOr, lhs, rhs) => {
                if !lhs.eval(lookup)?.is_zero() {
                    return Ok(CInt::int(1));
                }
                Ok(CInt::int(!rhs.eval(lookup)?.is_zero() as i64))
            }
            Expr::Binary(op, lhs, rhs) => {
                let a = lhs.eval(lookup)?;
                let b = rhs.eval(lookup)?;
                apply_binary(*op, a, b)
            }
        }
    }
}

fn apply_binary(op: BinaryOp, a: CInt, b: CInt) -> Result<CInt, ConstantEvalError> {
    use std::cmp::Ordering;
    Ok(match op {
        BinaryOp::Mul => a.wrapping_mul(b),
        BinaryOp::Div => a.checked_div(b)?,
        BinaryOp::Rem => a.checked_rem(b)?,
        BinaryOp::Add => a.wrapping_add(b),
        BinaryOp::Sub => a.wrapping_sub(b),
        BinaryOp::Shl => a.shl(b),
        BinaryOp::Shr => a.shr(b),
        BinaryOp::Lt => a.compare_with(b, |o| o == Ordering::Less),
        BinaryOp::Gt => a.compare_with(b, |o| o == Ordering::Greater),
        BinaryOp::Le => a.compare_with(b, |o| o != Ordering::Greater),
        BinaryOp::Ge => a.compare_with(b, |o| o != Ordering::Less),
        BinaryOp::Eq => a.compare_with(b, |o| o == Ordering::Equal),
        BinaryOp::Ne => a.compare_with(b, |o| o != Ordering::Equal),
        BinaryOp::BitAnd => a.bitand(b),
        BinaryOp::BitXor => a.bitxor(b),
        BinaryOp::BitOr => a.bitor(b),
        BinaryOp::LogicalAnd => CInt::int((!a.is_zero() && !b.is_zero()) as i64),
        BinaryOp::LogicalOr => CInt::int((!a.is_zero() || !b.is_zero()) as i64),
    })
}

/// Recursive-descent parser over an already macro-expanded token stream.
pub struct ExprParser<'a> {
    tokens: &'a [Token],
    pos: usize,
    model: DataModel,
}

impl<'a> ExprParser<'a> {
    pub fn new(tokens: &'a [Token], model: DataModel) -> Self {
        Self {
            tokens,
            pos: 0,
            model,
        }
    }

    /// Parses one complete expression; trailing tokens are an error.
    pub fn parse(mut self) -> Result<Expr, ConstantEvalError> {
        let expr = self.parse_ternary()?;
        match self.peek() {
            None => Ok(expr),
            Some(tok) => Err(ConstantEvalError::UnexpectedToken(tok.to_string())),
        }
    }

    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&'a Token> {
        self.tokens.get(self.pos + offset)
    }

    fn bump(&mut self) -> Result<&'a Token, ConstantEvalError> {
        let tok = self.tokens.get(self.pos).ok_or(ConstantEvalError::UnexpectedEnd)?;
        self.pos += 1;
        Ok(tok)
    }

    fn expect(&mut self, want: &Token) -> Result<(), ConstantEvalError> {
        let tok = self.bump()?;
        if tok == want {
            Ok(())
        } else {
            Err(ConstantEvalError::UnexpectedToken(tok.to_string()))
        }
    }

    fn parse_ternary(&mut self) -> Result<Expr, ConstantEvalError> {
        let cond = self.parse_binary(1)?;
        if self.peek() != Some(&Token::Question) {
            return Ok(cond);
        }
        self.pos += 1;
        let then = self.parse_ternary()?;
        self.expect(&Token::Colon)?;
        let otherwise = self.parse_ternary()?;
        Ok(Expr::Ternary(
            Box::new(cond),
            Box::new(then),
            Box::new(otherwise),
        ))
    }

    fn parse_binary(&mut self, min_prec: u8) -> Result<Expr, ConstantEvalError> {
        let mut lhs = self.parse_unary()?;
        while let Some((op, prec)) = self.peek().and_then(BinaryOp::from_token) {
            if prec < min_prec {
                break;
            }
            self.pos += 1;
            let rhs = self.parse_binary(prec + 1)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, ConstantEvalError> {
        let op = match self.peek() {
            Some(Token::Minus) => UnaryOp::Neg,
            Some(Token::Plus) => UnaryOp::Plus,
            Some(Token::Tilde) => UnaryOp::BitNot,
            Some(Token::Bang) => UnaryOp::LogicalNot,
            Some(Token::LParen) if self.starts_type_name(1) => {
                self.pos += 1;
                let ty = self.parse_type_name()?;
                self.expect(&Token::RParen)?;
                let inner = self.parse_unary()?;
                return Ok(Expr::Cast(ty, Box::new(inner)));
            }
            Some(Token::Ident(kw)) if kw == "sizeof" => {
                self.pos += 1;
                if self.peek() != Some(&Token::LParen) || !self.starts_type_name(1) {
                    return Err(ConstantEvalError::Unsupported(
                        "sizeof of an expression".to_string(),
                    ));
                }
                self.pos += 1;
                let ty = self.parse_type_name()?;
                self.expect(&Token::RParen)?;
                // `size_t` is `unsigned long` in the active data model.
                let size = CInt::from_bits(u64::from(ty.width / 8), IntType::ulong(self.model));
                return Ok(Expr::Int(size));
            }
            _ => return self.parse_primary(),
        };
        self.pos += 1;
        let inner = self.parse_unary()?;
        Ok(Expr::Unary(op, Box::new(inner)))
    }

    fn parse_primary(&mut self) -> Result<Expr, ConstantEvalError> {
        match self.bump()? {
            Token::Number(text) => Ok(Expr::Int(parse_literal(text, self.model)?)),
            Token::Char(c) => Ok(Expr::Int(CInt::int(*c))),
            Token::LParen => {
                let inner = self.parse_ternary()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Token::Ident(name) => {
                if self.peek() != Some(&Token::LParen) {
                    return Ok(Expr::Ident(name.clone()));
                }
                self.pos += 1;
                let mut args = Vec::new();
                if self.peek() == Some(&Token::RParen) {
                    self.pos += 1;
                    return Ok(Expr::Call(name.clone(), args));
                }
                loop {
                    args.push(self.parse_ternary()?);
                    match self.bump()? {
                        Token::Comma => continue,
                        Token::RParen => break,
                        tok => return Err(ConstantEvalError::UnexpectedToken(tok.to_string())),
                    }
                }
                Ok(Expr::Call(name.clone(), args))
            }
            Token::Str(_) | Token::Hash | Token::HashHash => Err(ConstantEvalError::Unsupported(
                "string or token-pasting in constant expression".to_string(),
            )),
            tok => Err(ConstantEvalError::UnexpectedToken(tok.to_string())),
        }
    }

    fn starts_type_name(&self, offset: usize) -> bool {
        matches!(self.peek_at(offset), Some(Token::Ident(word)) if is_type_word(word))
    }

    /// Parses an integer type name such as `unsigned long`, `__u32`,
    /// `const size_t` or `void *` (pointers become `unsigned long`).
    fn parse_type_name(&mut self) -> Result<IntType, ConstantEvalError> {
        let mut words = Vec::new();
        while let Some(Token::Ident(word)) = self.peek() {
            if !is_type_word(word) {
                break;
            }
            words.push(word.as_str());
            self.pos += 1;
        }
        let mut pointer = false;
        while self.peek() == Some(&Token::Star) {
            pointer = true;
            self.pos += 1;
        }
        if pointer {
            return Ok(IntType::ulong(self.model));
        }
        resolve_type(&words, self.model)
    }
}

const TYPE_QUALIFIERS: &[&str] = &["const", "volatile", "signed", "unsigned"];

const BASE_TYPES: &[&str] = &["char", "short", "int", "long", "_Bool", "bool", "void"];

/// Kernel and fixed-width typedefs: (name, width, signed). Width 0 means
/// the width of `long` in the active data model.
const TYPEDEFS: &[(&str, u8, bool)] = &[
    ("u8", 8, false),
    ("u16", 16, false),
    ("u32", 32, false),
    ("u64", 64, false),
    ("s8", 8, true),
    ("s16", 16, true),
    ("s32", 32, true),
    ("s64", 64, true),
    ("__u8", 8, false),
    ("__u16", 16, false),
    ("__u32", 32, false),
    ("__u64", 64, false),
    ("__s8", 8, true),
    ("__s16", 16, true),
    ("__s32", 32, true),
    ("__s64", 64, true),
    ("__le16", 16, false),
    ("__le32", 32, false),
    ("__le64", 64, false),
    ("__be16", 16, false),
    ("__be32", 32, false),
    ("__be64", 64, false),
    ("uint8_t", 8, false),
    ("uint16_t", 16, false),
    ("uint32_t", 32, false),
    ("uint64_t", 64, false),
    ("int8_t", 8, true),
    ("int16_t", 16, true),
    ("int32_t", 32, true),
    ("int64_t", 64, true),
    ("size_t", 0, false),
    ("ssize_t", 0, true),
    ("__kernel_size_t", 0, false),
    ("uintptr_t", 0, false),
    ("intptr_t", 0, true),
    ("loff_t", 64, true),
];

fn is_type_word(word: &str) -> bool {
    TYPE_QUALIFIERS.contains(&word)
        || BASE_TYPES.contains(&word)
        || TYPEDEFS.iter().any(|(name, _, _)| *name == word)
}

fn resolve_type(words: &[&str], model: DataModel) -> Result<IntType, ConstantEvalError> {
    if let Some((_, width, signed)) = TYPEDEFS.iter().find(|(name, _, _)| words.contains(name)) {
        let width = if *width == 0 { model.long_width() } else { *width };
        return Ok(IntType::new(width, *signed));
    }
    let unsigned = words.contains(&"unsigned");
    let longs = words.iter().filter(|w| **w == "long").count();
    let width = if words.contains(&"void") {
        return Err(ConstantEvalError::Unsupported("cast to void".to_string()));
    } else if words.contains(&"_Bool") || words.contains(&"bool") {
        return Ok(IntType::new(8, false));
    } else if words.contains(&"char") {
        8
    } else if words.contains(&"short") {
        16
    } else if longs >= 2 {
        64
    } else if longs == 1 {
        model.long_width()
    } else {
        32
    };
    Ok(IntType::new(width, !unsigned))
}
