//! # The Forge: Constant Evaluation Engine
//!
//! Evaluates C integer constant expressions the way a C compiler would for
//! a fixed target, instead of the way the host happens to do arithmetic.
//!
//! ## Pipeline
//! 1. [`lexer`]: logos tokenizer for expressions and macro bodies.
//! 2. [`macros::ConstEnv`]: object-like and function-like macro expansion,
//!    enum values, `defined`.
//! 3. [`expr`]: precedence-climbing parser producing an [`expr::Expr`] tree.
//! 4. [`int::CInt`]: typed, width-masked evaluation. Overflow wraps.
//!
//! ## Example
//! ```
//! use forge::{ConstEnv, DataModel, IntType};
//!
//! let mut env = ConstEnv::new(DataModel::Lp64);
//! env.define("LARGE_SINT", "(20ll<<63)");
//! let v = env.eval("LARGE_SINT").unwrap();
//! assert_eq!(v.ty(), IntType::LLONG);
//! assert!(v.is_zero());
//! ```

pub mod expr;
pub mod int;
pub mod lexer;
pub mod macros;

pub use int::{parse_literal, CInt, DataModel, IntType};
pub use macros::ConstEnv;

/// Errors raised while expanding or evaluating a constant expression.
///
/// None of these is fatal to extraction: callers record the failure and
/// skip the label or constant that produced it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConstantEvalError {
    #[error("lexing failed: {0}")]
    Lex(String),

    #[error("invalid integer literal `{0}`")]
    InvalidLiteral(String),

    #[error("unexpected token `{0}`")]
    UnexpectedToken(String),

    #[error("unexpected end of expression")]
    UnexpectedEnd,

    /// Identifier with no macro or value binding.
    #[error("unresolved identifier `{0}`")]
    Unresolved(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("unsupported construct: {0}")]
    Unsupported(String),

    #[error("macro expansion exceeded depth {0}")]
    ExpansionTooDeep(usize),

    #[error("macro `{name}` expects {expected} argument(s), got {found}")]
    MacroArity {
        name: String,
        expected: usize,
        found: usize,
    },
}

impl ConstantEvalError {
    /// `true` when the expression is well-formed but names something this
    /// translation unit does not define. Such labels stay symbolic.
    pub fn is_unresolved(&self) -> bool {
        matches!(self, ConstantEvalError::Unresolved(_))
    }
}

/// Evaluates `text` in an environment holding only `defines`.
///
/// # Errors
/// Any [`ConstantEvalError`] from expansion, parsing or evaluation.
pub fn eval_with_defines<'a, I>(
    text: &str,
    defines: I,
    model: DataModel,
) -> Result<CInt, ConstantEvalError>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut env = ConstEnv::new(model);
    for (name, body) in defines {
        env.define(name, body);
    }
    env.eval(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eval_with_defines() {
        let v = eval_with_defines(
            "FOO_IOCTL4 + 2",
            [("FOO_IOCTL4", "0x100")],
            DataModel::Lp64,
        )
        .unwrap();
        assert_eq!(v.as_i128(), 0x102);
    }

    #[test]
    fn test_unresolved_is_classified() {
        let err = eval_with_defines("FOO_IOCTL7", [], DataModel::Lp64).unwrap_err();
        assert!(err.is_unresolved());
        assert!(!ConstantEvalError::DivisionByZero.is_unresolved());
    }

    #[test]
    fn test_error_messages() {
        let err = ConstantEvalError::MacroArity {
            name: "_IOW".into(),
            expected: 3,
            found: 1,
        };
        assert_eq!(err.to_string(), "macro `_IOW` expects 3 argument(s), got 1");
    }
}
