//! # The Anatomist: C Front End & Scope Extraction
//!
//! **Role**: Turns kernel-style C translation units into `TranslationUnit`
//! IR for the Oracle.
//!
//! **Core Types**:
//! - `ParserHost`: tree-sitter C parser plus the per-file constant
//!   environment (defines, enums, included headers).
//! - `ScopeWalker`: walks one function body, tracking `switch`/`case`
//!   scopes, and emits resource and call events.
//! - `Classifier`: decides which calls are resource operations.
//!
//! **Design**:
//! - Kernel macros the C grammar cannot parse are rewritten by a
//!   line-preserving shim first, so reported lines match the original file.
//! - Per-file problems (bad case labels, syntax errors, unreadable files)
//!   become `Diagnostic`s; only setup failures are errors.

pub mod classify;
pub mod parser;
pub mod path_util;
pub mod pipeline;
pub mod scope;
pub mod shim;

pub use classify::{Classifier, RuleClassifier};
pub use parser::ParserHost;
pub use pipeline::{ExtractionResult, ExtractionStats, SyscallReport};
pub use scope::{ScopeWalker, WalkContext, WalkOutput};

/// Errors from the front end.
#[derive(Debug, thiserror::Error)]
pub enum AnatomistError {
    /// Tree-sitter parsing failed.
    #[error("Parse failure: {0}")]
    ParseFailure(String),

    /// I/O error (file read).
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Byte range exceeds u32::MAX (file too large).
    #[error("Byte range overflow: file size exceeds 4GB limit")]
    ByteRangeOverflow,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            AnatomistError::ParseFailure("no tree".into()).to_string(),
            "Parse failure: no tree"
        );
        assert!(AnatomistError::ByteRangeOverflow.to_string().contains("4GB"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: AnatomistError = io.into();
        assert!(matches!(err, AnatomistError::IoError(_)));
    }
}
