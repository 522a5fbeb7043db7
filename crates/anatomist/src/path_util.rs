//! Path handling for reported file names.
//!
//! Units are dissected under canonical paths (so includes and call
//! resolution agree on one spelling per file) and can be re-expressed
//! relative to the extraction root for output.

use std::path::Path;

use common::TranslationUnit;

use crate::AnatomistError;

/// Canonical UTF-8 path with forward slashes.
///
/// # Errors
/// - `AnatomistError::IoError` if the path cannot be canonicalized
/// - `AnatomistError::ParseFailure` if the path is not valid UTF-8
///
/// # Example
/// ```no_run
/// use std::path::Path;
/// use anatomist::path_util::normalize_path;
///
/// let normalized = normalize_path(Path::new("./fs/ioctl.c")).unwrap();
/// assert!(normalized.ends_with("fs/ioctl.c"));
/// ```
pub fn normalize_path(path: &Path) -> Result<String, AnatomistError> {
    let canonical = dunce::canonicalize(path)?;
    canonical
        .to_str()
        .map(|s| s.replace('\\', "/"))
        .ok_or_else(|| AnatomistError::ParseFailure(format!("Non-UTF-8 path: {}", canonical.display())))
}

/// `file_path` relative to `root` when it lies underneath, else unchanged.
pub fn relative_to(file_path: &str, root: &str) -> String {
    let root = root.trim_end_matches('/');
    match file_path.strip_prefix(root) {
        Some(rest) if rest.starts_with('/') => rest.trim_start_matches('/').to_string(),
        _ => file_path.to_string(),
    }
}

/// Rewrites every file path in `unit` relative to `root`.
pub fn relativize_unit(unit: &mut TranslationUnit, root: &str) {
    unit.file_path = relative_to(&unit.file_path, root);
    for function in &mut unit.functions {
        function.file_path = relative_to(&function.file_path, root);
    }
    for constant in &mut unit.consts {
        constant.file_path = relative_to(&constant.file_path, root);
    }
    for diagnostic in &mut unit.diagnostics {
        diagnostic.file_path = relative_to(&diagnostic.file_path, root);
    }
}

/// The directory reported paths are made relative to: `path` itself, or
/// its parent when `path` is a file.
pub fn report_root(path: &Path) -> Result<String, AnatomistError> {
    let normalized = normalize_path(path)?;
    if path.is_file() {
        Ok(Path::new(&normalized)
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or(normalized))
    } else {
        Ok(normalized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{Diagnostic, FunctionSummary};

    #[test]
    fn test_normalize_path_cargo_manifest() {
        let manifest = std::env::var("CARGO_MANIFEST_DIR")
            .map(|dir| Path::new(&dir).join("Cargo.toml"))
            .unwrap();

        let normalized = normalize_path(&manifest).unwrap();
        assert!(normalized.ends_with("Cargo.toml"));
        assert!(!normalized.contains('\\'));
    }

    #[test]
    fn test_normalize_nonexistent_path() {
        assert!(normalize_path(Path::new("/this/does/not/exist/nowhere.c")).is_err());
    }

    #[test]
    fn test_relative_to() {
        assert_eq!(relative_to("/src/linux/fs/ioctl.c", "/src/linux"), "fs/ioctl.c");
        assert_eq!(relative_to("/src/linux/fs/ioctl.c", "/src/linux/"), "fs/ioctl.c");
        assert_eq!(relative_to("/src/linuxx/a.c", "/src/linux"), "/src/linuxx/a.c");
        assert_eq!(relative_to("/other/a.c", "/src/linux"), "/other/a.c");
    }

    #[test]
    fn test_relativize_unit() {
        let mut unit = TranslationUnit {
            file_path: "/k/fs/a.c".into(),
            functions: vec![FunctionSummary {
                name: "f".into(),
                file_path: "/k/fs/a.c".into(),
                start_line: 1,
                end_line: 2,
                params: vec![],
                is_static: false,
                syscall: None,
                events: vec![],
                switches: vec![],
            }],
            diagnostics: vec![Diagnostic {
                file_path: "/k/fs/a.c".into(),
                line: 3,
                function: None,
                message: "x".into(),
            }],
            ..Default::default()
        };
        relativize_unit(&mut unit, "/k");
        assert_eq!(unit.file_path, "fs/a.c");
        assert_eq!(unit.functions[0].file_path, "fs/a.c");
        assert_eq!(unit.diagnostics[0].file_path, "fs/a.c");
    }

    #[test]
    fn test_report_root_of_file_is_parent() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.c");
        std::fs::write(&file, "").unwrap();
        let root = report_root(&file).unwrap();
        assert_eq!(root, normalize_path(dir.path()).unwrap());
        assert_eq!(report_root(dir.path()).unwrap(), root);
    }
}
