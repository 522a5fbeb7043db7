//! Extractor configuration, loadable from JSON and overridable from the CLI.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use forge::DataModel;
use serde::{Deserialize, Serialize};

use crate::rules::ResourceRules;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    /// Searched after the including file's own directory.
    pub include_dirs: Vec<PathBuf>,
    /// Seeded into every translation unit before its own `#define`s.
    pub defines: BTreeMap<String, String>,
    pub rules: ResourceRules,
    pub data_model: DataModel,
    /// Parallel dissection workers. `None` uses available parallelism.
    pub jobs: Option<usize>,
    /// File extensions treated as translation units.
    pub extensions: Vec<String>,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            include_dirs: Vec::new(),
            defines: BTreeMap::new(),
            rules: ResourceRules::default(),
            data_model: DataModel::default(),
            jobs: None,
            extensions: vec!["c".to_string()],
        }
    }
}

impl ExtractorConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {:?}", path))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config in {:?}", path))
    }

    /// Parses `NAME=VALUE` (or bare `NAME`, defined as `1`) and records it.
    pub fn add_define(&mut self, spec: &str) {
        let (name, value) = match spec.split_once('=') {
            Some((name, value)) => (name.trim(), value.trim()),
            None => (spec.trim(), "1"),
        };
        self.defines.insert(name.to_string(), value.to_string());
    }

    pub fn is_source(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| self.extensions.iter().any(|e| e == ext))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FactKind;

    #[test]
    fn test_defaults() {
        let config = ExtractorConfig::default();
        assert_eq!(config.data_model, DataModel::Lp64);
        assert!(config.is_source(Path::new("fs/ioctl.c")));
        assert!(!config.is_source(Path::new("include/fs.h")));
        assert_eq!(config.rules.classify("alloc_fd"), Some(FactKind::AllocFd));
    }

    #[test]
    fn test_add_define() {
        let mut config = ExtractorConfig::default();
        config.add_define("FOO_IOCTL1=0x10");
        config.add_define("CONFIG_COMPAT");
        assert_eq!(config.defines["FOO_IOCTL1"], "0x10");
        assert_eq!(config.defines["CONFIG_COMPAT"], "1");
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("declscope.json");
        std::fs::write(&path, r#"{"data_model": "ilp32", "defines": {"X": "1"}}"#).unwrap();
        let config = ExtractorConfig::load(&path).unwrap();
        assert_eq!(config.data_model, DataModel::Ilp32);
        assert_eq!(config.defines["X"], "1");
        assert_eq!(config.extensions, vec!["c".to_string()]);
        assert!(config.rules.classify("fget").is_some());
    }
}
