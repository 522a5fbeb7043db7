use rkyv::{Archive, Deserialize, Serialize};
use serde::{Deserialize as SerdeDeserialize, Serialize as SerdeSerialize};
use std::path::Path;

use anyhow::Context;

use crate::FactKind;

#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Archive,
    Deserialize,
    Serialize,
    SerdeSerialize,
    SerdeDeserialize,
)]
#[rkyv(derive(Debug))]
pub struct ResourceRule {
    pub kind: FactKind,
    pub functions: Vec<String>,
}

/// Which call names count as resource operations.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Archive,
    Deserialize,
    Serialize,
    SerdeSerialize,
    SerdeDeserialize,
)]
#[rkyv(derive(Debug))]
pub struct ResourceRules {
    #[serde(default)]
    pub rules: Vec<ResourceRule>,
}

impl Default for ResourceRules {
    fn default() -> Self {
        let names = |list: &[&str]| -> Vec<String> { list.iter().map(|s| s.to_string()).collect() };
        Self {
            rules: vec![
                ResourceRule {
                    kind: FactKind::AllocFd,
                    functions: names(&["alloc_fd", "get_unused_fd_flags", "anon_inode_getfd"]),
                },
                ResourceRule {
                    kind: FactKind::FetchFile,
                    functions: names(&[
                        "__fget_light",
                        "fget",
                        "fget_raw",
                        "fget_task",
                        "fdget",
                        "fdget_pos",
                        "__fdget",
                    ]),
                },
            ],
        }
    }
}

impl ResourceRules {
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Returns the kind of the first rule listing `name`.
    pub fn classify(&self, name: &str) -> Option<FactKind> {
        self.rules
            .iter()
            .find(|rule| rule.functions.iter().any(|f| f == name))
            .map(|rule| rule.kind)
    }

    /// Adds `other`'s functions, folding rules of the same kind together.
    pub fn merge(&mut self, other: ResourceRules) {
        for incoming in other.rules {
            match self.rules.iter_mut().find(|r| r.kind == incoming.kind) {
                Some(existing) => {
                    for f in incoming.functions {
                        if !existing.functions.contains(&f) {
                            existing.functions.push(f);
                        }
                    }
                }
                None => self.rules.push(incoming),
            }
        }
    }

    /// Loads rules from a JSON file of the form
    /// `{"rules": [{"kind": "alloc_fd", "functions": ["..."]}]}`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read rules from {:?}", path))?;
        let rules: ResourceRules = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse rules in {:?}", path))?;
        Ok(rules)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_classification() {
        let rules = ResourceRules::default();
        assert_eq!(rules.classify("alloc_fd"), Some(FactKind::AllocFd));
        assert_eq!(rules.classify("__fget_light"), Some(FactKind::FetchFile));
        assert_eq!(rules.classify("scopes_helper"), None);
    }

    #[test]
    fn test_merge_extends_existing_kind() {
        let mut rules = ResourceRules::default();
        rules.merge(ResourceRules {
            rules: vec![ResourceRule {
                kind: FactKind::AllocFd,
                functions: vec!["my_alloc".into(), "alloc_fd".into()],
            }],
        });
        assert_eq!(rules.rules.len(), 2);
        assert_eq!(rules.classify("my_alloc"), Some(FactKind::AllocFd));
        let alloc = &rules.rules[0].functions;
        assert_eq!(alloc.iter().filter(|f| *f == "alloc_fd").count(), 1);
    }

    #[test]
    fn test_load_from_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");
        std::fs::write(
            &path,
            r#"{"rules": [{"kind": "fetch_file", "functions": ["fd_file"]}]}"#,
        )
        .unwrap();
        let rules = ResourceRules::load(&path).unwrap();
        assert_eq!(rules.classify("fd_file"), Some(FactKind::FetchFile));
        assert_eq!(rules.classify("alloc_fd"), None);
    }

    #[test]
    fn test_load_rejects_unknown_kind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");
        std::fs::write(&path, r#"{"rules": [{"kind": "mmap", "functions": []}]}"#).unwrap();
        assert!(ResourceRules::load(&path).is_err());
    }
}
