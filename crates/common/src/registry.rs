//! # Fact Registry: Disk-Backed Fact Store
//!
//! Stores attributed resource facts via `rkyv` zero-copy serialization.
//! Enables fast mmap-based lookups by fact id or syscall name.

use crate::ir::{ResourceFact, ScopeStep};
use crate::FactKind;
use memmap2::Mmap;
use rkyv::{Archive, Deserialize, Serialize};
use std::fs::File;
use std::hash::{Hash, Hasher};
use std::io::Write;
use std::path::Path;

/// Errors from registry operations.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Deserialization error: {0}")]
    DeserializeError(String),
}

/// SipHash of a fact key. Deterministic within a Rust version.
///
/// # Examples
/// ```
/// # use common::registry::fact_hash;
/// let h1 = fact_hash("scopes0::alloc_fd::alloc_fd");
/// let h2 = fact_hash("scopes0::alloc_fd::alloc_fd");
/// assert_eq!(h1, h2);
/// ```
pub fn fact_hash(s: &str) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    s.hash(&mut hasher);
    hasher.finish()
}

/// Single fact entry in the registry.
#[derive(Debug, Clone, Archive, Deserialize, Serialize)]
#[rkyv(derive(Debug))]
pub struct FactEntry {
    pub id: u64,
    pub syscall: String,
    pub kind: FactKind,
    pub call: String,
    pub path: Vec<ScopeStep>,
    pub via: Vec<String>,
    pub file_path: String,
    pub line: u32,
}

impl FactEntry {
    /// Stable id: hash of the fact's rendered form, which covers syscall,
    /// kind, call, path, chain and location.
    pub fn from_fact(fact: &ResourceFact) -> Self {
        Self {
            id: fact_hash(&fact.to_string()),
            syscall: fact.syscall.clone(),
            kind: fact.kind,
            call: fact.call.clone(),
            path: fact.path.clone(),
            via: fact.via.clone(),
            file_path: fact.file_path.clone(),
            line: fact.line,
        }
    }

    pub fn into_fact(self) -> ResourceFact {
        ResourceFact {
            syscall: self.syscall,
            kind: self.kind,
            call: self.call,
            path: self.path,
            via: self.via,
            file_path: self.file_path,
            line: self.line,
        }
    }
}

/// In-memory fact registry, serializable to disk.
#[derive(Debug, Clone, Archive, Deserialize, Serialize)]
#[rkyv(derive(Debug))]
pub struct FactRegistry {
    pub entries: Vec<FactEntry>,
}

impl FactRegistry {
    /// Creates a new empty registry.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn from_facts<'a>(facts: impl IntoIterator<Item = &'a ResourceFact>) -> Self {
        Self {
            entries: facts.into_iter().map(FactEntry::from_fact).collect(),
        }
    }

    /// Returns the number of facts.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sorts entries by ID and serializes the registry to bytes using `rkyv`.
    pub fn to_bytes(&mut self) -> Result<Vec<u8>, RegistryError> {
        self.entries.sort_by_key(|e| e.id);
        let aligned = rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map_err(|e| RegistryError::DeserializeError(e.to_string()))?;
        Ok(aligned.to_vec())
    }

    /// Saves the registry to a file (sorts by ID before writing).
    pub fn save(&mut self, path: &Path) -> Result<(), RegistryError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let bytes = self.to_bytes()?;
        let mut file = File::create(path)?;
        file.write_all(&bytes)?;
        Ok(())
    }
}

impl Default for FactRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Memory-mapped read-only registry handle.
pub struct MappedFactRegistry {
    _mmap: Mmap,
}

impl MappedFactRegistry {
    /// Opens a registry file via mmap.
    pub fn open(path: &Path) -> Result<Self, RegistryError> {
        let file = File::open(path)?;
        // SAFETY: The file is opened read-only and the map lives as long as self.
        let mmap = unsafe { Mmap::map(&file)? };

        // Validate the archive
        rkyv::access::<ArchivedFactRegistry, rkyv::rancor::Error>(&mmap)
            .map_err(|e| RegistryError::DeserializeError(e.to_string()))?;

        Ok(Self { _mmap: mmap })
    }

    /// Returns a reference to the archived registry (zero-copy).
    pub fn archived(&self) -> &ArchivedFactRegistry {
        // SAFETY: We validated the archive in `open()` via rkyv::access.
        // The mmap is held for the lifetime of self, so the reference is valid.
        unsafe { rkyv::access_unchecked::<ArchivedFactRegistry>(&self._mmap[..]) }
    }

    /// Finds an entry by fact ID (binary search; requires sorted registry).
    pub fn find_by_id(&self, id: u64) -> Option<&ArchivedFactEntry> {
        let entries = &self.archived().entries;
        let idx = entries.binary_search_by_key(&id, |e| e.id.into()).ok()?;
        Some(&entries[idx])
    }

    /// All archived entries for one syscall, in id order.
    pub fn facts_for_syscall(&self, syscall: &str) -> Vec<&ArchivedFactEntry> {
        self.archived()
            .entries
            .iter()
            .filter(|e| e.syscall.as_str() == syscall)
            .collect()
    }

    /// Deserializes one archived entry back into a `ResourceFact`.
    pub fn load_fact(entry: &ArchivedFactEntry) -> Result<ResourceFact, RegistryError> {
        let entry = rkyv::deserialize::<FactEntry, rkyv::rancor::Error>(entry)
            .map_err(|e| RegistryError::DeserializeError(e.to_string()))?;
        Ok(entry.into_fact())
    }

    /// Returns the number of facts.
    pub fn len(&self) -> usize {
        self.archived().entries.len()
    }

    /// Returns `true` if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.archived().entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ArgOrigin, CaseLabel};
    use forge::CInt;

    fn fact(syscall: &str, call: &str, label: &str) -> ResourceFact {
        ResourceFact {
            syscall: syscall.into(),
            kind: FactKind::FetchFile,
            call: call.into(),
            path: vec![ScopeStep {
                function: format!("sys_{}", syscall),
                origin: ArgOrigin::Param {
                    index: 1,
                    name: "cmd".into(),
                },
                labels: vec![CaseLabel::value(label, Some(CInt::int(7)))],
            }],
            via: vec![format!("sys_{}", syscall)],
            file_path: "scopes.c".into(),
            line: 12,
        }
    }

    #[test]
    fn test_hash_determinism() {
        let h1 = fact_hash("scopes0");
        let h2 = fact_hash("scopes0");
        assert_eq!(h1, h2);
        assert_ne!(fact_hash("scopes0"), fact_hash("scopes1"));
    }

    #[test]
    fn test_registry_roundtrip() {
        let mut registry = FactRegistry::from_facts(&[fact("scopes0", "__fget_light", "FOO_IOCTL1")]);

        let bytes = registry.to_bytes().unwrap();
        let archived = rkyv::access::<ArchivedFactRegistry, rkyv::rancor::Error>(&bytes).unwrap();
        assert_eq!(archived.entries.len(), 1);
        assert_eq!(archived.entries[0].syscall.as_str(), "scopes0");
        assert_eq!(archived.entries[0].call.as_str(), "__fget_light");
    }

    #[test]
    fn test_save_and_mmap() {
        let facts = vec![
            fact("scopes0", "__fget_light", "FOO_IOCTL1"),
            fact("scopes1", "fget", "FOO_IOCTL2"),
            fact("scopes0", "fdget", "FOO_IOCTL3"),
        ];
        let mut registry = FactRegistry::from_facts(&facts);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("facts.rkyv");
        registry.save(&path).unwrap();

        let mapped = MappedFactRegistry::open(&path).unwrap();
        assert_eq!(mapped.len(), 3);
        assert_eq!(mapped.facts_for_syscall("scopes0").len(), 2);

        let id = FactEntry::from_fact(&facts[1]).id;
        let entry = mapped.find_by_id(id).unwrap();
        let loaded = MappedFactRegistry::load_fact(entry).unwrap();
        assert_eq!(loaded, facts[1]);
    }

    #[test]
    fn test_empty_registry() {
        let registry = FactRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_find_by_id_miss() {
        let mut registry = FactRegistry::from_facts(&[fact("scopes0", "fget", "X")]);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("facts.rkyv");
        registry.save(&path).unwrap();

        let mapped = MappedFactRegistry::open(&path).unwrap();
        assert!(mapped.find_by_id(999).is_none());
    }

    #[test]
    fn test_open_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("facts.rkyv");
        std::fs::write(&path, b"not an archive").unwrap();
        assert!(MappedFactRegistry::open(&path).is_err());
    }
}
