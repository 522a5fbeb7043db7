pub mod config;
pub mod ir;
pub mod registry;
pub mod rules;

pub use config::ExtractorConfig;
pub use ir::{
    ArgOrigin, CaseLabel, CaseValue, ConstFact, Diagnostic, Event, EventKind, FunctionSummary,
    Param, ResourceFact, ScopeStep, SwitchScope, SyscallDefinition, TranslationUnit,
};
pub use rules::{ResourceRule, ResourceRules};

use rkyv::{Archive, Deserialize, Serialize};
use serde::{Deserialize as SerdeDeserialize, Serialize as SerdeSerialize};
use std::fmt;
use std::str::FromStr;

/// Kind of resource operation a call performs.
///
/// Stored in every `ResourceFact` and in the disk-backed fact registry.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Archive,
    Deserialize,
    Serialize,
    SerdeSerialize,
    SerdeDeserialize,
)]
#[serde(rename_all = "snake_case")]
#[rkyv(derive(Debug))]
#[repr(u8)]
pub enum FactKind {
    /// Allocates a new file descriptor (`alloc_fd`, `get_unused_fd_flags`).
    AllocFd = 0,
    /// Takes a reference to an open file by descriptor (`fget`, `__fget_light`).
    FetchFile = 1,
}

impl FactKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FactKind::AllocFd => "alloc_fd",
            FactKind::FetchFile => "fetch_file",
        }
    }
}

impl fmt::Display for FactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FactKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "alloc_fd" => Ok(FactKind::AllocFd),
            "fetch_file" => Ok(FactKind::FetchFile),
            other => Err(format!("unknown fact kind: {}", other)),
        }
    }
}
