//! End-to-end extraction over a source tree.
//!
//! Stages:
//! - **Collect**: walk the tree for translation units (`.c` by default).
//! - **Dissect**: one [`TranslationUnit`] per file. A file that cannot be
//!   read or parsed becomes an empty unit carrying a diagnostic.
//! - **Assemble**: link all units into one call graph and attribute facts
//!   to syscalls via [`oracle`].

use std::path::{Path, PathBuf};

use anyhow::Context;
use common::{
    ConstFact, Diagnostic, ExtractorConfig, ResourceFact, SwitchScope, SyscallDefinition,
    TranslationUnit,
};
use oracle::{AttributionStats, CallGraph};
use serde::Serialize;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::parser::ParserHost;
use crate::path_util::{relativize_unit, report_root};
use crate::AnatomistError;

#[derive(Debug, Clone, Serialize)]
pub struct SyscallReport {
    #[serde(flatten)]
    pub definition: SyscallDefinition,
    /// Functions reachable from the syscall through resolved calls.
    pub helpers: Vec<String>,
    /// Switches in the syscall body itself.
    pub switches: Vec<SwitchScope>,
    pub fact_count: usize,
}

/// Results of a full extraction run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExtractionResult {
    pub syscalls: Vec<SyscallReport>,
    pub facts: Vec<ResourceFact>,
    pub consts: Vec<ConstFact>,
    pub diagnostics: Vec<Diagnostic>,
    pub stats: ExtractionStats,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ExtractionStats {
    pub files: usize,
    /// Units tree-sitter had to recover in, or that could not be read.
    pub files_with_errors: usize,
    #[serde(flatten)]
    pub attribution: AttributionStats,
}

impl ExtractionResult {
    pub fn facts_for<'a>(&'a self, syscall: &'a str) -> impl Iterator<Item = &'a ResourceFact> + 'a {
        self.facts.iter().filter(move |f| f.syscall == syscall)
    }
}

/// Source files under `root`, sorted by path. A file given directly is
/// taken as-is whatever its extension.
pub fn collect_sources(root: &Path, config: &ExtractorConfig) -> Vec<PathBuf> {
    if root.is_file() {
        return vec![root.to_path_buf()];
    }
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file() && config.is_source(e.path()))
        .map(|e| e.into_path())
        .collect()
}

/// Stand-in for a file that could not be dissected.
pub fn failed_unit(path: &Path, error: &AnatomistError) -> TranslationUnit {
    let file_path = path.display().to_string().replace('\\', "/");
    warn!(file = %file_path, error = %error, "failed to dissect file");
    TranslationUnit {
        diagnostics: vec![Diagnostic {
            file_path: file_path.clone(),
            line: 0,
            function: None,
            message: format!("failed to dissect: {}", error),
        }],
        file_path,
        has_parse_errors: true,
        ..Default::default()
    }
}

/// Dissects `paths` in order on the current thread.
pub fn dissect_all(
    paths: &[PathBuf],
    config: &ExtractorConfig,
) -> Result<Vec<TranslationUnit>, AnatomistError> {
    let mut host = ParserHost::new(config.clone())?;
    Ok(paths
        .iter()
        .map(|path| host.dissect(path).unwrap_or_else(|e| failed_unit(path, &e)))
        .collect())
}

/// Links `units` and attributes facts to their syscalls.
pub fn assemble(units: &[TranslationUnit]) -> ExtractionResult {
    let graph = CallGraph::build(units);
    let attribution = graph.attribute();

    let syscalls = units
        .iter()
        .flat_map(|u| u.functions.iter())
        .filter_map(|f| Some((f, SyscallDefinition::from_summary(f)?)))
        .map(|(function, definition)| SyscallReport {
            helpers: graph.reachable_from(&function.name),
            switches: function.switches.clone(),
            fact_count: attribution
                .facts
                .iter()
                .filter(|f| f.syscall == definition.name)
                .count(),
            definition,
        })
        .collect();

    let result = ExtractionResult {
        syscalls,
        facts: attribution.facts,
        consts: units.iter().flat_map(|u| u.consts.iter().cloned()).collect(),
        diagnostics: units
            .iter()
            .flat_map(|u| u.diagnostics.iter().cloned())
            .collect(),
        stats: ExtractionStats {
            files: units.len(),
            files_with_errors: units.iter().filter(|u| u.has_parse_errors).count(),
            attribution: attribution.stats,
        },
    };
    info!(
        files = result.stats.files,
        syscalls = result.stats.attribution.syscalls,
        facts = result.stats.attribution.facts,
        "extraction complete"
    );
    result
}

/// Runs collect, dissect and assemble over `root`. Reported paths are
/// relative to `root` (or to its directory when `root` is a file).
pub fn run(root: &Path, config: &ExtractorConfig) -> anyhow::Result<ExtractionResult> {
    let root_dir = report_root(root)
        .with_context(|| format!("Failed to resolve source root {:?}", root))?;
    let paths = collect_sources(root, config);
    let mut units = dissect_all(&paths, config)
        .with_context(|| format!("Failed to dissect sources under {:?}", root))?;
    for unit in &mut units {
        relativize_unit(unit, &root_dir);
    }
    Ok(assemble(&units))
}
