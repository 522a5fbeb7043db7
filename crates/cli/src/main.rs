use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use anatomist::path_util::{relativize_unit, report_root};
use anatomist::{pipeline, ExtractionResult, ParserHost};
use common::registry::{FactRegistry, MappedFactRegistry};
use common::{ExtractorConfig, ResourceRules, TranslationUnit};
use forge::{ConstEnv, DataModel};

mod render;

#[derive(Parser)]
#[command(name = "declscope")]
#[command(about = "Scope-aware resource facts for kernel syscalls", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Format {
    Json,
    Text,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract resource facts from C files or source trees.
    Extract {
        /// `.c` files or directories to walk.
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Include directory, searched after the including file's own.
        #[arg(short = 'I', long = "include", env = "DECLSCOPE_INCLUDE", value_delimiter = ':')]
        include: Vec<PathBuf>,
        /// Predefined macro, `NAME` or `NAME=VALUE`.
        #[arg(short = 'D', long = "define")]
        defines: Vec<String>,
        /// JSON resource rules merged into the built-in ones.
        #[arg(long, env = "DECLSCOPE_RULES")]
        rules: Option<PathBuf>,
        /// JSON extractor configuration; flags are applied on top.
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long, value_enum, default_value_t = Format::Text)]
        format: Format,
        /// Write the report here instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
        /// Also save the facts as an rkyv registry.
        #[arg(long)]
        store: Option<PathBuf>,
        /// Parallel dissection workers.
        #[arg(long)]
        jobs: Option<usize>,
        /// 32-bit `long` (ILP32) instead of LP64.
        #[arg(long)]
        ilp32: bool,
    },
    /// Evaluate a C integer constant expression.
    Eval {
        expr: String,
        #[arg(short = 'D', long = "define")]
        defines: Vec<String>,
        #[arg(long)]
        ilp32: bool,
    },
    /// Print facts from a saved registry.
    Show {
        store: PathBuf,
        #[arg(long)]
        syscall: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let dotenv = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = dotenv {
        if !e.not_found() {
            warn!(error = %e, "failed to load .env");
        }
    }

    let cli = Cli::parse();

    match cli.command {
        Commands::Extract {
            paths,
            include,
            defines,
            rules,
            config,
            format,
            output,
            store,
            jobs,
            ilp32,
        } => {
            let config = build_config(
                config.as_deref(),
                include,
                &defines,
                rules.as_deref(),
                jobs,
                ilp32,
            )?;
            cmd_extract(&paths, config, format, output.as_deref(), store.as_deref()).await?
        }
        Commands::Eval {
            expr,
            defines,
            ilp32,
        } => cmd_eval(&expr, &defines, ilp32)?,
        Commands::Show { store, syscall } => cmd_show(&store, syscall.as_deref())?,
    }

    Ok(())
}

/// Config file (or defaults), then rules, include dirs, defines and flags.
fn build_config(
    config_path: Option<&Path>,
    include: Vec<PathBuf>,
    defines: &[String],
    rules_path: Option<&Path>,
    jobs: Option<usize>,
    ilp32: bool,
) -> anyhow::Result<ExtractorConfig> {
    let mut config = match config_path {
        Some(path) => ExtractorConfig::load(path)?,
        None => ExtractorConfig::default(),
    };
    if let Some(path) = rules_path {
        config.rules.merge(ResourceRules::load(path)?);
    }
    config.include_dirs.extend(include);
    for define in defines {
        config.add_define(define);
    }
    if jobs.is_some() {
        config.jobs = jobs;
    }
    if ilp32 {
        config.data_model = DataModel::Ilp32;
    }
    Ok(config)
}

// ---------------------------------------------------------------------------
// extract
// ---------------------------------------------------------------------------

/// A source file and the root its reported paths are relative to.
struct Source {
    path: PathBuf,
    root: String,
}

fn collect(paths: &[PathBuf], config: &ExtractorConfig) -> anyhow::Result<Vec<Source>> {
    let mut sources = Vec::new();
    for path in paths {
        let root = report_root(path)
            .with_context(|| format!("Failed to resolve source root {:?}", path))?;
        let found = pipeline::collect_sources(path, config);
        if found.is_empty() {
            warn!(path = %path.display(), "no source files found");
        }
        sources.extend(found.into_iter().map(|path| Source {
            path,
            root: root.clone(),
        }));
    }
    Ok(sources)
}

fn dissect_one(path: &Path, config: ExtractorConfig) -> TranslationUnit {
    match ParserHost::new(config) {
        Ok(mut host) => host
            .dissect(path)
            .unwrap_or_else(|e| pipeline::failed_unit(path, &e)),
        Err(e) => pipeline::failed_unit(path, &e),
    }
}

/// Dissects every source on the blocking pool, at most `jobs` at a time.
/// Units come back in input order with paths relative to their root.
async fn dissect_parallel(
    sources: Vec<Source>,
    config: &ExtractorConfig,
) -> anyhow::Result<Vec<TranslationUnit>> {
    let jobs = config
        .jobs
        .unwrap_or_else(|| std::thread::available_parallelism().map_or(1, |n| n.get()))
        .max(1);
    debug!(files = sources.len(), jobs, "dissecting");

    let semaphore = Arc::new(Semaphore::new(jobs));
    let mut tasks = JoinSet::new();
    let count = sources.len();
    for (index, source) in sources.into_iter().enumerate() {
        let permit = Arc::clone(&semaphore)
            .acquire_owned()
            .await
            .context("Dissection semaphore closed")?;
        let config = config.clone();
        tasks.spawn_blocking(move || {
            let _permit = permit;
            let mut unit = dissect_one(&source.path, config);
            relativize_unit(&mut unit, &source.root);
            (index, unit)
        });
    }

    let mut units: Vec<Option<TranslationUnit>> = (0..count).map(|_| None).collect();
    while let Some(joined) = tasks.join_next().await {
        let (index, unit) = joined.context("Dissection task failed")?;
        units[index] = Some(unit);
    }
    Ok(units.into_iter().flatten().collect())
}

async fn extract(paths: &[PathBuf], config: &ExtractorConfig) -> anyhow::Result<ExtractionResult> {
    let sources = collect(paths, config)?;
    let units = dissect_parallel(sources, config).await?;
    Ok(pipeline::assemble(&units))
}

async fn cmd_extract(
    paths: &[PathBuf],
    config: ExtractorConfig,
    format: Format,
    output: Option<&Path>,
    store: Option<&Path>,
) -> anyhow::Result<()> {
    let result = extract(paths, &config).await?;

    let report = match format {
        Format::Json => {
            serde_json::to_string_pretty(&result).context("Failed to serialize results")?
        }
        Format::Text => render::extraction(&result),
    };
    match output {
        Some(path) => std::fs::write(path, report)
            .with_context(|| format!("Failed to write report to {:?}", path))?,
        None => println!("{}", report.trim_end()),
    }

    if let Some(path) = store {
        FactRegistry::from_facts(&result.facts)
            .save(path)
            .with_context(|| format!("Failed to save fact store to {:?}", path))?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// eval
// ---------------------------------------------------------------------------

fn evaluate(expr: &str, defines: &[String], ilp32: bool) -> anyhow::Result<String> {
    let mut config = ExtractorConfig::default();
    for define in defines {
        config.add_define(define);
    }
    let model = if ilp32 { DataModel::Ilp32 } else { DataModel::Lp64 };
    let mut env = ConstEnv::new(model);
    for (name, body) in &config.defines {
        env.define(name, body);
    }
    let value = env
        .eval(expr)
        .with_context(|| format!("Failed to evaluate `{}`", expr))?;
    Ok(format!("{} (0x{:x}, {})", value, value, value.ty()))
}

fn cmd_eval(expr: &str, defines: &[String], ilp32: bool) -> anyhow::Result<()> {
    println!("{}", evaluate(expr, defines, ilp32)?);
    Ok(())
}

// ---------------------------------------------------------------------------
// show
// ---------------------------------------------------------------------------

fn cmd_show(store: &Path, syscall: Option<&str>) -> anyhow::Result<()> {
    let registry = MappedFactRegistry::open(store)
        .with_context(|| format!("Failed to open fact store {:?}", store))?;
    let entries = match syscall {
        Some(name) => registry.facts_for_syscall(name),
        None => registry.archived().entries.iter().collect(),
    };
    let facts = entries
        .into_iter()
        .map(MappedFactRegistry::load_fact)
        .collect::<Result<Vec<_>, _>>()
        .context("Corrupt fact store entry")?;
    println!("{}", render::stored(&facts, registry.len()).trim_end());
    Ok(())
}
