//! Relic - a catalog builder for legacy Psion software collections

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use relic_core::library::Library;
use relic_core::pipeline::{self, IndexOptions};

/// Log levels
#[derive(Debug, Clone, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_filter_directive(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Pipeline stages, run in the order given
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Stage {
    /// Download remote sources
    Sync,
    /// Index sources into releases
    Index,
    /// Group releases into programs
    Group,
    /// Apply overlays and publish
    Overlay,
}

#[derive(Parser, Debug)]
#[clap(
    name = "relic",
    about = "Builds a deduplicated catalog of legacy Psion software",
    version,
    args_conflicts_with_subcommands = true
)]
struct Cli {
    #[clap(subcommand)]
    command: Option<Command>,

    /// Library definition file
    definition: Option<PathBuf>,

    /// Stages to run
    #[clap(value_enum)]
    stages: Vec<Stage>,

    /// Copy files that fail to index into this directory
    #[clap(long)]
    copy_failures: Option<PathBuf>,

    /// Re-index every source, ignoring caches
    #[clap(long)]
    force: bool,

    /// Number of sources indexed concurrently
    #[clap(long)]
    jobs: Option<usize>,

    /// Set log level
    #[clap(long, default_value = "info", global = true)]
    log_level: LogLevel,

    /// Shorthand for --log-level debug
    #[clap(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List every indexed reference to a file name
    Search {
        /// Library definition file
        definition: PathBuf,
        /// File name to look for, without directories
        filename: String,
    },
}

fn initialize_tracing(log_level: &LogLevel, verbose: bool) {
    let directive = if verbose {
        "debug"
    } else {
        log_level.to_filter_directive()
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(directive))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    initialize_tracing(&cli.log_level, cli.verbose);

    if let Some(Command::Search {
        definition,
        filename,
    }) = cli.command
    {
        return search_command(definition, &filename);
    }

    let Some(definition) = cli.definition else {
        bail!("No library definition given");
    };
    if cli.stages.is_empty() {
        bail!("No commands given; expected any of sync, index, group, overlay");
    }
    let options = IndexOptions {
        force: cli.force,
        copy_failures: cli.copy_failures,
        jobs: cli.jobs,
    };
    run_stages(definition, &cli.stages, &options).await
}

async fn run_stages(definition: PathBuf, stages: &[Stage], options: &IndexOptions) -> Result<()> {
    let mut library = Library::load(&definition)
        .with_context(|| format!("Failed to load library definition {}", definition.display()))?;
    debug!(sources = library.sources.len(), "Library loaded");

    for stage in stages {
        info!(?stage, "Running stage");
        match stage {
            Stage::Sync => pipeline::sync(&mut library).await?,
            Stage::Index => {
                let gateway = pipeline::process_gateway(&library)?;
                let report = pipeline::index(&library, gateway, options).await?;
                for source in &report.sources {
                    match &source.error {
                        Some(error) => warn!(source = %source.name, error = %error, "Source not indexed"),
                        None => info!(
                            source = %source.name,
                            state = ?source.state,
                            releases = source.releases,
                            failures = source.failures,
                            "Source summary"
                        ),
                    }
                }
            }
            Stage::Group => {
                pipeline::group(&library)?;
            }
            Stage::Overlay => pipeline::overlay(&library)?,
        }
    }
    Ok(())
}

#[derive(Tabled)]
struct ReferenceRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Version")]
    version: String,
    #[tabled(rename = "UID")]
    uid: String,
    #[tabled(rename = "SHA256")]
    sha256: String,
    #[tabled(rename = "Reference")]
    reference: String,
}

fn search_command(definition: PathBuf, filename: &str) -> Result<()> {
    let library = Library::load(&definition)
        .with_context(|| format!("Failed to load library definition {}", definition.display()))?;
    let releases = pipeline::search(&library, filename)?;
    if releases.is_empty() {
        println!("No references to {filename}.");
        return Ok(());
    }

    let rows: Vec<ReferenceRow> = releases
        .iter()
        .map(|release| ReferenceRow {
            name: release.name.clone(),
            version: release.version.clone().unwrap_or_else(|| "-".to_string()),
            uid: release.uid.clone(),
            sha256: release.content_hash.chars().take(12).collect(),
            reference: if release.reference.is_empty() {
                release.filename.clone()
            } else {
                format!("{} -> {}", release.reference, release.filename)
            },
        })
        .collect();
    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()))
        .to_string();
    println!("Found {} references to {filename}\n", rows.len());
    println!("{table}");
    Ok(())
}
