//! Library definition: where sources live and where outputs go
//!
//! A library is described by a YAML file. Every relative path in it is
//! resolved against the directory holding that file.

mod source;

pub use source::{Source, SourceKind, SourceSummary};

use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::builder::AssetRules;
use crate::error::ConfigError;

const DEFAULT_SKIP_FRAGMENT: &str = "System/Install";

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum SourceDefinition {
    Url(String),
    Entry(SourceEntry),
}

#[derive(Debug, Clone, Deserialize)]
struct SourceEntry {
    #[serde(default)]
    path: Option<PathBuf>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    /// Listing files, relative to the source root, describing its directories
    #[serde(default)]
    descriptions: Vec<String>,
}

/// Raw YAML document
#[derive(Debug, Clone, Deserialize)]
struct LibraryDefinition {
    sources: Vec<SourceDefinition>,
    #[serde(default)]
    overlays: Vec<PathBuf>,
    #[serde(default = "default_assets_directory")]
    assets_directory: PathBuf,
    #[serde(default = "default_intermediates_directory")]
    intermediates_directory: PathBuf,
    #[serde(default = "default_index_directory")]
    index_directory: PathBuf,
    #[serde(default = "default_output_directory")]
    output_directory: PathBuf,
    #[serde(default)]
    ignored: BTreeSet<String>,
    #[serde(default = "default_skip_path_fragments")]
    skip_path_fragments: Vec<String>,
    #[serde(default)]
    indexer: IndexerSettings,
}

fn default_assets_directory() -> PathBuf {
    PathBuf::from("assets")
}

fn default_intermediates_directory() -> PathBuf {
    PathBuf::from("_intermediates")
}

fn default_index_directory() -> PathBuf {
    PathBuf::from("_index")
}

fn default_output_directory() -> PathBuf {
    PathBuf::from("_site")
}

fn default_skip_path_fragments() -> Vec<String> {
    vec![DEFAULT_SKIP_FRAGMENT.to_string()]
}

/// Decoder and worker pool settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IndexerSettings {
    /// Sources indexed concurrently; defaults to the available parallelism
    pub jobs: Option<usize>,
    pub decoder_timeout_seconds: u64,
    pub interpreter: String,
    pub tools_directory: PathBuf,
}

impl Default for IndexerSettings {
    fn default() -> Self {
        Self {
            jobs: None,
            decoder_timeout_seconds: 60,
            interpreter: "lua".to_string(),
            tools_directory: PathBuf::from("dependencies/opolua/src"),
        }
    }
}

impl IndexerSettings {
    pub fn decoder_timeout(&self) -> Duration {
        Duration::from_secs(self.decoder_timeout_seconds)
    }

    pub fn worker_count(&self) -> usize {
        self.jobs
            .filter(|jobs| *jobs > 0)
            .unwrap_or_else(|| std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1))
    }
}

/// A loaded library with every path resolved
#[derive(Debug, Clone)]
pub struct Library {
    pub path: PathBuf,
    pub root_directory: PathBuf,
    pub sources: Vec<Source>,
    pub overlay_directories: Vec<PathBuf>,
    pub assets_directory: PathBuf,
    pub intermediates_directory: PathBuf,
    pub index_directory: PathBuf,
    pub output_directory: PathBuf,
    pub rules: AssetRules,
    pub indexer: IndexerSettings,
}

impl Library {
    /// Load and resolve the definition at `path`
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.is_file() {
            return Err(ConfigError::NotFound {
                path: path.to_path_buf(),
            });
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let definition: LibraryDefinition =
            serde_yaml_ng::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        let path = std::path::absolute(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let root_directory = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let resolve = |relative: &Path| root_directory.join(relative);

        let assets_directory = resolve(&definition.assets_directory);
        let sources = definition
            .sources
            .into_iter()
            .map(|source| match source {
                SourceDefinition::Url(url) => Source::internet_archive(&assets_directory, &url, None, None, Vec::new()),
                SourceDefinition::Entry(entry) => match (entry.path, entry.url) {
                    (Some(local), None) => Ok(Source::local(
                        &root_directory,
                        &local,
                        entry.name,
                        entry.description,
                        entry.descriptions,
                    )),
                    (None, Some(url)) => Source::internet_archive(
                        &assets_directory,
                        &url,
                        entry.name,
                        entry.description,
                        entry.descriptions,
                    ),
                    _ => Err("each source needs exactly one of `path` or `url`".to_string()),
                },
            })
            .collect::<Result<Vec<_>, String>>()
            .map_err(|reason| ConfigError::InvalidSource {
                path: path.clone(),
                reason,
            })?;

        let mut tools_directory = definition.indexer.tools_directory.clone();
        if tools_directory.is_relative() {
            tools_directory = resolve(&tools_directory);
        }

        debug!(path = %path.display(), sources = sources.len(), "Loaded library definition");
        Ok(Self {
            overlay_directories: definition.overlays.iter().map(|p| resolve(p)).collect(),
            intermediates_directory: resolve(&definition.intermediates_directory),
            index_directory: resolve(&definition.index_directory),
            output_directory: resolve(&definition.output_directory),
            rules: AssetRules {
                ignored: definition.ignored,
                skip_path_fragments: definition.skip_path_fragments,
            },
            indexer: IndexerSettings {
                tools_directory,
                ..definition.indexer
            },
            assets_directory,
            sources,
            root_directory,
            path,
        })
    }

    /// Content-addressed store for every cataloged file
    pub fn store_directory(&self) -> PathBuf {
        self.intermediates_directory.join("blobs")
    }

    /// Per-source cache directories live here
    pub fn sources_cache_directory(&self) -> PathBuf {
        self.intermediates_directory.join("sources")
    }
}
