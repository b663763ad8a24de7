//! The `sync`, `index`, `group` and `overlay` stages
//!
//! Sources are indexed by a bounded pool of blocking workers, each staging
//! its output in a private directory. Committing caches and writing the
//! library-wide files happens afterwards on the calling task, in source
//! order, so output never depends on which worker finished first.

use anyhow::{bail, Context, Result};
use futures::future::join_all;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error, info};

use crate::aggregate::{aggregate, releases_named, Catalog, GroupEntry};
use crate::builder::{DescriptionIndex, ReleaseBuilder};
use crate::cache::{CacheState, Manifest, SourceCache, StagedIndex, StaleReason};
use crate::failures::{self, FailureCollector, FailureRecord};
use crate::gateway::{DecoderGateway, ProcessGateway};
use crate::library::{Library, Source, SourceSummary};
use crate::model::{Reference, Release};
use crate::output::{read_json, replace_tree, write_json, write_json_pretty};
use crate::overlay::{Overlay, SCREENSHOTS_DIRECTORY};
use crate::store::{hash_tree, ContentStore};

const RELEASES_FILE: &str = "releases.json";
const FAILURES_FILE: &str = "failures.json";
const ICONS_DIRECTORY: &str = "icons";
const SCRATCH_DIRECTORY: &str = "tmp";
const PUBLISHED_FILES: [&str; 4] = ["programs", "sources", "summary", "groups"];
const SOURCE_FAILURE_KIND: &str = "source";

/// Options of the `index` stage
#[derive(Debug, Clone, Default)]
pub struct IndexOptions {
    /// Re-index every source regardless of its cache
    pub force: bool,
    /// Copy failing files here for triage
    pub copy_failures: Option<PathBuf>,
    /// Overrides the library's worker count
    pub jobs: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceReport {
    pub identifier: String,
    pub name: String,
    /// `None` when the source could not be indexed
    pub state: Option<CacheState>,
    pub releases: usize,
    pub failures: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct IndexReport {
    pub sources: Vec<SourceReport>,
    pub releases: Vec<Release>,
    pub failures: Vec<FailureRecord>,
}

enum Indexed {
    Fresh(SourceCache),
    Staged(SourceCache, StagedIndex, StaleReason),
}

/// Download remote sources that are not cached yet
pub async fn sync(library: &mut Library) -> Result<()> {
    let client = reqwest::Client::builder()
        .user_agent(concat!("relic/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to create HTTP client")?;
    for source in &mut library.sources {
        source
            .sync(&client)
            .await
            .with_context(|| format!("Failed to sync source '{}'", source.name))?;
    }
    info!(sources = library.sources.len(), "Sync complete");
    Ok(())
}

/// Gateway running the library's configured decoder tools
///
/// Must be called from within a tokio runtime.
pub fn process_gateway(library: &Library) -> Result<Arc<dyn DecoderGateway>> {
    let handle = tokio::runtime::Handle::try_current().context("Decoder gateway needs a tokio runtime")?;
    Ok(Arc::new(ProcessGateway::new(
        library.indexer.interpreter.clone(),
        library.indexer.tools_directory.clone(),
        library.indexer.decoder_timeout(),
        handle,
    )))
}

/// Index every source, reusing caches of unchanged sources
pub async fn index(
    library: &Library,
    gateway: Arc<dyn DecoderGateway>,
    options: &IndexOptions,
) -> Result<IndexReport> {
    let jobs = options
        .jobs
        .filter(|jobs| *jobs > 0)
        .unwrap_or_else(|| library.indexer.worker_count());
    info!(sources = library.sources.len(), jobs, "Indexing library");
    for source in &library.sources {
        if !source.path.exists() {
            bail!(
                "Source '{}' is missing at {}; run sync first",
                source.name,
                source.path.display()
            );
        }
    }

    let store = Arc::new(ContentStore::open(library.store_directory())?);
    let scratch = library.intermediates_directory.join(SCRATCH_DIRECTORY);
    std::fs::create_dir_all(&scratch)
        .with_context(|| format!("Failed to create scratch directory {}", scratch.display()))?;

    let semaphore = Arc::new(Semaphore::new(jobs));
    let shared = Arc::new(library.clone());
    let options = Arc::new(options.clone());
    let workers = (0..library.sources.len()).map(|position| {
        let semaphore = Arc::clone(&semaphore);
        let library = Arc::clone(&shared);
        let gateway = Arc::clone(&gateway);
        let store = Arc::clone(&store);
        let options = Arc::clone(&options);
        async move {
            let _permit = semaphore.acquire_owned().await.context("Worker pool closed")?;
            tokio::task::spawn_blocking(move || {
                index_source(&library, &library.sources[position], gateway.as_ref(), &store, &options)
            })
            .await
            .context("Source worker panicked")?
        }
    });
    let outcomes = join_all(workers).await;

    merge(library, outcomes)
}

fn index_source(
    library: &Library,
    source: &Source,
    gateway: &dyn DecoderGateway,
    store: &ContentStore,
    options: &IndexOptions,
) -> Result<Indexed> {
    let hash = hash_tree(&source.path)
        .with_context(|| format!("Failed to hash source {}", source.path.display()))?;
    let current = Manifest::current(source.identifier.clone(), hash);
    let cache = SourceCache::for_source(&library.sources_cache_directory(), &source.identifier);

    let state = if options.force {
        CacheState::Stale(StaleReason::Forced)
    } else {
        cache.state(&current)
    };
    let reason = match state {
        CacheState::Fresh => {
            info!(source = %source.name, "Source unchanged");
            return Ok(Indexed::Fresh(cache));
        }
        CacheState::Stale(reason) => reason,
    };
    info!(source = %source.name, ?reason, "Indexing source");

    let scratch = library.intermediates_directory.join(SCRATCH_DIRECTORY);
    let staging = tempfile::Builder::new()
        .prefix("relic-source-")
        .tempdir_in(&scratch)?;
    let work = tempfile::Builder::new().prefix("relic-work-").tempdir_in(&scratch)?;

    let sink = match &options.copy_failures {
        Some(directory) => FailureCollector::with_copy_directory(directory),
        None => FailureCollector::new(),
    };
    let descriptions = DescriptionIndex::load(source_directory(&source.path), &source.descriptions);
    let builder = ReleaseBuilder {
        gateway,
        store,
        sink: &sink,
        rules: &library.rules,
        descriptions: &descriptions,
        scratch: work.path(),
    };

    let releases: Vec<Release> = builder
        .build_source(&source.path, Reference::new())
        .into_iter()
        .map(|release| Release {
            reference: source.resolve_reference(release.reference.clone()),
            ..release
        })
        .collect();
    info!(source = %source.name, releases = releases.len(), failures = sink.len(), "Indexed source");

    let staged = StagedIndex::stage(staging, current, releases, sink.records())?;
    Ok(Indexed::Staged(cache, staged, reason))
}

fn source_directory(path: &Path) -> &Path {
    if path.is_dir() {
        path
    } else {
        path.parent().unwrap_or(path)
    }
}

/// Commit worker outcomes in source order
///
/// A source whose worker failed contributes no releases; its previous cache
/// is left in place and the error is recorded as a failure of the source.
fn merge(library: &Library, outcomes: Vec<Result<Indexed>>) -> Result<IndexReport> {
    let icons = library.intermediates_directory.join(ICONS_DIRECTORY);
    if icons.exists() {
        std::fs::remove_dir_all(&icons)
            .with_context(|| format!("Failed to clear {}", icons.display()))?;
    }
    std::fs::create_dir_all(&icons)?;

    let collected = FailureCollector::new();
    let mut releases = Vec::new();
    let mut reports = Vec::new();
    for (source, outcome) in library.sources.iter().zip(outcomes) {
        let (cache, state, source_releases, source_failures) = match outcome {
            Err(e) => {
                let message = format!("{e:#}");
                error!(source = %source.name, error = %message, "Failed to index source");
                collected.extend([FailureRecord {
                    sha256: None,
                    path: source.path.display().to_string(),
                    kind: SOURCE_FAILURE_KIND.to_string(),
                    message: message.clone(),
                }]);
                reports.push(SourceReport {
                    identifier: source.identifier.clone(),
                    name: source.name.clone(),
                    state: None,
                    releases: 0,
                    failures: 1,
                    error: Some(message),
                });
                continue;
            }
            Ok(Indexed::Fresh(cache)) => {
                let loaded = cache.load_releases()?;
                let loaded_failures = cache.load_failures()?;
                (cache, CacheState::Fresh, loaded, loaded_failures)
            }
            Ok(Indexed::Staged(cache, staged, reason)) => {
                cache.commit(&staged)?;
                debug!(source = %source.name, cache = %cache.directory().display(), "Replaced source cache");
                (cache, CacheState::Stale(reason), staged.releases, staged.failures)
            }
        };
        merge_icons(&cache.icons_directory(), &icons)?;
        reports.push(SourceReport {
            identifier: source.identifier.clone(),
            name: source.name.clone(),
            state: Some(state),
            releases: source_releases.len(),
            failures: source_failures.len(),
            error: None,
        });
        collected.extend(source_failures);
        releases.extend(source_releases);
    }

    write_json_pretty(&library.intermediates_directory.join(RELEASES_FILE), &releases)?;
    let failures = collected.records();
    failures::write_report(&library.intermediates_directory.join(FAILURES_FILE), &failures)?;
    info!(releases = releases.len(), failures = failures.len(), "Index complete");

    Ok(IndexReport {
        sources: reports,
        releases,
        failures,
    })
}

/// Copy icons not yet present in `destination`
fn merge_icons(source: &Path, destination: &Path) -> Result<()> {
    if !source.is_dir() {
        return Ok(());
    }
    for entry in std::fs::read_dir(source)? {
        let entry = entry?;
        let target = destination.join(entry.file_name());
        if !target.exists() {
            std::fs::copy(entry.path(), &target)
                .with_context(|| format!("Failed to copy icon {}", entry.path().display()))?;
        }
    }
    Ok(())
}

fn load_releases(library: &Library) -> Result<Vec<Release>> {
    let path = library.intermediates_directory.join(RELEASES_FILE);
    if !path.exists() {
        bail!("No releases at {}; run index first", path.display());
    }
    read_json(&path)
}

/// Aggregate indexed releases and write the index directory
pub fn group(library: &Library) -> Result<Catalog> {
    let releases = load_releases(library)?;
    let catalog = aggregate(&releases);

    let mut sources = library.sources.clone();
    for source in &mut sources {
        source.load_metadata()?;
    }
    let sources: Vec<SourceSummary> = sources.iter().map(Source::summary).collect();

    let index = &library.index_directory;
    write_json_pretty(&index.join("programs.json"), &catalog.programs)?;
    write_json_pretty(&index.join("summary.json"), &catalog.summary)?;
    write_json_pretty(&index.join("sources.json"), &sources)?;
    write_json_pretty(&index.join("groups.json"), &catalog.groups)?;
    replace_tree(
        &library.intermediates_directory.join(ICONS_DIRECTORY),
        &index.join(ICONS_DIRECTORY),
    )?;

    info!(
        programs = catalog.programs.len(),
        releases = catalog.summary.installer_count,
        "Grouped catalog"
    );
    Ok(catalog)
}

/// Merge overlays onto the index and publish the output directory
pub fn overlay(library: &Library) -> Result<()> {
    let index = &library.index_directory;
    let mut programs: Vec<Value> = read_json(&index.join("programs.json")).context("Run group first")?;
    let groups: Vec<GroupEntry> = read_json(&index.join("groups.json"))?;
    let sources: Value = read_json(&index.join("sources.json"))?;
    let summary: Value = read_json(&index.join("summary.json"))?;

    let output = &library.output_directory;
    let screenshots = output.join(SCREENSHOTS_DIRECTORY);
    if screenshots.exists() {
        std::fs::remove_dir_all(&screenshots)
            .with_context(|| format!("Failed to clear {}", screenshots.display()))?;
    }

    let overlay = Overlay::load(&library.overlay_directories)?;
    overlay.apply(&mut programs, output)?;
    let groups = overlay.apply_groups(groups);

    let documents = [
        Value::Array(programs),
        sources,
        summary,
        serde_json::to_value(&groups)?,
    ];
    let data = output.join("_data");
    let api = output.join("api").join("v1");
    for (name, document) in PUBLISHED_FILES.iter().zip(&documents) {
        write_json(&data.join(format!("{name}.json")), document)?;
        write_json(&api.join(name).join("index.json"), document)?;
    }

    let icons = index.join(ICONS_DIRECTORY);
    replace_tree(&icons, &output.join(ICONS_DIRECTORY))?;
    replace_tree(&icons, &api.join(ICONS_DIRECTORY))?;
    replace_tree(&screenshots, &api.join(SCREENSHOTS_DIRECTORY))?;

    info!(output = %output.display(), overlay_entries = overlay.len(), "Published catalog");
    Ok(())
}

/// Every indexed release whose file name is `filename`
pub fn search(library: &Library, filename: &str) -> Result<Vec<Release>> {
    let releases = load_releases(library)?;
    Ok(releases_named(&releases, filename).into_iter().cloned().collect())
}
