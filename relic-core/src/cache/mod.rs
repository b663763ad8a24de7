//! Per-source incremental cache
//!
//! Each source owns a directory under `<intermediates>/sources/`, named by
//! the hash of its identifier, holding `releases.json`, `failures.json`, an
//! `icons/` directory and `manifest.json`. The manifest is removed before
//! anything else is replaced and written last, so an interrupted commit
//! leaves the source stale.

mod manifest;

pub use manifest::{Manifest, INDEXER_VERSION};

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::failures::{self, FailureRecord};
use crate::model::Release;
use crate::output::{read_json, replace_tree, write_atomic, write_json_pretty};
use crate::store::hash_bytes;

const MANIFEST_FILE: &str = "manifest.json";
const RELEASES_FILE: &str = "releases.json";
const FAILURES_FILE: &str = "failures.json";
const ICONS_DIRECTORY: &str = "icons";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleReason {
    Missing,
    SourceChanged,
    IndexerChanged,
    Unreadable,
    Forced,
}

/// Observable cache state of one source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    Fresh,
    Stale(StaleReason),
}

/// Cache directory of one source
#[derive(Debug, Clone)]
pub struct SourceCache {
    directory: PathBuf,
}

impl SourceCache {
    pub fn for_source(cache_root: &Path, identifier: &str) -> Self {
        Self {
            directory: cache_root.join(hash_bytes(identifier.as_bytes())),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.directory.join(MANIFEST_FILE)
    }

    pub fn releases_path(&self) -> PathBuf {
        self.directory.join(RELEASES_FILE)
    }

    pub fn icons_directory(&self) -> PathBuf {
        self.directory.join(ICONS_DIRECTORY)
    }

    pub fn failures_path(&self) -> PathBuf {
        self.directory.join(FAILURES_FILE)
    }

    /// Compare the persisted manifest against the current one
    pub fn state(&self, current: &Manifest) -> CacheState {
        let persisted = match Manifest::load_from_path(&self.manifest_path()) {
            Ok(Some(manifest)) => manifest,
            Ok(None) => return CacheState::Stale(StaleReason::Missing),
            Err(e) => {
                debug!(error = %e, "Treating unreadable manifest as stale");
                return CacheState::Stale(StaleReason::Unreadable);
            }
        };
        if persisted.indexer_version != current.indexer_version {
            return CacheState::Stale(StaleReason::IndexerChanged);
        }
        if !persisted.matches(current) {
            return CacheState::Stale(StaleReason::SourceChanged);
        }
        if !self.releases_path().is_file() {
            return CacheState::Stale(StaleReason::Unreadable);
        }
        CacheState::Fresh
    }

    pub fn load_releases(&self) -> Result<Vec<Release>> {
        read_json(&self.releases_path())
    }

    pub fn load_failures(&self) -> Result<Vec<FailureRecord>> {
        failures::load_report(&self.failures_path())
    }

    /// Move a staged index into place, writing the manifest last
    pub fn commit(&self, staged: &StagedIndex) -> Result<()> {
        std::fs::create_dir_all(&self.directory)
            .with_context(|| format!("Failed to create cache directory {}", self.directory.display()))?;

        let manifest_path = self.manifest_path();
        if manifest_path.exists() {
            std::fs::remove_file(&manifest_path)
                .with_context(|| format!("Failed to invalidate {}", manifest_path.display()))?;
        }

        let releases = std::fs::read(staged.releases_path())
            .context("Failed to read staged releases")?;
        write_atomic(&self.releases_path(), &releases)?;
        let failures = std::fs::read(staged.failures_path()).context("Failed to read staged failures")?;
        write_atomic(&self.failures_path(), &failures)?;
        replace_tree(&staged.icons_directory(), &self.icons_directory())?;

        staged.manifest.save_to_path(&manifest_path)?;
        info!(source = %staged.manifest.identifier, releases = staged.releases.len(), "Committed source index");
        Ok(())
    }
}

/// Fresh index output of one source, held in a worker's private directory
#[derive(Debug)]
pub struct StagedIndex {
    pub manifest: Manifest,
    pub releases: Vec<Release>,
    pub failures: Vec<FailureRecord>,
    directory: tempfile::TempDir,
}

impl StagedIndex {
    /// Serialize releases, failures and icon bitmaps into `directory`
    pub fn stage(
        directory: tempfile::TempDir,
        manifest: Manifest,
        releases: Vec<Release>,
        failures: Vec<FailureRecord>,
    ) -> Result<Self> {
        let staged = Self {
            manifest,
            releases,
            failures,
            directory,
        };

        let icons = staged.icons_directory();
        std::fs::create_dir_all(&icons)?;
        for icon in staged.releases.iter().flat_map(|r| r.icons.iter()) {
            let path = icons.join(icon.filename());
            if icon.bytes.is_empty() {
                warn!(icon = %icon.content_hash, "Icon has no bitmap data");
                continue;
            }
            if !path.exists() {
                std::fs::write(&path, &icon.bytes)
                    .with_context(|| format!("Failed to write icon {}", path.display()))?;
            }
        }

        write_json_pretty(&staged.releases_path(), &staged.releases)?;
        write_json_pretty(&staged.failures_path(), &staged.failures)?;
        Ok(staged)
    }

    fn releases_path(&self) -> PathBuf {
        self.directory.path().join(RELEASES_FILE)
    }

    fn failures_path(&self) -> PathBuf {
        self.directory.path().join(FAILURES_FILE)
    }

    fn icons_directory(&self) -> PathBuf {
        self.directory.path().join(ICONS_DIRECTORY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Icon, Reference, ReleaseKind};
    use pretty_assertions::assert_eq;
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    fn release(icon_bytes: &[u8]) -> Release {
        Release {
            filename: "chess.sis".to_string(),
            size: 3,
            reference: Reference::new(),
            kind: ReleaseKind::Installer,
            uid: "0x10000001".to_string(),
            content_hash: "aa".to_string(),
            name: "Chess".to_string(),
            version: Some("1.00".to_string()),
            icons: vec![Icon {
                width: 24,
                height: 24,
                bit_depth: 2,
                content_hash: hash_bytes(icon_bytes),
                bytes: icon_bytes.to_vec(),
            }],
            tags: BTreeSet::new(),
            summary: None,
            readme: None,
        }
    }

    #[test]
    fn test_state_transitions() {
        let dir = TempDir::new().unwrap();
        let cache = SourceCache::for_source(dir.path(), "local/psion");
        let current = Manifest::current("local/psion", "hash-1");
        assert_eq!(cache.state(&current), CacheState::Stale(StaleReason::Missing));

        let staged = StagedIndex::stage(TempDir::new().unwrap(), current.clone(), vec![release(b"bmp")], vec![]).unwrap();
        cache.commit(&staged).unwrap();
        assert_eq!(cache.state(&current), CacheState::Fresh);

        let changed = Manifest::current("local/psion", "hash-2");
        assert_eq!(cache.state(&changed), CacheState::Stale(StaleReason::SourceChanged));

        let bumped = Manifest {
            indexer_version: INDEXER_VERSION + 1,
            ..current.clone()
        };
        assert_eq!(cache.state(&bumped), CacheState::Stale(StaleReason::IndexerChanged));
    }

    #[test]
    fn test_commit_writes_releases_and_icons() {
        let dir = TempDir::new().unwrap();
        let cache = SourceCache::for_source(dir.path(), "local/psion");
        let staged = StagedIndex::stage(
            TempDir::new().unwrap(),
            Manifest::current("local/psion", "h"),
            vec![release(b"bmp")],
            vec![],
        )
        .unwrap();
        cache.commit(&staged).unwrap();

        let loaded = cache.load_releases().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].name, "Chess");
        let icon_path = cache.icons_directory().join(format!("{}.bmp", hash_bytes(b"bmp")));
        assert_eq!(std::fs::read(icon_path).unwrap(), b"bmp");
        assert!(cache.load_failures().unwrap().is_empty());
    }

    #[test]
    fn test_missing_releases_is_stale_even_with_manifest() {
        let dir = TempDir::new().unwrap();
        let cache = SourceCache::for_source(dir.path(), "s");
        let current = Manifest::current("s", "h");
        std::fs::create_dir_all(cache.directory()).unwrap();
        current.save_to_path(&cache.manifest_path()).unwrap();

        assert_eq!(cache.state(&current), CacheState::Stale(StaleReason::Unreadable));
    }

    #[test]
    fn test_corrupt_manifest_is_stale() {
        let dir = TempDir::new().unwrap();
        let cache = SourceCache::for_source(dir.path(), "s");
        std::fs::create_dir_all(cache.directory()).unwrap();
        std::fs::write(cache.manifest_path(), b"{ truncated").unwrap();

        assert_eq!(
            cache.state(&Manifest::current("s", "h")),
            CacheState::Stale(StaleReason::Unreadable)
        );
    }
}
