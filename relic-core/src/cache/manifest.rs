//! Per-source cache validity record (`manifest.json`)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Schema version of cached releases
///
/// Bump whenever the release shape or decode semantics change; every cached
/// source is then re-indexed.
pub const INDEXER_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub identifier: String,
    /// Content hash of the whole source tree
    pub hash: String,
    pub indexer_version: u32,
}

impl Manifest {
    pub fn current(identifier: impl Into<String>, hash: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            hash: hash.into(),
            indexer_version: INDEXER_VERSION,
        }
    }

    /// Load a manifest, `None` when it does not exist
    pub fn load_from_path(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read(path)
            .with_context(|| format!("Failed to read manifest {}", path.display()))?;
        let manifest = serde_json::from_slice(&content)
            .with_context(|| format!("Failed to parse manifest {}", path.display()))?;
        Ok(Some(manifest))
    }

    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        crate::output::write_json_pretty(path, self)
    }

    /// Exact match on source hash and schema version
    pub fn matches(&self, other: &Manifest) -> bool {
        self == other
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_manifest_json_shape() {
        let manifest = Manifest::current("local/psion", "abc");
        let value = serde_json::to_value(&manifest).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"identifier": "local/psion", "hash": "abc", "indexer_version": INDEXER_VERSION})
        );
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("manifest.json");
        assert_eq!(Manifest::load_from_path(&path).unwrap(), None);

        let manifest = Manifest::current("x", "y");
        manifest.save_to_path(&path).unwrap();
        assert_eq!(Manifest::load_from_path(&path).unwrap(), Some(manifest));
    }
}
