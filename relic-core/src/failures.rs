//! Error sink for per-asset failures
//!
//! Failures are keyed by the content hash of the offending file so the same
//! bytes reached through several references are reported once.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

use crate::error::IndexError;
use crate::store::hash_file;

/// Receives classified failures from the release builder
pub trait ErrorSink: Send + Sync {
    fn record(&self, error: IndexError);
}

/// One reported failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureRecord {
    /// SHA-256 of the offending file, when it could be read
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    pub path: String,
    pub kind: String,
    pub message: String,
}

impl FailureRecord {
    fn key(&self) -> String {
        match &self.sha256 {
            Some(hash) => hash.clone(),
            None => format!("path:{}", self.path),
        }
    }
}

/// Collects failures in memory, optionally copying failing files for triage
#[derive(Debug, Default)]
pub struct FailureCollector {
    records: Mutex<BTreeMap<String, FailureRecord>>,
    copy_directory: Option<PathBuf>,
}

impl FailureCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy each failing file into `<directory>/<sha256>/` alongside an `error.txt`
    pub fn with_copy_directory(directory: impl Into<PathBuf>) -> Self {
        Self {
            records: Mutex::default(),
            copy_directory: Some(directory.into()),
        }
    }

    /// Fold previously reported failures into this collector
    pub fn extend(&self, records: impl IntoIterator<Item = FailureRecord>) {
        let mut guard = self.records.lock().unwrap_or_else(|e| e.into_inner());
        for record in records {
            guard.entry(record.key()).or_insert(record);
        }
    }

    /// All failures, ordered by key
    pub fn records(&self) -> Vec<FailureRecord> {
        let guard = self.records.lock().unwrap_or_else(|e| e.into_inner());
        guard.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn copy_for_triage(&self, record: &FailureRecord, source: &Path) -> std::io::Result<()> {
        let (Some(directory), Some(hash)) = (&self.copy_directory, &record.sha256) else {
            return Ok(());
        };
        let destination = directory.join(hash);
        std::fs::create_dir_all(&destination)?;
        if let Some(name) = source.file_name() {
            std::fs::copy(source, destination.join(name))?;
        }
        std::fs::write(
            destination.join("error.txt"),
            format!("{}\n{}\n", record.path, record.message),
        )
    }
}

impl ErrorSink for FailureCollector {
    fn record(&self, error: IndexError) {
        let path = error.path().to_path_buf();
        let record = FailureRecord {
            sha256: hash_file(&path).ok(),
            path: path.display().to_string(),
            kind: error.kind().to_string(),
            message: error.detailed(),
        };

        let key = record.key();
        {
            let mut guard = self.records.lock().unwrap_or_else(|e| e.into_inner());
            if guard.contains_key(&key) {
                debug!(key = %key, "Failure already recorded");
                return;
            }
            guard.insert(key, record.clone());
        }

        warn!(path = %record.path, kind = %record.kind, "{}", record.message);
        if let Err(e) = self.copy_for_triage(&record, &path) {
            warn!(path = %record.path, error = %e, "Failed to copy failing file");
        }
    }
}

/// Load failures written by [`write_report`]
pub fn load_report(path: &Path) -> Result<Vec<FailureRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read(path)
        .with_context(|| format!("Failed to read failure report {}", path.display()))?;
    serde_json::from_slice(&content)
        .with_context(|| format!("Failed to parse failure report {}", path.display()))
}

pub fn write_report(path: &Path, records: &[FailureRecord]) -> Result<()> {
    crate::output::write_json_pretty(path, records)
}
