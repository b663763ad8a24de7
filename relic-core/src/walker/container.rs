//! Container formats the walker descends into

use std::fs::{self, File};
use std::io;
use std::path::Path;
use tempfile::TempDir;
use tracing::{debug, warn};

use super::iso;
use crate::error::IndexError;

/// Closed set of extraction strategies, selected by file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    Zip,
    DiskImage,
}

impl ContainerKind {
    /// Map a path to its container strategy, if any
    pub fn for_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        match extension.as_str() {
            "zip" => Some(ContainerKind::Zip),
            "iso" | "bin" => Some(ContainerKind::DiskImage),
            _ => None,
        }
    }

    /// Extract `path` into a fresh staging directory
    ///
    /// The returned guard removes the directory when dropped. On failure the
    /// partially populated directory is removed before returning.
    pub fn extract(&self, path: &Path, staging_root: Option<&Path>) -> Result<TempDir, IndexError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("relic-staging-");
        let staging = match staging_root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
        .map_err(|e| IndexError::io(path, e))?;

        debug!(path = %path.display(), kind = ?self, "Extracting container");
        self.extract_into(path, staging.path())?;
        Ok(staging)
    }

    pub fn extract_into(&self, path: &Path, destination: &Path) -> Result<(), IndexError> {
        let failed = |reason: String| IndexError::ContainerExtraction {
            path: path.to_path_buf(),
            reason,
        };
        match self {
            ContainerKind::Zip => extract_zip(path, destination).map_err(|e| failed(e.to_string())),
            ContainerKind::DiskImage => {
                iso::extract(path, destination).map_err(|e| failed(full_message(&e)))
            }
        }
    }
}

fn full_message(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

fn extract_zip(path: &Path, destination: &Path) -> zip::result::ZipResult<()> {
    let mut archive = zip::ZipArchive::new(File::open(path)?)?;

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let Some(relative) = entry.enclosed_name() else {
            warn!(archive = %path.display(), name = entry.name(), "Skipping zip entry with unsafe name");
            continue;
        };
        let target = destination.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut output = File::create(&target)?;
        io::copy(&mut entry, &mut output)?;
    }
    Ok(())
}
