//! Content-addressed blob storage
//!
//! Blobs live in one flat directory, named by the hex SHA-256 of their bytes.
//! Writes are write-if-absent, so concurrent workers storing the same bytes
//! race harmlessly.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing::debug;

const CHUNK_SIZE: usize = 64 * 1024;

/// Hash a file's contents with SHA-256, streaming fixed-size chunks
pub fn hash_file(path: &Path) -> io::Result<String> {
    let file = File::open(path)?;
    hash_reader(file)
}

/// Hash everything a reader yields
pub fn hash_reader(mut reader: impl Read) -> io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Hash a whole tree: sorted relative paths followed by their contents
///
/// Any added, removed, renamed or modified file changes the result. A plain
/// file hashes as a tree holding just that file.
pub fn hash_tree(root: &Path) -> io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];
    let base = if root.is_dir() {
        root
    } else {
        root.parent().unwrap_or(root)
    };

    for entry in walkdir::WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(io::Error::other)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(base).unwrap_or(entry.path());
        hasher.update(relative.to_string_lossy().as_bytes());
        hasher.update([0u8]);
        hasher.update(entry.metadata().map_err(io::Error::other)?.len().to_le_bytes());

        let mut file = File::open(entry.path())?;
        loop {
            let bytes_read = file.read(&mut buffer)?;
            if bytes_read == 0 {
                break;
            }
            hasher.update(&buffer[..bytes_read]);
        }
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Hash an in-memory buffer
pub fn hash_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Flat directory of blobs keyed by content hash
#[derive(Debug, Clone)]
pub struct ContentStore {
    root: PathBuf,
}

impl ContentStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create content store at {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, content_hash: &str) -> PathBuf {
        self.root.join(content_hash)
    }

    pub fn contains(&self, content_hash: &str) -> bool {
        self.path_for(content_hash).is_file()
    }

    /// Store the file at `source` under `content_hash` unless already present
    ///
    /// Returns `true` when a new blob was written.
    pub fn put_file(&self, source: &Path, content_hash: &str) -> io::Result<bool> {
        if self.contains(content_hash) {
            return Ok(false);
        }

        let mut temp = tempfile::NamedTempFile::new_in(&self.root)?;
        io::copy(&mut File::open(source)?, temp.as_file_mut())?;
        temp.as_file().sync_all()?;
        self.persist(temp, content_hash)
    }

    /// Store an in-memory buffer under its own hash
    pub fn put_bytes(&self, bytes: &[u8]) -> io::Result<String> {
        let content_hash = hash_bytes(bytes);
        if !self.contains(&content_hash) {
            let mut temp = tempfile::NamedTempFile::new_in(&self.root)?;
            io::Write::write_all(temp.as_file_mut(), bytes)?;
            temp.as_file().sync_all()?;
            self.persist(temp, &content_hash)?;
        }
        Ok(content_hash)
    }

    pub fn open_blob(&self, content_hash: &str) -> io::Result<File> {
        File::open(self.path_for(content_hash))
    }

    fn persist(&self, temp: tempfile::NamedTempFile, content_hash: &str) -> io::Result<bool> {
        match temp.persist_noclobber(self.path_for(content_hash)) {
            Ok(_) => {
                debug!(hash = content_hash, "Stored blob");
                Ok(true)
            }
            // Another worker stored the same bytes first.
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.error),
        }
    }
}
