//! Free-text metadata found next to assets

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, warn};

use crate::walker::find_sibling;

const README_NAME: &str = "readme.txt";

static DESCRIPTION_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\S+)\s+(\d{2}/\d{2}/\d{2})\s+(.+)$").expect("valid description pattern")
});

/// Decode legacy text: UTF-8 when valid, otherwise Windows-1252
pub fn decode_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => encoding_rs::WINDOWS_1252.decode(bytes).0.into_owned(),
    }
}

/// Contents of a `readme.txt` next to `path`, if present
pub fn readme_for(path: &Path) -> Option<String> {
    let readme = find_sibling(path, README_NAME)?;
    match std::fs::read(&readme) {
        Ok(bytes) => Some(decode_text(&bytes)),
        Err(e) => {
            warn!(path = %readme.display(), error = %e, "Failed to read readme");
            None
        }
    }
}

/// Directory descriptions from library index listings
///
/// Each listing line reads `<directory> <dd/mm/yy> <description>`; a listing
/// at `library/games.htm` describes directories below `library/games`.
#[derive(Debug, Default, Clone)]
pub struct DescriptionIndex {
    descriptions: HashMap<String, String>,
}

impl DescriptionIndex {
    /// Parse listings given relative to `root`; unreadable listings are skipped
    pub fn load(root: &Path, listings: &[String]) -> Self {
        let mut descriptions = HashMap::new();
        for listing in listings {
            let path = root.join(listing);
            let bytes = match std::fs::read(&path) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to read description listing");
                    continue;
                }
            };
            let directory = Path::new(listing).with_extension("");
            for line in decode_text(&bytes).lines() {
                let Some(captures) = DESCRIPTION_LINE.captures(line.trim_end()) else {
                    continue;
                };
                let described = directory.join(&captures[1]);
                if !root.join(&described).exists() {
                    debug!(path = %described.display(), "Description refers to missing directory");
                }
                descriptions.insert(normalize(&described.to_string_lossy()), captures[3].to_string());
            }
        }
        Self { descriptions }
    }

    pub fn len(&self) -> usize {
        self.descriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptions.is_empty()
    }

    /// Description of the nearest described directory enclosing `relative_path`
    pub fn summary_for(&self, relative_path: &str) -> Option<String> {
        let mut directory = Path::new(relative_path).parent();
        while let Some(current) = directory {
            if current.as_os_str().is_empty() {
                break;
            }
            if let Some(description) = self.descriptions.get(&normalize(&current.to_string_lossy())) {
                return Some(description.clone());
            }
            directory = current.parent();
        }
        None
    }
}

fn normalize(path: &str) -> String {
    path.replace('\\', "/").to_lowercase()
}
