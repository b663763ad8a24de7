//! Curated overlay data merged onto the generated catalog
//!
//! An overlay directory holds one subdirectory per program uid with `*.png`
//! screenshots and an optional `index.md`. Front matter keys become program
//! fields and the body becomes its `description`. An entry whose front
//! matter lists `ids` defines a manual group of programs.

mod frontmatter;

pub use frontmatter::{parse_document, Document};

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::aggregate::GroupEntry;

const INDEX_DOCUMENT: &str = "index.md";
const SCREENSHOT_EXTENSION: &str = "png";
pub const SCREENSHOTS_DIRECTORY: &str = "screenshots";

#[derive(Debug, Clone, Default)]
pub struct OverlayEntry {
    pub fields: Map<String, Value>,
    pub description: Option<String>,
    /// Screenshots keyed (and therefore ordered) by file name
    pub screenshots: BTreeMap<String, PathBuf>,
}

impl OverlayEntry {
    fn group_ids(&self) -> Option<Vec<String>> {
        let ids = self.fields.get("ids")?.as_array()?;
        Some(
            ids.iter()
                .filter_map(|id| match id {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .collect(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Screenshot {
    pub width: u32,
    pub height: u32,
    pub path: String,
}

/// Overlay entries from every configured directory, keyed by uid
#[derive(Debug, Clone, Default)]
pub struct Overlay {
    entries: BTreeMap<String, OverlayEntry>,
}

impl Overlay {
    /// Read overlay directories in order; later directories win on field collisions
    pub fn load(directories: &[PathBuf]) -> Result<Self> {
        let mut entries: BTreeMap<String, OverlayEntry> = BTreeMap::new();
        for directory in directories {
            if !directory.is_dir() {
                warn!(path = %directory.display(), "Overlay directory does not exist");
                continue;
            }
            let listing = std::fs::read_dir(directory)
                .with_context(|| format!("Failed to read overlay directory {}", directory.display()))?;
            for item in listing {
                let item = item?;
                let identifier = item.file_name().to_string_lossy().into_owned();
                if identifier.starts_with('.') || !item.path().is_dir() {
                    continue;
                }
                let entry = entries.entry(identifier).or_default();
                merge_entry_directory(entry, &item.path())?;
            }
        }
        debug!(entries = entries.len(), "Loaded overlay");
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, uid: &str) -> Option<&OverlayEntry> {
        self.entries.get(uid)
    }

    /// Merge entries into `programs`, copying screenshots below `output_directory`
    ///
    /// Programs without an entry are returned untouched; entries matching no
    /// program are ignored.
    pub fn apply(&self, programs: &mut [Value], output_directory: &Path) -> Result<()> {
        let mut matched = 0;
        for program in programs.iter_mut() {
            let Some(object) = program.as_object_mut() else {
                continue;
            };
            let Some(uid) = object.get("uid").and_then(Value::as_str).map(str::to_string) else {
                continue;
            };
            let Some(entry) = self.entries.get(&uid) else {
                continue;
            };
            matched += 1;

            for (key, value) in &entry.fields {
                object.insert(key.clone(), value.clone());
            }
            if let Some(description) = &entry.description {
                object.insert("description".to_string(), Value::String(description.clone()));
            }
            let screenshots = copy_screenshots(&uid, entry, output_directory)?;
            object.insert("screenshots".to_string(), serde_json::to_value(screenshots)?);
        }

        let uids: HashSet<&str> = programs
            .iter()
            .filter_map(|p| p.get("uid").and_then(Value::as_str))
            .collect();
        for uid in self.entries.keys().filter(|uid| !uids.contains(uid.as_str())) {
            debug!(uid = %uid, "Overlay entry matches no program");
        }
        info!(matched, "Applied overlay");
        Ok(())
    }

    /// Replace members of manual groups with a single group entry
    pub fn apply_groups(&self, groups: Vec<GroupEntry>) -> Vec<GroupEntry> {
        let by_uid: HashMap<&str, &GroupEntry> = groups.iter().map(|g| (g.uid.as_str(), g)).collect();
        let mut grouped = HashSet::new();
        let mut manual = Vec::new();

        for (identifier, entry) in &self.entries {
            let Some(ids) = entry.group_ids() else {
                continue;
            };
            let members: Vec<&GroupEntry> = ids.iter().filter_map(|id| by_uid.get(id.as_str()).copied()).collect();
            if members.is_empty() {
                debug!(group = %identifier, "Manual group has no cataloged members");
                continue;
            }
            grouped.extend(members.iter().map(|m| m.uid.clone()));
            manual.push(GroupEntry {
                uid: identifier.clone(),
                name: entry
                    .fields
                    .get("name")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| members[0].name.clone()),
                icon: members.iter().find_map(|m| m.icon.clone()),
                ids: members.iter().map(|m| m.uid.clone()).collect(),
            });
        }

        let mut result: Vec<GroupEntry> = groups
            .into_iter()
            .filter(|g| !grouped.contains(&g.uid))
            .chain(manual)
            .collect();
        result.sort_by(|a, b| {
            a.name
                .to_lowercase()
                .cmp(&b.name.to_lowercase())
                .then_with(|| a.uid.cmp(&b.uid))
        });
        result
    }
}

fn merge_entry_directory(entry: &mut OverlayEntry, directory: &Path) -> Result<()> {
    for item in std::fs::read_dir(directory)? {
        let path = item?.path();
        let is_screenshot = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case(SCREENSHOT_EXTENSION))
            .unwrap_or(false);
        if is_screenshot && path.is_file() {
            if let Some(name) = path.file_name() {
                entry.screenshots.insert(name.to_string_lossy().into_owned(), path.clone());
            }
        }
    }

    let index_path = directory.join(INDEX_DOCUMENT);
    if index_path.is_file() {
        let text = std::fs::read_to_string(&index_path)
            .with_context(|| format!("Failed to read {}", index_path.display()))?;
        let document = parse_document(&text);
        entry.fields.extend(document.fields);
        let body = document.body.trim();
        if !body.is_empty() {
            entry.description = Some(body.to_string());
        }
    }
    Ok(())
}

fn copy_screenshots(uid: &str, entry: &OverlayEntry, output_directory: &Path) -> Result<Vec<Screenshot>> {
    let destination_directory = output_directory.join(SCREENSHOTS_DIRECTORY).join(uid);
    std::fs::create_dir_all(&destination_directory)?;

    let mut screenshots = Vec::new();
    for (name, source) in &entry.screenshots {
        let (width, height) = match image::image_dimensions(source) {
            Ok(dimensions) => dimensions,
            Err(e) => {
                warn!(path = %source.display(), error = %e, "Skipping unreadable screenshot");
                continue;
            }
        };
        std::fs::copy(source, destination_directory.join(name))
            .with_context(|| format!("Failed to copy screenshot {}", source.display()))?;
        screenshots.push(Screenshot {
            width,
            height,
            path: format!("{SCREENSHOTS_DIRECTORY}/{uid}/{name}"),
        });
    }
    Ok(screenshots)
}
