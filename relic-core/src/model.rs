//! Catalog records shared by every stage of the pipeline

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// One hop on the way from a source root to a leaf file
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReferenceItem {
    /// Path of the container, relative to the level that holds it
    pub name: String,
    /// Where the item can be fetched from, when known
    #[serde(default)]
    pub url: Option<String>,
}

impl ReferenceItem {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: None,
        }
    }
}

/// Ordered chain of containers traversed to reach an asset
///
/// Cheap to clone and never mutated in place; extending a reference returns a
/// new value so sibling branches of a walk never observe each other.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Reference(Vec<ReferenceItem>);

impl Reference {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn join(&self, item: ReferenceItem) -> Self {
        let mut items = self.0.clone();
        items.push(item);
        Self(items)
    }

    pub fn items(&self) -> &[ReferenceItem] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Rewrite item URLs, leaving names untouched
    pub fn map_items(self, f: impl FnMut((usize, ReferenceItem)) -> ReferenceItem) -> Self {
        Self(self.0.into_iter().enumerate().map(f).collect())
    }
}

impl From<Vec<ReferenceItem>> for Reference {
    fn from(items: Vec<ReferenceItem>) -> Self {
        Self(items)
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, item) in self.0.iter().enumerate() {
            if index > 0 {
                f.write_str(" -> ")?;
            }
            f.write_str(&item.name)?;
        }
        Ok(())
    }
}

/// A leaf file produced by the walker
#[derive(Debug, Clone)]
pub struct Asset {
    /// Location on disk, possibly inside a staging directory
    pub path: std::path::PathBuf,
    /// Containers traversed to reach the file
    pub reference: Reference,
    /// Path relative to the innermost container (or the source root)
    pub filename: String,
}

/// Icon bitmap decoded from a metadata resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Icon {
    pub width: u32,
    pub height: u32,
    #[serde(rename = "bpp")]
    pub bit_depth: u32,
    #[serde(rename = "sha256")]
    pub content_hash: String,
    /// Raw bitmap; persisted to the icons directory, not into JSON
    #[serde(skip)]
    pub bytes: Vec<u8>,
}

impl Icon {
    pub fn filename(&self) -> String {
        format!("{}.bmp", self.content_hash)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseKind {
    Installer,
    Standalone,
}

impl fmt::Display for ReleaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReleaseKind::Installer => f.write_str("installer"),
            ReleaseKind::Standalone => f.write_str("standalone"),
        }
    }
}

/// The unit of cataloged software
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    pub filename: String,
    pub size: u64,
    pub reference: Reference,
    pub kind: ReleaseKind,
    pub uid: String,
    #[serde(rename = "sha256")]
    pub content_hash: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub icons: Vec<Icon>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readme: Option<String>,
}

/// Relative path used for icons in published files
pub fn icon_path(icon: &Icon) -> String {
    format!("icons/{}", icon.filename())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_reference_join_leaves_parent_untouched() {
        let root = Reference::new().join(ReferenceItem::new("outer.zip"));
        let child = root.join(ReferenceItem::new("inner.zip"));

        assert_eq!(root.len(), 1);
        assert_eq!(child.len(), 2);
        assert_eq!(child.to_string(), "outer.zip -> inner.zip");
    }

    #[test]
    fn test_release_json_shape() {
        let release = Release {
            filename: "Games/Chess.sis".to_string(),
            size: 10,
            reference: Reference::new().join(ReferenceItem::new("games.zip")),
            kind: ReleaseKind::Installer,
            uid: "0x10000001".to_string(),
            content_hash: "ab".repeat(32),
            name: "Chess".to_string(),
            version: Some("1.0".to_string()),
            icons: vec![],
            tags: BTreeSet::from(["epoc32".to_string()]),
            summary: None,
            readme: None,
        };

        let value = serde_json::to_value(&release).unwrap();
        assert_eq!(value["kind"], "installer");
        assert_eq!(value["sha256"], "ab".repeat(32));
        assert_eq!(value["reference"][0]["name"], "games.zip");
        assert!(value.get("summary").is_none());

        let parsed: Release = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, release);
    }
}
