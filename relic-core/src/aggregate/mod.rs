//! Grouping releases into programs, versions and variants
//!
//! Aggregation is a pure function of the release set: the input order never
//! affects the output.

mod natural;

pub use natural::natural_cmp;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::builder::select_icon;
use crate::model::{icon_path, Icon, Reference, Release, ReleaseKind};

/// Version used for releases that declare none
pub const UNKNOWN_VERSION: &str = "Unknown";

/// Icon as referenced from published files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IconRef {
    pub path: String,
    pub width: u32,
    pub height: u32,
}

impl From<&Icon> for IconRef {
    fn from(icon: &Icon) -> Self {
        Self {
            path: icon_path(icon),
            width: icon.width,
            height: icon.height,
        }
    }
}

/// A release as listed inside a published program
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseEntry {
    pub filename: String,
    pub size: u64,
    pub reference: Reference,
    pub kind: ReleaseKind,
    pub sha256: String,
    pub uid: String,
    pub name: String,
    pub version: String,
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<IconRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// Byte-identical releases within one version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    /// Content hash shared by every item
    pub identifier: String,
    pub items: Vec<ReleaseEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    pub version: String,
    pub variants: Vec<Variant>,
}

/// Every release sharing one uid
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Program {
    pub uid: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readme: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<IconRef>,
    pub versions: Vec<Version>,
    pub tags: Vec<String>,
    pub kinds: Vec<ReleaseKind>,
}

/// Corpus-wide counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub installer_count: usize,
    pub uid_count: usize,
    pub version_count: usize,
    pub sha_count: usize,
}

/// Entry of the search index `groups.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupEntry {
    pub uid: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<IconRef>,
    /// Member uids, only present for curated groups
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Catalog {
    pub programs: Vec<Program>,
    pub summary: Summary,
    pub groups: Vec<GroupEntry>,
}

pub fn normalized_version(release: &Release) -> String {
    match release.version.as_deref().map(str::trim) {
        Some(version) if !version.is_empty() => version.to_string(),
        _ => UNKNOWN_VERSION.to_string(),
    }
}

/// Order of releases inside a program; its first element names the program
fn release_order(a: &Release, b: &Release) -> std::cmp::Ordering {
    a.reference
        .to_string()
        .cmp(&b.reference.to_string())
        .then_with(|| a.filename.cmp(&b.filename))
        .then_with(|| a.content_hash.cmp(&b.content_hash))
        .then_with(|| a.reference.cmp(&b.reference))
        .then_with(|| a.name.cmp(&b.name))
        .then_with(|| a.version.cmp(&b.version))
}

fn entry(release: &Release) -> ReleaseEntry {
    ReleaseEntry {
        filename: release.filename.clone(),
        size: release.size,
        reference: release.reference.clone(),
        kind: release.kind,
        sha256: release.content_hash.clone(),
        uid: release.uid.clone(),
        name: release.name.clone(),
        version: normalized_version(release),
        tags: release.tags.iter().cloned().collect(),
        icon: select_icon(&release.icons).map(IconRef::from),
        summary: release.summary.clone(),
    }
}

fn build_program(uid: &str, mut releases: Vec<&Release>) -> Program {
    releases.sort_by(|a, b| release_order(a, b));
    let first = releases[0];

    let mut by_version: BTreeMap<String, Vec<&Release>> = BTreeMap::new();
    for release in &releases {
        by_version.entry(normalized_version(release)).or_default().push(*release);
    }
    let mut versions: Vec<Version> = by_version
        .into_iter()
        .map(|(version, members)| {
            let mut by_hash: BTreeMap<&str, Vec<ReleaseEntry>> = BTreeMap::new();
            for release in members {
                by_hash.entry(&release.content_hash).or_default().push(entry(release));
            }
            Version {
                version,
                variants: by_hash
                    .into_iter()
                    .map(|(identifier, items)| Variant {
                        identifier: identifier.to_string(),
                        items,
                    })
                    .collect(),
            }
        })
        .collect();
    versions.sort_by(|a, b| natural_cmp(&a.version, &b.version));

    let tags: BTreeSet<&String> = releases.iter().flat_map(|r| r.tags.iter()).collect();
    let kinds: BTreeSet<ReleaseKind> = releases.iter().map(|r| r.kind).collect();

    Program {
        uid: uid.to_string(),
        name: first.name.clone(),
        summary: first.summary.clone(),
        readme: releases.iter().find_map(|r| r.readme.clone()),
        icon: select_icon(&first.icons).map(IconRef::from),
        versions,
        tags: tags.into_iter().cloned().collect(),
        kinds: kinds.into_iter().collect(),
    }
}

pub fn summarize(releases: &[Release]) -> Summary {
    let uids: HashSet<&str> = releases.iter().map(|r| r.uid.as_str()).collect();
    let versions: HashSet<(&str, String)> = releases
        .iter()
        .map(|r| (r.uid.as_str(), normalized_version(r)))
        .collect();
    let hashes: HashSet<&str> = releases.iter().map(|r| r.content_hash.as_str()).collect();
    Summary {
        installer_count: releases.len(),
        uid_count: uids.len(),
        version_count: versions.len(),
        sha_count: hashes.len(),
    }
}

/// Group `releases` into the catalog
pub fn aggregate(releases: &[Release]) -> Catalog {
    let mut by_uid: BTreeMap<&str, Vec<&Release>> = BTreeMap::new();
    for release in releases {
        by_uid.entry(&release.uid).or_default().push(release);
    }

    let mut programs: Vec<Program> = by_uid
        .into_iter()
        .map(|(uid, members)| build_program(uid, members))
        .collect();
    programs.sort_by(|a, b| {
        a.name
            .to_lowercase()
            .cmp(&b.name.to_lowercase())
            .then_with(|| a.uid.cmp(&b.uid))
    });

    let groups = programs
        .iter()
        .map(|program| GroupEntry {
            uid: program.uid.clone(),
            name: program.name.clone(),
            icon: program.icon.clone(),
            ids: Vec::new(),
        })
        .collect();

    Catalog {
        summary: summarize(releases),
        programs,
        groups,
    }
}

/// Releases whose file name matches `name`, ignoring case and directories
pub fn releases_named<'a>(releases: &'a [Release], name: &str) -> Vec<&'a Release> {
    let wanted = name.to_lowercase();
    let mut found: Vec<&Release> = releases
        .iter()
        .filter(|r| {
            let filename = r.filename.rsplit('/').next().unwrap_or(&r.filename);
            filename.to_lowercase() == wanted
        })
        .collect();
    found.sort_by(|a, b| release_order(a, b));
    found
}
