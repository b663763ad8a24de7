//! Turning discovered assets into catalog releases
//!
//! Installers are decoded through the gateway and their payload is unpacked
//! into a scoped directory to find icons and tags. Standalone applications
//! fall back to a hash identity and their file stem when no metadata can be
//! resolved. Every failure is routed to the error sink.

mod describe;
mod select;
mod tags;

pub use describe::{decode_text, readme_for, DescriptionIndex};
pub use select::{format_uid, select_icon, select_name, LANGUAGE_ORDER};
pub use tags::{remap_tag, TagSet};

use std::collections::BTreeSet;
use std::path::Path;
use tracing::{debug, info};

use crate::error::IndexError;
use crate::failures::ErrorSink;
use crate::gateway::DecoderGateway;
use crate::model::{Asset, Icon, Reference, Release, ReleaseKind};
use crate::store::{hash_file, ContentStore};
use crate::walker::{find_sibling, walk};

const INSTALLER_EXTENSIONS: [&str; 1] = ["sis"];
const STANDALONE_EXTENSIONS: [&str; 2] = ["app", "opa"];
const RESOURCE_EXTENSION: &str = "aif";

/// Which assets are considered for the catalog
#[derive(Debug, Clone, Default)]
pub struct AssetRules {
    /// Exact file names to skip
    pub ignored: BTreeSet<String>,
    /// Skip any asset whose path contains one of these fragments
    pub skip_path_fragments: Vec<String>,
}

impl AssetRules {
    /// Release kind for a candidate, or `None` if the asset is not cataloged
    pub fn classify(&self, asset: &Asset) -> Option<ReleaseKind> {
        let extension = asset.path.extension()?.to_str()?.to_ascii_lowercase();
        let kind = if INSTALLER_EXTENSIONS.contains(&extension.as_str()) {
            ReleaseKind::Installer
        } else if STANDALONE_EXTENSIONS.contains(&extension.as_str()) {
            ReleaseKind::Standalone
        } else {
            return None;
        };

        let basename = asset.path.file_name()?.to_string_lossy();
        if self.ignored.contains(basename.as_ref()) {
            debug!(path = %asset.path.display(), "Ignoring listed asset");
            return None;
        }
        let full_path = asset.path.to_string_lossy();
        if self
            .skip_path_fragments
            .iter()
            .any(|fragment| full_path.contains(fragment.as_str()) || asset.filename.contains(fragment.as_str()))
        {
            debug!(path = %asset.path.display(), "Skipping asset below excluded path");
            return None;
        }
        Some(kind)
    }
}

/// Builds releases for one source
pub struct ReleaseBuilder<'a> {
    pub gateway: &'a dyn DecoderGateway,
    pub store: &'a ContentStore,
    pub sink: &'a dyn ErrorSink,
    pub rules: &'a AssetRules,
    pub descriptions: &'a DescriptionIndex,
    /// Parent for staging and payload directories
    pub scratch: &'a Path,
}

struct Identity {
    uid: String,
    name: String,
    version: Option<String>,
    icons: Vec<Icon>,
    tags: BTreeSet<String>,
}

impl<'a> ReleaseBuilder<'a> {
    /// Walk `root` and build a release for every candidate asset
    pub fn build_source(&self, root: &Path, prefix: Reference) -> Vec<Release> {
        let mut releases = Vec::new();
        for item in walk(root, prefix).staging_in(self.scratch) {
            match item {
                Ok(asset) => releases.extend(self.build_release(&asset)),
                Err(error) => self.sink.record(error),
            }
        }
        releases
    }

    /// Build the release for one asset; `None` when skipped or failed
    pub fn build_release(&self, asset: &Asset) -> Option<Release> {
        let kind = self.rules.classify(asset)?;
        let path = asset.path.as_path();
        info!(path = %asset.filename, reference = %asset.reference, %kind, "Importing asset");

        let (content_hash, size) = match hash_file(path).and_then(|h| Ok((h, std::fs::metadata(path)?.len()))) {
            Ok(found) => found,
            Err(e) => {
                self.sink.record(IndexError::io(path, e));
                return None;
            }
        };

        let identity = match kind {
            ReleaseKind::Installer => self.installer_identity(path)?,
            ReleaseKind::Standalone => self.standalone_identity(path, &content_hash),
        };

        if let Err(e) = self.store.put_file(path, &content_hash) {
            self.sink.record(IndexError::io(path, e));
            return None;
        }

        Some(Release {
            filename: asset.filename.clone(),
            size,
            reference: asset.reference.clone(),
            kind,
            uid: identity.uid,
            content_hash,
            name: identity.name,
            version: identity.version,
            icons: identity.icons,
            tags: identity.tags,
            summary: self.descriptions.summary_for(description_key(asset)),
            readme: readme_for(path),
        })
    }

    fn installer_identity(&self, path: &Path) -> Option<Identity> {
        let info = match self.gateway.decode_installer(path) {
            Ok(info) => info,
            Err(e) => {
                self.sink.record(IndexError::decode(path, e));
                return None;
            }
        };
        let Some(name) = select_name(&info.name).map(str::to_string) else {
            self.sink.record(IndexError::NameResolution {
                path: path.to_path_buf(),
                candidates: info.name.keys().cloned().collect(),
            });
            return None;
        };

        let mut icons = Vec::new();
        let mut tags = TagSet::default();
        match tempfile::Builder::new()
            .prefix("relic-payload-")
            .tempdir_in(self.scratch)
        {
            Ok(payload) => match self.gateway.extract_installer_payload(path, payload.path()) {
                Ok(()) => {
                    let mut resource = None;
                    for item in walk(payload.path(), Reference::new()).staging_in(self.scratch) {
                        let contained = match item {
                            Ok(contained) => contained,
                            Err(e) => {
                                self.sink.record(e);
                                continue;
                            }
                        };
                        tags.scan(self.gateway, &contained.path);
                        if resource.is_none() && has_extension(&contained.path, RESOURCE_EXTENSION) {
                            resource = Some(self.icons_from(&contained.path));
                        }
                    }
                    icons = resource.unwrap_or_default();
                }
                Err(e) => self.sink.record(IndexError::decode(path, e)),
            },
            Err(e) => self.sink.record(IndexError::io(self.scratch, e)),
        }

        Some(Identity {
            uid: format_uid(info.uid),
            name,
            version: Some(info.version.trim().to_string()),
            icons,
            tags: tags.into_inner(),
        })
    }

    fn standalone_identity(&self, path: &Path, content_hash: &str) -> Identity {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut identity = Identity {
            uid: content_hash.to_string(),
            name: stem.clone(),
            version: None,
            icons: Vec::new(),
            tags: self.directory_tags(path),
        };

        let resource_path = find_sibling(path, &format!("{stem}.{RESOURCE_EXTENSION}"));
        let resource_path = resource_path.as_deref().unwrap_or(path);
        match self.gateway.decode_metadata_resource(resource_path) {
            Ok(info) => {
                match select_name(&info.captions) {
                    Some(name) => {
                        identity.uid = format_uid(info.uid3);
                        identity.name = name.to_string();
                    }
                    None => debug!(
                        path = %resource_path.display(),
                        candidates = ?info.captions.keys().collect::<Vec<_>>(),
                        "No caption in a known language; naming after the file"
                    ),
                }
                identity.icons = self.icons_from(resource_path);
            }
            Err(e) => debug!(
                path = %resource_path.display(),
                error = %e,
                "No metadata resource; naming after the file"
            ),
        }
        identity
    }

    fn icons_from(&self, resource: &Path) -> Vec<Icon> {
        match self.gateway.extract_icons(resource, self.scratch) {
            Ok(icons) => icons,
            Err(e) => {
                self.sink.record(IndexError::decode(resource, e));
                Vec::new()
            }
        }
    }

    /// Tags of the files sitting next to a standalone application
    fn directory_tags(&self, path: &Path) -> BTreeSet<String> {
        let mut tags = TagSet::default();
        let Some(directory) = path.parent() else {
            return tags.into_inner();
        };
        let Ok(entries) = std::fs::read_dir(directory) else {
            return tags.into_inner();
        };
        let mut files: Vec<_> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .collect();
        files.sort();
        for file in files {
            tags.scan(self.gateway, &file);
        }
        tags.into_inner()
    }
}

/// Path relative to the source root used to look up directory descriptions
fn description_key(asset: &Asset) -> &str {
    match asset.reference.items().first() {
        Some(container) => &container.name,
        None => &asset.filename,
    }
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case(extension))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn asset(path: &str) -> Asset {
        Asset {
            path: PathBuf::from(path),
            reference: Reference::new(),
            filename: path.trim_start_matches('/').to_string(),
        }
    }

    #[test]
    fn test_classify_by_extension() {
        let rules = AssetRules::default();
        assert_eq!(rules.classify(&asset("/a/Chess.SIS")), Some(ReleaseKind::Installer));
        assert_eq!(rules.classify(&asset("/a/Chess.app")), Some(ReleaseKind::Standalone));
        assert_eq!(rules.classify(&asset("/a/Chess.opa")), Some(ReleaseKind::Standalone));
        assert_eq!(rules.classify(&asset("/a/Chess.aif")), None);
        assert_eq!(rules.classify(&asset("/a/readme")), None);
    }

    #[test]
    fn test_classify_honours_ignore_rules() {
        let rules = AssetRules {
            ignored: BTreeSet::from(["netutils.sis".to_string()]),
            skip_path_fragments: vec!["System/Install".to_string()],
        };
        assert_eq!(rules.classify(&asset("/x/netutils.sis")), None);
        assert_eq!(rules.classify(&asset("/x/System/Install/a.sis")), None);
        assert_eq!(rules.classify(&asset("/x/System/Apps/a.app")), Some(ReleaseKind::Standalone));
    }
}
