//! Sources: local directories and Internet Archive items

use anyhow::{bail, Context, Result};
use reqwest::Url;
use serde::Serialize;
use std::borrow::Cow;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::builder::decode_text;
use crate::model::{Reference, ReferenceItem};

const ARCHIVE_HOST: &str = "archive.org";
const CONTAINER_EXTENSIONS: [&str; 2] = ["zip", "iso"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceKind {
    Local,
    InternetArchive {
        item: String,
        item_directory: PathBuf,
    },
}

/// A named origin of assets
#[derive(Debug, Clone)]
pub struct Source {
    /// Stable key for caching: the configured path or URL
    pub identifier: String,
    pub name: String,
    pub description: Option<String>,
    /// Root walked during indexing; a directory or a single file
    pub path: PathBuf,
    pub url: Option<String>,
    pub html_url: Option<String>,
    /// Listing files describing directories of this source
    pub descriptions: Vec<String>,
    pub kind: SourceKind,
}

/// Entry of `sources.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct SourceSummary {
    pub identifier: String,
    pub path: String,
    pub name: String,
    pub description: Option<String>,
    pub url: Option<String>,
    pub html_url: Option<String>,
}

impl Source {
    pub fn local(
        root_directory: &Path,
        path: &Path,
        name: Option<String>,
        description: Option<String>,
        descriptions: Vec<String>,
    ) -> Self {
        let identifier = path.to_string_lossy().into_owned();
        Self {
            name: name.unwrap_or_else(|| identifier.clone()),
            identifier,
            description,
            path: root_directory.join(path),
            url: None,
            html_url: None,
            descriptions,
            kind: SourceKind::Local,
        }
    }

    /// Parse an `archive.org` item (`/details/<id>`) or download (`/download/<id>/...`) URL
    pub fn internet_archive(
        assets_directory: &Path,
        url: &str,
        name: Option<String>,
        description: Option<String>,
        descriptions: Vec<String>,
    ) -> std::result::Result<Self, String> {
        let parsed = Url::parse(url).map_err(|e| format!("invalid url '{url}': {e}"))?;
        if parsed.host_str() != Some(ARCHIVE_HOST) {
            return Err(format!("unsupported url '{url}'"));
        }
        let components: Vec<String> = parsed
            .path_segments()
            .map(|segments| {
                segments
                    .filter(|s| !s.is_empty())
                    .map(|s| urlencoding::decode(s).map(Cow::into_owned))
                    .collect::<std::result::Result<Vec<_>, _>>()
            })
            .transpose()
            .map_err(|e| format!("invalid url '{url}': {e}"))?
            .unwrap_or_default();

        let (item, relative) = match components.first().map(String::as_str) {
            Some("download") if components.len() >= 2 => {
                // Paths inside archives cannot be downloaded directly.
                let inner = &components[..components.len() - 1];
                if inner.iter().skip(2).any(|c| is_container_name(c)) {
                    return Err(format!("unsupported url '{url}'"));
                }
                (components[1].clone(), components[2..].join("/"))
            }
            Some("details") if components.len() == 2 => (components[1].clone(), String::new()),
            _ => return Err(format!("unsupported url '{url}'")),
        };

        let item_directory = assets_directory.join(&item);
        let path = if relative.is_empty() {
            item_directory.clone()
        } else {
            item_directory.join(&relative)
        };
        Ok(Self {
            identifier: url.to_string(),
            name: name.unwrap_or_else(|| item.clone()),
            description,
            path,
            url: Some(url.to_string()),
            html_url: Some(format!("https://{ARCHIVE_HOST}/details/{item}")),
            descriptions,
            kind: SourceKind::InternetArchive {
                item,
                item_directory,
            },
        })
    }

    /// Fill in download URLs for the first two reference tiers
    ///
    /// The outermost container is the source download itself; the next tier
    /// can be fetched through the archive's in-container browsing.
    pub fn resolve_reference(&self, reference: Reference) -> Reference {
        let Some(url) = &self.url else {
            return reference;
        };
        reference.map_items(|(index, item)| match index {
            0 => ReferenceItem {
                name: item.name,
                url: Some(url.clone()),
            },
            1 => {
                let resolved = Url::parse(url).ok().and_then(|mut parsed| {
                    parsed.path_segments_mut().ok()?.push(&item.name);
                    Some(parsed.to_string())
                });
                ReferenceItem {
                    name: item.name,
                    url: resolved,
                }
            }
            _ => item,
        })
    }

    pub fn summary(&self) -> SourceSummary {
        SourceSummary {
            identifier: self.identifier.clone(),
            path: self.path.display().to_string(),
            name: self.name.clone(),
            description: self.description.clone(),
            url: self.url.clone(),
            html_url: self.html_url.clone(),
        }
    }

    /// Download remote content that is not yet cached locally
    pub async fn sync(&mut self, client: &reqwest::Client) -> Result<()> {
        let SourceKind::InternetArchive {
            item,
            item_directory,
        } = &self.kind
        else {
            return Ok(());
        };
        info!(item = %item, "Syncing source");
        std::fs::create_dir_all(item_directory)?;

        let metadata_path = item_directory.join(format!("{item}_meta.xml"));
        let files_path = item_directory.join(format!("{item}_files.xml"));
        for (path, name) in [(&metadata_path, "meta"), (&files_path, "files")] {
            if !path.exists() {
                let url = format!("https://{ARCHIVE_HOST}/download/{item}/{item}_{name}.xml");
                download_file(client, &url, path).await?;
            }
        }
        if !self.path.exists() {
            if let Some(url) = &self.url {
                download_file(client, url, &self.path).await?;
            }
        }
        self.load_metadata()
    }

    /// Take name and description from cached item metadata when not configured
    pub fn load_metadata(&mut self) -> Result<()> {
        let SourceKind::InternetArchive {
            item,
            item_directory,
        } = &self.kind
        else {
            return Ok(());
        };
        let metadata_path = item_directory.join(format!("{item}_meta.xml"));
        if !metadata_path.exists() {
            return Ok(());
        }
        let bytes = std::fs::read(&metadata_path)
            .with_context(|| format!("Failed to read item metadata {}", metadata_path.display()))?;
        let text = decode_text(&bytes);
        let document = match roxmltree::Document::parse(&text) {
            Ok(document) => document,
            Err(e) => {
                warn!(path = %metadata_path.display(), error = %e, "Ignoring unreadable item metadata");
                return Ok(());
            }
        };
        if self.name == *item {
            if let Some(title) = metadata_text(&document, "title") {
                self.name = title;
            }
        }
        if self.description.is_none() {
            self.description = metadata_text(&document, "description");
        }
        Ok(())
    }
}

/// Trimmed text of the first `name` element below the metadata root
fn metadata_text(document: &roxmltree::Document, name: &str) -> Option<String> {
    let node = document
        .root_element()
        .children()
        .find(|node| node.has_tag_name(name))?;
    let text: String = node
        .descendants()
        .filter(|node| node.is_text())
        .filter_map(|node| node.text())
        .collect();
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

fn is_container_name(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| CONTAINER_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Stream `url` into `destination`, moving it into place only when complete
async fn download_file(client: &reqwest::Client, url: &str, destination: &Path) -> Result<()> {
    info!(url, destination = %destination.display(), "Downloading");
    let parent = destination
        .parent()
        .context("Download destination has no parent directory")?;
    std::fs::create_dir_all(parent)?;

    let mut response = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("Failed to download {url}"))?;
    if !response.status().is_success() {
        bail!("Download failed: HTTP {} for {}", response.status(), url);
    }

    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    while let Some(chunk) = response
        .chunk()
        .await
        .with_context(|| format!("Failed to read download response from {url}"))?
    {
        temp.write_all(&chunk)?;
    }
    temp.as_file().sync_all()?;
    temp.persist(destination)
        .with_context(|| format!("Failed to move download into {}", destination.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn archive(url: &str) -> std::result::Result<Source, String> {
        Source::internet_archive(Path::new("/assets"), url, None, None, Vec::new())
    }

    #[test]
    fn test_details_url_walks_item_directory() {
        let source = archive("https://archive.org/details/psion-games").unwrap();
        assert_eq!(source.path, PathBuf::from("/assets/psion-games"));
        assert_eq!(source.name, "psion-games");
        assert_eq!(source.html_url.as_deref(), Some("https://archive.org/details/psion-games"));
    }

    #[test]
    fn test_download_url_walks_file() {
        let source = archive("https://archive.org/download/psion-games/Psion%20Games.zip").unwrap();
        assert_eq!(source.path, PathBuf::from("/assets/psion-games/Psion Games.zip"));

        let source = archive("https://archive.org/download/psion/Caf%C3%A9%20Psion/50%25.zip").unwrap();
        assert_eq!(source.path, PathBuf::from("/assets/psion/Café Psion/50%.zip"));
    }

    #[test]
    fn test_rejects_unsupported_urls() {
        assert!(archive("https://example.com/details/x").is_err());
        assert!(archive("https://archive.org/download/item/inner.zip/file.sis").is_err());
        assert!(archive("https://archive.org/search?query=psion").is_err());
    }

    #[test]
    fn test_resolve_reference_fills_first_two_tiers() {
        let source = archive("https://archive.org/download/psion-games/games.zip").unwrap();
        let reference = Reference::from(vec![
            ReferenceItem::new("games.zip"),
            ReferenceItem::new("Chess Pack.zip"),
            ReferenceItem::new("deep.zip"),
        ]);

        let resolved = source.resolve_reference(reference);
        let urls: Vec<_> = resolved.items().iter().map(|i| i.url.clone()).collect();
        assert_eq!(
            urls,
            vec![
                Some("https://archive.org/download/psion-games/games.zip".to_string()),
                Some("https://archive.org/download/psion-games/games.zip/Chess%20Pack.zip".to_string()),
                None,
            ]
        );
    }

    #[test]
    fn test_local_sources_keep_references() {
        let source = Source::local(Path::new("/library"), Path::new("mirror"), None, None, Vec::new());
        let reference = Reference::from(vec![ReferenceItem::new("a.zip")]);
        assert_eq!(source.resolve_reference(reference.clone()), reference);
        assert_eq!(source.path, PathBuf::from("/library/mirror"));
    }

    #[test]
    fn test_metadata_fills_name_and_description() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut source =
            Source::internet_archive(dir.path(), "https://archive.org/details/item", None, None, Vec::new())
                .unwrap();
        std::fs::create_dir_all(dir.path().join("item")).unwrap();
        std::fs::write(
            dir.path().join("item/item_meta.xml"),
            "<metadata><title>Psion Games</title><description>A collection</description></metadata>",
        )
        .unwrap();

        source.load_metadata().unwrap();
        assert_eq!(source.name, "Psion Games");
        assert_eq!(source.description.as_deref(), Some("A collection"));
    }

    #[test]
    fn test_metadata_decodes_entities_and_cdata() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut source =
            Source::internet_archive(dir.path(), "https://archive.org/details/item", None, None, Vec::new())
                .unwrap();
        std::fs::create_dir_all(dir.path().join("item")).unwrap();
        std::fs::write(
            dir.path().join("item/item_meta.xml"),
            concat!(
                "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n",
                "<metadata><identifier>item</identifier>",
                "<title>Games &amp; Utilities</title>",
                "<description><![CDATA[<b>Psion</b>]]> &lt;3</description></metadata>",
            ),
        )
        .unwrap();

        source.load_metadata().unwrap();
        assert_eq!(source.name, "Games & Utilities");
        assert_eq!(source.description.as_deref(), Some("<b>Psion</b> <3"));
    }

    #[test]
    fn test_malformed_metadata_keeps_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut source =
            Source::internet_archive(dir.path(), "https://archive.org/details/item", None, None, Vec::new())
                .unwrap();
        std::fs::create_dir_all(dir.path().join("item")).unwrap();
        std::fs::write(dir.path().join("item/item_meta.xml"), "<metadata><title>Broken").unwrap();

        source.load_metadata().unwrap();
        assert_eq!(source.name, "item");
        assert_eq!(source.description, None);
    }
}
