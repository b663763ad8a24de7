//! Shared fixtures for the integration suites
//!
//! Fixture files are JSON documents read by [`FakeGateway`]: installers carry
//! `uid`, `name`, `version` and an optional `payload` of file name to
//! contents, resources carry `uid3`, `captions` and `icons` as
//! `[width, height, bpp]` triples.

#![allow(dead_code)]

use relic_core::error::DecodeError;
use relic_core::gateway::{DecoderGateway, InstallerInfo, Recognition, ResourceInfo};
use relic_core::library::Library;
use relic_core::model::Icon;
use relic_core::store::hash_bytes;
use serde_json::Value;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Once;

static INIT: Once = Once::new();

pub fn init_test_logging() {
    INIT.call_once(|| {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

        let _ = tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_test_writer()
                    .with_target(true),
            )
            .with(tracing_subscriber::filter::EnvFilter::from_default_env())
            .try_init();
    });
}

/// Decoder reading JSON fixtures, counting every call
#[derive(Debug, Default)]
pub struct FakeGateway {
    calls: AtomicUsize,
}

impl FakeGateway {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.calls.store(0, Ordering::SeqCst);
    }

    fn document(&self, path: &Path) -> Result<Value, DecodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let bytes = std::fs::read(path)?;
        serde_json::from_slice(&bytes).map_err(|e| DecodeError::corrupt(e.to_string()))
    }
}

impl DecoderGateway for FakeGateway {
    fn decode_installer(&self, path: &Path) -> Result<InstallerInfo, DecodeError> {
        serde_json::from_value(self.document(path)?).map_err(|e| DecodeError::corrupt(e.to_string()))
    }

    fn decode_metadata_resource(&self, path: &Path) -> Result<ResourceInfo, DecodeError> {
        serde_json::from_value(self.document(path)?).map_err(|_| DecodeError::unsupported("Not an AIF file"))
    }

    fn extract_icons(&self, path: &Path, _scratch: &Path) -> Result<Vec<Icon>, DecodeError> {
        let document = self.document(path)?;
        let icons = document["icons"].as_array().cloned().unwrap_or_default();
        Ok(icons
            .iter()
            .map(|triple| {
                let value = |index: usize| triple[index].as_u64().unwrap_or(0) as u32;
                let bytes = format!("bitmap {}x{} {}bpp", value(0), value(1), value(2)).into_bytes();
                Icon {
                    width: value(0),
                    height: value(1),
                    bit_depth: value(2),
                    content_hash: hash_bytes(&bytes),
                    bytes,
                }
            })
            .collect())
    }

    fn extract_installer_payload(&self, path: &Path, destination: &Path) -> Result<(), DecodeError> {
        let document = self.document(path)?;
        if let Some(payload) = document["payload"].as_object() {
            for (name, contents) in payload {
                let target = destination.join(name);
                if let Some(parent) = target.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let text = match contents {
                    Value::String(text) => text.clone(),
                    other => other.to_string(),
                };
                std::fs::write(target, text)?;
            }
        }
        Ok(())
    }

    fn recognize(&self, path: &Path) -> Result<Recognition, DecodeError> {
        let document = self.document(path)?;
        serde_json::from_value(document).map_err(|e| DecodeError::corrupt(e.to_string()))
    }
}

pub fn installer(uid: u32, name: &str, version: &str) -> String {
    serde_json::json!({
        "uid": uid,
        "name": {"en_GB": name},
        "version": version,
        "era": "er5",
    })
    .to_string()
}

/// Installer whose payload holds a metadata resource with two icons
pub fn installer_with_icons(uid: u32, name: &str, version: &str) -> String {
    let resource = serde_json::json!({
        "uid3": uid,
        "captions": {"en_GB": name},
        "icons": [[24, 24, 4], [48, 48, 8]],
    });
    serde_json::json!({
        "uid": uid,
        "name": {"en_GB": name},
        "version": version,
        "payload": {"System/Apps/App.aif": resource, "System/Apps/App.app": {"type": "app"}},
    })
    .to_string()
}

pub fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    for (name, bytes) in entries {
        writer
            .start_file(*name, zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(bytes).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

pub fn write_file(path: &Path, bytes: impl AsRef<[u8]>) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, bytes).unwrap();
}

/// Write `library.yaml` with local sources below `root` and load it
pub fn library_with_sources(root: &Path, sources: &[&str], overlays: &[&str]) -> Library {
    let mut definition = String::from("sources:\n");
    for source in sources {
        definition.push_str(&format!("  - path: {source}\n"));
    }
    if !overlays.is_empty() {
        definition.push_str("overlays:\n");
        for overlay in overlays {
            definition.push_str(&format!("  - {overlay}\n"));
        }
    }
    definition.push_str("indexer:\n  jobs: 2\n");
    let path = root.join("library.yaml");
    std::fs::write(&path, definition).unwrap();
    Library::load(&path).unwrap()
}
