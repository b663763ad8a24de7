//! Boundary to the binary-format decoders
//!
//! The pipeline only ever talks to a [`DecoderGateway`]. How decoding is done
//! (an external tool, a library, a test fixture) is the implementor's concern.

mod process;

pub use process::ProcessGateway;

use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::DecodeError;
use crate::model::Icon;

/// Identity metadata declared by an installer package
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InstallerInfo {
    pub uid: u32,
    /// Localized names keyed by language code
    #[serde(default)]
    pub name: BTreeMap<String, String>,
    #[serde(deserialize_with = "deserialize_version")]
    pub version: String,
}

/// Identity metadata declared by an application metadata resource
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ResourceInfo {
    pub uid3: u32,
    #[serde(default)]
    pub captions: BTreeMap<String, String>,
}

/// Result of sniffing an arbitrary file
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Recognition {
    /// Platform generation, e.g. `er5`
    #[serde(default)]
    pub era: Option<String>,
    /// File type, e.g. `opo` or `app`
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

/// Decoders for installer packages and metadata resources
///
/// Implementations are called from blocking worker threads and must bound
/// their own running time, reporting overruns as [`DecodeError::Timeout`].
pub trait DecoderGateway: Send + Sync {
    fn decode_installer(&self, path: &Path) -> Result<InstallerInfo, DecodeError>;

    fn decode_metadata_resource(&self, path: &Path) -> Result<ResourceInfo, DecodeError>;

    /// Icons of a metadata resource; temporary files go below `scratch`
    fn extract_icons(&self, path: &Path, scratch: &Path) -> Result<Vec<Icon>, DecodeError>;

    fn extract_installer_payload(&self, path: &Path, destination: &Path) -> Result<(), DecodeError>;

    fn recognize(&self, path: &Path) -> Result<Recognition, DecodeError>;
}

/// Installer versions arrive either as a string or as `{major, minor}`
fn deserialize_version<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawVersion {
        Text(String),
        Parts { major: u32, minor: u32 },
    }

    Ok(match RawVersion::deserialize(deserializer)? {
        RawVersion::Text(text) => text,
        RawVersion::Parts { major, minor } => format!("{major}.{minor:02}"),
    })
}
