//! Classified indexing errors
//!
//! Every per-asset failure is one of these variants. They are caught at the
//! release builder boundary and routed to an [`crate::failures::ErrorSink`];
//! none of them aborts a source or a run.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failures reported by a [`crate::gateway::DecoderGateway`]
#[derive(Error, Debug)]
pub enum DecodeError {
    /// The file is not a format the decoder supports
    #[error("unsupported format: {message}")]
    UnsupportedFormat { message: String },

    /// The file claims a supported format but could not be parsed
    #[error("corrupt file: {message}")]
    CorruptFile { message: String },

    /// The decoder did not finish within its time budget
    #[error("decoder timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// The decoder could not be started or its output could not be read
    #[error("decoder i/o failure")]
    Io(#[from] std::io::Error),
}

impl DecodeError {
    pub fn unsupported(message: impl Into<String>) -> Self {
        DecodeError::UnsupportedFormat {
            message: message.into(),
        }
    }

    pub fn corrupt(message: impl Into<String>) -> Self {
        DecodeError::CorruptFile {
            message: message.into(),
        }
    }
}

/// Per-asset indexing failures
#[derive(Error, Debug)]
pub enum IndexError {
    /// Corrupt archive or unsupported container feature
    #[error("failed to extract container {path}: {reason}")]
    ContainerExtraction { path: PathBuf, reason: String },

    /// The decoder rejected the file
    #[error("failed to decode {path}")]
    Decode {
        path: PathBuf,
        #[source]
        source: DecodeError,
    },

    /// No localized name matched the language priority list
    #[error("no supported localization found for {path} (candidates: {candidates:?})")]
    NameResolution {
        path: PathBuf,
        candidates: Vec<String>,
    },

    /// Reading or storing the asset failed
    #[error("i/o failure on {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl IndexError {
    pub fn decode(path: impl Into<PathBuf>, source: DecodeError) -> Self {
        IndexError::Decode {
            path: path.into(),
            source,
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        IndexError::Io {
            path: path.into(),
            source,
        }
    }

    /// Short machine-readable classification used in failure reports
    pub fn kind(&self) -> &'static str {
        match self {
            IndexError::ContainerExtraction { .. } => "container-extraction",
            IndexError::Decode {
                source: DecodeError::UnsupportedFormat { .. },
                ..
            } => "unsupported-format",
            IndexError::Decode {
                source: DecodeError::CorruptFile { .. },
                ..
            } => "corrupt-file",
            IndexError::Decode {
                source: DecodeError::Timeout(_),
                ..
            } => "timeout",
            IndexError::Decode {
                source: DecodeError::Io(_),
                ..
            } => "decoder-io",
            IndexError::NameResolution { .. } => "name-resolution",
            IndexError::Io { .. } => "io",
        }
    }

    /// The file the failure refers to
    pub fn path(&self) -> &std::path::Path {
        match self {
            IndexError::ContainerExtraction { path, .. }
            | IndexError::Decode { path, .. }
            | IndexError::NameResolution { path, .. }
            | IndexError::Io { path, .. } => path,
        }
    }

    /// Full message including the source chain
    pub fn detailed(&self) -> String {
        let mut message = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        message
    }
}

/// Errors loading a library definition. These are fatal to the run.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("library definition not found: {path}")]
    NotFound { path: PathBuf },

    #[error("failed to read library definition {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse library definition {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml_ng::Error,
    },

    #[error("invalid source in {path}: {reason}")]
    InvalidSource { path: PathBuf, reason: String },
}
