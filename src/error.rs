//! Library error type.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse error at {line}:{column}: {message}")]
    Parse {
        line: usize,
        column: usize,
        message: String,
    },

    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),

    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("invalid glob: {0}")]
    Glob(#[from] globset::Error),

    #[error("file is {size} bytes, exceeding max_file_size ({limit} bytes); not analyzed")]
    FileTooLarge { size: u64, limit: u64 },

    #[error("unknown rule: {0}")]
    UnknownRule(String),

    #[error("unknown severity: {0} (expected information, warning or error)")]
    InvalidSeverity(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}
