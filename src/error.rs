use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the ambient layers (config, cache, watcher, terminal).
///
/// Filesystem problems hit while scanning are not errors: they are recovered
/// in the crawler and only logged.
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("snapshot i/o failed for {path}: {source}")]
    SnapshotIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt snapshot {path}: {source}")]
    SnapshotFormat {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("snapshot {path} has version {found}, expected {expected}")]
    SnapshotVersion {
        path: PathBuf,
        found: u32,
        expected: u32,
    },

    #[error("snapshot of {root} is inconsistent: {reason}")]
    SnapshotCorrupt { root: PathBuf, reason: String },

    #[error("could not determine a cache directory")]
    NoCacheDir,

    #[error("invalid log filter: {0}")]
    LogFilter(String),

    #[error("file watcher: {0}")]
    Watch(#[from] notify::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
