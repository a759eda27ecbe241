//! Error definitions for profile persistence

use crate::mapping::MappingError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// No document with this name exists on disk or in memory
    #[error("Profile not found: {0}")]
    ProfileNotFound(String),

    #[error("Profile already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid profile name: {0:?}")]
    InvalidName(String),

    /// One document could not be parsed; other profiles are unaffected
    #[error("Failed to parse profile {name}: {source}")]
    Parse {
        name: String,
        #[source]
        source: MappingError,
    },

    /// A write failed; the in-memory state stays authoritative
    #[error("Failed to persist {}: {source}", .path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Profile watcher error: {0}")]
    Watch(#[from] notify::Error),

    #[error("No default template for product id {0} ({0:#06x})")]
    UnknownDevice(u16),

    #[error("Failed to access {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Mapping(#[from] MappingError),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn persist(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Persist {
            path: path.into(),
            source,
        }
    }
}
