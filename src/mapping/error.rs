//! Error definitions for the mapping module

use thiserror::Error;

/// Errors raised while reading or editing a profile document
#[derive(Debug, Error)]
pub enum MappingError {
    /// The document is not valid JSON at all
    #[error("Malformed profile document: {0}")]
    Syntax(#[source] serde_json::Error),

    /// Valid JSON, but neither the current nor the legacy schema fits
    #[error("Profile document matches no known schema: {0}")]
    Schema(#[source] serde_json::Error),

    #[error("Failed to serialize profile document: {0}")]
    Serialize(#[source] serde_json::Error),

    /// Binding kind other than `button`, `axis` or `hat`
    #[error("Unknown binding kind: {0}")]
    UnknownKind(String),

    #[error("Unknown {kind} position: {subkey}")]
    UnknownSubkey { kind: String, subkey: String },
}
