//! Error types for matmap-assets
//!
//! Only `Configuration` (and setup failures wrapped in `Common`) are process-fatal.
//! Everything else is produced at the item boundary and ends up as a classification
//! in a run report.

use thiserror::Error;

/// Asset engine error type
#[derive(Debug, Error)]
pub enum AssetError {
    /// Missing or invalid configuration; aborts before any I/O
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Distinct entities normalize to the same slug
    #[error("Name conflict: slug '{slug}' shared by entities {entity_ids:?}")]
    NameConflict { slug: String, entity_ids: Vec<i64> },

    /// Filename token did not resolve to exactly one entity
    #[error("No entity match for '{0}'")]
    MatchMiss(String),

    /// File system failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Remote store or HTTP failure
    #[error("Network error: {0}")]
    Network(String),

    /// Operation exceeded its timeout
    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// matmap-common error
    #[error("Common error: {0}")]
    Common(#[from] matmap_common::Error),
}

impl AssetError {
    /// True when the error should abort the process with a configuration exit code
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            AssetError::Configuration(_) | AssetError::Common(matmap_common::Error::Config(_))
        )
    }
}

/// Result type for asset engine operations
pub type AssetResult<T> = Result<T, AssetError>;
