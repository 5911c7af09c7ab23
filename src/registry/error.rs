//! Registry error types
//!
//! Error types for stream registry and media source operations.

use super::key::StreamKey;

/// Error type for registry operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Stream not found
    StreamNotFound(StreamKey),
    /// Stream already has a publisher
    StreamAlreadyPublishing(StreamKey),
    /// Source was closed (publisher gone or bridge torn down)
    SourceClosed(StreamKey),
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::StreamNotFound(key) => write!(f, "Stream not found: {}", key),
            RegistryError::StreamAlreadyPublishing(key) => {
                write!(f, "Stream already has a publisher: {}", key)
            }
            RegistryError::SourceClosed(key) => write!(f, "Source closed: {}", key),
        }
    }
}

impl std::error::Error for RegistryError {}
