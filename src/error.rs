//! Error types
//!
//! `MediaError` covers packet buffers and codec probing, `RegistryError`
//! (in [`crate::registry`]) covers stream lookup and lifecycle. Both fold into
//! the crate-level [`Error`].

use crate::registry::RegistryError;

/// Crate-level result alias
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while building or classifying media packets
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    /// The allocator could not provide a buffer of the requested size
    AllocationFailed { capacity: usize },
    /// A commit would move `used_bytes` past the buffer capacity
    CommitOverflow { requested: usize, available: usize },
    /// A tag body ended before its declared size
    TruncatedTag { expected: usize, available: usize },
    /// AVC decoder configuration record could not be parsed
    InvalidAvcPacket,
    /// AAC AudioSpecificConfig could not be parsed
    InvalidAacPacket,
    /// Header rejected by a codec probe
    MalformedHeader(String),
}

impl std::fmt::Display for MediaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaError::AllocationFailed { capacity } => {
                write!(f, "Failed to allocate packet buffer of {} bytes", capacity)
            }
            MediaError::CommitOverflow {
                requested,
                available,
            } => write!(
                f,
                "Commit of {} bytes exceeds {} free bytes",
                requested, available
            ),
            MediaError::TruncatedTag {
                expected,
                available,
            } => write!(
                f,
                "Tag body truncated: expected {} bytes, got {}",
                expected, available
            ),
            MediaError::InvalidAvcPacket => write!(f, "Invalid AVC sequence header"),
            MediaError::InvalidAacPacket => write!(f, "Invalid AAC sequence header"),
            MediaError::MalformedHeader(reason) => write!(f, "Malformed header: {}", reason),
        }
    }
}

impl std::error::Error for MediaError {}

/// Top-level error type
#[derive(Debug)]
pub enum Error {
    /// Packet or codec error
    Media(MediaError),
    /// Registry / source lifecycle error
    Registry(RegistryError),
    /// A consumer's frame writer failed
    Writer(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Media(e) => write!(f, "Media error: {}", e),
            Error::Registry(e) => write!(f, "Registry error: {}", e),
            Error::Writer(reason) => write!(f, "Writer error: {}", reason),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Media(e) => Some(e),
            Error::Registry(e) => Some(e),
            Error::Writer(_) => None,
        }
    }
}

impl From<MediaError> for Error {
    fn from(e: MediaError) -> Self {
        Error::Media(e)
    }
}

impl From<RegistryError> for Error {
    fn from(e: RegistryError) -> Self {
        Error::Registry(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::StreamKey;

    #[test]
    fn test_media_error_display() {
        let err = MediaError::CommitOverflow {
            requested: 10,
            available: 4,
        };
        assert_eq!(err.to_string(), "Commit of 10 bytes exceeds 4 free bytes");
    }

    #[test]
    fn test_error_from_registry() {
        let key = StreamKey::new("live", "cam1");
        let err: Error = RegistryError::SourceClosed(key).into();
        assert!(matches!(err, Error::Registry(RegistryError::SourceClosed(_))));
        assert!(std::error::Error::source(&err).is_some());
    }
}
