//! Codec probing seam
//!
//! The engine never parses payloads itself. Before caching a sequence header
//! a source asks its [`CodecProbe`] whether the header is usable; a rejected
//! header is dropped and the source stays in its current state.

use crate::error::MediaError;

use super::frame::MediaFrame;

/// Validates codec configuration headers on behalf of a media source
pub trait CodecProbe: Send + Sync {
    /// Check a frame flagged `is_header`
    fn check_header(&self, frame: &MediaFrame) -> Result<(), MediaError>;
}

/// Probe that trusts the collaborator's classification
#[derive(Debug, Clone, Copy, Default)]
pub struct TrustHeaders;

impl CodecProbe for TrustHeaders {
    fn check_header(&self, frame: &MediaFrame) -> Result<(), MediaError> {
        if frame.data.is_empty() {
            return Err(MediaError::MalformedHeader("empty header".into()));
        }
        Ok(())
    }
}
