//! Stream entry
//!
//! Per-stream record stored in the registry.

use std::sync::Arc;

use tokio::time::Instant;

use super::source::MediaSource;

/// Entry for a single published stream
pub struct StreamEntry {
    /// The stream's media source
    pub source: Arc<MediaSource>,

    /// Session ID of the publisher that owns the source
    pub publisher_id: u64,

    /// When the publisher registered
    pub published_at: Instant,
}

impl StreamEntry {
    pub(super) fn new(source: Arc<MediaSource>, publisher_id: u64) -> Self {
        Self {
            source,
            publisher_id,
            published_at: Instant::now(),
        }
    }

    /// Check if the publisher is still live
    pub fn is_live(&self) -> bool {
        !self.source.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::registry::config::SourceConfig;
    use crate::registry::key::StreamKey;

    #[tokio::test(start_paused = true)]
    async fn test_published_at_follows_runtime_clock() {
        let source = MediaSource::new(StreamKey::new("live", "entry"), SourceConfig::default());
        let entry = StreamEntry::new(Arc::clone(&source), 7);

        tokio::time::advance(Duration::from_secs(90)).await;
        assert_eq!(entry.published_at.elapsed().as_secs(), 90);
        assert!(source.idle_since().is_some_and(|since| since == entry.published_at));
        assert!(entry.is_live());

        source.close();
        assert!(!entry.is_live());
    }
}
