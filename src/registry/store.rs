//! Stream registry implementation
//!
//! The central registry that maps stream keys to media sources and hands out
//! sinks to viewers.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::media::{CodecProbe, TrustHeaders};
use crate::stats::SourceStats;

use super::bridge::{BridgeFactory, BridgeId, PassthroughFactory};
use super::config::RegistryConfig;
use super::entry::StreamEntry;
use super::error::RegistryError;
use super::key::{Protocol, StreamKey};
use super::sink::MediaSink;
use super::source::{MediaSource, SourceHook};

/// Central registry for all published streams
///
/// Thread-safe via `RwLock`. Lookups (subscribe, find) take the read lock;
/// only publish, unpublish and cleanup write.
pub struct StreamRegistry {
    /// Map of stream key to stream entry
    streams: RwLock<HashMap<StreamKey, StreamEntry>>,

    /// Configuration
    config: RegistryConfig,

    /// Header probe handed to every new source
    probe: Arc<dyn CodecProbe>,

    /// Hooks copied onto every new source
    hooks: Vec<Arc<dyn SourceHook>>,

    /// Translators for bridged subscriptions
    bridge_factory: Arc<dyn BridgeFactory>,
}

impl StreamRegistry {
    /// Create a new stream registry with default configuration
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create a new stream registry with custom configuration
    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            streams: RwLock::new(HashMap::new()),
            config,
            probe: Arc::new(TrustHeaders),
            hooks: Vec::new(),
            bridge_factory: Arc::new(PassthroughFactory),
        }
    }

    /// Set the header probe for new sources
    pub fn with_probe(mut self, probe: Arc<dyn CodecProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Add a hook to every new source
    pub fn with_hook(mut self, hook: Arc<dyn SourceHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Set the factory used to build protocol bridges
    pub fn with_bridge_factory(mut self, factory: Arc<dyn BridgeFactory>) -> Self {
        self.bridge_factory = factory;
        self
    }

    /// Get the registry configuration
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Register a publisher for a stream
    ///
    /// Creates a fresh source for the key. A closed source left behind by a
    /// previous publisher is replaced. Returns an error if a live publisher
    /// already owns the key.
    pub async fn publish(
        &self,
        key: &StreamKey,
        session_id: u64,
    ) -> Result<Arc<MediaSource>, RegistryError> {
        let mut streams = self.streams.write().await;

        if let Some(entry) = streams.get(key) {
            if entry.is_live() {
                return Err(RegistryError::StreamAlreadyPublishing(key.clone()));
            }
        }

        let source = MediaSource::builder(key.clone(), self.config.source.clone())
            .probe(Arc::clone(&self.probe))
            .hooks(self.hooks.iter().cloned())
            .build();
        let replaced = streams
            .insert(key.clone(), StreamEntry::new(Arc::clone(&source), session_id))
            .is_some();

        tracing::info!(
            stream = %key,
            session_id = session_id,
            replaced = replaced,
            "Publisher registered"
        );

        Ok(source)
    }

    /// Unregister a publisher, closing its source
    ///
    /// Attached sinks see the close and end their loops.
    pub async fn unpublish(&self, key: &StreamKey, session_id: u64) {
        let mut streams = self.streams.write().await;

        let Some(entry) = streams.get(key) else {
            return;
        };

        // Verify this is the actual publisher
        if entry.publisher_id != session_id {
            tracing::warn!(
                stream = %key,
                expected = entry.publisher_id,
                actual = session_id,
                "Publisher unregister mismatch"
            );
            return;
        }

        let removed = streams.remove(key);
        drop(streams);

        if let Some(entry) = removed {
            entry.source.close();
            tracing::info!(
                stream = %key,
                session_id = session_id,
                published_secs = entry.published_at.elapsed().as_secs(),
                "Publisher unregistered"
            );
        }
    }

    /// Look up the source for a stream
    pub async fn find(&self, key: &StreamKey) -> Option<Arc<MediaSource>> {
        self.streams
            .read()
            .await
            .get(key)
            .map(|entry| Arc::clone(&entry.source))
    }

    /// Attach a sink to a stream
    ///
    /// Works before the source is ready; the sink joins once it is.
    pub async fn subscribe(&self, key: &StreamKey) -> Result<MediaSink, RegistryError> {
        let source = self
            .find(key)
            .await
            .ok_or_else(|| RegistryError::StreamNotFound(key.clone()))?;

        let sink = source.attach()?;
        tracing::info!(
            stream = %key,
            sink_id = sink.id(),
            subscribers = source.subscriber_count(),
            "Subscriber added"
        );
        Ok(sink)
    }

    /// Attach a sink to a stream as republished for `protocol`
    ///
    /// The bridge is created on first request and shared afterwards.
    pub async fn subscribe_bridged(
        &self,
        key: &StreamKey,
        protocol: Protocol,
    ) -> Result<MediaSink, RegistryError> {
        let source = self
            .find(key)
            .await
            .ok_or_else(|| RegistryError::StreamNotFound(key.clone()))?;
        let id = BridgeId::new(protocol, key.clone());

        // A bridge may time out between lookup and attach; retry once
        let mut attempts = 0;
        loop {
            let bridge = source.get_or_create_bridge(id.clone(), self.bridge_factory.as_ref())?;
            match bridge.downstream().attach() {
                Ok(sink) => {
                    tracing::info!(
                        stream = %key,
                        protocol = %protocol,
                        sink_id = sink.id(),
                        "Bridged subscriber added"
                    );
                    return Ok(sink);
                }
                Err(e) if attempts > 0 => return Err(e),
                Err(_) => attempts += 1,
            }
        }
    }

    /// Check if a stream has a live publisher
    pub async fn has_active_stream(&self, key: &StreamKey) -> bool {
        self.streams
            .read()
            .await
            .get(key)
            .is_some_and(StreamEntry::is_live)
    }

    /// Get stream statistics
    pub async fn get_stream_stats(&self, key: &StreamKey) -> Option<SourceStats> {
        self.find(key).await.map(|source| source.stats())
    }

    /// Get total number of streams
    pub async fn stream_count(&self) -> usize {
        self.streams.read().await.len()
    }

    /// Run cleanup task once
    ///
    /// Removes entries whose source has closed.
    pub async fn cleanup(&self) {
        let mut streams = self.streams.write().await;

        let keys_to_remove: Vec<StreamKey> = streams
            .iter()
            .filter(|(_, entry)| !entry.is_live())
            .map(|(key, _)| key.clone())
            .collect();

        for key in keys_to_remove {
            streams.remove(&key);
            tracing::info!(stream = %key, "Stream removed by cleanup");
        }
    }

    /// Spawn background cleanup task
    ///
    /// Returns a handle that can be used to abort the task.
    pub fn spawn_cleanup_task(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(self);
        let interval = registry.config.cleanup_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                registry.cleanup().await;
            }
        })
    }
}

impl Default for StreamRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use bytes::Bytes;
    use tokio_test::{assert_err, assert_ok};

    use super::*;
    use crate::media::{MediaFrame, Tracks};
    use crate::registry::config::SourceConfig;

    fn publish_headers(source: &MediaSource) {
        source
            .accept(MediaFrame::metadata(Bytes::from_static(b"meta"), Tracks::audio_video()))
            .unwrap();
        source
            .accept(MediaFrame::video(0, Bytes::from_static(&[0x17, 0x00]), true, true))
            .unwrap();
        source
            .accept(MediaFrame::audio(0, Bytes::from_static(&[0xAF, 0x00]), true))
            .unwrap();
    }

    #[tokio::test]
    async fn test_publish() {
        let registry = StreamRegistry::new();
        let key = StreamKey::new("live", "test_stream");

        // Register publisher
        assert_ok!(registry.publish(&key, 1).await);
        assert!(registry.has_active_stream(&key).await);

        // Can't register another publisher
        let result = registry.publish(&key, 2).await;
        assert!(matches!(
            result,
            Err(RegistryError::StreamAlreadyPublishing(_))
        ));
    }

    #[tokio::test]
    async fn test_subscribe_unknown_stream() {
        let registry = StreamRegistry::new();
        let key = StreamKey::new("live", "missing");

        let result = registry.subscribe(&key).await;
        assert!(matches!(result, Err(RegistryError::StreamNotFound(_))));
    }

    #[tokio::test]
    async fn test_subscribe_unsubscribe() {
        let registry = StreamRegistry::new();
        let key = StreamKey::new("live", "test_stream");
        let source = registry.publish(&key, 1).await.unwrap();

        let sink = registry.subscribe(&key).await.unwrap();
        let stats = registry.get_stream_stats(&key).await.unwrap();
        assert_eq!(stats.sink_count, 1);

        drop(sink);
        assert_eq!(source.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_unpublish_closes_source() {
        let registry = StreamRegistry::new();
        let key = StreamKey::new("live", "test_stream");
        let source = registry.publish(&key, 1).await.unwrap();
        let mut sink = registry.subscribe(&key).await.unwrap();

        // Wrong session is ignored
        registry.unpublish(&key, 2).await;
        assert!(registry.has_active_stream(&key).await);

        registry.unpublish(&key, 1).await;
        assert!(source.is_closed());
        assert_eq!(registry.stream_count().await, 0);
        assert!(sink.wait().await);
        assert!(!sink.wait().await);
    }

    #[tokio::test]
    async fn test_publisher_reconnect() {
        let registry = StreamRegistry::new();
        let key = StreamKey::new("live", "test_stream");

        let first = registry.publish(&key, 1).await.unwrap();
        // Source closed out of band (e.g. connection dropped)
        first.close();

        // New publisher takes over
        let second = assert_ok!(registry.publish(&key, 2).await);
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(registry.has_active_stream(&key).await);
    }

    #[tokio::test]
    async fn test_late_joiner_gets_headers() {
        let config = RegistryConfig::default()
            .source(SourceConfig::default().join_staleness(Duration::ZERO));
        let registry = StreamRegistry::with_config(config);
        let key = StreamKey::new("live", "test_stream");
        let source = registry.publish(&key, 1).await.unwrap();

        publish_headers(&source);
        source
            .accept(MediaFrame::video(33, Bytes::from_static(&[0x17, 0x01]), true, false))
            .unwrap();

        // Late joiner subscribes
        let mut sink = registry.subscribe(&key).await.unwrap();
        let catchup = sink.pull().unwrap();

        // Should receive metadata + headers + keyframe
        assert_eq!(catchup.len(), 4);
        assert!(catchup[0].is_metadata());
        assert!(catchup[1].is_header); // video header
        assert!(catchup[2].is_header); // audio header
        assert!(catchup[3].is_keyframe);
    }

    #[tokio::test]
    async fn test_hooks_copied_to_sources() {
        #[derive(Default)]
        struct Ready(AtomicUsize);

        impl SourceHook for Ready {
            fn on_ready(&self, _source: &Arc<MediaSource>) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let hook = Arc::new(Ready::default());
        let registry = StreamRegistry::new().with_hook(hook.clone());

        for name in ["a", "b"] {
            let source = registry.publish(&StreamKey::new("live", name), 1).await.unwrap();
            publish_headers(&source);
        }
        assert_eq!(hook.0.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_subscribe_bridged_shares_bridge() {
        let registry = StreamRegistry::new();
        let key = StreamKey::new("live", "test_stream");
        let source = registry.publish(&key, 1).await.unwrap();

        let a = registry.subscribe_bridged(&key, Protocol::Rtsp).await.unwrap();
        let b = registry.subscribe_bridged(&key, Protocol::Rtsp).await.unwrap();
        assert!(Arc::ptr_eq(a.source(), b.source()));
        assert_eq!(source.bridge_count(), 1);

        let c = registry.subscribe_bridged(&key, Protocol::WebRtc).await.unwrap();
        assert!(!Arc::ptr_eq(a.source(), c.source()));
        assert_eq!(source.bridge_count(), 2);
    }

    #[tokio::test]
    async fn test_cleanup_removes_closed() {
        let registry = StreamRegistry::new();
        let live = StreamKey::new("live", "a");
        let dead = StreamKey::new("live", "b");

        registry.publish(&live, 1).await.unwrap();
        let source = registry.publish(&dead, 2).await.unwrap();
        source.close();

        registry.cleanup().await;
        assert_eq!(registry.stream_count().await, 1);
        assert!(registry.find(&live).await.is_some());
        assert!(registry.find(&dead).await.is_none());
        assert_err!(registry.subscribe(&dead).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_task() {
        let config = RegistryConfig::default().cleanup_interval(Duration::from_secs(1));
        let registry = Arc::new(StreamRegistry::with_config(config));
        let key = StreamKey::new("live", "test_stream");

        registry.publish(&key, 1).await.unwrap().close();
        let handle = registry.spawn_cleanup_task();

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(registry.stream_count().await, 0);
        handle.abort();
    }
}
