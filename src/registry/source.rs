//! Media source
//!
//! One source per ingested (or bridged) stream. The source owns the sequence
//! log, the keyframe index and the cached metadata/header frames, and decides
//! what each consumer receives when it pulls.
//!
//! ```text
//!   AwaitingMetadata ──metadata──► AwaitingHeaders ──all headers──► Ready
//!          │                              │                          │
//!          └──────────────────────────────┴──────── close() ─────────┴──► Closed
//! ```
//!
//! `accept()` and `get_pkts()` never suspend. Log state sits behind a
//! reader-writer lock, the sink set behind a mutex and the bridge map behind
//! its own reader-writer lock; no two of these are ever held at once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::media::{CodecProbe, FrameType, KeyframeIndex, MediaFrame, SequenceLog, Tracks, TrustHeaders};
use crate::stats::SourceStats;

use super::bridge::{BridgeFactory, BridgeId, MediaBridge};
use super::config::SourceConfig;
use super::error::RegistryError;
use super::key::StreamKey;
use super::sink::MediaSink;

/// Lifecycle state of a media source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    /// Waiting for the metadata frame that announces the tracks
    AwaitingMetadata,
    /// Waiting for a sequence header for every announced track
    AwaitingHeaders,
    /// Serving consumers
    Ready,
    /// Publisher gone; every call is refused
    Closed,
}

/// Position of a consumer in a source's sequence log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cursor {
    /// Not joined yet; the next pull runs the join algorithm
    Unstarted,
    /// Next index to read, tagged with the header generation it was joined under
    Next { index: u64, epoch: u64 },
}

/// Result of handing a frame to [`MediaSource::accept`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptOutcome {
    /// Appended to the sequence log at this index
    Appended(u64),
    /// Stored as the stream metadata
    MetadataCached,
    /// Stored as the sequence header for this track
    HeaderCached(FrameType),
    /// Dropped because the source is not ready for media yet
    NotReady,
    /// Header rejected by the codec probe and not cached
    MalformedHeader,
}

/// What a pull produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullStatus {
    /// Frames continued from an existing cursor (possibly none yet)
    Continued,
    /// Fresh join: headers replayed, log read from `start`
    Joined { start: u64, best_effort: bool },
    /// Source has not reached `Ready`; retry on the next wakeup
    NotReady,
    /// Ready, but no keyframe old enough to start from yet; retry later
    NoJoinPoint,
    /// Cursor fell out of the retention window or predates a header change;
    /// the consumer must re-join
    Desynchronized,
}

/// Frames returned by [`MediaSource::get_pkts`]
#[derive(Debug, Clone)]
pub struct Pull {
    pub frames: Vec<MediaFrame>,
    pub cursor: Cursor,
    pub status: PullStatus,
}

impl Pull {
    fn empty(cursor: Cursor, status: PullStatus) -> Self {
        Self {
            frames: Vec::new(),
            cursor,
            status,
        }
    }
}

/// Snapshot handed to bridges when their upstream becomes ready
#[derive(Debug, Clone)]
pub struct ReadyInfo {
    pub key: StreamKey,
    pub tracks: Tracks,
    pub metadata: Option<MediaFrame>,
    pub video_header: Option<MediaFrame>,
    pub audio_header: Option<MediaFrame>,
}

/// Lifecycle callbacks for a source
///
/// Used to start auto-push destinations once codecs are known.
pub trait SourceHook: Send + Sync {
    /// Called exactly once, when the source first becomes ready
    fn on_ready(&self, _source: &Arc<MediaSource>) {}

    /// Called when the source closes
    fn on_close(&self, _key: &StreamKey) {}
}

#[derive(Debug, Default)]
struct Counters {
    frames_logged: u64,
    video_frames: u64,
    audio_frames: u64,
    keyframes: u64,
    bytes_received: u64,
    frames_not_ready: u64,
    malformed_headers: u64,
}

struct Inner {
    state: SourceState,
    log: SequenceLog,
    keyframes: KeyframeIndex,
    metadata: Option<MediaFrame>,
    video_header: Option<MediaFrame>,
    audio_header: Option<MediaFrame>,
    tracks: Tracks,
    latest_video_ts: u32,
    latest_audio_ts: u32,
    /// Bumped whenever a cached header changes
    header_epoch: u64,
    counters: Counters,
}

impl Inner {
    fn new(config: &SourceConfig) -> Self {
        Self {
            state: SourceState::AwaitingMetadata,
            log: SequenceLog::new(config.log_capacity),
            keyframes: KeyframeIndex::new(config.keyframe_capacity),
            metadata: None,
            video_header: None,
            audio_header: None,
            tracks: Tracks::default(),
            latest_video_ts: 0,
            latest_audio_ts: 0,
            header_epoch: 0,
            counters: Counters::default(),
        }
    }

    fn accept_metadata(&mut self, frame: MediaFrame) {
        if self.state == SourceState::AwaitingMetadata {
            // Track layout is decided once; a metadata frame without it is
            // assumed to announce both tracks
            self.tracks = frame.tracks.unwrap_or_else(Tracks::audio_video);
            self.state = SourceState::AwaitingHeaders;
        }
        self.metadata = Some(frame);
    }

    /// Cache a header; returns false when it repeats the cached one
    fn cache_header(&mut self, frame: MediaFrame) -> bool {
        let slot = match frame.frame_type {
            FrameType::Video => &mut self.video_header,
            FrameType::Audio => &mut self.audio_header,
            FrameType::Metadata => return false,
        };

        if slot.as_ref().is_some_and(|cached| cached.data == frame.data) {
            return false;
        }
        *slot = Some(frame);

        // Frames in the log reference the previous configuration
        self.log.clear();
        self.keyframes.clear();
        self.header_epoch += 1;
        true
    }

    /// Move to `Ready` if every announced track has a header
    fn check_ready(&mut self) -> bool {
        if self.state != SourceState::AwaitingHeaders {
            return false;
        }
        let audio_ok = !self.tracks.audio || self.audio_header.is_some();
        let video_ok = !self.tracks.video || self.video_header.is_some();
        if audio_ok && video_ok {
            self.state = SourceState::Ready;
            true
        } else {
            false
        }
    }

    fn append(&mut self, frame: MediaFrame) -> u64 {
        let is_keyframe = frame.is_video_keyframe();
        let frame_type = frame.frame_type;
        let timestamp = frame.timestamp;

        self.counters.bytes_received += frame.size() as u64;
        let index = self.log.add(frame);
        self.counters.frames_logged += 1;

        match frame_type {
            FrameType::Video => {
                self.latest_video_ts = timestamp;
                self.counters.video_frames += 1;
                if is_keyframe {
                    self.keyframes.push(index);
                    self.counters.keyframes += 1;
                }
            }
            FrameType::Audio => {
                self.latest_audio_ts = timestamp;
                self.counters.audio_frames += 1;
            }
            FrameType::Metadata => {}
        }

        index
    }

    fn join(&self, config: &SourceConfig, max_count: usize) -> Pull {
        if self.state != SourceState::Ready {
            return Pull::empty(Cursor::Unstarted, PullStatus::NotReady);
        }

        let (start, best_effort) = if self.tracks.video {
            match self.keyframes.scan_for_join_point(
                &self.log,
                self.latest_video_ts,
                config.join_staleness_ms(),
            ) {
                Some(point) => (point.index, point.best_effort),
                None => return Pull::empty(Cursor::Unstarted, PullStatus::NoJoinPoint),
            }
        } else if self.tracks.audio {
            (self.audio_join_index(config.audio_join_epsilon_ms()), false)
        } else {
            (self.log.next_index(), false)
        };

        let mut frames = Vec::with_capacity(max_count.min(self.log.len()) + 3);
        frames.extend(self.metadata.iter().cloned());
        if self.tracks.video {
            frames.extend(self.video_header.iter().cloned());
        }
        if self.tracks.audio {
            frames.extend(self.audio_header.iter().cloned());
        }

        let next = self.collect(start, max_count, &mut frames);
        Pull {
            frames,
            cursor: Cursor::Next {
                index: next,
                epoch: self.header_epoch,
            },
            status: PullStatus::Joined { start, best_effort },
        }
    }

    /// Walk back from the newest frame until the audio timestamp moves by
    /// at least `epsilon_ms`
    fn audio_join_index(&self, epsilon_ms: u32) -> u64 {
        let (Some(first), Some(last)) = (self.log.first_index(), self.log.last_index()) else {
            return self.log.next_index();
        };

        let mut index = last;
        loop {
            match self.log.get(index) {
                Some(frame)
                    if self.latest_audio_ts.saturating_sub(frame.timestamp) < epsilon_ms
                        && index > first =>
                {
                    index -= 1;
                }
                _ => return index,
            }
        }
    }

    fn resume(&self, index: u64, epoch: u64, max_count: usize) -> Pull {
        if epoch != self.header_epoch {
            return Pull::empty(Cursor::Unstarted, PullStatus::Desynchronized);
        }

        let evicted = match (self.log.first_index(), self.log.last_index()) {
            (Some(first), _) => index < first,
            (None, Some(last)) => index <= last,
            (None, None) => false,
        };
        if evicted {
            return Pull::empty(Cursor::Unstarted, PullStatus::Desynchronized);
        }

        let mut frames = Vec::with_capacity(max_count.min(self.log.len()));
        let next = self.collect(index, max_count, &mut frames);
        Pull {
            frames,
            cursor: Cursor::Next { index: next, epoch },
            status: PullStatus::Continued,
        }
    }

    /// Append up to `max_count` retained frames starting at `from`
    ///
    /// Returns the index following the last frame appended.
    fn collect(&self, from: u64, max_count: usize, out: &mut Vec<MediaFrame>) -> u64 {
        let (Some(first), Some(last)) = (self.log.first_index(), self.log.last_index()) else {
            return from.max(self.log.next_index());
        };

        let mut index = from.max(first);
        let mut taken = 0;
        while index <= last && taken < max_count {
            if let Some(frame) = self.log.get(index) {
                out.push(frame.clone());
                taken += 1;
            }
            index += 1;
        }
        index
    }
}

/// A single ingested or bridged stream
pub struct MediaSource {
    key: StreamKey,
    config: SourceConfig,
    probe: Arc<dyn CodecProbe>,
    hooks: Vec<Arc<dyn SourceHook>>,
    inner: RwLock<Inner>,
    sinks: Mutex<HashMap<u64, mpsc::Sender<()>>>,
    bridges: RwLock<HashMap<BridgeId, Arc<MediaBridge>>>,
    next_sink_id: AtomicU64,
    /// When the subscriber count last dropped to zero
    idle_since: Mutex<Instant>,
    wake_broadcasts: AtomicU64,
    created_at: Instant,
    this: Weak<MediaSource>,
}

/// Builder for [`MediaSource`]
pub struct SourceBuilder {
    key: StreamKey,
    config: SourceConfig,
    probe: Arc<dyn CodecProbe>,
    hooks: Vec<Arc<dyn SourceHook>>,
}

impl SourceBuilder {
    /// Header validation used before caching sequence headers
    pub fn probe(mut self, probe: Arc<dyn CodecProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Add a lifecycle hook
    pub fn hook(mut self, hook: Arc<dyn SourceHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Add several lifecycle hooks
    pub fn hooks(mut self, hooks: impl IntoIterator<Item = Arc<dyn SourceHook>>) -> Self {
        self.hooks.extend(hooks);
        self
    }

    pub fn build(self) -> Arc<MediaSource> {
        let now = Instant::now();
        Arc::new_cyclic(|this| MediaSource {
            inner: RwLock::new(Inner::new(&self.config)),
            key: self.key,
            config: self.config,
            probe: self.probe,
            hooks: self.hooks,
            sinks: Mutex::new(HashMap::new()),
            bridges: RwLock::new(HashMap::new()),
            next_sink_id: AtomicU64::new(1),
            idle_since: Mutex::new(now),
            wake_broadcasts: AtomicU64::new(0),
            created_at: now,
            this: this.clone(),
        })
    }
}

impl MediaSource {
    /// Create a source with default probe and no hooks
    pub fn new(key: StreamKey, config: SourceConfig) -> Arc<Self> {
        Self::builder(key, config).build()
    }

    pub fn builder(key: StreamKey, config: SourceConfig) -> SourceBuilder {
        SourceBuilder {
            key,
            config,
            probe: Arc::new(TrustHeaders),
            hooks: Vec::new(),
        }
    }

    pub fn key(&self) -> &StreamKey {
        &self.key
    }

    pub fn config(&self) -> &SourceConfig {
        &self.config
    }

    pub fn state(&self) -> SourceState {
        self.inner.read().state
    }

    pub fn is_ready(&self) -> bool {
        self.state() == SourceState::Ready
    }

    pub fn is_closed(&self) -> bool {
        self.state() == SourceState::Closed
    }

    /// Tracks announced by the metadata frame
    pub fn tracks(&self) -> Tracks {
        self.inner.read().tracks
    }

    /// Newest sequence-log index
    pub fn last_index(&self) -> Option<u64> {
        self.inner.read().log.last_index()
    }

    /// Ingest one classified frame
    ///
    /// Never suspends. Sinks are woken according to the configured
    /// throttling once the lock is released.
    pub fn accept(&self, frame: MediaFrame) -> Result<AcceptOutcome, RegistryError> {
        let mut became_ready = false;

        let outcome = {
            let mut inner = self.inner.write();

            if inner.state == SourceState::Closed {
                return Err(RegistryError::SourceClosed(self.key.clone()));
            }

            if frame.is_metadata() {
                inner.accept_metadata(frame);
                became_ready = inner.check_ready();
                AcceptOutcome::MetadataCached
            } else if frame.is_header {
                if let Err(e) = self.probe.check_header(&frame) {
                    inner.counters.malformed_headers += 1;
                    tracing::warn!(
                        stream = %self.key,
                        track = %frame.frame_type,
                        error = %e,
                        "Dropping malformed sequence header"
                    );
                    return Ok(AcceptOutcome::MalformedHeader);
                }

                let frame_type = frame.frame_type;
                if inner.cache_header(frame) {
                    tracing::debug!(
                        stream = %self.key,
                        track = %frame_type,
                        epoch = inner.header_epoch,
                        "Sequence header cached"
                    );
                }
                became_ready = inner.check_ready();
                AcceptOutcome::HeaderCached(frame_type)
            } else if inner.state != SourceState::Ready {
                inner.counters.frames_not_ready += 1;
                AcceptOutcome::NotReady
            } else {
                AcceptOutcome::Appended(inner.append(frame))
            }
        };

        if became_ready {
            self.fire_ready();
        }
        if let AcceptOutcome::Appended(index) = outcome {
            if self.config.should_wake(index) {
                self.wake_sinks();
            }
        }

        Ok(outcome)
    }

    /// Fetch frames for a consumer
    ///
    /// An `Unstarted` cursor runs the join algorithm: metadata and headers
    /// first, then the log from a keyframe at least `join_staleness` behind
    /// the newest video frame (or nearly live for audio-only streams). A
    /// positioned cursor continues contiguously. Empty results are not
    /// errors; see [`PullStatus`].
    pub fn get_pkts(&self, cursor: Cursor, max_count: usize) -> Result<Pull, RegistryError> {
        let inner = self.inner.read();

        if inner.state == SourceState::Closed {
            return Err(RegistryError::SourceClosed(self.key.clone()));
        }

        Ok(match cursor {
            Cursor::Unstarted => inner.join(&self.config, max_count),
            Cursor::Next { index, epoch } => inner.resume(index, epoch, max_count),
        })
    }

    /// Attach a new consumer
    ///
    /// The sink starts with a pending wakeup so its first pull happens
    /// immediately. Dropping the sink detaches it.
    pub fn attach(&self) -> Result<MediaSink, RegistryError> {
        let source = self
            .this
            .upgrade()
            .ok_or_else(|| RegistryError::SourceClosed(self.key.clone()))?;

        if self.is_closed() {
            return Err(RegistryError::SourceClosed(self.key.clone()));
        }

        let id = self.next_sink_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(1);
        let _ = tx.try_send(());

        let sinks = {
            let mut sinks = self.sinks.lock();
            sinks.insert(id, tx);
            sinks.len()
        };

        tracing::debug!(stream = %self.key, sink_id = id, sinks = sinks, "Sink attached");

        Ok(MediaSink::new(id, source, rx, &self.config))
    }

    /// Detach a consumer
    pub fn detach(&self, sink_id: u64) {
        let removed = self.sinks.lock().remove(&sink_id).is_some();
        if !removed {
            return;
        }

        let remaining = self.subscriber_count();
        if remaining == 0 {
            *self.idle_since.lock() = Instant::now();
        }

        tracing::debug!(
            stream = %self.key,
            sink_id = sink_id,
            subscribers = remaining,
            "Sink detached"
        );
    }

    /// Sinks plus bridges currently fed by this source
    pub fn subscriber_count(&self) -> usize {
        let sinks = self.sinks.lock().len();
        let bridges = self.bridges.read().len();
        sinks + bridges
    }

    /// Since when the source has had no subscribers, `None` while it has some
    pub fn idle_since(&self) -> Option<Instant> {
        if self.subscriber_count() == 0 {
            Some(*self.idle_since.lock())
        } else {
            None
        }
    }

    /// Return the bridge for `id`, creating it on first request
    ///
    /// A new bridge attaches a sink to this source and publishes into a fresh
    /// downstream source. If this source is already ready the bridge is told
    /// so immediately. Must be called from within a tokio runtime.
    pub fn get_or_create_bridge(
        &self,
        id: BridgeId,
        factory: &dyn BridgeFactory,
    ) -> Result<Arc<MediaBridge>, RegistryError> {
        if self.is_closed() {
            return Err(RegistryError::SourceClosed(self.key.clone()));
        }
        if let Some(bridge) = self.bridges.read().get(&id) {
            return Ok(Arc::clone(bridge));
        }

        let source = self
            .this
            .upgrade()
            .ok_or_else(|| RegistryError::SourceClosed(self.key.clone()))?;
        let created = MediaBridge::spawn(&source, id.clone(), factory)?;

        let existing = {
            let mut bridges = self.bridges.write();
            match bridges.get(&id) {
                Some(bridge) => Some(Arc::clone(bridge)),
                None => {
                    bridges.insert(id.clone(), Arc::clone(&created));
                    None
                }
            }
        };

        // Lost a creation race
        if let Some(bridge) = existing {
            created.close();
            return Ok(bridge);
        }

        // Closed while the bridge was being built
        if self.is_closed() {
            created.close();
            return Err(RegistryError::SourceClosed(self.key.clone()));
        }

        tracing::info!(stream = %self.key, target = %id.target, "Bridge created");

        if self.is_ready() {
            created.notify_upstream_ready(&self.ready_info());
        }

        Ok(created)
    }

    /// Look up an existing bridge
    pub fn bridge(&self, id: &BridgeId) -> Option<Arc<MediaBridge>> {
        self.bridges.read().get(id).cloned()
    }

    /// Unregister whatever bridge is stored under `id`
    pub fn remove_bridge(&self, id: &BridgeId) -> Option<Arc<MediaBridge>> {
        let removed = self.bridges.write().remove(id);
        if removed.is_some() && self.subscriber_count() == 0 {
            *self.idle_since.lock() = Instant::now();
        }
        removed
    }

    /// Unregister `bridge`, leaving any other bridge stored under its id alone
    pub(super) fn release_bridge(&self, bridge: &MediaBridge) -> bool {
        let released = {
            let mut bridges = self.bridges.write();
            match bridges.get(bridge.id()) {
                Some(stored) if std::ptr::eq(Arc::as_ptr(stored), bridge) => {
                    bridges.remove(bridge.id());
                    true
                }
                _ => false,
            }
        };
        if released && self.subscriber_count() == 0 {
            *self.idle_since.lock() = Instant::now();
        }
        released
    }

    pub fn bridge_count(&self) -> usize {
        self.bridges.read().len()
    }

    /// Close the source
    ///
    /// Drops every sink's wake channel (ending their pull loops) and closes
    /// every bridge. Idempotent.
    pub fn close(&self) {
        {
            let mut inner = self.inner.write();
            if inner.state == SourceState::Closed {
                return;
            }
            inner.state = SourceState::Closed;
            inner.log.clear();
            inner.keyframes.clear();
        }

        let sinks = std::mem::take(&mut *self.sinks.lock());
        let bridges: Vec<_> = self.bridges.write().drain().map(|(_, b)| b).collect();

        tracing::info!(
            stream = %self.key,
            sinks = sinks.len(),
            bridges = bridges.len(),
            "Source closed"
        );

        drop(sinks);
        for bridge in bridges {
            bridge.close();
        }
        for hook in &self.hooks {
            hook.on_close(&self.key);
        }
    }

    /// Metadata and headers as currently cached
    pub fn ready_info(&self) -> ReadyInfo {
        let inner = self.inner.read();
        ReadyInfo {
            key: self.key.clone(),
            tracks: inner.tracks,
            metadata: inner.metadata.clone(),
            video_header: inner.video_header.clone(),
            audio_header: inner.audio_header.clone(),
        }
    }

    pub fn stats(&self) -> SourceStats {
        let sink_count = self.sinks.lock().len();
        let bridge_count = self.bridges.read().len();
        let inner = self.inner.read();
        SourceStats {
            stream_key: self.key.to_string(),
            state: inner.state,
            uptime: self.created_at.elapsed(),
            frames_logged: inner.counters.frames_logged,
            video_frames: inner.counters.video_frames,
            audio_frames: inner.counters.audio_frames,
            keyframes: inner.counters.keyframes,
            bytes_received: inner.counters.bytes_received,
            frames_not_ready: inner.counters.frames_not_ready,
            malformed_headers: inner.counters.malformed_headers,
            wake_broadcasts: self.wake_broadcasts.load(Ordering::Relaxed),
            retained_frames: inner.log.len(),
            retained_bytes: inner.log.retained_bytes(),
            last_video_ts: inner.latest_video_ts,
            last_audio_ts: inner.latest_audio_ts,
            sink_count,
            bridge_count,
        }
    }

    fn fire_ready(&self) {
        tracing::info!(
            stream = %self.key,
            tracks = ?self.tracks(),
            "Source ready"
        );

        if let Some(source) = self.this.upgrade() {
            for hook in &self.hooks {
                hook.on_ready(&source);
            }
        }

        let bridges: Vec<_> = self.bridges.read().values().cloned().collect();
        if !bridges.is_empty() {
            let info = self.ready_info();
            for bridge in bridges {
                bridge.notify_upstream_ready(&info);
            }
        }

        self.wake_sinks();
    }

    /// Schedule every attached sink to pull
    fn wake_sinks(&self) {
        let sinks = self.sinks.lock();
        for wake in sinks.values() {
            // A full channel already holds a pending wakeup
            let _ = wake.try_send(());
        }
        self.wake_broadcasts.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(stream = %self.key, sinks = sinks.len(), "Woke sinks");
    }
}

impl std::fmt::Debug for MediaSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaSource")
            .field("key", &self.key)
            .field("state", &self.state())
            .finish()
    }
}
