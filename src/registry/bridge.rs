//! Protocol bridges
//!
//! A bridge republishes one source for consumers of another protocol. It
//! attaches an ordinary sink to the upstream source, runs every pulled frame
//! through a [`Translator`], and accepts the output into its own downstream
//! source. Downstream consumers attach to that source like any other.
//!
//! ```text
//!   upstream MediaSource ──► MediaSink ──► Translator ──► downstream MediaSource ──► sinks
//! ```
//!
//! Bridges are created lazily on the first request for a protocol and close
//! themselves once their downstream source has had no subscribers for the
//! configured idle timeout.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::error::{MediaError, Result};
use crate::media::MediaFrame;

use super::error::RegistryError;
use super::key::{Protocol, StreamKey};
use super::sink::FrameWriter;
use super::source::{MediaSource, ReadyInfo};

/// Identity of a bridge: one per (stream, target protocol)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BridgeId {
    pub target: Protocol,
    pub key: StreamKey,
}

impl BridgeId {
    pub fn new(target: Protocol, key: StreamKey) -> Self {
        Self { target, key }
    }
}

impl std::fmt::Display for BridgeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.key, self.target)
    }
}

/// Converts frames from the upstream encapsulation to the target one
pub trait Translator: Send {
    /// Translate one frame, pushing zero or more frames to `out`
    fn translate(
        &mut self,
        frame: MediaFrame,
        out: &mut Vec<MediaFrame>,
    ) -> std::result::Result<(), MediaError>;

    /// Upstream codecs are known; may be called more than once
    fn on_upstream_ready(&mut self, _info: &ReadyInfo) {}
}

/// Creates translators for new bridges
pub trait BridgeFactory: Send + Sync {
    fn create(&self, id: &BridgeId) -> Box<dyn Translator>;
}

/// Factory for bridges that forward frames unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughFactory;

impl BridgeFactory for PassthroughFactory {
    fn create(&self, _id: &BridgeId) -> Box<dyn Translator> {
        Box::new(PassthroughTranslator)
    }
}

/// Forwards every frame as is
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughTranslator;

impl Translator for PassthroughTranslator {
    fn translate(
        &mut self,
        frame: MediaFrame,
        out: &mut Vec<MediaFrame>,
    ) -> std::result::Result<(), MediaError> {
        out.push(frame);
        Ok(())
    }
}

type SharedTranslator = Arc<Mutex<Box<dyn Translator>>>;

/// Feeds translated upstream frames into the downstream source
struct BridgeWriter {
    id: BridgeId,
    translator: SharedTranslator,
    downstream: Arc<MediaSource>,
}

impl FrameWriter for BridgeWriter {
    async fn write_frames(&mut self, frames: Vec<MediaFrame>) -> Result<()> {
        let mut out = Vec::with_capacity(frames.len());
        {
            let mut translator = self.translator.lock();
            for frame in frames {
                if let Err(e) = translator.translate(frame, &mut out) {
                    tracing::warn!(bridge = %self.id, error = %e, "Dropping untranslatable frame");
                }
            }
        }

        for frame in out {
            self.downstream.accept(frame)?;
        }
        Ok(())
    }
}

/// A running protocol bridge
pub struct MediaBridge {
    id: BridgeId,
    upstream: Weak<MediaSource>,
    downstream: Arc<MediaSource>,
    translator: SharedTranslator,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl MediaBridge {
    /// Attach to `upstream` and start the pump and idle timer tasks
    pub(super) fn spawn(
        upstream: &Arc<MediaSource>,
        id: BridgeId,
        factory: &dyn BridgeFactory,
    ) -> std::result::Result<Arc<Self>, RegistryError> {
        let sink = upstream.attach()?;
        let config = upstream.config().clone();
        let downstream = MediaSource::new(id.key.clone(), config.clone());
        let translator: SharedTranslator = Arc::new(Mutex::new(factory.create(&id)));

        let bridge = Arc::new(Self {
            id: id.clone(),
            upstream: Arc::downgrade(upstream),
            downstream: Arc::clone(&downstream),
            translator: Arc::clone(&translator),
            tasks: Mutex::new(Vec::with_capacity(2)),
            closed: AtomicBool::new(false),
        });

        let writer = BridgeWriter {
            id: id.clone(),
            translator,
            downstream,
        };
        let pump_id = id.clone();
        let pump = tokio::spawn(async move {
            if let Err(e) = sink.run(writer).await {
                tracing::debug!(bridge = %pump_id, error = %e, "Bridge pump stopped");
            }
        });

        let weak = Arc::downgrade(&bridge);
        let period = config.idle_check_period();
        let timeout = config.bridge_idle_timeout;
        let timer = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let Some(bridge) = weak.upgrade() else {
                    break;
                };
                if bridge.is_closed() {
                    break;
                }
                if bridge.idle_for(timeout) {
                    tracing::info!(
                        bridge = %bridge.id,
                        timeout_secs = timeout.as_secs(),
                        "Bridge idle, closing"
                    );
                    bridge.close();
                    break;
                }
            }
        });

        bridge.tasks.lock().extend([pump, timer]);
        Ok(bridge)
    }

    pub fn id(&self) -> &BridgeId {
        &self.id
    }

    /// Source that downstream consumers attach to
    pub fn downstream(&self) -> &Arc<MediaSource> {
        &self.downstream
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Forward upstream readiness to the translator
    pub fn notify_upstream_ready(&self, info: &ReadyInfo) {
        tracing::debug!(bridge = %self.id, "Upstream ready");
        self.translator.lock().on_upstream_ready(info);
    }

    fn idle_for(&self, timeout: std::time::Duration) -> bool {
        self.downstream
            .idle_since()
            .is_some_and(|since| since.elapsed() >= timeout)
    }

    /// Tear the bridge down
    ///
    /// Stops the pump (detaching from upstream), closes the downstream source
    /// and unregisters from the upstream source. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.downstream.close();
        if let Some(upstream) = self.upstream.upgrade() {
            upstream.release_bridge(self);
        }

        tracing::info!(bridge = %self.id, "Bridge closed");
    }
}

impl Drop for MediaBridge {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}

impl std::fmt::Debug for MediaBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaBridge")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}
