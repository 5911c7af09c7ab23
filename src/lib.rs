//! Live media distribution engine
//!
//! One publisher per stream feeds a [`MediaSource`]; any number of viewers
//! attach [`MediaSink`]s that pull from the source's bounded sequence log at
//! their own pace. Late joiners start from a keyframe a little behind live,
//! after a replay of the stream's metadata and codec headers. Viewers of
//! another protocol go through a lazily created [`MediaBridge`] that
//! republishes the stream and tears itself down when nobody watches.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use relay_rs::media::flv;
//! use relay_rs::{Packet, StreamKey, StreamRegistry, Tracks};
//!
//! # async fn demo() -> relay_rs::Result<()> {
//! let registry = Arc::new(StreamRegistry::new());
//! let key = StreamKey::new("live", "camera");
//!
//! let source = registry.publish(&key, 1).await?;
//! let metadata = Packet::copy_from_slice(b"onMetaData")?;
//! source.accept(flv::script_frame(metadata, Tracks::video_only()))?;
//!
//! let sink = registry.subscribe(&key).await?;
//! let (tx, mut rx) = tokio::sync::mpsc::channel(256);
//! tokio::spawn(sink.run(tx));
//! # let _ = rx.recv().await;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod media;
pub mod registry;
pub mod stats;

pub use error::{Error, MediaError, Result};
pub use media::{FrameType, MediaFrame, Packet, Tracks};
pub use registry::{
    BridgeFactory, BridgeId, Cursor, FrameWriter, MediaBridge, MediaSink, MediaSource, Protocol,
    RegistryConfig, RegistryError, SourceConfig, SourceHook, StreamKey, StreamRegistry,
};
pub use stats::{SinkStats, SourceStats};
