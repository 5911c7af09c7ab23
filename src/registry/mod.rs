//! Stream registry and media distribution
//!
//! The registry maps stream keys to media sources. A source keeps a bounded
//! sequence log of recent frames; viewers attach sinks that pull from it at
//! their own pace. Sources never push frames, they only wake sinks.
//!
//! # Architecture
//!
//! ```text
//!                          Arc<StreamRegistry>
//!                     ┌─────────────────────────┐
//!                     │ streams: HashMap<Key,   │
//!                     │   StreamEntry {         │
//!                     │     source: MediaSource │
//!                     │   }                     │
//!                     │ >                       │
//!                     └───────────┬─────────────┘
//!                                 │
//!    [Publisher]                  ▼
//!    source.accept() ──► SequenceLog + KeyframeIndex ──wake──┐
//!                                 │                          │
//!         ┌───────────────────────┼──────────────────┐       │
//!         ▼                       ▼                  ▼       │
//!    [MediaSink]             [MediaSink]        [MediaBridge]◄┘
//!    get_pkts(cursor)        get_pkts(cursor)   Translator ──► downstream MediaSource
//!         │                       │
//!         └──► FrameWriter ──► TCP
//! ```
//!
//! # Zero-Copy Design
//!
//! `bytes::Bytes` uses reference counting, so every sink shares the payload
//! allocation of each logged frame. Cloning a `MediaFrame` out of the log only
//! bumps the reference count.

pub mod bridge;
pub mod config;
pub mod entry;
pub mod error;
pub mod key;
pub mod sink;
pub mod source;
pub mod store;

pub use bridge::{
    BridgeFactory, BridgeId, MediaBridge, PassthroughFactory, PassthroughTranslator, Translator,
};
pub use config::{RegistryConfig, SourceConfig};
pub use entry::StreamEntry;
pub use error::RegistryError;
pub use key::{Protocol, StreamKey};
pub use sink::{FrameWriter, MediaSink};
pub use source::{
    AcceptOutcome, Cursor, MediaSource, Pull, PullStatus, ReadyInfo, SourceBuilder, SourceHook,
    SourceState,
};
pub use store::StreamRegistry;
