//! Media handling
//!
//! This module provides:
//! - Packet buffers for ingest
//! - Classified media frames
//! - The bounded sequence log and keyframe index used for joins
//! - FLV tag classification and header validation

pub mod flv;
pub mod frame;
pub mod keyframe;
pub mod packet;
pub mod probe;
pub mod ring;

pub use flv::FlvHeaderProbe;
pub use frame::{FrameType, MediaFrame, Tracks};
pub use keyframe::{JoinPoint, KeyframeIndex};
pub use packet::Packet;
pub use probe::{CodecProbe, TrustHeaders};
pub use ring::SequenceLog;
