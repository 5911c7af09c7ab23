//! Statistics for media sources and sinks

use std::time::Duration;

use crate::registry::SourceState;

/// Point-in-time snapshot of a media source
#[derive(Debug, Clone)]
pub struct SourceStats {
    /// Stream key
    pub stream_key: String,
    /// Current state
    pub state: SourceState,
    /// Time since the source was created
    pub uptime: Duration,
    /// Frames appended to the sequence log
    pub frames_logged: u64,
    /// Video frames accepted
    pub video_frames: u64,
    /// Audio frames accepted
    pub audio_frames: u64,
    /// Keyframes accepted
    pub keyframes: u64,
    /// Payload bytes accepted
    pub bytes_received: u64,
    /// Frames turned away before the source was ready
    pub frames_not_ready: u64,
    /// Headers rejected by the codec probe
    pub malformed_headers: u64,
    /// Times the attached sinks were woken
    pub wake_broadcasts: u64,
    /// Frames currently held in the sequence log
    pub retained_frames: usize,
    /// Bytes currently held in the sequence log
    pub retained_bytes: usize,
    /// Last video timestamp
    pub last_video_ts: u32,
    /// Last audio timestamp
    pub last_audio_ts: u32,
    /// Attached sinks
    pub sink_count: usize,
    /// Bridges fed by this source
    pub bridge_count: usize,
}

impl SourceStats {
    /// Calculate ingest bitrate in bits per second
    pub fn bitrate(&self) -> u64 {
        let secs = self.uptime.as_secs();
        if secs > 0 {
            (self.bytes_received * 8) / secs
        } else {
            0
        }
    }

    /// Calculate video framerate
    pub fn framerate(&self) -> f64 {
        let secs = self.uptime.as_secs_f64();
        if secs > 0.0 {
            self.video_frames as f64 / secs
        } else {
            0.0
        }
    }
}

/// Per-sink delivery counters
#[derive(Debug, Clone, Default)]
pub struct SinkStats {
    /// Frames handed to the writer
    pub frames_delivered: u64,
    /// Non-empty batches pulled
    pub batches: u64,
    /// Successful joins (initial and after resync)
    pub joins: u64,
    /// Joins that had to start from an evicted keyframe
    pub best_effort_joins: u64,
    /// Join attempts that found no usable start point
    pub failed_joins: u64,
    /// Times the sink fell behind and re-joined
    pub resyncs: u64,
}

impl SinkStats {
    pub fn new() -> Self {
        Self::default()
    }
}
