//! Classified media frames
//!
//! A [`MediaFrame`] is the unit the distribution engine stores and hands out:
//! an already-encoded payload plus the handful of flags the engine branches on.
//! The payload is never inspected here.

use bytes::Bytes;

/// Elementary stream a frame belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    /// Video frame or video sequence header
    Video,
    /// Audio frame or audio sequence header
    Audio,
    /// Stream metadata (onMetaData, SDP summary, ...)
    Metadata,
}

impl std::fmt::Display for FrameType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameType::Video => write!(f, "video"),
            FrameType::Audio => write!(f, "audio"),
            FrameType::Metadata => write!(f, "metadata"),
        }
    }
}

/// Elementary streams announced by a metadata frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tracks {
    pub audio: bool,
    pub video: bool,
}

impl Tracks {
    pub fn new(audio: bool, video: bool) -> Self {
        Self { audio, video }
    }

    pub fn audio_video() -> Self {
        Self::new(true, true)
    }

    pub fn audio_only() -> Self {
        Self::new(true, false)
    }

    pub fn video_only() -> Self {
        Self::new(false, true)
    }
}

/// A frame accepted by a media source
///
/// Cheap to clone: the payload is a reference-counted `Bytes`.
#[derive(Debug, Clone)]
pub struct MediaFrame {
    /// Elementary stream
    pub frame_type: FrameType,
    /// Timestamp in milliseconds
    pub timestamp: u32,
    /// Encoded payload
    pub data: Bytes,
    /// Whether this is a keyframe (video only)
    pub is_keyframe: bool,
    /// Whether this is a sequence/config header
    pub is_header: bool,
    /// Track layout (metadata only)
    pub tracks: Option<Tracks>,
}

impl MediaFrame {
    /// Create a video frame
    pub fn video(timestamp: u32, data: Bytes, is_keyframe: bool, is_header: bool) -> Self {
        Self {
            frame_type: FrameType::Video,
            timestamp,
            data,
            is_keyframe,
            is_header,
            tracks: None,
        }
    }

    /// Create an audio frame
    pub fn audio(timestamp: u32, data: Bytes, is_header: bool) -> Self {
        Self {
            frame_type: FrameType::Audio,
            timestamp,
            data,
            is_keyframe: false,
            is_header,
            tracks: None,
        }
    }

    /// Create a metadata frame announcing which tracks the stream carries
    pub fn metadata(data: Bytes, tracks: Tracks) -> Self {
        Self {
            frame_type: FrameType::Metadata,
            timestamp: 0,
            data,
            is_keyframe: false,
            is_header: false,
            tracks: Some(tracks),
        }
    }

    pub fn is_video(&self) -> bool {
        self.frame_type == FrameType::Video
    }

    pub fn is_audio(&self) -> bool {
        self.frame_type == FrameType::Audio
    }

    pub fn is_metadata(&self) -> bool {
        self.frame_type == FrameType::Metadata
    }

    /// Video keyframe that can start a GOP
    pub fn is_video_keyframe(&self) -> bool {
        self.is_video() && self.is_keyframe && !self.is_header
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}
