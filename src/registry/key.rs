//! Stream identity types

/// Unique identifier for a stream (domain + app + stream name)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamKey {
    /// Virtual host / domain ("" for the default vhost)
    pub domain: String,
    /// Application name (e.g., "live")
    pub app: String,
    /// Stream name/key (e.g., "stream_key_123")
    pub name: String,
}

impl StreamKey {
    /// Create a key on the default domain
    pub fn new(app: impl Into<String>, name: impl Into<String>) -> Self {
        Self::with_domain("", app, name)
    }

    /// Create a key on a specific domain
    pub fn with_domain(
        domain: impl Into<String>,
        app: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            domain: domain.into(),
            app: app.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for StreamKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.domain.is_empty() {
            write!(f, "{}/{}", self.app, self.name)
        } else {
            write!(f, "{}/{}/{}", self.domain, self.app, self.name)
        }
    }
}

/// Wire protocol a stream is exposed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Rtmp,
    HttpFlv,
    Rtsp,
    WebRtc,
    MpegTs,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Protocol::Rtmp => "rtmp",
            Protocol::HttpFlv => "http-flv",
            Protocol::Rtsp => "rtsp",
            Protocol::WebRtc => "webrtc",
            Protocol::MpegTs => "mpegts",
        };
        f.write_str(name)
    }
}
