//! Relay demo - one simulated publisher, two viewers and a bridged viewer
//!
//! Run with: cargo run --example relay
//!
//! Set `RUST_LOG=relay_rs=debug` to watch joins, wakeups and bridge lifecycle.
//!
//! # Architecture
//!
//! ```text
//!   publisher task ──accept()──► MediaSource "live/demo"
//!                                   │
//!                 ┌─────────────────┼─────────────────────┐
//!                 ▼                 ▼                     ▼
//!             viewer-1          viewer-2          MediaBridge (rtsp)
//!                                                         │
//!                                                         ▼
//!                                                  bridged viewer
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use relay_rs::media::flv::{self, FlvHeaderProbe};
use relay_rs::{
    MediaFrame, MediaSource, Packet, Protocol, RegistryConfig, SourceConfig, StreamKey,
    StreamRegistry, Tracks,
};

const FPS: u32 = 25;
const GOP_FRAMES: u32 = 25;

const METADATA: &[u8] = b"onMetaData";
const AVC_HEADER: &[u8] = &[
    0x17, 0x00, 0x00, 0x00, 0x00, 0x01, 0x64, 0x00, 0x1F, 0xFF, 0xE1, 0x00, 0x04, 0x67, 0x64,
    0x00, 0x1F, 0x01, 0x00, 0x02, 0x68, 0xEE,
];
const AAC_HEADER: &[u8] = &[0xAF, 0x00, 0x12, 0x10];

/// Demux one tag body out of the encoder's byte stream
fn read_tag(stream: &mut &[u8], size: usize) -> relay_rs::Result<Packet> {
    Ok(flv::read_tag_body(stream, size)?)
}

/// Simulated encoder pushing FLV tags in real time
async fn publish(source: Arc<MediaSource>, seconds: u32) -> relay_rs::Result<()> {
    let headers = [METADATA, AVC_HEADER, AAC_HEADER].concat();
    let mut stream = headers.as_slice();
    let metadata = read_tag(&mut stream, METADATA.len())?;
    source.accept(flv::script_frame(metadata, Tracks::audio_video()))?;
    source.accept(flv::video_frame(0, read_tag(&mut stream, AVC_HEADER.len())?))?;
    source.accept(flv::audio_frame(0, read_tag(&mut stream, AAC_HEADER.len())?))?;

    let frame_ms = 1000 / FPS;
    let mut ticker = tokio::time::interval(Duration::from_millis(frame_ms as u64));
    for n in 0..seconds * FPS {
        ticker.tick().await;
        let ts = n * frame_ms;
        let tag = if n % GOP_FRAMES == 0 { 0x17 } else { 0x27 };
        let video = Packet::copy_from_slice(&[tag, 0x01, 0, 0, 0, 0xAA, 0xBB])?;
        let audio = Packet::copy_from_slice(&[0xAF, 0x01, 0x21, 0x00])?;
        source.accept(flv::video_frame(ts, video))?;
        source.accept(flv::audio_frame(ts, audio))?;
    }
    Ok(())
}

/// Print what a viewer receives until its stream ends
async fn watch(name: &'static str, mut rx: mpsc::Receiver<MediaFrame>) {
    let mut frames = 0u64;
    let mut first = true;
    while let Some(frame) = rx.recv().await {
        if first || frame.is_header || frame.is_metadata() {
            println!(
                "[{name}] {} ts={} header={} keyframe={}",
                frame.frame_type, frame.timestamp, frame.is_header, frame.is_keyframe
            );
        }
        first = false;
        frames += 1;
    }
    println!("[{name}] stream ended after {frames} frames");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("relay_rs=info")),
        )
        .init();

    let config = RegistryConfig::default().source(
        SourceConfig::default()
            .join_staleness(Duration::from_millis(1000))
            .bridge_idle_timeout(Duration::from_secs(2)),
    );
    let registry = Arc::new(
        StreamRegistry::with_config(config).with_probe(Arc::new(FlvHeaderProbe)),
    );
    let cleanup = registry.spawn_cleanup_task();

    let key = StreamKey::new("live", "demo");
    let source = registry.publish(&key, 1).await?;
    let publisher = tokio::spawn(publish(Arc::clone(&source), 6));

    let mut viewers = Vec::new();
    for (delay, name) in [(0, "viewer-1"), (2500, "viewer-2")] {
        tokio::time::sleep(Duration::from_millis(delay)).await;
        let sink = registry.subscribe(&key).await?;
        let (tx, rx) = mpsc::channel(512);
        tokio::spawn(sink.run(tx));
        viewers.push(tokio::spawn(watch(name, rx)));
    }

    let sink = registry.subscribe_bridged(&key, Protocol::Rtsp).await?;
    let (tx, rx) = mpsc::channel(512);
    let bridged = tokio::spawn(sink.run(tx));
    let bridged_viewer = tokio::spawn(watch("rtsp-viewer", rx));

    // Leave the bridged viewer after a second; the bridge then idles out
    tokio::time::sleep(Duration::from_secs(1)).await;
    bridged.abort();
    let _ = bridged_viewer.await;

    publisher.await??;
    let stats = source.stats();
    println!(
        "source: {} frames, {} keyframes, {} wakeups, {} bridges left",
        stats.frames_logged, stats.keyframes, stats.wake_broadcasts, stats.bridge_count
    );

    registry.unpublish(&key, 1).await;
    for viewer in viewers {
        let _ = viewer.await;
    }
    cleanup.abort();
    Ok(())
}
