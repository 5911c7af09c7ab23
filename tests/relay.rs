//! End-to-end tests: publisher → registry → viewers and bridged viewers

use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, Bytes};
use tokio::sync::mpsc;

use relay_rs::media::flv::{self, FlvHeaderProbe};
use relay_rs::registry::AcceptOutcome;
use relay_rs::{
    Error, MediaError, MediaFrame, MediaSource, Packet, Protocol, RegistryConfig, SourceConfig,
    StreamKey, StreamRegistry, Tracks,
};

const AVC_HEADER: &[u8] = &[
    0x17, 0x00, 0x00, 0x00, 0x00, 0x01, 0x64, 0x00, 0x1F, 0xFF, 0xE1, 0x00, 0x04, 0x67, 0x64,
    0x00, 0x1F, 0x01, 0x00, 0x02, 0x68, 0xEE,
];
const AAC_HEADER: &[u8] = &[0xAF, 0x00, 0x12, 0x10];

fn registry() -> Arc<StreamRegistry> {
    let config = RegistryConfig::default().source(
        SourceConfig::default()
            .join_staleness(Duration::from_millis(500))
            .sink_poll_interval(Duration::from_millis(50)),
    );
    Arc::new(StreamRegistry::with_config(config).with_probe(Arc::new(FlvHeaderProbe)))
}

/// Read a whole tag body the way a transport's demuxer does
fn tag(data: &[u8]) -> Packet {
    let mut src = data;
    flv::read_tag_body(&mut src, data.len()).unwrap()
}

/// Ingest one video tag whose body length was declared as `size`
fn ingest_video(
    source: &MediaSource,
    src: &mut impl Buf,
    timestamp: u32,
    size: usize,
) -> relay_rs::Result<AcceptOutcome> {
    let body = flv::read_tag_body(src, size)?;
    Ok(source.accept(flv::video_frame(timestamp, body))?)
}

fn publish_headers(source: &MediaSource) {
    source
        .accept(flv::script_frame(tag(b"onMetaData"), Tracks::audio_video()))
        .unwrap();
    source
        .accept(flv::video_frame(0, tag(AVC_HEADER)))
        .unwrap();
    source
        .accept(flv::audio_frame(0, tag(AAC_HEADER)))
        .unwrap();
}

/// One second of 25fps video with interleaved audio, keyframe on the first frame
fn publish_second(source: &MediaSource, second: u32) {
    for n in 0..25u32 {
        let ts = second * 1000 + n * 40;
        let tag_byte = if n == 0 { 0x17 } else { 0x27 };
        source
            .accept(flv::video_frame(ts, tag(&[tag_byte, 0x01, 0, 0, 0, 0xAA])))
            .unwrap();
        source
            .accept(flv::audio_frame(ts, tag(&[0xAF, 0x01, 0x21, 0x00])))
            .unwrap();
    }
}

async fn recv_until_keyframe(rx: &mut mpsc::Receiver<MediaFrame>) -> Vec<MediaFrame> {
    let mut frames = Vec::new();
    while let Some(frame) = rx.recv().await {
        let done = frame.is_video_keyframe();
        frames.push(frame);
        if done {
            break;
        }
    }
    frames
}

#[tokio::test]
async fn test_viewers_join_at_keyframe_after_headers() {
    let registry = registry();
    let key = StreamKey::new("live", "e2e");
    let source = registry.publish(&key, 1).await.unwrap();

    publish_headers(&source);
    assert!(source.is_ready());
    for second in 0..3 {
        publish_second(&source, second);
    }

    let mut viewers = Vec::new();
    for _ in 0..2 {
        let sink = registry.subscribe(&key).await.unwrap();
        let (tx, rx) = mpsc::channel(1024);
        tokio::spawn(sink.run(tx));
        viewers.push(rx);
    }

    for rx in &mut viewers {
        let frames = recv_until_keyframe(rx).await;
        assert_eq!(frames.len(), 4);
        assert!(frames[0].is_metadata());
        assert!(frames[1].is_video() && frames[1].is_header);
        assert!(frames[2].is_audio() && frames[2].is_header);

        // Newest keyframe at least 500ms behind the live edge
        assert_eq!(frames[3].timestamp, 2000);
    }

    // Live frames keep flowing to everyone
    source
        .accept(flv::video_frame(3000, tag(&[0x17, 0x01, 0, 0, 0])))
        .unwrap();
    for rx in &mut viewers {
        loop {
            let frame = rx.recv().await.unwrap();
            if frame.timestamp == 3000 {
                assert!(frame.is_video_keyframe());
                break;
            }
        }
    }

    registry.unpublish(&key, 1).await;
    for rx in &mut viewers {
        while rx.recv().await.is_some() {}
    }
    assert_eq!(registry.stream_count().await, 0);
}

#[tokio::test]
async fn test_malformed_header_is_not_cached() {
    let registry = registry();
    let key = StreamKey::new("live", "broken");
    let source = registry.publish(&key, 1).await.unwrap();

    source
        .accept(flv::script_frame(tag(b"onMetaData"), Tracks::video_only()))
        .unwrap();
    let outcome = source
        .accept(flv::video_frame(0, tag(&[0x17, 0x00, 0, 0, 0, 0x01])))
        .unwrap();

    assert_eq!(outcome, AcceptOutcome::MalformedHeader);
    assert!(!source.is_ready());
    assert_eq!(source.stats().malformed_headers, 1);
}

#[tokio::test]
async fn test_bridged_viewer_receives_stream() {
    let registry = registry();
    let key = StreamKey::new("live", "bridged");
    let source = registry.publish(&key, 1).await.unwrap();

    let sink = registry
        .subscribe_bridged(&key, Protocol::HttpFlv)
        .await
        .unwrap();
    let (tx, mut rx) = mpsc::channel(1024);
    tokio::spawn(sink.run(tx));

    publish_headers(&source);
    for second in 0..2 {
        publish_second(&source, second);
    }

    let frames = recv_until_keyframe(&mut rx).await;
    assert!(frames[0].is_metadata());
    assert!(frames.last().unwrap().is_video_keyframe());
    assert_eq!(source.stats().bridge_count, 1);

    // Upstream close tears down the bridge and ends the viewer
    registry.unpublish(&key, 1).await;
    while rx.recv().await.is_some() {}
    assert_eq!(source.bridge_count(), 0);
}

#[tokio::test]
async fn test_oversized_tag_is_refused() {
    let registry = registry();
    let key = StreamKey::new("live", "oversized");
    let source = registry.publish(&key, 1).await.unwrap();
    publish_headers(&source);
    let last = source.last_index();

    // Corrupt length field claims more memory than can ever be allocated
    let mut src = Bytes::from_static(&[0x17, 0x01, 0, 0, 0, 0xAA]);
    let result = ingest_video(&source, &mut src, 40, usize::MAX);
    assert!(matches!(
        result,
        Err(Error::Media(MediaError::AllocationFailed { capacity: usize::MAX }))
    ));
    assert_eq!(source.last_index(), last);
    assert!(source.is_ready());

    // The same bytes ingest normally with the right length
    let size = src.len();
    let outcome = ingest_video(&source, &mut src, 40, size).unwrap();
    assert!(matches!(outcome, AcceptOutcome::Appended(_)));
    assert_ne!(source.last_index(), last);
}
