//! Media sink
//!
//! A sink is one consumer's view of a [`MediaSource`]: a cursor into the
//! source's sequence log plus a wakeup channel. The source never pushes
//! frames; it only wakes sinks, and each sink pulls at its own pace.
//!
//! The wakeup channel holds at most one pending token, so any number of
//! wakes between two pulls coalesce into one. Closing the source drops the
//! sending side, which ends the sink's loop.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::media::MediaFrame;
use crate::stats::SinkStats;

use super::config::SourceConfig;
use super::error::RegistryError;
use super::source::{Cursor, MediaSource, PullStatus};

/// Destination for frames pulled by a sink
///
/// Implemented by transport writers (RTMP, HTTP-FLV...) and by bridges.
pub trait FrameWriter: Send {
    fn write_frames(&mut self, frames: Vec<MediaFrame>) -> impl Future<Output = Result<()>> + Send;
}

impl FrameWriter for Vec<MediaFrame> {
    async fn write_frames(&mut self, frames: Vec<MediaFrame>) -> Result<()> {
        self.extend(frames);
        Ok(())
    }
}

impl FrameWriter for mpsc::Sender<MediaFrame> {
    async fn write_frames(&mut self, frames: Vec<MediaFrame>) -> Result<()> {
        for frame in frames {
            self.send(frame)
                .await
                .map_err(|_| Error::Writer("receiver dropped".into()))?;
        }
        Ok(())
    }
}

/// A consumer attached to a media source
pub struct MediaSink {
    id: u64,
    source: Arc<MediaSource>,
    cursor: Cursor,
    wake_rx: mpsc::Receiver<()>,
    batch_size: usize,
    poll_interval: Duration,
    stats: SinkStats,
}

impl MediaSink {
    pub(super) fn new(
        id: u64,
        source: Arc<MediaSource>,
        wake_rx: mpsc::Receiver<()>,
        config: &SourceConfig,
    ) -> Self {
        Self {
            id,
            source,
            cursor: Cursor::Unstarted,
            wake_rx,
            batch_size: config.sink_batch_size,
            poll_interval: config.sink_poll_interval,
            stats: SinkStats::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn source(&self) -> &Arc<MediaSource> {
        &self.source
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    pub fn stats(&self) -> &SinkStats {
        &self.stats
    }

    /// Pull one batch from the source
    ///
    /// Runs the join on first use. A sink that fell out of the retention
    /// window (or whose headers changed) is reset and re-joined in the same
    /// call, so the caller sees a fresh header replay.
    pub fn pull(&mut self) -> std::result::Result<Vec<MediaFrame>, RegistryError> {
        loop {
            let pull = self.source.get_pkts(self.cursor, self.batch_size)?;

            match pull.status {
                PullStatus::Desynchronized => {
                    self.stats.resyncs += 1;
                    self.cursor = Cursor::Unstarted;
                    tracing::debug!(
                        stream = %self.source.key(),
                        sink_id = self.id,
                        "Sink fell behind, re-joining"
                    );
                    continue;
                }
                PullStatus::Joined { start, best_effort } => {
                    self.stats.joins += 1;
                    if best_effort {
                        self.stats.best_effort_joins += 1;
                    }
                    tracing::debug!(
                        stream = %self.source.key(),
                        sink_id = self.id,
                        start = start,
                        best_effort = best_effort,
                        "Sink joined"
                    );
                }
                PullStatus::NoJoinPoint => self.stats.failed_joins += 1,
                PullStatus::NotReady | PullStatus::Continued => {}
            }

            self.cursor = pull.cursor;
            if !pull.frames.is_empty() {
                self.stats.batches += 1;
                self.stats.frames_delivered += pull.frames.len() as u64;
            }
            return Ok(pull.frames);
        }
    }

    /// Wait for the next wakeup
    ///
    /// Returns `false` once the source has closed or detached this sink.
    pub async fn wait(&mut self) -> bool {
        self.wake_rx.recv().await.is_some()
    }

    /// Pull and write batches until caught up
    ///
    /// Returns the number of frames written.
    pub async fn drain<W: FrameWriter>(&mut self, writer: &mut W) -> Result<usize> {
        let mut written = 0;
        loop {
            let frames = self.pull()?;
            if frames.is_empty() {
                return Ok(written);
            }

            let count = frames.len();
            writer.write_frames(frames).await?;
            written += count;

            if count < self.batch_size {
                return Ok(written);
            }
        }
    }

    /// Deliver frames to `writer` until the source closes
    ///
    /// Drains on every wakeup, and on a fallback poll timer so a missed
    /// throttled wakeup only delays delivery. Writer errors end the loop.
    pub async fn run<W: FrameWriter>(mut self, mut writer: W) -> Result<()> {
        tracing::debug!(stream = %self.source.key(), sink_id = self.id, "Sink loop started");

        loop {
            match self.drain(&mut writer).await {
                Ok(_) => {}
                Err(Error::Registry(RegistryError::SourceClosed(_))) => break,
                Err(e) => {
                    tracing::debug!(
                        stream = %self.source.key(),
                        sink_id = self.id,
                        error = %e,
                        "Sink loop ended by writer"
                    );
                    return Err(e);
                }
            }

            match tokio::time::timeout(self.poll_interval, self.wake_rx.recv()).await {
                Ok(Some(())) => {}
                Ok(None) => break,
                Err(_) => {}
            }
        }

        tracing::debug!(
            stream = %self.source.key(),
            sink_id = self.id,
            frames = self.stats.frames_delivered,
            "Sink loop finished"
        );
        Ok(())
    }
}

impl Drop for MediaSink {
    fn drop(&mut self) {
        self.source.detach(self.id);
    }
}

impl std::fmt::Debug for MediaSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaSink")
            .field("id", &self.id)
            .field("stream", self.source.key())
            .field("cursor", &self.cursor)
            .finish()
    }
}
