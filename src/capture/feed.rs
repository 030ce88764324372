use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::preroll::{write_chunks, PrerollBuffer};
use crate::bridge::{Camera, VideoStream};
use crate::error::{bounded, PrerollError};
use crate::models::StreamChunk;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

const CHUNK_TIMEOUT_SECS: u64 = 5;

pub type SplitResult = std::result::Result<usize, String>;

/// The live recording diverted into an "after" raw file until `until`.
struct SplitSink {
    path: PathBuf,
    file: File,
    until: DateTime<Utc>,
    last_written: Option<DateTime<Utc>>,
    bytes: usize,
    done: oneshot::Sender<SplitResult>,
}

impl SplitSink {
    async fn write(&mut self, chunk: &StreamChunk) -> std::io::Result<()> {
        if self.last_written.is_some_and(|last| chunk.captured_at <= last) {
            return Ok(());
        }
        self.file.write_all(&chunk.data).await?;
        self.bytes += chunk.data.len();
        self.last_written = Some(chunk.captured_at);
        Ok(())
    }

    fn is_complete(&self) -> bool {
        self.last_written.is_some_and(|last| last >= self.until)
    }

    async fn finish(mut self) {
        let result = match self.file.flush().await {
            Ok(()) => Ok(self.bytes),
            Err(err) => Err(format!("failed to flush {}: {err}", self.path.display())),
        };
        let _ = self.done.send(result);
    }

    fn abandon(self, reason: &str) {
        let _ = self.done.send(Err(reason.to_string()));
    }
}

/// Shared view of the live recording used by the event recorder. The pre-roll
/// lock is always taken before the split lock.
#[derive(Clone)]
pub struct FeedHandle {
    preroll: Arc<Mutex<PrerollBuffer>>,
    split: Arc<Mutex<Option<SplitSink>>>,
}

impl FeedHandle {
    fn new(retention: Duration) -> Self {
        Self {
            preroll: Arc::new(Mutex::new(PrerollBuffer::new(retention))),
            split: Arc::new(Mutex::new(None)),
        }
    }

    /// Starts an "after" raw segment at `path` holding everything recorded
    /// after `from` up to `from + length`. Footage already buffered past
    /// `from` seeds the file so the segment starts at the event. The
    /// returned receiver resolves once the segment is complete.
    pub async fn split(
        &self,
        path: &Path,
        from: DateTime<Utc>,
        length: Duration,
    ) -> Result<oneshot::Receiver<SplitResult>> {
        let file = File::create(path)
            .await
            .with_context(|| format!("failed to create {}", path.display()))?;
        let (done_tx, done_rx) = oneshot::channel();
        let mut sink = SplitSink {
            path: path.to_path_buf(),
            file,
            until: from
                .checked_add_signed(chrono::Duration::from_std(length)?)
                .context("after segment length out of range")?,
            last_written: None,
            bytes: 0,
            done: done_tx,
        };

        let preroll = self.preroll.lock().await;
        let mut slot = self.split.lock().await;
        if slot.is_some() {
            bail!("a split is already in progress");
        }

        for chunk in preroll.since(from) {
            sink.write(&chunk)
                .await
                .with_context(|| format!("failed to seed {}", path.display()))?;
        }
        drop(preroll);

        if sink.is_complete() {
            sink.finish().await;
        } else {
            *slot = Some(sink);
        }
        log_debug!("Live recording split into {}", path.display());
        Ok(done_rx)
    }

    /// Copies the `length` seconds preceding `event_at` into a raw file.
    /// Feeding is held off only while the window is copied out of the buffer.
    pub async fn drain_to(
        &self,
        path: &Path,
        event_at: DateTime<Utc>,
        length: Duration,
    ) -> Result<usize, PrerollError> {
        let window = {
            let preroll = self.preroll.lock().await;
            preroll.window(event_at, length)?
        };
        let written = write_chunks(path, &window).await?;
        log_debug!(
            "Drained {} chunks ({} bytes) of pre-roll into {}",
            window.len(),
            written,
            path.display()
        );
        Ok(written)
    }

    pub async fn cancel_split(&self, reason: &str) {
        if let Some(sink) = self.split.lock().await.take() {
            sink.abandon(reason);
        }
    }

    pub async fn buffered_duration(&self) -> Duration {
        self.preroll.lock().await.buffered_duration()
    }

    async fn reset(&self, retention: Duration) {
        let mut preroll = self.preroll.lock().await;
        preroll.clear();
        preroll.set_retention(retention);
    }

    async fn ingest(&self, chunk: StreamChunk) {
        let mut preroll = self.preroll.lock().await;
        if !preroll.feed(chunk.clone()) {
            log_warn!("Dropping out-of-order chunk stamped {}", chunk.captured_at);
            return;
        }
        let mut slot = self.split.lock().await;
        drop(preroll);

        let Some(sink) = slot.as_mut() else {
            return;
        };
        if let Err(err) = sink.write(&chunk).await {
            log_error!("Writing after segment {} failed: {err}", sink.path.display());
            if let Some(sink) = slot.take() {
                sink.abandon("after segment write failed");
            }
            return;
        }
        if sink.is_complete() {
            if let Some(sink) = slot.take() {
                sink.finish().await;
            }
        }
    }
}

/// Owns the always-on live recording for one monitoring pass.
pub struct LiveFeed {
    camera: Arc<dyn Camera>,
    shared: FeedHandle,
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
}

impl LiveFeed {
    pub fn new(camera: Arc<dyn Camera>) -> Self {
        Self {
            camera,
            shared: FeedHandle::new(Duration::ZERO),
            handle: None,
            cancel_token: None,
        }
    }

    pub fn handle(&self) -> FeedHandle {
        self.shared.clone()
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    pub async fn start(&mut self, capture_rate: f64, retention: Duration) -> Result<()> {
        if self.handle.is_some() {
            bail!("live feed already active");
        }

        let stream = self
            .camera
            .open_stream(capture_rate)
            .await
            .context("failed to start live recording")?;
        self.shared.reset(retention).await;

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(feed_loop(stream, self.shared.clone(), cancel_token.clone()));

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        log_info!(
            "Live feed started ({capture_rate} fps, {}s retention)",
            retention.as_secs()
        );
        Ok(())
    }

    /// Applies a new retention to the running buffer, evicting at once when
    /// it shrank.
    pub async fn set_retention(&self, retention: Duration) {
        self.shared.preroll.lock().await.set_retention(retention);
    }

    pub async fn stop(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        let joined = if let Some(handle) = self.handle.take() {
            handle
                .await
                .context("live feed task failed to join")
                .map(|_| ())
        } else {
            Ok(())
        };
        self.shared.cancel_split("live feed stopped").await;
        joined
    }
}

async fn feed_loop(
    mut stream: Box<dyn VideoStream>,
    shared: FeedHandle,
    cancel_token: CancellationToken,
) {
    let limit = Duration::from_secs(CHUNK_TIMEOUT_SECS);
    loop {
        tokio::select! {
            next = bounded("read live chunk", limit, stream.next_chunk()) => {
                match next {
                    Ok(Some(chunk)) => shared.ingest(chunk).await,
                    Ok(None) => {
                        log_warn!("live recording ended");
                        break;
                    }
                    Err(err) => {
                        log_error!("live recording failed: {err}");
                        break;
                    }
                }
            }
            _ = cancel_token.cancelled() => {
                log_debug!("live feed shutting down");
                break;
            }
        }
    }
    shared.cancel_split("live recording ended").await;
}
