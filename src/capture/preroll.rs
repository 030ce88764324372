use std::collections::VecDeque;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::io::AsyncWriteExt;

use crate::error::PrerollError;
use crate::models::StreamChunk;

/// Circular store of the most recent live recording. Feeding evicts from the
/// front so the span between the oldest and newest chunk never exceeds the
/// retention window.
pub struct PrerollBuffer {
    retention: chrono::Duration,
    chunks: VecDeque<StreamChunk>,
    bytes: usize,
}

impl PrerollBuffer {
    pub fn new(retention: Duration) -> Self {
        Self {
            retention: to_chrono(retention),
            chunks: VecDeque::new(),
            bytes: 0,
        }
    }

    pub fn set_retention(&mut self, retention: Duration) {
        self.retention = to_chrono(retention);
        self.evict();
    }

    /// Appends a chunk. Chunks older than the newest one already held are
    /// dropped so the buffer stays ordered by capture time.
    pub fn feed(&mut self, chunk: StreamChunk) -> bool {
        if let Some(newest) = self.chunks.back() {
            if chunk.captured_at < newest.captured_at {
                return false;
            }
        }
        self.bytes += chunk.data.len();
        self.chunks.push_back(chunk);
        self.evict();
        true
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
        self.bytes = 0;
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn bytes(&self) -> usize {
        self.bytes
    }

    pub fn earliest(&self) -> Option<DateTime<Utc>> {
        self.chunks.front().map(|chunk| chunk.captured_at)
    }

    pub fn latest(&self) -> Option<DateTime<Utc>> {
        self.chunks.back().map(|chunk| chunk.captured_at)
    }

    pub fn buffered_duration(&self) -> Duration {
        match (self.earliest(), self.latest()) {
            (Some(first), Some(last)) => (last - first).to_std().unwrap_or_default(),
            _ => Duration::ZERO,
        }
    }

    /// Chunks captured in `[end - length, end]`. The window is anchored on the
    /// event, not on the moment of the call, so footage fed after `end` is
    /// left out.
    pub fn window(
        &self,
        end: DateTime<Utc>,
        length: Duration,
    ) -> Result<Vec<StreamChunk>, PrerollError> {
        let earliest = self.earliest().ok_or(PrerollError::Empty)?;
        let start = end
            .checked_sub_signed(to_chrono(length))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        if start < earliest {
            return Err(PrerollError::WindowPredatesBuffer {
                requested: start,
                earliest,
            });
        }

        Ok(self
            .chunks
            .iter()
            .filter(|chunk| chunk.captured_at >= start && chunk.captured_at <= end)
            .cloned()
            .collect())
    }

    /// Chunks captured strictly after `from`.
    pub fn since(&self, from: DateTime<Utc>) -> Vec<StreamChunk> {
        self.chunks
            .iter()
            .filter(|chunk| chunk.captured_at > from)
            .cloned()
            .collect()
    }

    fn evict(&mut self) {
        let Some(newest) = self.latest() else {
            return;
        };
        while let Some(oldest) = self.chunks.front() {
            if newest - oldest.captured_at <= self.retention {
                break;
            }
            if let Some(evicted) = self.chunks.pop_front() {
                self.bytes -= evicted.data.len();
            }
        }
    }
}

/// Writes `chunks` back to back into a new raw file at `path`.
pub async fn write_chunks(path: &Path, chunks: &[StreamChunk]) -> Result<usize, PrerollError> {
    let mut file = tokio::fs::File::create(path).await?;
    let mut written = 0;
    for chunk in chunks {
        file.write_all(&chunk.data).await?;
        written += chunk.data.len();
    }
    file.flush().await?;
    Ok(written)
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}
