//! Contracts of the external collaborators the agent drives, plus the
//! concrete adapters used by the binary. The core only ever talks to the
//! traits, and every call it makes through them is time-bounded.

pub mod blob_store;
pub mod camera;
pub mod classifier;
pub mod installer;
pub mod transcoder;
pub mod transport;

use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{Frame, StreamChunk};
use crate::settings::Resolution;

/// Live encoded recording. Dropping the stream stops the recording.
#[async_trait]
pub trait VideoStream: Send {
    /// Next chunk of the recording, `None` once the device closed the stream.
    async fn next_chunk(&mut self) -> Result<Option<StreamChunk>>;
}

#[async_trait]
pub trait Camera: Send + Sync {
    /// Fails when no camera device is present.
    async fn probe(&self) -> Result<()>;

    async fn open_stream(&self, capture_rate: f64) -> Result<Box<dyn VideoStream>>;

    /// Model-sized frame taken from the live device.
    async fn capture_frame(&self, resolution: Resolution) -> Result<Frame>;

    /// Full-resolution JPEG still written to `path`.
    async fn capture_still(&self, path: &Path) -> Result<()>;
}

#[async_trait]
pub trait Classifier: Send + Sync {
    /// Ranked `(category index, score)` pairs, best first.
    async fn predict(&self, frame: &Frame) -> Result<Vec<(usize, f32)>>;

    fn category(&self, index: usize) -> Option<String>;
}

#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn encode(&self, raw: &Path, out: &Path, fps: f64) -> Result<PathBuf>;

    /// Joins `parts` in order into `out`.
    async fn concatenate(&self, parts: &[PathBuf], out: &Path) -> Result<PathBuf>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobEntry {
    pub name: String,
    pub last_modified: DateTime<Utc>,
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn create_container(&self, container: &str) -> Result<()>;

    async fn upload(&self, container: &str, name: &str, path: &Path, content_type: &str)
        -> Result<()>;

    async fn list(&self, container: &str) -> Result<Vec<BlobEntry>>;
}

#[async_trait]
pub trait Installer: Send + Sync {
    /// Downloads and installs the model published at `version`.
    async fn replace_model(&self, version: DateTime<Utc>) -> Result<()>;
}

#[async_trait]
pub trait DeviceTransport: Send + Sync {
    /// Pushes a reported-state document back to the device-management service.
    async fn report_state(&self, reported: serde_json::Value) -> Result<()>;
}

/// Every external collaborator the capture loop drives.
#[derive(Clone)]
pub struct Collaborators {
    pub camera: std::sync::Arc<dyn Camera>,
    pub classifier: std::sync::Arc<dyn Classifier>,
    pub transcoder: std::sync::Arc<dyn Transcoder>,
    pub store: std::sync::Arc<dyn BlobStore>,
    pub installer: std::sync::Arc<dyn Installer>,
}
