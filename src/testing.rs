//! In-process fakes for every collaborator, driven by tokio's clock so tests
//! can run on paused time.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::time::Instant;

use crate::bridge::{
    BlobEntry, BlobStore, Camera, Classifier, Collaborators, DeviceTransport, Installer,
    Transcoder, VideoStream,
};
use crate::models::{Frame, PixelFormat, StreamChunk};
use crate::settings::Resolution;

pub const TEST_CHUNK_INTERVAL: Duration = Duration::from_millis(100);
pub const CATEGORIES: [&str; 6] = ["background", "person", "bird", "dog", "horse", "cat"];

/// Wall clock derived from tokio's clock.
#[derive(Debug, Clone, Copy)]
pub struct FakeClock {
    base: DateTime<Utc>,
    origin: Instant,
}

impl FakeClock {
    pub fn new() -> Self {
        Self {
            base: Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap(),
            origin: Instant::now(),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.base + chrono::Duration::from_std(self.origin.elapsed()).unwrap()
    }
}

pub fn test_frame() -> Frame {
    Frame {
        width: 2,
        height: 2,
        format: PixelFormat::Rgb8,
        data: vec![0; 12],
        captured_at: FakeClock::new().now(),
    }
}

pub struct FakeCamera {
    clock: FakeClock,
    streams: bool,
    frames_fail: bool,
    stall_at: Option<Instant>,
}

impl FakeCamera {
    pub fn new() -> Self {
        Self {
            clock: FakeClock::new(),
            streams: true,
            frames_fail: false,
            stall_at: None,
        }
    }

    /// Streams normally but every frame capture fails.
    pub fn failing_frames() -> Self {
        Self {
            frames_fail: true,
            ..Self::new()
        }
    }

    /// The live stream stops delivering chunks `after` from now.
    pub fn stalling_after(after: Duration) -> Self {
        Self {
            stall_at: Some(Instant::now() + after),
            ..Self::new()
        }
    }

    pub fn without_stream() -> Self {
        Self {
            streams: false,
            ..Self::new()
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

struct FakeStream {
    clock: FakeClock,
    stall_at: Option<Instant>,
}

#[async_trait]
impl VideoStream for FakeStream {
    async fn next_chunk(&mut self) -> Result<Option<StreamChunk>> {
        tokio::time::sleep(TEST_CHUNK_INTERVAL).await;
        if self.stall_at.is_some_and(|at| Instant::now() >= at) {
            std::future::pending::<()>().await;
        }
        Ok(Some(StreamChunk {
            captured_at: self.clock.now(),
            data: vec![0xAB; 64],
        }))
    }
}

#[async_trait]
impl Camera for FakeCamera {
    async fn probe(&self) -> Result<()> {
        if !self.streams {
            bail!("No cameras available");
        }
        Ok(())
    }

    async fn open_stream(&self, _capture_rate: f64) -> Result<Box<dyn VideoStream>> {
        if !self.streams {
            bail!("No cameras available");
        }
        Ok(Box::new(FakeStream {
            clock: self.clock,
            stall_at: self.stall_at,
        }))
    }

    async fn capture_frame(&self, resolution: Resolution) -> Result<Frame> {
        if self.frames_fail {
            bail!("camera returned no frame");
        }
        Ok(Frame {
            width: resolution.width,
            height: resolution.height,
            format: PixelFormat::Bgr8,
            data: vec![0; (resolution.width * resolution.height * 3) as usize],
            captured_at: self.clock.now(),
        })
    }

    async fn capture_still(&self, path: &Path) -> Result<()> {
        tokio::fs::write(path, b"jpeg").await?;
        Ok(())
    }
}

enum Script {
    Queue(Mutex<VecDeque<Vec<(usize, f32)>>>),
    Repeat(Vec<(usize, f32)>),
    Delayed(Duration, Vec<(usize, f32)>),
    Hang,
}

pub struct ScriptedClassifier {
    script: Script,
}

impl ScriptedClassifier {
    /// Answers from `answers` in order, then with no predictions.
    pub fn new(answers: Vec<Vec<(usize, f32)>>) -> Self {
        Self {
            script: Script::Queue(Mutex::new(answers.into())),
        }
    }

    pub fn repeating(answer: Vec<(usize, f32)>) -> Self {
        Self {
            script: Script::Repeat(answer),
        }
    }

    /// Answers `answer` every time, each after `delay`.
    pub fn slow(delay: Duration, answer: Vec<(usize, f32)>) -> Self {
        Self {
            script: Script::Delayed(delay, answer),
        }
    }

    pub fn hanging() -> Self {
        Self { script: Script::Hang }
    }
}

#[async_trait]
impl Classifier for ScriptedClassifier {
    async fn predict(&self, _frame: &Frame) -> Result<Vec<(usize, f32)>> {
        match &self.script {
            Script::Queue(queue) => Ok(queue.lock().unwrap().pop_front().unwrap_or_default()),
            Script::Repeat(answer) => Ok(answer.clone()),
            Script::Delayed(delay, answer) => {
                tokio::time::sleep(*delay).await;
                Ok(answer.clone())
            }
            Script::Hang => std::future::pending().await,
        }
    }

    fn category(&self, index: usize) -> Option<String> {
        CATEGORIES.get(index).map(|label| label.to_string())
    }
}

#[derive(Default)]
pub struct FakeTranscoder {
    fail_on: Option<String>,
}

impl FakeTranscoder {
    pub fn failing_on(fragment: &str) -> Self {
        Self {
            fail_on: Some(fragment.to_string()),
        }
    }

    fn check(&self, paths: &[&Path]) -> Result<()> {
        if let Some(fragment) = &self.fail_on {
            if paths.iter().any(|path| path.to_string_lossy().contains(fragment.as_str())) {
                bail!("MP4Box exited with status 1");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn encode(&self, raw: &Path, out: &Path, _fps: f64) -> Result<PathBuf> {
        self.check(&[raw, out])?;
        let mut data = b"mp4:".to_vec();
        data.extend(tokio::fs::read(raw).await.context("raw segment missing")?);
        tokio::fs::write(out, data).await?;
        Ok(out.to_path_buf())
    }

    async fn concatenate(&self, parts: &[PathBuf], out: &Path) -> Result<PathBuf> {
        self.check(&[out])?;
        let mut data = Vec::new();
        for part in parts {
            data.extend(tokio::fs::read(part).await?);
        }
        tokio::fs::write(out, data).await?;
        Ok(out.to_path_buf())
    }
}

#[derive(Debug, Clone)]
pub struct StoredBlob {
    pub container: String,
    pub name: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

#[derive(Default)]
struct StoreState {
    containers: Vec<String>,
    uploads: Vec<StoredBlob>,
    listings: HashMap<String, Vec<BlobEntry>>,
    failing: HashSet<String>,
    fail_all: bool,
    hang: bool,
}

#[derive(Default)]
pub struct MemoryBlobStore {
    state: Mutex<StoreState>,
}

impl MemoryBlobStore {
    pub fn fail_uploads_named(&self, name: &str) {
        self.state.lock().unwrap().failing.insert(name.to_string());
    }

    pub fn fail_all_uploads(&self) {
        self.state.lock().unwrap().fail_all = true;
    }

    pub fn hang_uploads(&self) {
        self.state.lock().unwrap().hang = true;
    }

    pub fn publish(&self, container: &str, name: &str, last_modified: DateTime<Utc>) {
        self.state
            .lock()
            .unwrap()
            .listings
            .entry(container.to_string())
            .or_default()
            .push(BlobEntry {
                name: name.to_string(),
                last_modified,
            });
    }

    pub fn uploads(&self) -> Vec<StoredBlob> {
        self.state.lock().unwrap().uploads.clone()
    }

    pub fn uploaded_names(&self, container: &str) -> Vec<String> {
        self.uploads()
            .into_iter()
            .filter(|blob| blob.container == container)
            .map(|blob| blob.name)
            .collect()
    }

    pub fn content(&self, container: &str, name: &str) -> Option<Vec<u8>> {
        self.uploads()
            .into_iter()
            .find(|blob| blob.container == container && blob.name == name)
            .map(|blob| blob.data)
    }

    pub fn containers(&self) -> Vec<String> {
        self.state.lock().unwrap().containers.clone()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn create_container(&self, container: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if !state.containers.iter().any(|c| c == container) {
            state.containers.push(container.to_string());
        }
        Ok(())
    }

    async fn upload(
        &self,
        container: &str,
        name: &str,
        path: &Path,
        content_type: &str,
    ) -> Result<()> {
        let (hang, fail) = {
            let state = self.state.lock().unwrap();
            (state.hang, state.fail_all || state.failing.contains(name))
        };
        if hang {
            std::future::pending::<()>().await;
        }
        if fail {
            bail!("store rejected {name}");
        }

        let data = tokio::fs::read(path).await?;
        self.state.lock().unwrap().uploads.push(StoredBlob {
            container: container.to_string(),
            name: name.to_string(),
            content_type: content_type.to_string(),
            data,
        });
        Ok(())
    }

    async fn list(&self, container: &str) -> Result<Vec<BlobEntry>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .listings
            .get(container)
            .cloned()
            .unwrap_or_default())
    }
}

#[derive(Default)]
pub struct FakeInstaller {
    installed: Mutex<Vec<DateTime<Utc>>>,
    fail_next: Mutex<bool>,
}

impl FakeInstaller {
    pub fn installed(&self) -> Vec<DateTime<Utc>> {
        self.installed.lock().unwrap().clone()
    }

    pub fn fail_next(&self) {
        *self.fail_next.lock().unwrap() = true;
    }
}

#[async_trait]
impl Installer for FakeInstaller {
    async fn replace_model(&self, version: DateTime<Utc>) -> Result<()> {
        if std::mem::take(&mut *self.fail_next.lock().unwrap()) {
            bail!("installer exited with status 2");
        }
        self.installed.lock().unwrap().push(version);
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingTransport {
    reports: Mutex<Vec<serde_json::Value>>,
}

impl RecordingTransport {
    pub fn reports(&self) -> Vec<serde_json::Value> {
        self.reports.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeviceTransport for RecordingTransport {
    async fn report_state(&self, reported: serde_json::Value) -> Result<()> {
        self.reports.lock().unwrap().push(reported);
        Ok(())
    }
}

/// Fakes that never detect anything.
pub fn collaborators() -> Collaborators {
    Collaborators {
        camera: Arc::new(FakeCamera::new()),
        classifier: Arc::new(ScriptedClassifier::repeating(Vec::new())),
        transcoder: Arc::new(FakeTranscoder::default()),
        store: Arc::new(MemoryBlobStore::default()),
        installer: Arc::new(FakeInstaller::default()),
    }
}
