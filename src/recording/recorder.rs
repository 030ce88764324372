use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use uuid::Uuid;

use crate::bridge::Transcoder;
use crate::capture::feed::FeedHandle;
use crate::error::{bounded, AssemblyError};
use crate::models::{EventDescriptor, Segment, SegmentKind};
use crate::settings::RuntimeConfig;
use crate::sync::{self, ArtifactCategory, ArtifactSync};
use crate::utils::naming;

const TRANSCODE_TIMEOUT_SECS: u64 = 120;
const AFTER_SEGMENT_GRACE_SECS: u64 = 10;

/// The confident decision that starts an assembly.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggeredEvent {
    pub label: String,
    pub score: f32,
    pub captured_at: DateTime<Utc>,
}

impl TriggeredEvent {
    pub fn event_start(&self, preroll: Duration) -> DateTime<Utc> {
        chrono::Duration::from_std(preroll)
            .ok()
            .and_then(|preroll| self.captured_at.checked_sub_signed(preroll))
            .unwrap_or(self.captured_at)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblyState {
    Start,
    Split,
    TranscodeBefore,
    TranscodeAfter,
    Stitch,
    Describe,
    Done,
}

/// Result of a completed assembly. Uploads that failed are counted, their
/// files moved to the retained directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub full_clip: String,
    pub uploaded: usize,
    pub retained: usize,
}

/// Scratch directory of one event. `remove` deletes it; dropping it without
/// `remove` (a cancelled assembly) falls back to a blocking delete.
struct WorkDir {
    path: PathBuf,
    removed: bool,
}

impl WorkDir {
    async fn create(parent: &Path) -> std::io::Result<Self> {
        let path = parent.join(format!("event-{}", Uuid::new_v4()));
        tokio::fs::create_dir_all(&path).await?;
        Ok(Self {
            path,
            removed: false,
        })
    }

    fn join(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    async fn remove(mut self) {
        self.removed = true;
        match tokio::fs::remove_dir_all(&self.path).await {
            Ok(()) => debug!("Removed event dir {}", self.path.display()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => warn!("Failed to remove event dir {}: {err}", self.path.display()),
        }
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => debug!("Removed event dir {}", self.path.display()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => warn!("Failed to remove event dir {}: {err}", self.path.display()),
        }
    }
}

struct Artifact {
    category: ArtifactCategory,
    name: String,
    path: PathBuf,
}

pub struct EventRecorder {
    feed: FeedHandle,
    transcoder: Arc<dyn Transcoder>,
    sync: ArtifactSync,
    events_dir: PathBuf,
    retained_dir: PathBuf,
}

impl EventRecorder {
    pub fn new(
        feed: FeedHandle,
        transcoder: Arc<dyn Transcoder>,
        sync: ArtifactSync,
        events_dir: PathBuf,
        retained_dir: PathBuf,
    ) -> Self {
        Self {
            feed,
            transcoder,
            sync,
            events_dir,
            retained_dir,
        }
    }

    /// Assembles and uploads the clip for `event`. Any error abandons this
    /// event only; the working directory is gone either way.
    pub async fn record(
        &self,
        event: &TriggeredEvent,
        config: &RuntimeConfig,
    ) -> Result<RecordedEvent, AssemblyError> {
        let work = WorkDir::create(&self.events_dir).await?;
        let result = self.assemble(&work, event, config).await;
        if result.is_err() {
            self.feed.cancel_split("event abandoned").await;
        }
        work.remove().await;
        result
    }

    async fn assemble(
        &self,
        work: &WorkDir,
        event: &TriggeredEvent,
        config: &RuntimeConfig,
    ) -> Result<RecordedEvent, AssemblyError> {
        let mut state = AssemblyState::Start;
        let start = event.event_start(config.preroll());
        let limit = Duration::from_secs(TRANSCODE_TIMEOUT_SECS);
        debug!("Assembling {} event at {}", event.label, event.captured_at);

        transition(&mut state, AssemblyState::Split);
        let mut before = Segment::new(
            SegmentKind::Before,
            start,
            work.join(&naming::raw_segment_name(SegmentKind::Before, start)),
        );
        let mut after = Segment::new(
            SegmentKind::After,
            event.captured_at,
            work.join(&naming::raw_segment_name(SegmentKind::After, start)),
        );
        let after_len = config.after_segment();
        let after_done = self
            .feed
            .split(&after.raw_path, event.captured_at, after_len)
            .await
            .map_err(|err| AssemblyError::Split(format!("{err:#}")))?;
        self.feed
            .drain_to(&before.raw_path, event.captured_at, config.preroll())
            .await?;

        transition(&mut state, AssemblyState::TranscodeBefore);
        self.transcode(&mut before, start, config.capture_rate, limit)
            .await?;

        let wait = after_len + Duration::from_secs(AFTER_SEGMENT_GRACE_SECS);
        match tokio::time::timeout(wait, after_done).await {
            Ok(Ok(Ok(bytes))) => debug!("After segment complete ({bytes} bytes)"),
            Ok(Ok(Err(reason))) => return Err(AssemblyError::AfterSegment(reason)),
            Ok(Err(_)) => {
                return Err(AssemblyError::AfterSegment(
                    "live feed dropped the segment".into(),
                ))
            }
            Err(_) => {
                return Err(AssemblyError::AfterSegment(format!(
                    "not complete after {}s",
                    wait.as_secs()
                )))
            }
        }

        transition(&mut state, AssemblyState::TranscodeAfter);
        self.transcode(&mut after, start, config.capture_rate, limit)
            .await?;

        transition(&mut state, AssemblyState::Stitch);
        let full_name = naming::full_clip_name(start);
        let parts: Vec<PathBuf> = [&before, &after]
            .iter()
            .filter_map(|segment| segment.playable().map(Path::to_path_buf))
            .collect();
        let full_path = bounded(
            "stitch",
            limit,
            self.transcoder.concatenate(&parts, &work.join(&full_name)),
        )
        .await
        .map_err(AssemblyError::Stitch)?;

        transition(&mut state, AssemblyState::Describe);
        let descriptor_name = naming::descriptor_name(start);
        let descriptor_path = work.join(&descriptor_name);
        EventDescriptor {
            system_time: Utc::now(),
            event_start_time: start,
            predictions: vec![event.label.clone()],
            confidence: event.score,
            artifact_name: full_name.clone(),
        }
        .write_to(&descriptor_path)
        .await
        .map_err(|err| AssemblyError::Describe(format!("{err:#}")))?;

        let mut artifacts = Vec::with_capacity(4);
        for (segment, category) in [
            (&before, ArtifactCategory::BeforeVideo),
            (&after, ArtifactCategory::AfterVideo),
        ] {
            if let Some(path) = segment.playable() {
                artifacts.push(Artifact {
                    category,
                    name: naming::playable_segment_name(segment.kind, start),
                    path: path.to_path_buf(),
                });
            }
        }
        artifacts.push(Artifact {
            category: ArtifactCategory::FullVideo,
            name: full_name.clone(),
            path: full_path,
        });
        artifacts.push(Artifact {
            category: ArtifactCategory::Descriptor,
            name: descriptor_name,
            path: descriptor_path,
        });

        let (uploaded, retained) = self.upload_all(artifacts).await;
        transition(&mut state, AssemblyState::Done);
        info!(
            "Event {} ({:.2}) recorded as {full_name}",
            event.label, event.score
        );
        Ok(RecordedEvent {
            full_clip: full_name,
            uploaded,
            retained,
        })
    }

    async fn transcode(
        &self,
        segment: &mut Segment,
        start: DateTime<Utc>,
        fps: f64,
        limit: Duration,
    ) -> Result<(), AssemblyError> {
        let Some(dir) = segment.raw_path.parent() else {
            return Err(AssemblyError::Io(std::io::Error::other(
                "segment has no working directory",
            )));
        };
        let out = dir.join(naming::playable_segment_name(segment.kind, start));
        let playable = bounded(
            "transcode",
            limit,
            self.transcoder.encode(&segment.raw_path, &out, fps),
        )
        .await
        .map_err(|source| AssemblyError::Transcode {
            kind: segment.kind,
            source,
        })?;

        if let Err(err) = tokio::fs::remove_file(&segment.raw_path).await {
            warn!("Could not remove raw {}: {err}", segment.raw_path.display());
        }
        segment.mark_transcoded(playable);
        Ok(())
    }

    async fn upload_all(&self, artifacts: Vec<Artifact>) -> (usize, usize) {
        let mut uploaded = 0;
        let mut retained = 0;
        for artifact in artifacts {
            match self
                .sync
                .upload(artifact.category, &artifact.name, &artifact.path)
                .await
            {
                Ok(()) => uploaded += 1,
                Err(err) => {
                    retained += 1;
                    warn!("Upload of {} failed: {err}", artifact.name);
                    match sync::retain(&artifact.path, &self.retained_dir).await {
                        Ok(kept) => warn!("Kept {} for manual recovery", kept.display()),
                        Err(err) => warn!("Could not retain {}: {err:#}", artifact.name),
                    }
                }
            }
        }
        (uploaded, retained)
    }
}

fn transition(state: &mut AssemblyState, next: AssemblyState) {
    debug!("Assembly {state:?} -> {next:?}");
    *state = next;
}
