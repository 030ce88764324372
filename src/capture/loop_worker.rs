use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tokio::time::{Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::feed::LiveFeed;
use super::gate::{InferenceGate, CLASSIFY_TIMEOUT_SECS};
use crate::agent_config::AgentConfig;
use crate::bridge::{Camera, Collaborators};
use crate::error::bounded;
use crate::model_sync::{ModelReconciler, Reconciliation};
use crate::models::Decision;
use crate::recording::{EventRecorder, TriggeredEvent};
use crate::settings::{ConfigStore, RuntimeConfig};
use crate::sync::{ArtifactCategory, ArtifactSync};
use crate::utils::naming;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

/// Decisions allowed per monitoring pass before it is abandoned.
pub const MAX_CAPTURE_ATTEMPTS: u32 = 8;
const POLL_INTERVAL_SECS: u64 = 1;
const FRAME_TIMEOUT_SECS: u64 = 5;
const STILL_TIMEOUT_SECS: u64 = 5;
/// Pre-roll kept beyond the configured length. Covers the longest possible
/// gap between the sampled frame and the drain of the before segment.
const DECISION_HEADROOM_SECS: u64 =
    POLL_INTERVAL_SECS + FRAME_TIMEOUT_SECS + STILL_TIMEOUT_SECS + CLASSIFY_TIMEOUT_SECS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Monitoring,
    Deciding,
    UploadOnly,
    Recording,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    EventRecorded,
    /// Event detected with clip capture switched off; only the still was sent.
    EventStillOnly,
    /// Event detected but its clip assembly was abandoned.
    EventLost,
    Exhausted,
    Cancelled,
}

/// Local directories the loop writes to.
#[derive(Debug, Clone)]
pub struct LoopPaths {
    pub captures_dir: PathBuf,
    pub events_dir: PathBuf,
    pub retained_dir: PathBuf,
    pub model_record: PathBuf,
}

impl From<&AgentConfig> for LoopPaths {
    fn from(config: &AgentConfig) -> Self {
        Self {
            captures_dir: config.captures_dir(),
            events_dir: config.events_dir(),
            retained_dir: config.retained_dir(),
            model_record: config.model_record_path(),
        }
    }
}

pub struct CaptureLoop {
    camera: Arc<dyn Camera>,
    config: Arc<ConfigStore>,
    gate: InferenceGate,
    feed: LiveFeed,
    recorder: EventRecorder,
    sync: ArtifactSync,
    reconciler: ModelReconciler,
    captures_dir: PathBuf,
    state: LoopState,
}

impl CaptureLoop {
    pub fn new(
        collaborators: Collaborators,
        config: Arc<ConfigStore>,
        paths: LoopPaths,
        model_blob: String,
    ) -> Self {
        let sync = ArtifactSync::new(Arc::clone(&collaborators.store));
        let feed = LiveFeed::new(Arc::clone(&collaborators.camera));
        let recorder = EventRecorder::new(
            feed.handle(),
            collaborators.transcoder,
            sync.clone(),
            paths.events_dir,
            paths.retained_dir,
        );
        let reconciler = ModelReconciler::new(
            collaborators.store,
            collaborators.installer,
            paths.model_record,
            model_blob,
        );

        Self {
            gate: InferenceGate::new(collaborators.classifier, Arc::clone(&config)),
            camera: collaborators.camera,
            config,
            feed,
            recorder,
            sync,
            reconciler,
            captures_dir: paths.captures_dir,
            state: LoopState::Idle,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Outer loop: reconcile the model, then run one monitoring pass, until
    /// cancelled. Fails only when the live recording cannot be started.
    pub async fn run(&mut self, cancel_token: CancellationToken) -> Result<()> {
        loop {
            self.enter(LoopState::Idle);

            tokio::select! {
                reconciled = self.reconciler.reconcile() => match reconciled {
                    Ok(Reconciliation::Refreshed { remote }) => log_info!("model refreshed to {remote}"),
                    Ok(Reconciliation::Unchanged) => log_debug!("model unchanged"),
                    Ok(Reconciliation::Skipped) => log_warn!("model reconciliation skipped"),
                    Err(err) => log_warn!("model reconciliation failed: {err:#}"),
                },
                _ = cancel_token.cancelled() => break,
            }

            match self.run_pass(&cancel_token).await? {
                PassOutcome::Cancelled => break,
                outcome => log_info!("monitoring pass ended: {outcome:?}"),
            }
        }

        self.enter(LoopState::Idle);
        log_info!("capture loop shutting down");
        Ok(())
    }

    pub async fn run_pass(&mut self, cancel_token: &CancellationToken) -> Result<PassOutcome> {
        let config = self.config.snapshot();
        self.feed
            .start(config.capture_rate, retention_for(&config))
            .await?;
        self.enter(LoopState::Monitoring);

        let outcome = self.monitor(cancel_token).await;

        if let Err(err) = self.feed.stop().await {
            log_error!("live feed did not stop cleanly: {err:#}");
        }
        Ok(outcome)
    }

    async fn monitor(&mut self, cancel_token: &CancellationToken) -> PassOutcome {
        let mut ticker = tokio::time::interval(Duration::from_secs(POLL_INTERVAL_SECS));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut last_decision = Instant::now();
        let mut attempts = 0;

        while attempts < MAX_CAPTURE_ATTEMPTS {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = cancel_token.cancelled() => return PassOutcome::Cancelled,
            }

            let config = self.config.snapshot();
            if last_decision.elapsed() <= config.settle() {
                continue;
            }
            self.feed.set_retention(retention_for(&config)).await;

            attempts += 1;
            self.enter(LoopState::Deciding);
            log_debug!("capture attempt {attempts}/{MAX_CAPTURE_ATTEMPTS}");
            let outcome = self.attempt(&config).await;
            last_decision = Instant::now();

            match outcome {
                Some(outcome) => return outcome,
                None => self.enter(LoopState::Monitoring),
            }
        }

        log_info!("no event after {MAX_CAPTURE_ATTEMPTS} attempts, restarting the pass");
        PassOutcome::Exhausted
    }

    /// One decision. `None` keeps the pass going.
    async fn attempt(&mut self, config: &RuntimeConfig) -> Option<PassOutcome> {
        let frame = match bounded(
            "capture frame",
            Duration::from_secs(FRAME_TIMEOUT_SECS),
            self.camera.capture_frame(config.resolution),
        )
        .await
        {
            Ok(frame) => frame,
            Err(err) => {
                log_warn!("{err}");
                return None;
            }
        };

        let still_name = naming::still_name(frame.captured_at);
        let still_path = self.captures_dir.join(&still_name);
        let still = bounded(
            "capture still",
            Duration::from_secs(STILL_TIMEOUT_SECS),
            self.camera.capture_still(&still_path),
        )
        .await;
        if let Err(err) = &still {
            log_warn!("{err}");
        }
        let still_ready = still.is_ok();

        let decision = match self.gate.classify(&frame).await {
            Ok(decision) => decision,
            Err(err) => {
                log_warn!("no decision: {err}");
                if still_ready {
                    self.enter(LoopState::UploadOnly);
                    self.upload_still(ArtifactCategory::BadImage, &still_name, &still_path)
                        .await;
                }
                return None;
            }
        };
        log_debug!("decision: {}", decision.as_str());

        let (label, score) = match decision {
            Decision::Event { label, score } => (label, score),
            other => {
                self.enter(LoopState::UploadOnly);
                if let Decision::LowConfidence { label, score } = &other {
                    log_info!("{label} at {score:.2} is below the threshold");
                }
                if still_ready {
                    self.upload_still(ArtifactCategory::BadImage, &still_name, &still_path)
                        .await;
                }
                return None;
            }
        };

        self.enter(LoopState::Recording);
        log_info!("event: {label} at {score:.2}");
        let outcome = if config.capture_video {
            let event = TriggeredEvent {
                label,
                score,
                captured_at: frame.captured_at,
            };
            match self.recorder.record(&event, config).await {
                Ok(recorded) => {
                    log_info!(
                        "clip {} done ({} uploaded, {} retained)",
                        recorded.full_clip,
                        recorded.uploaded,
                        recorded.retained
                    );
                    PassOutcome::EventRecorded
                }
                Err(err) => {
                    log_warn!("event lost: {err}");
                    PassOutcome::EventLost
                }
            }
        } else {
            PassOutcome::EventStillOnly
        };

        if still_ready {
            self.upload_still(ArtifactCategory::GoodImage, &still_name, &still_path)
                .await;
        }
        Some(outcome)
    }

    async fn upload_still(&self, category: ArtifactCategory, name: &str, path: &std::path::Path) {
        if let Err(err) = self.sync.upload(category, name, path).await {
            log_warn!("{name} kept at {}: {err}", path.display());
        }
    }

    fn enter(&mut self, next: LoopState) {
        if self.state != next {
            log_debug!("capture loop {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }
}

fn retention_for(config: &RuntimeConfig) -> Duration {
    config.preroll() + Duration::from_secs(DECISION_HEADROOM_SECS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::ConfigPatch;
    use crate::sync::MODEL_CONTAINER;
    use crate::testing::{
        FakeCamera, FakeInstaller, FakeTranscoder, MemoryBlobStore, ScriptedClassifier,
    };
    use chrono::{TimeZone, Utc};

    struct Rig {
        dir: tempfile::TempDir,
        store: Arc<MemoryBlobStore>,
        installer: Arc<FakeInstaller>,
        config: Arc<ConfigStore>,
        capture_loop: CaptureLoop,
    }

    fn rig(classifier: ScriptedClassifier, config: RuntimeConfig) -> Rig {
        rig_with(FakeCamera::new(), classifier, config)
    }

    fn rig_with(
        camera: FakeCamera,
        classifier: ScriptedClassifier,
        config: RuntimeConfig,
    ) -> Rig {
        let dir = tempfile::tempdir().unwrap();
        let paths = LoopPaths {
            captures_dir: dir.path().join("captures"),
            events_dir: dir.path().join("events"),
            retained_dir: dir.path().join("retained"),
            model_record: dir.path().join("updatehistory.json"),
        };
        std::fs::create_dir_all(&paths.captures_dir).unwrap();
        let store = Arc::new(MemoryBlobStore::default());
        let installer = Arc::new(FakeInstaller::default());
        let config = Arc::new(ConfigStore::in_memory(config));
        let collaborators = Collaborators {
            camera: Arc::new(camera),
            classifier: Arc::new(classifier),
            transcoder: Arc::new(FakeTranscoder::default()),
            store: store.clone(),
            installer: installer.clone(),
        };
        Rig {
            capture_loop: CaptureLoop::new(
                collaborators,
                Arc::clone(&config),
                paths,
                "zippedpi3".into(),
            ),
            dir,
            store,
            installer,
            config,
        }
    }

    fn short_clip() -> RuntimeConfig {
        RuntimeConfig {
            clip_length_secs: 5,
            preroll_secs: 2,
            ..RuntimeConfig::default()
        }
    }

    fn captures_left(rig: &Rig) -> usize {
        std::fs::read_dir(rig.dir.path().join("captures")).unwrap().count()
    }

    #[tokio::test(start_paused = true)]
    async fn low_confidence_uploads_bad_stills_until_exhausted() {
        let mut rig = rig(
            ScriptedClassifier::repeating(vec![(3, 0.35)]),
            RuntimeConfig::default(),
        );
        let cancel = CancellationToken::new();
        let started = Instant::now();

        let outcome = rig.capture_loop.run_pass(&cancel).await.unwrap();

        assert_eq!(outcome, PassOutcome::Exhausted);
        let bad = rig.store.uploaded_names("edgeimages/badimages");
        assert_eq!(bad.len(), MAX_CAPTURE_ATTEMPTS as usize);
        assert!(bad.iter().all(|name| name.starts_with("image-") && name.ends_with(".jpg")));
        assert!(rig.store.uploaded_names("edgeimages/goodimages").is_empty());
        assert_eq!(captures_left(&rig), 0);

        // Every decision waits out the settle time of preroll + 1s.
        let settle = RuntimeConfig::default().settle();
        assert!(started.elapsed() > settle * MAX_CAPTURE_ATTEMPTS);
        assert_eq!(rig.capture_loop.state(), LoopState::Monitoring);
    }

    #[tokio::test(start_paused = true)]
    async fn confident_detection_records_and_uploads_the_clip() {
        let mut rig = rig(
            ScriptedClassifier::new(vec![vec![(5, 0.82), (2, 0.10)]]),
            short_clip(),
        );
        let cancel = CancellationToken::new();

        let outcome = rig.capture_loop.run_pass(&cancel).await.unwrap();

        assert_eq!(outcome, PassOutcome::EventRecorded);
        assert_eq!(rig.store.uploaded_names("edgeimages/goodimages").len(), 1);
        for container in [
            "edgevideos/beforevideo",
            "edgevideos/aftervideo",
            "edgevideos/fullvideo",
            "edgejson",
        ] {
            assert_eq!(rig.store.uploaded_names(container).len(), 1, "{container}");
        }
        assert_eq!(captures_left(&rig), 0);
        assert_eq!(std::fs::read_dir(rig.dir.path().join("events")).unwrap().count(), 0);
        assert_eq!(rig.capture_loop.state(), LoopState::Recording);
    }

    #[tokio::test(start_paused = true)]
    async fn capture_video_off_sends_only_the_good_still() {
        let mut rig = rig(
            ScriptedClassifier::new(vec![vec![(5, 0.82)]]),
            RuntimeConfig {
                capture_video: false,
                ..short_clip()
            },
        );

        let outcome = rig
            .capture_loop
            .run_pass(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, PassOutcome::EventStillOnly);
        assert_eq!(rig.store.uploaded_names("edgeimages/goodimages").len(), 1);
        assert!(rig.store.uploaded_names("edgevideos/fullvideo").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_still_upload_keeps_the_local_file() {
        let mut rig = rig(ScriptedClassifier::new(vec![vec![]]), short_clip());
        rig.store.fail_all_uploads();

        let outcome = rig
            .capture_loop
            .run_pass(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, PassOutcome::Exhausted);
        assert_eq!(captures_left(&rig), MAX_CAPTURE_ATTEMPTS as usize);
    }

    #[tokio::test(start_paused = true)]
    async fn classifier_timeout_still_uploads_the_still() {
        let mut rig = rig(ScriptedClassifier::hanging(), short_clip());

        let outcome = rig
            .capture_loop
            .run_pass(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, PassOutcome::Exhausted);
        assert_eq!(
            rig.store.uploaded_names("edgeimages/badimages").len(),
            MAX_CAPTURE_ATTEMPTS as usize
        );
        assert!(rig.store.uploaded_names("edgeimages/goodimages").is_empty());
        assert_eq!(captures_left(&rig), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn classifier_timeout_with_failing_store_keeps_the_stills() {
        let mut rig = rig(ScriptedClassifier::hanging(), short_clip());
        rig.store.fail_all_uploads();

        let outcome = rig
            .capture_loop
            .run_pass(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, PassOutcome::Exhausted);
        assert_eq!(captures_left(&rig), MAX_CAPTURE_ATTEMPTS as usize);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_frame_capture_is_bounded_by_the_attempt_cap() {
        let mut rig = rig_with(
            FakeCamera::failing_frames(),
            ScriptedClassifier::repeating(vec![(5, 0.9)]),
            short_clip(),
        );
        let started = Instant::now();

        let outcome = rig
            .capture_loop
            .run_pass(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, PassOutcome::Exhausted);
        assert!(rig.store.uploads().is_empty());
        assert_eq!(captures_left(&rig), 0);
        assert!(started.elapsed() > short_clip().settle() * MAX_CAPTURE_ATTEMPTS);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_decision_still_finds_the_preroll() {
        let mut rig = rig(
            ScriptedClassifier::slow(
                Duration::from_secs(CLASSIFY_TIMEOUT_SECS) - Duration::from_millis(200),
                vec![(5, 0.82)],
            ),
            short_clip(),
        );

        let outcome = rig
            .capture_loop
            .run_pass(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, PassOutcome::EventRecorded);
        assert_eq!(rig.store.uploaded_names("edgevideos/beforevideo").len(), 1);
    }

    #[test]
    fn retention_covers_preroll_and_every_decision_timeout() {
        let config = short_clip();
        let decision =
            Duration::from_secs(FRAME_TIMEOUT_SECS + STILL_TIMEOUT_SECS + CLASSIFY_TIMEOUT_SECS);
        assert!(retention_for(&config) >= config.preroll() + decision);
    }

    #[tokio::test(start_paused = true)]
    async fn threshold_change_applies_to_the_next_decision() {
        let mut rig = rig(ScriptedClassifier::repeating(vec![(3, 0.35)]), short_clip());
        rig.config
            .apply(&ConfigPatch {
                prediction_threshold: Some(0.3),
                ..ConfigPatch::default()
            })
            .unwrap();

        let outcome = rig
            .capture_loop
            .run_pass(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, PassOutcome::EventRecorded);
    }

    #[tokio::test(start_paused = true)]
    async fn run_reconciles_before_each_pass_until_cancelled() {
        let mut rig = rig(ScriptedClassifier::repeating(vec![(3, 0.35)]), short_clip());
        let published = Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap();
        rig.store.publish(MODEL_CONTAINER, "zippedpi3", published);

        let cancel = CancellationToken::new();
        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                // Long enough for two exhausted passes of 8 x 4s.
                tokio::time::sleep(Duration::from_secs(80)).await;
                cancel.cancel();
            })
        };

        rig.capture_loop.run(cancel).await.unwrap();
        canceller.await.unwrap();

        assert_eq!(rig.installer.installed(), vec![published]);
        assert!(rig.store.uploaded_names("edgeimages/badimages").len() >= 2 * MAX_CAPTURE_ATTEMPTS as usize);
        assert_eq!(rig.capture_loop.state(), LoopState::Idle);
    }
}
