//! Process wiring: builds the adapters from [`AgentConfig`], checks the
//! hardware and the store, then runs the config channel, the device-method
//! transport and the capture loop until Ctrl-C or a fatal error.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use log::{error, info};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::agent_config::AgentConfig;
use crate::bridge::blob_store::FsBlobStore;
use crate::bridge::camera::CommandCamera;
use crate::bridge::classifier::ProcessClassifier;
use crate::bridge::installer::CommandInstaller;
use crate::bridge::transcoder::Mp4BoxTranscoder;
use crate::bridge::transport::{FileStateReporter, TcpMethodServer};
use crate::bridge::{Camera, Collaborators};
use crate::capture::{CaptureController, CaptureLoop, LoopPaths};
use crate::config_channel::ConfigChannel;
use crate::error::bounded;
use crate::settings::ConfigStore;
use crate::sync::ArtifactSync;

const PROBE_TIMEOUT_SECS: u64 = 10;
const METHOD_QUEUE_DEPTH: usize = 16;

pub async fn start(config: AgentConfig) -> Result<()> {
    for dir in [
        config.data_dir.clone(),
        config.captures_dir(),
        config.events_dir(),
        config.retained_dir(),
    ] {
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }

    let runtime_config = Arc::new(ConfigStore::new(config.runtime_config_path())?);
    info!("Runtime config: {:?}", runtime_config.snapshot());

    let camera = Arc::new(CommandCamera::new(
        config.video_cmd.clone(),
        config.still_cmd.clone(),
        config.probe_cmd.clone(),
    ));
    bounded(
        "camera probe",
        Duration::from_secs(PROBE_TIMEOUT_SECS),
        camera.probe(),
    )
    .await
    .context("no camera device found")?;

    let store = Arc::new(FsBlobStore::new(config.blob_root.clone(), &config.credentials)?);
    ArtifactSync::new(store.clone())
        .ensure_containers()
        .await
        .context("blob store unavailable")?;

    let cancel = CancellationToken::new();

    let (calls_tx, calls_rx) = mpsc::channel(METHOD_QUEUE_DEPTH);
    let reporter = Arc::new(FileStateReporter::new(config.reported_state_path()));
    let channel_task =
        ConfigChannel::new(Arc::clone(&runtime_config), reporter).spawn(calls_rx, cancel.clone());
    let server = TcpMethodServer::bind(config.method_addr, calls_tx).await?;
    let mut server_task = tokio::spawn(server.serve(cancel.clone()));

    let collaborators = Collaborators {
        camera,
        classifier: Arc::new(ProcessClassifier::new(
            config.classifier_cmd.clone(),
            config.categories_path.clone(),
            config.data_dir.clone(),
        )),
        transcoder: Arc::new(Mp4BoxTranscoder::new(config.mp4box.clone())),
        store,
        installer: Arc::new(CommandInstaller::new(config.installer_cmd.clone())),
    };
    let capture_loop = CaptureLoop::new(
        collaborators,
        runtime_config,
        LoopPaths::from(&config),
        config.model_blob.clone(),
    );

    let mut controller = CaptureController::new();
    controller.start(capture_loop, cancel.clone())?;

    let outcome = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for Ctrl-C")?;
            info!("Shutdown requested");
            Ok(())
        }
        served = &mut server_task => match served {
            Ok(Ok(())) => Err(anyhow!("device-method transport stopped")),
            Ok(Err(err)) => Err(err.context("device-method transport failed")),
            Err(err) => Err(anyhow!(err).context("device-method transport panicked")),
        },
        finished = controller.finished() => match finished {
            Ok(()) => Ok(()),
            Err(err) => Err(err.context("capture loop failed")),
        },
    };

    cancel.cancel();
    if let Err(err) = controller.stop().await {
        error!("Capture loop did not stop cleanly: {err:#}");
    }
    if channel_task.await.is_err() {
        error!("Config channel task panicked");
    }
    outcome
}
