//! Remote configuration entry point. The transport delivers device-method
//! calls on its own task; they are funnelled through an mpsc queue into a
//! single handler, which is the only writer of the Config State.

use std::sync::Arc;

use anyhow::{bail, Result};
use chrono::Local;
use log::{debug, info, warn};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::bridge::DeviceTransport;
use crate::settings::{ConfigPatch, ConfigStore};

pub const DEVICE_CONFIG_METHOD: &str = "DeviceConfig";
const SUCCESS_BODY: &str = "{ \"Response\": \"Successful Config\" }";

#[derive(Debug)]
pub struct MethodCall {
    pub name: String,
    pub payload: Option<String>,
    pub reply: oneshot::Sender<MethodResponse>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodResponse {
    pub status: u16,
    pub body: String,
}

impl MethodResponse {
    pub fn success() -> Self {
        Self {
            status: 200,
            body: SUCCESS_BODY.to_string(),
        }
    }

    pub fn bad_request(reason: String) -> Self {
        Self {
            status: 400,
            body: serde_json::json!({ "Response": reason }).to_string(),
        }
    }
}

pub struct ConfigChannel {
    config: Arc<ConfigStore>,
    transport: Arc<dyn DeviceTransport>,
}

impl ConfigChannel {
    pub fn new(config: Arc<ConfigStore>, transport: Arc<dyn DeviceTransport>) -> Self {
        Self { config, transport }
    }

    pub async fn handle(&self, name: &str, payload: Option<&str>) -> MethodResponse {
        if name != DEVICE_CONFIG_METHOD {
            info!("Ignoring device method {name}");
            return MethodResponse::success();
        }

        if let Some(raw) = payload {
            debug!("DeviceConfig payload received: {raw}");
            let patch = match parse_device_config(raw) {
                Ok(patch) => patch,
                Err(err) => {
                    warn!("Rejected DeviceConfig payload: {err:#}");
                    return MethodResponse::bad_request(err.to_string());
                }
            };

            if patch.is_empty() {
                info!("DeviceConfig carried no recognised settings");
            } else {
                match self.config.apply(&patch) {
                    Ok(updated) => info!("Runtime config updated: {updated:?}"),
                    Err(err) => warn!("Runtime config applied but not persisted: {err:#}"),
                }
            }
        }

        let reported = serde_json::json!({
            "rebootTime": Local::now().naive_local().format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
        });
        if let Err(err) = self.transport.report_state(reported).await {
            warn!("Failed to report device state: {err:#}");
        }

        MethodResponse::success()
    }

    /// Serves calls from `calls` until cancelled or the sender side closes.
    pub fn spawn(
        self,
        mut calls: mpsc::Receiver<MethodCall>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    call = calls.recv() => {
                        let Some(call) = call else { break };
                        let response = self.handle(&call.name, call.payload.as_deref()).await;
                        if call.reply.send(response).is_err() {
                            debug!("Caller of {} went away before the reply", call.name);
                        }
                    }
                    _ = cancel.cancelled() => break,
                }
            }
            info!("Config channel shutting down");
        })
    }
}

/// Maps a flat `DeviceConfig` object onto a patch. Unknown keys are skipped;
/// a recognised key whose value does not convert is skipped with a warning.
pub fn parse_device_config(raw: &str) -> Result<ConfigPatch> {
    let value: Value = serde_json::from_str(raw)?;
    let Value::Object(fields) = value else {
        bail!("DeviceConfig payload must be a JSON object");
    };

    let mut patch = ConfigPatch::default();
    for (key, value) in &fields {
        let applied = match key.as_str() {
            "predictionThreshold" => number::<f32>(value)
                .filter(|v| v.is_finite() && (0.0..=1.0).contains(v))
                .map(|v| patch.prediction_threshold = Some(v)),
            "captureRate" => number::<f64>(value)
                .filter(|v| v.is_finite() && *v > 0.0)
                .map(|v| patch.capture_rate = Some(v)),
            "cameraResolutionLength" => number::<u32>(value)
                .filter(|v| *v > 0)
                .map(|v| patch.resolution_width = Some(v)),
            "cameraResolutionWidth" => number::<u32>(value)
                .filter(|v| *v > 0)
                .map(|v| patch.resolution_height = Some(v)),
            "captureLength" => number::<u64>(value)
                .filter(|v| *v > 0)
                .map(|v| patch.clip_length_secs = Some(v)),
            "capturePreroll" => number::<u64>(value)
                .filter(|v| *v > 0)
                .map(|v| patch.preroll_secs = Some(v)),
            "captureVideo" => value.as_bool().map(|v| patch.capture_video = Some(v)),
            other => {
                debug!("Ignoring unknown config key {other}");
                continue;
            }
        };

        if applied.is_none() {
            warn!("Ignoring invalid value {value} for {key}");
        }
    }
    Ok(patch)
}

fn number<T: std::str::FromStr>(value: &Value) -> Option<T> {
    match value {
        Value::String(raw) => raw.trim().parse().ok(),
        Value::Number(n) => n.to_string().parse().ok(),
        _ => None,
    }
}
