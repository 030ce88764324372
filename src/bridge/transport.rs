use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::DeviceTransport;
use crate::config_channel::{MethodCall, MethodResponse};

#[derive(Debug, Deserialize)]
struct WireRequest {
    method: String,
    #[serde(default)]
    payload: Option<Value>,
}

#[derive(Debug, Serialize)]
struct WireResponse {
    status: u16,
    payload: Value,
}

impl From<MethodResponse> for WireResponse {
    fn from(response: MethodResponse) -> Self {
        let payload = serde_json::from_str(&response.body).unwrap_or(Value::String(response.body));
        Self {
            status: response.status,
            payload,
        }
    }
}

/// Device-method delivery over TCP, one JSON request per line:
/// `{"method": "DeviceConfig", "payload": {...}}`.
pub struct TcpMethodServer {
    listener: TcpListener,
    calls: mpsc::Sender<MethodCall>,
}

impl TcpMethodServer {
    pub async fn bind(addr: SocketAddr, calls: mpsc::Sender<MethodCall>) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind device-method listener on {addr}"))?;
        info!("Device-method transport listening on {}", listener.local_addr()?);
        Ok(Self { listener, calls })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts connections until cancelled. An accept failure is a transport
    /// failure and ends the serve loop with an error.
    pub async fn serve(self, cancel: CancellationToken) -> Result<()> {
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, peer) = accepted.context("device-method listener failed")?;
                    debug!("Device-method connection from {peer}");
                    let calls = self.calls.clone();
                    tokio::spawn(async move {
                        if let Err(err) = handle_connection(stream, calls).await {
                            warn!("Device-method connection {peer} closed: {err:#}");
                        }
                    });
                }
                _ = cancel.cancelled() => {
                    info!("Device-method transport shutting down");
                    return Ok(());
                }
            }
        }
    }
}

async fn handle_connection(stream: TcpStream, calls: mpsc::Sender<MethodCall>) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<WireRequest>(&line) {
            Ok(request) => dispatch(request, &calls).await?,
            Err(err) => MethodResponse::bad_request(format!("malformed request: {err}")),
        };

        let mut encoded = serde_json::to_vec(&WireResponse::from(response))?;
        encoded.push(b'\n');
        writer.write_all(&encoded).await?;
    }
    Ok(())
}

async fn dispatch(request: WireRequest, calls: &mpsc::Sender<MethodCall>) -> Result<MethodResponse> {
    let payload = request.payload.map(|value| match value {
        Value::String(raw) => raw,
        other => other.to_string(),
    });
    let (reply_tx, reply_rx) = oneshot::channel();
    calls
        .send(MethodCall {
            name: request.method,
            payload,
            reply: reply_tx,
        })
        .await
        .context("config channel is gone")?;
    reply_rx.await.context("config channel dropped the call")
}

/// Reported-state sink that keeps the latest document on disk.
pub struct FileStateReporter {
    path: PathBuf,
}

impl FileStateReporter {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl DeviceTransport for FileStateReporter {
    async fn report_state(&self, reported: Value) -> Result<()> {
        let serialized = serde_json::to_vec_pretty(&reported)?;
        tokio::fs::write(&self.path, serialized)
            .await
            .with_context(|| format!("failed to write reported state {}", self.path.display()))?;
        info!("Device state reported");
        Ok(())
    }
}
