use std::path::Path;
use std::process::Stdio;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use image::imageops::FilterType;
use log::{debug, info};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout};

use super::{Camera, VideoStream};
use crate::agent_config::CommandLine;
use crate::models::{Frame, StreamChunk};
use crate::settings::Resolution;

const CHUNK_BYTES: usize = 64 * 1024;

/// Camera driven through the platform's capture tools: one long-running
/// process streams H.264 to stdout, a second one-shot process takes stills.
pub struct CommandCamera {
    video_cmd: CommandLine,
    still_cmd: CommandLine,
    probe_cmd: CommandLine,
}

impl CommandCamera {
    pub fn new(video_cmd: CommandLine, still_cmd: CommandLine, probe_cmd: CommandLine) -> Self {
        Self {
            video_cmd,
            still_cmd,
            probe_cmd,
        }
    }

    async fn run_still(&self, extra: &[&str]) -> Result<Vec<u8>> {
        let output = self
            .still_cmd
            .to_command()
            .args(extra)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("failed to spawn {}", self.still_cmd.program))?;

        if !output.status.success() {
            bail!(
                "{} exited with {}: {}",
                self.still_cmd.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl Camera for CommandCamera {
    async fn probe(&self) -> Result<()> {
        let output = self
            .probe_cmd
            .to_command()
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("failed to spawn {}", self.probe_cmd.program))?;

        let listing = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() || listing.contains("No cameras available") {
            bail!("no camera device found");
        }
        info!("Camera probe ok: {}", listing.lines().next().unwrap_or_default());
        Ok(())
    }

    async fn open_stream(&self, capture_rate: f64) -> Result<Box<dyn VideoStream>> {
        let mut child = self
            .video_cmd
            .to_command()
            .arg("--framerate")
            .arg(format!("{capture_rate}"))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn {}", self.video_cmd.program))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("video process has no stdout"))?;
        debug!("Live recording started at {capture_rate} fps");

        Ok(Box::new(ProcessStream {
            _child: child,
            stdout,
            buf: vec![0; CHUNK_BYTES],
        }))
    }

    async fn capture_frame(&self, resolution: Resolution) -> Result<Frame> {
        let captured_at = Utc::now();
        let width = resolution.width.to_string();
        let height = resolution.height.to_string();
        let bytes = self
            .run_still(&["-e", "png", "--width", &width, "--height", &height, "-o", "-"])
            .await?;

        let decoded = image::load_from_memory(&bytes).context("failed to decode model frame")?;
        let rgb = if decoded.width() != resolution.width || decoded.height() != resolution.height {
            decoded
                .resize_exact(resolution.width, resolution.height, FilterType::Triangle)
                .to_rgb8()
        } else {
            decoded.to_rgb8()
        };

        Ok(Frame::from_rgb_image(rgb, captured_at))
    }

    async fn capture_still(&self, path: &Path) -> Result<()> {
        let target = path
            .to_str()
            .ok_or_else(|| anyhow!("still path {} is not UTF-8", path.display()))?;
        self.run_still(&["-e", "jpg", "-o", target]).await?;
        Ok(())
    }
}

struct ProcessStream {
    _child: Child,
    stdout: ChildStdout,
    buf: Vec<u8>,
}

#[async_trait]
impl VideoStream for ProcessStream {
    async fn next_chunk(&mut self) -> Result<Option<StreamChunk>> {
        let read = self
            .stdout
            .read(&mut self.buf)
            .await
            .context("failed to read live recording")?;
        if read == 0 {
            return Ok(None);
        }
        Ok(Some(StreamChunk {
            captured_at: Utc::now(),
            data: self.buf[..read].to_vec(),
        }))
    }
}
