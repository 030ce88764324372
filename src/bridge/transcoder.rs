use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use log::debug;
use tokio::process::Command;

use super::Transcoder;

/// Wraps the GPAC `MP4Box` muxer.
pub struct Mp4BoxTranscoder {
    program: String,
}

impl Mp4BoxTranscoder {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn run(&self, mut command: Command) -> Result<()> {
        let output = command
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("failed to spawn {}", self.program))?;
        if !output.status.success() {
            bail!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}

#[async_trait]
impl Transcoder for Mp4BoxTranscoder {
    async fn encode(&self, raw: &Path, out: &Path, fps: f64) -> Result<PathBuf> {
        // MP4Box appends to an existing output, so mux into a fresh temp file.
        let staging = out.with_extension("mp4.tmp");
        let _ = tokio::fs::remove_file(&staging).await;

        let mut command = Command::new(&self.program);
        command
            .arg("-fps")
            .arg(fps.to_string())
            .arg("-quiet")
            .arg("-add")
            .arg(raw)
            .arg(&staging);
        self.run(command).await?;

        tokio::fs::rename(&staging, out)
            .await
            .with_context(|| format!("failed to move muxed clip to {}", out.display()))?;
        debug!("Muxed {} -> {}", raw.display(), out.display());
        Ok(out.to_path_buf())
    }

    async fn concatenate(&self, parts: &[PathBuf], out: &Path) -> Result<PathBuf> {
        if parts.is_empty() {
            bail!("nothing to concatenate into {}", out.display());
        }

        let mut command = Command::new(&self.program);
        for part in parts {
            command.arg("-cat").arg(part);
        }
        command.arg("-new").arg(out);
        self.run(command).await?;

        debug!("Stitched {} parts into {}", parts.len(), out.display());
        Ok(out.to_path_buf())
    }
}
