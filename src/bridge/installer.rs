use std::process::Stdio;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::info;

use super::Installer;
use crate::agent_config::CommandLine;

/// Hands the model refresh to an external setup script, which downloads,
/// unpacks and builds the published model in place.
pub struct CommandInstaller {
    cmd: CommandLine,
}

impl CommandInstaller {
    pub fn new(cmd: CommandLine) -> Self {
        Self { cmd }
    }
}

#[async_trait]
impl Installer for CommandInstaller {
    async fn replace_model(&self, version: DateTime<Utc>) -> Result<()> {
        info!("Installing model version {} via {}", version.to_rfc3339(), self.cmd.program);
        let status = self
            .cmd
            .to_command()
            .env("EDGEWATCH_MODEL_VERSION", version.to_rfc3339())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
            .with_context(|| format!("failed to spawn {}", self.cmd.program))?;

        if !status.success() {
            bail!("model installer exited with {status}");
        }
        Ok(())
    }
}
