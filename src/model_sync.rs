use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::bridge::{BlobStore, Installer};
use crate::error::bounded;
use crate::sync::MODEL_CONTAINER;

const LIST_TIMEOUT_SECS: u64 = 30;
const INSTALL_TIMEOUT_SECS: u64 = 600;

/// Last remote model timestamp this device installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelVersionRecord {
    #[serde(rename = "lastupdate")]
    pub last_update: DateTime<Utc>,
}

impl ModelVersionRecord {
    /// A missing, empty or malformed record file all read as "no record".
    pub async fn load(path: &Path) -> Option<Self> {
        let contents = tokio::fs::read(path).await.ok()?;
        match serde_json::from_slice(&contents) {
            Ok(record) => Some(record),
            Err(err) => {
                if !contents.is_empty() {
                    warn!("Ignoring malformed model record {}: {err}", path.display());
                }
                None
            }
        }
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        let serialized = serde_json::to_vec(self)?;
        let staging = path.with_extension("json.tmp");
        tokio::fs::write(&staging, serialized)
            .await
            .with_context(|| format!("failed to write {}", staging.display()))?;
        tokio::fs::rename(&staging, path)
            .await
            .with_context(|| format!("failed to replace {}", path.display()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    Refreshed { remote: DateTime<Utc> },
    Unchanged,
    /// The published model could not be located; the cached one stays in use.
    Skipped,
}

pub struct ModelReconciler {
    store: Arc<dyn BlobStore>,
    installer: Arc<dyn Installer>,
    record_path: PathBuf,
    model_blob: String,
}

impl ModelReconciler {
    pub fn new(
        store: Arc<dyn BlobStore>,
        installer: Arc<dyn Installer>,
        record_path: PathBuf,
        model_blob: String,
    ) -> Self {
        Self {
            store,
            installer,
            record_path,
            model_blob,
        }
    }

    /// Installs the published model when it differs from the recorded one.
    /// An install failure leaves the record untouched so the next pass retries.
    pub async fn reconcile(&self) -> Result<Reconciliation> {
        let Some(remote) = self.remote_timestamp().await else {
            return Ok(Reconciliation::Skipped);
        };

        let local = ModelVersionRecord::load(&self.record_path).await;
        if local.is_some_and(|record| record.last_update == remote) {
            debug!("Model {} is current ({remote})", self.model_blob);
            return Ok(Reconciliation::Unchanged);
        }

        info!(
            "Refreshing model {}: local {:?}, remote {remote}",
            self.model_blob,
            local.map(|record| record.last_update)
        );
        bounded(
            "model install",
            Duration::from_secs(INSTALL_TIMEOUT_SECS),
            self.installer.replace_model(remote),
        )
        .await?;

        ModelVersionRecord { last_update: remote }
            .save(&self.record_path)
            .await?;
        info!("Model {} refreshed to {remote}", self.model_blob);
        Ok(Reconciliation::Refreshed { remote })
    }

    async fn remote_timestamp(&self) -> Option<DateTime<Utc>> {
        let listed = bounded(
            "list models",
            Duration::from_secs(LIST_TIMEOUT_SECS),
            self.store.list(MODEL_CONTAINER),
        )
        .await;

        let entries = match listed {
            Ok(entries) => entries,
            Err(err) => {
                warn!("Skipping model reconciliation: {err}");
                return None;
            }
        };

        let found = entries
            .into_iter()
            .find(|entry| entry.name == self.model_blob)
            .map(|entry| entry.last_modified);
        if found.is_none() {
            warn!(
                "Model {} not found in {MODEL_CONTAINER}; keeping the cached model",
                self.model_blob
            );
        }
        found
    }
}
