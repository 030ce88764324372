use std::path::{Component, Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info};

use super::{BlobEntry, BlobStore};
use crate::agent_config::BlobCredentials;

/// Blob store backed by a local directory tree: `<root>/<account>/<container>/<name>`.
/// Containers may be nested (`edgeimages/badimages`).
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: PathBuf, credentials: &BlobCredentials) -> Result<Self> {
        if credentials.key.trim().is_empty() {
            bail!("blob store key for account {} is empty", credentials.account);
        }
        let root = root.join(&credentials.account);
        std::fs::create_dir_all(&root)
            .with_context(|| format!("failed to create blob root {}", root.display()))?;
        info!("Blob store rooted at {}", root.display());
        Ok(Self { root })
    }

    fn container_dir(&self, container: &str) -> Result<PathBuf> {
        Ok(self.root.join(relative(container)?))
    }
}

/// Rejects absolute paths and `..` so callers can't escape the store root.
fn relative(raw: &str) -> Result<&Path> {
    let path = Path::new(raw);
    if raw.is_empty()
        || !path
            .components()
            .all(|component| matches!(component, Component::Normal(_)))
    {
        bail!("invalid blob path '{raw}'");
    }
    Ok(path)
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn create_container(&self, container: &str) -> Result<()> {
        let dir = self.container_dir(container)?;
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("failed to create container {container}"))
    }

    async fn upload(
        &self,
        container: &str,
        name: &str,
        path: &Path,
        content_type: &str,
    ) -> Result<()> {
        let dir = self.container_dir(container)?;
        tokio::fs::create_dir_all(&dir).await?;

        let target = dir.join(relative(name)?);
        let staging = dir.join(format!(".{name}.partial"));
        tokio::fs::copy(path, &staging)
            .await
            .with_context(|| format!("failed to copy {} into {container}", path.display()))?;
        tokio::fs::rename(&staging, &target)
            .await
            .with_context(|| format!("failed to publish {container}/{name}"))?;

        debug!("Stored {container}/{name} ({content_type})");
        Ok(())
    }

    async fn list(&self, container: &str) -> Result<Vec<BlobEntry>> {
        let dir = self.container_dir(container)?;
        let mut entries = Vec::new();
        let mut read_dir = match tokio::fs::read_dir(&dir).await {
            Ok(read_dir) => read_dir,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(entries),
            Err(err) => return Err(err).with_context(|| format!("failed to list {container}")),
        };

        while let Some(entry) = read_dir.next_entry().await? {
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            entries.push(BlobEntry {
                name,
                last_modified: DateTime::<Utc>::from(metadata.modified()?),
            });
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }
}
