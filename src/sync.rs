use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{info, warn};

use crate::bridge::BlobStore;
use crate::error::{bounded, CallError};

const UPLOAD_TIMEOUT_SECS: u64 = 60;

pub const IMAGE_CONTAINER: &str = "edgeimages";
pub const VIDEO_CONTAINER: &str = "edgevideos";
pub const DESCRIPTOR_CONTAINER: &str = "edgejson";
pub const MODEL_CONTAINER: &str = "edgemodels";

/// Where an artifact goes in the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactCategory {
    GoodImage,
    BadImage,
    BeforeVideo,
    AfterVideo,
    FullVideo,
    Descriptor,
}

impl ArtifactCategory {
    pub fn container(&self) -> &'static str {
        match self {
            ArtifactCategory::GoodImage => "edgeimages/goodimages",
            ArtifactCategory::BadImage => "edgeimages/badimages",
            ArtifactCategory::BeforeVideo => "edgevideos/beforevideo",
            ArtifactCategory::AfterVideo => "edgevideos/aftervideo",
            ArtifactCategory::FullVideo => "edgevideos/fullvideo",
            ArtifactCategory::Descriptor => DESCRIPTOR_CONTAINER,
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ArtifactCategory::GoodImage | ArtifactCategory::BadImage => "image/jpeg",
            ArtifactCategory::BeforeVideo
            | ArtifactCategory::AfterVideo
            | ArtifactCategory::FullVideo => "video/mp4",
            ArtifactCategory::Descriptor => "application/json",
        }
    }
}

/// Top-level containers created at startup.
pub fn all_containers() -> [&'static str; 4] {
    [
        IMAGE_CONTAINER,
        VIDEO_CONTAINER,
        MODEL_CONTAINER,
        DESCRIPTOR_CONTAINER,
    ]
}

/// Hands local artifacts to the blob store. A local file is removed only
/// after the store confirmed the upload.
#[derive(Clone)]
pub struct ArtifactSync {
    store: Arc<dyn BlobStore>,
    limit: Duration,
}

impl ArtifactSync {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self {
            store,
            limit: Duration::from_secs(UPLOAD_TIMEOUT_SECS),
        }
    }

    pub async fn ensure_containers(&self) -> Result<()> {
        for container in all_containers() {
            bounded("create container", self.limit, self.store.create_container(container))
                .await
                .with_context(|| format!("failed to create container {container}"))?;
        }
        Ok(())
    }

    pub async fn upload(
        &self,
        category: ArtifactCategory,
        name: &str,
        local_path: &Path,
    ) -> Result<(), CallError> {
        let container = category.container();
        bounded(
            "upload",
            self.limit,
            self.store
                .upload(container, name, local_path, category.content_type()),
        )
        .await?;
        info!("Uploaded {container}/{name}");

        if let Err(err) = tokio::fs::remove_file(local_path).await {
            warn!(
                "Uploaded {name} but could not remove {}: {err}",
                local_path.display()
            );
        }
        Ok(())
    }
}

/// Moves an artifact whose upload failed out of a directory that is about to
/// be removed.
pub async fn retain(local_path: &Path, retained_dir: &Path) -> Result<PathBuf> {
    tokio::fs::create_dir_all(retained_dir)
        .await
        .with_context(|| format!("failed to create {}", retained_dir.display()))?;
    let file_name = local_path
        .file_name()
        .with_context(|| format!("{} has no file name", local_path.display()))?;
    let target = retained_dir.join(file_name);
    if tokio::fs::rename(local_path, &target).await.is_err() {
        tokio::fs::copy(local_path, &target)
            .await
            .with_context(|| format!("failed to retain {}", local_path.display()))?;
        tokio::fs::remove_file(local_path).await?;
    }
    Ok(target)
}
