use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::PathBuf,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

/// Runtime parameters that can be changed remotely while the agent runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeConfig {
    pub prediction_threshold: f32,
    /// Frames per second of the live recording, also handed to the transcoder.
    pub capture_rate: f64,
    /// Size of the frame fed to the classifier.
    pub resolution: Resolution,
    pub clip_length_secs: u64,
    pub preroll_secs: u64,
    pub capture_video: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            prediction_threshold: 0.4,
            capture_rate: 30.0,
            resolution: Resolution {
                width: 256,
                height: 256,
            },
            clip_length_secs: 30,
            preroll_secs: 5,
            capture_video: true,
        }
    }
}

impl RuntimeConfig {
    pub fn preroll(&self) -> Duration {
        Duration::from_secs(self.preroll_secs)
    }

    /// Length of the live recording kept after the event, so that before and
    /// after together span `clip_length_secs`.
    pub fn after_segment(&self) -> Duration {
        Duration::from_secs(self.clip_length_secs.saturating_sub(self.preroll_secs).max(1))
    }

    /// Minimum time between decisions so the pre-roll buffer holds a full window.
    pub fn settle(&self) -> Duration {
        Duration::from_secs(self.preroll_secs + 1)
    }
}

/// A validated set of field updates from one remote payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigPatch {
    pub prediction_threshold: Option<f32>,
    pub capture_rate: Option<f64>,
    pub resolution_width: Option<u32>,
    pub resolution_height: Option<u32>,
    pub clip_length_secs: Option<u64>,
    pub preroll_secs: Option<u64>,
    pub capture_video: Option<bool>,
}

impl ConfigPatch {
    pub fn is_empty(&self) -> bool {
        *self == ConfigPatch::default()
    }

    fn apply_to(&self, config: &mut RuntimeConfig) {
        if let Some(value) = self.prediction_threshold {
            config.prediction_threshold = value;
        }
        if let Some(value) = self.capture_rate {
            config.capture_rate = value;
        }
        if let Some(value) = self.resolution_width {
            config.resolution.width = value;
        }
        if let Some(value) = self.resolution_height {
            config.resolution.height = value;
        }
        if let Some(value) = self.clip_length_secs {
            config.clip_length_secs = value;
        }
        if let Some(value) = self.preroll_secs {
            config.preroll_secs = value;
        }
        if let Some(value) = self.capture_video {
            config.capture_video = value;
        }
    }
}

/// Process-wide Config State. One writer (the config channel), many readers;
/// a whole patch lands under a single write lock so readers only ever see
/// complete snapshots.
pub struct ConfigStore {
    path: Option<PathBuf>,
    data: RwLock<RuntimeConfig>,
}

impl ConfigStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read runtime config from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                log::warn!(
                    "Ignoring malformed runtime config {}: {err}",
                    path.display()
                );
                RuntimeConfig::default()
            })
        } else {
            RuntimeConfig::default()
        };

        Ok(Self {
            path: Some(path),
            data: RwLock::new(data),
        })
    }

    pub fn in_memory(config: RuntimeConfig) -> Self {
        Self {
            path: None,
            data: RwLock::new(config),
        }
    }

    pub fn snapshot(&self) -> RuntimeConfig {
        self.read().clone()
    }

    pub fn threshold(&self) -> f32 {
        self.read().prediction_threshold
    }

    /// Applies every field of `patch` atomically and persists the result.
    /// Returns the new snapshot.
    pub fn apply(&self, patch: &ConfigPatch) -> Result<RuntimeConfig> {
        let updated = {
            let mut guard = self.write();
            patch.apply_to(&mut guard);
            guard.clone()
        };
        self.persist(&updated)?;
        Ok(updated)
    }

    fn persist(&self, data: &RuntimeConfig) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(path, serialized)
            .with_context(|| format!("Failed to write runtime config to {}", path.display()))
    }

    fn read(&self) -> RwLockReadGuard<'_, RuntimeConfig> {
        self.data.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, RuntimeConfig> {
        self.data.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
