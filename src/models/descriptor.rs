use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Metadata summarising one completed event. Written once, uploaded once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventDescriptor {
    #[serde(rename = "sysTime")]
    pub system_time: DateTime<Utc>,
    #[serde(rename = "videoStartTime")]
    pub event_start_time: DateTime<Utc>,
    #[serde(rename = "prediction(s)")]
    pub predictions: Vec<String>,
    #[serde(rename = "predictionConfidence")]
    pub confidence: f32,
    #[serde(rename = "videoName")]
    pub artifact_name: String,
}

#[derive(Serialize, Deserialize)]
struct DescriptorDocument {
    #[serde(rename = "Description")]
    description: EventDescriptor,
}

impl EventDescriptor {
    pub async fn write_to(&self, path: &Path) -> Result<()> {
        let document = DescriptorDocument {
            description: self.clone(),
        };
        let serialized =
            serde_json::to_vec_pretty(&document).context("failed to serialize event descriptor")?;
        tokio::fs::write(path, serialized)
            .await
            .with_context(|| format!("failed to write descriptor {}", path.display()))
    }

    pub async fn read_from(path: &Path) -> Result<Self> {
        let contents = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read descriptor {}", path.display()))?;
        let document: DescriptorDocument =
            serde_json::from_slice(&contents).context("malformed event descriptor")?;
        Ok(document.description)
    }
}
