use std::sync::Arc;
use std::time::Duration;

use crate::bridge::Classifier;
use crate::error::{bounded, CallError};
use crate::models::{Decision, Frame, ScoredLabel};
use crate::settings::ConfigStore;

pub(super) const CLASSIFY_TIMEOUT_SECS: u64 = 5;
const MAX_CANDIDATES: usize = 2;

/// Turns a frame into a [`Decision`] against the threshold in force at the
/// moment of the call.
pub struct InferenceGate {
    classifier: Arc<dyn Classifier>,
    config: Arc<ConfigStore>,
    limit: Duration,
}

impl InferenceGate {
    pub fn new(classifier: Arc<dyn Classifier>, config: Arc<ConfigStore>) -> Self {
        Self {
            classifier,
            config,
            limit: Duration::from_secs(CLASSIFY_TIMEOUT_SECS),
        }
    }

    pub async fn classify(&self, frame: &Frame) -> Result<Decision, CallError> {
        let ranked = bounded("classify", self.limit, self.classifier.predict(frame)).await?;
        let candidates = top_candidates(self.classifier.as_ref(), ranked);
        Ok(decide(&candidates, self.config.threshold()))
    }
}

/// Best `MAX_CANDIDATES` predictions, highest score first, with their
/// category names resolved.
pub fn top_candidates(classifier: &dyn Classifier, mut ranked: Vec<(usize, f32)>) -> Vec<ScoredLabel> {
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    ranked
        .into_iter()
        .take(MAX_CANDIDATES)
        .map(|(index, score)| ScoredLabel {
            label: classifier
                .category(index)
                .unwrap_or_else(|| format!("category-{index}")),
            score,
        })
        .collect()
}

pub fn decide(candidates: &[ScoredLabel], threshold: f32) -> Decision {
    match candidates.first() {
        None => Decision::NoDetection,
        Some(top) if top.score < threshold => Decision::LowConfidence {
            label: top.label.clone(),
            score: top.score,
        },
        Some(top) => Decision::Event {
            label: top.label.clone(),
            score: top.score,
        },
    }
}
