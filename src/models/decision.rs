use serde::{Deserialize, Serialize};

/// A classifier candidate after the category lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredLabel {
    pub label: String,
    pub score: f32,
}

/// Outcome of classifying one frame against the current threshold.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    NoDetection,
    LowConfidence { label: String, score: f32 },
    Event { label: String, score: f32 },
}

impl Decision {
    pub fn is_event(&self) -> bool {
        matches!(self, Decision::Event { .. })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::NoDetection => "no-detection",
            Decision::LowConfidence { .. } => "low-confidence",
            Decision::Event { .. } => "event",
        }
    }
}
