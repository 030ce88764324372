use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SegmentKind {
    Before,
    After,
}

impl SegmentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SegmentKind::Before => "before",
            SegmentKind::After => "after",
        }
    }
}

/// One half of an event clip. Starts as a raw recording and is switched to
/// its playable container by the transcode step.
#[derive(Debug, Clone)]
pub struct Segment {
    pub kind: SegmentKind,
    pub started_at: DateTime<Utc>,
    pub raw_path: PathBuf,
    pub playable_path: Option<PathBuf>,
}

impl Segment {
    pub fn new(kind: SegmentKind, started_at: DateTime<Utc>, raw_path: PathBuf) -> Self {
        Self {
            kind,
            started_at,
            raw_path,
            playable_path: None,
        }
    }

    pub fn mark_transcoded(&mut self, playable_path: PathBuf) {
        self.playable_path = Some(playable_path);
    }

    pub fn playable(&self) -> Option<&Path> {
        self.playable_path.as_deref()
    }
}
