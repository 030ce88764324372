use std::future::Future;
use std::time::Duration;

use crate::models::SegmentKind;

/// Outcome of a bounded call into an external collaborator. A timeout is
/// handled exactly like a failure of the same call.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error("{op} timed out after {}s", .limit.as_secs())]
    Timeout { op: &'static str, limit: Duration },

    #[error("{op} failed: {reason}")]
    Failed { op: &'static str, reason: String },
}

impl CallError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, CallError::Timeout { .. })
    }
}

/// Runs `fut` with an upper bound of `limit`.
pub async fn bounded<T, F>(op: &'static str, limit: Duration, fut: F) -> Result<T, CallError>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(CallError::Failed {
            op,
            reason: format!("{err:#}"),
        }),
        Err(_) => Err(CallError::Timeout { op, limit }),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PrerollError {
    #[error("pre-roll buffer is empty")]
    Empty,

    #[error("requested window starts at {requested} but the oldest buffered sample is {earliest}")]
    WindowPredatesBuffer {
        requested: chrono::DateTime<chrono::Utc>,
        earliest: chrono::DateTime<chrono::Utc>,
    },

    #[error("failed to write drained window: {0}")]
    Io(#[from] std::io::Error),
}

/// Reasons an event assembly is abandoned. Each one is terminal for the
/// event only; monitoring resumes afterwards.
#[derive(Debug, thiserror::Error)]
pub enum AssemblyError {
    #[error("could not split the live recording: {0}")]
    Split(String),

    #[error("pre-roll drain failed: {0}")]
    Drain(#[from] PrerollError),

    #[error("after segment did not complete: {0}")]
    AfterSegment(String),

    #[error("transcoding the {} segment failed: {source}", .kind.as_str())]
    Transcode {
        kind: SegmentKind,
        #[source]
        source: CallError,
    },

    #[error("stitching the full clip failed: {0}")]
    Stitch(#[source] CallError),

    #[error("writing the event descriptor failed: {0}")]
    Describe(String),

    #[error("event working directory error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("required credential {0} is not set")]
    MissingCredential(&'static str),

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}
