#![forbid(unsafe_code)]

use std::time::Duration;

use rollwatch_core::{SnapshotError, WatchEventKind};

/// Terminal failure of a fixture step. Every variant ends the test; the
/// fluent chain short-circuits on the first one via `?`.
#[derive(Debug, thiserror::Error)]
pub enum FixtureError {
    #[error("{action}: rollout not set")]
    RolloutNotSet { action: &'static str },

    #[error("{action} of rollout {target} failed: {source:#}")]
    Remote { action: &'static str, target: String, #[source] source: anyhow::Error },

    #[error("serializing {kind} {name}: {source}")]
    Serialize { kind: String, name: String, #[source] source: serde_json::Error },

    #[error("apply of {kind} {name} failed: {source:#}")]
    Apply { kind: String, name: String, #[source] source: anyhow::Error },

    #[error("timeout after {timeout:?} waiting for condition {condition}")]
    Timeout { timeout: Duration, condition: String },

    #[error("unexpected object on rollout watch ({event:?} event): {source}")]
    UnexpectedObject { event: WatchEventKind, #[source] source: SnapshotError },

    #[error("rollout watch closed while waiting for condition {condition}")]
    WatchClosed { condition: String },

    #[error("invalid manifest: {0}")]
    Manifest(String),

    #[error("expectation failed: {0}")]
    Expectation(String),
}

pub type Result<T, E = FixtureError> = std::result::Result<T, E>;

impl FixtureError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, FixtureError::Timeout { .. })
    }
}
