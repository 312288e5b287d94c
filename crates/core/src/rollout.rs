//! Rollout snapshot model and computed status.
//!
//! Only the fields the status computation and the step predicates read are
//! modelled; everything else in the object is ignored on decode.

#![forbid(unsafe_code)]

use std::fmt;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};

use crate::{ROLLOUT_GROUP, ROLLOUT_KIND};

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("expected an argoproj.io Rollout, got apiVersion={api_version:?} kind={kind:?}")]
    UnexpectedKind { api_version: Option<String>, kind: Option<String> },
    #[error("decoding rollout: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("bookmark events carry no rollout state")]
    Bookmark,
}

/// Point-in-time state of a rollout as delivered by a watch.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Rollout {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: RolloutSpec,
    #[serde(default)]
    pub status: RolloutStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RolloutSpec {
    pub replicas: Option<i32>,
    #[serde(default)]
    pub paused: bool,
    #[serde(default)]
    pub strategy: RolloutStrategy,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RolloutStrategy {
    pub canary: Option<CanaryStrategy>,
    pub blue_green: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CanaryStrategy {
    #[serde(default)]
    pub steps: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RolloutStatus {
    #[serde(default)]
    pub abort: bool,
    pub current_step_index: Option<i32>,
    pub observed_generation: Option<String>,
    pub current_pod_hash: Option<String>,
    #[serde(default)]
    pub replicas: i32,
    #[serde(default)]
    pub updated_replicas: i32,
    #[serde(default)]
    pub available_replicas: i32,
    #[serde(default)]
    pub pause_conditions: Vec<PauseCondition>,
    #[serde(default)]
    pub conditions: Vec<RolloutCondition>,
    #[serde(default)]
    pub canary: CanaryStatus,
    #[serde(default)]
    pub blue_green: BlueGreenStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PauseCondition {
    #[serde(default)]
    pub reason: String,
    pub start_time: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RolloutCondition {
    #[serde(rename = "type", default)]
    pub type_: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CanaryStatus {
    #[serde(rename = "stableRS")]
    pub stable_rs: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BlueGreenStatus {
    pub active_selector: Option<String>,
}

/// Human status of a rollout, as reported by the rollout tooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RolloutPhase {
    Healthy,
    Progressing,
    Paused,
    Degraded,
    InvalidSpec,
}

impl RolloutPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RolloutPhase::Healthy => "Healthy",
            RolloutPhase::Progressing => "Progressing",
            RolloutPhase::Paused => "Paused",
            RolloutPhase::Degraded => "Degraded",
            RolloutPhase::InvalidSpec => "InvalidSpec",
        }
    }
}

impl fmt::Display for RolloutPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const INVALID_SPEC: &str = "InvalidSpec";
const DEGRADED_REASONS: [&str; 2] = ["RolloutAborted", "ProgressDeadlineExceeded"];

impl Rollout {
    /// Decode a snapshot from a raw watch object, rejecting anything that is
    /// not an `argoproj.io` Rollout.
    pub fn from_object(object: &serde_json::Value) -> Result<Self, SnapshotError> {
        let api_version = object.get("apiVersion").and_then(|v| v.as_str());
        let kind = object.get("kind").and_then(|v| v.as_str());
        let group_ok = api_version
            .and_then(|av| av.split_once('/'))
            .map(|(group, _)| group == ROLLOUT_GROUP)
            .unwrap_or(false);
        if !group_ok || kind != Some(ROLLOUT_KIND) {
            return Err(SnapshotError::UnexpectedKind {
                api_version: api_version.map(str::to_string),
                kind: kind.map(str::to_string),
            });
        }
        Ok(Rollout::deserialize(object)?)
    }

    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or("")
    }

    pub fn canary_steps(&self) -> Option<&[serde_json::Value]> {
        self.spec.strategy.canary.as_ref().map(|c| c.steps.as_slice())
    }

    pub fn phase(&self) -> RolloutPhase {
        let status = &self.status;
        if let Some(generation) = self.metadata.generation {
            if status.observed_generation.as_deref() != Some(generation.to_string().as_str()) {
                return RolloutPhase::Progressing;
            }
        }
        for cond in &status.conditions {
            if cond.type_ == INVALID_SPEC {
                return RolloutPhase::InvalidSpec;
            }
            if DEGRADED_REASONS.contains(&cond.reason.as_str()) {
                return RolloutPhase::Degraded;
            }
        }
        if status.abort {
            return RolloutPhase::Degraded;
        }
        if self.spec.paused || !status.pause_conditions.is_empty() {
            return RolloutPhase::Paused;
        }
        let desired = self.spec.replicas.unwrap_or(1);
        if status.updated_replicas < desired
            || status.available_replicas < status.updated_replicas
            || status.replicas > status.updated_replicas
        {
            return RolloutPhase::Progressing;
        }
        if self.spec.strategy.blue_green.is_some() {
            if !on_current_hash(&status.blue_green.active_selector, &status.current_pod_hash) {
                return RolloutPhase::Progressing;
            }
        } else if self.spec.strategy.canary.is_some() && !on_current_hash(&status.canary.stable_rs, &status.current_pod_hash) {
            return RolloutPhase::Progressing;
        }
        RolloutPhase::Healthy
    }
}

/// Both hashes present, non-empty and equal.
fn on_current_hash(hash: &Option<String>, current: &Option<String>) -> bool {
    match (hash.as_deref(), current.as_deref()) {
        (Some(h), Some(c)) => !h.is_empty() && h == c,
        _ => false,
    }
}
