//! Patch bodies for rollout lifecycle actions.

#![forbid(unsafe_code)]

use anyhow::{anyhow, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rollwatch_core::Rollout;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as Json};

/// How far a promotion goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PromoteMode {
    /// Resume a paused rollout and clear its pause conditions.
    #[default]
    Unpause,
    /// Advance the canary by exactly one step.
    SkipCurrentStep,
    /// Skip all remaining steps and analysis.
    Full,
}

/// Merge patches split by target: `spec` goes to the main resource, `status`
/// to the status subresource.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LifecyclePatch {
    pub spec: Option<Json>,
    pub status: Option<Json>,
}

impl LifecyclePatch {
    pub fn is_empty(&self) -> bool {
        self.spec.is_none() && self.status.is_none()
    }
}

fn unpause() -> Json {
    json!({ "spec": { "paused": false } })
}

pub fn promote_patch(ro: &Rollout, mode: PromoteMode) -> Result<LifecyclePatch> {
    let spec = if ro.spec.paused { Some(unpause()) } else { None };
    match mode {
        PromoteMode::Unpause => {
            let status = if ro.status.pause_conditions.is_empty() {
                None
            } else {
                Some(json!({ "status": { "pauseConditions": null } }))
            };
            Ok(LifecyclePatch { spec, status })
        }
        PromoteMode::SkipCurrentStep => {
            let steps = ro
                .canary_steps()
                .ok_or_else(|| anyhow!("skipping the current step is only supported for canary rollouts"))?;
            let total = i32::try_from(steps.len()).unwrap_or(i32::MAX);
            let next = ro.status.current_step_index.unwrap_or(0).saturating_add(1).min(total);
            Ok(LifecyclePatch {
                spec,
                status: Some(json!({ "status": { "currentStepIndex": next, "pauseConditions": null } })),
            })
        }
        PromoteMode::Full => Ok(LifecyclePatch { spec, status: Some(json!({ "status": { "promoteFull": true } })) }),
    }
}

pub fn abort_patch() -> LifecyclePatch {
    LifecyclePatch { spec: None, status: Some(json!({ "status": { "abort": true } })) }
}

pub fn retry_patch() -> LifecyclePatch {
    LifecyclePatch { spec: None, status: Some(json!({ "status": { "abort": false } })) }
}

pub fn restart_patch(at: DateTime<Utc>) -> LifecyclePatch {
    LifecyclePatch {
        spec: Some(json!({ "spec": { "restartAt": at.to_rfc3339_opts(SecondsFormat::Secs, true) } })),
        status: None,
    }
}

/// Set `image` on every pod-template container whose name matches `container`
/// (`*` matches all). Returns the number of containers changed; zero matches is an error.
pub fn set_image_in_template(obj: &mut Json, container: &str, image: &str) -> Result<usize> {
    let pod_spec = obj
        .pointer_mut("/spec/template/spec")
        .and_then(|v| v.as_object_mut())
        .ok_or_else(|| anyhow!("rollout has no spec.template.spec"))?;
    let mut updated = 0usize;
    for field in ["initContainers", "containers", "ephemeralContainers"] {
        let Some(list) = pod_spec.get_mut(field).and_then(|v| v.as_array_mut()) else { continue };
        for c in list.iter_mut() {
            let matches = container == "*" || c.get("name").and_then(|n| n.as_str()) == Some(container);
            if matches {
                if let Some(c) = c.as_object_mut() {
                    c.insert("image".into(), Json::String(image.to_string()));
                    updated += 1;
                }
            }
        }
    }
    if updated == 0 {
        return Err(anyhow!("unable to find container named \"{}\"", container));
    }
    Ok(updated)
}
