//! Ready-made rollout predicates and the condition descriptions logged with them.

#![forbid(unsafe_code)]

use rollwatch_core::Rollout;

/// Matches when the computed rollout status equals `target` exactly.
pub fn status_is(target: &str) -> impl Fn(&Rollout) -> bool + Send + Sync + 'static {
    let target = target.to_string();
    move |ro| ro.phase().as_str() == target
}

pub fn status_condition(target: &str) -> String {
    format!("status={}", target)
}

/// Matches when `status.currentStepIndex` is present and equal to `index`.
pub fn canary_step_index_is(index: i32) -> impl Fn(&Rollout) -> bool + Send + Sync + 'static {
    move |ro| ro.status.current_step_index == Some(index)
}

pub fn step_index_condition(index: i32) -> String {
    format!("status.currentStepIndex={}", index)
}
