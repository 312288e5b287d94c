//! When: issue lifecycle commands against the bound rollout and wait on it.

#![forbid(unsafe_code)]

use std::time::Duration;

use rollwatch_core::{Rollout, RolloutRef};
use rollwatch_ops::PromoteMode;
use serde_json::Value as Json;
use tracing::{error, info};

use crate::{
    common::Common,
    error::{FixtureError, Result},
    given::Given,
    predicates,
    then::Then,
    wait::{await_rollout, WaitOutcome},
};

pub struct When {
    common: Common,
}

enum Lifecycle {
    SetImage(String),
    Promote(PromoteMode),
    Abort,
    Retry,
    Restart,
    Delete,
}

impl Lifecycle {
    fn action(&self) -> &'static str {
        match self {
            Lifecycle::SetImage(_) => "update image",
            Lifecycle::Promote(PromoteMode::Unpause) => "promote",
            Lifecycle::Promote(PromoteMode::Full) => "promote full",
            Lifecycle::Promote(PromoteMode::SkipCurrentStep) => "skip current step",
            Lifecycle::Abort => "abort",
            Lifecycle::Retry => "retry",
            Lifecycle::Restart => "restart",
            Lifecycle::Delete => "delete",
        }
    }

    fn done(&self) -> String {
        match self {
            Lifecycle::SetImage(image) => format!("Updated image to {}", image),
            Lifecycle::Promote(PromoteMode::Unpause) => "Promoted rollout".to_string(),
            Lifecycle::Promote(PromoteMode::Full) => "Fully promoted rollout".to_string(),
            Lifecycle::Promote(PromoteMode::SkipCurrentStep) => "Skipped current step".to_string(),
            Lifecycle::Abort => "Aborted rollout".to_string(),
            Lifecycle::Retry => "Retried rollout".to_string(),
            Lifecycle::Restart => "Restarted rollout".to_string(),
            Lifecycle::Delete => "Deleted rollout".to_string(),
        }
    }
}

fn kind_and_name(obj: &Json) -> (String, String) {
    let kind = obj.get("kind").and_then(Json::as_str).unwrap_or("object").to_string();
    let name = obj.pointer("/metadata/name").and_then(Json::as_str).unwrap_or("").to_string();
    (kind, name)
}

impl When {
    pub fn new(common: Common) -> Self {
        Self { common }
    }

    /// Create or update every auxiliary object, then the rollout, in order.
    /// The first failure stops the sequence; earlier objects stay applied.
    pub async fn apply_manifests(self) -> Result<Self> {
        let rollout = match self.common.rollout.as_ref().and_then(|r| r.manifest.as_ref()) {
            Some(m) => m,
            None => {
                error!("No rollout to create");
                return Err(FixtureError::RolloutNotSet { action: "apply" });
            }
        };
        let namespace = &self.common.config.namespace;
        for obj in self.common.objects.iter().chain(std::iter::once(rollout)) {
            let (kind, name) = kind_and_name(obj);
            let bytes = serde_json::to_vec(obj).map_err(|source| {
                error!(%kind, %name, error = %source, "serializing manifest");
                FixtureError::Serialize { kind: kind.clone(), name: name.clone(), source }
            })?;
            match self.common.ops.apply_manifest(namespace, &bytes).await {
                Ok(out) => info!(%kind, %name, "{}", out),
                Err(source) => {
                    error!(%kind, %name, error = %format!("{source:#}"), "apply failed");
                    return Err(FixtureError::Apply { kind, name, source });
                }
            }
        }
        Ok(self)
    }

    /// Set `image` on every container of the rollout's pod template.
    pub async fn update_image(self, image: &str) -> Result<Self> {
        self.lifecycle(Lifecycle::SetImage(image.to_string())).await
    }

    pub async fn promote_rollout(self) -> Result<Self> {
        self.lifecycle(Lifecycle::Promote(PromoteMode::Unpause)).await
    }

    /// Promote past every remaining step and analysis.
    pub async fn promote_rollout_full(self) -> Result<Self> {
        self.lifecycle(Lifecycle::Promote(PromoteMode::Full)).await
    }

    pub async fn skip_current_step(self) -> Result<Self> {
        self.lifecycle(Lifecycle::Promote(PromoteMode::SkipCurrentStep)).await
    }

    pub async fn abort_rollout(self) -> Result<Self> {
        self.lifecycle(Lifecycle::Abort).await
    }

    pub async fn retry_rollout(self) -> Result<Self> {
        self.lifecycle(Lifecycle::Retry).await
    }

    pub async fn restart_rollout(self) -> Result<Self> {
        self.lifecycle(Lifecycle::Restart).await
    }

    pub async fn delete_rollout(self) -> Result<Self> {
        self.lifecycle(Lifecycle::Delete).await
    }

    async fn lifecycle(self, op: Lifecycle) -> Result<Self> {
        let action = op.action();
        let target = self.common.bound(action)?;
        if matches!(op, Lifecycle::Delete) {
            info!(rollout = %target, "Deleting");
        }
        let ops = &self.common.ops;
        let res = match &op {
            Lifecycle::SetImage(image) => ops.set_image(&target, "*", image).await,
            Lifecycle::Promote(mode) => ops.promote(&target, *mode).await,
            Lifecycle::Abort => ops.abort(&target).await,
            Lifecycle::Retry => ops.retry(&target).await,
            Lifecycle::Restart => ops.restart(&target).await,
            Lifecycle::Delete => ops.delete(&target).await,
        };
        match res {
            Ok(()) => {
                info!(rollout = %target, "{}", op.done());
                Ok(self)
            }
            Err(source) => Err(remote(action, &target, source)),
        }
    }

    /// Block until `predicate` holds for a notification about the bound
    /// rollout, or fail once `timeout` has elapsed.
    pub async fn wait_for_rollout_condition<F>(self, predicate: F, condition: &str, timeout: Duration) -> Result<Self>
    where
        F: Fn(&Rollout) -> bool,
    {
        let target = self.common.bound("wait")?;
        info!(rollout = %target, "Waiting for condition: {}", condition);
        match await_rollout(self.common.ops.as_ref(), &target, condition, timeout, predicate).await? {
            WaitOutcome::ConditionMet { elapsed } => {
                let secs = Duration::from_secs(elapsed.as_secs());
                info!(rollout = %target, "Condition '{}' met after {:?}", condition, secs);
                Ok(self)
            }
            WaitOutcome::TimedOut => {
                error!(rollout = %target, ?timeout, condition, "timed out waiting for condition");
                Err(FixtureError::Timeout { timeout, condition: condition.to_string() })
            }
        }
    }

    pub async fn wait_for_rollout_status(self, status: &str) -> Result<Self> {
        let timeout = self.common.config.default_timeout;
        let condition = predicates::status_condition(status);
        self.wait_for_rollout_condition(predicates::status_is(status), &condition, timeout).await
    }

    pub async fn wait_for_rollout_canary_step_index(self, index: i32) -> Result<Self> {
        let timeout = self.common.config.default_timeout;
        let condition = predicates::step_index_condition(index);
        self.wait_for_rollout_condition(predicates::canary_step_index_is(index), &condition, timeout).await
    }

    pub fn then(self) -> Then {
        Then::new(self.common)
    }

    pub fn given(self) -> Given {
        Given::new(self.common)
    }

    pub fn common(&self) -> &Common {
        &self.common
    }
}

pub(crate) fn remote(action: &'static str, target: &RolloutRef, source: anyhow::Error) -> FixtureError {
    error!(rollout = %target, action, error = %format!("{source:#}"), "remote call failed");
    FixtureError::Remote { action, target: target.to_string(), source }
}
