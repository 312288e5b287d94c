//! Rollwatch ops: one-shot rollout lifecycle mutations and filtered watches.
//!
//! Every call is fire-once. Failures are returned to the caller untouched;
//! nothing here retries.

#![forbid(unsafe_code)]

use anyhow::{anyhow, Context, Result};
use kube::{api::{DeleteParams, Patch, PatchParams, PostParams}, core::DynamicObject, Client};
use rollwatch_core::{Rollout, RolloutRef, Subscription, SubscriptionConfig};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tracing::{debug, info};

pub mod patch;

pub use patch::{LifecyclePatch, PromoteMode};

/// Runtime knobs for the kube-backed implementation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpsConfig {
    /// Field manager recorded for server-side apply.
    pub field_manager: String,
    /// Bound of the channel between a watch pump and its consumer.
    pub watch_queue_cap: usize,
}

impl Default for OpsConfig {
    fn default() -> Self {
        Self { field_manager: "rollwatch".to_string(), watch_queue_cap: 256 }
    }
}

impl OpsConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        Self {
            field_manager: lookup("ROLLWATCH_FIELD_MANAGER").filter(|s| !s.is_empty()).unwrap_or(d.field_manager),
            watch_queue_cap: lookup("ROLLWATCH_WATCH_QUEUE_CAP").and_then(|s| s.parse().ok()).unwrap_or(d.watch_queue_cap),
        }
    }
}

/// Remote mutation and change-notification interface for one kind of target:
/// rollouts addressed by `(namespace, name)`.
#[async_trait::async_trait]
pub trait RolloutOps: Send + Sync {
    /// Create or update an arbitrary declarative object; returns a human-readable result line.
    async fn apply_manifest(&self, namespace: &str, manifest: &[u8]) -> Result<String>;
    /// Set `image` on containers matching `container` (`*` for all) in the pod template.
    async fn set_image(&self, target: &RolloutRef, container: &str, image: &str) -> Result<()>;
    async fn promote(&self, target: &RolloutRef, mode: PromoteMode) -> Result<()>;
    async fn abort(&self, target: &RolloutRef) -> Result<()>;
    async fn retry(&self, target: &RolloutRef) -> Result<()>;
    async fn restart(&self, target: &RolloutRef) -> Result<()>;
    async fn delete(&self, target: &RolloutRef) -> Result<()>;
    /// Current object as stored by the server.
    async fn get(&self, target: &RolloutRef) -> Result<Json>;
    /// Open a watch filtered server-side by `cfg`.
    async fn watch(&self, cfg: &SubscriptionConfig) -> Result<Subscription>;
}

/// Default implementation on top of kube-rs.
pub struct KubeRolloutOps {
    client: Client,
    config: OpsConfig,
}

impl KubeRolloutOps {
    pub fn new(client: Client, config: OpsConfig) -> Self {
        Self { client, config }
    }

    pub async fn try_default() -> Result<Self> {
        let client = rollwatch_kubehub::get_kube_client().await?;
        Ok(Self::new(client, OpsConfig::from_env()))
    }

    fn api(&self, target: &RolloutRef) -> kube::Api<DynamicObject> {
        rollwatch_kubehub::rollout_api(self.client.clone(), &target.namespace)
    }

    async fn fetch(&self, target: &RolloutRef) -> Result<Rollout> {
        let obj = self.get(target).await?;
        Rollout::from_object(&obj).with_context(|| format!("decoding rollout {}", target))
    }

    async fn send_patch(&self, target: &RolloutRef, p: &LifecyclePatch) -> Result<()> {
        let api = self.api(target);
        let pp = PatchParams::default();
        if let Some(spec) = &p.spec {
            debug!(rollout = %target, patch = %spec, "patching spec");
            api.patch(&target.name, &pp, &Patch::Merge(spec))
                .await
                .with_context(|| format!("patching rollout {}", target))?;
        }
        if let Some(status) = &p.status {
            debug!(rollout = %target, patch = %status, "patching status");
            api.patch_status(&target.name, &pp, &Patch::Merge(status))
                .await
                .with_context(|| format!("patching rollout {} status", target))?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl RolloutOps for KubeRolloutOps {
    async fn apply_manifest(&self, namespace: &str, manifest: &[u8]) -> Result<String> {
        let outcome =
            rollwatch_apply::apply_manifest(self.client.clone(), manifest, Some(namespace), &self.config.field_manager).await?;
        Ok(outcome.to_string())
    }

    async fn set_image(&self, target: &RolloutRef, container: &str, image: &str) -> Result<()> {
        let api = self.api(target);
        let current = api.get(&target.name).await.with_context(|| format!("getting rollout {}", target))?;
        let mut raw = serde_json::to_value(&current)?;
        let n = patch::set_image_in_template(&mut raw, container, image)?;
        let updated: DynamicObject = serde_json::from_value(raw).context("rebuilding rollout after image change")?;
        api.replace(&target.name, &PostParams::default(), &updated)
            .await
            .with_context(|| format!("updating rollout {}", target))?;
        info!(rollout = %target, containers = n, image = %image, "image set");
        Ok(())
    }

    async fn promote(&self, target: &RolloutRef, mode: PromoteMode) -> Result<()> {
        let ro = self.fetch(target).await?;
        let p = patch::promote_patch(&ro, mode)?;
        if p.is_empty() {
            debug!(rollout = %target, ?mode, "rollout not paused; nothing to promote");
            return Ok(());
        }
        self.send_patch(target, &p).await
    }

    async fn abort(&self, target: &RolloutRef) -> Result<()> {
        self.send_patch(target, &patch::abort_patch()).await
    }

    async fn retry(&self, target: &RolloutRef) -> Result<()> {
        self.send_patch(target, &patch::retry_patch()).await
    }

    async fn restart(&self, target: &RolloutRef) -> Result<()> {
        self.send_patch(target, &patch::restart_patch(chrono::Utc::now())).await
    }

    async fn delete(&self, target: &RolloutRef) -> Result<()> {
        let _ = self
            .api(target)
            .delete(&target.name, &DeleteParams::default())
            .await
            .with_context(|| format!("deleting rollout {}", target))?;
        Ok(())
    }

    async fn get(&self, target: &RolloutRef) -> Result<Json> {
        let obj = self
            .api(target)
            .get_opt(&target.name)
            .await
            .with_context(|| format!("getting rollout {}", target))?
            .ok_or_else(|| anyhow!("rollout {} not found", target))?;
        Ok(serde_json::to_value(obj)?)
    }

    async fn watch(&self, cfg: &SubscriptionConfig) -> Result<Subscription> {
        rollwatch_kubehub::subscribe_rollouts(self.client.clone(), cfg, self.config.watch_queue_cap).await
    }
}
