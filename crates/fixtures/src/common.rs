#![forbid(unsafe_code)]

use std::sync::Arc;

use rollwatch_core::RolloutRef;
use rollwatch_ops::RolloutOps;
use serde_json::Value as Json;
use tracing::error;

use crate::{
    config::FixtureConfig,
    error::{FixtureError, Result},
    given::Given,
};

/// The rollout a session acts on. Identity never changes once bound.
#[derive(Debug, Clone)]
pub struct BoundRollout {
    pub id: RolloutRef,
    /// Manifest to create; `None` when attached to an existing rollout.
    pub manifest: Option<Json>,
}

/// State threaded through Given, When and Then.
pub struct Common {
    pub(crate) ops: Arc<dyn RolloutOps>,
    pub(crate) config: FixtureConfig,
    pub(crate) rollout: Option<BoundRollout>,
    pub(crate) objects: Vec<Json>,
}

impl Common {
    pub fn new(ops: Arc<dyn RolloutOps>, config: FixtureConfig) -> Self {
        Self { ops, config, rollout: None, objects: Vec::new() }
    }

    pub fn from_env(ops: Arc<dyn RolloutOps>) -> Self {
        Self::new(ops, FixtureConfig::from_env())
    }

    pub fn given(self) -> Given {
        Given::new(self)
    }

    pub fn config(&self) -> &FixtureConfig {
        &self.config
    }

    pub fn rollout(&self) -> Option<&BoundRollout> {
        self.rollout.as_ref()
    }

    /// Auxiliary objects, in the order they will be applied.
    pub fn objects(&self) -> &[Json] {
        &self.objects
    }

    pub(crate) fn bound(&self, action: &'static str) -> Result<RolloutRef> {
        match &self.rollout {
            Some(r) => Ok(r.id.clone()),
            None => {
                error!(action, "Rollout not set");
                Err(FixtureError::RolloutNotSet { action })
            }
        }
    }
}
