//! Then: one-shot assertions against the live rollout.

#![forbid(unsafe_code)]

use rollwatch_core::Rollout;
use tracing::{error, info};

use crate::{
    common::Common,
    error::{FixtureError, Result},
    given::Given,
    predicates,
    when::{remote, When},
};

pub struct Then {
    common: Common,
}

fn failed(msg: String) -> FixtureError {
    error!(error = %msg, "expectation failed");
    FixtureError::Expectation(msg)
}

impl Then {
    pub fn new(common: Common) -> Self {
        Self { common }
    }

    /// Fetch the rollout once and require `predicate` to hold for it.
    pub async fn expect_rollout<F>(self, description: &str, predicate: F) -> Result<Self>
    where
        F: FnOnce(&Rollout) -> bool,
    {
        let target = self.common.bound("expect")?;
        let obj = self.common.ops.get(&target).await.map_err(|e| remote("get", &target, e))?;
        let ro = Rollout::from_object(&obj).map_err(|e| failed(format!("{description}: {e}")))?;
        if !predicate(&ro) {
            return Err(failed(format!(
                "{description} (rollout {target} is {}, step {:?})",
                ro.phase(),
                ro.status.current_step_index
            )));
        }
        info!(rollout = %target, "Expectation '{}' holds", description);
        Ok(self)
    }

    pub async fn expect_rollout_status(self, status: &str) -> Result<Self> {
        let description = predicates::status_condition(status);
        self.expect_rollout(&description, predicates::status_is(status)).await
    }

    pub async fn expect_canary_step_index(self, index: i32) -> Result<Self> {
        let description = predicates::step_index_condition(index);
        self.expect_rollout(&description, predicates::canary_step_index_is(index)).await
    }

    pub fn when(self) -> When {
        When::new(self.common)
    }

    pub fn given(self) -> Given {
        Given::new(self.common)
    }

    pub fn common(&self) -> &Common {
        &self.common
    }
}
