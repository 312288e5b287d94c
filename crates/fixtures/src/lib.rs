//! Rollwatch fixtures: a Given/When/Then session for driving a progressive
//! rollout through its lifecycle and waiting on its observed state.
//!
//! ```no_run
//! # async fn demo(ops: std::sync::Arc<dyn rollwatch_ops::RolloutOps>) -> rollwatch_fixtures::Result<()> {
//! use rollwatch_fixtures::Common;
//!
//! Common::from_env(ops)
//!     .given()
//!     .rollout_objects(include_str!("../../../demos/canary.yaml"))?
//!     .when()
//!     .apply_manifests().await?
//!     .wait_for_rollout_status("Paused").await?
//!     .promote_rollout().await?
//!     .wait_for_rollout_status("Healthy").await?
//!     .then()
//!     .expect_canary_step_index(2).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

use std::str::FromStr;

pub mod common;
pub mod config;
pub mod error;
pub mod given;
pub mod predicates;
pub mod then;
pub mod wait;
pub mod when;

pub use common::{BoundRollout, Common};
pub use config::FixtureConfig;
pub use error::{FixtureError, Result};
pub use given::Given;
pub use then::Then;
pub use wait::{await_rollout, WaitOutcome};
pub use when::When;

/// Install a fmt subscriber filtered by `ROLLWATCH_LOG` (default `info`).
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    let env = std::env::var("ROLLWATCH_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_test_writer().try_init();
}
