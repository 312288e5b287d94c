//! Condition wait: race a predicate over a single-rollout watch against a deadline.
//!
//! One call opens exactly one subscription and starts exactly one timer task.
//! Both are released before the call returns, whatever the outcome. The
//! engine never re-subscribes; callers wanting another attempt call again.

#![forbid(unsafe_code)]

use std::time::Duration;

use rollwatch_core::{Rollout, RolloutRef, SnapshotError, Subscription, SubscriptionConfig, WatchEventKind};
use rollwatch_ops::RolloutOps;
use tokio::{sync::oneshot, task::JoinHandle, time::Instant};
use tracing::{debug, error, trace};

use crate::error::{FixtureError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    ConditionMet { elapsed: Duration },
    TimedOut,
}

/// Timer task that fires a oneshot once `timeout` has passed. Aborted on drop.
struct Deadline {
    fired: oneshot::Receiver<()>,
    timer: JoinHandle<()>,
}

impl Deadline {
    fn start(timeout: Duration) -> Self {
        let (tx, fired) = oneshot::channel();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = tx.send(());
        });
        Self { fired, timer }
    }
}

impl Drop for Deadline {
    fn drop(&mut self) {
        self.timer.abort();
    }
}

/// Subscribe to `target` (server-side name filter) and wait until `predicate`
/// holds for a delivered snapshot or `timeout` elapses.
///
/// Subscription failures, closed streams and non-rollout notifications are
/// errors; a timeout is an outcome for the caller to turn into a failure.
pub async fn await_rollout<F>(
    ops: &dyn RolloutOps,
    target: &RolloutRef,
    condition: &str,
    timeout: Duration,
    predicate: F,
) -> Result<WaitOutcome>
where
    F: Fn(&Rollout) -> bool,
{
    let cfg = SubscriptionConfig::name_equals(target);
    let mut sub = match ops.watch(&cfg).await {
        Ok(s) => s,
        Err(e) => {
            error!(rollout = %target, condition, error = %format!("{e:#}"), "failed to watch rollout");
            return Err(FixtureError::Remote { action: "watch", target: target.to_string(), source: e });
        }
    };
    metrics::counter!("rollout_waits_total", 1u64);
    let res = race(&mut sub, condition, timeout, predicate).await;
    sub.stop();
    match &res {
        Ok(WaitOutcome::ConditionMet { elapsed }) => {
            metrics::histogram!("rollout_wait_ms", elapsed.as_secs_f64() * 1000.0);
        }
        Ok(WaitOutcome::TimedOut) => {
            metrics::counter!("rollout_wait_timeouts_total", 1u64);
        }
        Err(e) => error!(rollout = %target, condition, error = %e, "rollout wait aborted"),
    }
    res
}

/// Evaluate `predicate` on each notification of `sub`, in arrival order, until
/// it holds or the deadline fires. The deadline wins when both are ready.
pub async fn race<F>(sub: &mut Subscription, condition: &str, timeout: Duration, predicate: F) -> Result<WaitOutcome>
where
    F: Fn(&Rollout) -> bool,
{
    let started = Instant::now();
    let mut deadline = Deadline::start(timeout);
    loop {
        tokio::select! {
            biased;
            _ = &mut deadline.fired => {
                debug!(condition, ?timeout, "deadline reached");
                return Ok(WaitOutcome::TimedOut);
            }
            next = sub.next() => {
                let Some(n) = next else {
                    return Err(FixtureError::WatchClosed { condition: condition.to_string() });
                };
                if n.kind == WatchEventKind::Bookmark {
                    return Err(FixtureError::UnexpectedObject { event: n.kind, source: SnapshotError::Bookmark });
                }
                let snapshot = Rollout::from_object(&n.object)
                    .map_err(|source| FixtureError::UnexpectedObject { event: n.kind, source })?;
                trace!(
                    event = ?n.kind,
                    rollout = snapshot.name(),
                    phase = %snapshot.phase(),
                    step = ?snapshot.status.current_step_index,
                    "rollout notification"
                );
                if predicate(&snapshot) {
                    return Ok(WaitOutcome::ConditionMet { elapsed: started.elapsed() });
                }
            }
        }
    }
}
