//! Rollwatch core types: rollout identity, watch notifications and subscriptions.

#![forbid(unsafe_code)]

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

pub mod rollout;

pub use rollout::{Rollout, RolloutPhase, SnapshotError};

pub const ROLLOUT_GROUP: &str = "argoproj.io";
pub const ROLLOUT_VERSION: &str = "v1alpha1";
pub const ROLLOUT_KIND: &str = "Rollout";
pub const ROLLOUT_PLURAL: &str = "rollouts";

/// Identity of a single rollout instance: `(namespace, name)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RolloutRef {
    pub namespace: String,
    pub name: String,
}

impl RolloutRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), name: name.into() }
    }
}

impl fmt::Display for RolloutRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Server-side filter for a change-notification subscription.
///
/// Only name equality within one namespace is expressible; the filter is sent
/// to the API server as a field selector and never applied client-side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionConfig {
    pub namespace: String,
    pub field_selector: String,
}

impl SubscriptionConfig {
    pub fn name_equals(target: &RolloutRef) -> Self {
        Self {
            namespace: target.namespace.clone(),
            field_selector: format!("metadata.name={}", target.name),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum WatchEventKind {
    Added,
    Modified,
    Deleted,
    Bookmark,
    Error,
}

/// One event delivered by a watch, with the raw object it carried.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub kind: WatchEventKind,
    pub object: serde_json::Value,
}

impl Notification {
    pub fn new(kind: WatchEventKind, object: serde_json::Value) -> Self {
        Self { kind, object }
    }
}

/// Cancellation handle for a running subscription pump.
#[derive(Debug)]
pub struct CancelHandle {
    tx: Option<oneshot::Sender<()>>,
}

impl CancelHandle {
    /// Create a handle and the receiver the producer side should observe.
    pub fn pair() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// Signal cancellation. Subsequent calls are no-ops.
    pub fn cancel(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(());
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.tx.is_none()
    }
}

/// Receiving end of a filtered watch.
///
/// `stop` is idempotent and also runs on drop, so a subscription never
/// outlives the value that owns it.
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::Receiver<Notification>,
    cancel: CancelHandle,
}

impl Subscription {
    pub fn new(rx: mpsc::Receiver<Notification>, cancel: CancelHandle) -> Self {
        Self { rx, cancel }
    }

    /// Next notification in arrival order; `None` once the producer is gone.
    pub async fn next(&mut self) -> Option<Notification> {
        if self.cancel.is_cancelled() {
            return None;
        }
        self.rx.recv().await
    }

    pub fn stop(&mut self) {
        if !self.cancel.is_cancelled() {
            self.cancel.cancel();
            self.rx.close();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.stop();
    }
}

pub mod prelude {
    pub use super::{
        CancelHandle, Notification, Rollout, RolloutPhase, RolloutRef, SnapshotError, Subscription,
        SubscriptionConfig, WatchEventKind,
    };
}
