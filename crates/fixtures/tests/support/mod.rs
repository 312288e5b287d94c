#![allow(dead_code)]

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use anyhow::anyhow;
use rollwatch_core::{CancelHandle, Notification, RolloutRef, Subscription, SubscriptionConfig, WatchEventKind};
use rollwatch_fixtures::{Common, FixtureConfig};
use rollwatch_ops::{PromoteMode, RolloutOps};
use serde_json::{json, Value as Json};
use tokio::sync::mpsc;

pub const NS: &str = "e2e";
pub const NAME: &str = "canary-demo";

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Apply { namespace: String, kind: String, name: String },
    SetImage { target: RolloutRef, container: String, image: String },
    Promote { target: RolloutRef, mode: PromoteMode },
    Abort(RolloutRef),
    Retry(RolloutRef),
    Restart(RolloutRef),
    Delete(RolloutRef),
    Get(RolloutRef),
    Watch(SubscriptionConfig),
}

/// Notifications a single `watch` call will deliver, each after its delay.
#[derive(Debug, Clone, Default)]
pub struct WatchScript {
    pub steps: Vec<(Duration, Notification)>,
    /// Close the stream after the last step instead of idling.
    pub close: bool,
}

impl WatchScript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(mut self, delay: Duration, n: Notification) -> Self {
        self.steps.push((delay, n));
        self
    }

    pub fn closed(mut self) -> Self {
        self.close = true;
        self
    }
}

/// What the producer side of a scripted watch observed.
#[derive(Debug, Clone, Default)]
pub struct WatchProbe {
    pub cancelled: Arc<AtomicBool>,
    pub delivered: Arc<AtomicUsize>,
}

impl WatchProbe {
    pub fn cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn delivered(&self) -> usize {
        self.delivered.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct State {
    calls: Vec<Call>,
    failures: HashMap<&'static str, String>,
    fail_apply_at: Option<usize>,
    applies: usize,
    scripts: VecDeque<WatchScript>,
    probes: Vec<WatchProbe>,
    live: Option<Json>,
}

/// In-memory `RolloutOps` recording every call.
#[derive(Default)]
pub struct FakeOps {
    state: Mutex<State>,
}

impl FakeOps {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every call of `action` fail with `msg`. Actions: apply, set_image,
    /// promote, abort, retry, restart, delete, get, watch.
    pub fn fail(&self, action: &'static str, msg: &str) {
        self.state.lock().unwrap().failures.insert(action, msg.to_string());
    }

    /// Fail the apply with this zero-based index.
    pub fn fail_apply_at(&self, index: usize, msg: &str) {
        let mut st = self.state.lock().unwrap();
        st.fail_apply_at = Some(index);
        st.failures.insert("apply_at", msg.to_string());
    }

    pub fn script_watch(&self, script: WatchScript) {
        self.state.lock().unwrap().scripts.push_back(script);
    }

    pub fn set_live(&self, obj: Json) {
        self.state.lock().unwrap().live = Some(obj);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn probes(&self) -> Vec<WatchProbe> {
        self.state.lock().unwrap().probes.clone()
    }

    fn record(&self, call: Call, action: &'static str) -> anyhow::Result<()> {
        let mut st = self.state.lock().unwrap();
        st.calls.push(call);
        match st.failures.get(action) {
            Some(msg) => Err(anyhow!(msg.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl RolloutOps for FakeOps {
    async fn apply_manifest(&self, namespace: &str, manifest: &[u8]) -> anyhow::Result<String> {
        let obj: Json = serde_json::from_slice(manifest)?;
        let kind = obj["kind"].as_str().unwrap_or_default().to_string();
        let name = obj["metadata"]["name"].as_str().unwrap_or_default().to_string();
        self.record(Call::Apply { namespace: namespace.to_string(), kind: kind.clone(), name: name.clone() }, "apply")?;
        let mut st = self.state.lock().unwrap();
        let index = st.applies;
        st.applies += 1;
        if st.fail_apply_at == Some(index) {
            let msg = st.failures.get("apply_at").cloned().unwrap_or_default();
            return Err(anyhow!(msg));
        }
        Ok(format!("{kind} {namespace}/{name} serverside-applied"))
    }

    async fn set_image(&self, target: &RolloutRef, container: &str, image: &str) -> anyhow::Result<()> {
        self.record(
            Call::SetImage { target: target.clone(), container: container.to_string(), image: image.to_string() },
            "set_image",
        )
    }

    async fn promote(&self, target: &RolloutRef, mode: PromoteMode) -> anyhow::Result<()> {
        self.record(Call::Promote { target: target.clone(), mode }, "promote")
    }

    async fn abort(&self, target: &RolloutRef) -> anyhow::Result<()> {
        self.record(Call::Abort(target.clone()), "abort")
    }

    async fn retry(&self, target: &RolloutRef) -> anyhow::Result<()> {
        self.record(Call::Retry(target.clone()), "retry")
    }

    async fn restart(&self, target: &RolloutRef) -> anyhow::Result<()> {
        self.record(Call::Restart(target.clone()), "restart")
    }

    async fn delete(&self, target: &RolloutRef) -> anyhow::Result<()> {
        self.record(Call::Delete(target.clone()), "delete")
    }

    async fn get(&self, target: &RolloutRef) -> anyhow::Result<Json> {
        self.record(Call::Get(target.clone()), "get")?;
        self.state.lock().unwrap().live.clone().ok_or_else(|| anyhow!("rollout {} not found", target))
    }

    async fn watch(&self, cfg: &SubscriptionConfig) -> anyhow::Result<Subscription> {
        self.record(Call::Watch(cfg.clone()), "watch")?;
        let script = self.state.lock().unwrap().scripts.pop_front().unwrap_or_default();
        let probe = WatchProbe::default();
        self.state.lock().unwrap().probes.push(probe.clone());

        let (tx, rx) = mpsc::channel(16);
        let (cancel, mut cancel_rx) = CancelHandle::pair();
        tokio::spawn(async move {
            for (delay, n) in script.steps {
                tokio::select! {
                    _ = &mut cancel_rx => {
                        probe.cancelled.store(true, Ordering::SeqCst);
                        return;
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
                if tx.send(n).await.is_err() {
                    probe.cancelled.store(true, Ordering::SeqCst);
                    return;
                }
                probe.delivered.fetch_add(1, Ordering::SeqCst);
            }
            if script.close {
                return;
            }
            let _ = cancel_rx.await;
            probe.cancelled.store(true, Ordering::SeqCst);
        });
        Ok(Subscription::new(rx, cancel))
    }
}

pub fn session(ops: Arc<FakeOps>) -> Common {
    rollwatch_fixtures::init_tracing();
    Common::new(ops, FixtureConfig::default().with_namespace(NS).with_default_timeout(Duration::from_secs(30)))
}

pub fn target() -> RolloutRef {
    RolloutRef::new(NS, NAME)
}

pub fn rollout_manifest() -> Json {
    json!({
        "apiVersion": "argoproj.io/v1alpha1",
        "kind": "Rollout",
        "metadata": { "name": NAME },
        "spec": {
            "replicas": 1,
            "strategy": { "canary": { "steps": [ { "setWeight": 50 }, { "pause": {} }, { "setWeight": 100 } ] } },
            "template": { "spec": { "containers": [ { "name": NAME, "image": "argoproj/rollouts-demo:blue" } ] } }
        }
    })
}

pub fn object(kind: &str, name: &str) -> Json {
    json!({ "apiVersion": "v1", "kind": kind, "metadata": { "name": name } })
}

/// Rollout snapshot with the given status block merged over a settled canary.
pub fn snapshot(status: Json, paused: bool) -> Json {
    let mut base = json!({
        "apiVersion": "argoproj.io/v1alpha1",
        "kind": "Rollout",
        "metadata": { "name": NAME, "namespace": NS, "generation": 1 },
        "spec": {
            "replicas": 1,
            "paused": paused,
            "strategy": { "canary": { "steps": [ { "setWeight": 50 }, { "pause": {} }, { "setWeight": 100 } ] } }
        },
        "status": {
            "observedGeneration": "1",
            "currentPodHash": "abc",
            "canary": { "stableRS": "abc" },
            "replicas": 1, "updatedReplicas": 1, "availableReplicas": 1
        }
    });
    if let (Some(dst), Some(src)) = (base["status"].as_object_mut(), status.as_object()) {
        for (k, v) in src {
            dst.insert(k.clone(), v.clone());
        }
    }
    base
}

pub fn modified(object: Json) -> Notification {
    Notification::new(WatchEventKind::Modified, object)
}

pub fn at_step(index: i32) -> Notification {
    modified(snapshot(json!({ "currentStepIndex": index }), false))
}

pub fn without_step() -> Notification {
    modified(snapshot(json!({}), false))
}

pub fn progressing() -> Notification {
    modified(snapshot(json!({ "canary": { "stableRS": "old" } }), false))
}

pub fn paused() -> Notification {
    modified(snapshot(json!({ "currentStepIndex": 1 }), true))
}

pub fn healthy() -> Notification {
    modified(snapshot(json!({ "currentStepIndex": 3 }), false))
}

pub fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

pub fn expect_err<T>(res: rollwatch_fixtures::Result<T>) -> rollwatch_fixtures::FixtureError {
    match res {
        Ok(_) => panic!("expected the step to fail"),
        Err(e) => e,
    }
}

/// Let spawned producers observe cancellation.
pub async fn settle() {
    tokio::time::sleep(ms(50)).await;
}
