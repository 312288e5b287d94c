//! Rollwatch kubehub: kube client, rollout api wiring and filtered watches.

#![forbid(unsafe_code)]

use anyhow::{anyhow, Context, Result};
use futures::{Stream, StreamExt};
use kube::{
    api::{Api, WatchEvent, WatchParams},
    core::{ApiResource, DynamicObject, GroupVersionKind},
    discovery::{Discovery, Scope},
    Client,
};
use rollwatch_core::{
    CancelHandle, Notification, Subscription, SubscriptionConfig, WatchEventKind, ROLLOUT_GROUP, ROLLOUT_KIND,
    ROLLOUT_PLURAL, ROLLOUT_VERSION,
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Build a client from the ambient kubeconfig / in-cluster environment.
pub async fn get_kube_client() -> Result<Client> {
    Client::try_default().await.context("building kube client from default config")
}

/// Static API resource for `argoproj.io/v1alpha1` Rollouts; no discovery round-trip.
pub fn rollout_resource() -> ApiResource {
    let gvk = GroupVersionKind::gvk(ROLLOUT_GROUP, ROLLOUT_VERSION, ROLLOUT_KIND);
    ApiResource::from_gvk_with_plural(&gvk, ROLLOUT_PLURAL)
}

pub fn rollout_api(client: Client, namespace: &str) -> Api<DynamicObject> {
    Api::namespaced_with(client, namespace, &rollout_resource())
}

/// Resolve an arbitrary GVK through discovery. Returns the resource and whether it is namespaced.
pub async fn find_api_resource(client: Client, gvk: &GroupVersionKind) -> Result<(ApiResource, bool)> {
    let discovery = Discovery::new(client).run().await.context("running api discovery")?;
    for group in discovery.groups() {
        for (ar, caps) in group.recommended_resources() {
            if ar.group == gvk.group && ar.version == gvk.version && ar.kind == gvk.kind {
                let namespaced = matches!(caps.scope, Scope::Namespaced);
                return Ok((ar.clone(), namespaced));
            }
        }
    }
    Err(anyhow!("GVK not found: {}/{}/{}", gvk.group, gvk.version, gvk.kind))
}

/// Open a rollout watch filtered server-side by `cfg` and pump its events into a
/// bounded channel until the returned subscription is stopped.
pub async fn subscribe_rollouts(client: Client, cfg: &SubscriptionConfig, queue_cap: usize) -> Result<Subscription> {
    let api = rollout_api(client, &cfg.namespace);
    let wp = watch_params(cfg);
    let stream = api
        .watch(&wp, "0")
        .await
        .with_context(|| format!("watching rollouts in {} ({})", cfg.namespace, cfg.field_selector))?;
    let (tx, rx) = mpsc::channel::<Notification>(queue_cap.max(1));
    let (cancel, cancel_rx) = CancelHandle::pair();
    let ctx = format!("{}:{}", cfg.namespace, cfg.field_selector);
    info!(ns = %cfg.namespace, selector = %cfg.field_selector, "rollout watch started");
    metrics::counter!("rollout_watches_total", 1u64);
    tokio::spawn(pump_watch_events(stream, tx, cancel_rx, ctx));
    Ok(Subscription::new(rx, cancel))
}

/// Field-selected watch without bookmarks; only real object states are delivered.
pub fn watch_params(cfg: &SubscriptionConfig) -> WatchParams {
    WatchParams::default().fields(&cfg.field_selector).disable_bookmarks()
}

fn notification_from(ev: WatchEvent<DynamicObject>) -> Result<Notification> {
    let n = match ev {
        WatchEvent::Added(o) => Notification::new(WatchEventKind::Added, serde_json::to_value(o)?),
        WatchEvent::Modified(o) => Notification::new(WatchEventKind::Modified, serde_json::to_value(o)?),
        WatchEvent::Deleted(o) => Notification::new(WatchEventKind::Deleted, serde_json::to_value(o)?),
        WatchEvent::Bookmark(b) => Notification::new(
            WatchEventKind::Bookmark,
            serde_json::json!({
                "apiVersion": b.types.api_version,
                "kind": b.types.kind,
                "metadata": { "resourceVersion": b.metadata.resource_version },
            }),
        ),
        WatchEvent::Error(e) => Notification::new(
            WatchEventKind::Error,
            serde_json::json!({
                "apiVersion": "v1",
                "kind": "Status",
                "status": e.status,
                "message": e.message,
                "reason": e.reason,
                "code": e.code,
            }),
        ),
    };
    Ok(n)
}

/// Forward watch events in arrival order until cancelled, the consumer goes
/// away, or the server ends the watch. Transport errors are forwarded as a
/// `Status` notification before the pump exits.
async fn pump_watch_events<S>(stream: S, tx: mpsc::Sender<Notification>, mut cancel_rx: oneshot::Receiver<()>, ctx: String)
where
    S: Stream<Item = kube::Result<WatchEvent<DynamicObject>>>,
{
    let stream = stream.fuse();
    futures::pin_mut!(stream);
    loop {
        tokio::select! {
            _ = &mut cancel_rx => { debug!(ctx = %ctx, "rollout watch cancelled"); break; }
            next = stream.next() => {
                match next {
                    Some(Ok(ev)) => {
                        let n = match notification_from(ev) {
                            Ok(n) => n,
                            Err(e) => { warn!(ctx = %ctx, error = %e, "dropping unserializable watch event"); continue; }
                        };
                        if tx.send(n).await.is_err() { break; }
                    }
                    Some(Err(e)) => {
                        warn!(ctx = %ctx, error = %e, "rollout watch stream error");
                        let status = serde_json::json!({ "apiVersion": "v1", "kind": "Status", "status": "Failure", "message": e.to_string() });
                        let _ = tx.send(Notification::new(WatchEventKind::Error, status)).await;
                        break;
                    }
                    None => { debug!(ctx = %ctx, "rollout watch ended by server"); break; }
                }
            }
        }
    }
    info!(ctx = %ctx, "rollout watch stopped");
}
