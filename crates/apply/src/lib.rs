//! Rollwatch apply: decode one manifest and submit it with server-side apply.

#![forbid(unsafe_code)]

use std::fmt;

use anyhow::{anyhow, Context, Result};
use kube::{api::{Api, Patch, PatchParams}, core::{DynamicObject, GroupVersionKind}, Client};
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tracing::debug;

fn max_manifest_bytes() -> usize {
    std::env::var("ROLLWATCH_MAX_MANIFEST_BYTES")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(1_000_000) // 1 MiB default
}

fn max_manifest_nodes() -> usize {
    std::env::var("ROLLWATCH_MAX_MANIFEST_NODES")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(100_000)
}

fn json_node_budget_exceeded(v: &Json, max: usize) -> bool {
    fn walk(v: &Json, cur: &mut usize, max: usize) {
        if *cur >= max { return; }
        *cur += 1;
        match v {
            Json::Object(map) => {
                for (_k, vv) in map.iter() {
                    if *cur >= max { break; }
                    walk(vv, cur, max);
                }
            }
            Json::Array(arr) => {
                for vv in arr.iter() {
                    if *cur >= max { break; }
                    walk(vv, cur, max);
                }
            }
            _ => {}
        }
    }
    let mut count = 0usize;
    walk(v, &mut count, max);
    count >= max
}

/// A decoded manifest ready for submission.
#[derive(Debug, Clone)]
pub struct ManifestTarget {
    pub json: Json,
    pub gvk: GroupVersionKind,
    pub name: String,
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub kind: String,
    pub name: String,
    pub namespace: Option<String>,
    pub resource_version: Option<String>,
}

impl fmt::Display for ApplyOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {}/{} serverside-applied", self.kind, ns, self.name)?,
            None => write!(f, "{} {} serverside-applied", self.kind, self.name)?,
        }
        if let Some(rv) = &self.resource_version {
            write!(f, " (resourceVersion {})", rv)?;
        }
        Ok(())
    }
}

/// Decode a JSON or YAML manifest. `ns_default` fills in `metadata.namespace`
/// when the manifest leaves it out.
pub fn parse_manifest(bytes: &[u8], ns_default: Option<&str>) -> Result<ManifestTarget> {
    if bytes.len() > max_manifest_bytes() {
        return Err(anyhow!("manifest too large (>{} bytes)", max_manifest_bytes()));
    }
    // YAML is a superset of JSON, one decoder covers both encodings
    let val: serde_yaml::Value = serde_yaml::from_slice(bytes).context("parsing manifest")?;
    let mut json = serde_json::to_value(val).context("converting manifest to JSON")?;
    if json_node_budget_exceeded(&json, max_manifest_nodes()) {
        return Err(anyhow!("manifest too complex (>{} nodes)", max_manifest_nodes()));
    }
    let api_version = json.get("apiVersion").and_then(|v| v.as_str()).ok_or_else(|| anyhow!("manifest missing apiVersion"))?.to_string();
    let kind = json.get("kind").and_then(|v| v.as_str()).ok_or_else(|| anyhow!("manifest missing kind"))?.to_string();
    let (group, version) = match api_version.split_once('/') {
        Some((g, v)) => (g.to_string(), v.to_string()),
        None => (String::new(), api_version),
    };
    let name = json.get("metadata").and_then(|m| m.get("name")).and_then(|v| v.as_str()).ok_or_else(|| anyhow!("manifest missing metadata.name"))?.to_string();
    let namespace = json
        .get("metadata")
        .and_then(|m| m.get("namespace"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .or_else(|| ns_default.map(|s| s.to_string()));
    strip_server_fields(&mut json);
    Ok(ManifestTarget { json, gvk: GroupVersionKind { group, version, kind }, name, namespace })
}

/// Server-populated fields are rejected or meaningless in an apply patch.
fn strip_server_fields(v: &mut Json) {
    if let Some(meta) = v.get_mut("metadata").and_then(|m| m.as_object_mut()) {
        meta.remove("managedFields");
        meta.remove("resourceVersion");
        meta.remove("uid");
        meta.remove("generation");
        meta.remove("creationTimestamp");
    }
    if let Some(obj) = v.as_object_mut() { obj.remove("status"); }
}

fn set_namespace(v: &mut Json, ns: &str) {
    if let Some(meta) = v.get_mut("metadata").and_then(|m| m.as_object_mut()) {
        meta.insert("namespace".into(), Json::String(ns.to_string()));
    }
}

/// Server-side apply one manifest. Cluster-scoped kinds ignore the namespace.
pub async fn apply_manifest(client: Client, bytes: &[u8], ns_default: Option<&str>, field_manager: &str) -> Result<ApplyOutcome> {
    let t0 = std::time::Instant::now();
    counter!("rollout_apply_attempts", 1u64);
    let mut target = parse_manifest(bytes, ns_default)?;
    let (ar, namespaced) = rollwatch_kubehub::find_api_resource(client.clone(), &target.gvk).await?;
    let api: Api<DynamicObject> = if namespaced {
        match target.namespace.as_deref() {
            Some(n) => {
                set_namespace(&mut target.json, n);
                Api::namespaced_with(client, n, &ar)
            }
            None => return Err(anyhow!("namespace required for namespaced kind {}", target.gvk.kind)),
        }
    } else {
        target.namespace = None;
        Api::all_with(client, &ar)
    };
    debug!(kind = %target.gvk.kind, name = %target.name, ns = ?target.namespace, "server-side apply");
    let pp = PatchParams::apply(field_manager).force();
    let obj = match api.patch(&target.name, &pp, &Patch::Apply(&target.json)).await {
        Ok(o) => o,
        Err(e) => {
            counter!("rollout_apply_err", 1u64);
            return Err(anyhow!("server-side apply of {} {} failed: {}", target.gvk.kind, target.name, e));
        }
    };
    histogram!("rollout_apply_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
    counter!("rollout_apply_ok", 1u64);
    Ok(ApplyOutcome {
        kind: target.gvk.kind,
        name: target.name,
        namespace: target.namespace,
        resource_version: obj.metadata.resource_version,
    })
}
