//! Given: declare the rollout under test and any objects it depends on.

#![forbid(unsafe_code)]

use serde::Deserialize;
use serde_json::Value as Json;
use tracing::{debug, error};

use rollwatch_core::{RolloutRef, ROLLOUT_GROUP, ROLLOUT_KIND};

use crate::{
    common::{BoundRollout, Common},
    error::{FixtureError, Result},
    then::Then,
    when::When,
};

pub struct Given {
    common: Common,
}

fn manifest_error(msg: String) -> FixtureError {
    error!(error = %msg, "invalid manifest");
    FixtureError::Manifest(msg)
}

fn is_rollout(v: &Json) -> bool {
    let group = v.get("apiVersion").and_then(Json::as_str).and_then(|s| s.split_once('/')).map(|(g, _)| g);
    let kind = v.get("kind").and_then(Json::as_str);
    group == Some(ROLLOUT_GROUP) && kind == Some(ROLLOUT_KIND)
}

impl Given {
    pub fn new(common: Common) -> Self {
        Self { common }
    }

    /// Load a multi-document YAML string. The one Rollout document becomes the
    /// bound rollout; every other document is applied alongside it.
    pub fn rollout_objects(mut self, yaml: &str) -> Result<Self> {
        for doc in serde_yaml::Deserializer::from_str(yaml) {
            let v = Json::deserialize(doc).map_err(|e| manifest_error(format!("decoding yaml: {e}")))?;
            if v.is_null() {
                continue;
            }
            self = if is_rollout(&v) { self.rollout(v)? } else { self.object(v)? };
        }
        if self.common.rollout.is_none() {
            debug!("no Rollout document in objects");
        }
        Ok(self)
    }

    /// Bind `value` as the rollout to create.
    pub fn rollout(mut self, mut value: Json) -> Result<Self> {
        if let Some(existing) = &self.common.rollout {
            return Err(manifest_error(format!("rollout {} already set", existing.id)));
        }
        let (name, namespace) = self.stamp_namespace(&mut value)?;
        let id = RolloutRef::new(namespace, name);
        debug!(rollout = %id, "rollout declared");
        self.common.rollout = Some(BoundRollout { id, manifest: Some(value) });
        Ok(self)
    }

    /// Add an auxiliary object (service, config map, analysis template, ...).
    pub fn object(mut self, mut value: Json) -> Result<Self> {
        let (name, namespace) = self.stamp_namespace(&mut value)?;
        debug!(kind = value.get("kind").and_then(Json::as_str).unwrap_or(""), %namespace, %name, "object declared");
        self.common.objects.push(value);
        Ok(self)
    }

    /// Act on a rollout that already exists in the session namespace.
    pub fn attach(mut self, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(manifest_error("rollout name is empty".to_string()));
        }
        if let Some(existing) = &self.common.rollout {
            return Err(manifest_error(format!("rollout {} already set", existing.id)));
        }
        let id = RolloutRef::new(self.common.config.namespace.clone(), name);
        debug!(rollout = %id, "attached to existing rollout");
        self.common.rollout = Some(BoundRollout { id, manifest: None });
        Ok(self)
    }

    pub fn when(self) -> When {
        When::new(self.common)
    }

    pub fn then(self) -> Then {
        Then::new(self.common)
    }

    pub fn common(&self) -> &Common {
        &self.common
    }

    /// Default `metadata.namespace` to the session namespace; returns `(name, namespace)`.
    fn stamp_namespace(&self, value: &mut Json) -> Result<(String, String)> {
        let Some(meta) = value.get_mut("metadata").and_then(Json::as_object_mut) else {
            return Err(manifest_error("object has no metadata".to_string()));
        };
        let name = match meta.get("name").and_then(Json::as_str) {
            Some(n) if !n.is_empty() => n.to_string(),
            _ => return Err(manifest_error("object has no metadata.name".to_string())),
        };
        let namespace = match meta.get("namespace").and_then(Json::as_str) {
            Some(ns) if !ns.is_empty() => ns.to_string(),
            _ => {
                let ns = self.common.config.namespace.clone();
                meta.insert("namespace".to_string(), Json::String(ns.clone()));
                ns
            }
        };
        Ok((name, namespace))
    }
}
