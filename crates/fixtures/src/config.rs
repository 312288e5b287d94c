#![forbid(unsafe_code)]

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_NAMESPACE: &str = "default";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(90);

/// Session-wide settings shared by Given/When/Then.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixtureConfig {
    /// Namespace every rollout and auxiliary object lives in.
    pub namespace: String,
    /// Deadline used by the status and step-index waits.
    pub default_timeout: Duration,
}

impl Default for FixtureConfig {
    fn default() -> Self {
        Self { namespace: DEFAULT_NAMESPACE.to_string(), default_timeout: DEFAULT_TIMEOUT }
    }
}

impl FixtureConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        Self {
            namespace: lookup("ROLLWATCH_NAMESPACE").filter(|s| !s.is_empty()).unwrap_or(d.namespace),
            default_timeout: lookup("ROLLWATCH_WAIT_TIMEOUT_SECS")
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(d.default_timeout),
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }
}
