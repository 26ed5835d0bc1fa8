//! ---
//! warden_section: "07-resilience-fault-tolerance"
//! warden_subsection: "module"
//! warden_type: "source"
//! warden_scope: "code"
//! warden_description: "Recovery, escalation, and autonomy engine."
//! warden_version: "v0.0.0-prealpha"
//! warden_owner: "tbd"
//! ---
//! Health observations fed into each detection cycle.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Result of one named check against a service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub passed: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub latency: Option<Duration>,
}

impl CheckResult {
    pub fn pass() -> Self {
        Self {
            passed: true,
            message: None,
            latency: None,
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            passed: false,
            message: Some(message.into()),
            latency: None,
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }
}

/// Aggregated health of a single service for one detection cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub healthy: bool,
    #[serde(default)]
    pub checks: IndexMap<String, CheckResult>,
    pub timestamp: DateTime<Utc>,
}

impl HealthStatus {
    pub fn healthy(timestamp: DateTime<Utc>) -> Self {
        Self {
            healthy: true,
            checks: IndexMap::new(),
            timestamp,
        }
    }

    pub fn unhealthy(timestamp: DateTime<Utc>) -> Self {
        Self {
            healthy: false,
            checks: IndexMap::new(),
            timestamp,
        }
    }

    /// Attach a check result. A failing check marks the whole status unhealthy.
    pub fn with_check(mut self, name: impl Into<String>, result: CheckResult) -> Self {
        if !result.passed {
            self.healthy = false;
        }
        self.checks.insert(name.into(), result);
        self
    }

    /// Names of the checks that did not pass.
    pub fn failing_checks(&self) -> impl Iterator<Item = &str> {
        self.checks
            .iter()
            .filter(|(_, result)| !result.passed)
            .map(|(name, _)| name.as_str())
    }
}

/// External health collector polled by the detection loop once per cycle.
#[async_trait]
pub trait HealthSource: Send + Sync {
    async fn collect(&self) -> Result<IndexMap<String, HealthStatus>>;
}
