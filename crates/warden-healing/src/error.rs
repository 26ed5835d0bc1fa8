//! ---
//! warden_section: "07-resilience-fault-tolerance"
//! warden_subsection: "module"
//! warden_type: "source"
//! warden_scope: "code"
//! warden_description: "Recovery, escalation, and autonomy engine."
//! warden_version: "v0.0.0-prealpha"
//! warden_owner: "tbd"
//! ---
use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, HealingError>;

#[derive(Debug, Error)]
pub enum HealingError {
    #[error("manual intervention required for service {service}: {reason}")]
    ManualInterventionRequired { service: String, reason: String },
    #[error("escalation strategy {strategy} failed for service {service}: {source}")]
    EscalationFailed {
        service: String,
        strategy: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("action {strategy} exceeded its timeout of {timeout:?}")]
    ActionTimedOut { strategy: String, timeout: Duration },
    #[error("notification delivery failed: {0}")]
    Notification(#[source] anyhow::Error),
    #[error("health source failed: {0}")]
    HealthSource(#[source] anyhow::Error),
}

impl HealingError {
    /// Whether the error is the terminal hand-off to a human operator.
    pub fn requires_human(&self) -> bool {
        matches!(self, HealingError::ManualInterventionRequired { .. })
    }
}
