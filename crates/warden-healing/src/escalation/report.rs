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

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::notify::EventDetails;
use crate::tracker::{RecoveryAttempt, ServiceFailureTracker, ServiceStatus};

/// Structured incident attached to a manual-intervention alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentReport {
    pub service: String,
    pub reason: String,
    pub generated_at: DateTime<Utc>,
    pub current_status: ServiceStatus,
    pub failure_count: u64,
    pub consecutive_failures: u32,
    pub first_failure: DateTime<Utc>,
    pub last_failure: DateTime<Utc>,
    pub last_recovery_attempt: Option<DateTime<Utc>>,
    pub total_attempts: usize,
    pub successful_attempts: usize,
    pub recovery_attempts: Vec<RecoveryAttempt>,
}

impl IncidentReport {
    pub fn from_tracker(
        tracker: &ServiceFailureTracker,
        reason: impl Into<String>,
        generated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            service: tracker.service().to_owned(),
            reason: reason.into(),
            generated_at,
            current_status: tracker.current_status,
            failure_count: tracker.failure_count,
            consecutive_failures: tracker.consecutive_failures,
            first_failure: tracker.first_failure,
            last_failure: tracker.last_failure,
            last_recovery_attempt: tracker.last_recovery_attempt,
            total_attempts: tracker.total_attempts,
            successful_attempts: tracker.successful_attempts,
            recovery_attempts: tracker.recent_attempts().cloned().collect(),
        }
    }

    pub fn failing_for(&self) -> Duration {
        warden_common::time::elapsed_since(self.generated_at, self.first_failure)
    }

    /// Render as an event payload for `log_event`.
    pub fn to_details(&self) -> EventDetails {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => {
                let mut details = EventDetails::new();
                details.insert("service".into(), Value::String(self.service.clone()));
                details.insert("reason".into(), Value::String(self.reason.clone()));
                details
            }
        }
    }

    /// Human-readable alert body with the JSON report appended.
    pub fn render(&self) -> String {
        let body = serde_json::to_string_pretty(self).unwrap_or_else(|_| self.reason.clone());
        format!(
            "Manual intervention required for service {}: {}\n{}",
            self.service, self.reason, body
        )
    }
}
