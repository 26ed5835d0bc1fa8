//! ---
//! warden_section: "07-resilience-fault-tolerance"
//! warden_subsection: "module"
//! warden_type: "source"
//! warden_scope: "code"
//! warden_description: "Recovery, escalation, and autonomy engine."
//! warden_version: "v0.0.0-prealpha"
//! warden_owner: "tbd"
//! ---
//! Built-in escalation actions: critical-service procedures, cascade
//! containment, and resource reclamation.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::{json, Value};
use tracing::info;

use crate::action::RemediationAction;
use crate::notify::{AlertLevel, EventDetails, NotificationPort};
use crate::tracker::ServiceFailureTracker;

pub const CRITICAL_SERVICE_DOWN: &str = "critical_service_down";
pub const CASCADE_FAILURE: &str = "cascade_failure";
pub const RESOURCE_EXHAUSTION: &str = "resource_exhaustion";

fn steps(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| (*s).to_owned()).collect()
}

/// Log each step as a structured event, in order.
async fn run_steps(
    notifier: &dyn NotificationPort,
    event: &str,
    service: &str,
    steps: &[String],
    extra: &[(&str, Value)],
) -> Result<()> {
    for (index, step) in steps.iter().enumerate() {
        let mut details = EventDetails::new();
        details.insert("service".into(), json!(service));
        details.insert("step".into(), json!(step));
        details.insert("sequence".into(), json!(index + 1));
        for (key, value) in extra {
            details.insert((*key).to_owned(), value.clone());
        }
        info!(
            target: "warden::escalation",
            service,
            event,
            step = %step,
            "executing mitigation step"
        );
        notifier.log_event(event, details).await?;
    }
    Ok(())
}

/// Emergency handling for services on the critical list.
///
/// Services with a dedicated procedure run it; everything else gets the
/// generic fallback procedure.
pub struct CriticalServiceProcedure {
    notifier: Arc<dyn NotificationPort>,
    procedures: IndexMap<String, Vec<String>>,
    fallback: Vec<String>,
}

impl CriticalServiceProcedure {
    pub fn new(notifier: Arc<dyn NotificationPort>) -> Self {
        let mut procedures = IndexMap::new();
        procedures.insert(
            "database".to_owned(),
            steps(&[
                "verify_data_integrity",
                "enable_read_only_mode",
                "promote_replica",
            ]),
        );
        procedures.insert(
            "api-gateway".to_owned(),
            steps(&["enable_maintenance_page", "shed_non_essential_traffic"]),
        );
        Self {
            notifier,
            procedures,
            fallback: steps(&["capture_diagnostics", "page_on_call"]),
        }
    }

    /// Steps that would run for `service`, and whether they are service-specific.
    pub fn procedure_for(&self, service: &str) -> (&[String], bool) {
        match self.procedures.get(service) {
            Some(procedure) => (procedure.as_slice(), true),
            None => (self.fallback.as_slice(), false),
        }
    }
}

#[async_trait]
impl RemediationAction for CriticalServiceProcedure {
    async fn execute(&self, service: &str, tracker: &ServiceFailureTracker) -> Result<()> {
        let (procedure, specific) = self.procedure_for(service);
        self.notifier
            .send_alert(
                AlertLevel::Critical,
                service,
                &format!(
                    "Critical service {} is down after {} recovery attempts; \
                     starting {} emergency procedure",
                    service,
                    tracker.total_attempts,
                    if specific { "dedicated" } else { "generic" },
                ),
            )
            .await?;
        run_steps(
            self.notifier.as_ref(),
            "emergency_procedure_step",
            service,
            procedure,
            &[("procedure", json!(if specific { service } else { "generic" }))],
        )
        .await?;
        self.notifier
            .send_alert(
                AlertLevel::Critical,
                service,
                &format!(
                    "Emergency procedure for {} completed: {}",
                    service,
                    procedure.join(", ")
                ),
            )
            .await?;
        Ok(())
    }
}

/// Containment for a failure that keeps repeating and may spread.
pub struct CascadeContainment {
    notifier: Arc<dyn NotificationPort>,
    steps: Vec<String>,
}

impl CascadeContainment {
    pub fn new(notifier: Arc<dyn NotificationPort>) -> Self {
        Self {
            notifier,
            steps: steps(&["isolate_service", "reroute_traffic", "enable_degraded_mode"]),
        }
    }
}

#[async_trait]
impl RemediationAction for CascadeContainment {
    async fn execute(&self, service: &str, tracker: &ServiceFailureTracker) -> Result<()> {
        self.notifier
            .send_alert(
                AlertLevel::Critical,
                service,
                &format!(
                    "Cascade failure suspected for {} ({} consecutive failures); containing",
                    service, tracker.consecutive_failures
                ),
            )
            .await?;
        run_steps(
            self.notifier.as_ref(),
            "cascade_containment_step",
            service,
            &self.steps,
            &[("consecutive_failures", json!(tracker.consecutive_failures))],
        )
        .await
    }
}

/// Reclamation for a service that has been failing long enough to suggest exhaustion.
pub struct ResourceReclamation {
    notifier: Arc<dyn NotificationPort>,
    steps: Vec<String>,
}

impl ResourceReclamation {
    pub fn new(notifier: Arc<dyn NotificationPort>) -> Self {
        Self {
            notifier,
            steps: steps(&[
                "cleanup_resources",
                "limit_connections",
                "restart_non_critical_services",
            ]),
        }
    }
}

#[async_trait]
impl RemediationAction for ResourceReclamation {
    async fn execute(&self, service: &str, tracker: &ServiceFailureTracker) -> Result<()> {
        let first_failure = tracker.first_failure.to_rfc3339();
        self.notifier
            .send_alert(
                AlertLevel::Warning,
                service,
                &format!(
                    "Possible resource exhaustion for {} (failing since {}); reclaiming resources",
                    service, first_failure
                ),
            )
            .await?;
        run_steps(
            self.notifier.as_ref(),
            "resource_mitigation_step",
            service,
            &self.steps,
            &[("first_failure", json!(first_failure))],
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::MemoryNotifier;
    use chrono::Utc;

    #[tokio::test]
    async fn critical_procedure_falls_back_to_generic_steps() {
        let notifier = Arc::new(MemoryNotifier::new());
        let action = CriticalServiceProcedure::new(notifier.clone());
        let tracker = ServiceFailureTracker::new("billing", Utc::now(), 4);

        action.execute("billing", &tracker).await.unwrap();

        let steps = notifier.events_named("emergency_procedure_step");
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].details["step"], "capture_diagnostics");
        assert_eq!(steps[0].details["procedure"], "generic");
        assert_eq!(notifier.alerts_at(AlertLevel::Critical).len(), 2);
    }

    #[tokio::test]
    async fn database_runs_dedicated_procedure() {
        let notifier = Arc::new(MemoryNotifier::new());
        let action = CriticalServiceProcedure::new(notifier.clone());
        let tracker = ServiceFailureTracker::new("database", Utc::now(), 4);

        action.execute("database", &tracker).await.unwrap();

        let steps: Vec<_> = notifier
            .events_named("emergency_procedure_step")
            .into_iter()
            .map(|event| event.details["step"].as_str().unwrap_or_default().to_owned())
            .collect();
        assert_eq!(
            steps,
            vec![
                "verify_data_integrity",
                "enable_read_only_mode",
                "promote_replica"
            ]
        );
    }

    #[tokio::test]
    async fn cascade_containment_logs_each_step_in_order() {
        let notifier = Arc::new(MemoryNotifier::new());
        let action = CascadeContainment::new(notifier.clone());
        let now = Utc::now();
        let mut tracker = ServiceFailureTracker::new("queue", now, 4);
        for _ in 0..6 {
            tracker.record_failure(now);
        }

        action.execute("queue", &tracker).await.unwrap();

        let events = notifier.events_named("cascade_containment_step");
        assert_eq!(events.len(), 3);
        assert_eq!(events[2].details["step"], "enable_degraded_mode");
        assert_eq!(events[2].details["sequence"], 3);
        assert_eq!(events[0].details["consecutive_failures"], 6);
    }
}
