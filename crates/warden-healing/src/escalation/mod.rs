//! ---
//! warden_section: "07-resilience-fault-tolerance"
//! warden_subsection: "module"
//! warden_type: "source"
//! warden_scope: "code"
//! warden_description: "Recovery, escalation, and autonomy engine."
//! warden_version: "v0.0.0-prealpha"
//! warden_owner: "tbd"
//! ---
//! Escalation (autonomy manager) invoked once per-service recovery gives up.
//!
//! Strategies are evaluated in registration order and the first one whose
//! conditions all hold is executed. When none match, the service is handed
//! to operators through a manual-intervention alert carrying an
//! [`IncidentReport`], and the call returns
//! [`HealingError::ManualInterventionRequired`].

mod builtin;
mod report;

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, warn};
use warden_common::config::EscalationConfig;
use warden_common::time::Clock;

use crate::action::{run_bounded, RemediationAction};
use crate::condition::{all_hold, Condition};
use crate::error::{HealingError, Result};
use crate::metrics::HealingMetrics;
use crate::notify::{AlertLevel, EventDetails, NotificationPort};
use crate::tracker::ServiceFailureTracker;

pub use builtin::{
    CascadeContainment, CriticalServiceProcedure, ResourceReclamation, CASCADE_FAILURE,
    CRITICAL_SERVICE_DOWN, RESOURCE_EXHAUSTION,
};
pub use report::IncidentReport;

/// Decision type recorded when no strategy matched.
pub const MANUAL_INTERVENTION: &str = "manual_intervention";

const DEFAULT_CONFIDENCE: f64 = 0.8;

/// Higher-order conditional procedure run by the escalation engine.
#[derive(Clone)]
pub struct EscalationStrategy {
    name: String,
    description: String,
    action: Arc<dyn RemediationAction>,
    conditions: Vec<Condition>,
    confidence: f64,
}

impl EscalationStrategy {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        action: Arc<dyn RemediationAction>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            action,
            conditions: Vec::new(),
            confidence: DEFAULT_CONFIDENCE,
        }
    }

    pub fn when(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Confidence recorded with each decision taken by this strategy, clamped to `[0, 1]`.
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

impl fmt::Debug for EscalationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EscalationStrategy")
            .field("name", &self.name)
            .field("conditions", &self.conditions)
            .field("confidence", &self.confidence)
            .finish_non_exhaustive()
    }
}

/// Audit trail entry appended whenever the escalation engine acts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutonomyDecision {
    pub timestamp: DateTime<Utc>,
    pub service: String,
    pub decision_type: String,
    pub context: EventDetails,
    pub success: bool,
    pub duration: Duration,
    pub confidence: f64,
}

/// Successful escalation result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mitigation {
    pub strategy: String,
    pub duration: Duration,
}

pub struct EscalationEngine {
    config: EscalationConfig,
    strategies: Vec<EscalationStrategy>,
    notifier: Arc<dyn NotificationPort>,
    clock: Arc<dyn Clock>,
    metrics: Option<HealingMetrics>,
    decisions: RwLock<VecDeque<AutonomyDecision>>,
}

impl EscalationEngine {
    /// Engine without any strategies; every escalation ends in manual intervention.
    pub fn new(
        config: EscalationConfig,
        notifier: Arc<dyn NotificationPort>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            strategies: Vec::new(),
            notifier,
            clock,
            metrics: None,
            decisions: RwLock::new(VecDeque::new()),
        }
    }

    /// Engine with the built-in strategies registered in priority order:
    /// critical service down, cascade failure, resource exhaustion.
    pub fn with_default_strategies(
        config: EscalationConfig,
        notifier: Arc<dyn NotificationPort>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let critical = EscalationStrategy::new(
            CRITICAL_SERVICE_DOWN,
            "Critical service unrecovered after repeated attempts",
            Arc::new(CriticalServiceProcedure::new(notifier.clone())),
        )
        .when(Condition::service_in(config.critical_services.iter().cloned()))
        .when(Condition::AttemptsAtLeast(config.critical_min_attempts))
        .with_confidence(0.9);

        let cascade = EscalationStrategy::new(
            CASCADE_FAILURE,
            "Sustained consecutive failures that may propagate to dependants",
            Arc::new(CascadeContainment::new(notifier.clone())),
        )
        .when(Condition::ConsecutiveAbove(config.cascade_threshold))
        .with_confidence(0.75);

        let resource = EscalationStrategy::new(
            RESOURCE_EXHAUSTION,
            "Long-running failure consistent with resource exhaustion",
            Arc::new(ResourceReclamation::new(notifier.clone())),
        )
        .when(Condition::FailingLongerThan(config.resource_exhaustion_after))
        .with_confidence(0.7);

        Self::new(config, notifier, clock)
            .with_strategy(critical)
            .with_strategy(cascade)
            .with_strategy(resource)
    }

    /// Append a strategy after those already registered.
    pub fn with_strategy(mut self, strategy: EscalationStrategy) -> Self {
        self.strategies.push(strategy);
        self
    }

    pub fn with_metrics(mut self, metrics: HealingMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &EscalationConfig {
        &self.config
    }

    pub fn strategy_names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name.as_str()).collect()
    }

    /// Run the first matching strategy, or hand the service to operators.
    pub async fn handle_service_failure(
        &self,
        service: &str,
        tracker: &ServiceFailureTracker,
    ) -> Result<Mitigation> {
        let now = self.clock.now();
        let Some(strategy) = self
            .strategies
            .iter()
            .find(|strategy| all_hold(&strategy.conditions, service, tracker, now))
        else {
            return Err(self.escalate_to_human(service, tracker).await);
        };

        info!(
            target: "warden::escalation",
            service,
            strategy = %strategy.name,
            description = %strategy.description,
            "escalation strategy selected",
        );
        let run = run_bounded(
            strategy.action.as_ref(),
            &strategy.name,
            self.config.action_timeout,
            service,
            tracker,
        )
        .await;

        self.record_decision(AutonomyDecision {
            timestamp: now,
            service: service.to_owned(),
            decision_type: strategy.name.clone(),
            context: decision_context(tracker, run.error_text()),
            success: run.succeeded(),
            duration: run.elapsed,
            confidence: strategy.confidence,
        });
        if let Some(metrics) = &self.metrics {
            metrics.record_escalation(service, &strategy.name);
        }

        match run.result {
            Ok(()) => Ok(Mitigation {
                strategy: strategy.name.clone(),
                duration: run.elapsed,
            }),
            Err(source) => {
                error!(
                    target: "warden::escalation",
                    service,
                    strategy = %strategy.name,
                    error = %source,
                    "escalation strategy failed",
                );
                Err(HealingError::EscalationFailed {
                    service: service.to_owned(),
                    strategy: strategy.name.clone(),
                    source,
                })
            }
        }
    }

    /// Tell operators why automated recovery stopped for `service`.
    pub async fn notify_escalation(&self, service: &str, reason: &str) -> Result<()> {
        let message = format!(
            "Automated recovery exhausted for service {}. {}",
            service, reason
        );
        self.notifier
            .send_alert(AlertLevel::Escalation, service, &message)
            .await
            .map_err(HealingError::Notification)
    }

    /// Snapshot of the decision audit trail, oldest first.
    pub fn decision_history(&self) -> Vec<AutonomyDecision> {
        self.decisions.read().iter().cloned().collect()
    }

    pub fn incident_report(&self, tracker: &ServiceFailureTracker, reason: &str) -> IncidentReport {
        IncidentReport::from_tracker(tracker, reason, self.clock.now())
    }

    async fn escalate_to_human(
        &self,
        service: &str,
        tracker: &ServiceFailureTracker,
    ) -> HealingError {
        let reason = format!(
            "no escalation strategy matched ({} consecutive failures, {} recovery attempts)",
            tracker.consecutive_failures, tracker.total_attempts
        );
        let report = self.incident_report(tracker, &reason);
        warn!(
            target: "warden::escalation",
            service,
            reason = %reason,
            critical = self.config.is_critical(service),
            failing_for = ?report.failing_for(),
            "manual intervention required"
        );

        if let Err(err) = self
            .notifier
            .send_alert(AlertLevel::ManualIntervention, service, &report.render())
            .await
        {
            error!(
                target: "warden::escalation",
                service,
                error = %err,
                "failed to deliver manual intervention alert"
            );
        }
        if let Err(err) = self
            .notifier
            .log_event("manual_intervention_required", report.to_details())
            .await
        {
            warn!(
                target: "warden::escalation",
                service,
                error = %err,
                "failed to log manual intervention event"
            );
        }

        self.record_decision(AutonomyDecision {
            timestamp: report.generated_at,
            service: service.to_owned(),
            decision_type: MANUAL_INTERVENTION.to_owned(),
            context: decision_context(tracker, None),
            success: false,
            duration: Duration::ZERO,
            confidence: 0.0,
        });
        if let Some(metrics) = &self.metrics {
            metrics.record_manual_intervention(service);
        }

        HealingError::ManualInterventionRequired {
            service: service.to_owned(),
            reason,
        }
    }

    fn record_decision(&self, decision: AutonomyDecision) {
        let mut decisions = self.decisions.write();
        while decisions.len() >= self.config.decision_history_limit.max(1) {
            decisions.pop_front();
        }
        decisions.push_back(decision);
    }
}

impl fmt::Debug for EscalationEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EscalationEngine")
            .field("config", &self.config)
            .field("strategies", &self.strategy_names())
            .finish_non_exhaustive()
    }
}

fn decision_context(tracker: &ServiceFailureTracker, error: Option<String>) -> EventDetails {
    let mut context = EventDetails::new();
    context.insert("failure_count".into(), json!(tracker.failure_count));
    context.insert(
        "consecutive_failures".into(),
        json!(tracker.consecutive_failures),
    );
    context.insert("recovery_attempts".into(), json!(tracker.total_attempts));
    context.insert("status".into(), json!(tracker.current_status.as_str()));
    if let Some(error) = error {
        context.insert("error".into(), json!(error));
    }
    context
}
