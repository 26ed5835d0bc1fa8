//! ---
//! warden_section: "07-resilience-fault-tolerance"
//! warden_subsection: "module"
//! warden_type: "source"
//! warden_scope: "code"
//! warden_description: "Recovery, escalation, and autonomy engine."
//! warden_version: "v0.0.0-prealpha"
//! warden_owner: "tbd"
//! ---
//! Self-healing control plane: per-service failure tracking, conditional
//! recovery, escalation to higher-order strategies or operators, and
//! autonomy scoring.

pub mod action;
pub mod autonomy;
pub mod condition;
pub mod error;
pub mod escalation;
pub mod health;
pub mod metrics;
pub mod notify;
pub mod recovery;
pub mod supervisor;
pub mod tracker;

pub use action::RemediationAction;
pub use autonomy::{AutonomyBand, AutonomyMetric, AutonomyMonitor};
pub use condition::Condition;
pub use error::{HealingError, Result};
pub use escalation::{
    AutonomyDecision, EscalationEngine, EscalationStrategy, IncidentReport, Mitigation,
};
pub use health::{CheckResult, HealthSource, HealthStatus};
pub use metrics::HealingMetrics;
pub use notify::{AlertLevel, EventDetails, MemoryNotifier, NotificationPort, TracingNotifier};
pub use recovery::{
    CycleReport, RecoveryEngine, RecoveryEngineBuilder, RecoveryOutcome, RecoveryStrategy,
    RoundResult,
};
pub use supervisor::{run_cycle, HealingHandle, HealingSupervisor};
pub use tracker::{RecoveryAttempt, ServiceFailureTracker, ServiceStatus};

/// Crate prelude collecting the types needed to wire up an engine.
pub mod prelude {
    pub use super::autonomy::AutonomyMonitor;
    pub use super::condition::Condition;
    pub use super::escalation::{EscalationEngine, EscalationStrategy};
    pub use super::health::{HealthSource, HealthStatus};
    pub use super::notify::{AlertLevel, NotificationPort};
    pub use super::recovery::{RecoveryEngine, RecoveryStrategy};
    pub use super::supervisor::HealingSupervisor;
    pub use super::RemediationAction;
}
