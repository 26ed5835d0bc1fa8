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

use anyhow::Result;
use prometheus::{self, GaugeVec, HistogramOpts, HistogramVec, IntCounterVec, Opts};
use warden_metrics::SharedRegistry;

/// Metrics published by the healing subsystem.
#[derive(Clone)]
pub struct HealingMetrics {
    registry: SharedRegistry,
    recovery_attempts_total: IntCounterVec,
    recovery_duration_seconds: HistogramVec,
    escalations_total: IntCounterVec,
    manual_interventions_total: IntCounterVec,
    autonomy_level: GaugeVec,
}

impl HealingMetrics {
    /// Register the healing metric family against the provided registry.
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let recovery_attempts_total = IntCounterVec::new(
            Opts::new(
                "warden_recovery_attempts_total",
                "Recovery strategies executed, labelled by outcome",
            ),
            &["service", "strategy", "outcome"],
        )?;
        registry.register(Box::new(recovery_attempts_total.clone()))?;

        let histogram_opts = HistogramOpts::new(
            "warden_recovery_duration_seconds",
            "Wall time spent inside a recovery strategy's action",
        )
        .buckets(prometheus::exponential_buckets(0.01, 2.0, 14)?);
        let recovery_duration_seconds =
            HistogramVec::new(histogram_opts, &["service", "strategy"])?;
        registry.register(Box::new(recovery_duration_seconds.clone()))?;

        let escalations_total = IntCounterVec::new(
            Opts::new(
                "warden_escalations_total",
                "Escalation strategies executed by the autonomy manager",
            ),
            &["service", "strategy"],
        )?;
        registry.register(Box::new(escalations_total.clone()))?;

        let manual_interventions_total = IntCounterVec::new(
            Opts::new(
                "warden_manual_interventions_total",
                "Escalations that ended in a manual-intervention alert",
            ),
            &["service"],
        )?;
        registry.register(Box::new(manual_interventions_total.clone()))?;

        let autonomy_level = GaugeVec::new(
            Opts::new(
                "warden_autonomy_level",
                "Share of escalation decisions resolved without a human (0-1)",
            ),
            &["service"],
        )?;
        registry.register(Box::new(autonomy_level.clone()))?;

        Ok(Self {
            registry,
            recovery_attempts_total,
            recovery_duration_seconds,
            escalations_total,
            manual_interventions_total,
            autonomy_level,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn record_recovery_attempt(
        &self,
        service: &str,
        strategy: &str,
        success: bool,
        duration: Duration,
    ) {
        let outcome = if success { "success" } else { "failure" };
        self.recovery_attempts_total
            .with_label_values(&[service, strategy, outcome])
            .inc();
        self.recovery_duration_seconds
            .with_label_values(&[service, strategy])
            .observe(duration.as_secs_f64());
    }

    pub fn record_escalation(&self, service: &str, strategy: &str) {
        self.escalations_total
            .with_label_values(&[service, strategy])
            .inc();
    }

    pub fn record_manual_intervention(&self, service: &str) {
        self.manual_interventions_total
            .with_label_values(&[service])
            .inc();
    }

    pub fn set_autonomy_level(&self, service: &str, level: f64) {
        self.autonomy_level.with_label_values(&[service]).set(level);
    }
}

impl std::fmt::Debug for HealingMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealingMetrics").finish_non_exhaustive()
    }
}
