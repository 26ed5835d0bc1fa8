//! ---
//! warden_section: "07-resilience-fault-tolerance"
//! warden_subsection: "module"
//! warden_type: "source"
//! warden_scope: "code"
//! warden_description: "Recovery, escalation, and autonomy engine."
//! warden_version: "v0.0.0-prealpha"
//! warden_owner: "tbd"
//! ---
//! Per-service autonomy scoring derived from the escalation decision history.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};
use warden_common::config::AutonomyConfig;
use warden_common::time::Clock;

use crate::escalation::{AutonomyDecision, EscalationEngine};
use crate::metrics::HealingMetrics;

/// Coarse classification of an autonomy level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutonomyBand {
    High,
    Medium,
    Low,
}

impl AutonomyBand {
    /// Band for `level`: strictly above `high` is high, strictly above `medium` is medium.
    pub fn classify(level: f64, config: &AutonomyConfig) -> Self {
        if level > config.high_threshold {
            Self::High
        } else if level > config.medium_threshold {
            Self::Medium
        } else {
            Self::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl fmt::Display for AutonomyBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutonomyMetric {
    /// Successful decisions over all decisions, in `[0, 1]`.
    pub autonomy_level: f64,
    pub band: AutonomyBand,
    pub self_healing_count: u64,
    pub total_decisions: u64,
    pub last_intervention: Option<DateTime<Utc>>,
    /// Mean confidence of successful decisions, with failures scored as zero.
    pub decision_quality: f64,
    pub last_updated: DateTime<Utc>,
}

/// Fold one service's decisions into a metric. Returns `None` for an empty slice.
pub fn score<'a, I>(
    decisions: I,
    config: &AutonomyConfig,
    now: DateTime<Utc>,
) -> Option<AutonomyMetric>
where
    I: IntoIterator<Item = &'a AutonomyDecision>,
{
    let mut total = 0u64;
    let mut successes = 0u64;
    let mut quality = 0.0f64;
    let mut last_intervention: Option<DateTime<Utc>> = None;

    for decision in decisions {
        total += 1;
        if decision.success {
            successes += 1;
            quality += decision.confidence;
        } else if last_intervention.map_or(true, |seen| decision.timestamp > seen) {
            last_intervention = Some(decision.timestamp);
        }
    }
    if total == 0 {
        return None;
    }

    let autonomy_level = (successes as f64 / total as f64).clamp(0.0, 1.0);
    Some(AutonomyMetric {
        autonomy_level,
        band: AutonomyBand::classify(autonomy_level, config),
        self_healing_count: successes,
        total_decisions: total,
        last_intervention,
        decision_quality: (quality / total as f64).clamp(0.0, 1.0),
        last_updated: now,
    })
}

/// Periodically recomputes [`AutonomyMetric`]s for every service with decision history.
pub struct AutonomyMonitor {
    config: AutonomyConfig,
    escalation: Arc<EscalationEngine>,
    clock: Arc<dyn Clock>,
    metrics: Option<HealingMetrics>,
    snapshot: RwLock<HashMap<String, AutonomyMetric>>,
}

impl AutonomyMonitor {
    pub fn new(
        config: AutonomyConfig,
        escalation: Arc<EscalationEngine>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            escalation,
            clock,
            metrics: None,
            snapshot: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_metrics(mut self, metrics: HealingMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &AutonomyConfig {
        &self.config
    }

    /// Rebuild the snapshot from the current decision history.
    pub fn recompute(&self) {
        let now = self.clock.now();
        let mut grouped: HashMap<String, Vec<AutonomyDecision>> = HashMap::new();
        for decision in self.escalation.decision_history() {
            grouped
                .entry(decision.service.clone())
                .or_default()
                .push(decision);
        }

        let fresh: HashMap<String, AutonomyMetric> = grouped
            .into_iter()
            .filter_map(|(service, decisions)| {
                score(&decisions, &self.config, now).map(|metric| (service, metric))
            })
            .collect();

        if let Some(metrics) = &self.metrics {
            for (service, metric) in &fresh {
                metrics.set_autonomy_level(service, metric.autonomy_level);
            }
        }
        debug!(target: "warden::autonomy", services = fresh.len(), "autonomy metrics recomputed");
        *self.snapshot.write() = fresh;
    }

    /// Recompute, then return an owned copy of every service's metric.
    pub fn metrics(&self) -> HashMap<String, AutonomyMetric> {
        self.recompute();
        self.snapshot.read().clone()
    }

    /// Recompute on every `interval` tick until `shutdown` fires.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!(target: "warden::autonomy", "autonomy monitor shutdown");
                    break;
                }
                _ = ticker.tick() => self.recompute(),
            }
        }
    }
}

impl fmt::Debug for AutonomyMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AutonomyMonitor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
