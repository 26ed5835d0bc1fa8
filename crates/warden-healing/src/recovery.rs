//! ---
//! warden_section: "07-resilience-fault-tolerance"
//! warden_subsection: "module"
//! warden_type: "source"
//! warden_scope: "code"
//! warden_description: "Recovery, escalation, and autonomy engine."
//! warden_version: "v0.0.0-prealpha"
//! warden_owner: "tbd"
//! ---
//! Failure tracking and conditional, timeout-bounded recovery.
//!
//! Each detection cycle updates the per-service [`ServiceFailureTracker`] map
//! and then launches at most one background task per unhealthy service: a
//! recovery round when retry gating allows it, otherwise an escalation once
//! the consecutive-failure threshold is met. A per-service task slot keeps a
//! second task from starting while the first is still running.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use warden_common::config::{EscalationConfig, RecoveryConfig};
use warden_common::time::{Clock, SystemClock};

use crate::action::{run_bounded, RemediationAction};
use crate::condition::{all_hold, Condition};
use crate::escalation::EscalationEngine;
use crate::health::HealthStatus;
use crate::metrics::HealingMetrics;
use crate::notify::{AlertLevel, NotificationPort, TracingNotifier};
use crate::tracker::{RecoveryAttempt, ServiceFailureTracker, ServiceStatus};

const DEFAULT_STRATEGY_TIMEOUT: Duration = Duration::from_secs(60);

/// Conditional remediation registered for one service.
#[derive(Clone)]
pub struct RecoveryStrategy {
    name: String,
    action: Arc<dyn RemediationAction>,
    timeout: Duration,
    conditions: Vec<Condition>,
}

impl RecoveryStrategy {
    pub fn new(name: impl Into<String>, action: Arc<dyn RemediationAction>) -> Self {
        Self {
            name: name.into(),
            action,
            timeout: DEFAULT_STRATEGY_TIMEOUT,
            conditions: Vec::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Add a gate; every gate must hold for the strategy to run.
    pub fn when(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }
}

impl fmt::Debug for RecoveryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecoveryStrategy")
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .field("conditions", &self.conditions)
            .finish_non_exhaustive()
    }
}

/// How a recovery round ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundResult {
    Recovered { strategy: String },
    /// At least one strategy ran and none succeeded.
    Exhausted,
    /// Strategies exist but none had all conditions satisfied.
    NoEligibleStrategy,
    /// The lifetime attempt cap was already reached, so nothing ran.
    CapReached,
    /// No strategies are registered for the service.
    NotConfigured,
    /// Another recovery or escalation task owns the service.
    Busy,
    /// The service has never failed, so there is nothing to recover.
    Untracked,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryOutcome {
    pub service: String,
    /// Strategies executed during this round.
    pub attempts: usize,
    pub result: RoundResult,
}

impl RecoveryOutcome {
    fn new(service: &str, attempts: usize, result: RoundResult) -> Self {
        Self {
            service: service.to_owned(),
            attempts,
            result,
        }
    }

    pub fn recovered(&self) -> bool {
        matches!(self.result, RoundResult::Recovered { .. })
    }
}

/// What one call to [`RecoveryEngine::detect_and_heal`] decided per service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub recoveries: Vec<String>,
    pub escalations: Vec<String>,
    /// Unhealthy services skipped because a task was already in flight.
    pub busy: Vec<String>,
    /// Unhealthy services left alone until retry gating opens again.
    pub waiting: Vec<String>,
    pub healthy: Vec<String>,
}

struct EngineShared {
    config: RecoveryConfig,
    trackers: RwLock<HashMap<String, ServiceFailureTracker>>,
    strategies: HashMap<String, Vec<RecoveryStrategy>>,
    in_flight: Mutex<HashSet<String>>,
    notifier: Arc<dyn NotificationPort>,
    escalation: Arc<EscalationEngine>,
    clock: Arc<dyn Clock>,
    metrics: Option<HealingMetrics>,
}

/// Exclusive claim on a service's task slot, released on drop.
struct TaskSlot {
    shared: Arc<EngineShared>,
    service: String,
}

impl TaskSlot {
    fn claim(shared: &Arc<EngineShared>, service: &str) -> Option<Self> {
        if !shared.in_flight.lock().insert(service.to_owned()) {
            return None;
        }
        Some(Self {
            shared: shared.clone(),
            service: service.to_owned(),
        })
    }
}

impl Drop for TaskSlot {
    fn drop(&mut self) {
        self.shared.in_flight.lock().remove(&self.service);
    }
}

/// Builder wiring strategies and collaborators into a [`RecoveryEngine`].
pub struct RecoveryEngineBuilder {
    config: RecoveryConfig,
    strategies: HashMap<String, Vec<RecoveryStrategy>>,
    notifier: Option<Arc<dyn NotificationPort>>,
    escalation: Option<Arc<EscalationEngine>>,
    clock: Option<Arc<dyn Clock>>,
    metrics: Option<HealingMetrics>,
}

impl RecoveryEngineBuilder {
    /// Append a strategy to the service's ordered list.
    pub fn strategy(mut self, service: impl Into<String>, strategy: RecoveryStrategy) -> Self {
        self.strategies
            .entry(service.into())
            .or_default()
            .push(strategy);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn NotificationPort>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn escalation(mut self, escalation: Arc<EscalationEngine>) -> Self {
        self.escalation = Some(escalation);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn metrics(mut self, metrics: HealingMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Finish construction. Without an explicit escalation engine one is
    /// created with the built-in strategies and default thresholds.
    pub fn build(self) -> RecoveryEngine {
        let notifier = self
            .notifier
            .unwrap_or_else(|| Arc::new(TracingNotifier) as Arc<dyn NotificationPort>);
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>);
        let escalation = self.escalation.unwrap_or_else(|| {
            let mut engine = EscalationEngine::with_default_strategies(
                EscalationConfig::default(),
                notifier.clone(),
                clock.clone(),
            );
            if let Some(metrics) = &self.metrics {
                engine = engine.with_metrics(metrics.clone());
            }
            Arc::new(engine)
        });

        RecoveryEngine {
            shared: Arc::new(EngineShared {
                config: self.config,
                trackers: RwLock::new(HashMap::new()),
                strategies: self.strategies,
                in_flight: Mutex::new(HashSet::new()),
                notifier,
                escalation,
                clock,
                metrics: self.metrics,
            }),
            tasks: Mutex::new(JoinSet::new()),
        }
    }
}

/// Owns the failure tracker map, the strategy registry, and spawned tasks.
pub struct RecoveryEngine {
    shared: Arc<EngineShared>,
    tasks: Mutex<JoinSet<()>>,
}

impl RecoveryEngine {
    pub fn builder(config: RecoveryConfig) -> RecoveryEngineBuilder {
        RecoveryEngineBuilder {
            config,
            strategies: HashMap::new(),
            notifier: None,
            escalation: None,
            clock: None,
            metrics: None,
        }
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.shared.config
    }

    pub fn escalation(&self) -> Arc<EscalationEngine> {
        self.shared.escalation.clone()
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.shared.clock.clone()
    }

    /// Apply one observation to the tracker map and return the updated record.
    ///
    /// A healthy reading for a service that never failed is a no-op and
    /// returns `None`.
    pub fn update_failure_tracker(
        &self,
        service: &str,
        healthy: bool,
    ) -> Option<ServiceFailureTracker> {
        let mut trackers = self.shared.trackers.write();
        if healthy {
            let tracker = trackers.get_mut(service)?;
            if tracker.current_status != ServiceStatus::Healthy {
                info!(
                    target: "warden::recovery",
                    service,
                    previous = %tracker.current_status,
                    "service reported healthy",
                );
            }
            tracker.record_healthy();
            return Some(tracker.clone());
        }

        let now = self.shared.clock.now();
        let history_limit = self.shared.config.history_limit;
        let tracker = trackers.entry(service.to_owned()).or_insert_with(|| {
            debug!(target: "warden::recovery", service, "tracking new failing service");
            ServiceFailureTracker::new(service, now, history_limit)
        });
        tracker.record_failure(now);
        Some(tracker.clone())
    }

    /// Retry gating: spacing of at least `retry_delay` and a lifetime cap of `max_retries`.
    pub fn should_attempt_recovery(&self, tracker: &ServiceFailureTracker) -> bool {
        let config = &self.shared.config;
        if let Some(elapsed) = tracker.since_last_recovery(self.shared.clock.now()) {
            if elapsed < config.retry_delay {
                return false;
            }
        }
        tracker.total_attempts < config.max_retries
    }

    pub fn should_escalate(&self, tracker: &ServiceFailureTracker) -> bool {
        tracker.consecutive_failures >= self.shared.config.escalation_threshold
    }

    /// Process one batch of health observations.
    ///
    /// Recovery and escalation run as background tasks; this call never waits
    /// on their outcome. Services are handled independently and in no
    /// particular order relative to each other.
    pub async fn detect_and_heal(
        &self,
        observations: &IndexMap<String, HealthStatus>,
    ) -> CycleReport {
        self.reap_finished();
        let mut report = CycleReport::default();

        for (service, status) in observations {
            if status.healthy {
                if self.update_failure_tracker(service, true).is_some() {
                    report.healthy.push(service.clone());
                }
                continue;
            }

            let Some(tracker) = self.update_failure_tracker(service, false) else {
                continue;
            };
            debug!(
                target: "warden::recovery",
                service = %service,
                consecutive = tracker.consecutive_failures,
                failing_checks = ?status.failing_checks().collect::<Vec<_>>(),
                "unhealthy observation recorded",
            );

            let recover = self.should_attempt_recovery(&tracker);
            let escalate = !recover && self.should_escalate(&tracker);
            if !recover && !escalate {
                report.waiting.push(service.clone());
                continue;
            }

            let Some(slot) = TaskSlot::claim(&self.shared, service) else {
                debug!(
                    target: "warden::recovery",
                    service = %service,
                    "task already in flight; skipping"
                );
                report.busy.push(service.clone());
                continue;
            };

            let shared = self.shared.clone();
            let name = service.clone();
            if recover {
                report.recoveries.push(service.clone());
                self.tasks.lock().spawn(async move {
                    let _slot = slot;
                    run_recovery_round(&shared, &name).await;
                });
            } else {
                report.escalations.push(service.clone());
                self.tasks.lock().spawn(async move {
                    let _slot = slot;
                    run_escalation(&shared, &name).await;
                });
            }
        }

        report
    }

    /// Run a recovery round inline, honouring the per-service task slot.
    pub async fn attempt_recovery(&self, service: &str) -> RecoveryOutcome {
        let Some(_slot) = TaskSlot::claim(&self.shared, service) else {
            return RecoveryOutcome::new(service, 0, RoundResult::Busy);
        };
        run_recovery_round(&self.shared, service).await
    }

    pub fn service_failure_status(&self, service: &str) -> Option<ServiceFailureTracker> {
        self.shared.trackers.read().get(service).cloned()
    }

    pub fn all_failure_statuses(&self) -> HashMap<String, ServiceFailureTracker> {
        self.shared.trackers.read().clone()
    }

    pub fn in_flight(&self, service: &str) -> bool {
        self.shared.in_flight.lock().contains(service)
    }

    /// Wait until every spawned recovery and escalation task has finished.
    pub async fn wait_idle(&self) {
        loop {
            let mut tasks = std::mem::take(&mut *self.tasks.lock());
            if tasks.is_empty() {
                break;
            }
            while let Some(joined) = tasks.join_next().await {
                if let Err(err) = joined {
                    error!(
                        target: "warden::recovery",
                        error = %err,
                        "healing task panicked or was aborted"
                    );
                }
            }
        }
    }

    fn reap_finished(&self) {
        let mut tasks = self.tasks.lock();
        while let Some(Some(joined)) = tasks.join_next().now_or_never() {
            if let Err(err) = joined {
                error!(
                    target: "warden::recovery",
                    error = %err,
                    "healing task panicked or was aborted"
                );
            }
        }
    }
}

impl fmt::Debug for RecoveryEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecoveryEngine")
            .field("config", &self.shared.config)
            .field("services", &self.shared.strategies.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

async fn run_recovery_round(shared: &EngineShared, service: &str) -> RecoveryOutcome {
    let started_at = shared.clock.now();
    let Some(mut snapshot) = with_tracker(shared, service, |tracker| {
        tracker.begin_recovery(started_at);
    }) else {
        return RecoveryOutcome::new(service, 0, RoundResult::Untracked);
    };

    let strategies = shared
        .strategies
        .get(service)
        .map(Vec::as_slice)
        .unwrap_or_default();
    if strategies.is_empty() {
        warn!(target: "warden::recovery", service, "no recovery strategies registered");
        with_tracker(shared, service, settle_failed);
        return RecoveryOutcome::new(service, 0, RoundResult::NotConfigured);
    }

    info!(
        target: "warden::recovery",
        service,
        consecutive = snapshot.consecutive_failures,
        prior_attempts = snapshot.total_attempts,
        "starting recovery round",
    );

    let mut executed = 0usize;
    let mut capped = false;
    for strategy in strategies {
        if snapshot.total_attempts >= shared.config.max_retries {
            debug!(target: "warden::recovery", service, "attempt cap reached");
            capped = true;
            break;
        }
        if !all_hold(&strategy.conditions, service, &snapshot, shared.clock.now()) {
            debug!(
                target: "warden::recovery",
                service,
                strategy = %strategy.name,
                "conditions not met"
            );
            continue;
        }

        let attempted_at = shared.clock.now();
        let run = run_bounded(
            strategy.action.as_ref(),
            &strategy.name,
            strategy.timeout,
            service,
            &snapshot,
        )
        .await;
        executed += 1;

        let success = run.succeeded();
        let attempt = RecoveryAttempt {
            timestamp: attempted_at,
            strategy_name: strategy.name.clone(),
            success,
            error: run.error_text(),
            duration: run.elapsed,
        };
        if let Some(metrics) = &shared.metrics {
            metrics.record_recovery_attempt(service, &strategy.name, success, run.elapsed);
        }

        let updated = with_tracker(shared, service, |tracker| {
            tracker.record_attempt(attempt);
            if success {
                settle_recovered(tracker);
            }
        });
        if let Some(updated) = updated {
            snapshot = updated;
        }

        if success {
            info!(
                target: "warden::recovery",
                service,
                strategy = %strategy.name,
                elapsed_ms = run.elapsed.as_millis() as u64,
                "recovery strategy succeeded",
            );
            notify(
                shared,
                AlertLevel::Info,
                service,
                &format!(
                    "Service {} recovered using strategy {}",
                    service, strategy.name
                ),
            )
            .await;
            return RecoveryOutcome::new(
                service,
                executed,
                RoundResult::Recovered {
                    strategy: strategy.name.clone(),
                },
            );
        }

        warn!(
            target: "warden::recovery",
            service,
            strategy = %strategy.name,
            error = %run.error_text().unwrap_or_default(),
            "recovery strategy failed",
        );
    }

    with_tracker(shared, service, settle_failed);
    if executed == 0 && capped {
        info!(
            target: "warden::recovery",
            service,
            max_retries = shared.config.max_retries,
            "attempt cap reached; leaving service to escalation",
        );
        return RecoveryOutcome::new(service, 0, RoundResult::CapReached);
    }
    if executed == 0 {
        warn!(target: "warden::recovery", service, "no recovery strategy eligible");
        notify(
            shared,
            AlertLevel::Warning,
            service,
            &format!("No recovery strategy eligible for service {}", service),
        )
        .await;
        return RecoveryOutcome::new(service, 0, RoundResult::NoEligibleStrategy);
    }

    error!(target: "warden::recovery", service, executed, "all recovery strategies failed");
    notify(
        shared,
        AlertLevel::Error,
        service,
        &format!("All recovery strategies failed for service {}", service),
    )
    .await;
    RecoveryOutcome::new(service, executed, RoundResult::Exhausted)
}

async fn run_escalation(shared: &EngineShared, service: &str) {
    let Some(snapshot) = shared.trackers.read().get(service).cloned() else {
        return;
    };
    let reason = format!(
        "Consecutive failures: {}, Recovery attempts: {}",
        snapshot.consecutive_failures, snapshot.total_attempts
    );
    info!(target: "warden::recovery", service, reason = %reason, "escalating service");

    if let Err(err) = shared.escalation.notify_escalation(service, &reason).await {
        warn!(
            target: "warden::recovery",
            service,
            error = %err,
            "failed to send escalation notice"
        );
    }

    match shared
        .escalation
        .handle_service_failure(service, &snapshot)
        .await
    {
        Ok(mitigation) => {
            info!(
                target: "warden::recovery",
                service,
                strategy = %mitigation.strategy,
                "escalation mitigated failure"
            );
        }
        Err(err) if err.requires_human() => {
            warn!(
                target: "warden::recovery",
                service,
                error = %err,
                "escalation handed to operators"
            );
        }
        Err(err) => {
            error!(target: "warden::recovery", service, error = %err, "escalation strategy failed");
        }
    }
}

/// Mutate a tracker under the map's write lock and return a snapshot.
fn with_tracker<F>(shared: &EngineShared, service: &str, mutate: F) -> Option<ServiceFailureTracker>
where
    F: FnOnce(&mut ServiceFailureTracker),
{
    let mut trackers = shared.trackers.write();
    let tracker = trackers.get_mut(service)?;
    mutate(tracker);
    Some(tracker.clone())
}

/// A successful action only marks the service healthy if no newer reading
/// changed the status while the round was running.
fn settle_recovered(tracker: &mut ServiceFailureTracker) {
    if tracker.current_status == ServiceStatus::Recovering {
        tracker.current_status = ServiceStatus::Healthy;
    }
}

/// A healthy reading that arrived during the round wins over the failed round.
fn settle_failed(tracker: &mut ServiceFailureTracker) {
    if tracker.current_status == ServiceStatus::Recovering {
        tracker.current_status = ServiceStatus::Failed;
    }
}

async fn notify(shared: &EngineShared, level: AlertLevel, service: &str, message: &str) {
    if let Err(err) = shared.notifier.send_alert(level, service, message).await {
        warn!(
            target: "warden::recovery",
            service,
            alert_level = %level,
            error = %err,
            "notification failed"
        );
    }
}
