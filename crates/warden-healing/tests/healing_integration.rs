//! ---
//! warden_section: "07-resilience-fault-tolerance"
//! warden_subsection: "module"
//! warden_type: "source"
//! warden_scope: "code"
//! warden_description: "Recovery, escalation, and autonomy engine."
//! warden_version: "v0.0.0-prealpha"
//! warden_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::Utc;
use indexmap::IndexMap;
use parking_lot::Mutex;
use tokio::sync::Notify;
use warden_common::config::{AutonomyConfig, EscalationConfig, RecoveryConfig};
use warden_common::time::{Clock, ManualClock};
use warden_healing::escalation::CASCADE_FAILURE;
use warden_healing::{
    AlertLevel, AutonomyBand, AutonomyMonitor, Condition, EscalationEngine, EventDetails,
    HealingError, HealingMetrics, HealthStatus, MemoryNotifier, NotificationPort,
    RecoveryEngine, RecoveryStrategy, RemediationAction, RoundResult, ServiceFailureTracker,
    ServiceStatus,
};
use warden_metrics::{new_registry, render_text};

/// Action that records every invocation and succeeds or fails as configured.
struct Scripted {
    name: &'static str,
    succeed: bool,
    calls: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl RemediationAction for Scripted {
    async fn execute(&self, service: &str, _tracker: &ServiceFailureTracker) -> anyhow::Result<()> {
        self.calls.lock().push(format!("{}:{}", self.name, service));
        if self.succeed {
            Ok(())
        } else {
            Err(anyhow!("{} did not help", self.name))
        }
    }
}

fn strategy(
    name: &'static str,
    succeed: bool,
    calls: &Arc<Mutex<Vec<String>>>,
) -> RecoveryStrategy {
    RecoveryStrategy::new(
        name,
        Arc::new(Scripted {
            name,
            succeed,
            calls: calls.clone(),
        }),
    )
}

/// Action parked until the test releases it.
struct Gated(Arc<Notify>);

#[async_trait]
impl RemediationAction for Gated {
    async fn execute(
        &self,
        _service: &str,
        _tracker: &ServiceFailureTracker,
    ) -> anyhow::Result<()> {
        self.0.notified().await;
        Ok(())
    }
}

struct Stalled;

#[async_trait]
impl RemediationAction for Stalled {
    async fn execute(
        &self,
        _service: &str,
        _tracker: &ServiceFailureTracker,
    ) -> anyhow::Result<()> {
        tokio::time::sleep(Duration::from_secs(600)).await;
        Ok(())
    }
}

/// Notification sink that is permanently unreachable.
struct DownNotifier;

#[async_trait]
impl NotificationPort for DownNotifier {
    async fn send_alert(
        &self,
        _level: AlertLevel,
        _service: &str,
        _message: &str,
    ) -> anyhow::Result<()> {
        Err(anyhow!("alert gateway unreachable"))
    }

    async fn log_event(&self, _event: &str, _details: EventDetails) -> anyhow::Result<()> {
        Err(anyhow!("event sink unreachable"))
    }
}

fn observation(service: &str, healthy: bool) -> IndexMap<String, HealthStatus> {
    let status = if healthy {
        HealthStatus::healthy(Utc::now())
    } else {
        HealthStatus::unhealthy(Utc::now())
    };
    let mut batch = IndexMap::new();
    batch.insert(service.to_owned(), status);
    batch
}

fn recovery_config(max_retries: usize, escalation_threshold: u32) -> RecoveryConfig {
    RecoveryConfig {
        max_retries,
        retry_delay: Duration::from_secs(30),
        escalation_threshold,
        ..RecoveryConfig::default()
    }
}

#[tokio::test]
async fn cache_recovers_once_then_escalates_on_fifth_failure() {
    let notifier = Arc::new(MemoryNotifier::new());
    let clock = Arc::new(ManualClock::default());
    let calls = Arc::new(Mutex::new(Vec::new()));
    let engine = RecoveryEngine::builder(recovery_config(3, 5))
        .strategy("cache", strategy("restart", false, &calls))
        .notifier(notifier.clone())
        .clock(clock.clone())
        .build();

    let mut reports = Vec::new();
    for _ in 0..5 {
        reports.push(engine.detect_and_heal(&observation("cache", false)).await);
        engine.wait_idle().await;
        clock.advance(Duration::from_secs(1));
    }

    assert_eq!(reports[0].recoveries, vec!["cache".to_string()]);
    for report in &reports[1..4] {
        assert!(report.recoveries.is_empty());
        assert!(report.escalations.is_empty());
        assert_eq!(report.waiting, vec!["cache".to_string()]);
    }
    assert!(reports[4].recoveries.is_empty());
    assert_eq!(reports[4].escalations, vec!["cache".to_string()]);
    assert_eq!(calls.lock().len(), 1);

    let escalations = notifier.alerts_at(AlertLevel::Escalation);
    assert_eq!(escalations.len(), 1);
    assert!(escalations[0].message.contains("Consecutive failures: 5"));
    assert!(escalations[0].message.contains("Recovery attempts: 1"));

    // No built-in strategy matches a non-critical service at exactly five failures.
    assert_eq!(notifier.alerts_at(AlertLevel::ManualIntervention).len(), 1);
    assert_eq!(notifier.alerts_at(AlertLevel::Error).len(), 1);

    let tracker = engine.service_failure_status("cache").unwrap();
    assert_eq!(tracker.consecutive_failures, 5);
    assert_eq!(tracker.total_attempts, 1);
    assert_eq!(tracker.current_status, ServiceStatus::Failed);
}

#[tokio::test]
async fn attempt_cap_holds_across_rounds() {
    let notifier = Arc::new(MemoryNotifier::new());
    let clock = Arc::new(ManualClock::default());
    let calls = Arc::new(Mutex::new(Vec::new()));
    let engine = RecoveryEngine::builder(recovery_config(3, 100))
        .strategy("api", strategy("soft", false, &calls))
        .strategy("api", strategy("hard", false, &calls))
        .notifier(notifier.clone())
        .clock(clock.clone())
        .build();

    for _ in 0..6 {
        engine.detect_and_heal(&observation("api", false)).await;
        engine.wait_idle().await;
        clock.advance(Duration::from_secs(31));
    }

    let tracker = engine.service_failure_status("api").unwrap();
    assert_eq!(tracker.total_attempts, 3);
    assert_eq!(tracker.recent_attempts().count(), 3);
    assert_eq!(
        *calls.lock(),
        vec!["soft:api", "hard:api", "soft:api"]
    );
    assert!(!engine.should_attempt_recovery(&tracker));
}

#[tokio::test]
async fn strategies_are_selected_by_consecutive_failures() {
    let notifier = Arc::new(MemoryNotifier::new());
    let clock = Arc::new(ManualClock::default());
    let calls = Arc::new(Mutex::new(Vec::new()));
    let engine = RecoveryEngine::builder(RecoveryConfig::default())
        .strategy(
            "worker",
            strategy("gentle", true, &calls).when(Condition::ConsecutiveBelow(3)),
        )
        .strategy(
            "worker",
            strategy("forced", true, &calls).when(Condition::ConsecutiveAbove(2)),
        )
        .notifier(notifier.clone())
        .clock(clock)
        .build();

    engine.update_failure_tracker("worker", false);
    engine.update_failure_tracker("worker", false);
    let first = engine.attempt_recovery("worker").await;
    assert_eq!(
        first.result,
        RoundResult::Recovered {
            strategy: "gentle".into()
        }
    );

    engine.update_failure_tracker("worker", false);
    let second = engine.attempt_recovery("worker").await;
    assert_eq!(
        second.result,
        RoundResult::Recovered {
            strategy: "forced".into()
        }
    );
    assert_eq!(*calls.lock(), vec!["gentle:worker", "forced:worker"]);
}

#[tokio::test]
async fn successful_strategy_stops_round_and_marks_healthy() {
    let notifier = Arc::new(MemoryNotifier::new());
    let clock = Arc::new(ManualClock::default());
    let calls = Arc::new(Mutex::new(Vec::new()));
    let engine = RecoveryEngine::builder(RecoveryConfig::default())
        .strategy("queue", strategy("restart", true, &calls))
        .strategy("queue", strategy("recreate", true, &calls))
        .notifier(notifier.clone())
        .clock(clock)
        .build();

    engine.detect_and_heal(&observation("queue", false)).await;
    engine.wait_idle().await;

    let tracker = engine.service_failure_status("queue").unwrap();
    assert_eq!(tracker.current_status, ServiceStatus::Healthy);
    assert_eq!(tracker.recent_attempts().count(), 1);
    assert!(tracker.last_attempt().unwrap().success);
    assert_eq!(*calls.lock(), vec!["restart:queue"]);

    let info = notifier.alerts_at(AlertLevel::Info);
    assert_eq!(info.len(), 1);
    assert_eq!(info[0].message, "Service queue recovered using strategy restart");
}

#[tokio::test]
async fn healthy_reading_resets_consecutive_failures() {
    let engine = RecoveryEngine::builder(RecoveryConfig::default())
        .notifier(Arc::new(MemoryNotifier::new()))
        .clock(Arc::new(ManualClock::default()))
        .build();

    assert!(engine.update_failure_tracker("db", true).is_none());
    for _ in 0..3 {
        engine.update_failure_tracker("db", false);
    }
    let tracker = engine.update_failure_tracker("db", true).unwrap();
    assert_eq!(tracker.consecutive_failures, 0);
    assert_eq!(tracker.failure_count, 3);
    assert_eq!(tracker.current_status, ServiceStatus::Healthy);
    assert_eq!(engine.all_failure_statuses().len(), 1);
}

#[tokio::test]
async fn unconfigured_service_warns_and_stays_failed() {
    let notifier = Arc::new(MemoryNotifier::new());
    let engine = RecoveryEngine::builder(RecoveryConfig::default())
        .notifier(notifier.clone())
        .clock(Arc::new(ManualClock::default()))
        .build();

    engine.update_failure_tracker("ghost", false);
    let outcome = engine.attempt_recovery("ghost").await;

    assert_eq!(outcome.result, RoundResult::NotConfigured);
    let tracker = engine.service_failure_status("ghost").unwrap();
    assert_eq!(tracker.current_status, ServiceStatus::Failed);
    assert!(tracker.last_recovery_attempt.is_some());
    assert!(notifier.alerts().is_empty());
}

#[tokio::test]
async fn second_task_is_refused_while_one_is_in_flight() {
    let clock = Arc::new(ManualClock::default());
    let gate = Arc::new(Notify::new());
    let engine = RecoveryEngine::builder(RecoveryConfig::default())
        .strategy(
            "search",
            RecoveryStrategy::new("reindex", Arc::new(Gated(gate.clone()))),
        )
        .notifier(Arc::new(MemoryNotifier::new()))
        .clock(clock.clone())
        .build();

    let first = engine.detect_and_heal(&observation("search", false)).await;
    assert_eq!(first.recoveries, vec!["search".to_string()]);
    assert!(engine.in_flight("search"));

    assert_eq!(
        engine.attempt_recovery("search").await.result,
        RoundResult::Busy
    );
    clock.advance(Duration::from_secs(31));
    let second = engine.detect_and_heal(&observation("search", false)).await;
    assert_eq!(second.busy, vec!["search".to_string()]);

    gate.notify_one();
    engine.wait_idle().await;
    assert!(!engine.in_flight("search"));
    assert_eq!(
        engine.service_failure_status("search").unwrap().total_attempts,
        1
    );
}

#[tokio::test(start_paused = true)]
async fn timed_out_action_counts_as_failed_attempt() {
    let notifier = Arc::new(MemoryNotifier::new());
    let engine = RecoveryEngine::builder(RecoveryConfig::default())
        .strategy(
            "batch",
            RecoveryStrategy::new("drain", Arc::new(Stalled)).with_timeout(Duration::from_secs(5)),
        )
        .notifier(notifier.clone())
        .clock(Arc::new(ManualClock::default()))
        .build();

    engine.update_failure_tracker("batch", false);
    let outcome = engine.attempt_recovery("batch").await;

    assert_eq!(outcome.result, RoundResult::Exhausted);
    assert_eq!(outcome.attempts, 1);
    let tracker = engine.service_failure_status("batch").unwrap();
    let attempt = tracker.last_attempt().unwrap();
    assert!(!attempt.success);
    assert!(attempt.error.as_deref().unwrap().contains("exceeded its timeout"));
    assert_eq!(
        notifier.alerts_at(AlertLevel::Error)[0].message,
        "All recovery strategies failed for service batch"
    );
}

#[tokio::test]
async fn ineligible_strategies_raise_warning() {
    let notifier = Arc::new(MemoryNotifier::new());
    let calls = Arc::new(Mutex::new(Vec::new()));
    let engine = RecoveryEngine::builder(RecoveryConfig::default())
        .strategy(
            "cdn",
            strategy("recreate", true, &calls).when(Condition::ConsecutiveAbove(5)),
        )
        .notifier(notifier.clone())
        .clock(Arc::new(ManualClock::default()))
        .build();

    engine.update_failure_tracker("cdn", false);
    let outcome = engine.attempt_recovery("cdn").await;

    assert_eq!(outcome.result, RoundResult::NoEligibleStrategy);
    assert!(calls.lock().is_empty());
    assert_eq!(notifier.alerts_at(AlertLevel::Warning).len(), 1);
}

#[tokio::test]
async fn mitigated_escalation_feeds_autonomy_metrics() {
    let registry = new_registry();
    let metrics = HealingMetrics::new(registry.clone()).unwrap();
    let notifier = Arc::new(MemoryNotifier::new());
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::default());
    let escalation = Arc::new(
        EscalationEngine::with_default_strategies(
            EscalationConfig {
                cascade_threshold: 2,
                ..EscalationConfig::default()
            },
            notifier.clone(),
            clock.clone(),
        )
        .with_metrics(metrics.clone()),
    );
    let calls = Arc::new(Mutex::new(Vec::new()));
    let engine = RecoveryEngine::builder(recovery_config(1, 3))
        .strategy("ledger", strategy("restart", false, &calls))
        .notifier(notifier.clone())
        .escalation(escalation.clone())
        .clock(clock.clone())
        .metrics(metrics.clone())
        .build();

    for _ in 0..3 {
        engine.detect_and_heal(&observation("ledger", false)).await;
        engine.wait_idle().await;
    }

    let history = escalation.decision_history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].decision_type, CASCADE_FAILURE);
    assert!(history[0].success);
    assert_eq!(notifier.events_named("cascade_containment_step").len(), 3);

    let monitor = AutonomyMonitor::new(AutonomyConfig::default(), escalation, clock)
        .with_metrics(metrics.clone());
    let snapshot = monitor.metrics();
    let ledger = &snapshot["ledger"];
    assert_eq!(ledger.autonomy_level, 1.0);
    assert_eq!(ledger.band, AutonomyBand::High);
    assert_eq!(ledger.self_healing_count, 1);
    assert!(ledger.last_intervention.is_none());

    let text = render_text(&registry).unwrap();
    assert!(text.contains("warden_recovery_attempts_total"));
    assert!(text.contains("warden_escalations_total"));
    assert!(text.contains("warden_autonomy_level{service=\"ledger\"} 1"));
}

#[tokio::test]
async fn failure_reading_during_successful_round_is_kept() {
    let clock = Arc::new(ManualClock::default());
    let gate = Arc::new(Notify::new());
    let engine = RecoveryEngine::builder(RecoveryConfig::default())
        .strategy(
            "search",
            RecoveryStrategy::new("reindex", Arc::new(Gated(gate.clone()))),
        )
        .notifier(Arc::new(MemoryNotifier::new()))
        .clock(clock.clone())
        .build();

    engine.detect_and_heal(&observation("search", false)).await;
    for _ in 0..16 {
        tokio::task::yield_now().await;
        let status = engine.service_failure_status("search").unwrap().current_status;
        if status == ServiceStatus::Recovering {
            break;
        }
    }
    assert_eq!(
        engine.service_failure_status("search").unwrap().current_status,
        ServiceStatus::Recovering
    );

    clock.advance(Duration::from_secs(1));
    let mid_round = engine.detect_and_heal(&observation("search", false)).await;
    assert_eq!(mid_round.waiting, vec!["search".to_string()]);

    gate.notify_one();
    engine.wait_idle().await;

    let tracker = engine.service_failure_status("search").unwrap();
    assert!(tracker.last_attempt().unwrap().success);
    assert_eq!(tracker.successful_attempts, 1);
    assert_eq!(tracker.consecutive_failures, 2);
    assert_eq!(tracker.current_status, ServiceStatus::Failed);
}

#[tokio::test]
async fn unreachable_notifier_does_not_abort_round() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let engine = RecoveryEngine::builder(RecoveryConfig::default())
        .strategy("api", strategy("bad", false, &calls))
        .strategy("api", strategy("ok", true, &calls))
        .notifier(Arc::new(DownNotifier))
        .clock(Arc::new(ManualClock::default()))
        .build();

    engine.update_failure_tracker("api", false);
    let outcome = engine.attempt_recovery("api").await;

    assert_eq!(
        outcome.result,
        RoundResult::Recovered {
            strategy: "ok".into()
        }
    );
    assert_eq!(outcome.attempts, 2);
    assert_eq!(*calls.lock(), vec!["bad:api", "ok:api"]);
    let tracker = engine.service_failure_status("api").unwrap();
    assert_eq!(tracker.total_attempts, 2);
    assert_eq!(tracker.current_status, ServiceStatus::Healthy);
}

#[tokio::test]
async fn manual_intervention_is_reported_even_when_notifier_is_down() {
    let clock = Arc::new(ManualClock::default());
    let escalation = EscalationEngine::new(
        EscalationConfig::default(),
        Arc::new(DownNotifier),
        clock.clone(),
    );
    let mut tracker = ServiceFailureTracker::new("cache", clock.now(), 8);
    tracker.record_failure(clock.now());

    let err = escalation
        .handle_service_failure("cache", &tracker)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        HealingError::ManualInterventionRequired { ref service, .. } if service == "cache"
    ));
    assert_eq!(escalation.decision_history().len(), 1);

    let notice = escalation
        .notify_escalation("cache", "Consecutive failures: 1, Recovery attempts: 0")
        .await
        .unwrap_err();
    assert!(matches!(notice, HealingError::Notification(_)));
}

#[tokio::test]
async fn exhausted_attempt_cap_is_reported_without_warning() {
    let notifier = Arc::new(MemoryNotifier::new());
    let calls = Arc::new(Mutex::new(Vec::new()));
    let engine = RecoveryEngine::builder(recovery_config(1, 5))
        .strategy("db", strategy("restart", false, &calls))
        .notifier(notifier.clone())
        .clock(Arc::new(ManualClock::default()))
        .build();

    engine.update_failure_tracker("db", false);
    assert_eq!(engine.attempt_recovery("db").await.result, RoundResult::Exhausted);

    let capped = engine.attempt_recovery("db").await;
    assert_eq!(capped.result, RoundResult::CapReached);
    assert_eq!(capped.attempts, 0);
    assert_eq!(calls.lock().len(), 1);
    assert!(notifier.alerts_at(AlertLevel::Warning).is_empty());
    assert_eq!(notifier.alerts_at(AlertLevel::Error).len(), 1);
    assert_eq!(
        engine.service_failure_status("db").unwrap().current_status,
        ServiceStatus::Failed
    );
}
