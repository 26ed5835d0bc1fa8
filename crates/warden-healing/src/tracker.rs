//! ---
//! warden_section: "07-resilience-fault-tolerance"
//! warden_subsection: "module"
//! warden_type: "source"
//! warden_scope: "code"
//! warden_description: "Recovery, escalation, and autonomy engine."
//! warden_version: "v0.0.0-prealpha"
//! warden_owner: "tbd"
//! ---
//! Per-service failure and recovery history.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use warden_common::time::elapsed_since;

/// Lifecycle state of a monitored service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    #[default]
    Unknown,
    Healthy,
    Degraded,
    Failed,
    Recovering,
}

impl ServiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Unknown => "unknown",
            ServiceStatus::Healthy => "healthy",
            ServiceStatus::Degraded => "degraded",
            ServiceStatus::Failed => "failed",
            ServiceStatus::Recovering => "recovering",
        }
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One executed recovery strategy and its result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryAttempt {
    pub timestamp: DateTime<Utc>,
    pub strategy_name: String,
    pub success: bool,
    pub error: Option<String>,
    pub duration: Duration,
}

/// Failure/recovery record kept for every service that has failed at least once.
///
/// The attempt history is a bounded ring; `total_attempts` and
/// `successful_attempts` keep counting after old entries are evicted and are
/// what retry gating looks at.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceFailureTracker {
    service: String,
    pub failure_count: u64,
    pub consecutive_failures: u32,
    pub first_failure: DateTime<Utc>,
    pub last_failure: DateTime<Utc>,
    pub last_recovery_attempt: Option<DateTime<Utc>>,
    pub total_attempts: usize,
    pub successful_attempts: usize,
    pub current_status: ServiceStatus,
    recovery_attempts: VecDeque<RecoveryAttempt>,
    #[serde(skip)]
    history_limit: usize,
}

impl ServiceFailureTracker {
    /// Create an empty tracker. Counters start at zero; call
    /// [`record_failure`](Self::record_failure) to register the observation
    /// that caused the tracker to exist.
    pub fn new(service: impl Into<String>, now: DateTime<Utc>, history_limit: usize) -> Self {
        Self {
            service: service.into(),
            failure_count: 0,
            consecutive_failures: 0,
            first_failure: now,
            last_failure: now,
            last_recovery_attempt: None,
            total_attempts: 0,
            successful_attempts: 0,
            current_status: ServiceStatus::Unknown,
            recovery_attempts: VecDeque::with_capacity(history_limit.min(64)),
            history_limit: history_limit.max(1),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn record_failure(&mut self, now: DateTime<Utc>) {
        self.failure_count += 1;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_failure = now;
        self.current_status = ServiceStatus::Failed;
    }

    /// Apply a healthy observation. Attempt history and aggregate counters are kept.
    pub fn record_healthy(&mut self) {
        self.consecutive_failures = 0;
        self.current_status = ServiceStatus::Healthy;
    }

    pub fn begin_recovery(&mut self, now: DateTime<Utc>) {
        self.current_status = ServiceStatus::Recovering;
        self.last_recovery_attempt = Some(now);
    }

    pub fn record_attempt(&mut self, attempt: RecoveryAttempt) {
        self.total_attempts += 1;
        if attempt.success {
            self.successful_attempts += 1;
        }
        if self.recovery_attempts.len() == self.history_limit {
            self.recovery_attempts.pop_front();
        }
        self.recovery_attempts.push_back(attempt);
    }

    /// Most recent attempts, oldest first.
    pub fn recent_attempts(&self) -> impl DoubleEndedIterator<Item = &RecoveryAttempt> {
        self.recovery_attempts.iter()
    }

    pub fn last_attempt(&self) -> Option<&RecoveryAttempt> {
        self.recovery_attempts.back()
    }

    /// Time elapsed since the first recorded failure.
    pub fn failing_for(&self, now: DateTime<Utc>) -> Duration {
        elapsed_since(now, self.first_failure)
    }

    /// Time elapsed since the last recovery round started, if any.
    pub fn since_last_recovery(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.last_recovery_attempt
            .map(|started| elapsed_since(now, started))
    }
}
