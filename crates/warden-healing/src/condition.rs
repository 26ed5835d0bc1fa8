//! ---
//! warden_section: "07-resilience-fault-tolerance"
//! warden_subsection: "module"
//! warden_type: "source"
//! warden_scope: "code"
//! warden_description: "Recovery, escalation, and autonomy engine."
//! warden_version: "v0.0.0-prealpha"
//! warden_owner: "tbd"
//! ---
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::tracker::ServiceFailureTracker;

type Predicate = dyn Fn(&str, &ServiceFailureTracker) -> bool + Send + Sync;

/// Gate evaluated against a service's tracker before a strategy may run.
#[derive(Clone)]
pub enum Condition {
    /// `consecutive_failures < n`
    ConsecutiveBelow(u32),
    /// `consecutive_failures > n`
    ConsecutiveAbove(u32),
    /// At least `n` recovery attempts recorded over the tracker lifetime.
    AttemptsAtLeast(usize),
    /// The first failure happened more than the given duration ago.
    FailingLongerThan(Duration),
    ServiceIn(BTreeSet<String>),
    Custom {
        label: String,
        predicate: Arc<Predicate>,
    },
}

impl Condition {
    pub fn service_in<I, S>(services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Condition::ServiceIn(services.into_iter().map(Into::into).collect())
    }

    pub fn custom<F>(label: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&str, &ServiceFailureTracker) -> bool + Send + Sync + 'static,
    {
        Condition::Custom {
            label: label.into(),
            predicate: Arc::new(predicate),
        }
    }

    pub fn holds(
        &self,
        service: &str,
        tracker: &ServiceFailureTracker,
        now: DateTime<Utc>,
    ) -> bool {
        match self {
            Condition::ConsecutiveBelow(n) => tracker.consecutive_failures < *n,
            Condition::ConsecutiveAbove(n) => tracker.consecutive_failures > *n,
            Condition::AttemptsAtLeast(n) => tracker.total_attempts >= *n,
            Condition::FailingLongerThan(limit) => tracker.failing_for(now) > *limit,
            Condition::ServiceIn(services) => services.contains(service),
            Condition::Custom { predicate, .. } => predicate(service, tracker),
        }
    }
}

/// Logical AND over a condition list. An empty list always holds.
pub fn all_hold(
    conditions: &[Condition],
    service: &str,
    tracker: &ServiceFailureTracker,
    now: DateTime<Utc>,
) -> bool {
    conditions
        .iter()
        .all(|condition| condition.holds(service, tracker, now))
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::ConsecutiveBelow(n) => write!(f, "consecutive_failures < {n}"),
            Condition::ConsecutiveAbove(n) => write!(f, "consecutive_failures > {n}"),
            Condition::AttemptsAtLeast(n) => write!(f, "recovery_attempts >= {n}"),
            Condition::FailingLongerThan(limit) => write!(f, "failing_for > {limit:?}"),
            Condition::ServiceIn(services) => write!(f, "service in {services:?}"),
            Condition::Custom { label, .. } => write!(f, "custom({label})"),
        }
    }
}
