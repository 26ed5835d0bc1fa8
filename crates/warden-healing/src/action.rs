//! ---
//! warden_section: "07-resilience-fault-tolerance"
//! warden_subsection: "module"
//! warden_type: "source"
//! warden_scope: "code"
//! warden_description: "Recovery, escalation, and autonomy engine."
//! warden_version: "v0.0.0-prealpha"
//! warden_owner: "tbd"
//! ---
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;

use crate::error::HealingError;
use crate::tracker::ServiceFailureTracker;

/// Side-effecting operation that tries to fix one service (restart a
/// container, fail over a replica, ...).
///
/// The tracker passed in is a snapshot taken right before execution.
#[async_trait]
pub trait RemediationAction: Send + Sync {
    async fn execute(&self, service: &str, tracker: &ServiceFailureTracker) -> Result<()>;
}

/// Result of one timeout-bounded action run.
#[derive(Debug)]
pub(crate) struct ActionRun {
    pub result: std::result::Result<(), anyhow::Error>,
    pub elapsed: Duration,
}

impl ActionRun {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }

    pub fn error_text(&self) -> Option<String> {
        self.result.as_ref().err().map(|err| format!("{err:#}"))
    }
}

/// Run `action` and drop it if it outlives `timeout`; expiry counts as a failure.
pub(crate) async fn run_bounded(
    action: &dyn RemediationAction,
    strategy: &str,
    timeout: Duration,
    service: &str,
    tracker: &ServiceFailureTracker,
) -> ActionRun {
    let started = Instant::now();
    let result = match tokio::time::timeout(timeout, action.execute(service, tracker)).await {
        Ok(result) => result,
        Err(_) => Err(HealingError::ActionTimedOut {
            strategy: strategy.to_owned(),
            timeout,
        }
        .into()),
    };
    ActionRun {
        result,
        elapsed: started.elapsed(),
    }
}
