//! ---
//! warden_section: "07-resilience-fault-tolerance"
//! warden_subsection: "module"
//! warden_type: "source"
//! warden_scope: "code"
//! warden_description: "Recovery, escalation, and autonomy engine."
//! warden_version: "v0.0.0-prealpha"
//! warden_owner: "tbd"
//! ---
//! Lifecycle for the periodic detection and autonomy loops.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::autonomy::AutonomyMonitor;
use crate::error::HealingError;
use crate::health::HealthSource;
use crate::recovery::{CycleReport, RecoveryEngine};

/// Collect one batch of observations and feed it to the engine.
pub async fn run_cycle(
    engine: &RecoveryEngine,
    source: &dyn HealthSource,
) -> crate::error::Result<CycleReport> {
    let observations = source.collect().await.map_err(HealingError::HealthSource)?;
    Ok(engine.detect_and_heal(&observations).await)
}

pub struct HealingSupervisor {
    engine: Arc<RecoveryEngine>,
    monitor: Arc<AutonomyMonitor>,
    interval: Duration,
}

impl HealingSupervisor {
    pub fn new(
        engine: Arc<RecoveryEngine>,
        monitor: Arc<AutonomyMonitor>,
        interval: Duration,
    ) -> Self {
        Self {
            engine,
            monitor,
            interval,
        }
    }

    /// Supervisor driven at the engine's configured detection interval.
    pub fn with_configured_interval(
        engine: Arc<RecoveryEngine>,
        monitor: Arc<AutonomyMonitor>,
    ) -> Self {
        let interval = engine.config().detection_interval;
        Self::new(engine, monitor, interval)
    }

    /// Spawn the detection and autonomy loops and return a handle for lifecycle control.
    pub fn start(self, source: Arc<dyn HealthSource>) -> HealingHandle {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(4);

        let detection = tokio::spawn(detection_loop(
            self.engine.clone(),
            source,
            self.interval,
            shutdown_rx.resubscribe(),
        ));

        let monitor = self.monitor.clone();
        let autonomy = tokio::spawn(async move { monitor.run(shutdown_rx).await });

        info!(
            target: "warden::supervisor",
            interval_ms = self.interval.as_millis() as u64,
            "healing supervisor started",
        );

        HealingHandle {
            shutdown: shutdown_tx,
            engine: self.engine,
            monitor: self.monitor,
            loops: vec![detection, autonomy],
        }
    }
}

async fn detection_loop(
    engine: Arc<RecoveryEngine>,
    source: Arc<dyn HealthSource>,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                debug!(target: "warden::supervisor", "detection loop shutdown signal received");
                break;
            }
            _ = ticker.tick() => {
                match run_cycle(&engine, source.as_ref()).await {
                    Ok(report) => debug!(
                        target: "warden::supervisor",
                        recoveries = report.recoveries.len(),
                        escalations = report.escalations.len(),
                        busy = report.busy.len(),
                        waiting = report.waiting.len(),
                        "detection cycle complete",
                    ),
                    Err(err) => warn!(
                        target: "warden::supervisor",
                        error = %err,
                        "health collection failed"
                    ),
                }
            }
        }
    }
}

/// Handle returned by [`HealingSupervisor::start`].
pub struct HealingHandle {
    shutdown: broadcast::Sender<()>,
    engine: Arc<RecoveryEngine>,
    monitor: Arc<AutonomyMonitor>,
    loops: Vec<JoinHandle<()>>,
}

impl HealingHandle {
    pub fn engine(&self) -> Arc<RecoveryEngine> {
        self.engine.clone()
    }

    pub fn monitor(&self) -> Arc<AutonomyMonitor> {
        self.monitor.clone()
    }

    /// Stop both loops, then wait for in-flight recovery and escalation tasks
    /// to finish on their own timeouts.
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown.send(());
        for handle in self.loops {
            handle.await.context("healing loop terminated abnormally")?;
        }
        self.engine.wait_idle().await;
        info!(target: "warden::supervisor", "healing supervisor shutdown complete");
        Ok(())
    }
}
