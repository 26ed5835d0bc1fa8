//! ---
//! warden_section: "07-resilience-fault-tolerance"
//! warden_subsection: "module"
//! warden_type: "source"
//! warden_scope: "code"
//! warden_description: "Recovery, escalation, and autonomy engine."
//! warden_version: "v0.0.0-prealpha"
//! warden_owner: "tbd"
//! ---
//! Outbound alert and event port.
//!
//! Delivery (console, file, webhook) belongs to the notification layer; the
//! engine only talks to [`NotificationPort`]. [`TracingNotifier`] is the
//! default sink and [`MemoryNotifier`] records everything for inspection.

use std::fmt;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

/// Severity of an alert sent to the notification layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
    Escalation,
    ManualIntervention,
}

impl AlertLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::Debug => "debug",
            AlertLevel::Info => "info",
            AlertLevel::Warning => "warning",
            AlertLevel::Error => "error",
            AlertLevel::Critical => "critical",
            AlertLevel::Escalation => "escalation",
            AlertLevel::ManualIntervention => "manual_intervention",
        }
    }
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured event payload.
pub type EventDetails = Map<String, Value>;

#[async_trait]
pub trait NotificationPort: Send + Sync {
    async fn send_alert(&self, level: AlertLevel, service: &str, message: &str) -> Result<()>;

    async fn log_event(&self, event: &str, details: EventDetails) -> Result<()>;
}

/// Emits alerts and events as tracing records under `warden::notify`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

#[async_trait]
impl NotificationPort for TracingNotifier {
    async fn send_alert(&self, level: AlertLevel, service: &str, message: &str) -> Result<()> {
        match level {
            AlertLevel::Debug => {
                debug!(
                    target: "warden::notify",
                    alert_level = %level,
                    service,
                    text = message,
                    "alert"
                )
            }
            AlertLevel::Info => {
                info!(
                    target: "warden::notify",
                    alert_level = %level,
                    service,
                    text = message,
                    "alert"
                )
            }
            AlertLevel::Warning => {
                warn!(
                    target: "warden::notify",
                    alert_level = %level,
                    service,
                    text = message,
                    "alert"
                )
            }
            AlertLevel::Error
            | AlertLevel::Critical
            | AlertLevel::Escalation
            | AlertLevel::ManualIntervention => {
                error!(
                    target: "warden::notify",
                    alert_level = %level,
                    service,
                    text = message,
                    "alert"
                )
            }
        }
        Ok(())
    }

    async fn log_event(&self, event: &str, details: EventDetails) -> Result<()> {
        let payload = Value::Object(details);
        info!(target: "warden::notify", event, details = %payload, "event");
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedAlert {
    pub level: AlertLevel,
    pub service: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedEvent {
    pub event: String,
    pub details: EventDetails,
    pub at: DateTime<Utc>,
}

/// In-memory notifier keeping every alert and event in arrival order.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    alerts: Mutex<Vec<RecordedAlert>>,
    events: Mutex<Vec<RecordedEvent>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<RecordedAlert> {
        self.alerts.lock().clone()
    }

    pub fn alerts_at(&self, level: AlertLevel) -> Vec<RecordedAlert> {
        self.alerts
            .lock()
            .iter()
            .filter(|alert| alert.level == level)
            .cloned()
            .collect()
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().clone()
    }

    pub fn events_named(&self, event: &str) -> Vec<RecordedEvent> {
        self.events
            .lock()
            .iter()
            .filter(|recorded| recorded.event == event)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl NotificationPort for MemoryNotifier {
    async fn send_alert(&self, level: AlertLevel, service: &str, message: &str) -> Result<()> {
        self.alerts.lock().push(RecordedAlert {
            level,
            service: service.to_owned(),
            message: message.to_owned(),
            at: Utc::now(),
        });
        Ok(())
    }

    async fn log_event(&self, event: &str, details: EventDetails) -> Result<()> {
        self.events.lock().push(RecordedEvent {
            event: event.to_owned(),
            details,
            at: Utc::now(),
        });
        Ok(())
    }
}
