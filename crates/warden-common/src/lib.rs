//! ---
//! warden_section: "01-core-functionality"
//! warden_subsection: "module"
//! warden_type: "source"
//! warden_scope: "code"
//! warden_description: "Shared primitives and utilities for the control plane."
//! warden_version: "v0.0.0-prealpha"
//! warden_owner: "tbd"
//! ---
//! Shared primitives for the Warden workspace.
//! This crate exposes configuration loading, logging setup, and the clock
//! abstraction consumed by the healing engine.

pub mod config;
pub mod logging;
pub mod time;

pub use config::{
    AutonomyConfig, EscalationConfig, LoadedConfig, LoggingConfig, RecoveryConfig, WardenConfig,
};
pub use logging::{init_tracing, LogFormat};
pub use time::{elapsed_since, Clock, ManualClock, SystemClock};
