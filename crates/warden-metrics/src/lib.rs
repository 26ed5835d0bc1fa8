//! ---
//! warden_section: "03-observability"
//! warden_subsection: "module"
//! warden_type: "source"
//! warden_scope: "code"
//! warden_description: "Metrics collection utilities."
//! warden_version: "v0.0.0-prealpha"
//! warden_owner: "tbd"
//! ---
use std::sync::Arc;

use anyhow::{Context, Result};
use prometheus::{Registry, TextEncoder};

/// Shared registry type used across components.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Encode every gathered family in the Prometheus text exposition format.
pub fn render_text(registry: &Registry) -> Result<String> {
    let families = registry.gather();
    TextEncoder::new()
        .encode_to_string(&families)
        .context("failed to encode metrics")
}

pub use prometheus;
