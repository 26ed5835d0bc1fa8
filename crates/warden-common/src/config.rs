//! ---
//! warden_section: "01-core-functionality"
//! warden_subsection: "module"
//! warden_type: "source"
//! warden_scope: "code"
//! warden_description: "Shared primitives and utilities for the control plane."
//! warden_version: "v0.0.0-prealpha"
//! warden_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use tracing::debug;

use crate::logging::LogFormat;

fn default_max_retries() -> usize {
    3
}

fn default_retry_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_escalation_threshold() -> u32 {
    5
}

fn default_detection_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_history_limit() -> usize {
    32
}

fn default_critical_services() -> Vec<String> {
    vec!["database".to_owned(), "api-gateway".to_owned()]
}

fn default_critical_min_attempts() -> usize {
    3
}

fn default_cascade_threshold() -> u32 {
    5
}

fn default_resource_exhaustion_after() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_action_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_decision_history_limit() -> usize {
    1000
}

fn default_autonomy_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_high_threshold() -> f64 {
    0.8
}

fn default_medium_threshold() -> f64 {
    0.5
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_log_level() -> String {
    "info".to_owned()
}

/// Primary configuration object for a Warden control plane.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WardenConfig {
    #[serde(default)]
    pub recovery: RecoveryConfig,
    #[serde(default)]
    pub escalation: EscalationConfig,
    #[serde(default)]
    pub autonomy: AutonomyConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Metadata describing where a [`WardenConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: WardenConfig,
    pub source: PathBuf,
}

impl WardenConfig {
    pub const ENV_CONFIG_PATH: &str = "WARDEN_CONFIG";

    /// Load configuration from disk, respecting the `WARDEN_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            let path = candidate.as_ref();
            if path.exists() {
                let config = Self::from_path(path)?;
                return Ok(LoadedConfig {
                    config,
                    source: path.to_path_buf(),
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<WardenConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid config file {}", path.display()))?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.recovery.validate()?;
        self.escalation.validate()?;
        self.autonomy.validate()?;
        self.logging.validate()?;
        Ok(())
    }
}

impl std::str::FromStr for WardenConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: WardenConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Retry and escalation gating for the recovery engine.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Lifetime cap on recorded recovery attempts per service.
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    /// Minimum spacing between two recovery rounds for the same service.
    #[serde(default = "default_retry_delay")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub retry_delay: Duration,
    /// Consecutive failures at which the service is handed to escalation.
    #[serde(default = "default_escalation_threshold")]
    pub escalation_threshold: u32,
    /// Period of the detection loop.
    #[serde(default = "default_detection_interval")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub detection_interval: Duration,
    /// Number of attempts retained in each tracker's history ring.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay: default_retry_delay(),
            escalation_threshold: default_escalation_threshold(),
            detection_interval: default_detection_interval(),
            history_limit: default_history_limit(),
        }
    }
}

impl RecoveryConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_retries == 0 {
            return Err(anyhow!("recovery.max_retries must be at least 1"));
        }
        if self.escalation_threshold == 0 {
            return Err(anyhow!("recovery.escalation_threshold must be at least 1"));
        }
        if self.detection_interval.is_zero() {
            return Err(anyhow!("recovery.detection_interval must be non-zero"));
        }
        if self.history_limit == 0 {
            return Err(anyhow!("recovery.history_limit must be at least 1"));
        }
        Ok(())
    }
}

/// Thresholds for the built-in escalation strategies.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationConfig {
    #[serde(default = "default_critical_services")]
    pub critical_services: Vec<String>,
    /// Recorded recovery attempts required before critical handling kicks in.
    #[serde(default = "default_critical_min_attempts")]
    pub critical_min_attempts: usize,
    /// Cascade containment applies once consecutive failures exceed this value.
    #[serde(default = "default_cascade_threshold")]
    pub cascade_threshold: u32,
    #[serde(default = "default_resource_exhaustion_after")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub resource_exhaustion_after: Duration,
    #[serde(default = "default_action_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub action_timeout: Duration,
    #[serde(default = "default_decision_history_limit")]
    pub decision_history_limit: usize,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            critical_services: default_critical_services(),
            critical_min_attempts: default_critical_min_attempts(),
            cascade_threshold: default_cascade_threshold(),
            resource_exhaustion_after: default_resource_exhaustion_after(),
            action_timeout: default_action_timeout(),
            decision_history_limit: default_decision_history_limit(),
        }
    }
}

impl EscalationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.action_timeout.is_zero() {
            return Err(anyhow!("escalation.action_timeout must be non-zero"));
        }
        if self.decision_history_limit == 0 {
            return Err(anyhow!(
                "escalation.decision_history_limit must be at least 1"
            ));
        }
        Ok(())
    }

    pub fn is_critical(&self, service: &str) -> bool {
        self.critical_services.iter().any(|s| s == service)
    }
}

/// Scheduling and banding for autonomy scoring.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutonomyConfig {
    #[serde(default = "default_autonomy_interval")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub interval: Duration,
    #[serde(default = "default_high_threshold")]
    pub high_threshold: f64,
    #[serde(default = "default_medium_threshold")]
    pub medium_threshold: f64,
}

impl Default for AutonomyConfig {
    fn default() -> Self {
        Self {
            interval: default_autonomy_interval(),
            high_threshold: default_high_threshold(),
            medium_threshold: default_medium_threshold(),
        }
    }
}

impl AutonomyConfig {
    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(anyhow!("autonomy.interval must be non-zero"));
        }
        for (name, value) in [
            ("high_threshold", self.high_threshold),
            ("medium_threshold", self.medium_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow!("autonomy.{} must lie within [0, 1]", name));
            }
        }
        if self.medium_threshold > self.high_threshold {
            return Err(anyhow!(
                "autonomy.medium_threshold must not exceed autonomy.high_threshold"
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
    /// Base filter applied to every target.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Per-component overrides such as `warden::recovery=debug`.
    #[serde(default)]
    pub directives: Vec<String>,
}

impl LoggingConfig {
    /// Reject filter directives that would be silently dropped at startup.
    pub fn validate(&self) -> Result<()> {
        crate::logging::filter_directives(self).map(|_| ())
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
            level: default_log_level(),
            directives: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config: WardenConfig = "".parse().unwrap();
        assert_eq!(config.recovery.max_retries, 3);
        assert_eq!(config.recovery.retry_delay, Duration::from_secs(30));
        assert_eq!(config.recovery.escalation_threshold, 5);
        assert_eq!(
            config.escalation.resource_exhaustion_after,
            Duration::from_secs(1800)
        );
        assert!(config.escalation.is_critical("database"));
        assert_eq!(config.logging.format, LogFormat::StructuredJson);
    }

    #[test]
    fn sections_override_defaults() {
        let config: WardenConfig = r#"
            [recovery]
            max_retries = 5
            retry_delay = 10
            escalation_threshold = 7

            [escalation]
            critical_services = ["cache"]
            action_timeout = 15

            [autonomy]
            interval = 5
            high_threshold = 0.9

            [logging]
            format = "pretty"
            level = "warn"
            directives = ["warden::recovery=debug"]
        "#
        .parse()
        .unwrap();
        assert_eq!(config.recovery.max_retries, 5);
        assert_eq!(config.recovery.retry_delay, Duration::from_secs(10));
        assert_eq!(config.recovery.escalation_threshold, 7);
        assert!(config.escalation.is_critical("cache"));
        assert!(!config.escalation.is_critical("database"));
        assert_eq!(config.escalation.action_timeout, Duration::from_secs(15));
        assert_eq!(config.autonomy.interval, Duration::from_secs(5));
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert_eq!(config.logging.level, "warn");
        assert_eq!(config.logging.directives, vec!["warden::recovery=debug"]);
    }

    #[test]
    fn validation_rejects_degenerate_values() {
        assert!("[recovery]\nmax_retries = 0".parse::<WardenConfig>().is_err());
        assert!("[recovery]\nescalation_threshold = 0"
            .parse::<WardenConfig>()
            .is_err());
        assert!("[autonomy]\nmedium_threshold = 0.9\nhigh_threshold = 0.6"
            .parse::<WardenConfig>()
            .is_err());
        assert!("[autonomy]\nhigh_threshold = 1.5"
            .parse::<WardenConfig>()
            .is_err());
        assert!("[logging]\ndirectives = [\"warden::recovry=debug\"]"
            .parse::<WardenConfig>()
            .is_err());
    }

    #[test]
    fn load_picks_first_existing_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        let present = dir.path().join("warden.toml");
        fs::write(&present, "[recovery]\nmax_retries = 4\n").unwrap();

        let loaded = WardenConfig::load_with_source(&[missing.clone(), present.clone()]).unwrap();
        assert_eq!(loaded.source, present);
        assert_eq!(loaded.config.recovery.max_retries, 4);

        let err = WardenConfig::load(&[missing]).unwrap_err();
        assert!(err.to_string().contains("no configuration files found"));
    }
}
