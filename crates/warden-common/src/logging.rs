//! ---
//! warden_section: "01-core-functionality"
//! warden_subsection: "module"
//! warden_type: "source"
//! warden_scope: "code"
//! warden_description: "Shared primitives and utilities for the control plane."
//! warden_version: "v0.0.0-prealpha"
//! warden_owner: "tbd"
//! ---
use anyhow::{bail, Context, Result};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::daily;
use tracing_subscriber::filter::{Directive, EnvFilter, LevelFilter};
use tracing_subscriber::fmt;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;

const LOG_ENV: &str = "WARDEN_LOG";

/// Tracing targets emitted by the control-plane components.
pub const COMPONENT_TARGETS: &[&str] = &[
    "warden::recovery",
    "warden::escalation",
    "warden::notify",
    "warden::autonomy",
    "warden::supervisor",
    "warden::logging",
];

static FILE_GUARD: OnceCell<WorkerGuard> = OnceCell::new();
static STDOUT_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

/// Output format for the stdout log layer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    #[default]
    StructuredJson,
    Pretty,
}

/// Initialize the tracing subscriber for a Warden process.
///
/// `WARDEN_LOG` (then `RUST_LOG`) replaces the configured filter when set and
/// valid. Otherwise the filter is `config.level` plus the per-component
/// `config.directives`. Stdout receives the configured format while a daily
/// rolling JSON file is written under `config.directory`.
pub fn init_tracing(service_name: &str, config: &LoggingConfig) -> Result<()> {
    std::fs::create_dir_all(&config.directory).with_context(|| {
        format!("creating log directory {}", config.directory.display())
    })?;
    let filter = resolve_filter(env_override().as_deref(), config)?;
    let prefix = config.file_prefix.as_deref().unwrap_or("warden");

    let file_appender = daily(&config.directory, format!("{prefix}-{service_name}.log"));
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);
    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
    let _ = FILE_GUARD.set(file_guard);
    let _ = STDOUT_GUARD.set(stdout_guard);

    // Component targets stay visible in both formats.
    let stdout_layer = match config.format {
        LogFormat::StructuredJson => fmt::layer()
            .with_target(true)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .json()
            .with_writer(stdout_writer)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_target(true)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_writer(stdout_writer)
            .boxed(),
    };
    let file_layer = fmt::layer()
        .with_target(true)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .json()
        .with_writer(file_writer)
        .boxed();

    let filter_text = filter.to_string();
    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .is_ok();

    info!(
        target: "warden::logging",
        service = %service_name,
        log_dir = %config.directory.display(),
        format = ?config.format,
        filter = %filter_text,
        installed,
        "tracing initialised"
    );
    Ok(())
}

/// Parse the configured base level and per-component overrides.
///
/// Overrides naming a `warden::` target must name one of [`COMPONENT_TARGETS`]
/// (or a module below one); a typo there would otherwise silence nothing.
pub fn filter_directives(config: &LoggingConfig) -> Result<Vec<Directive>> {
    let mut directives = Vec::with_capacity(config.directives.len() + 1);
    let level = config
        .level
        .parse::<LevelFilter>()
        .with_context(|| format!("invalid logging.level {:?}", config.level))?;
    directives.push(Directive::from(level));
    for raw in &config.directives {
        let target = raw.split(['=', '[']).next().unwrap_or_default();
        if target.starts_with("warden::") && !is_component_target(target) {
            bail!("logging directive {raw:?} names unknown component {target:?}");
        }
        directives.push(
            raw.parse::<Directive>()
                .with_context(|| format!("invalid logging directive {raw:?}"))?,
        );
    }
    Ok(directives)
}

fn is_component_target(target: &str) -> bool {
    COMPONENT_TARGETS.iter().any(|component| {
        target == *component
            || target
                .strip_prefix(component)
                .is_some_and(|rest| rest.starts_with("::"))
    })
}

fn env_override() -> Option<String> {
    std::env::var(LOG_ENV)
        .or_else(|_| std::env::var("RUST_LOG"))
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn resolve_filter(env_directive: Option<&str>, config: &LoggingConfig) -> Result<EnvFilter> {
    if let Some(directive) = env_directive {
        match EnvFilter::try_new(directive) {
            Ok(filter) => return Ok(filter),
            Err(err) => eprintln!("invalid {LOG_ENV} directive ({err}); using configured filter"),
        }
    }
    let joined = filter_directives(config)?
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",");
    EnvFilter::try_new(&joined).with_context(|| format!("building log filter {joined:?}"))
}
