//! Structured logging & tracing
//!
//! Provides structured logging via the `tracing` crate with:
//! - One level per pipeline stage (scheduler, filters, fragmenter, ...)
//! - Timed spans around demolition polls and cluster transactions
//! - Idempotent initialization (safe next to Bevy's own LogPlugin)

use std::sync::Once;
use std::time::Instant;

use bevy::prelude::*;
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

pub struct LoggingPlugin;

impl Plugin for LoggingPlugin {
    fn build(&self, _app: &mut App) {
        init_tracing_default();
    }
}

/// Log level for the demolition pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Level for each pipeline stage, keyed by the module that logs it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineLevels {
    /// Batch plans and job progress
    pub scheduler: LogLevel,
    /// Per-stage removal counts
    pub filters: LogLevel,
    pub fragmenter: LogLevel,
    /// Spawning, reactivation and give-up warnings
    pub demolition: LogLevel,
    /// Conversion commits and rollbacks
    pub cluster: LogLevel,
    pub plugin: LogLevel,
}

impl Default for PipelineLevels {
    fn default() -> Self {
        Self {
            scheduler: LogLevel::Info,
            filters: LogLevel::Info,
            fragmenter: LogLevel::Warn,
            demolition: LogLevel::Info,
            cluster: LogLevel::Debug,
            plugin: LogLevel::Info,
        }
    }
}

impl PipelineLevels {
    /// Same level for every stage.
    pub fn uniform(level: LogLevel) -> Self {
        Self {
            scheduler: level,
            filters: level,
            fragmenter: level,
            demolition: level,
            cluster: level,
            plugin: level,
        }
    }

    fn targets(&self) -> [(&'static str, LogLevel); 6] {
        [
            ("scheduler", self.scheduler),
            ("filters", self.filters),
            ("fragmenter", self.fragmenter),
            ("demolition", self.demolition),
            ("cluster", self.cluster),
            ("plugin", self.plugin),
        ]
    }
}

/// Configuration for tracing initialization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TracingConfig {
    /// Level for everything outside the pipeline (bevy, rapier, ...)
    pub default_level: LogLevel,
    pub pipeline: PipelineLevels,
    pub show_targets: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            default_level: LogLevel::Warn,
            pipeline: PipelineLevels::default(),
            show_targets: true,
        }
    }
}

impl TracingConfig {
    pub fn to_env_filter_string(&self) -> String {
        let mut parts = vec![self.default_level.as_str().to_string()];
        for (stage, level) in self.pipeline.targets() {
            parts.push(format!("mesh_demolition::{}={}", stage, level.as_str()));
        }
        parts.join(",")
    }
}

static TRACING_INIT: Once = Once::new();

/// Initialize tracing with default settings (idempotent)
pub fn init_tracing_default() {
    init_tracing(&TracingConfig::default());
}

/// Initialize tracing with custom config (first call wins, `RUST_LOG` overrides)
pub fn init_tracing(config: &TracingConfig) {
    let filter_str = config.to_env_filter_string();
    let show_targets = config.show_targets;
    TRACING_INIT.call_once(move || {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(show_targets)
            .with_thread_ids(false)
            .compact();

        // A global subscriber may already be installed by the host
        let _ = subscriber.try_init();
    });
}

/// Enters a named span for the lifetime of the guard and reports the
/// elapsed time at trace level when dropped.
pub struct TimingSpan {
    operation: &'static str,
    started: Instant,
    _span: tracing::span::EnteredSpan,
}

impl TimingSpan {
    pub fn new(operation: &'static str) -> Self {
        let span = tracing::info_span!("operation", name = operation);
        Self {
            operation,
            started: Instant::now(),
            _span: span.entered(),
        }
    }
}

impl Drop for TimingSpan {
    fn drop(&mut self) {
        tracing::trace!(
            operation = self.operation,
            elapsed_us = self.started.elapsed().as_micros() as u64,
            "finished"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_as_str() {
        assert_eq!(LogLevel::Trace.as_str(), "trace");
        assert_eq!(LogLevel::Warn.as_str(), "warn");
        assert_eq!(LogLevel::Error.as_str(), "error");
    }

    #[test]
    fn test_env_filter_string() {
        let config = TracingConfig::default();
        let filter = config.to_env_filter_string();
        assert!(filter.starts_with("warn"));
        assert!(filter.contains("mesh_demolition::cluster=debug"));
        assert!(filter.contains("mesh_demolition::scheduler=info"));
        assert!(filter.contains("mesh_demolition::fragmenter=warn"));
    }

    #[test]
    fn test_partial_config_keeps_stage_defaults() {
        let config: TracingConfig =
            serde_json::from_str(r#"{"pipeline": {"filters": "Trace"}}"#).unwrap();
        assert_eq!(config.pipeline.filters, LogLevel::Trace);
        assert_eq!(config.pipeline.cluster, LogLevel::Debug);
        assert_eq!(config.default_level, LogLevel::Warn);
    }

    #[test]
    fn test_init_tracing_idempotent() {
        init_tracing_default();
        init_tracing_default();
        init_tracing(&TracingConfig {
            default_level: LogLevel::Trace,
            pipeline: PipelineLevels::uniform(LogLevel::Trace),
            show_targets: false,
        });
    }

    #[test]
    fn test_timing_span() {
        init_tracing_default();
        let _span = TimingSpan::new("test_operation");
        tracing::debug!("inside span");
    }
}
