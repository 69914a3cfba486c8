//! Diagnostic logging setup.
//!
//! `RUST_LOG` wins over the `[log]` section of the configuration file; with
//! neither present the level is `info`. Output is `pretty`, `compact` or
//! `json`.

use serde::Deserialize;
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// `[log]` section of the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LogConfig {
    /// error, warn, info, debug, trace
    #[serde(default = "default_level")]
    pub level: String,
    /// pretty, compact, json
    #[serde(default = "default_format")]
    pub format: String,
}

fn default_level() -> String {
    "info".to_string()
}

fn default_format() -> String {
    "pretty".to_string()
}

impl LogConfig {
    pub fn new() -> Self {
        Self {
            level: default_level(),
            format: default_format(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Installs the global subscriber. Later calls are ignored.
pub fn init_logging(config: Option<&LogConfig>) {
    let env_filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if let Some(cfg) = config {
        EnvFilter::new(parse_level(&cfg.level).as_str())
    } else {
        EnvFilter::new("info")
    };

    let format = config.map(|c| c.format.as_str()).unwrap_or("pretty");

    let _ = match format {
        "json" => tracing::subscriber::set_global_default(
            tracing_subscriber::registry().with(env_filter).with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_span_events(FmtSpan::CLOSE),
            ),
        ),
        "compact" => tracing::subscriber::set_global_default(
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().compact()),
        ),
        _ => tracing::subscriber::set_global_default(
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer()),
        ),
    };
}

fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "error" => Level::ERROR,
        "warn" => Level::WARN,
        "debug" => Level::DEBUG,
        "trace" => Level::TRACE,
        _ => Level::INFO,
    }
}
