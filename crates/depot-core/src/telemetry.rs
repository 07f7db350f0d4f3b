//! Tracing subscriber initialisation.
//!
//! Every Depot process logs through `tracing`; this module installs the
//! global subscriber with an `EnvFilter` (honouring `RUST_LOG`) and either a
//! human-readable or a JSON formatter.

use crate::{DepotError, DepotResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable, coloured output.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

impl FromStr for LogFormat {
    type Err = DepotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(DepotError::configuration(format!(
                "Unknown log format: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pretty => write!(f, "pretty"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// Builds the default filter directive for a base log level.
#[must_use]
pub fn default_directive(log_level: &str) -> String {
    format!("{},depot=debug,sqlx=warn", log_level)
}

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` wins over `log_level` when set.
pub fn init_tracing(log_level: &str, format: LogFormat) -> DepotResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(log_level)));

    let registry = tracing_subscriber::registry().with(filter);

    let result = match format {
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .try_init(),
    };

    result.map_err(|e| DepotError::internal(format!("Failed to install tracing subscriber: {}", e)))
}
