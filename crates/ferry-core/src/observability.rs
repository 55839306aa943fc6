//! Observability infrastructure for ferry.
//!
//! Structured logging with consistent spans. Binaries call [`init_logging`]
//! once; library code only emits `tracing` events.

use std::str::FromStr;
use std::sync::Once;

use serde::{Deserialize, Serialize};
use tracing::Span;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::Error;

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for development).
    #[default]
    Pretty,
}

impl FromStr for LogFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            other => Err(Error::InvalidInput(format!(
                "unknown log format '{other}', expected 'json' or 'pretty'"
            ))),
        }
    }
}

/// Initializes the logging subsystem.
///
/// Call once at application startup. Safe to call multiple times;
/// subsequent calls are no-ops.
///
/// # Environment Variables
///
/// - `RUST_LOG`: Controls log levels (e.g., `info`, `ferry_flow=debug`)
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        match format {
            LogFormat::Json => {
                let _ = tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().json())
                    .try_init();
            }
            LogFormat::Pretty => {
                let _ = tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().pretty())
                    .try_init();
            }
        }
    });
}

/// Creates a span for one orchestrator run.
///
/// # Example
///
/// ```rust
/// use ferry_core::observability::orchestration_span;
///
/// let span = orchestration_span("run", "01HZX3", 4);
/// let _guard = span.enter();
/// ```
#[must_use]
pub fn orchestration_span(operation: &str, run_id: &str, generators: usize) -> Span {
    tracing::info_span!(
        "orchestration",
        op = operation,
        run_id = run_id,
        generators = generators,
    )
}

/// Creates a span for a single queued job.
#[must_use]
pub fn job_span(queue: &str, job_id: &str, kind: &str) -> Span {
    tracing::debug_span!("job", queue = queue, job_id = job_id, kind = kind)
}
