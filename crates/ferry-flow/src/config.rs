//! Runtime configuration for a migration process.
//!
//! Values come from the process environment with strict validation; a value
//! that is present but malformed is a configuration error, never silently
//! replaced by its default.
//!
//! | Variable | Meaning | Default |
//! |----------|---------|---------|
//! | `FERRY_WORKERS` | Queue worker count, positive | available parallelism |
//! | `FERRY_POLL_INTERVAL_MS` | Idle poll interval, positive | 1000 |
//! | `FERRY_QUEUE_CAPACITY` | Cap on unfinished jobs, positive | unbounded |
//! | `FERRY_DRY_RUN` | `true`/`false`/`1`/`0`/`yes`/`no` | `false` |
//! | `FERRY_LIMIT` | Migration cap; `<= 0` means unbounded | `0` |
//! | `FERRY_LOG_FORMAT` | `json` or `pretty` | `pretty` |

use std::num::NonZeroUsize;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use ferry_core::LogFormat;

use crate::application::ApplicationOptions;
use crate::error::{Error, Result};
use crate::wait::IDLE_POLL_INTERVAL;

const ENV_WORKERS: &str = "FERRY_WORKERS";
const ENV_POLL_INTERVAL_MS: &str = "FERRY_POLL_INTERVAL_MS";
const ENV_QUEUE_CAPACITY: &str = "FERRY_QUEUE_CAPACITY";
const ENV_DRY_RUN: &str = "FERRY_DRY_RUN";
const ENV_LIMIT: &str = "FERRY_LIMIT";
const ENV_LOG_FORMAT: &str = "FERRY_LOG_FORMAT";

/// Configuration for one migration process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowConfig {
    /// Maximum number of jobs running at once.
    pub workers: usize,
    /// Fallback interval between idleness checks.
    pub poll_interval: Duration,
    /// Cap on unfinished jobs in the queue, if any.
    pub queue_capacity: Option<usize>,
    /// Dry-run and limit policy.
    pub options: ApplicationOptions,
    /// Log output format.
    pub log_format: LogFormat,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            poll_interval: IDLE_POLL_INTERVAL,
            queue_capacity: None,
            options: ApplicationOptions::default(),
            log_format: LogFormat::default(),
        }
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism().map_or(1, NonZeroUsize::get)
}

impl FlowConfig {
    /// Loads configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when a variable is present but invalid.
    pub fn from_env() -> Result<Self> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Loads configuration with a custom environment source.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when a variable is present but invalid.
    pub fn from_env_with<F>(get_env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let workers = parse_positive_env(&get_env, ENV_WORKERS)?.unwrap_or(defaults.workers);
        let poll_interval = parse_positive_env(&get_env, ENV_POLL_INTERVAL_MS)?
            .map_or(defaults.poll_interval, |ms| {
                Duration::from_millis(u64::try_from(ms).unwrap_or(u64::MAX))
            });
        let queue_capacity = parse_positive_env(&get_env, ENV_QUEUE_CAPACITY)?;
        let dry_run = parse_bool_env(&get_env, ENV_DRY_RUN)?.unwrap_or(false);
        let limit = parse_limit_env(&get_env, ENV_LIMIT)?;
        let log_format = match get_env(ENV_LOG_FORMAT) {
            Some(raw) => raw
                .parse::<LogFormat>()
                .map_err(|e| Error::configuration(format!("{ENV_LOG_FORMAT}: {e}")))?,
            None => defaults.log_format,
        };

        Ok(Self {
            workers,
            poll_interval,
            queue_capacity,
            options: ApplicationOptions { dry_run, limit },
            log_format,
        })
    }
}

fn parse_positive_env<F>(get_env: &F, key: &str) -> Result<Option<usize>>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = get_env(key) else {
        return Ok(None);
    };

    let parsed = raw.trim().parse::<usize>().map_err(|_| {
        Error::configuration(format!("{key} must be a positive integer, got '{raw}'"))
    })?;
    if parsed == 0 {
        return Err(Error::configuration(format!(
            "{key} must be greater than zero"
        )));
    }
    Ok(Some(parsed))
}

fn parse_bool_env<F>(get_env: &F, key: &str) -> Result<Option<bool>>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = get_env(key) else {
        return Ok(None);
    };

    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(Some(true)),
        "false" | "0" | "no" => Ok(Some(false)),
        _ => Err(Error::configuration(format!(
            "{key} must be a boolean, got '{raw}'"
        ))),
    }
}

/// Parses a signed limit; zero and negative values mean unbounded.
fn parse_limit_env<F>(get_env: &F, key: &str) -> Result<usize>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = get_env(key) else {
        return Ok(0);
    };

    let parsed = raw
        .trim()
        .parse::<i64>()
        .map_err(|_| Error::configuration(format!("{key} must be an integer, got '{raw}'")))?;
    if parsed <= 0 {
        return Ok(0);
    }
    usize::try_from(parsed)
        .map_err(|_| Error::configuration(format!("{key} value {parsed} exceeds supported range")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = FlowConfig::from_env_with(env(&[])).unwrap();
        assert!(config.workers >= 1);
        assert_eq!(config.poll_interval, IDLE_POLL_INTERVAL);
        assert_eq!(config.queue_capacity, None);
        assert!(!config.options.dry_run);
        assert_eq!(config.options.cap(), None);
        assert_eq!(config.log_format, LogFormat::Pretty);
    }

    #[test]
    fn reads_every_variable() {
        let config = FlowConfig::from_env_with(env(&[
            ("FERRY_WORKERS", "3"),
            ("FERRY_POLL_INTERVAL_MS", "250"),
            ("FERRY_QUEUE_CAPACITY", "100"),
            ("FERRY_DRY_RUN", "yes"),
            ("FERRY_LIMIT", "7"),
            ("FERRY_LOG_FORMAT", "json"),
        ]))
        .unwrap();

        assert_eq!(config.workers, 3);
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.queue_capacity, Some(100));
        assert!(config.options.dry_run);
        assert_eq!(config.options.cap(), Some(7));
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn non_positive_limit_is_unbounded() {
        for raw in ["0", "-1", "-9000"] {
            let config = FlowConfig::from_env_with(env(&[("FERRY_LIMIT", raw)])).unwrap();
            assert_eq!(config.options.cap(), None, "limit {raw}");
        }
    }

    #[test]
    fn rejects_invalid_values() {
        for (key, raw) in [
            ("FERRY_WORKERS", "0"),
            ("FERRY_WORKERS", "many"),
            ("FERRY_POLL_INTERVAL_MS", "-5"),
            ("FERRY_QUEUE_CAPACITY", "0"),
            ("FERRY_DRY_RUN", "maybe"),
            ("FERRY_LIMIT", "ten"),
            ("FERRY_LOG_FORMAT", "xml"),
        ] {
            let err = FlowConfig::from_env_with(env(&[(key, raw)])).unwrap_err();
            assert!(err.is_configuration(), "{key}={raw}");
            assert!(err.to_string().contains(key), "{key}={raw}: {err}");
        }
    }

    #[test]
    fn config_serializes() {
        let config = FlowConfig::from_env_with(env(&[("FERRY_WORKERS", "2")])).unwrap();
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["workers"], 2);
        assert_eq!(json["log_format"], "pretty");
    }
}
