use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use runbench_core::command::DEFAULT_PROGRAM;
use runbench_core::dispatcher::DEFAULT_RUN_TIMEOUT;

/// Configuration errors surfaced at startup.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{var} has invalid value {value:?}")]
    Invalid { var: &'static str, value: String },
}

/// Output format of the `fmt` tracing layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(()),
        }
    }
}

/// Worker configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database_url: String,
    /// Connection pool size (default: `20`).
    pub max_connections: u32,
    /// Wall-clock limit for one test process (default: 300s).
    pub run_timeout: Duration,
    /// Maximum in-flight dispatch attempts in this process (default: `4`).
    pub concurrency: usize,
    /// How often the queue is polled (default: 1s).
    pub poll_interval: Duration,
    /// How long shutdown waits for in-flight attempts (default: 30s).
    pub shutdown_timeout: Duration,
    /// Test runner executable (default: `pytest`).
    pub runner_program: String,
    /// Arguments placed before `--env` (default: `-v`).
    pub runner_args: Vec<String>,
    /// Working directory for test processes. Inherited when unset.
    pub test_base_dir: Option<PathBuf>,
    pub log_format: LogFormat,
}

impl WorkerConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                        | Default   |
    /// |--------------------------------|-----------|
    /// | `DATABASE_URL`                 | required  |
    /// | `DATABASE_MAX_CONNECTIONS`     | `20`      |
    /// | `TEST_RUN_TIMEOUT_SECS`        | `300`     |
    /// | `WORKER_CONCURRENCY`           | `4`       |
    /// | `WORKER_POLL_INTERVAL_MS`      | `1000`    |
    /// | `WORKER_SHUTDOWN_TIMEOUT_SECS` | `30`      |
    /// | `TEST_RUNNER_PROGRAM`          | `pytest`  |
    /// | `TEST_RUNNER_ARGS`             | `-v`      |
    /// | `TEST_BASE_DIR`                | unset     |
    /// | `LOG_FORMAT`                   | `text`    |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let max_connections: u32 = positive(&lookup, "DATABASE_MAX_CONNECTIONS", 20)?;
        let run_timeout_secs: u64 =
            positive(&lookup, "TEST_RUN_TIMEOUT_SECS", DEFAULT_RUN_TIMEOUT.as_secs())?;
        let concurrency: usize = positive(&lookup, "WORKER_CONCURRENCY", 4)?;
        let poll_interval_ms: u64 = positive(&lookup, "WORKER_POLL_INTERVAL_MS", 1000)?;
        let shutdown_timeout_secs: u64 = parse_or(&lookup, "WORKER_SHUTDOWN_TIMEOUT_SECS", 30)?;

        let runner_program = lookup("TEST_RUNNER_PROGRAM")
            .map(|v| v.trim().to_string())
            .unwrap_or_else(|| DEFAULT_PROGRAM.to_string());
        if runner_program.is_empty() {
            return Err(ConfigError::Invalid {
                var: "TEST_RUNNER_PROGRAM",
                value: runner_program,
            });
        }

        let runner_args = lookup("TEST_RUNNER_ARGS")
            .unwrap_or_else(|| "-v".to_string())
            .split_whitespace()
            .map(str::to_string)
            .collect();

        let test_base_dir = lookup("TEST_BASE_DIR")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);

        let log_format = match lookup("LOG_FORMAT") {
            None => LogFormat::default(),
            Some(raw) => raw.parse().map_err(|()| ConfigError::Invalid {
                var: "LOG_FORMAT",
                value: raw,
            })?,
        };

        Ok(Self {
            database_url,
            max_connections,
            run_timeout: Duration::from_secs(run_timeout_secs),
            concurrency,
            poll_interval: Duration::from_millis(poll_interval_ms),
            shutdown_timeout: Duration::from_secs(shutdown_timeout_secs),
            runner_program,
            runner_args,
            test_base_dir,
            log_format,
        })
    }
}

fn parse_or<F, T>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(var) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { var, value: raw }),
    }
}

/// Like [`parse_or`] but rejects zero.
fn positive<F, T>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + PartialEq + Default,
{
    let value = parse_or(lookup, var, default)?;
    if value == T::default() {
        return Err(ConfigError::Invalid {
            var,
            value: "0".to_string(),
        });
    }
    Ok(value)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
