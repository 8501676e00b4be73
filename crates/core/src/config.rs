use std::env;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

// ── Failure policy ────────────────────────────────────────────

/// What the scheduler does when an executor reports a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Record the failure and keep scheduling.
    #[default]
    Continue,
    /// Stop pulling tasks and cancel everything still in flight.
    FailFast,
}

impl FailurePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailurePolicy::Continue => "continue",
            FailurePolicy::FailFast => "fail_fast",
        }
    }
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailurePolicy {
    type Err = CoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "continue" => Ok(FailurePolicy::Continue),
            "fail_fast" => Ok(FailurePolicy::FailFast),
            other => Err(CoreError::Config(format!(
                "invalid failure policy '{other}', expected 'continue' or 'fail_fast'"
            ))),
        }
    }
}

// ── Scheduler config ──────────────────────────────────────────

/// Scheduler settings.
///
/// Parsed from the `[scheduler]` table of `keygate.toml`, with
/// `KEYGATE_*` environment variables taking precedence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Ceiling on tasks in flight at once. `0` means unbounded.
    #[serde(default)]
    pub max_concurrency: usize,

    #[serde(default)]
    pub failure_policy: FailurePolicy,

    /// How long to wait for aborted tasks to unwind after cancellation.
    /// `None` waits as long as it takes.
    #[serde(default)]
    pub drain_timeout_secs: Option<u64>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 0,
            failure_policy: FailurePolicy::Continue,
            drain_timeout_secs: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    scheduler: SchedulerConfig,
}

impl SchedulerConfig {
    /// Config with the given concurrency ceiling and defaults otherwise.
    pub fn with_max_concurrency(max_concurrency: usize) -> Self {
        Self {
            max_concurrency,
            ..Self::default()
        }
    }

    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn drain_timeout_secs(mut self, secs: u64) -> Self {
        self.drain_timeout_secs = Some(secs);
        self
    }

    /// `Some(limit)` when bounded, `None` when unbounded.
    pub fn concurrency_limit(&self) -> Option<usize> {
        (self.max_concurrency > 0).then_some(self.max_concurrency)
    }

    /// Parse config from a TOML string.
    pub fn from_toml(toml_str: &str) -> CoreResult<Self> {
        let file: ConfigFile = toml::from_str(toml_str)?;
        let mut config = file.scheduler;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Build config from defaults and environment variables only.
    pub fn from_env() -> CoreResult<Self> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides.
    ///
    /// - `KEYGATE_MAX_CONCURRENCY` -> `max_concurrency`
    /// - `KEYGATE_FAILURE_POLICY` -> `failure_policy`
    /// - `KEYGATE_DRAIN_TIMEOUT_SECS` -> `drain_timeout_secs`
    pub fn apply_env_overrides(&mut self) -> CoreResult<()> {
        if let Some(v) = env_opt("KEYGATE_MAX_CONCURRENCY") {
            self.max_concurrency = v.parse().map_err(|_| {
                CoreError::Config(format!(
                    "KEYGATE_MAX_CONCURRENCY must be a non-negative integer, got '{v}'"
                ))
            })?;
        }
        if let Some(v) = env_opt("KEYGATE_FAILURE_POLICY") {
            self.failure_policy = v.parse()?;
        }
        if let Some(v) = env_opt("KEYGATE_DRAIN_TIMEOUT_SECS") {
            let secs = v.parse().map_err(|_| {
                CoreError::Config(format!(
                    "KEYGATE_DRAIN_TIMEOUT_SECS must be a number of seconds, got '{v}'"
                ))
            })?;
            self.drain_timeout_secs = Some(secs);
        }
        Ok(())
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.drain_timeout_secs == Some(0) {
            return Err(CoreError::Config(
                "drain_timeout_secs must be greater than zero when set".to_string(),
            ));
        }
        Ok(())
    }

    pub fn log_summary(&self) {
        tracing::info!(
            max_concurrency = self.max_concurrency,
            failure_policy = %self.failure_policy,
            drain_timeout_secs = ?self.drain_timeout_secs,
            "scheduler config loaded"
        );
    }
}
