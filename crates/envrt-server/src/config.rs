//! Server configuration

use envrt_core::{EnvError, Result};
use std::time::Duration;

/// Runtime configuration for an envrt server
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// Maximum concurrently admitted sessions
    pub max_sessions: usize,
    /// Sessions idle longer than this are reaped; `None` disables reaping
    pub idle_timeout: Option<Duration>,
    /// How often the reaper scans for idle sessions
    pub reap_interval: Duration,
    /// Default deadline for a single step
    pub step_timeout: Option<Duration>,
    /// Deadline for a single tool invocation
    pub tool_timeout: Option<Duration>,
    /// Bind requests without a session id to a shared default session
    pub implicit_session: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_sessions: 1,
            idle_timeout: None,
            reap_interval: Duration::from_secs(30),
            step_timeout: None,
            tool_timeout: Some(Duration::from_secs(30)),
            implicit_session: true,
        }
    }
}

impl ServerConfig {
    pub fn with_max_sessions(mut self, max_sessions: usize) -> Self {
        self.max_sessions = max_sessions;
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = Some(idle_timeout);
        self
    }

    pub fn with_reap_interval(mut self, interval: Duration) -> Self {
        self.reap_interval = interval;
        self
    }

    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = Some(timeout);
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.tool_timeout = timeout;
        self
    }

    pub fn with_implicit_session(mut self, enabled: bool) -> Self {
        self.implicit_session = enabled;
        self
    }

    /// Reject configurations the runtime cannot honor
    pub fn validate(&self) -> Result<()> {
        if self.max_sessions == 0 {
            return Err(EnvError::ConcurrencyConfiguration(
                "max_sessions must be at least 1".into(),
            ));
        }
        if self.reap_interval.is_zero() {
            return Err(EnvError::ConcurrencyConfiguration(
                "reap_interval must be positive".into(),
            ));
        }
        for (name, value) in [
            ("idle_timeout", self.idle_timeout),
            ("step_timeout", self.step_timeout),
            ("tool_timeout", self.tool_timeout),
        ] {
            if value.is_some_and(|d| d.is_zero()) {
                return Err(EnvError::ConcurrencyConfiguration(format!(
                    "{} must be positive",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Load from `ENVRT_*` environment variables over the defaults
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(v) = lookup("ENVRT_MAX_SESSIONS") {
            config.max_sessions = parse_var("ENVRT_MAX_SESSIONS", &v)?;
        }
        if let Some(v) = lookup("ENVRT_IDLE_TIMEOUT_SECS") {
            config.idle_timeout = seconds("ENVRT_IDLE_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("ENVRT_REAP_INTERVAL_SECS") {
            config.reap_interval = seconds("ENVRT_REAP_INTERVAL_SECS", &v)?.unwrap_or_default();
        }
        if let Some(v) = lookup("ENVRT_STEP_TIMEOUT_SECS") {
            config.step_timeout = seconds("ENVRT_STEP_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("ENVRT_TOOL_TIMEOUT_SECS") {
            config.tool_timeout = seconds("ENVRT_TOOL_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("ENVRT_IMPLICIT_SESSION") {
            config.implicit_session = parse_var("ENVRT_IMPLICIT_SESSION", &v)?;
        }
        config.validate()?;
        Ok(config)
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        EnvError::ConcurrencyConfiguration(format!("{} has invalid value `{}`", key, value))
    })
}

/// `0` disables the deadline
fn seconds(key: &str, value: &str) -> Result<Option<Duration>> {
    let secs: f64 = parse_var(key, value)?;
    let duration = Duration::try_from_secs_f64(secs).map_err(|_| {
        EnvError::ConcurrencyConfiguration(format!(
            "{} must be a non-negative number of seconds, got `{}`",
            key, value
        ))
    })?;
    Ok((!duration.is_zero()).then_some(duration))
}
