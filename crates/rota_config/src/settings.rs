use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// The rotation policy a selector is built from.
///
/// Accepts either underscore or hyphen spelling on input (`rate_limited` and
/// `rate-limited` are the same method) and always serializes back out with
/// a hyphen, matching the settings watcher's normalization rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RotationMethod {
    RoundRobin,
    Random,
    LeastConnections,
    RateLimited,
}

impl fmt::Display for RotationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RotationMethod::RoundRobin => "round-robin",
            RotationMethod::Random => "random",
            RotationMethod::LeastConnections => "least-connections",
            RotationMethod::RateLimited => "rate-limited",
        };
        f.write_str(s)
    }
}

impl FromStr for RotationMethod {
    type Err = ConfigError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_lowercase().replace('_', "-");
        match normalized.as_str() {
            "round-robin" => Ok(RotationMethod::RoundRobin),
            "random" => Ok(RotationMethod::Random),
            "least-connections" => Ok(RotationMethod::LeastConnections),
            "rate-limited" => Ok(RotationMethod::RateLimited),
            other => Err(ConfigError::InvalidSettings(format!(
                "unrecognized rotation method '{other}'"
            ))),
        }
    }
}

impl<'de> Deserialize<'de> for RotationMethod {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        RotationMethod::from_str(&raw).map_err(serde::de::Error::custom)
    }
}

/// The live rotation policy, as stored in the `settings` table and swapped
/// in by the settings watcher whenever it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RotationSettings {
    pub method: RotationMethod,

    /// Window size for the rate-limited method's usage view.
    pub window_seconds: u32,
    /// Requests permitted per proxy within the window before it is skipped.
    /// `0` pauses the rate-limited method: every selection reports
    /// `all_at_limit` without stopping the process.
    pub max_requests_per_window: u32,
    /// Whether failed attempts count against a proxy's window quota.
    /// See DESIGN.md's Open Question decision; defaults to `false`.
    #[serde(default)]
    pub count_failed_in_window: bool,

    /// Retire a proxy to `unhealthy` after a dispatch attempt fails against
    /// it, instead of leaving it `active` for the next rotation to retry.
    pub remove_unhealthy: bool,
    /// Whether the dispatcher may fall back to the next candidate proxy
    /// after an attempt fails, instead of failing the request immediately.
    pub fallback: bool,

    /// Per-attempt timeout.
    pub timeout_ms: u64,
    /// Maximum number of attempts per dispatch (including the first).
    pub retries: u32,
}

impl RotationSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn overall_deadline(&self) -> Duration {
        self.timeout() * self.retries.max(1)
    }
}

impl Default for RotationSettings {
    fn default() -> Self {
        Self {
            method: RotationMethod::RoundRobin,
            window_seconds: 60,
            max_requests_per_window: 100,
            count_failed_in_window: false,
            remove_unhealthy: true,
            fallback: true,
            timeout_ms: 5_000,
            retries: 3,
        }
    }
}
