//! Pool configuration.
//!
//! [`PoolConfig`] is a plain value. [`ConfigStore`] is the one place it can
//! change: callers merge a [`ConfigPatch`] over it and readers only ever see
//! snapshot copies, so a batch that already started keeps the settings it
//! started with.
//!
//! Values are not validated. Zero is accepted everywhere and callers are
//! responsible for sane settings.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Environment variable overriding `concurrency`.
pub const CONCURRENCY_ENV: &str = "DROVER_CONCURRENCY";

/// Environment variable overriding `throttle_ms`.
pub const THROTTLE_ENV: &str = "DROVER_THROTTLE_MS";

/// Environment variable overriding `timeout_ms`.
pub const TIMEOUT_ENV: &str = "DROVER_TIMEOUT_MS";

/// Environment variable overriding `max_retry`.
pub const MAX_RETRY_ENV: &str = "DROVER_MAX_RETRY";

/// Errors that can occur when loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Settings shared by the worker pool and the request client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Workers driving a batch
    pub concurrency: usize,

    /// Pause a worker takes after each operation
    #[serde(rename = "throttle_ms", with = "duration_ms")]
    pub throttle: Duration,

    /// Per-attempt request timeout
    #[serde(rename = "timeout_ms", with = "duration_ms")]
    pub timeout: Duration,

    /// Maximum attempts per request, first attempt included
    pub max_retry: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            throttle: Duration::ZERO,
            timeout: Duration::from_secs(15),
            max_retry: 4,
        }
    }
}

impl PoolConfig {
    /// Parse a configuration from YAML. Missing fields take their defaults.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Parse a configuration from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Serialize to YAML.
    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Return a copy with `patch` merged over this configuration.
    pub fn merged(mut self, patch: &ConfigPatch) -> Self {
        if let Some(concurrency) = patch.concurrency {
            self.concurrency = concurrency;
        }
        if let Some(throttle) = patch.throttle {
            self.throttle = throttle;
        }
        if let Some(timeout) = patch.timeout {
            self.timeout = timeout;
        }
        if let Some(max_retry) = patch.max_retry {
            self.max_retry = max_retry;
        }
        self
    }
}

/// Partial configuration. Absent fields leave the current value untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,

    #[serde(
        rename = "throttle_ms",
        with = "opt_duration_ms",
        skip_serializing_if = "Option::is_none"
    )]
    pub throttle: Option<Duration>,

    #[serde(
        rename = "timeout_ms",
        with = "opt_duration_ms",
        skip_serializing_if = "Option::is_none"
    )]
    pub timeout: Option<Duration>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retry: Option<u32>,
}

impl ConfigPatch {
    /// Create an empty patch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the worker count.
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency);
        self
    }

    /// Set the per-operation throttle.
    pub fn throttle(mut self, throttle: Duration) -> Self {
        self.throttle = Some(throttle);
        self
    }

    /// Set the per-attempt timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the maximum attempt count.
    pub fn max_retry(mut self, max_retry: u32) -> Self {
        self.max_retry = Some(max_retry);
        self
    }

    /// Parse a patch from YAML. Unknown keys are ignored.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Parse a patch from JSON. Unknown keys are ignored.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read overrides from the `DROVER_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read overrides through an arbitrary variable lookup.
    ///
    /// Unparsable values are skipped with a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            concurrency: parse_var(&lookup, CONCURRENCY_ENV),
            throttle: parse_var(&lookup, THROTTLE_ENV).map(Duration::from_millis),
            timeout: parse_var(&lookup, TIMEOUT_ENV).map(Duration::from_millis),
            max_retry: parse_var(&lookup, MAX_RETRY_ENV),
        }
    }

    /// Combine two patches; fields set in `other` win.
    pub fn and(self, other: ConfigPatch) -> Self {
        Self {
            concurrency: other.concurrency.or(self.concurrency),
            throttle: other.throttle.or(self.throttle),
            timeout: other.timeout.or(self.timeout),
            max_retry: other.max_retry.or(self.max_retry),
        }
    }

    /// Whether the patch sets no field at all.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(variable = key, value = %raw, "Ignoring unparsable config override");
            None
        }
    }
}

/// Holder of the live configuration.
///
/// Construct one and share it by `Arc` with the pool and client that should
/// observe the same settings. Independent stores do not interfere.
#[derive(Debug, Default)]
pub struct ConfigStore {
    current: RwLock<PoolConfig>,
}

impl ConfigStore {
    /// Create a store holding `config`.
    pub fn new(config: PoolConfig) -> Self {
        Self {
            current: RwLock::new(config),
        }
    }

    /// Merge `patch` over the current configuration.
    pub fn set(&self, patch: ConfigPatch) {
        let mut current = self.current.write();
        *current = current.merged(&patch);
        tracing::debug!(config = ?*current, "Pool configuration updated");
    }

    /// Copy of the current configuration.
    pub fn snapshot(&self) -> PoolConfig {
        *self.current.read()
    }
}

impl From<PoolConfig> for ConfigStore {
    fn from(config: PoolConfig) -> Self {
        Self::new(config)
    }
}

/// Whole milliseconds, saturating at `u64::MAX`.
fn millis(duration: &Duration) -> u64 {
    duration.as_millis().try_into().unwrap_or(u64::MAX)
}

pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(super::millis(duration))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

pub(crate) mod opt_duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(duration) => serializer.serialize_some(&super::millis(duration)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}
