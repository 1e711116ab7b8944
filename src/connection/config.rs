use crate::core::{PoolError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Pool sizing and aging configuration
///
/// Serialized with the short keys used in deployment files:
///
/// ```json
/// { "minconn": 1, "maxconn": 20, "idle_timeout_secs": 600 }
/// ```
///
/// A missing `maxconn` means unbounded. A missing `idle_timeout_secs` keeps the
/// default; an explicit `null` disables idle aging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Idle connections kept warm after each release
    #[serde(rename = "minconn", default = "default_min_connections")]
    pub min_connections: usize,

    /// Upper bound on idle plus in-use connections
    #[serde(rename = "maxconn", default = "unbounded", with = "max_connections_repr")]
    pub max_connections: usize,

    /// Idle connections older than this are closed instead of reused
    #[serde(
        rename = "idle_timeout_secs",
        default = "default_idle_timeout",
        with = "idle_timeout_repr"
    )]
    pub idle_timeout: Option<Duration>,
}

fn default_min_connections() -> usize {
    1
}

fn unbounded() -> usize {
    usize::MAX
}

fn default_idle_timeout() -> Option<Duration> {
    Some(Duration::from_secs(600)) // 10 minutes
}

impl PoolConfig {
    /// Create a configuration with the given bounds and the default idle timeout
    pub fn new(min_connections: usize, max_connections: usize) -> Self {
        Self {
            min_connections,
            max_connections,
            idle_timeout: default_idle_timeout(),
        }
    }

    /// Set minimum idle connections
    pub fn min_connections(mut self, min: usize) -> Self {
        self.min_connections = min;
        self
    }

    /// Set maximum connections
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set idle timeout. A zero timeout evicts connections as soon as they are returned.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Keep idle connections regardless of how long they sit unused
    pub fn no_idle_timeout(mut self) -> Self {
        self.idle_timeout = None;
        self
    }

    pub fn is_bounded(&self) -> bool {
        self.max_connections != usize::MAX
    }

    /// Parse from a JSON document and validate it
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| PoolError::Configuration(format!("invalid pool config: {}", e)))?;
        config.validate().map_err(PoolError::Configuration)?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.max_connections == 0 {
            return Err("max_connections must be > 0".to_string());
        }

        if self.min_connections > self.max_connections {
            return Err("min_connections cannot exceed max_connections".to_string());
        }

        Ok(())
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::new(default_min_connections(), unbounded())
    }
}

mod max_connections_repr {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(max: &usize, s: S) -> Result<S::Ok, S::Error> {
        if *max == usize::MAX {
            s.serialize_none()
        } else {
            s.serialize_some(max)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<usize, D::Error> {
        Ok(Option::<usize>::deserialize(d)?.unwrap_or(usize::MAX))
    }
}

mod idle_timeout_repr {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(timeout: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match timeout {
            Some(timeout) => s.serialize_some(&timeout.as_secs_f64()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        match Option::<f64>::deserialize(d)? {
            Some(secs) => Duration::try_from_secs_f64(secs)
                .map(Some)
                .map_err(|e| D::Error::custom(format!("idle_timeout_secs: {}", e))),
            None => Ok(None),
        }
    }
}
