//! Configuration for the log manager.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Configuration of a [`LogManager`](crate::LogManager).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogManagerConfig {
    /// Group of the transient tailer used to sample latency.
    ///
    /// Reserved: application tailers must not use it on the sampled logs.
    #[serde(default = "default_latency_group")]
    pub latency_group: String,

    /// Maximum wait when reading back the last committed record.
    #[serde(default = "default_latency_read_timeout", with = "humantime_serde")]
    pub latency_read_timeout: Duration,
}

fn default_latency_group() -> String {
    "tools".to_string()
}

fn default_latency_read_timeout() -> Duration {
    Duration::from_secs(1)
}

impl Default for LogManagerConfig {
    fn default() -> Self {
        Self {
            latency_group: default_latency_group(),
            latency_read_timeout: default_latency_read_timeout(),
        }
    }
}

impl LogManagerConfig {
    /// Use another reserved group for latency sampling.
    #[must_use]
    pub fn with_latency_group(mut self, group: impl Into<String>) -> Self {
        self.latency_group = group.into();
        self
    }

    /// Use another timeout for latency sampling reads.
    #[must_use]
    pub fn with_latency_read_timeout(mut self, timeout: Duration) -> Self {
        self.latency_read_timeout = timeout;
        self
    }

    /// Parse a TOML document, missing keys take their default.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Load a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }
}
