//! Configuration for the route coordinator
//!
//! Timeouts are the only tunables: how long a pending connection may stay
//! unconfirmed, how long to back off before retrying a failed connect, and
//! how long a cross-task state query may block its caller.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;

/// Error loading or validating a [`RouteConfig`]
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid config: {0} must be greater than zero")]
    InvalidTimeout(&'static str),
}

/// Route coordinator configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteConfig {
    /// How long a connection attempt may sit in Connecting before the
    /// actor re-derives the actual state from the stack.
    #[serde(default = "default_pending_timeout_ms")]
    pub pending_timeout_ms: u64,

    /// Backoff before retrying a failed connect-audio call.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// How long a state query may block before assuming "off".
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,
}

fn default_pending_timeout_ms() -> u64 {
    5000
}

fn default_retry_backoff_ms() -> u64 {
    2000
}

fn default_query_timeout_ms() -> u64 {
    1000
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            pending_timeout_ms: default_pending_timeout_ms(),
            retry_backoff_ms: default_retry_backoff_ms(),
            query_timeout_ms: default_query_timeout_ms(),
        }
    }
}

impl RouteConfig {
    /// Load and validate a configuration from a YAML file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref()).await?;
        let config: RouteConfig = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would wedge the coordinator
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pending_timeout_ms == 0 {
            return Err(ConfigError::InvalidTimeout("pending_timeout_ms"));
        }
        if self.retry_backoff_ms == 0 {
            return Err(ConfigError::InvalidTimeout("retry_backoff_ms"));
        }
        if self.query_timeout_ms == 0 {
            return Err(ConfigError::InvalidTimeout("query_timeout_ms"));
        }
        Ok(())
    }

    pub fn pending_timeout(&self) -> Duration {
        Duration::from_millis(self.pending_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = RouteConfig::default();
        assert_eq!(config.pending_timeout_ms, 5000);
        assert_eq!(config.retry_backoff_ms, 2000);
        assert_eq!(config.query_timeout_ms, 1000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_fields_fall_back_to_defaults() {
        let config: RouteConfig = serde_yaml::from_str("pending_timeout_ms: 250\n").unwrap();
        assert_eq!(config.pending_timeout_ms, 250);
        assert_eq!(config.retry_backoff_ms, 2000);
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = RouteConfig {
            pending_timeout_ms: 0,
            ..RouteConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidTimeout("pending_timeout_ms"))
        ));
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "pending_timeout_ms: 100").unwrap();
        writeln!(file, "retry_backoff_ms: 50").unwrap();

        let config = RouteConfig::load(file.path()).await.unwrap();
        assert_eq!(config.pending_timeout_ms, 100);
        assert_eq!(config.retry_backoff_ms, 50);
        assert_eq!(config.query_timeout_ms, 1000);
    }
}
