//! Runtime Configuration
//!
//! Per-node tunables with defaults matching the reference deployment.
//! Everything is optional in serialized form; a bare `[runtime]` table (or
//! none at all) yields a fully working configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::message::MessageKind;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config loading failed: {0}")]
    Loading(String),

    #[error("config validation failed: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Pause between reconnect attempts to a lost peer, in milliseconds
    pub connection_retry_ms: u64,

    /// Capacity for queues whose definition does not set one
    pub default_queue_size: usize,

    /// How long task loops wait on their input queue per iteration,
    /// in milliseconds
    pub receive_wait_ms: u64,

    /// Settle time between creating an application's queues and starting
    /// its tasks, in milliseconds
    pub application_start_delay_ms: u64,

    /// Capacity of the outbound send queue; falls back to
    /// `default_queue_size`
    pub outbound_queue_size: Option<usize>,

    /// Socket send buffer requested for peer links
    pub send_buffer_bytes: usize,

    /// Upper bound on a single wire frame
    pub max_frame_bytes: usize,

    /// File touched after repeated connection failures; unset disables the
    /// marker
    pub connection_error_file: Option<PathBuf>,

    /// Command file watched by the file monitor; unset disables the monitor
    pub command_file: Option<PathBuf>,

    /// Wire form for messages built by the node's factory
    pub default_message_kind: MessageKind,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            connection_retry_ms: 1000,
            default_queue_size: 1000,
            receive_wait_ms: 5000,
            application_start_delay_ms: 2000,
            outbound_queue_size: None,
            send_buffer_bytes: 262_144,
            max_frame_bytes: 8 * 1024 * 1024,
            connection_error_file: None,
            command_file: None,
            default_message_kind: MessageKind::Uncompressed,
        }
    }
}

impl RuntimeConfig {
    pub fn connection_retry(&self) -> Duration {
        Duration::from_millis(self.connection_retry_ms)
    }

    pub fn receive_wait(&self) -> Duration {
        Duration::from_millis(self.receive_wait_ms)
    }

    pub fn application_start_delay(&self) -> Duration {
        Duration::from_millis(self.application_start_delay_ms)
    }

    pub fn outbound_capacity(&self) -> usize {
        self.outbound_queue_size.unwrap_or(self.default_queue_size)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_queue_size == 0 {
            return Err(ConfigError::Validation(
                "default_queue_size must be at least 1".to_string(),
            ));
        }
        if self.outbound_queue_size == Some(0) {
            return Err(ConfigError::Validation(
                "outbound_queue_size must be at least 1".to_string(),
            ));
        }
        if self.max_frame_bytes < 1024 {
            return Err(ConfigError::Validation(
                "max_frame_bytes must be at least 1024".to_string(),
            ));
        }
        if self.connection_retry_ms == 0 {
            return Err(ConfigError::Validation(
                "connection_retry_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = RuntimeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.outbound_capacity(), config.default_queue_size);
        assert_eq!(config.receive_wait(), Duration::from_secs(5));
    }

    #[test]
    fn zero_sizes_are_rejected() {
        let config = RuntimeConfig {
            default_queue_size: 0,
            ..RuntimeConfig::default()
        };
        assert!(config.validate().is_err());

        let config = RuntimeConfig {
            outbound_queue_size: Some(0),
            ..RuntimeConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn empty_toml_yields_the_defaults() {
        let config: RuntimeConfig = toml::from_str("").unwrap();
        assert_eq!(config, RuntimeConfig::default());
    }

    #[test]
    fn partial_toml_overrides_selectively() {
        let config: RuntimeConfig = toml::from_str(
            r#"
            receive_wait_ms = 250
            default_message_kind = "compressed"
            command_file = "/tmp/daf-commands"
            "#,
        )
        .unwrap();
        assert_eq!(config.receive_wait_ms, 250);
        assert_eq!(config.default_message_kind, MessageKind::Compressed);
        assert_eq!(
            config.command_file.as_deref(),
            Some(std::path::Path::new("/tmp/daf-commands"))
        );
        assert_eq!(config.connection_retry_ms, 1000);
    }
}
