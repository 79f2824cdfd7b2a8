//! # APS Configuration System
//!
//! Layered configuration for module runtimes and the CCU coordinator.
//!
//! ## Sources (later wins)
//!
//! 1. Built-in defaults
//! 2. Optional file named by `APS_CONFIG_FILE` (any format the `config` crate reads)
//! 3. Environment variables prefixed with `APS_`
//!
//! Keys are flat: `APS_BROKER_HOST` and `broker_host = "..."` in a file name
//! the same setting.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use aps_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let broker = &manager.config().broker;
//! println!("connecting to {}:{}", broker.host, broker.port);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

use crate::constants::system;
use crate::module::commands::ModuleKind;

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApsConfig {
    pub broker: BrokerConfig,
    pub module: ModuleConfig,
    pub backoff: BackoffConfig,
    pub workflow: WorkflowConfig,
    pub logging: LoggingConfig,
}

/// MQTT broker connection
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id_prefix: String,
    pub keep_alive_seconds: u64,
}

impl BrokerConfig {
    /// Client id for a publisher with `serial`
    pub fn client_id(&self, serial: &str) -> String {
        format!("{}-{}", self.client_id_prefix, serial)
    }
}

/// Which module this runtime plays
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModuleConfig {
    pub serial: Option<String>,
    pub kind: ModuleKind,
    pub manufacturer: String,
    pub protocol_version: String,
    /// Calibration data and connection sequence live here
    pub state_dir: Option<PathBuf>,
    pub default_action_timeout_seconds: u64,
}

impl ModuleConfig {
    pub fn require_serial(&self) -> ConfigResult<&str> {
        match self.serial.as_deref() {
            Some(serial) if !serial.trim().is_empty() => Ok(serial),
            _ => Err(ConfigurationError::missing_required_field(
                "module_serial",
                "module runtime (set APS_MODULE_SERIAL)",
            )),
        }
    }

    pub fn default_action_timeout(&self) -> Duration {
        Duration::from_secs(self.default_action_timeout_seconds)
    }
}

/// Reconnect backoff
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackoffConfig {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter_enabled: bool,
    pub jitter_max_percentage: f64,
    /// Consecutive failed attempts before giving up
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkflowConfig {
    pub history_limit: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    pub level: Option<String>,
    pub format: String,
}

impl Default for ApsConfig {
    fn default() -> Self {
        Self {
            broker: BrokerConfig {
                host: "localhost".to_string(),
                port: 1883,
                username: None,
                password: None,
                client_id_prefix: "aps".to_string(),
                keep_alive_seconds: 30,
            },
            module: ModuleConfig {
                serial: None,
                kind: ModuleKind::Mill,
                manufacturer: system::DEFAULT_MANUFACTURER.to_string(),
                protocol_version: system::PROTOCOL_VERSION.to_string(),
                state_dir: None,
                default_action_timeout_seconds: system::DEFAULT_ACTION_TIMEOUT_SECS,
            },
            backoff: BackoffConfig {
                initial_delay_ms: 500,
                max_delay_ms: 30_000,
                backoff_multiplier: 2.0,
                jitter_enabled: true,
                jitter_max_percentage: 0.1,
                max_attempts: 10,
            },
            workflow: WorkflowConfig {
                history_limit: system::DEFAULT_WORKFLOW_HISTORY_LIMIT,
            },
            logging: LoggingConfig {
                level: None,
                format: "pretty".to_string(),
            },
        }
    }
}

impl ApsConfig {
    /// Check values that would otherwise fail late at connect time
    pub fn validate(&self) -> ConfigResult<()> {
        if self.broker.host.trim().is_empty() {
            return Err(ConfigurationError::invalid_value(
                "broker_host",
                "",
                "broker host must not be empty",
            ));
        }
        if self.broker.port == 0 {
            return Err(ConfigurationError::invalid_value(
                "broker_port",
                "0",
                "broker port must be non-zero",
            ));
        }
        if self.broker.client_id_prefix.trim().is_empty() {
            return Err(ConfigurationError::invalid_value(
                "client_id_prefix",
                "",
                "client id prefix must not be empty",
            ));
        }
        if self.backoff.initial_delay_ms > self.backoff.max_delay_ms {
            return Err(ConfigurationError::invalid_value(
                "reconnect_initial_delay_ms",
                self.backoff.initial_delay_ms.to_string(),
                format!(
                    "initial delay exceeds max delay of {}ms",
                    self.backoff.max_delay_ms
                ),
            ));
        }
        if self.backoff.backoff_multiplier < 1.0 {
            return Err(ConfigurationError::invalid_value(
                "reconnect_backoff_multiplier",
                self.backoff.backoff_multiplier.to_string(),
                "multiplier must be at least 1.0",
            ));
        }
        if !(0.0..=1.0).contains(&self.backoff.jitter_max_percentage) {
            return Err(ConfigurationError::invalid_value(
                "reconnect_jitter_max_percentage",
                self.backoff.jitter_max_percentage.to_string(),
                "jitter must be between 0.0 and 1.0",
            ));
        }
        if self.workflow.history_limit == 0 {
            return Err(ConfigurationError::invalid_value(
                "workflow_history_limit",
                "0",
                "history limit must be positive",
            ));
        }
        if let Some(serial) = &self.module.serial {
            if serial.contains(['/', '+', '#']) {
                return Err(ConfigurationError::invalid_value(
                    "module_serial",
                    serial.clone(),
                    "serial must not contain MQTT topic separators or wildcards",
                ));
            }
        }
        Ok(())
    }
}
