//! Configuration Loader
//!
//! Merges built-in defaults, an optional configuration file and `APS_*`
//! environment variables into an [`ApsConfig`], validates it, and logs a
//! sanitized copy.

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File};
use serde::Deserialize;
use tracing::{debug, info};

use super::error::{ConfigResult, ConfigurationError};
use super::{
    ApsConfig, BackoffConfig, BrokerConfig, LoggingConfig, ModuleConfig, WorkflowConfig,
};
use crate::module::commands::ModuleKind;

/// Environment variable naming an optional configuration file
pub const CONFIG_FILE_ENV: &str = "APS_CONFIG_FILE";

/// Flat key space shared by the file and the environment
#[derive(Debug, Deserialize)]
struct FlatSettings {
    broker_host: String,
    broker_port: i64,
    #[serde(default)]
    broker_username: Option<String>,
    #[serde(default)]
    broker_password: Option<String>,
    client_id_prefix: String,
    keep_alive_secs: i64,
    #[serde(default)]
    module_serial: Option<String>,
    module_kind: String,
    manufacturer: String,
    protocol_version: String,
    #[serde(default)]
    state_dir: Option<String>,
    action_timeout_secs: i64,
    reconnect_initial_delay_ms: i64,
    reconnect_max_delay_ms: i64,
    reconnect_backoff_multiplier: f64,
    reconnect_jitter_enabled: bool,
    reconnect_jitter_max_percentage: f64,
    reconnect_max_attempts: i64,
    workflow_history_limit: i64,
    #[serde(default)]
    log_level: Option<String>,
    log_format: String,
}

pub struct ConfigManager {
    config: ApsConfig,
    environment: String,
}

impl ConfigManager {
    /// Load configuration from the process environment
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        let mut builder = Self::default_builder()?;
        if let Ok(path) = env::var(CONFIG_FILE_ENV) {
            debug!(path = %path, "Reading configuration file");
            builder = builder.add_source(File::with_name(&path).required(false));
        }
        let builder = builder.add_source(
            Environment::with_prefix("APS")
                .try_parsing(true)
                .ignore_empty(true),
        );
        Self::from_builder(builder, &Self::detect_environment())
    }

    /// Builder pre-seeded with every default, for layering further sources
    pub fn default_builder() -> ConfigResult<ConfigBuilder<DefaultState>> {
        let defaults = ApsConfig::default();
        let builder = Config::builder()
            .set_default("broker_host", defaults.broker.host)?
            .set_default("broker_port", i64::from(defaults.broker.port))?
            .set_default("client_id_prefix", defaults.broker.client_id_prefix)?
            .set_default("keep_alive_secs", to_i64(defaults.broker.keep_alive_seconds))?
            .set_default("module_kind", defaults.module.kind.to_string())?
            .set_default("manufacturer", defaults.module.manufacturer)?
            .set_default("protocol_version", defaults.module.protocol_version)?
            .set_default(
                "action_timeout_secs",
                to_i64(defaults.module.default_action_timeout_seconds),
            )?
            .set_default(
                "reconnect_initial_delay_ms",
                to_i64(defaults.backoff.initial_delay_ms),
            )?
            .set_default("reconnect_max_delay_ms", to_i64(defaults.backoff.max_delay_ms))?
            .set_default(
                "reconnect_backoff_multiplier",
                defaults.backoff.backoff_multiplier,
            )?
            .set_default("reconnect_jitter_enabled", defaults.backoff.jitter_enabled)?
            .set_default(
                "reconnect_jitter_max_percentage",
                defaults.backoff.jitter_max_percentage,
            )?
            .set_default(
                "reconnect_max_attempts",
                i64::from(defaults.backoff.max_attempts),
            )?
            .set_default(
                "workflow_history_limit",
                to_i64(defaults.workflow.history_limit as u64),
            )?
            .set_default("log_format", defaults.logging.format)?;
        Ok(builder)
    }

    /// Build from an explicit builder; tests layer overrides on
    /// [`ConfigManager::default_builder`] instead of touching the process
    /// environment.
    pub fn from_builder(
        builder: ConfigBuilder<DefaultState>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let flat: FlatSettings = builder.build()?.try_deserialize()?;
        let config = Self::assemble(flat)?;
        config.validate()?;

        let sanitized = Self::sanitize_config_for_logging(&config);
        debug!(
            "Configuration loaded: {}",
            serde_json::to_string(&sanitized).unwrap_or_else(|_| "[serialization error]".into())
        );
        info!(
            environment = environment,
            broker_host = %config.broker.host,
            broker_port = config.broker.port,
            module_kind = %config.module.kind,
            "Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
        }))
    }

    pub fn config(&self) -> &ApsConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Configuration as JSON with credentials masked
    pub fn debug_config(&self) -> serde_json::Value {
        Self::sanitize_config_for_logging(&self.config)
    }

    /// Deployment environment from `APS_ENV`, lowercased
    pub fn detect_environment() -> String {
        env::var("APS_ENV")
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
    }

    fn assemble(flat: FlatSettings) -> ConfigResult<ApsConfig> {
        let kind: ModuleKind = flat
            .module_kind
            .parse()
            .map_err(|e: String| ConfigurationError::invalid_value("module_kind", &flat.module_kind, e))?;

        Ok(ApsConfig {
            broker: BrokerConfig {
                host: flat.broker_host,
                port: to_unsigned("broker_port", flat.broker_port)?,
                username: non_empty(flat.broker_username),
                password: non_empty(flat.broker_password),
                client_id_prefix: flat.client_id_prefix,
                keep_alive_seconds: to_unsigned("keep_alive_secs", flat.keep_alive_secs)?,
            },
            module: ModuleConfig {
                serial: non_empty(flat.module_serial),
                kind,
                manufacturer: flat.manufacturer,
                protocol_version: flat.protocol_version,
                state_dir: non_empty(flat.state_dir).map(PathBuf::from),
                default_action_timeout_seconds: to_unsigned(
                    "action_timeout_secs",
                    flat.action_timeout_secs,
                )?,
            },
            backoff: BackoffConfig {
                initial_delay_ms: to_unsigned(
                    "reconnect_initial_delay_ms",
                    flat.reconnect_initial_delay_ms,
                )?,
                max_delay_ms: to_unsigned("reconnect_max_delay_ms", flat.reconnect_max_delay_ms)?,
                backoff_multiplier: flat.reconnect_backoff_multiplier,
                jitter_enabled: flat.reconnect_jitter_enabled,
                jitter_max_percentage: flat.reconnect_jitter_max_percentage,
                max_attempts: to_unsigned("reconnect_max_attempts", flat.reconnect_max_attempts)?,
            },
            workflow: WorkflowConfig {
                history_limit: to_unsigned("workflow_history_limit", flat.workflow_history_limit)?,
            },
            logging: LoggingConfig {
                level: non_empty(flat.log_level),
                format: flat.log_format,
            },
        })
    }

    fn sanitize_config_for_logging(config: &ApsConfig) -> serde_json::Value {
        let mut config_json = serde_json::to_value(config).unwrap_or(serde_json::Value::Null);
        let sensitive_patterns = ["password", "secret", "token", "credential"];
        Self::sanitize_json_recursive(&mut config_json, &sensitive_patterns);
        config_json
    }

    fn sanitize_json_recursive(value: &mut serde_json::Value, sensitive_patterns: &[&str]) {
        match value {
            serde_json::Value::Object(map) => {
                for (key, val) in map.iter_mut() {
                    let key_lower = key.to_lowercase();
                    let is_sensitive = sensitive_patterns
                        .iter()
                        .any(|pattern| key_lower.contains(pattern));

                    if is_sensitive {
                        if !val.is_null() {
                            *val = serde_json::Value::String("[MASKED]".to_string());
                        }
                    } else {
                        Self::sanitize_json_recursive(val, sensitive_patterns);
                    }
                }
            }
            serde_json::Value::Array(items) => {
                for item in items.iter_mut() {
                    Self::sanitize_json_recursive(item, sensitive_patterns);
                }
            }
            _ => {}
        }
    }
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn to_unsigned<T: TryFrom<i64>>(field: &str, value: i64) -> ConfigResult<T> {
    T::try_from(value).map_err(|_| {
        ConfigurationError::invalid_value(field, value.to_string(), "value out of range")
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
