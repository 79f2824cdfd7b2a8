//! # Structured Logging Module
//!
//! Environment-aware structured logging for module runtimes and the CCU.
//!
//! The filter comes from `APS_LOG_LEVEL`, then `RUST_LOG`, then a default
//! chosen by `APS_ENV`. `APS_LOG_FORMAT=json` switches to one JSON object per
//! line for log shippers.

use std::sync::OnceLock;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging; later calls are no-ops
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let filter = get_log_filter(&environment);
        let json = std::env::var("APS_LOG_FORMAT")
            .map(|f| f.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let layer = if json {
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .json()
                .with_filter(EnvFilter::new(filter.clone()))
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_filter(EnvFilter::new(filter.clone()))
                .boxed()
        };

        // Embedding applications may already own the global subscriber
        if tracing_subscriber::registry().with(layer).try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized");
        }

        tracing::info!(
            pid = std::process::id(),
            environment = %environment,
            filter = %filter,
            json = json,
            "Structured logging initialized"
        );
    });
}

fn get_environment() -> String {
    std::env::var("APS_ENV")
        .unwrap_or_else(|_| "development".to_string())
        .to_lowercase()
}

fn get_log_filter(environment: &str) -> String {
    if let Ok(level) = std::env::var("APS_LOG_LEVEL") {
        if !level.trim().is_empty() {
            return level;
        }
    }
    if let Ok(filter) = std::env::var("RUST_LOG") {
        if !filter.trim().is_empty() {
            return filter;
        }
    }
    default_level(environment).to_string()
}

fn default_level(environment: &str) -> &'static str {
    match environment {
        "production" => "info",
        _ => "debug",
    }
}

/// Log an order book decision
pub fn log_order_operation(
    serial: &str,
    order_id: &str,
    order_update_id: u64,
    outcome: &str,
    details: Option<&str>,
) {
    tracing::info!(
        serial = %serial,
        order_id = %order_id,
        order_update_id = order_update_id,
        outcome = %outcome,
        details = details,
        "ORDER_OPERATION"
    );
}

/// Log an action moving between states
pub fn log_action_transition(
    serial: &str,
    action_id: &str,
    command: &str,
    from: &str,
    to: &str,
) {
    tracing::info!(
        serial = %serial,
        action_id = %action_id,
        command = %command,
        from = %from,
        to = %to,
        "ACTION_TRANSITION"
    );
}

/// Log a broker session event
pub fn log_connection_event(client_id: &str, event: &str, details: Option<&str>) {
    tracing::info!(
        client_id = %client_id,
        event = %event,
        details = details,
        "CONNECTION_EVENT"
    );
}

/// Log error with full context
pub fn log_error(component: &str, operation: &str, error: &str, context: Option<&str>) {
    tracing::error!(
        component = %component,
        operation = %operation,
        error = %error,
        context = context,
        "ERROR"
    );
}
