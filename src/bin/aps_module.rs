//! # APS Module Runtime
//!
//! Hosts one module on the broker, backed by simulated hardware. The module
//! serial and kind come from `APS_MODULE_SERIAL` / `APS_MODULE_KIND` or the
//! command line.
//!
//! Exit codes: 0 after a graceful stop, 1 when configuration is invalid or
//! the broker stayed unreachable past the reconnect cap.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use aps_core::config::ConfigManager;
use aps_core::connection::ReconnectPolicy;
use aps_core::logging;
use aps_core::messaging::MqttSession;
use aps_core::module::{ModuleKind, RuntimeBootstrap, RuntimeSettings, SimulatedHardware};

/// How long the broker session may take to flush OFFLINE after shutdown
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "aps-module")]
#[command(about = "Host one APS module on the MQTT broker")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Module serial number (overrides APS_MODULE_SERIAL)
    #[arg(short, long)]
    serial: Option<String>,

    /// Module kind: HBW, MILL, DRILL, AIQS, DPS, OVEN or FTS (overrides APS_MODULE_KIND)
    #[arg(short, long)]
    kind: Option<ModuleKind>,

    /// Simulated duration of one hardware step in milliseconds
    #[arg(long, default_value_t = 500)]
    step_delay_ms: u64,
}

#[tokio::main]
async fn main() -> ExitCode {
    logging::init_structured_logging();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => {
            info!("Module runtime stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %format!("{e:#}"), "Module runtime failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let manager = ConfigManager::load().context("loading configuration")?;
    let mut config = manager.config().clone();
    if let Some(serial) = cli.serial {
        config.module.serial = Some(serial);
    }
    if let Some(kind) = cli.kind {
        config.module.kind = kind;
    }
    config.validate().context("validating configuration")?;

    let mut settings = RuntimeSettings::from_config(&config)?;
    if settings.state_dir.is_none() {
        let dir = std::env::temp_dir().join(format!("aps-{}", settings.serial));
        settings = settings.with_state_dir(dir);
    }
    let kind = settings.kind;
    let bootstrap = RuntimeBootstrap::prepare(settings).context("preparing module state")?;

    info!(
        serial = %bootstrap.settings().serial,
        kind = %kind,
        environment = %manager.environment(),
        broker = %format!("{}:{}", config.broker.host, config.broker.port),
        "Starting module runtime"
    );

    let shutdown = CancellationToken::new();
    let client_id = config.broker.client_id(&bootstrap.settings().serial);
    let (session, events, pump) = MqttSession::start(
        &config.broker,
        client_id,
        Some(bootstrap.will()),
        ReconnectPolicy::from_config(&config.backoff),
        shutdown.clone(),
    );

    let hardware =
        Arc::new(SimulatedHardware::new(kind).with_delay(Duration::from_millis(cli.step_delay_ms)));
    let runtime = bootstrap.into_runtime(session, hardware)?;

    let signals = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received");
        signals.cancel();
    });

    let outcome = runtime.run(events, shutdown.clone()).await;
    shutdown.cancel();

    match tokio::time::timeout(FLUSH_TIMEOUT, pump.join()).await {
        Ok(session_result) => session_result.context("broker session")?,
        Err(_) => warn!("Broker session did not close in time"),
    }
    outcome.context("module runtime")?;
    Ok(())
}

/// Wait for Ctrl+C, SIGTERM or SIGTSTP
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = unix_signal(signal::unix::SignalKind::terminate());
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    #[cfg(target_os = "linux")]
    let suspend = unix_signal(signal::unix::SignalKind::from_raw(SIGTSTP));
    #[cfg(not(target_os = "linux"))]
    let suspend = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
        _ = suspend => info!("Received SIGTSTP"),
    }
}

#[cfg(target_os = "linux")]
const SIGTSTP: i32 = 20;

#[cfg(unix)]
async fn unix_signal(kind: signal::unix::SignalKind) {
    match signal::unix::signal(kind) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(e) => {
            error!(error = %e, "Failed to install signal handler");
            std::future::pending::<()>().await;
        }
    }
}
