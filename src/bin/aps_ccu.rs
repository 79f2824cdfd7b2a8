//! # APS CCU
//!
//! Minimal central control unit: connects to the broker, optionally launches
//! one workflow, and keeps driving workflows (including those requested on
//! `ccu/order/request`) until interrupted.
//!
//! ```bash
//! aps-ccu --serial SVR4H73275 PICK DRILL DROP
//! ```

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use aps_core::config::ConfigManager;
use aps_core::connection::ReconnectPolicy;
use aps_core::logging;
use aps_core::messaging::{MqttSession, Role, SessionEvent};
use aps_core::orchestration::CcuCoordinator;

#[derive(Parser)]
#[command(name = "aps-ccu")]
#[command(about = "Drive APS module workflows over MQTT")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Serial of the module the workflow drives
    #[arg(short, long)]
    serial: Option<String>,

    /// Address a transport (FTS) instead of a stationary module
    #[arg(long)]
    transport: bool,

    /// Client id used on the broker
    #[arg(long, default_value = "ccu")]
    client_id: String,

    /// Commands of the workflow, in order
    commands: Vec<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    logging::init_structured_logging();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %format!("{e:#}"), "CCU failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let manager = ConfigManager::load().context("loading configuration")?;
    let config = manager.config();
    config.validate().context("validating configuration")?;

    let shutdown = CancellationToken::new();
    let client_id = config.broker.client_id(&cli.client_id);
    let (session, mut events, pump) = MqttSession::start(
        &config.broker,
        client_id,
        None,
        ReconnectPolicy::from_config(&config.backoff),
        shutdown.clone(),
    );
    let mut ccu = CcuCoordinator::new(session, config.workflow.history_limit);

    // the first step can only go out once the session is up
    loop {
        match events.recv().await {
            Some(SessionEvent::Connected) => {
                ccu.handle_event(SessionEvent::Connected).await?;
                break;
            }
            Some(other) => ccu.handle_event(other).await?,
            None => {
                pump.join().await.context("broker session")?;
                anyhow::bail!("broker session ended before connecting");
            }
        }
    }

    if let Some(serial) = cli.serial.as_deref() {
        if !cli.commands.is_empty() {
            let role = if cli.transport { Role::Transport } else { Role::Module };
            let order_id = ccu.start_workflow(role, serial, cli.commands.clone()).await?;
            info!(order_id = %order_id, serial = %serial, "Workflow launched");
        }
    }

    let signals = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            return;
        }
        info!("Received Ctrl+C");
        signals.cancel();
    });

    let outcome = ccu.run(events, shutdown.clone()).await;
    shutdown.cancel();
    pump.join().await.context("broker session")?;
    outcome.context("ccu coordinator")?;
    Ok(())
}
