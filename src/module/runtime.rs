//! # Module Runtime
//!
//! Hosts one module: owns its order book, state machine, calibration mode
//! and sequence counters, and is the only writer on the module's own topics.
//!
//! One task consumes [`SessionEvent`]s in delivery order. The hardware step
//! of the RUNNING action executes on a spawned task and reports back over a
//! oneshot channel, so orders and instant actions keep flowing while the
//! station works. Every State frame is published (awaited) before the next
//! transition starts.
//!
//! ## Startup
//!
//! ```text
//! RuntimeBootstrap::prepare ──► will() ──► MqttSession::start(will)
//!          │
//!          └──► into_runtime(session, hardware) ──► run(events, shutdown)
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::clock::SequenceCounters;
use crate::config::{ApsConfig, ConfigResult};
use crate::connection::ConnectionLifecycle;
use crate::constants::{error_types, metadata_keys, reference_keys, system};
use crate::error::{ApsError, Result};
use crate::logging::{log_action_transition, log_connection_event, log_error, log_order_operation};
use crate::messaging::codec;
use crate::messaging::errors::MessagingError;
use crate::messaging::frames::{
    ErrorRecord, Frame, InstantAction, InstantActionFrame, Metadata, OrderFrame, StateFrame,
};
use crate::messaging::topics::{self, Role, Topic, TopicKind, TopicOrigin};
use crate::messaging::transport::{
    InboundMessage, MqttTransport, OutboundMessage, QualityOfService, SessionEvent,
};
use crate::module::calibration::{CalibrationCommand, CalibrationError, CalibrationMode};
use crate::module::commands::{ModuleKind, CHECK_QUALITY, RESULT_FAILED};
use crate::module::hardware::{ExecutionRequest, HardwareOutcome, ModuleHardware};
use crate::module::instant_actions::{
    dock_reference, factsheet_frame, invalid_instant_action, synthetic_action_state,
    InstantActionKind,
};
use crate::module::order_book::{Acceptance, OrderBook, OrderDecision, TrackedAction};
use crate::persistence::JsonFileStore;
use crate::state_machine::{ActionStatus, ModuleEvent, ModuleState, ModuleStateMachine};

const COMPONENT: &str = "module_runtime";
/// Upper bound for a per-action timeout taken from metadata
const MAX_ACTION_TIMEOUT_SECS: f64 = 86_400.0;

/// Identity and limits of one module runtime
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeSettings {
    pub serial: String,
    pub kind: ModuleKind,
    pub manufacturer: String,
    pub version: String,
    pub default_action_timeout: Duration,
    /// Calibration data and connection sequence live here when set
    pub state_dir: Option<PathBuf>,
}

impl RuntimeSettings {
    pub fn new(serial: impl Into<String>, kind: ModuleKind) -> Self {
        Self {
            serial: serial.into(),
            kind,
            manufacturer: system::DEFAULT_MANUFACTURER.to_string(),
            version: system::PROTOCOL_VERSION.to_string(),
            default_action_timeout: Duration::from_secs(system::DEFAULT_ACTION_TIMEOUT_SECS),
            state_dir: None,
        }
    }

    /// Settings of the module named by `APS_MODULE_SERIAL`
    pub fn from_config(config: &ApsConfig) -> ConfigResult<Self> {
        let module = &config.module;
        Ok(Self {
            serial: module.require_serial()?.to_string(),
            kind: module.kind,
            manufacturer: module.manufacturer.clone(),
            version: module.protocol_version.clone(),
            default_action_timeout: module.default_action_timeout(),
            state_dir: module.state_dir.clone(),
        })
    }

    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = Some(dir.into());
        self
    }

    pub fn with_default_action_timeout(mut self, timeout: Duration) -> Self {
        self.default_action_timeout = timeout;
        self
    }

    pub fn role(&self) -> Role {
        self.kind.role()
    }
}

/// Connection state minted before the broker session exists.
///
/// The Will has to be handed to the session at connect time, so it is
/// minted here, ahead of every other connection frame of the process.
#[derive(Debug)]
pub struct RuntimeBootstrap {
    settings: RuntimeSettings,
    lifecycle: ConnectionLifecycle,
    counters: SequenceCounters,
    store: Option<JsonFileStore>,
    will: OutboundMessage,
}

impl RuntimeBootstrap {
    pub fn prepare(settings: RuntimeSettings) -> Result<Self> {
        let store = match &settings.state_dir {
            Some(dir) => Some(JsonFileStore::open(dir.clone())?),
            None => None,
        };

        let mut lifecycle = ConnectionLifecycle::new(
            settings.role(),
            settings.serial.clone(),
            settings.manufacturer.clone(),
            settings.version.clone(),
        )?;
        if let Some(store) = &store {
            lifecycle = lifecycle.with_store(store.clone());
        }

        let mut counters = SequenceCounters::new();
        lifecycle.restore(&mut counters);
        let will = lifecycle.will_message(&mut counters)?;

        Ok(Self {
            settings,
            lifecycle,
            counters,
            store,
            will,
        })
    }

    /// Retained CONNECTIONBROKEN to register as the MQTT Will
    pub fn will(&self) -> &OutboundMessage {
        &self.will
    }

    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    pub fn into_runtime<T, H>(self, transport: T, hardware: Arc<H>) -> Result<ModuleRuntime<T, H>>
    where
        T: MqttTransport,
        H: ModuleHardware,
    {
        let RuntimeBootstrap {
            settings,
            lifecycle,
            counters,
            store,
            ..
        } = self;

        let topics = OwnTopics::new(settings.role(), &settings.serial)?;
        let mut book = OrderBook::new(settings.serial.clone(), settings.kind);
        book.set_loads(hardware.loads());
        book.set_battery(hardware.battery_state());

        Ok(ModuleRuntime {
            machine: ModuleStateMachine::new(settings.serial.clone(), settings.kind),
            calibration: CalibrationMode::new(settings.kind, store),
            book,
            settings,
            transport,
            hardware,
            lifecycle,
            counters,
            topics,
            in_flight: None,
            factsheet_announced: false,
        })
    }
}

#[derive(Debug, Clone)]
struct OwnTopics {
    state: String,
    order: String,
    instant_action: String,
    /// Transports have no factsheet topic
    factsheet: Option<String>,
}

impl OwnTopics {
    fn new(role: Role, serial: &str) -> Result<Self> {
        Ok(Self {
            state: topics::topic(role, serial, TopicKind::State)?,
            order: topics::topic(role, serial, TopicKind::Order)?,
            instant_action: topics::topic(role, serial, TopicKind::InstantAction)?,
            factsheet: topics::topic(role, serial, TopicKind::Factsheet).ok(),
        })
    }
}

#[derive(Debug)]
enum ExecutionReport {
    Completed(HardwareOutcome),
    Failed(String),
    TimedOut(Duration),
}

struct InFlight {
    action_id: String,
    receiver: oneshot::Receiver<ExecutionReport>,
    handle: JoinHandle<()>,
}

impl InFlight {
    async fn wait(self) -> (String, ExecutionReport) {
        let report = self.receiver.await.unwrap_or_else(|_| lost_report());
        (self.action_id, report)
    }
}

fn lost_report() -> ExecutionReport {
    ExecutionReport::Failed("hardware task ended without a report".to_string())
}

/// Resolves when the in-flight hardware step reports; never when idle
async fn next_report(in_flight: &mut Option<InFlight>) -> (String, ExecutionReport) {
    match in_flight {
        Some(flight) => {
            let report = (&mut flight.receiver).await.unwrap_or_else(|_| lost_report());
            (flight.action_id.clone(), report)
        }
        None => std::future::pending().await,
    }
}

fn action_timeout(metadata: &Metadata) -> Option<Duration> {
    metadata
        .get(metadata_keys::TIMEOUT)
        .and_then(Value::as_f64)
        .filter(|secs| secs.is_finite() && *secs > 0.0)
        .map(|secs| Duration::from_secs_f64(secs.min(MAX_ACTION_TIMEOUT_SECS)))
}

pub struct ModuleRuntime<T, H> {
    settings: RuntimeSettings,
    transport: T,
    hardware: Arc<H>,
    book: OrderBook,
    machine: ModuleStateMachine,
    calibration: CalibrationMode,
    lifecycle: ConnectionLifecycle,
    counters: SequenceCounters,
    topics: OwnTopics,
    in_flight: Option<InFlight>,
    factsheet_announced: bool,
}

impl<T, H> ModuleRuntime<T, H>
where
    T: MqttTransport,
    H: ModuleHardware,
{
    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    pub fn serial(&self) -> &str {
        &self.settings.serial
    }

    pub fn order_book(&self) -> &OrderBook {
        &self.book
    }

    pub fn module_state(&self) -> ModuleState {
        self.machine.current_state()
    }

    pub fn calibration(&self) -> &CalibrationMode {
        &self.calibration
    }

    /// Whether a hardware step is executing
    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Consume session events until shutdown or until the session ends,
    /// then publish OFFLINE and disconnect.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<SessionEvent>,
        shutdown: CancellationToken,
    ) -> Result<()> {
        tracing::info!(
            serial = %self.settings.serial,
            kind = %self.settings.kind,
            "Module runtime started"
        );

        let outcome = loop {
            let step = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break Ok(()),
                (action_id, report) = next_report(&mut self.in_flight) => {
                    self.in_flight = None;
                    self.on_execution_report(&action_id, report).await
                }
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        tracing::warn!(serial = %self.settings.serial, "Session ended");
                        break Ok(());
                    }
                },
            };
            if let Err(e) = step.or_else(|e| self.absorb("run", e)) {
                break Err(e);
            }
        };

        if let Err(e) = self.shutdown().await {
            log_error(COMPONENT, "shutdown", &e.to_string(), Some(self.settings.serial.as_str()));
        }
        outcome
    }

    /// Apply one session event
    pub async fn handle_event(&mut self, event: SessionEvent) -> Result<()> {
        match event {
            SessionEvent::Connected => self.on_connected().await,
            SessionEvent::Message(message) => self.on_message(message).await,
            SessionEvent::Disconnected { reason } => {
                log_connection_event(&self.settings.serial, "disconnected", Some(reason.as_str()));
                Ok(())
            }
        }
    }

    /// Wait for the in-flight hardware step and everything it unlocks.
    /// Used where no event loop drives the runtime.
    pub async fn settle(&mut self) -> Result<()> {
        while let Some(flight) = self.in_flight.take() {
            let (action_id, report) = flight.wait().await;
            self.on_execution_report(&action_id, report).await?;
        }
        Ok(())
    }

    /// Publish OFFLINE and disconnect
    pub async fn shutdown(&mut self) -> Result<()> {
        if let Some(flight) = self.in_flight.take() {
            tracing::warn!(
                serial = %self.settings.serial,
                action_id = %flight.action_id,
                "Abandoning running action on shutdown"
            );
            flight.handle.abort();
        }
        let offline = self.lifecycle.offline_message(&mut self.counters)?;
        self.publish_own(offline).await?;
        self.transport.disconnect().await?;
        log_connection_event(&self.settings.serial, "offline", None);
        Ok(())
    }

    /// Publish on one of this module's own topics; anything else is refused
    pub async fn publish_own(&self, message: OutboundMessage) -> Result<()> {
        let owned = matches!(
            topics::parse(&message.topic),
            Some(Topic::Device { role, serial, origin: TopicOrigin::Device, .. })
                if role == self.settings.role() && serial == self.settings.serial
        );
        if !owned {
            return Err(MessagingError::foreign_topic(&message.topic, &self.settings.serial).into());
        }
        self.transport.publish(message).await?;
        Ok(())
    }

    fn absorb(&self, operation: &str, error: ApsError) -> Result<()> {
        if error.is_transport_failure() {
            return Err(error);
        }
        log_error(
            COMPONENT,
            operation,
            &error.to_string(),
            Some(self.settings.serial.as_str()),
        );
        Ok(())
    }

    async fn on_connected(&mut self) -> Result<()> {
        let online = self.lifecycle.online_message(&mut self.counters)?;
        self.publish_own(online).await?;

        for topic in [&self.topics.order, &self.topics.instant_action] {
            self.transport
                .subscribe(topic, QualityOfService::ExactlyOnce)
                .await?;
        }

        if !self.factsheet_announced {
            self.publish_factsheet().await?;
            self.factsheet_announced = true;
        }
        self.publish_state(None).await
    }

    async fn on_message(&mut self, message: InboundMessage) -> Result<()> {
        let kind = if message.topic == self.topics.order {
            TopicKind::Order
        } else if message.topic == self.topics.instant_action {
            TopicKind::InstantAction
        } else {
            tracing::trace!(serial = %self.settings.serial, topic = %message.topic, "Ignoring foreign topic");
            return Ok(());
        };

        match codec::decode_kind(kind, &message.payload) {
            Ok(Frame::Order(order)) => self.on_order(order).await,
            Ok(Frame::InstantAction(frame)) => self.on_instant_actions(frame).await,
            Ok(_) => Ok(()),
            Err(e) => {
                tracing::warn!(
                    serial = %self.settings.serial,
                    topic = %message.topic,
                    reason = e.reason(),
                    error = %e,
                    "Dropping undecodable frame"
                );
                if !e.is_validation_failure() {
                    return Ok(());
                }
                self.book.add_error(
                    ErrorRecord::warning(error_types::VALIDATION_ERROR)
                        .with_reference(reference_keys::TOPIC, message.topic)
                        .with_description(e.to_string()),
                );
                self.publish_state(None).await
            }
        }
    }

    async fn on_order(&mut self, order: OrderFrame) -> Result<()> {
        let serial = self.settings.serial.clone();

        if self.calibration.is_active() {
            self.book.add_error(
                ErrorRecord::warning(error_types::ORDER_ERROR)
                    .with_reference(reference_keys::ORDER_ID, order.order_id.clone())
                    .with_reference(reference_keys::ORDER_UPDATE_ID, order.order_update_id)
                    .with_reference(reference_keys::ACTION_ID, order.action.id.clone())
                    .with_description("module is in calibration mode"),
            );
            log_order_operation(
                &serial,
                &order.order_id,
                order.order_update_id,
                "rejected",
                Some("calibration mode"),
            );
            return self.publish_state(None).await;
        }

        match self.book.accept_order(&order) {
            OrderDecision::Accepted(Acceptance::Duplicate) => {
                log_order_operation(&serial, &order.order_id, order.order_update_id, "duplicate", None);
                Ok(())
            }
            OrderDecision::Accepted(acceptance) => {
                let outcome = match acceptance {
                    Acceptance::New => "accepted",
                    _ => "updated",
                };
                log_order_operation(
                    &serial,
                    &order.order_id,
                    order.order_update_id,
                    outcome,
                    Some(order.action.command.as_str()),
                );
                self.start_next().await
            }
            OrderDecision::Rejected { error_kind } => {
                log_order_operation(
                    &serial,
                    &order.order_id,
                    order.order_update_id,
                    "rejected",
                    Some(error_kind.as_str()),
                );
                self.publish_state(None).await
            }
        }
    }

    /// Hand the next WAITING action to the hardware if the module is free
    async fn start_next(&mut self) -> Result<()> {
        if self.in_flight.is_some() || self.machine.current_state() != ModuleState::Idle {
            return Ok(());
        }
        let Some(action) = self.book.next_waiting().cloned() else {
            return Ok(());
        };

        if let Err(e) = self
            .machine
            .transition(ModuleEvent::start(&action.id, &action.command))
        {
            // guard refusal, e.g. the module kind cannot run the command
            return self.fail_action(&action, &e.to_string()).await;
        }
        self.book
            .set_action_state(&action.id, ActionStatus::Running, None)?;
        log_action_transition(
            &self.settings.serial,
            &action.id,
            &action.command,
            "WAITING",
            "RUNNING",
        );
        self.publish_state(Some(action.id.as_str())).await?;
        self.spawn_execution(action);
        Ok(())
    }

    fn spawn_execution(&mut self, action: TrackedAction) {
        let limit = action_timeout(&action.metadata).unwrap_or(self.settings.default_action_timeout);
        let request = ExecutionRequest::new(&action.id, &action.command, action.metadata.clone());
        let hardware = Arc::clone(&self.hardware);
        let (tx, receiver) = oneshot::channel();

        let handle = tokio::spawn(async move {
            let report = match tokio::time::timeout(limit, hardware.execute(request)).await {
                Ok(Ok(outcome)) => ExecutionReport::Completed(outcome),
                Ok(Err(e)) => ExecutionReport::Failed(e.to_string()),
                Err(_) => ExecutionReport::TimedOut(limit),
            };
            if tx.send(report).is_err() {
                tracing::debug!("Execution report dropped, runtime gone");
            }
        });

        self.in_flight = Some(InFlight {
            action_id: action.id,
            receiver,
            handle,
        });
    }

    async fn on_execution_report(&mut self, action_id: &str, report: ExecutionReport) -> Result<()> {
        let running = self
            .book
            .action(action_id)
            .filter(|a| a.state == ActionStatus::Running)
            .cloned();
        let Some(action) = running else {
            tracing::info!(
                serial = %self.settings.serial,
                action_id = %action_id,
                "Discarding completion of an action cleared by reset"
            );
            return self.start_next().await;
        };

        match report {
            ExecutionReport::Completed(outcome) => self.finish_action(&action, outcome).await?,
            ExecutionReport::Failed(reason) => self.fail_action(&action, &reason).await?,
            ExecutionReport::TimedOut(limit) => {
                let reason = format!("timed out after {:.3}s", limit.as_secs_f64());
                self.fail_action(&action, &reason).await?
            }
        }
        self.start_next().await
    }

    async fn finish_action(&mut self, action: &TrackedAction, outcome: HardwareOutcome) -> Result<()> {
        if let Some(loads) = outcome.loads {
            self.book.set_loads(loads);
        }
        let rejected =
            action.command == CHECK_QUALITY && outcome.result.as_deref() == Some(RESULT_FAILED);
        let event = if rejected {
            ModuleEvent::QualityRejected
        } else {
            ModuleEvent::Complete
        };
        self.machine.transition(event)?;

        self.book
            .set_action_state(&action.id, ActionStatus::Finished, outcome.result)?;
        log_action_transition(
            &self.settings.serial,
            &action.id,
            &action.command,
            "RUNNING",
            "FINISHED",
        );
        self.publish_state(Some(action.id.as_str())).await?;

        if rejected {
            self.machine.recover()?;
        }
        Ok(())
    }

    /// FAILED with a `{command}_error` FATAL, cascading to the rest of the order
    async fn fail_action(&mut self, action: &TrackedAction, reason: &str) -> Result<()> {
        let from = action.state.to_string();
        let mut error = ErrorRecord::fatal(error_types::command_error(&action.command))
            .with_reference(reference_keys::ACTION_ID, action.id.clone())
            .with_reference(reference_keys::ACTION_COMMAND, action.command.clone())
            .with_description(reason);
        if let Some(order_id) = self.book.last_order_id() {
            error = error.with_reference(reference_keys::ORDER_ID, order_id.to_string());
        }

        let cascaded = self
            .book
            .set_action_state(&action.id, ActionStatus::Failed, None)?;
        self.book.add_error(error);
        if self.machine.current_state() == ModuleState::Processing {
            self.machine.transition(ModuleEvent::fail_with_error(reason))?;
        }

        log_action_transition(&self.settings.serial, &action.id, &action.command, &from, "FAILED");
        self.publish_state(Some(action.id.as_str())).await?;
        for skipped in &cascaded {
            if let Some(later) = self.book.action(skipped) {
                log_action_transition(
                    &self.settings.serial,
                    &later.id,
                    &later.command,
                    "WAITING",
                    "FAILED",
                );
            }
            self.publish_state(Some(skipped.as_str())).await?;
        }

        if self.machine.current_state() == ModuleState::Reset {
            self.machine.recover()?;
        }
        Ok(())
    }

    async fn on_instant_actions(&mut self, frame: InstantActionFrame) -> Result<()> {
        for action in frame.actions {
            self.on_instant_action(action).await?;
        }
        Ok(())
    }

    async fn on_instant_action(&mut self, action: InstantAction) -> Result<()> {
        let kind = InstantActionKind::classify(&action.action_type);
        tracing::info!(
            serial = %self.settings.serial,
            action_id = %action.action_id,
            action_type = %action.action_type,
            "Instant action received"
        );

        match kind {
            InstantActionKind::Unknown => {
                self.reject_instant(&action, "unknown instant action type").await
            }
            _ if !kind.available_for(self.settings.kind) => {
                let reason = format!("not available on {}", self.settings.kind);
                self.reject_instant(&action, reason).await
            }
            InstantActionKind::FactsheetRequest => {
                self.publish_factsheet().await?;
                self.report_instant(&action, ActionStatus::Finished, None).await
            }
            InstantActionKind::Reset => self.reset(&action).await,
            InstantActionKind::Calibration(command) => self.calibrate(command, &action).await,
            InstantActionKind::FindInitialDockPosition => {
                let node = dock_reference(&action);
                self.report_instant(&action, ActionStatus::Finished, Some(node))
                    .await
            }
        }
    }

    /// Abort the order, clear every error and return to IDLE at the home position.
    ///
    /// A hardware step already in progress is not interrupted; its completion
    /// is discarded when it arrives.
    async fn reset(&mut self, action: &InstantAction) -> Result<()> {
        let aborted = self.book.active_order_id().map(str::to_string);
        self.book.clear();
        self.machine.transition(ModuleEvent::Reset)?;
        self.machine.transition(ModuleEvent::CleanupComplete)?;

        let homed = self.hardware.home().await;
        self.book.set_loads(self.hardware.loads());
        tracing::info!(
            serial = %self.settings.serial,
            aborted_order = ?aborted,
            step_in_progress = self.in_flight.is_some(),
            "Module reset"
        );

        match homed {
            Ok(()) => self.report_instant(action, ActionStatus::Finished, None).await,
            Err(e) => {
                log_error(COMPONENT, "reset", &e.to_string(), Some(self.settings.serial.as_str()));
                self.report_instant(action, ActionStatus::Failed, Some(e.to_string()))
                    .await
            }
        }
    }

    async fn calibrate(&mut self, command: CalibrationCommand, action: &InstantAction) -> Result<()> {
        if command == CalibrationCommand::Start && (self.book.has_active_order() || self.in_flight.is_some()) {
            return self.reject_instant(action, "an order is active").await;
        }

        match self.calibration.handle(action, self.hardware.as_ref()).await {
            Ok(result) => {
                self.report_instant(action, ActionStatus::Finished, Some(result))
                    .await
            }
            Err(
                e @ (CalibrationError::Motion(_)
                | CalibrationError::Persistence(_)
                | CalibrationError::NoStorage),
            ) => {
                log_error(COMPONENT, &action.action_type, &e.to_string(), Some(self.settings.serial.as_str()));
                self.report_instant(action, ActionStatus::Failed, Some(e.to_string()))
                    .await
            }
            Err(e) => self.reject_instant(action, e.to_string()).await,
        }
    }

    async fn reject_instant(&mut self, action: &InstantAction, reason: impl Into<String>) -> Result<()> {
        let reason = reason.into();
        tracing::warn!(
            serial = %self.settings.serial,
            action_id = %action.action_id,
            action_type = %action.action_type,
            reason = %reason,
            "Instant action refused"
        );
        self.book.add_error(invalid_instant_action(action, reason));
        self.publish_state(None).await
    }

    async fn report_instant(
        &mut self,
        action: &InstantAction,
        state: ActionStatus,
        result: Option<String>,
    ) -> Result<()> {
        self.book.set_battery(self.hardware.battery_state());
        let header_id = self.counters.next(TopicKind::State);
        let frame = self
            .book
            .snapshot_with(header_id, Some(synthetic_action_state(action, state, result)));
        self.publish_state_frame(frame).await
    }

    /// State frame reporting `focus`, or the most recently changed action
    async fn publish_state(&mut self, focus: Option<&str>) -> Result<()> {
        self.book.set_battery(self.hardware.battery_state());
        let header_id = self.counters.next(TopicKind::State);
        let frame = match focus {
            Some(action_id) => self.book.snapshot_action(header_id, action_id),
            None => self.book.snapshot(header_id),
        };
        self.publish_state_frame(frame).await
    }

    async fn publish_state_frame(&mut self, frame: StateFrame) -> Result<()> {
        let header_id = frame.header_id;
        let message = OutboundMessage::frame(
            self.topics.state.clone(),
            &Frame::State(frame),
            QualityOfService::ExactlyOnce,
            false,
        )?;
        self.publish_own(message).await?;
        tracing::debug!(serial = %self.settings.serial, header_id = header_id, "State published");
        self.book.drain_warnings();
        Ok(())
    }

    async fn publish_factsheet(&mut self) -> Result<()> {
        let Some(topic) = self.topics.factsheet.clone() else {
            return Ok(());
        };
        let header_id = self.counters.next(TopicKind::Factsheet);
        let frame = factsheet_frame(
            self.settings.kind,
            &self.settings.serial,
            &self.settings.manufacturer,
            &self.settings.version,
            header_id,
        );
        let message = OutboundMessage::frame(
            topic,
            &Frame::Factsheet(frame),
            QualityOfService::AtLeastOnce,
            true,
        )?;
        self.publish_own(message).await
    }
}
