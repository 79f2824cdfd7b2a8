//! Shared fixtures for the integration tests

use std::sync::Arc;
use std::time::Duration;

use aps_core::messaging::topics;
use aps_core::messaging::{
    ActionState, Frame, InboundMessage, InstantAction, InstantActionFrame, OrderAction,
    OrderFrame, RecordingTransport, Role, SessionEvent, StateFrame, TopicKind,
};
use aps_core::module::{ModuleKind, ModuleRuntime, RuntimeBootstrap, RuntimeSettings, SimulatedHardware};
use aps_core::state_machine::ActionStatus;

pub type TestRuntime = ModuleRuntime<RecordingTransport, SimulatedHardware>;

pub const MILL_SERIAL: &str = "SVR3QA0022";
pub const AIQS_SERIAL: &str = "SVR4H76530";
pub const FTS_SERIAL: &str = "5iO4";

/// A module runtime wired to a recording transport
pub struct Harness {
    pub runtime: TestRuntime,
    pub transport: RecordingTransport,
    pub hardware: Arc<SimulatedHardware>,
    pub serial: String,
    pub role: Role,
}

impl Harness {
    pub fn new(serial: &str, kind: ModuleKind) -> Self {
        Self::with_settings(RuntimeSettings::new(serial, kind))
    }

    pub fn with_settings(settings: RuntimeSettings) -> Self {
        let hardware = Arc::new(SimulatedHardware::new(settings.kind).with_delay(Duration::from_millis(1)));
        Self::with_hardware(settings, hardware)
    }

    pub fn with_hardware(settings: RuntimeSettings, hardware: Arc<SimulatedHardware>) -> Self {
        let serial = settings.serial.clone();
        let role = settings.role();
        let transport = RecordingTransport::new();
        let runtime = RuntimeBootstrap::prepare(settings)
            .expect("bootstrap")
            .into_runtime(transport.clone(), Arc::clone(&hardware))
            .expect("runtime");
        Self {
            runtime,
            transport,
            hardware,
            serial,
            role,
        }
    }

    pub fn topic(&self, kind: TopicKind) -> String {
        topics::topic(self.role, &self.serial, kind).expect("topic")
    }

    pub async fn connect(&mut self) {
        self.runtime
            .handle_event(SessionEvent::Connected)
            .await
            .expect("connect");
    }

    pub async fn send_order(&mut self, order_id: &str, update: u64, action: OrderAction) {
        let frame = OrderFrame::new(order_id, update, action);
        let message = InboundMessage::from_frame(self.topic(TopicKind::Order), &Frame::Order(frame))
            .expect("encode order");
        self.runtime
            .handle_event(SessionEvent::Message(message))
            .await
            .expect("order");
    }

    pub async fn send_raw(&mut self, kind: TopicKind, payload: &str) {
        let message = InboundMessage::new(self.topic(kind), payload.as_bytes().to_vec());
        self.runtime
            .handle_event(SessionEvent::Message(message))
            .await
            .expect("raw frame");
    }

    pub async fn send_instant(&mut self, actions: Vec<InstantAction>) {
        let frame = InstantActionFrame::new(actions);
        let message = InboundMessage::from_frame(
            self.topic(TopicKind::InstantAction),
            &Frame::InstantAction(frame),
        )
        .expect("encode instant action");
        self.runtime
            .handle_event(SessionEvent::Message(message))
            .await
            .expect("instant action");
    }

    pub async fn settle(&mut self) {
        self.runtime.settle().await.expect("settle");
    }

    pub fn states(&self) -> Vec<StateFrame> {
        self.transport.state_frames()
    }

    pub fn last_state(&self) -> StateFrame {
        self.states().pop().expect("at least one state frame")
    }

    /// `(actionId, state)` of every State frame that reports an action
    pub fn action_trail(&self) -> Vec<(String, ActionStatus)> {
        self.states()
            .into_iter()
            .filter_map(|s| s.action_state)
            .map(|a: ActionState| (a.id, a.state))
            .collect()
    }
}

pub fn action(id: &str, command: &str) -> OrderAction {
    OrderAction::new(id, command)
}

pub fn instant(action_type: &str, action_id: &str) -> InstantAction {
    InstantAction::new(action_type, action_id)
}

pub fn trail(entries: &[(&str, ActionStatus)]) -> Vec<(String, ActionStatus)> {
    entries
        .iter()
        .map(|(id, state)| (id.to_string(), *state))
        .collect()
}
