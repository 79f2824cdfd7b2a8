//! # Order Book
//!
//! Per-module record of the order being driven, its actions and the protocol
//! errors waiting to be surfaced. The book decides whether an incoming order
//! is accepted, tracks action progression, and renders State frames.
//!
//! Orders on the wire carry one action. An update (same `orderId`, higher
//! `orderUpdateId`) appends its action to the order, which is how a CCU
//! workflow drives one module step by step on a single `orderId`.
//!
//! The book also remembers the highest `orderUpdateId` of recently seen
//! orders, so an older `orderId` that comes back can never move backwards.

use std::collections::{HashMap, VecDeque};

use crate::clock::Timestamp;
use crate::constants::{error_types, reference_keys};
use crate::messaging::frames::{
    ActionState, BatteryState, ErrorLevel, ErrorRecord, Load, Metadata, OrderFrame, StateFrame,
};
use crate::module::commands::ModuleKind;
use crate::state_machine::{ActionStatus, StateMachineError, StateMachineResult};

/// Orders whose highest `orderUpdateId` is remembered
const SEEN_ORDER_LIMIT: usize = 256;

/// One action of the current order
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedAction {
    pub id: String,
    pub command: String,
    pub metadata: Metadata,
    pub state: ActionStatus,
    pub result: Option<String>,
    pub updated_at: Timestamp,
}

impl TrackedAction {
    fn waiting(order: &OrderFrame) -> Self {
        Self {
            id: order.action.id.clone(),
            command: order.action.command.clone(),
            metadata: order.action.metadata.clone(),
            state: ActionStatus::Waiting,
            result: None,
            updated_at: Timestamp::now(),
        }
    }

    pub fn to_action_state(&self) -> ActionState {
        ActionState {
            command: self.command.clone(),
            id: self.id.clone(),
            state: self.state,
            timestamp: self.updated_at,
            result: self.result.clone(),
        }
    }
}

/// How an accepted order was applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acceptance {
    /// A fresh order; its action is WAITING
    New,
    /// Higher `orderUpdateId` on the current order; its action was appended
    Update,
    /// Same `orderId` and `orderUpdateId` as the last accepted order; no-op
    Duplicate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderDecision {
    Accepted(Acceptance),
    Rejected { error_kind: String },
}

impl OrderDecision {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }

    fn rejected(error_kind: &str) -> Self {
        Self::Rejected {
            error_kind: error_kind.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrderBook {
    serial: String,
    kind: ModuleKind,
    active_order_id: Option<String>,
    last_order_id: Option<String>,
    order_update_id: u64,
    actions: Vec<TrackedAction>,
    order_failed: bool,
    /// Index of the action reported in `actionState`
    focus: Option<usize>,
    errors: Vec<ErrorRecord>,
    loads: Vec<Load>,
    battery: Option<BatteryState>,
    /// orderId → highest accepted `orderUpdateId`; survives reset
    seen_orders: HashMap<String, u64>,
    /// Insertion order of `seen_orders`, oldest first
    seen_order_ids: VecDeque<String>,
}

impl OrderBook {
    pub fn new(serial: impl Into<String>, kind: ModuleKind) -> Self {
        Self {
            serial: serial.into(),
            kind,
            active_order_id: None,
            last_order_id: None,
            order_update_id: 0,
            actions: Vec::new(),
            order_failed: false,
            focus: None,
            errors: Vec::new(),
            loads: Vec::new(),
            battery: None,
            seen_orders: HashMap::new(),
            seen_order_ids: VecDeque::new(),
        }
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn active_order_id(&self) -> Option<&str> {
        self.active_order_id.as_deref()
    }

    pub fn last_order_id(&self) -> Option<&str> {
        self.last_order_id.as_deref()
    }

    pub fn order_update_id(&self) -> u64 {
        self.order_update_id
    }

    pub fn actions(&self) -> &[TrackedAction] {
        &self.actions
    }

    pub fn action(&self, action_id: &str) -> Option<&TrackedAction> {
        self.actions.iter().find(|a| a.id == action_id)
    }

    pub fn errors(&self) -> &[ErrorRecord] {
        &self.errors
    }

    /// Highest `orderUpdateId` accepted for `order_id`, if it is remembered
    pub fn highest_update_id(&self, order_id: &str) -> Option<u64> {
        self.seen_orders.get(order_id).copied()
    }

    /// Whether the active order still has work left
    pub fn has_active_order(&self) -> bool {
        self.active_order_id.is_some() && self.actions.iter().any(|a| !a.state.is_terminal())
    }

    /// Decide whether `order` is taken on
    pub fn accept_order(&mut self, order: &OrderFrame) -> OrderDecision {
        if self.last_order_id.as_deref() == Some(order.order_id.as_str()) {
            return self.accept_same_order(order);
        }

        if let Some(highest) = self.highest_update_id(&order.order_id) {
            if order.order_update_id < highest {
                return self.reject_stale(order, highest);
            }
            if order.order_update_id == highest {
                return OrderDecision::Accepted(Acceptance::Duplicate);
            }
        }

        if self.has_active_order() {
            let active = self.active_order_id.clone().unwrap_or_default();
            self.add_error(
                order_references(ErrorRecord::warning(error_types::ORDER_ERROR), order)
                    .with_description(format!("order {active} is still active")),
            );
            return OrderDecision::rejected(error_types::ORDER_ERROR);
        }

        if !self.kind.supports(&order.action.command) {
            return self.reject_unsupported(order);
        }

        self.actions = vec![TrackedAction::waiting(order)];
        self.focus = Some(0);
        self.order_failed = false;
        self.last_order_id = Some(order.order_id.clone());
        self.active_order_id = Some(order.order_id.clone());
        self.order_update_id = order.order_update_id;
        self.remember(order);
        OrderDecision::Accepted(Acceptance::New)
    }

    fn accept_same_order(&mut self, order: &OrderFrame) -> OrderDecision {
        if order.order_update_id < self.order_update_id {
            return self.reject_stale(order, self.order_update_id);
        }
        if order.order_update_id == self.order_update_id {
            return OrderDecision::Accepted(Acceptance::Duplicate);
        }
        if self.action(&order.action.id).is_some() {
            self.add_error(
                order_references(ErrorRecord::warning(error_types::ORDER_ERROR), order)
                    .with_description("action id already used by this order"),
            );
            return OrderDecision::rejected(error_types::ORDER_ERROR);
        }
        if !self.kind.supports(&order.action.command) {
            return self.reject_unsupported(order);
        }

        let mut action = TrackedAction::waiting(order);
        if self.order_failed {
            action.state = ActionStatus::Failed;
        } else {
            self.active_order_id = Some(order.order_id.clone());
        }
        self.actions.push(action);
        if self.focus.is_none() {
            self.focus = Some(self.actions.len() - 1);
        }
        self.order_update_id = order.order_update_id;
        self.remember(order);
        OrderDecision::Accepted(Acceptance::Update)
    }

    fn reject_stale(&mut self, order: &OrderFrame, highest: u64) -> OrderDecision {
        self.add_error(
            order_references(ErrorRecord::warning(error_types::ORDER_UPDATE_ERROR), order)
                .with_description(format!(
                    "orderUpdateId {} is older than {}",
                    order.order_update_id, highest
                )),
        );
        OrderDecision::rejected(error_types::ORDER_UPDATE_ERROR)
    }

    fn reject_unsupported(&mut self, order: &OrderFrame) -> OrderDecision {
        self.add_error(
            order_references(ErrorRecord::warning(error_types::ORDER_ERROR), order)
                .with_description(format!(
                    "{} does not support {}",
                    self.kind, order.action.command
                )),
        );
        OrderDecision::rejected(error_types::ORDER_ERROR)
    }

    fn remember(&mut self, order: &OrderFrame) {
        let known = self
            .seen_orders
            .insert(order.order_id.clone(), order.order_update_id)
            .is_some();
        if known {
            return;
        }
        self.seen_order_ids.push_back(order.order_id.clone());
        while self.seen_order_ids.len() > SEEN_ORDER_LIMIT {
            if let Some(oldest) = self.seen_order_ids.pop_front() {
                self.seen_orders.remove(&oldest);
            }
        }
    }

    /// Next non-terminal action, if any
    pub fn current_action(&self) -> Option<&TrackedAction> {
        self.actions.iter().find(|a| !a.state.is_terminal())
    }

    /// Action currently RUNNING
    pub fn running_action(&self) -> Option<&TrackedAction> {
        self.actions.iter().find(|a| a.state == ActionStatus::Running)
    }

    /// First WAITING action, provided nothing is RUNNING
    pub fn next_waiting(&self) -> Option<&TrackedAction> {
        if self.running_action().is_some() {
            return None;
        }
        self.actions.iter().find(|a| a.state == ActionStatus::Waiting)
    }

    /// Move an action to `state`.
    ///
    /// FAILED cascades to every later non-terminal action of the order and
    /// clears the active order; their ids are returned in order. When every
    /// action is terminal the active order is cleared as well.
    pub fn set_action_state(
        &mut self,
        action_id: &str,
        state: ActionStatus,
        result: Option<String>,
    ) -> StateMachineResult<Vec<String>> {
        let index = self
            .actions
            .iter()
            .position(|a| a.id == action_id)
            .ok_or_else(|| StateMachineError::UnknownAction {
                action_id: action_id.to_string(),
            })?;

        let current = self.actions[index].state;
        let other_running = state == ActionStatus::Running
            && self
                .actions
                .iter()
                .any(|a| a.id != action_id && a.state == ActionStatus::Running);
        if !current.can_transition_to(state) || other_running {
            return Err(StateMachineError::InvalidActionTransition {
                action_id: action_id.to_string(),
                from: current.to_string(),
                to: state.to_string(),
            });
        }

        let now = Timestamp::now();
        let action = &mut self.actions[index];
        action.state = state;
        action.result = result;
        action.updated_at = now;
        self.focus = Some(index);

        let mut cascaded = Vec::new();
        if state == ActionStatus::Failed {
            self.order_failed = true;
            for later in self.actions.iter_mut().skip(index + 1) {
                if !later.state.is_terminal() {
                    later.state = ActionStatus::Failed;
                    later.updated_at = now;
                    cascaded.push(later.id.clone());
                }
            }
            self.active_order_id = None;
        } else if self.actions.iter().all(|a| a.state.is_terminal()) {
            self.active_order_id = None;
        }
        Ok(cascaded)
    }

    pub fn add_error(&mut self, error: ErrorRecord) {
        tracing::debug!(
            serial = %self.serial,
            error_type = %error.error_type,
            level = %error.error_level,
            "Protocol error recorded"
        );
        self.errors.push(error);
    }

    /// Drop WARNING errors once they have been surfaced; FATAL ones stay
    /// until a reset
    pub fn drain_warnings(&mut self) {
        self.errors.retain(|e| e.error_level == ErrorLevel::Fatal);
    }

    pub fn set_loads(&mut self, loads: Vec<Load>) {
        self.loads = loads;
    }

    pub fn loads(&self) -> &[Load] {
        &self.loads
    }

    pub fn set_battery(&mut self, battery: Option<BatteryState>) {
        self.battery = battery;
    }

    /// Abort everything: used by the `reset` instant action
    pub fn clear(&mut self) {
        self.active_order_id = None;
        self.last_order_id = None;
        self.order_update_id = 0;
        self.actions.clear();
        self.order_failed = false;
        self.focus = None;
        self.errors.clear();
    }

    /// State frame reporting the most recently changed action
    pub fn snapshot(&self, header_id: u64) -> StateFrame {
        let action_state = self
            .focus
            .and_then(|i| self.actions.get(i))
            .map(TrackedAction::to_action_state);
        self.snapshot_with(header_id, action_state)
    }

    /// State frame reporting `action_id`
    pub fn snapshot_action(&self, header_id: u64, action_id: &str) -> StateFrame {
        let action_state = self.action(action_id).map(TrackedAction::to_action_state);
        self.snapshot_with(header_id, action_state)
    }

    /// State frame carrying an arbitrary `actionState`
    pub fn snapshot_with(&self, header_id: u64, action_state: Option<ActionState>) -> StateFrame {
        StateFrame {
            header_id,
            timestamp: Timestamp::now(),
            serial_number: self.serial.clone(),
            order_id: self.active_order_id.clone().unwrap_or_default(),
            order_update_id: self.order_update_id,
            paused: false,
            action_state,
            battery_state: self.battery.clone(),
            errors: self.errors.clone(),
            loads: self.loads.clone(),
            extra: Metadata::new(),
        }
    }
}

fn order_references(record: ErrorRecord, order: &OrderFrame) -> ErrorRecord {
    record
        .with_reference(reference_keys::ORDER_ID, order.order_id.clone())
        .with_reference(reference_keys::ORDER_UPDATE_ID, order.order_update_id)
        .with_reference(reference_keys::ACTION_ID, order.action.id.clone())
        .with_reference(reference_keys::ACTION_COMMAND, order.action.command.clone())
}
