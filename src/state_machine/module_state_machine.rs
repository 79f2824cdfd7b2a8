use super::{
    errors::{StateMachineError, StateMachineResult},
    events::ModuleEvent,
    guards::{ModuleIdleGuard, StartContext, StateGuard, SupportedCommandGuard},
    states::ModuleState,
};
use crate::module::commands::ModuleKind;

/// Coarse state machine of one module.
///
/// ```text
/// IDLE ──start──► PROCESSING ──complete──► IDLE
///  │                 │
///  │                 └──fail / quality rejected──► RESET ──cleanup──► IDLE
///  └──reset──► RESET ──► IDLE
/// ```
///
/// Owned by the module runtime; never shared between tasks.
#[derive(Debug, Clone)]
pub struct ModuleStateMachine {
    serial: String,
    kind: ModuleKind,
    state: ModuleState,
    running_action: Option<String>,
    transition_count: u64,
}

impl ModuleStateMachine {
    pub fn new(serial: impl Into<String>, kind: ModuleKind) -> Self {
        Self {
            serial: serial.into(),
            kind,
            state: ModuleState::default(),
            running_action: None,
            transition_count: 0,
        }
    }

    pub fn current_state(&self) -> ModuleState {
        self.state
    }

    pub fn kind(&self) -> ModuleKind {
        self.kind
    }

    /// Id of the action currently on the hardware
    pub fn running_action(&self) -> Option<&str> {
        self.running_action.as_deref()
    }

    pub fn transition_count(&self) -> u64 {
        self.transition_count
    }

    /// Attempt to transition the module state
    pub fn transition(&mut self, event: ModuleEvent) -> StateMachineResult<ModuleState> {
        let current_state = self.state;
        let target_state = Self::determine_target_state(current_state, &event)?;

        self.check_guards(current_state, &event)?;

        match &event {
            ModuleEvent::Start { action_id, .. } => {
                self.running_action = Some(action_id.clone());
            }
            _ => self.running_action = None,
        }
        self.state = target_state;
        self.transition_count += 1;

        tracing::debug!(
            serial = %self.serial,
            from = %current_state,
            to = %target_state,
            event = event.event_type(),
            reason = event.error_message(),
            "Module state transition"
        );

        Ok(target_state)
    }

    /// Determine the target state based on current state and event
    pub fn determine_target_state(
        current_state: ModuleState,
        event: &ModuleEvent,
    ) -> StateMachineResult<ModuleState> {
        let target = match (current_state, event) {
            (ModuleState::Idle, ModuleEvent::Start { .. }) => ModuleState::Processing,

            (ModuleState::Processing, ModuleEvent::Complete) => ModuleState::Idle,

            (ModuleState::Processing, ModuleEvent::Fail(_)) => ModuleState::Reset,
            (ModuleState::Processing, ModuleEvent::QualityRejected) => ModuleState::Reset,

            // Instant reset aborts whatever is happening
            (_, ModuleEvent::Reset) => ModuleState::Reset,

            (ModuleState::Reset, ModuleEvent::CleanupComplete) => ModuleState::Idle,

            (from_state, event) => {
                return Err(StateMachineError::InvalidTransition {
                    from: from_state.to_string(),
                    event: event.event_type().to_string(),
                })
            }
        };

        Ok(target)
    }

    fn check_guards(
        &self,
        current_state: ModuleState,
        event: &ModuleEvent,
    ) -> StateMachineResult<()> {
        if let ModuleEvent::Start { command, .. } = event {
            let ctx = StartContext {
                state: current_state,
                kind: self.kind,
                command: command.as_str(),
            };
            ModuleIdleGuard.check(&ctx)?;
            SupportedCommandGuard.check(&ctx)?;
        }
        Ok(())
    }

    /// Run the failure path to completion: RESET, then IDLE
    pub fn recover(&mut self) -> StateMachineResult<ModuleState> {
        if self.state != ModuleState::Reset {
            self.transition(ModuleEvent::Reset)?;
        }
        self.transition(ModuleEvent::CleanupComplete)
    }
}
