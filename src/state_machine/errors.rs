use thiserror::Error;

/// Errors raised by module state machine transitions
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateMachineError {
    #[error("Guard condition failed: {reason}")]
    GuardFailed { reason: String },

    #[error("Invalid state transition from {from} on {event}")]
    InvalidTransition { from: String, event: String },

    #[error("Unknown action: {action_id}")]
    UnknownAction { action_id: String },

    #[error("Invalid action transition for {action_id}: {from} -> {to}")]
    InvalidActionTransition {
        action_id: String,
        from: String,
        to: String,
    },
}

/// Specific error type for guard condition failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GuardError {
    #[error("Module busy: {reason}")]
    ModuleBusy { reason: String },

    #[error("Business rule violation: {rule}")]
    BusinessRuleViolation { rule: String },
}

impl From<GuardError> for StateMachineError {
    fn from(err: GuardError) -> Self {
        StateMachineError::GuardFailed {
            reason: err.to_string(),
        }
    }
}

pub type StateMachineResult<T> = Result<T, StateMachineError>;
pub type GuardResult<T> = Result<T, GuardError>;

pub fn module_busy(reason: impl Into<String>) -> GuardError {
    GuardError::ModuleBusy {
        reason: reason.into(),
    }
}

pub fn business_rule_violation(rule: impl Into<String>) -> GuardError {
    GuardError::BusinessRuleViolation { rule: rule.into() }
}
