use thiserror::Error;

use crate::config::ConfigurationError;
use crate::messaging::{DecodeError, MessagingError, TopicError};
use crate::module::calibration::CalibrationError;
use crate::module::hardware::HardwareError;
use crate::orchestration::WorkflowError;
use crate::persistence::PersistenceError;
use crate::state_machine::StateMachineError;

#[derive(Debug, Error)]
pub enum ApsError {
    #[error("Messaging error: {0}")]
    Messaging(#[from] MessagingError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Topic error: {0}")]
    Topic(#[from] TopicError),

    #[error("State transition error: {0}")]
    StateTransition(#[from] StateMachineError),

    #[error("Hardware error: {0}")]
    Hardware(#[from] HardwareError),

    #[error("Calibration error: {0}")]
    Calibration(#[from] CalibrationError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),
}

impl ApsError {
    /// Errors after which a runtime cannot keep talking to the broker
    pub fn is_transport_failure(&self) -> bool {
        matches!(
            self,
            Self::Messaging(
                MessagingError::Connection { .. }
                    | MessagingError::RetriesExhausted { .. }
                    | MessagingError::Publish { .. }
                    | MessagingError::Subscribe { .. }
                    | MessagingError::SessionClosed
            )
        )
    }
}

pub type Result<T> = std::result::Result<T, ApsError>;
