use serde::{Deserialize, Serialize};

/// Events that drive the module state machine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ModuleEvent {
    /// An action was handed to the hardware
    Start { action_id: String, command: String },
    /// The running action finished successfully
    Complete,
    /// The running action failed with the given reason
    Fail(String),
    /// A quality check completed with a rejected workpiece
    QualityRejected,
    /// Instant reset requested
    Reset,
    /// Recovery finished; back to idle
    CleanupComplete,
}

impl ModuleEvent {
    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::Complete => "complete",
            Self::Fail(_) => "fail",
            Self::QualityRejected => "quality_rejected",
            Self::Reset => "reset",
            Self::CleanupComplete => "cleanup_complete",
        }
    }

    /// Extract error message if this is a failure event
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Fail(msg) => Some(msg),
            _ => None,
        }
    }

    /// Create a failure event with the given error message
    pub fn fail_with_error(error: impl Into<String>) -> Self {
        Self::Fail(error.into())
    }

    pub fn start(action_id: impl Into<String>, command: impl Into<String>) -> Self {
        Self::Start {
            action_id: action_id.into(),
            command: command.into(),
        }
    }
}
