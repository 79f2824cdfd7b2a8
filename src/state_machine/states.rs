use serde::{Deserialize, Serialize};
use std::fmt;

/// Runtime state of a single action as reported in `actionState.state`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionStatus {
    /// Accepted but not started
    #[default]
    Waiting,
    /// Hardware step in progress
    Running,
    /// Completed successfully
    Finished,
    /// Failed, or skipped because an earlier action of the order failed
    Failed,
}

impl ActionStatus {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Whether moving from `self` to `next` is a legal progression
    pub fn can_transition_to(&self, next: ActionStatus) -> bool {
        matches!(
            (self, next),
            (Self::Waiting, Self::Running)
                | (Self::Waiting, Self::Failed)
                | (Self::Running, Self::Finished)
                | (Self::Running, Self::Failed)
        )
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Waiting => write!(f, "WAITING"),
            Self::Running => write!(f, "RUNNING"),
            Self::Finished => write!(f, "FINISHED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

impl std::str::FromStr for ActionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "WAITING" => Ok(Self::Waiting),
            "RUNNING" => Ok(Self::Running),
            "FINISHED" => Ok(Self::Finished),
            "FAILED" => Ok(Self::Failed),
            _ => Err(format!("Invalid action state: {s}")),
        }
    }
}

/// Coarse state of a module, one level above individual actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModuleState {
    /// Ready to start the next action
    #[default]
    Idle,
    /// An action is running on the hardware
    Processing,
    /// Recovering after a failure or an instant reset
    Reset,
}

impl ModuleState {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Processing)
    }

    pub fn accepts_work(&self) -> bool {
        matches!(self, Self::Idle)
    }
}

impl fmt::Display for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "IDLE"),
            Self::Processing => write!(f, "PROCESSING"),
            Self::Reset => write!(f, "RESET"),
        }
    }
}

impl std::str::FromStr for ModuleState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IDLE" => Ok(Self::Idle),
            "PROCESSING" => Ok(Self::Processing),
            "RESET" => Ok(Self::Reset),
            _ => Err(format!("Invalid module state: {s}")),
        }
    }
}
