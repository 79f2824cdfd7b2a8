//! # Protocol Constants
//!
//! Error type names, instant action types and wire defaults shared by the
//! module runtime and the CCU coordinator.

/// Values of `errorType` in State frames
pub mod error_types {
    /// Incoming frame is missing required fields or carries invalid values
    pub const VALIDATION_ERROR: &str = "validationError";
    /// Order refused: another order active, unsupported command, calibration mode
    pub const ORDER_ERROR: &str = "orderError";
    /// `orderUpdateId` lower than the current one for the same order
    pub const ORDER_UPDATE_ERROR: &str = "orderUpdateError";
    /// Unknown or inapplicable instant action
    pub const INVALID_INSTANT_ACTION: &str = "invalidInstantAction";

    /// Execution failure of a command, e.g. `MILL_error`
    pub fn command_error(command: &str) -> String {
        format!("{command}_error")
    }
}

/// Keys used inside `errorReferences`
pub mod reference_keys {
    pub const HEADER_ID: &str = "headerId";
    pub const ORDER_ID: &str = "orderId";
    pub const ORDER_UPDATE_ID: &str = "orderUpdateId";
    pub const TOPIC: &str = "topic";
    pub const ACTION_ID: &str = "actionId";
    pub const ACTION_COMMAND: &str = "actionCommand";
    pub const ACTION_TYPE: &str = "actionType";
}

/// Recognized `actionType` values of instant actions
pub mod instant_action_types {
    pub const FACTSHEET_REQUEST: &str = "factsheetRequest";
    pub const RESET: &str = "reset";
    pub const FIND_INITIAL_DOCK_POSITION: &str = "findInitialDockPosition";
    pub const CALIBRATION_PREFIX: &str = "calibration.";
}

/// Metadata keys understood on actions
pub mod metadata_keys {
    pub const PRIORITY: &str = "priority";
    pub const TIMEOUT: &str = "timeout";
    pub const TYPE: &str = "type";
    pub const WORKPIECE_ID: &str = "workpieceId";
    pub const LOAD_POSITION: &str = "loadPosition";
    pub const POSITION: &str = "position";
    pub const REFERENCES: &str = "references";
    pub const FACTORY: &str = "factory";
    pub const NODE_ID: &str = "nodeId";
}

/// System-wide defaults
pub mod system {
    pub const DEFAULT_MANUFACTURER: &str = "Fischertechnik";
    pub const PROTOCOL_VERSION: &str = "1.0.0";
    /// Hardware timeout when an action carries none
    pub const DEFAULT_ACTION_TIMEOUT_SECS: u64 = 120;
    pub const DEFAULT_WORKFLOW_HISTORY_LIMIT: usize = 100;
    pub const DEFAULT_DOCK_NODE: &str = "DOCK";
    /// Capacity of the inbound frame channel between session and runtime
    pub const INBOUND_CHANNEL_CAPACITY: usize = 64;
}
