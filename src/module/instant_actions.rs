//! # Instant Actions
//!
//! Side-band commands that bypass the order queue. This module classifies
//! action types and builds the frames and records the runtime publishes in
//! response; the runtime owns the dispatch because only it holds the order
//! book, the hardware and the transport.

use serde_json::json;

use crate::clock::Timestamp;
use crate::constants::{error_types, instant_action_types, metadata_keys, reference_keys, system};
use crate::messaging::frames::{ActionState, ErrorRecord, FactsheetFrame, InstantAction, Metadata};
use crate::module::calibration::CalibrationCommand;
use crate::module::commands::{CommandStage, ModuleKind};
use crate::state_machine::ActionStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstantActionKind {
    FactsheetRequest,
    Reset,
    Calibration(CalibrationCommand),
    FindInitialDockPosition,
    Unknown,
}

impl InstantActionKind {
    pub fn classify(action_type: &str) -> Self {
        match action_type {
            instant_action_types::FACTSHEET_REQUEST => Self::FactsheetRequest,
            instant_action_types::RESET => Self::Reset,
            instant_action_types::FIND_INITIAL_DOCK_POSITION => Self::FindInitialDockPosition,
            other if other.starts_with(instant_action_types::CALIBRATION_PREFIX) => other
                .parse()
                .map(Self::Calibration)
                .unwrap_or(Self::Unknown),
            _ => Self::Unknown,
        }
    }

    /// Whether a module of `kind` accepts this action at all
    pub fn available_for(&self, kind: ModuleKind) -> bool {
        match self {
            // transports have no factsheet topic
            Self::FactsheetRequest => !kind.is_transport(),
            Self::FindInitialDockPosition => kind.is_transport(),
            Self::Calibration(_) => !kind.is_transport(),
            Self::Reset => true,
            Self::Unknown => false,
        }
    }
}

/// Action state reported for an instant action
pub fn synthetic_action_state(
    action: &InstantAction,
    state: ActionStatus,
    result: Option<String>,
) -> ActionState {
    ActionState {
        command: action.action_type.clone(),
        id: action.action_id.clone(),
        state,
        timestamp: Timestamp::now(),
        result,
    }
}

/// `invalidInstantAction` warning for `action`
pub fn invalid_instant_action(action: &InstantAction, reason: impl Into<String>) -> ErrorRecord {
    ErrorRecord::warning(error_types::INVALID_INSTANT_ACTION)
        .with_reference(reference_keys::ACTION_ID, action.action_id.clone())
        .with_reference(reference_keys::ACTION_TYPE, action.action_type.clone())
        .with_description(reason)
}

/// Dock node reported by `findInitialDockPosition`
pub fn dock_reference(action: &InstantAction) -> String {
    action
        .metadata_str(metadata_keys::NODE_ID)
        .unwrap_or(system::DEFAULT_DOCK_NODE)
        .to_string()
}

/// Capability description of a module of `kind`
pub fn factsheet_frame(
    kind: ModuleKind,
    serial: &str,
    manufacturer: &str,
    version: &str,
    header_id: u64,
) -> FactsheetFrame {
    let module_actions: Vec<_> = kind
        .supported_commands()
        .iter()
        .map(|command| {
            json!({
                "actionType": command,
                "stage": match CommandStage::of(command) {
                    CommandStage::Pick => "PICK",
                    CommandStage::Process => "PROCESS",
                    CommandStage::Drop => "DROP",
                },
            })
        })
        .collect();

    let mut extra = Metadata::new();
    extra.insert(
        "typeSpecification".to_string(),
        json!({
            "seriesName": kind.to_string(),
            "moduleClass": kind.to_string(),
        }),
    );
    extra.insert(
        "protocolFeatures".to_string(),
        json!({
            "moduleActions": module_actions,
            "instantActions": [
                instant_action_types::FACTSHEET_REQUEST,
                instant_action_types::RESET,
                "calibration.start", "calibration.select", "calibration.test",
                "calibration.set", "calibration.store", "calibration.reset",
                "calibration.stop",
            ],
        }),
    );
    extra.insert(
        "calibrationPositions".to_string(),
        json!(kind.calibration_positions()),
    );

    FactsheetFrame {
        header_id: Some(header_id),
        timestamp: Timestamp::now(),
        version: version.to_string(),
        manufacturer: Some(manufacturer.to_string()),
        serial_number: serial.to_string(),
        extra,
    }
}
