//! # Calibration Mode
//!
//! Secondary mode layered on the module runtime and driven entirely by
//! `calibration.*` instant actions. While active, normal orders are refused.
//!
//! References are kept per calibration position. `store` writes them to the
//! module's state directory; `reset` re-reads that file, or the built-in
//! defaults when `factory=true` is given.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::constants::{instant_action_types, metadata_keys};
use crate::messaging::frames::{InstantAction, Metadata};
use crate::module::commands::ModuleKind;
use crate::module::hardware::{HardwareError, ModuleHardware};
use crate::persistence::{JsonFileStore, PersistenceError};

const CALIBRATION_DOCUMENT: &str = "calibration";

#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("Calibration mode is not active")]
    NotActive,

    #[error("Calibration mode is already active")]
    AlreadyActive,

    #[error("Unknown calibration action: {action_type}")]
    UnknownAction { action_type: String },

    #[error("Position {position} is not a calibration position of {kind}")]
    UnknownPosition { position: String, kind: ModuleKind },

    #[error("No calibration position selected")]
    NoPositionSelected,

    #[error("Missing metadata: {key}")]
    MissingMetadata { key: String },

    #[error("No calibration storage configured")]
    NoStorage,

    #[error(transparent)]
    Motion(#[from] HardwareError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// Sub-action named by the part after `calibration.`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationCommand {
    Start,
    Select,
    Test,
    Set,
    Store,
    Reset,
    Stop,
}

impl FromStr for CalibrationCommand {
    type Err = CalibrationError;

    fn from_str(action_type: &str) -> Result<Self, Self::Err> {
        let sub = action_type
            .strip_prefix(instant_action_types::CALIBRATION_PREFIX)
            .unwrap_or(action_type);
        match sub {
            "start" => Ok(Self::Start),
            "select" => Ok(Self::Select),
            "test" => Ok(Self::Test),
            "set" => Ok(Self::Set),
            "store" => Ok(Self::Store),
            "reset" => Ok(Self::Reset),
            "stop" => Ok(Self::Stop),
            _ => Err(CalibrationError::UnknownAction {
                action_type: action_type.to_string(),
            }),
        }
    }
}

/// Reference values per position
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalibrationData {
    pub positions: BTreeMap<String, Metadata>,
}

impl CalibrationData {
    /// Factory references for every position of `kind`
    pub fn defaults(kind: ModuleKind) -> Self {
        let positions = kind
            .calibration_positions()
            .iter()
            .enumerate()
            .map(|(index, position)| {
                let references = json!({"x": index as u64 * 100, "y": 0, "z": 0});
                let map = references.as_object().cloned().unwrap_or_default();
                ((*position).to_string(), map)
            })
            .collect();
        Self { positions }
    }

    pub fn references(&self, position: &str) -> Option<&Metadata> {
        self.positions.get(position)
    }
}

#[derive(Debug)]
pub struct CalibrationMode {
    kind: ModuleKind,
    active: bool,
    current_position: Option<String>,
    failed_before: bool,
    data: CalibrationData,
    store: Option<JsonFileStore>,
}

impl CalibrationMode {
    /// Load persisted references, falling back to defaults
    pub fn new(kind: ModuleKind, store: Option<JsonFileStore>) -> Self {
        let data = Self::load_persisted(kind, store.as_ref());
        Self {
            kind,
            active: false,
            current_position: None,
            failed_before: false,
            data,
            store,
        }
    }

    fn load_persisted(kind: ModuleKind, store: Option<&JsonFileStore>) -> CalibrationData {
        match store.map(|s| s.load::<CalibrationData>(CALIBRATION_DOCUMENT)) {
            Some(Ok(Some(data))) => data,
            Some(Err(e)) => {
                tracing::warn!(kind = %kind, error = %e, "Unreadable calibration data, using defaults");
                CalibrationData::defaults(kind)
            }
            _ => CalibrationData::defaults(kind),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn current_position(&self) -> Option<&str> {
        self.current_position.as_deref()
    }

    pub fn failed_before(&self) -> bool {
        self.failed_before
    }

    pub fn data(&self) -> &CalibrationData {
        &self.data
    }

    /// Apply one `calibration.*` instant action; returns the result string
    /// for the synthetic action state
    pub async fn handle<H: ModuleHardware + ?Sized>(
        &mut self,
        action: &InstantAction,
        hardware: &H,
    ) -> Result<String, CalibrationError> {
        let command: CalibrationCommand = action.action_type.parse()?;
        if command != CalibrationCommand::Start && !self.active {
            return Err(CalibrationError::NotActive);
        }

        let result = match command {
            CalibrationCommand::Start => {
                if self.active {
                    return Err(CalibrationError::AlreadyActive);
                }
                self.active = true;
                self.current_position = None;
                self.failed_before = false;
                "STARTED".to_string()
            }
            CalibrationCommand::Select => {
                let position = self.requested_position(action)?;
                self.select(position, hardware).await?
            }
            CalibrationCommand::Test => {
                if self.failed_before {
                    // a failed motion leaves the axis unreferenced: re-select
                    let position = match action.metadata_str(metadata_keys::POSITION) {
                        Some(_) => self.requested_position(action)?,
                        None => self
                            .current_position
                            .clone()
                            .ok_or(CalibrationError::NoPositionSelected)?,
                    };
                    self.select(position, hardware).await?
                } else {
                    let position = self
                        .current_position
                        .clone()
                        .ok_or(CalibrationError::NoPositionSelected)?;
                    let references = self.references_for(&position);
                    let outcome = match hardware.home().await {
                        Ok(()) => hardware.move_to(&position, &references).await,
                        Err(e) => Err(e),
                    };
                    if let Err(e) = outcome {
                        self.failed_before = true;
                        return Err(e.into());
                    }
                    position
                }
            }
            CalibrationCommand::Set => {
                let position = self
                    .current_position
                    .clone()
                    .ok_or(CalibrationError::NoPositionSelected)?;
                let references = action
                    .metadata
                    .get(metadata_keys::REFERENCES)
                    .and_then(Value::as_object)
                    .ok_or_else(|| CalibrationError::MissingMetadata {
                        key: metadata_keys::REFERENCES.to_string(),
                    })?;
                let entry = self.data.positions.entry(position.clone()).or_default();
                for (key, value) in references {
                    entry.insert(key.clone(), value.clone());
                }
                position
            }
            CalibrationCommand::Store => {
                let store = self.store.as_ref().ok_or(CalibrationError::NoStorage)?;
                store.save(CALIBRATION_DOCUMENT, &self.data)?;
                "STORED".to_string()
            }
            CalibrationCommand::Reset => {
                self.data = if action.metadata_flag(metadata_keys::FACTORY) {
                    CalibrationData::defaults(self.kind)
                } else {
                    Self::load_persisted(self.kind, self.store.as_ref())
                };
                self.failed_before = false;
                "RESET".to_string()
            }
            CalibrationCommand::Stop => {
                self.active = false;
                self.current_position = None;
                self.failed_before = false;
                hardware.home().await?;
                "STOPPED".to_string()
            }
        };

        tracing::info!(
            kind = %self.kind,
            action_type = %action.action_type,
            result = %result,
            "Calibration action applied"
        );
        Ok(result)
    }

    fn requested_position(&self, action: &InstantAction) -> Result<String, CalibrationError> {
        let position = action
            .metadata_str(metadata_keys::POSITION)
            .ok_or_else(|| CalibrationError::MissingMetadata {
                key: metadata_keys::POSITION.to_string(),
            })?;
        if !self.kind.calibration_positions().contains(&position) {
            return Err(CalibrationError::UnknownPosition {
                position: position.to_string(),
                kind: self.kind,
            });
        }
        Ok(position.to_string())
    }

    fn references_for(&self, position: &str) -> Metadata {
        self.data.references(position).cloned().unwrap_or_default()
    }

    async fn select<H: ModuleHardware + ?Sized>(
        &mut self,
        position: String,
        hardware: &H,
    ) -> Result<String, CalibrationError> {
        let references = self.references_for(&position);
        match hardware.move_to(&position, &references).await {
            Ok(()) => {
                self.current_position = Some(position.clone());
                self.failed_before = false;
                Ok(position)
            }
            Err(e) => {
                self.current_position = Some(position);
                self.failed_before = true;
                Err(e.into())
            }
        }
    }
}
