//! # Hardware Seam
//!
//! The physical operation behind an action. The runtime hands one
//! [`ExecutionRequest`] at a time to a [`ModuleHardware`] and waits for the
//! outcome on a separate task, so inbound frames stay observable while the
//! hardware works.
//!
//! [`SimulatedHardware`] stands in for a real station: configurable delay,
//! scripted failures and quality results, HBW slot bookkeeping and a
//! draining FTS battery.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;

use crate::constants::metadata_keys;
use crate::messaging::frames::{BatteryState, Load, Metadata};
use crate::module::commands::{ModuleKind, CHECK_QUALITY, HBW_SLOTS, RESULT_PASSED};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HardwareError {
    #[error("{command} failed: {reason}")]
    ExecutionFailed { command: String, reason: String },

    #[error("{kind} cannot execute {command}")]
    UnsupportedCommand { kind: ModuleKind, command: String },

    #[error("Motion to {position} failed: {reason}")]
    MotionFailed { position: String, reason: String },

    #[error("No free storage slot")]
    StorageFull,

    #[error("No stored workpiece of type {workpiece_type}")]
    WorkpieceNotFound { workpiece_type: String },
}

/// One action handed to the hardware
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionRequest {
    pub action_id: String,
    pub command: String,
    pub metadata: Metadata,
}

impl ExecutionRequest {
    pub fn new(action_id: impl Into<String>, command: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            action_id: action_id.into(),
            command: command.into(),
            metadata,
        }
    }

    fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }
}

/// Successful completion of a physical step
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HardwareOutcome {
    /// e.g. PASSED / FAILED for a quality check
    pub result: Option<String>,
    /// Workpieces held after the step, when the station tracks them
    pub loads: Option<Vec<Load>>,
}

#[async_trait]
pub trait ModuleHardware: Send + Sync + 'static {
    async fn execute(&self, request: ExecutionRequest) -> Result<HardwareOutcome, HardwareError>;

    /// Drive to a calibration position using `references`
    async fn move_to(&self, position: &str, references: &Metadata) -> Result<(), HardwareError>;

    async fn home(&self) -> Result<(), HardwareError>;

    /// Transport battery, `None` for stationary modules
    fn battery_state(&self) -> Option<BatteryState> {
        None
    }

    fn loads(&self) -> Vec<Load> {
        Vec::new()
    }
}

#[derive(Debug)]
struct SimState {
    delay: Duration,
    failures: HashMap<String, VecDeque<String>>,
    quality_results: VecDeque<String>,
    motion_failures: HashSet<String>,
    slots: BTreeMap<String, String>,
    battery_percentage: f64,
    charging: bool,
    position: String,
    executed: Vec<String>,
}

/// In-process stand-in for a station
#[derive(Debug)]
pub struct SimulatedHardware {
    kind: ModuleKind,
    state: Mutex<SimState>,
}

const BATTERY_DRAIN_PER_COMMAND: f64 = 2.5;

impl SimulatedHardware {
    pub fn new(kind: ModuleKind) -> Self {
        Self {
            kind,
            state: Mutex::new(SimState {
                delay: Duration::from_millis(10),
                failures: HashMap::new(),
                quality_results: VecDeque::new(),
                motion_failures: HashSet::new(),
                slots: BTreeMap::new(),
                battery_percentage: 100.0,
                charging: false,
                position: "HOME".to_string(),
                executed: Vec::new(),
            }),
        }
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        self.state.lock().delay = delay;
        self
    }

    /// Pre-fill an HBW slot
    pub fn with_stock(self, slot: &str, workpiece_type: &str) -> Self {
        self.state
            .lock()
            .slots
            .insert(slot.to_string(), workpiece_type.to_string());
        self
    }

    /// Make the next execution of `command` fail
    pub fn fail_next(&self, command: &str, reason: &str) {
        self.state
            .lock()
            .failures
            .entry(command.to_string())
            .or_default()
            .push_back(reason.to_string());
    }

    /// Queue the result of the next quality check
    pub fn push_quality_result(&self, result: &str) {
        self.state.lock().quality_results.push_back(result.to_string());
    }

    /// Make the next motion to `position` fail
    pub fn fail_motion_to(&self, position: &str) {
        self.state.lock().motion_failures.insert(position.to_string());
    }

    /// Commands executed successfully, in order
    pub fn executed(&self) -> Vec<String> {
        self.state.lock().executed.clone()
    }

    pub fn position(&self) -> String {
        self.state.lock().position.clone()
    }

    fn delay(&self) -> Duration {
        self.state.lock().delay
    }

    fn complete(&self, request: &ExecutionRequest) -> Result<HardwareOutcome, HardwareError> {
        if !self.kind.supports(&request.command) {
            return Err(HardwareError::UnsupportedCommand {
                kind: self.kind,
                command: request.command.clone(),
            });
        }

        let mut state = self.state.lock();
        if let Some(reason) = state
            .failures
            .get_mut(&request.command)
            .and_then(VecDeque::pop_front)
        {
            return Err(HardwareError::ExecutionFailed {
                command: request.command.clone(),
                reason,
            });
        }

        let mut outcome = HardwareOutcome::default();
        match (self.kind, request.command.as_str()) {
            (ModuleKind::Hbw, "DROP") => {
                let workpiece = request
                    .metadata_str(metadata_keys::TYPE)
                    .unwrap_or("UNKNOWN")
                    .to_string();
                let requested = request.metadata_str(metadata_keys::LOAD_POSITION);
                let slot = HBW_SLOTS
                    .iter()
                    .find(|slot| {
                        !state.slots.contains_key(**slot)
                            && requested.map_or(true, |wanted| wanted == **slot)
                    })
                    .ok_or(HardwareError::StorageFull)?;
                state.slots.insert((*slot).to_string(), workpiece);
                outcome.loads = Some(slot_loads(&state.slots));
            }
            (ModuleKind::Hbw, "PICK") => {
                let wanted = request.metadata_str(metadata_keys::TYPE);
                let slot = state
                    .slots
                    .iter()
                    .find(|(_, stored)| wanted.map_or(true, |w| w == stored.as_str()))
                    .map(|(slot, _)| slot.clone())
                    .ok_or_else(|| HardwareError::WorkpieceNotFound {
                        workpiece_type: wanted.unwrap_or("ANY").to_string(),
                    })?;
                state.slots.remove(&slot);
                outcome.loads = Some(slot_loads(&state.slots));
            }
            (ModuleKind::Aiqs, CHECK_QUALITY) => {
                let result = state
                    .quality_results
                    .pop_front()
                    .unwrap_or_else(|| RESULT_PASSED.to_string());
                outcome.result = Some(result);
            }
            (ModuleKind::Fts, "CHARGE") => {
                state.battery_percentage = 100.0;
                state.charging = false;
            }
            (ModuleKind::Fts, _) => {
                state.battery_percentage = (state.battery_percentage - BATTERY_DRAIN_PER_COMMAND).max(0.0);
            }
            _ => {}
        }

        state.executed.push(request.command.clone());
        Ok(outcome)
    }
}

fn slot_loads(slots: &BTreeMap<String, String>) -> Vec<Load> {
    slots
        .iter()
        .map(|(slot, workpiece)| Load::new(workpiece.clone(), slot.clone()))
        .collect()
}

#[async_trait]
impl ModuleHardware for SimulatedHardware {
    async fn execute(&self, request: ExecutionRequest) -> Result<HardwareOutcome, HardwareError> {
        if self.kind.is_transport() && request.command == "CHARGE" {
            self.state.lock().charging = true;
        }
        tokio::time::sleep(self.delay()).await;
        self.complete(&request)
    }

    async fn move_to(&self, position: &str, _references: &Metadata) -> Result<(), HardwareError> {
        tokio::time::sleep(self.delay()).await;
        let mut state = self.state.lock();
        if state.motion_failures.remove(position) {
            return Err(HardwareError::MotionFailed {
                position: position.to_string(),
                reason: "end stop not reached".to_string(),
            });
        }
        state.position = position.to_string();
        Ok(())
    }

    async fn home(&self) -> Result<(), HardwareError> {
        tokio::time::sleep(self.delay()).await;
        self.state.lock().position = "HOME".to_string();
        Ok(())
    }

    fn battery_state(&self) -> Option<BatteryState> {
        if !self.kind.is_transport() {
            return None;
        }
        let state = self.state.lock();
        Some(BatteryState {
            percentage: state.battery_percentage,
            charging: state.charging,
            extra: Metadata::new(),
        })
    }

    fn loads(&self) -> Vec<Load> {
        if self.kind.stores_workpieces() {
            slot_loads(&self.state.lock().slots)
        } else {
            Vec::new()
        }
    }
}
