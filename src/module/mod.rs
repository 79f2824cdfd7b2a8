//! # Module
//!
//! Everything one processing station (or transport) needs to take part in
//! the protocol: the commands of each kind, the order book, the hardware
//! seam, instant actions, calibration mode and the runtime tying them to a
//! broker session.

pub mod calibration;
pub mod commands;
pub mod hardware;
pub mod instant_actions;
pub mod order_book;
pub mod runtime;

pub use calibration::{CalibrationCommand, CalibrationData, CalibrationError, CalibrationMode};
pub use commands::{CommandStage, ModuleKind};
pub use hardware::{
    ExecutionRequest, HardwareError, HardwareOutcome, ModuleHardware, SimulatedHardware,
};
pub use instant_actions::InstantActionKind;
pub use order_book::{Acceptance, OrderBook, OrderDecision, TrackedAction};
pub use runtime::{ModuleRuntime, RuntimeBootstrap, RuntimeSettings};
