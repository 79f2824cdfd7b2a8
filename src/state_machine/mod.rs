// Action and module state machines
//
// Action states are the fine-grained per-action progression reported on the
// wire; module states are the coarse IDLE / PROCESSING / RESET cycle that
// gates when the next action may start.

pub mod errors;
pub mod events;
pub mod guards;
pub mod module_state_machine;
pub mod states;

// Re-export main types for convenient access
pub use errors::{GuardError, StateMachineError, StateMachineResult};
pub use events::ModuleEvent;
pub use module_state_machine::ModuleStateMachine;
pub use states::{ActionStatus, ModuleState};

// Common traits and utilities
pub use guards::StateGuard;
