//! # Orchestration
//!
//! The CCU side of the protocol: workflows that drive modules step by step
//! on a single `orderId`, and the coordinator that publishes those steps and
//! listens for the resulting State frames.

pub mod coordinator;
pub mod workflow_manager;

pub use coordinator::{CcuCoordinator, WorkflowRequest};
pub use workflow_manager::{
    Workflow, WorkflowError, WorkflowOrderManager, WorkflowProgress, WorkflowResult,
    WorkflowStatus,
};
