//! # Workflow Order Manager
//!
//! CCU-side bookkeeping of multi-step flows. A workflow drives one module
//! through an ordered list of commands on a single `orderId`; step N is sent
//! as an order update with `orderUpdateId = N`.
//!
//! The manager never mints step N+1 before it has observed a FINISHED
//! action state for step N. A FAILED step closes the workflow as cancelled
//! and nothing further is minted for it, as does a module refusing the step
//! with an `orderError` or `orderUpdateError`.

use std::collections::{BTreeSet, HashMap, VecDeque};

use serde::Serialize;
use thiserror::Error;

use crate::clock::{new_id, Timestamp};
use crate::constants::{error_types, reference_keys};
use crate::messaging::frames::{ErrorLevel, ErrorRecord, OrderAction, OrderFrame, StateFrame};
use crate::messaging::topics::Role;
use crate::state_machine::ActionStatus;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("A workflow needs at least one command")]
    NoCommands,

    #[error("A workflow needs a module serial")]
    NoModule,

    #[error("Workflow not found: {order_id}")]
    NotFound { order_id: String },

    #[error("Workflow {order_id} is not active")]
    NotActive { order_id: String },

    #[error("Workflow {order_id} is waiting for step {step} to finish")]
    StepInFlight { order_id: String, step: usize },

    #[error("Workflow {order_id} has no steps left")]
    Exhausted { order_id: String },
}

pub type WorkflowResult<T> = Result<T, WorkflowError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowStatus {
    Active,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    pub order_id: String,
    pub role: Role,
    /// Serial of the module driven by this workflow
    pub module: String,
    pub commands: Vec<String>,
    pub status: WorkflowStatus,
    /// Action ids of the steps minted so far
    pub action_ids: Vec<String>,
    pub finished_steps: usize,
    pub started_at: Timestamp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Workflow {
    /// Steps minted so far; equals the last `orderUpdateId` sent
    pub fn emitted_steps(&self) -> usize {
        self.action_ids.len()
    }

    pub fn is_active(&self) -> bool {
        self.status == WorkflowStatus::Active
    }

    fn close(&mut self, status: WorkflowStatus, reason: Option<String>) {
        self.status = status;
        self.closed_at = Some(Timestamp::now());
        self.reason = reason;
    }
}

/// What an observed action state meant for its workflow
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowProgress {
    /// The current step is still going
    InProgress { order_id: String },
    /// The current step finished; the next one may be minted
    StepReady { order_id: String },
    Completed { order_id: String },
    Cancelled { order_id: String },
}

#[derive(Debug)]
pub struct WorkflowOrderManager {
    active: HashMap<String, Workflow>,
    /// actionId → orderId of the step it belongs to
    action_index: HashMap<String, String>,
    /// Closed workflows, most recent first
    history: VecDeque<Workflow>,
    history_limit: usize,
}

impl WorkflowOrderManager {
    pub fn new(history_limit: usize) -> Self {
        Self {
            active: HashMap::new(),
            action_index: HashMap::new(),
            history: VecDeque::new(),
            history_limit: history_limit.max(1),
        }
    }

    /// Register a workflow for a stationary module; returns its `orderId`
    pub fn start_workflow(
        &mut self,
        module: impl Into<String>,
        commands: Vec<String>,
    ) -> WorkflowResult<String> {
        self.start_workflow_for(Role::Module, module, commands)
    }

    pub fn start_workflow_for(
        &mut self,
        role: Role,
        module: impl Into<String>,
        commands: Vec<String>,
    ) -> WorkflowResult<String> {
        let module = module.into();
        if module.trim().is_empty() {
            return Err(WorkflowError::NoModule);
        }
        if commands.is_empty() {
            return Err(WorkflowError::NoCommands);
        }

        let order_id = new_id();
        tracing::info!(
            order_id = %order_id,
            module = %module,
            role = %role,
            steps = commands.len(),
            "Workflow started"
        );
        self.active.insert(
            order_id.clone(),
            Workflow {
                order_id: order_id.clone(),
                role,
                module,
                commands,
                status: WorkflowStatus::Active,
                action_ids: Vec::new(),
                finished_steps: 0,
                started_at: Timestamp::now(),
                closed_at: None,
                reason: None,
            },
        );
        Ok(order_id)
    }

    /// Mint the next step of `order_id` as an order update
    pub fn next_command_frame(&mut self, order_id: &str) -> WorkflowResult<OrderFrame> {
        let workflow = self.active_mut(order_id)?;
        let emitted = workflow.emitted_steps();
        if emitted > workflow.finished_steps {
            return Err(WorkflowError::StepInFlight {
                order_id: order_id.to_string(),
                step: emitted,
            });
        }
        let Some(command) = workflow.commands.get(emitted).cloned() else {
            return Err(WorkflowError::Exhausted {
                order_id: order_id.to_string(),
            });
        };

        let action_id = new_id();
        workflow.action_ids.push(action_id.clone());
        let update_id = workflow.emitted_steps() as u64;
        let mut frame = OrderFrame::new(order_id, update_id, OrderAction::new(&action_id, &command));
        frame.serial_number = Some(workflow.module.clone());

        tracing::debug!(
            order_id = %order_id,
            order_update_id = update_id,
            action_id = %action_id,
            command = %command,
            "Workflow step minted"
        );
        self.action_index.insert(action_id, order_id.to_string());
        Ok(frame)
    }

    /// Feed an observed State frame; `None` when it belongs to no workflow step
    pub fn on_action_state(&mut self, frame: &StateFrame) -> Option<WorkflowProgress> {
        if let Some(progress) = self.on_refusal(frame) {
            return Some(progress);
        }
        let action_state = frame.action_state.as_ref()?;
        let order_id = self.action_index.get(&action_state.id)?.clone();
        let workflow = self.active.get_mut(&order_id)?;

        // only the newest step moves the workflow; redeliveries are ignored
        if workflow.action_ids.last() != Some(&action_state.id)
            || workflow.finished_steps == workflow.emitted_steps()
        {
            return None;
        }

        match action_state.state {
            ActionStatus::Waiting | ActionStatus::Running => {
                Some(WorkflowProgress::InProgress { order_id })
            }
            ActionStatus::Finished => {
                workflow.finished_steps += 1;
                if workflow.finished_steps == workflow.commands.len() {
                    self.close(&order_id, WorkflowStatus::Completed, None);
                    Some(WorkflowProgress::Completed { order_id })
                } else {
                    Some(WorkflowProgress::StepReady { order_id })
                }
            }
            ActionStatus::Failed => {
                let reason = format!(
                    "{} failed on {}",
                    action_state.command, frame.serial_number
                );
                self.close(&order_id, WorkflowStatus::Cancelled, Some(reason));
                Some(WorkflowProgress::Cancelled { order_id })
            }
        }
    }

    /// A refused step never reports an action state, only an error naming it
    fn on_refusal(&mut self, frame: &StateFrame) -> Option<WorkflowProgress> {
        for error in frame.errors.iter().filter(|e| is_order_refusal(e)) {
            let Some(action_id) = error
                .reference(reference_keys::ACTION_ID)
                .and_then(|v| v.as_str())
            else {
                continue;
            };
            let Some(order_id) = self.action_index.get(action_id).cloned() else {
                continue;
            };
            let awaiting = self.active.get(&order_id).is_some_and(|w| {
                w.action_ids.last().map(String::as_str) == Some(action_id)
                    && w.finished_steps < w.emitted_steps()
            });
            if !awaiting {
                continue;
            }

            let mut reason = format!("{} on {}", error.error_type, frame.serial_number);
            if let Some(description) = error.error_description.as_deref() {
                reason = format!("{reason}: {description}");
            }
            self.close(&order_id, WorkflowStatus::Cancelled, Some(reason));
            return Some(WorkflowProgress::Cancelled { order_id });
        }
        None
    }

    /// Close an active workflow as cancelled
    pub fn cancel_workflow(&mut self, order_id: &str, reason: impl Into<String>) -> WorkflowResult<Workflow> {
        self.active_mut(order_id)?;
        self.close(order_id, WorkflowStatus::Cancelled, Some(reason.into()))
            .ok_or_else(|| WorkflowError::NotFound {
                order_id: order_id.to_string(),
            })
    }

    pub fn active_workflows(&self) -> BTreeSet<String> {
        self.active.keys().cloned().collect()
    }

    /// Active workflows ordered by start time
    pub fn active(&self) -> Vec<&Workflow> {
        let mut active: Vec<_> = self.active.values().collect();
        active.sort_by_key(|w| w.started_at);
        active
    }

    /// Closed workflows, most recent first
    pub fn history(&self, limit: usize) -> Vec<&Workflow> {
        self.history.iter().take(limit).collect()
    }

    pub fn workflow(&self, order_id: &str) -> Option<&Workflow> {
        self.active
            .get(order_id)
            .or_else(|| self.history.iter().find(|w| w.order_id == order_id))
    }

    pub fn history_limit(&self) -> usize {
        self.history_limit
    }

    fn active_mut(&mut self, order_id: &str) -> WorkflowResult<&mut Workflow> {
        if let Some(workflow) = self.active.get_mut(order_id) {
            return Ok(workflow);
        }
        if self.history.iter().any(|w| w.order_id == order_id) {
            Err(WorkflowError::NotActive {
                order_id: order_id.to_string(),
            })
        } else {
            Err(WorkflowError::NotFound {
                order_id: order_id.to_string(),
            })
        }
    }

    fn close(&mut self, order_id: &str, status: WorkflowStatus, reason: Option<String>) -> Option<Workflow> {
        let mut workflow = self.active.remove(order_id)?;
        workflow.close(status, reason);
        for action_id in &workflow.action_ids {
            self.action_index.remove(action_id);
        }
        tracing::info!(
            order_id = %order_id,
            status = ?status,
            finished_steps = workflow.finished_steps,
            reason = workflow.reason.as_deref(),
            "Workflow closed"
        );

        self.history.push_front(workflow.clone());
        self.history.truncate(self.history_limit);
        Some(workflow)
    }
}

fn is_order_refusal(error: &ErrorRecord) -> bool {
    error.error_level == ErrorLevel::Warning
        && (error.error_type == error_types::ORDER_ERROR
            || error.error_type == error_types::ORDER_UPDATE_ERROR)
}
