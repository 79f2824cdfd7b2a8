//! # CCU Coordinator
//!
//! Drives workflows over the broker. Each minted step is published on the
//! module's `order` topic; State frames observed on module and transport
//! `state` topics advance the workflows. Node-RED mirrors are ignored, they
//! only repeat what the device already said.
//!
//! Retained snapshots on `ccu/order/active` and `ccu/order/completed` let
//! dashboards catch up after connecting.

use std::collections::{BTreeSet, HashSet};

use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::clock::{new_id, SequenceCounters, Timestamp};
use crate::constants::instant_action_types;
use crate::error::Result;
use crate::logging::{log_connection_event, log_error};
use crate::messaging::codec;
use crate::messaging::frames::{Frame, InstantAction, InstantActionFrame, StateFrame};
use crate::messaging::topics::{self, CcuTopic, Role, Topic, TopicKind, TopicOrigin};
use crate::messaging::transport::{
    InboundMessage, MqttTransport, OutboundMessage, QualityOfService, SessionEvent,
};
use crate::messaging::MessagingError;
use crate::orchestration::workflow_manager::{Workflow, WorkflowOrderManager, WorkflowProgress};

const COMPONENT: &str = "ccu_coordinator";
const MODULE_STATE_FILTER: &str = "module/v1/ff/+/state";
const TRANSPORT_STATE_FILTER: &str = "fts/v1/ff/+/state";

/// Payload of `ccu/order/request`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRequest {
    pub serial_number: String,
    #[serde(default)]
    pub role: Option<Role>,
    pub commands: Vec<String>,
}

/// Body of the retained `ccu/order/*` snapshots
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WorkflowSnapshot<'a> {
    timestamp: Timestamp,
    workflows: Vec<&'a Workflow>,
}

pub struct CcuCoordinator<T> {
    transport: T,
    manager: WorkflowOrderManager,
    counters: SequenceCounters,
}

impl<T: MqttTransport> CcuCoordinator<T> {
    pub fn new(transport: T, history_limit: usize) -> Self {
        Self {
            transport,
            manager: WorkflowOrderManager::new(history_limit),
            counters: SequenceCounters::new(),
        }
    }

    pub fn manager(&self) -> &WorkflowOrderManager {
        &self.manager
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<SessionEvent>,
        shutdown: CancellationToken,
    ) -> Result<()> {
        let outcome = loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break Ok(()),
                event = events.recv() => match event {
                    Some(event) => {
                        if let Err(e) = self.handle_event(event).await {
                            if e.is_transport_failure() {
                                break Err(e);
                            }
                            log_error(COMPONENT, "handle_event", &e.to_string(), None);
                        }
                    }
                    None => break Ok(()),
                },
            }
        };

        if let Err(e) = self.transport.disconnect().await {
            log_error(COMPONENT, "disconnect", &e.to_string(), None);
        }
        outcome
    }

    pub async fn handle_event(&mut self, event: SessionEvent) -> Result<()> {
        match event {
            SessionEvent::Connected => self.on_connected().await,
            SessionEvent::Message(message) => self.on_message(message).await,
            SessionEvent::Disconnected { reason } => {
                log_connection_event("ccu", "disconnected", Some(reason.as_str()));
                Ok(())
            }
        }
    }

    /// Start a workflow and publish its first step
    pub async fn start_workflow(
        &mut self,
        role: Role,
        serial: &str,
        commands: Vec<String>,
    ) -> Result<String> {
        // validate the serial before anything is registered
        topics::topic(role, serial, TopicKind::Order)?;
        let order_id = self.manager.start_workflow_for(role, serial, commands)?;
        self.publish_next(&order_id).await?;
        self.publish_snapshots().await?;
        Ok(order_id)
    }

    /// Send `reset` to every module with an active workflow and cancel them
    pub async fn reset_all(&mut self) -> Result<BTreeSet<String>> {
        let targets: HashSet<(String, Role)> = self
            .manager
            .active()
            .into_iter()
            .map(|w| (w.module.clone(), w.role))
            .collect();

        let mut messages = Vec::with_capacity(targets.len());
        for (serial, role) in &targets {
            let topic = topics::topic(*role, serial, TopicKind::InstantAction)?;
            let mut frame = InstantActionFrame::new(vec![InstantAction::new(
                instant_action_types::RESET,
                new_id(),
            )]);
            frame.header_id = Some(self.counters.next(TopicKind::InstantAction));
            frame.serial_number = Some(serial.clone());
            messages.push(OutboundMessage::frame(
                topic,
                &Frame::InstantAction(frame),
                QualityOfService::ExactlyOnce,
                false,
            )?);
        }
        // no ordering between modules
        try_join_all(messages.into_iter().map(|m| self.transport.publish(m))).await?;

        let cancelled = self.manager.active_workflows();
        for order_id in &cancelled {
            self.manager.cancel_workflow(order_id, "reset requested")?;
        }
        tracing::info!(
            modules = targets.len(),
            workflows = cancelled.len(),
            "CCU reset"
        );
        self.publish_snapshots().await?;
        Ok(cancelled)
    }

    async fn on_connected(&mut self) -> Result<()> {
        log_connection_event("ccu", "connected", None);
        let filters = [
            MODULE_STATE_FILTER.to_string(),
            TRANSPORT_STATE_FILTER.to_string(),
            CcuTopic::OrderRequest.path(),
            CcuTopic::SetReset.path(),
        ];
        for filter in &filters {
            self.transport
                .subscribe(filter, QualityOfService::AtLeastOnce)
                .await?;
        }
        self.publish_snapshots().await
    }

    async fn on_message(&mut self, message: InboundMessage) -> Result<()> {
        match topics::parse(&message.topic) {
            Some(Topic::Device {
                kind: TopicKind::State,
                origin: TopicOrigin::Device,
                ..
            }) => match codec::decode_kind(TopicKind::State, &message.payload) {
                Ok(Frame::State(state)) => self.on_state(&state).await,
                Ok(_) => Ok(()),
                Err(e) => {
                    tracing::warn!(topic = %message.topic, error = %e, "Dropping undecodable state");
                    Ok(())
                }
            },
            Some(Topic::Ccu(CcuTopic::OrderRequest)) => {
                match serde_json::from_slice::<WorkflowRequest>(&message.payload) {
                    Ok(request) => {
                        let role = request.role.unwrap_or(Role::Module);
                        self.start_workflow(role, &request.serial_number, request.commands)
                            .await
                            .map(|_| ())
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Dropping malformed workflow request");
                        Ok(())
                    }
                }
            }
            Some(Topic::Ccu(CcuTopic::SetReset)) => self.reset_all().await.map(|_| ()),
            _ => Ok(()),
        }
    }

    async fn on_state(&mut self, state: &StateFrame) -> Result<()> {
        match self.manager.on_action_state(state) {
            Some(WorkflowProgress::StepReady { order_id }) => {
                self.publish_next(&order_id).await?;
                self.publish_snapshots().await
            }
            Some(WorkflowProgress::Completed { .. }) | Some(WorkflowProgress::Cancelled { .. }) => {
                self.publish_snapshots().await
            }
            Some(WorkflowProgress::InProgress { .. }) | None => Ok(()),
        }
    }

    async fn publish_next(&mut self, order_id: &str) -> Result<()> {
        let Some(workflow) = self.manager.workflow(order_id) else {
            return Ok(());
        };
        let topic = topics::topic(workflow.role, &workflow.module, TopicKind::Order)?;
        let frame = self.manager.next_command_frame(order_id)?;
        tracing::info!(
            order_id = %frame.order_id,
            order_update_id = frame.order_update_id,
            action_id = %frame.action.id,
            command = %frame.action.command,
            topic = %topic,
            "Publishing workflow step"
        );
        let message = OutboundMessage::frame(
            topic,
            &Frame::Order(frame),
            QualityOfService::ExactlyOnce,
            false,
        )?;
        self.transport.publish(message).await?;
        Ok(())
    }

    async fn publish_snapshots(&mut self) -> Result<()> {
        let active = WorkflowSnapshot {
            timestamp: Timestamp::now(),
            workflows: self.manager.active(),
        };
        let completed = WorkflowSnapshot {
            timestamp: Timestamp::now(),
            workflows: self.manager.history(self.manager.history_limit()),
        };
        let payloads = [
            (CcuTopic::OrderActive, serde_json::to_vec(&active)),
            (CcuTopic::OrderCompleted, serde_json::to_vec(&completed)),
        ];

        for (topic, payload) in payloads {
            let payload = payload.map_err(MessagingError::from)?;
            self.transport
                .publish(OutboundMessage {
                    topic: topic.path(),
                    payload,
                    qos: QualityOfService::AtLeastOnce,
                    retain: true,
                })
                .await?;
        }
        Ok(())
    }
}
