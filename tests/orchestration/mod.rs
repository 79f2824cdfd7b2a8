//! CCU workflows, alone and driving a real module runtime

use serde_json::json;

use aps_core::clock::Timestamp;
use aps_core::messaging::{
    ActionState, Frame, InboundMessage, InstantActionFrame, OutboundMessage, RecordingTransport,
    Role, SessionEvent, StateFrame, TopicKind,
};
use aps_core::module::ModuleKind;
use aps_core::orchestration::{CcuCoordinator, WorkflowOrderManager, WorkflowProgress, WorkflowStatus};
use aps_core::state_machine::ActionStatus;

use crate::common::Harness;

const DRILL_SERIAL: &str = "SVR4H73275";

fn commands(list: &[&str]) -> Vec<String> {
    list.iter().map(|c| c.to_string()).collect()
}

fn observed(action_id: &str, command: &str, state: ActionStatus) -> StateFrame {
    StateFrame {
        header_id: 1,
        timestamp: Timestamp::now(),
        serial_number: DRILL_SERIAL.to_string(),
        order_id: String::new(),
        order_update_id: 0,
        paused: false,
        action_state: Some(ActionState {
            command: command.to_string(),
            id: action_id.to_string(),
            state,
            timestamp: Timestamp::now(),
            result: None,
        }),
        battery_state: None,
        errors: Vec::new(),
        loads: Vec::new(),
        extra: Default::default(),
    }
}

#[test]
fn test_workflow_sub_ordering() {
    let mut manager = WorkflowOrderManager::new(10);
    let order_id = manager
        .start_workflow(DRILL_SERIAL, commands(&["PICK", "DRILL", "DROP"]))
        .unwrap();

    let first = manager.next_command_frame(&order_id).unwrap();
    assert_eq!((first.order_update_id, first.action.command.as_str()), (1, "PICK"));
    assert_eq!(first.order_id, order_id);

    let progress = manager.on_action_state(&observed(&first.action.id, "PICK", ActionStatus::Finished));
    assert!(matches!(progress, Some(WorkflowProgress::StepReady { .. })));
    let second = manager.next_command_frame(&order_id).unwrap();
    assert_eq!((second.order_update_id, second.action.command.as_str()), (2, "DRILL"));

    manager.on_action_state(&observed(&second.action.id, "DRILL", ActionStatus::Finished));
    let third = manager.next_command_frame(&order_id).unwrap();
    assert_eq!((third.order_update_id, third.action.command.as_str()), (3, "DROP"));

    let done = manager.on_action_state(&observed(&third.action.id, "DROP", ActionStatus::Finished));
    assert!(matches!(done, Some(WorkflowProgress::Completed { .. })));
    assert!(manager.active_workflows().is_empty());
    assert_eq!(manager.history(1)[0].status, WorkflowStatus::Completed);
}

#[test]
fn test_failed_step_stops_the_workflow() {
    let mut manager = WorkflowOrderManager::new(10);
    let order_id = manager
        .start_workflow(DRILL_SERIAL, commands(&["PICK", "DRILL", "DROP"]))
        .unwrap();
    let first = manager.next_command_frame(&order_id).unwrap();
    manager.on_action_state(&observed(&first.action.id, "PICK", ActionStatus::Finished));
    let second = manager.next_command_frame(&order_id).unwrap();

    let progress = manager.on_action_state(&observed(&second.action.id, "DRILL", ActionStatus::Failed));
    assert!(matches!(progress, Some(WorkflowProgress::Cancelled { .. })));
    assert!(manager.next_command_frame(&order_id).is_err());

    let closed = manager.workflow(&order_id).unwrap();
    assert_eq!(closed.status, WorkflowStatus::Cancelled);
    assert_eq!(closed.emitted_steps(), 2);
    assert_eq!(closed.reason.as_deref(), Some("DRILL failed on SVR4H73275"));
}

/// Messages `from` published since `cursor`
fn pending(from: &RecordingTransport, cursor: &mut usize) -> Vec<OutboundMessage> {
    let published = from.published();
    let fresh = published[*cursor..].to_vec();
    *cursor = published.len();
    fresh
}

fn as_event(message: OutboundMessage) -> SessionEvent {
    SessionEvent::Message(InboundMessage::new(message.topic, message.payload))
}

#[tokio::test]
async fn test_ccu_drives_module_through_workflow() {
    let mut module = Harness::new(DRILL_SERIAL, ModuleKind::Drill);
    let ccu_transport = RecordingTransport::new();
    let mut ccu = CcuCoordinator::new(ccu_transport.clone(), 10);

    module.connect().await;
    ccu.handle_event(SessionEvent::Connected).await.unwrap();
    let order_id = ccu
        .start_workflow(Role::Module, DRILL_SERIAL, commands(&["PICK", "DRILL", "DROP"]))
        .await
        .unwrap();

    let (mut ccu_cursor, mut module_cursor) = (0, 0);
    for _ in 0..20 {
        for message in pending(&ccu_transport, &mut ccu_cursor) {
            if message.topic == module.topic(TopicKind::Order) {
                module.runtime.handle_event(as_event(message)).await.unwrap();
            }
        }
        module.settle().await;
        for message in pending(&module.transport, &mut module_cursor) {
            if message.topic == module.topic(TopicKind::State) {
                ccu.handle_event(as_event(message)).await.unwrap();
            }
        }
        if ccu.manager().active_workflows().is_empty() {
            break;
        }
    }

    assert_eq!(
        ccu.manager().workflow(&order_id).map(|w| w.status),
        Some(WorkflowStatus::Completed)
    );
    assert_eq!(
        module.hardware.executed(),
        commands(&["PICK", "DRILL", "DROP"])
    );
    let updates: Vec<u64> = ccu_transport
        .order_frames()
        .iter()
        .map(|o| o.order_update_id)
        .collect();
    assert_eq!(updates, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_ccu_stops_after_module_failure() {
    let mut module = Harness::new(DRILL_SERIAL, ModuleKind::Drill);
    module.hardware.fail_next("DRILL", "bit broken");
    let ccu_transport = RecordingTransport::new();
    let mut ccu = CcuCoordinator::new(ccu_transport.clone(), 10);

    let order_id = ccu
        .start_workflow(Role::Module, DRILL_SERIAL, commands(&["PICK", "DRILL", "DROP"]))
        .await
        .unwrap();

    let (mut ccu_cursor, mut module_cursor) = (0, 0);
    for _ in 0..20 {
        for message in pending(&ccu_transport, &mut ccu_cursor) {
            if message.topic == module.topic(TopicKind::Order) {
                module.runtime.handle_event(as_event(message)).await.unwrap();
            }
        }
        module.settle().await;
        for message in pending(&module.transport, &mut module_cursor) {
            ccu.handle_event(as_event(message)).await.unwrap();
        }
        if ccu.manager().active_workflows().is_empty() {
            break;
        }
    }

    assert_eq!(
        ccu.manager().workflow(&order_id).map(|w| w.status),
        Some(WorkflowStatus::Cancelled)
    );
    let sent: Vec<String> = ccu_transport
        .order_frames()
        .into_iter()
        .map(|o| o.action.command)
        .collect();
    assert_eq!(sent, commands(&["PICK", "DRILL"]));
    assert_eq!(module.hardware.executed(), commands(&["PICK"]));
}

#[tokio::test]
async fn test_reset_request_reaches_the_module() {
    let ccu_transport = RecordingTransport::new();
    let mut ccu = CcuCoordinator::new(ccu_transport.clone(), 10);
    ccu.handle_event(SessionEvent::Connected).await.unwrap();
    ccu.start_workflow(Role::Module, DRILL_SERIAL, commands(&["PICK"]))
        .await
        .unwrap();

    ccu.handle_event(SessionEvent::Message(InboundMessage::new(
        "ccu/set/reset",
        b"{}".to_vec(),
    )))
    .await
    .unwrap();

    let resets = ccu_transport.published_on(&format!("module/v1/ff/{DRILL_SERIAL}/instantAction"));
    assert_eq!(resets.len(), 1);
    let Some(Frame::InstantAction(InstantActionFrame { actions, .. })) = resets[0].decode() else {
        panic!("expected an instant action frame");
    };
    assert_eq!(actions[0].action_type, "reset");
    assert!(ccu.manager().active_workflows().is_empty());

    let completed = ccu_transport.published_on("ccu/order/completed");
    let snapshot: serde_json::Value =
        serde_json::from_slice(&completed.last().unwrap().payload).unwrap();
    assert_eq!(snapshot["workflows"][0]["status"], json!("CANCELLED"));
}

#[tokio::test]
async fn test_refused_step_closes_the_workflow() {
    let mut module = Harness::new(DRILL_SERIAL, ModuleKind::Drill);
    module.send_order("local", 0, crate::common::action("l1", "PICK")).await;
    assert!(module.runtime.is_busy());

    let ccu_transport = RecordingTransport::new();
    let mut ccu = CcuCoordinator::new(ccu_transport.clone(), 10);
    let order_id = ccu
        .start_workflow(Role::Module, DRILL_SERIAL, commands(&["PICK", "DRILL"]))
        .await
        .unwrap();

    let mut module_cursor = module.transport.published().len();
    let mut ccu_cursor = 0;
    for message in pending(&ccu_transport, &mut ccu_cursor) {
        if message.topic == module.topic(TopicKind::Order) {
            module.runtime.handle_event(as_event(message)).await.unwrap();
        }
    }
    for message in pending(&module.transport, &mut module_cursor) {
        ccu.handle_event(as_event(message)).await.unwrap();
    }

    let workflow = ccu.manager().workflow(&order_id).expect("workflow is known");
    assert_eq!(workflow.status, WorkflowStatus::Cancelled);
    assert!(workflow
        .reason
        .as_deref()
        .is_some_and(|r| r.starts_with("orderError on SVR4H73275")));
    assert!(ccu.manager().active_workflows().is_empty());

    let active = ccu_transport.published_on("ccu/order/active");
    let snapshot: serde_json::Value =
        serde_json::from_slice(&active.last().unwrap().payload).unwrap();
    assert_eq!(snapshot["workflows"], json!([]));

    // the local order is untouched
    module.settle().await;
    assert_eq!(module.hardware.executed(), commands(&["PICK"]));
}
