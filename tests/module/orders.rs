use serde_json::json;

use aps_core::messaging::{ErrorLevel, TopicKind};
use aps_core::module::{ModuleKind, RuntimeSettings, SimulatedHardware};
use aps_core::state_machine::{ActionStatus, ModuleState};
use std::sync::Arc;
use std::time::Duration;

use crate::common::{action, trail, Harness, AIQS_SERIAL, MILL_SERIAL};

#[tokio::test]
async fn test_happy_path_mill_order() {
    let mut h = Harness::new(MILL_SERIAL, ModuleKind::Mill);
    h.send_order("o1", 0, action("a1", "PICK")).await;
    assert_eq!(h.runtime.module_state(), ModuleState::Processing);
    h.settle().await;

    assert_eq!(
        h.action_trail(),
        trail(&[("a1", ActionStatus::Running), ("a1", ActionStatus::Finished)])
    );
    let states = h.states();
    assert_eq!(states[0].order_id, "o1");
    assert_eq!(states[1].order_id, "");
    assert!(states[1].errors.is_empty());
    assert_eq!(h.runtime.module_state(), ModuleState::Idle);
    assert!(!h.runtime.order_book().has_active_order());
}

#[tokio::test]
async fn test_state_header_ids_increase() {
    let mut h = Harness::new(MILL_SERIAL, ModuleKind::Mill);
    h.connect().await;
    h.send_order("o1", 0, action("a1", "PICK")).await;
    h.settle().await;

    let ids: Vec<u64> = h.states().iter().map(|s| s.header_id).collect();
    assert_eq!(ids, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_concurrent_order_is_rejected() {
    let mut h = Harness::new(MILL_SERIAL, ModuleKind::Mill);
    h.send_order("o1", 0, action("a1", "PICK")).await;
    h.send_order("o2", 0, action("a2", "PICK")).await;

    let rejection = h.last_state();
    let errors: Vec<_> = rejection.errors_of_type("orderError").collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].error_level, ErrorLevel::Warning);
    assert_eq!(errors[0].reference("orderId"), Some(&json!("o2")));
    assert!(h.action_trail().iter().all(|(id, _)| id != "a2"));

    h.settle().await;
    let finished = h.last_state();
    assert_eq!(
        finished.action_state.map(|a| (a.id, a.state)),
        Some(("a1".to_string(), ActionStatus::Finished))
    );
    // warnings are reported once
    assert!(finished.errors.is_empty());
}

#[tokio::test]
async fn test_stale_update_is_rejected() {
    let mut h = Harness::new(MILL_SERIAL, ModuleKind::Mill);
    h.send_order("o1", 3, action("a1", "PICK")).await;
    h.settle().await;
    let before = h.states().len();

    h.send_order("o1", 2, action("a9", "DROP")).await;
    let states = h.states();
    assert_eq!(states.len(), before + 1);
    let rejection = states.last().unwrap();
    assert_eq!(rejection.errors_of_type("orderUpdateError").count(), 1);
    assert_eq!(rejection.order_update_id, 3);
    assert_eq!(
        h.runtime.order_book().action("a1").map(|a| a.state),
        Some(ActionStatus::Finished)
    );
    assert!(h.runtime.order_book().action("a9").is_none());
}

#[tokio::test]
async fn test_duplicate_order_is_a_no_op() {
    let mut h = Harness::new(MILL_SERIAL, ModuleKind::Mill);
    h.send_order("o1", 0, action("a1", "PICK")).await;
    h.settle().await;
    let before = h.transport.published().len();

    h.send_order("o1", 0, action("a1", "PICK")).await;
    h.settle().await;
    assert_eq!(h.transport.published().len(), before);
    assert_eq!(h.hardware.executed(), vec!["PICK".to_string()]);
}

#[tokio::test]
async fn test_failure_cascades_through_queued_actions() {
    let mut h = Harness::new(MILL_SERIAL, ModuleKind::Mill);
    h.hardware.fail_next("MILL", "spindle jammed");

    h.send_order("o1", 0, action("a1", "PICK")).await;
    h.send_order("o1", 1, action("a2", "MILL")).await;
    h.send_order("o1", 2, action("a3", "DROP")).await;
    h.settle().await;

    assert_eq!(
        h.action_trail(),
        trail(&[
            ("a1", ActionStatus::Running),
            ("a1", ActionStatus::Finished),
            ("a2", ActionStatus::Running),
            ("a2", ActionStatus::Failed),
            ("a3", ActionStatus::Failed),
        ])
    );

    let last = h.last_state();
    assert_eq!(last.order_id, "");
    let fatal: Vec<_> = last.errors_of_type("MILL_error").collect();
    assert_eq!(fatal.len(), 1);
    assert_eq!(fatal[0].error_level, ErrorLevel::Fatal);
    assert_eq!(fatal[0].reference("actionId"), Some(&json!("a2")));
    assert_eq!(fatal[0].reference("orderId"), Some(&json!("o1")));

    assert_eq!(h.hardware.executed(), vec!["PICK".to_string()]);
    assert_eq!(h.runtime.module_state(), ModuleState::Idle);
}

#[tokio::test]
async fn test_fatal_error_persists_until_reset() {
    let mut h = Harness::new(MILL_SERIAL, ModuleKind::Mill);
    h.hardware.fail_next("PICK", "gripper open");
    h.send_order("o1", 0, action("a1", "PICK")).await;
    h.settle().await;

    h.send_order("o2", 0, action("a2", "PICK")).await;
    h.settle().await;
    assert_eq!(h.last_state().errors_of_type("PICK_error").count(), 1);

    h.send_instant(vec![crate::common::instant("reset", "r1")]).await;
    assert!(h.last_state().errors.is_empty());
}

#[tokio::test]
async fn test_update_after_failure_is_failed_without_running() {
    let mut h = Harness::new(MILL_SERIAL, ModuleKind::Mill);
    h.hardware.fail_next("PICK", "gripper open");
    h.send_order("o1", 0, action("a1", "PICK")).await;
    h.settle().await;

    h.send_order("o1", 1, action("a2", "MILL")).await;
    h.settle().await;
    assert_eq!(
        h.runtime.order_book().action("a2").map(|a| a.state),
        Some(ActionStatus::Failed)
    );
    assert!(h.hardware.executed().is_empty());
}

#[tokio::test]
async fn test_unsupported_command_is_rejected() {
    let mut h = Harness::new(MILL_SERIAL, ModuleKind::Mill);
    h.send_order("o1", 0, action("a1", "DRILL")).await;

    let state = h.last_state();
    assert_eq!(state.errors_of_type("orderError").count(), 1);
    assert!(state.action_state.is_none());
    assert!(!h.runtime.is_busy());
}

#[tokio::test]
async fn test_unsupported_update_is_an_order_error() {
    let mut h = Harness::new(MILL_SERIAL, ModuleKind::Mill);
    h.send_order("o1", 0, action("a1", "PICK")).await;
    h.settle().await;
    h.send_order("o1", 1, action("a2", "DRILL")).await;
    h.settle().await;

    let state = h.last_state();
    let errors: Vec<_> = state.errors_of_type("orderError").collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].error_level, ErrorLevel::Warning);
    assert_eq!(errors[0].reference("actionId"), Some(&json!("a2")));
    assert_eq!(errors[0].reference("actionCommand"), Some(&json!("DRILL")));
    assert_eq!(state.errors_of_type("DRILL_error").count(), 0);
    assert!(h.runtime.order_book().action("a2").is_none());
    assert_eq!(h.hardware.executed(), vec!["PICK".to_string()]);
    assert_eq!(h.runtime.module_state(), ModuleState::Idle);
}

#[tokio::test]
async fn test_returning_order_id_cannot_go_backwards() {
    let mut h = Harness::new(MILL_SERIAL, ModuleKind::Mill);
    h.send_order("o1", 5, action("a1", "PICK")).await;
    h.settle().await;
    h.send_order("o2", 0, action("b1", "PICK")).await;
    h.settle().await;

    h.send_order("o1", 0, action("a9", "MILL")).await;
    let state = h.last_state();
    let errors: Vec<_> = state.errors_of_type("orderUpdateError").collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].reference("orderId"), Some(&json!("o1")));
    assert!(h.runtime.order_book().action("a9").is_none());

    // re-sending the highest update of o1 is still a no-op
    let before = h.states().len();
    h.send_order("o1", 5, action("a1", "PICK")).await;
    assert_eq!(h.states().len(), before);
    assert_eq!(
        h.hardware.executed(),
        vec!["PICK".to_string(), "PICK".to_string()]
    );
}

#[tokio::test]
async fn test_empty_command_is_a_validation_error() {
    let mut h = Harness::new(MILL_SERIAL, ModuleKind::Mill);
    let payload = json!({
        "orderId": "o1",
        "orderUpdateId": 0,
        "timestamp": "2024-01-01T00:00:00.000Z",
        "action": {"id": "a1", "command": ""}
    });
    h.send_raw(TopicKind::Order, &payload.to_string()).await;

    let state = h.last_state();
    let errors: Vec<_> = state.errors_of_type("validationError").collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(
        errors[0].reference("topic"),
        Some(&json!(h.topic(TopicKind::Order)))
    );
    assert!(h.runtime.order_book().actions().is_empty());
}

#[tokio::test]
async fn test_malformed_payload_is_dropped() {
    let mut h = Harness::new(MILL_SERIAL, ModuleKind::Mill);
    h.send_raw(TopicKind::Order, "{not json").await;
    assert!(h.transport.published().is_empty());
}

#[tokio::test]
async fn test_quality_rejection_finishes_with_failed_result() {
    let hardware = Arc::new(
        SimulatedHardware::new(ModuleKind::Aiqs).with_delay(Duration::from_millis(1)),
    );
    hardware.push_quality_result("FAILED");
    let mut h = Harness::with_hardware(RuntimeSettings::new(AIQS_SERIAL, ModuleKind::Aiqs), hardware);

    h.send_order("o1", 0, action("a1", "CHECK_QUALITY")).await;
    h.settle().await;

    let finished = h.last_state().action_state.expect("action state");
    assert_eq!(finished.state, ActionStatus::Finished);
    assert_eq!(finished.result.as_deref(), Some("FAILED"));
    assert_eq!(h.runtime.module_state(), ModuleState::Idle);

    // the module takes the next order after recovering
    h.send_order("o2", 0, action("a2", "DROP")).await;
    h.settle().await;
    assert_eq!(
        h.last_state().action_state.map(|a| a.state),
        Some(ActionStatus::Finished)
    );
}

#[tokio::test]
async fn test_hbw_reports_loads_after_drop() {
    let mut h = Harness::new("SVR3QA0033", ModuleKind::Hbw);
    h.send_order(
        "o1",
        0,
        action("a1", "DROP").with_metadata("type", "BLUE"),
    )
    .await;
    h.settle().await;

    let loads = h.last_state().loads;
    assert_eq!(loads.len(), 1);
    assert_eq!(loads[0].load_type, "BLUE");
    assert_eq!(loads[0].load_position, "A1");
}
