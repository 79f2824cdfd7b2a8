use serde_json::json;

use aps_core::messaging::{Frame, TopicKind};
use aps_core::module::ModuleKind;
use aps_core::state_machine::{ActionStatus, ModuleState};

use crate::common::{action, instant, Harness, FTS_SERIAL, MILL_SERIAL};

#[tokio::test]
async fn test_reset_aborts_running_order() {
    let mut h = Harness::new(MILL_SERIAL, ModuleKind::Mill);
    h.send_order("o1", 0, action("a1", "PICK")).await;
    h.send_order("o1", 1, action("a2", "MILL")).await;
    assert!(h.runtime.is_busy());

    h.send_instant(vec![instant("reset", "r1")]).await;
    let state = h.last_state();
    let reported = state.action_state.expect("reset is reported");
    assert_eq!(reported.id, "r1");
    assert_eq!(reported.command, "reset");
    assert_eq!(reported.state, ActionStatus::Finished);
    assert_eq!(state.order_id, "");
    assert_eq!(h.runtime.module_state(), ModuleState::Idle);

    // the late completion of a1 must not resurrect the order
    let before = h.states().len();
    h.settle().await;
    assert_eq!(h.states().len(), before);
    assert!(h.runtime.order_book().actions().is_empty());
    assert_eq!(h.hardware.position(), "HOME");
}

#[tokio::test]
async fn test_new_order_after_reset_waits_for_hardware() {
    let mut h = Harness::new(MILL_SERIAL, ModuleKind::Mill);
    h.send_order("o1", 0, action("a1", "PICK")).await;
    h.send_instant(vec![instant("reset", "r1")]).await;
    h.send_order("o2", 0, action("b1", "PICK")).await;

    // o2 is queued behind the abandoned step, then runs
    assert_eq!(
        h.runtime.order_book().action("b1").map(|a| a.state),
        Some(ActionStatus::Waiting)
    );
    h.settle().await;
    assert_eq!(
        h.runtime.order_book().action("b1").map(|a| a.state),
        Some(ActionStatus::Finished)
    );
}

#[tokio::test]
async fn test_factsheet_request() {
    let mut h = Harness::new(MILL_SERIAL, ModuleKind::Mill);
    h.send_instant(vec![instant("factsheetRequest", "f1")]).await;

    let sheets = h.transport.published_on(&h.topic(TopicKind::Factsheet));
    assert_eq!(sheets.len(), 1);
    assert!(sheets[0].retain);
    let Some(Frame::Factsheet(sheet)) = sheets[0].decode() else {
        panic!("expected a factsheet frame");
    };
    assert_eq!(sheet.serial_number, MILL_SERIAL);
    assert_eq!(
        sheet.extra["typeSpecification"]["moduleClass"],
        json!("MILL")
    );

    let reported = h.last_state().action_state.expect("action state");
    assert_eq!((reported.id.as_str(), reported.state), ("f1", ActionStatus::Finished));
}

#[tokio::test]
async fn test_unknown_instant_action_is_rejected() {
    let mut h = Harness::new(MILL_SERIAL, ModuleKind::Mill);
    h.send_instant(vec![instant("selfDestruct", "x1")]).await;

    let state = h.last_state();
    let errors: Vec<_> = state.errors_of_type("invalidInstantAction").collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].reference("actionId"), Some(&json!("x1")));
    assert_eq!(errors[0].reference("actionType"), Some(&json!("selfDestruct")));
    assert!(state.action_state.is_none());
}

#[tokio::test]
async fn test_empty_instant_action_frame_changes_nothing() {
    let mut h = Harness::new(MILL_SERIAL, ModuleKind::Mill);
    h.send_instant(Vec::new()).await;
    assert!(h.transport.published().is_empty());
}

#[tokio::test]
async fn test_actions_in_one_frame_apply_in_order() {
    let mut h = Harness::new(MILL_SERIAL, ModuleKind::Mill);
    h.send_instant(vec![instant("factsheetRequest", "f1"), instant("reset", "r1")])
        .await;

    let ids: Vec<String> = h
        .states()
        .into_iter()
        .filter_map(|s| s.action_state.map(|a| a.id))
        .collect();
    assert_eq!(ids, vec!["f1".to_string(), "r1".to_string()]);
}

#[tokio::test]
async fn test_transport_finds_dock_position() {
    let mut h = Harness::new(FTS_SERIAL, ModuleKind::Fts);
    h.send_instant(vec![
        instant("findInitialDockPosition", "d1").with_metadata("nodeId", "SVR4H73275")
    ])
    .await;
    h.send_instant(vec![instant("findInitialDockPosition", "d2")]).await;

    let results: Vec<Option<String>> = h
        .states()
        .into_iter()
        .filter_map(|s| s.action_state.map(|a| a.result))
        .collect();
    assert_eq!(
        results,
        vec![Some("SVR4H73275".to_string()), Some("DOCK".to_string())]
    );
    assert!(h
        .transport
        .published()
        .iter()
        .all(|m| m.topic.starts_with("fts/v1/ff/5iO4/")));
}

#[tokio::test]
async fn test_transport_refuses_factsheet_request() {
    let mut h = Harness::new(FTS_SERIAL, ModuleKind::Fts);
    h.send_instant(vec![instant("factsheetRequest", "f1")]).await;
    assert_eq!(h.last_state().errors_of_type("invalidInstantAction").count(), 1);
}

#[tokio::test]
async fn test_module_refuses_dock_search() {
    let mut h = Harness::new(MILL_SERIAL, ModuleKind::Mill);
    h.send_instant(vec![instant("findInitialDockPosition", "d1")]).await;
    assert_eq!(h.last_state().errors_of_type("invalidInstantAction").count(), 1);
}

#[tokio::test]
async fn test_transport_battery_is_reported() {
    let mut h = Harness::new(FTS_SERIAL, ModuleKind::Fts);
    h.send_order("o1", 0, action("a1", "PASS")).await;
    h.settle().await;

    let battery = h.last_state().battery_state.expect("transport reports battery");
    assert!(battery.percentage < 100.0);
}
