use serde_json::json;
use tempfile::TempDir;

use aps_core::messaging::ActionState;
use aps_core::module::{ModuleKind, RuntimeSettings};
use aps_core::state_machine::ActionStatus;

use crate::common::{action, instant, Harness, MILL_SERIAL};

fn last_reported(h: &Harness) -> ActionState {
    h.last_state().action_state.expect("action state")
}

#[tokio::test]
async fn test_calibration_session_persists_references() {
    let dir = TempDir::new().unwrap();
    let settings = RuntimeSettings::new(MILL_SERIAL, ModuleKind::Mill).with_state_dir(dir.path());
    let mut h = Harness::with_settings(settings.clone());

    h.send_instant(vec![instant("calibration.start", "c1")]).await;
    assert_eq!(last_reported(&h).result.as_deref(), Some("STARTED"));
    assert!(h.runtime.calibration().is_active());

    h.send_instant(vec![
        instant("calibration.select", "c2").with_metadata("position", "PROCESS")
    ])
    .await;
    assert_eq!(last_reported(&h).result.as_deref(), Some("PROCESS"));
    assert_eq!(h.hardware.position(), "PROCESS");

    h.send_instant(vec![
        instant("calibration.set", "c3").with_metadata("references", json!({"x": 12}))
    ])
    .await;
    h.send_instant(vec![instant("calibration.store", "c4")]).await;
    assert_eq!(last_reported(&h).result.as_deref(), Some("STORED"));

    h.send_instant(vec![instant("calibration.stop", "c5")]).await;
    assert!(!h.runtime.calibration().is_active());
    assert_eq!(h.hardware.position(), "HOME");

    // a fresh runtime on the same directory sees the stored references
    let restarted = Harness::with_settings(settings);
    let references = restarted
        .runtime
        .calibration()
        .data()
        .references("PROCESS")
        .cloned()
        .expect("stored references");
    assert_eq!(references.get("x"), Some(&json!(12)));
}

#[tokio::test]
async fn test_orders_are_refused_during_calibration() {
    let mut h = Harness::new(MILL_SERIAL, ModuleKind::Mill);
    h.send_instant(vec![instant("calibration.start", "c1")]).await;
    h.send_order("o1", 0, action("a1", "PICK")).await;

    let state = h.last_state();
    assert_eq!(state.errors_of_type("orderError").count(), 1);
    assert!(h.runtime.order_book().actions().is_empty());
    assert!(!h.runtime.is_busy());
}

#[tokio::test]
async fn test_calibration_cannot_start_during_an_order() {
    let mut h = Harness::new(MILL_SERIAL, ModuleKind::Mill);
    h.send_order("o1", 0, action("a1", "PICK")).await;
    h.send_instant(vec![instant("calibration.start", "c1")]).await;

    assert_eq!(h.last_state().errors_of_type("invalidInstantAction").count(), 1);
    assert!(!h.runtime.calibration().is_active());
    h.settle().await;
}

#[tokio::test]
async fn test_calibration_requires_start() {
    let mut h = Harness::new(MILL_SERIAL, ModuleKind::Mill);
    h.send_instant(vec![
        instant("calibration.select", "c1").with_metadata("position", "PICKUP")
    ])
    .await;
    assert_eq!(h.last_state().errors_of_type("invalidInstantAction").count(), 1);
}

#[tokio::test]
async fn test_motion_failure_reports_failed_action() {
    let mut h = Harness::new(MILL_SERIAL, ModuleKind::Mill);
    h.hardware.fail_motion_to("PICKUP");
    h.send_instant(vec![instant("calibration.start", "c1")]).await;
    h.send_instant(vec![
        instant("calibration.select", "c2").with_metadata("position", "PICKUP")
    ])
    .await;

    let reported = last_reported(&h);
    assert_eq!(reported.id, "c2");
    assert_eq!(reported.state, ActionStatus::Failed);
    assert!(h.runtime.calibration().failed_before());

    // test re-selects the position after a failed motion
    h.send_instant(vec![instant("calibration.test", "c3")]).await;
    let reported = last_reported(&h);
    assert_eq!(reported.state, ActionStatus::Finished);
    assert_eq!(reported.result.as_deref(), Some("PICKUP"));
    assert!(!h.runtime.calibration().failed_before());
}

#[tokio::test]
async fn test_store_without_state_dir_fails() {
    let mut h = Harness::new(MILL_SERIAL, ModuleKind::Mill);
    h.send_instant(vec![instant("calibration.start", "c1")]).await;
    h.send_instant(vec![instant("calibration.store", "c2")]).await;
    assert_eq!(last_reported(&h).state, ActionStatus::Failed);
}

#[tokio::test]
async fn test_unknown_position_is_rejected() {
    let mut h = Harness::new(MILL_SERIAL, ModuleKind::Mill);
    h.send_instant(vec![instant("calibration.start", "c1")]).await;
    h.send_instant(vec![
        instant("calibration.select", "c2").with_metadata("position", "A1")
    ])
    .await;
    assert_eq!(h.last_state().errors_of_type("invalidInstantAction").count(), 1);
}
