use std::sync::Arc;
use std::time::Duration;

use aps_core::messaging::ErrorLevel;
use aps_core::module::{ModuleKind, RuntimeSettings, SimulatedHardware};
use aps_core::state_machine::{ActionStatus, ModuleState};

use crate::common::{action, trail, Harness, MILL_SERIAL};

fn slow_mill(settings: RuntimeSettings) -> Harness {
    let hardware = Arc::new(SimulatedHardware::new(ModuleKind::Mill).with_delay(Duration::from_millis(300)));
    Harness::with_hardware(settings, hardware)
}

#[tokio::test]
async fn test_metadata_timeout_fails_the_action() {
    let mut h = slow_mill(RuntimeSettings::new(MILL_SERIAL, ModuleKind::Mill));
    h.send_order("o1", 0, action("a1", "MILL").with_metadata("timeout", 0.02))
        .await;
    h.settle().await;

    assert_eq!(
        h.action_trail(),
        trail(&[("a1", ActionStatus::Running), ("a1", ActionStatus::Failed)])
    );
    let state = h.last_state();
    let errors: Vec<_> = state.errors_of_type("MILL_error").collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].error_level, ErrorLevel::Fatal);
    assert!(errors[0]
        .error_description
        .as_deref()
        .is_some_and(|d| d.contains("timed out")));
    assert_eq!(h.runtime.module_state(), ModuleState::Idle);
}

#[tokio::test]
async fn test_default_timeout_applies_without_metadata() {
    let settings = RuntimeSettings::new(MILL_SERIAL, ModuleKind::Mill)
        .with_default_action_timeout(Duration::from_millis(20));
    let mut h = slow_mill(settings);
    h.send_order("o1", 0, action("a1", "PICK")).await;
    h.settle().await;

    assert_eq!(
        h.last_state().action_state.map(|a| a.state),
        Some(ActionStatus::Failed)
    );
}

#[tokio::test]
async fn test_generous_timeout_lets_the_action_finish() {
    let settings = RuntimeSettings::new(MILL_SERIAL, ModuleKind::Mill)
        .with_default_action_timeout(Duration::from_millis(20));
    let mut h = slow_mill(settings);
    h.send_order("o1", 0, action("a1", "PICK").with_metadata("timeout", 5))
        .await;
    h.settle().await;

    assert_eq!(
        h.last_state().action_state.map(|a| a.state),
        Some(ActionStatus::Finished)
    );
}
