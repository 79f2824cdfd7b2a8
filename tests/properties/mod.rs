use proptest::prelude::*;

use aps_core::clock::SequenceCounters;
use aps_core::config::BackoffConfig;
use aps_core::connection::ReconnectPolicy;
use aps_core::messaging::topics;
use aps_core::messaging::{Role, TopicKind};
use aps_core::orchestration::WorkflowOrderManager;

fn kind_strategy() -> impl Strategy<Value = TopicKind> {
    prop_oneof![
        Just(TopicKind::Connection),
        Just(TopicKind::State),
        Just(TopicKind::Order),
        Just(TopicKind::InstantAction),
        Just(TopicKind::Factsheet),
    ]
}

fn backoff(initial_delay_ms: u64, max_delay_ms: u64, jitter: f64) -> BackoffConfig {
    BackoffConfig {
        initial_delay_ms,
        max_delay_ms,
        backoff_multiplier: 2.0,
        jitter_enabled: jitter > 0.0,
        jitter_max_percentage: jitter,
        max_attempts: 10,
    }
}

proptest! {
    /// Header ids per topic kind are strictly increasing, whatever the interleaving
    #[test]
    fn header_ids_strictly_increase(kinds in prop::collection::vec(kind_strategy(), 1..64)) {
        let mut counters = SequenceCounters::new();
        let mut last = std::collections::HashMap::new();
        for kind in kinds {
            let id = counters.next(kind);
            let previous = last.insert(kind, id).unwrap_or(0);
            prop_assert!(id > previous);
        }
    }

    /// A restored floor is never reissued
    #[test]
    fn raised_floor_is_never_reissued(floor in 0u64..10_000, used in 0u64..10_000) {
        let mut counters = SequenceCounters::new();
        for _ in 0..(used % 16) {
            counters.next(TopicKind::Connection);
        }
        counters.raise_floor(TopicKind::Connection, floor);
        prop_assert!(counters.next(TopicKind::Connection) > floor);
    }

    /// Backoff never exceeds the configured maximum, jitter included
    #[test]
    fn backoff_is_bounded(
        initial in 1u64..5_000,
        extra in 0u64..60_000,
        jitter in 0.0f64..0.5,
        attempt in 1u32..40,
    ) {
        let max = initial + extra;
        let policy = ReconnectPolicy::from_config(&backoff(initial, max, jitter));
        let delay = policy.delay_for(attempt);
        prop_assert!(delay.as_millis() <= u128::from(max));
        prop_assert!(policy.base_delay(attempt) <= policy.base_delay(attempt + 1));
    }

    /// Workflow steps carry orderUpdateId 1..=N in command order
    #[test]
    fn workflow_steps_are_numbered_in_order(
        commands in prop::collection::vec("[A-Z]{3,8}", 1..8),
    ) {
        let mut manager = WorkflowOrderManager::new(4);
        let order_id = manager.start_workflow("SVR3QA0022", commands.clone()).unwrap();
        let first = manager.next_command_frame(&order_id).unwrap();
        prop_assert_eq!(first.order_update_id, 1);
        prop_assert_eq!(&first.action.command, &commands[0]);
        // nothing further until the step is observed FINISHED
        prop_assert!(manager.next_command_frame(&order_id).is_err());
    }

    /// Topics built for a serial parse back to the same serial and kind
    #[test]
    fn topics_parse_back(serial in "SVR[A-Z0-9]{1,9}", kind in kind_strategy()) {
        let topic = topics::topic(Role::Module, &serial, kind).unwrap();
        let parsed = topics::parse(&topic).unwrap();
        prop_assert_eq!(parsed.serial(), Some(serial.as_str()));
        prop_assert_eq!(parsed.kind(), Some(kind));
    }
}
