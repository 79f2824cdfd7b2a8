//! Liveness: Will, ONLINE / OFFLINE and header ids across restarts

use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use aps_core::messaging::topics;
use aps_core::messaging::{
    ConnectionState, Frame, InboundMessage, OrderFrame, QualityOfService, Role, SessionEvent,
    TopicKind,
};
use aps_core::module::{ModuleKind, RuntimeBootstrap, RuntimeSettings};
use aps_core::state_machine::ActionStatus;

use crate::common::{action, Harness, MILL_SERIAL};

#[test]
fn test_will_is_minted_first() {
    let bootstrap =
        RuntimeBootstrap::prepare(RuntimeSettings::new(MILL_SERIAL, ModuleKind::Mill)).unwrap();
    let will = bootstrap.will();
    assert!(will.retain);
    assert_eq!(will.topic, format!("module/v1/ff/{MILL_SERIAL}/connection"));

    let Some(Frame::Connection(frame)) = will.decode() else {
        panic!("will must carry a connection frame");
    };
    assert_eq!(frame.header_id, 1);
    assert_eq!(frame.connection_state, ConnectionState::ConnectionBroken);
}

#[tokio::test]
async fn test_online_is_retained_and_follows_will() {
    let mut h = Harness::new(MILL_SERIAL, ModuleKind::Mill);
    h.connect().await;

    let published = h.transport.published();
    let online = &published[0];
    assert!(online.retain);
    assert_eq!(online.qos, QualityOfService::AtLeastOnce);
    let frames = h.transport.connection_frames();
    assert_eq!(frames[0].connection_state, ConnectionState::Online);
    assert_eq!(frames[0].header_id, 2);
}

#[tokio::test]
async fn test_reconnect_republishes_online_without_factsheet() {
    let mut h = Harness::new(MILL_SERIAL, ModuleKind::Mill);
    h.connect().await;
    h.runtime
        .handle_event(SessionEvent::Disconnected {
            reason: "broker restart".to_string(),
        })
        .await
        .unwrap();
    h.connect().await;

    let ids: Vec<u64> = h
        .transport
        .connection_frames()
        .iter()
        .map(|f| f.header_id)
        .collect();
    assert_eq!(ids, vec![2, 3]);
    assert_eq!(
        h.transport
            .published_on(&format!("module/v1/ff/{MILL_SERIAL}/factsheet"))
            .len(),
        1
    );
}

#[tokio::test]
async fn test_restart_continues_connection_sequence() {
    let dir = TempDir::new().unwrap();
    let settings = RuntimeSettings::new(MILL_SERIAL, ModuleKind::Mill).with_state_dir(dir.path());

    {
        let mut first = Harness::with_settings(settings.clone());
        first.connect().await;
        assert_eq!(first.transport.connection_frames()[0].header_id, 2);
        // killed without OFFLINE
    }

    let bootstrap = RuntimeBootstrap::prepare(settings.clone()).unwrap();
    let Some(Frame::Connection(will)) = bootstrap.will().decode() else {
        panic!("will must carry a connection frame");
    };
    assert!(will.header_id >= 3);

    let mut second = Harness::with_settings(settings);
    second.connect().await;
    let online = &second.transport.connection_frames()[0];
    assert_eq!(online.connection_state, ConnectionState::Online);
    assert!(online.header_id >= 3);
}

#[tokio::test]
async fn test_run_loop_executes_and_shuts_down() {
    let Harness {
        runtime,
        transport,
        hardware,
        ..
    } = Harness::new(MILL_SERIAL, ModuleKind::Mill);
    let (tx, rx) = mpsc::channel(8);
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(runtime.run(rx, shutdown.clone()));

    let order = InboundMessage::from_frame(
        topics::topic(Role::Module, MILL_SERIAL, TopicKind::Order).unwrap(),
        &Frame::Order(OrderFrame::new("o1", 0, action("a1", "PICK"))),
    )
    .unwrap();
    tx.send(SessionEvent::Connected).await.unwrap();
    tx.send(SessionEvent::Message(order)).await.unwrap();

    let finished = async {
        loop {
            let done = transport
                .state_frames()
                .iter()
                .filter_map(|s| s.action_state.as_ref())
                .any(|a| a.id == "a1" && a.state == ActionStatus::Finished);
            if done {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(5), finished)
        .await
        .expect("order finishes");

    shutdown.cancel();
    handle.await.unwrap().unwrap();

    let last = transport.connection_frames().pop().unwrap();
    assert_eq!(last.connection_state, ConnectionState::Offline);
    assert_eq!(last.header_id, 3);
    assert!(transport.is_disconnected());
    assert_eq!(hardware.executed(), vec!["PICK".to_string()]);
}

#[tokio::test]
async fn test_run_loop_stops_when_session_ends() {
    let Harness {
        runtime, transport, ..
    } = Harness::new(MILL_SERIAL, ModuleKind::Drill);
    let (tx, rx) = mpsc::channel(8);
    tx.send(SessionEvent::Connected).await.unwrap();
    drop(tx);

    runtime.run(rx, CancellationToken::new()).await.unwrap();
    let states: Vec<_> = transport
        .connection_frames()
        .into_iter()
        .map(|f| f.connection_state)
        .collect();
    assert_eq!(states, vec![ConnectionState::Online, ConnectionState::Offline]);
}
