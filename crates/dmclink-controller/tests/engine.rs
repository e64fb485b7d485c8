mod support;

use std::time::Duration;

use dmclink_controller::{
    ChannelKind, ChannelStatus, Controller, ControllerConfig, ControllerError, ControllerEvent,
};
use support::{eventually, galil, FakeController};

#[tokio::test]
async fn connect_sends_handshake_on_message_channel() {
    let fake = FakeController::start(galil).await;
    let controller = fake.controller().await;

    assert_eq!(fake.message_requests(), vec!["CF I"]);
    assert!(fake.requests().is_empty());

    let status = controller.status();
    assert_eq!(status.status, ChannelStatus::Connected);
    assert_eq!(status.commands.channel, ChannelKind::Commands);
    assert_eq!(status.messages.endpoint.unwrap().port, fake.message_port);
}

#[tokio::test]
async fn handshake_can_be_disabled() {
    let fake = FakeController::start(galil).await;
    let controller = Controller::new(ControllerConfig {
        handshake_command: None,
        ..fake.config()
    })
    .unwrap();
    controller.connect().await.unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(fake.message_requests().is_empty());
}

#[tokio::test]
async fn disconnect_is_idempotent_and_aggregated() {
    let fake = FakeController::start(galil).await;
    let controller = fake.controller().await;

    controller.disconnect().await;
    controller.disconnect().await;

    let status = controller.status();
    assert_eq!(status.status, ChannelStatus::Disconnected);
    assert_eq!(status.commands.status, ChannelStatus::Disconnected);
    assert_eq!(status.messages.status, ChannelStatus::Disconnected);
}

#[tokio::test]
async fn reconnect_restores_both_channels() {
    let fake = FakeController::start(galil).await;
    let controller = fake.controller().await;

    controller.disconnect().await;
    controller.reconnect().await.unwrap();

    assert_eq!(controller.status().status, ChannelStatus::Connected);
    assert_eq!(fake.message_requests(), vec!["CF I", "CF I"]);
    controller.send_command(r#"MG "Hello""#).await.unwrap();
}

#[tokio::test]
async fn connect_to_absent_controller_fails() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let controller = Controller::new(ControllerConfig {
        connect_timeout_ms: 500,
        ..ControllerConfig::new("127.0.0.1", port)
    })
    .unwrap();

    let err = controller.connect().await.unwrap_err();
    assert!(matches!(err, ControllerError::Transport(_)), "got {err:?}");
    assert_eq!(controller.status().status, ChannelStatus::Failed);
    assert!(controller.status().commands.last_failure.is_some());
}

#[tokio::test]
async fn invalid_config_is_rejected() {
    let err = Controller::new(ControllerConfig {
        message_buffer_limit: 0,
        ..ControllerConfig::default()
    })
    .unwrap_err();
    assert!(matches!(err, ControllerError::Config(_)));
}

#[tokio::test]
async fn events_carry_frames_from_both_channels() {
    let fake = FakeController::start(galil).await;
    let controller = fake.controller().await;
    let mut events = controller.subscribe_events();

    controller.send_command(r#"MG "Hello""#).await.unwrap();
    fake.emit("End:Startup\r\n").await;

    let mut seen = Vec::new();
    while seen.len() < 2 {
        let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("missing frame event")
            .unwrap();
        if let ControllerEvent::Frame(frame) = event {
            if frame.text != ":" {
                seen.push((frame.channel, frame.text));
            }
        }
    }
    assert_eq!(
        seen,
        vec![
            (ChannelKind::Commands, "Hello".to_string()),
            (ChannelKind::Messages, "End:Startup".to_string()),
        ]
    );
    let tail = controller.channel(ChannelKind::Messages).recent_frames();
    assert_eq!(tail.last().unwrap().text, "End:Startup");
}

#[tokio::test]
async fn message_channel_reconnect_reapplies_handshake() {
    let fake = FakeController::start(galil).await;
    let controller = fake.controller().await;
    assert_eq!(fake.message_requests(), vec!["CF I"]);

    fake.drop_messages().await;

    assert!(
        eventually(Duration::from_secs(3), || fake.message_requests().len() == 2).await,
        "handshake not re-applied: {:?}",
        fake.message_requests()
    );
    assert_eq!(controller.channel(ChannelKind::Messages).status(), ChannelStatus::Connected);
}

#[tokio::test]
async fn watchers_are_cancelled_by_owner() {
    let fake = FakeController::start(galil).await;
    let controller = fake.controller().await;

    let _a = controller.watch_as("ui", "Cartridge");
    let _b = controller.watch_as("ui", "Door");
    let mut c = controller.watch("End:Load");
    assert_eq!(controller.watchers().active_count(), 3);

    assert_eq!(controller.cancel_watchers("ui"), 2);
    fake.emit("End:Load\r\n").await;

    let matched = tokio::time::timeout(Duration::from_secs(1), c.resolved())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(matched.frame.text, "End:Load");
    assert_eq!(controller.watchers().active_count(), 0);
}
