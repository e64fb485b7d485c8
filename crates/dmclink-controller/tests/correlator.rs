mod support;

use std::sync::Arc;
use std::time::{Duration, Instant};

use dmclink_controller::{ChannelKind, ControllerError};
use support::{galil, FakeController, Reply};

#[tokio::test]
async fn accepted_command_returns_printed_lines() {
    let fake = FakeController::start(galil).await;
    let controller = fake.controller().await;

    let response = controller.send_command(r#"MG "Hello""#).await.unwrap();

    assert_eq!(response.command, r#"MG "Hello""#);
    assert_eq!(response.lines, vec!["Hello"]);
    assert_eq!(fake.requests(), vec![r#"MG "Hello""#]);
}

#[tokio::test]
async fn rejected_command_carries_diagnostic() {
    let fake = FakeController::start(galil).await;
    let controller = fake.controller().await;

    let err = controller.send_command("BOGUS").await.unwrap_err();

    match err {
        ControllerError::Command { command, detail } => {
            assert_eq!(command, "BOGUS");
            assert_eq!(detail, "Command not recognized");
        }
        other => panic!("expected command error, got {other:?}"),
    }
    assert_eq!(fake.requests(), vec!["BOGUS", "TC1"]);
}

#[tokio::test]
async fn concurrent_sends_never_overlap_and_keep_order() {
    let fake = FakeController::start(|request| match request {
        r#"MG "A""# => Reply::after(100, "A\r\n:"),
        r#"MG "B""# => Reply::after(10, "B\r\n:"),
        r#"MG "C""# => Reply::now("C\r\n:"),
        _ => Reply::now(":"),
    })
    .await;
    let controller = Arc::new(fake.controller().await);

    let mut tasks = Vec::new();
    for label in ["A", "B", "C"] {
        let controller = controller.clone();
        tasks.push(tokio::spawn(async move {
            controller.send_command(&format!(r#"MG "{label}""#)).await
        }));
        // Give each sender time to queue before the next one.
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let mut answers = Vec::new();
    for task in tasks {
        answers.push(task.await.unwrap().unwrap().lines);
    }
    assert_eq!(answers, vec![vec!["A"], vec!["B"], vec!["C"]]);
    assert_eq!(
        fake.command_log(),
        vec![
            r#"recv:MG "A""#,
            r#"reply:MG "A""#,
            r#"recv:MG "B""#,
            r#"reply:MG "B""#,
            r#"recv:MG "C""#,
            r#"reply:MG "C""#,
        ]
    );
}

#[tokio::test]
async fn timeout_is_precise_and_leaves_no_listener() {
    let fake = FakeController::start(galil).await;
    let controller = fake.controller().await;
    let commands = controller.channel(ChannelKind::Commands);
    let baseline = commands.subscriber_count();

    let started = Instant::now();
    let err = controller
        .send_command_with_timeout("WT 100000", Duration::from_millis(100))
        .await
        .unwrap_err();
    let elapsed = started.elapsed();

    assert!(err.is_timeout(), "got {err:?}");
    assert!(elapsed >= Duration::from_millis(100), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(600), "{elapsed:?}");
    assert_eq!(commands.subscriber_count(), baseline);
}

#[tokio::test]
async fn late_prompt_is_not_credited_to_next_command() {
    let fake = FakeController::start(|request| match request {
        "SLOW" => Reply::after(300, "late\r\n:"),
        _ => galil(request),
    })
    .await;
    let controller = fake.controller().await;

    let err = controller
        .send_command_with_timeout("SLOW", Duration::from_millis(100))
        .await
        .unwrap_err();
    assert!(err.is_timeout(), "got {err:?}");

    match controller.send_command("BOGUS").await {
        Err(ControllerError::Command { command, detail }) => {
            assert_eq!(command, "BOGUS");
            assert_eq!(detail, "Command not recognized");
        }
        other => panic!("expected command error, got {other:?}"),
    }

    let response = controller.send_command(r#"MG "Hello""#).await.unwrap();
    assert_eq!(response.lines, vec!["Hello"]);
    assert_eq!(fake.requests(), vec!["SLOW", "BOGUS", "TC1", r#"MG "Hello""#]);
}

#[tokio::test]
async fn late_prompt_delivered_while_idle_is_settled() {
    let fake = FakeController::start(|request| match request {
        "SLOW" => Reply::after(200, ":"),
        _ => galil(request),
    })
    .await;
    let controller = fake.controller().await;

    let err = controller
        .send_command_with_timeout("SLOW", Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(err.is_timeout(), "got {err:?}");
    tokio::time::sleep(Duration::from_millis(400)).await;

    let response = controller.send_command(r#"MG "Hello""#).await.unwrap();
    assert_eq!(response.lines, vec!["Hello"]);
    assert!(controller.send_command("BOGUS").await.is_err());
}

#[tokio::test]
async fn disconnect_fails_pending_command() {
    let fake = FakeController::start(galil).await;
    let controller = Arc::new(fake.controller().await);

    let pending = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.send_command("WT 100000").await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    controller.disconnect().await;

    let err = tokio::time::timeout(Duration::from_secs(1), pending)
        .await
        .expect("pending command did not finish")
        .unwrap()
        .unwrap_err();
    assert!(matches!(
        err,
        ControllerError::Connection { channel: ChannelKind::Commands, .. }
    ));
}

#[tokio::test]
async fn send_commands_stops_at_first_failure() {
    let fake = FakeController::start(galil).await;
    let controller = fake.controller().await;

    let err = controller
        .send_commands(&["SH", "BOGUS", "BG"])
        .await
        .unwrap_err();

    assert!(matches!(err, ControllerError::Command { .. }));
    assert_eq!(fake.requests(), vec!["SH", "BOGUS", "TC1"]);

    let responses = controller.send_commands(&["SH", "BG"]).await.unwrap();
    assert_eq!(responses.len(), 2);
}

#[tokio::test]
async fn send_commands_applies_timeout_to_each_command() {
    let fake = FakeController::start(galil).await;
    let controller = fake.controller().await;

    let err = controller
        .send_commands_with_timeout(&["SH", "WT 100000", "BG"], Duration::from_millis(100))
        .await
        .unwrap_err();

    assert!(err.is_timeout(), "got {err:?}");
    assert_eq!(fake.requests(), vec!["SH", "WT 100000"]);
}

#[tokio::test]
async fn send_requires_connection() {
    let fake = FakeController::start(galil).await;
    let controller = dmclink_controller::Controller::new(fake.config()).unwrap();

    let err = controller.send_command("TC1").await.unwrap_err();
    assert!(matches!(err, ControllerError::Connection { .. }));
}

#[tokio::test]
async fn multi_line_command_is_rejected_before_sending() {
    let fake = FakeController::start(galil).await;
    let controller = fake.controller().await;

    let err = controller.send_command("SH\rBG").await.unwrap_err();
    assert!(matches!(err, ControllerError::InvalidInput(_)));
    assert!(fake.requests().is_empty());
}
