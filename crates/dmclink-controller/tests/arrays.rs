mod support;

use std::time::{Duration, Instant};

use dmclink_controller::ControllerError;
use support::{galil, FakeController, Reply};

#[tokio::test]
async fn download_writes_single_payload() {
    let fake = FakeController::start(galil).await;
    let controller = fake.controller().await;

    controller
        .download_array("order", &[0.0, 1.0, 2.0])
        .await
        .unwrap();

    assert_eq!(fake.requests(), vec!["QD order[]\r0,1,2\\"]);
    // No stray prompt is left behind for the next command.
    let response = controller.send_command(r#"MG "Hello""#).await.unwrap();
    assert_eq!(response.lines, vec!["Hello"]);
}

#[tokio::test]
async fn upload_collects_until_terminator() {
    let fake = FakeController::start(galil).await;
    let controller = fake.controller().await;

    let values = controller.upload_array("order").await.unwrap();

    assert_eq!(values, vec![0.0, 1.0, 2.0]);
    assert_eq!(fake.requests(), vec!["QU order[]"]);
}

#[tokio::test]
async fn unterminated_upload_times_out() {
    let fake = FakeController::start(|request| match request {
        "QU slow[]" => Reply::now("0\r\n1\r\n"),
        _ => galil(request),
    })
    .await;
    let controller = fake.controller().await;

    let started = Instant::now();
    let err = controller
        .upload_array_with_timeout("slow", Duration::from_millis(200))
        .await
        .unwrap_err();

    assert!(err.is_timeout(), "got {err:?}");
    assert!(started.elapsed() < Duration::from_millis(800));
}

#[tokio::test]
async fn upload_of_unknown_array_is_command_error() {
    let fake = FakeController::start(galil).await;
    let controller = fake.controller().await;

    let err = controller.upload_array("missing").await.unwrap_err();

    assert!(matches!(err, ControllerError::Command { .. }), "got {err:?}");
    assert_eq!(fake.requests(), vec!["QU missing[]", "TC1"]);
}

#[tokio::test]
async fn upload_with_garbage_is_protocol_error() {
    let fake = FakeController::start(galil).await;
    let controller = fake.controller().await;

    let err = controller.upload_array("junk").await.unwrap_err();
    assert!(matches!(err, ControllerError::Protocol(_)), "got {err:?}");
}

#[tokio::test]
async fn invalid_array_name_never_reaches_the_wire() {
    let fake = FakeController::start(galil).await;
    let controller = fake.controller().await;

    assert!(matches!(
        controller.download_array("bad name", &[1.0]).await,
        Err(ControllerError::InvalidInput(_))
    ));
    assert!(matches!(
        controller.download_array("ok", &[f64::NAN]).await,
        Err(ControllerError::InvalidInput(_))
    ));
    assert!(fake.requests().is_empty());
}

#[tokio::test]
async fn list_arrays_returns_listing() {
    let fake = FakeController::start(galil).await;
    let controller = fake.controller().await;

    let arrays = controller.list_arrays().await.unwrap();
    assert_eq!(arrays, vec!["order[3]", "pos[100]"]);
}
