//! Scripted stand-in for a controller, listening on two loopback ports.
//!
//! The command port hands every request to a responder closure and writes
//! back whatever it returns. The message port answers any request with `:`
//! and lets the test push unsolicited lines.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use dmclink_controller::{Controller, ControllerConfig};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

/// What the fake sends back for one request.
#[derive(Debug, Clone)]
pub struct Reply {
    pub delay: Duration,
    pub text: String,
}

impl Reply {
    pub fn now(text: impl Into<String>) -> Option<Self> {
        Some(Self {
            delay: Duration::ZERO,
            text: text.into(),
        })
    }

    pub fn after(millis: u64, text: impl Into<String>) -> Option<Self> {
        Some(Self {
            delay: Duration::from_millis(millis),
            text: text.into(),
        })
    }
}

type Responder = Arc<dyn Fn(&str) -> Option<Reply> + Send + Sync>;
type Log = Arc<Mutex<Vec<String>>>;

/// Behaves like a controller for the commands the tests use.
pub fn galil(request: &str) -> Option<Reply> {
    match request {
        "TC1" => Reply::now("Command not recognized\r\n:"),
        "BOGUS" => Reply::now("?"),
        r#"MG "Hello""# => Reply::now("Hello\r\n:"),
        "QU order[]" => Reply::now("0\r\n1\r\n2\r\n\x1a:"),
        "QU junk[]" => Reply::now("0\r\nnope\r\n\x1a:"),
        "QU missing[]" => Reply::now("?"),
        "LA" => Reply::now("order[3]\r\npos[100]\r\n:"),
        "WT 100000" => None,
        cmd if cmd.starts_with("XQ#") => Reply::now(":"),
        _ => Reply::now(":"),
    }
}

pub struct FakeController {
    pub command_port: u16,
    pub message_port: u16,
    command_log: Log,
    message_log: Log,
    message_writer: Arc<tokio::sync::Mutex<Option<OwnedWriteHalf>>>,
}

impl FakeController {
    pub async fn start<F>(responder: F) -> Self
    where
        F: Fn(&str) -> Option<Reply> + Send + Sync + 'static,
    {
        let responder: Responder = Arc::new(responder);
        let command_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let message_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let command_port = command_listener.local_addr().unwrap().port();
        let message_port = message_listener.local_addr().unwrap().port();

        let command_log: Log = Arc::default();
        let message_log: Log = Arc::default();
        let message_writer = Arc::new(tokio::sync::Mutex::new(None));

        let log = command_log.clone();
        tokio::spawn(async move {
            while let Ok((socket, _)) = command_listener.accept().await {
                tokio::spawn(serve_commands(socket, responder.clone(), log.clone()));
            }
        });

        let log = message_log.clone();
        let writer = message_writer.clone();
        tokio::spawn(async move {
            while let Ok((socket, _)) = message_listener.accept().await {
                let (read, write) = socket.into_split();
                *writer.lock().await = Some(write);
                tokio::spawn(serve_messages(read, writer.clone(), log.clone()));
            }
        });

        Self {
            command_port,
            message_port,
            command_log,
            message_log,
            message_writer,
        }
    }

    pub fn config(&self) -> ControllerConfig {
        ControllerConfig {
            message_port: Some(self.message_port),
            default_timeout_ms: 2_000,
            connect_timeout_ms: 1_000,
            backoff_base_ms: 20,
            backoff_cap_ms: 100,
            ..ControllerConfig::new("127.0.0.1", self.command_port)
        }
    }

    /// A connected controller for this fake.
    pub async fn controller(&self) -> Controller {
        let controller = Controller::new(self.config()).unwrap();
        controller.connect().await.unwrap();
        controller
    }

    /// `recv:<request>` and `reply:<request>` in the order they happened.
    pub fn command_log(&self) -> Vec<String> {
        self.command_log.lock().unwrap().clone()
    }

    /// Requests seen on the command port.
    pub fn requests(&self) -> Vec<String> {
        self.command_log()
            .into_iter()
            .filter_map(|entry| entry.strip_prefix("recv:").map(str::to_string))
            .collect()
    }

    /// Requests seen on the message port.
    pub fn message_requests(&self) -> Vec<String> {
        self.message_log.lock().unwrap().clone()
    }

    /// Write raw text to the current message connection.
    pub async fn emit(&self, text: &str) {
        let mut guard = self.message_writer.lock().await;
        let writer = guard.as_mut().expect("no message connection");
        writer.write_all(text.as_bytes()).await.unwrap();
    }

    /// Drop the message connection from the controller side.
    pub async fn drop_messages(&self) {
        if let Some(mut writer) = self.message_writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
    }
}

async fn serve_commands(socket: TcpStream, responder: Responder, log: Log) {
    let (mut read, mut write) = socket.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    // Requests are logged on arrival and replies just before they are
    // written, so overlapping exchanges show up as two `recv:` in a row.
    let arrivals = log.clone();
    tokio::spawn(async move {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            match read.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
            }
            while let Some(request) = next_request(&mut buf) {
                arrivals.lock().unwrap().push(format!("recv:{request}"));
                if tx.send(request).is_err() {
                    return;
                }
            }
        }
    });

    while let Some(request) = rx.recv().await {
        let Some(reply) = responder(&request) else {
            continue;
        };
        tokio::time::sleep(reply.delay).await;
        log.lock().unwrap().push(format!("reply:{request}"));
        if write.write_all(reply.text.as_bytes()).await.is_err() {
            break;
        }
    }
}

async fn serve_messages(
    mut read: tokio::net::tcp::OwnedReadHalf,
    writer: Arc<tokio::sync::Mutex<Option<OwnedWriteHalf>>>,
    log: Log,
) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        match read.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
        while let Some(request) = next_request(&mut buf) {
            log.lock().unwrap().push(request);
            if let Some(write) = writer.lock().await.as_mut() {
                let _ = write.write_all(b":").await;
            }
        }
    }
}

/// Split one request off the buffer. Downloads run to their `\`, since
/// their payload contains a carriage return.
fn next_request(buf: &mut Vec<u8>) -> Option<String> {
    while matches!(buf.first(), Some(b'\r' | b'\n')) {
        buf.remove(0);
    }
    let end = if buf.starts_with(b"QD ") {
        buf.iter().position(|b| *b == b'\\')? + 1
    } else {
        buf.iter().position(|b| *b == b'\r')?
    };
    let request: Vec<u8> = buf.drain(..end).collect();
    Some(String::from_utf8_lossy(&request).into_owned())
}

/// Poll `check` until it holds or `within` elapses.
pub async fn eventually(within: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
