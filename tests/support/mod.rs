//! In-process fake runtime for integration tests.
//!
//! Listens on a loopback port and speaks just enough of the bus protocol to
//! drive a real session: the two-round handshake, acks and pushed messages.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use std::path::PathBuf;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use openfin_adapter::SessionOptions;

/// Token the fake runtime hands out during the handshake.
pub const TOKEN: &str = "fake-runtime-token";

/// Upper bound for any single wait in these tests.
pub const STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// Session options with a short backoff so tests run quickly.
pub fn fast_options() -> SessionOptions {
    SessionOptions {
        backoff_unit: Duration::from_millis(10),
        ..SessionOptions::default()
    }
}

/// Listening fake runtime.
pub struct FakeRuntime {
    listener: TcpListener,
    url: String,
    token_dir: TempDir,
}

impl FakeRuntime {
    /// Bind on an ephemeral loopback port.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        Self {
            listener,
            url: format!("ws://127.0.0.1:{port}/"),
            token_dir: tempfile::tempdir().unwrap(),
        }
    }

    /// Bus URL clients should connect to.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Accept the next client connection.
    pub async fn accept(&self) -> Peer {
        let (stream, _) = tokio::time::timeout(STEP_TIMEOUT, self.listener.accept())
            .await
            .expect("client never connected")
            .unwrap();
        let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        Peer {
            ws,
            token_file: self.token_dir.path().join("auth.token"),
        }
    }
}

/// One accepted client connection, seen from the runtime side.
pub struct Peer {
    ws: WebSocketStream<TcpStream>,
    token_file: PathBuf,
}

impl Peer {
    /// Next raw frame, or `None` once the connection is gone.
    pub async fn next_frame(&mut self) -> Option<Message> {
        match tokio::time::timeout(STEP_TIMEOUT, self.ws.next()).await {
            Ok(Some(Ok(message))) => Some(message),
            Ok(Some(Err(_)) | None) => None,
            Err(_) => panic!("timed out waiting for a frame from the client"),
        }
    }

    /// Next text frame decoded as JSON.
    pub async fn recv_json(&mut self) -> Value {
        loop {
            match self.next_frame().await {
                Some(Message::Text(text)) => return serde_json::from_str(&text).unwrap(),
                Some(Message::Ping(_) | Message::Pong(_)) => {}
                other => panic!("expected a text frame, got {other:?}"),
            }
        }
    }

    /// Next envelope, asserting its action name.
    pub async fn expect_action(&mut self, action: &str) -> Value {
        let envelope = self.recv_json().await;
        assert_eq!(envelope["action"], action, "unexpected envelope {envelope}");
        envelope
    }

    /// Send a JSON text frame.
    pub async fn send_json(&mut self, value: Value) {
        self.ws.send(Message::Text(value.to_string())).await.unwrap();
    }

    /// Send a raw text frame.
    pub async fn send_text(&mut self, text: &str) {
        self.ws.send(Message::Text(text.to_string())).await.unwrap();
    }

    /// Acknowledge `envelope` with `payload`.
    pub async fn ack(&mut self, envelope: &Value, payload: Value) {
        self.send_json(json!({
            "action": "ack",
            "correlationId": envelope["messageId"],
            "payload": payload,
        }))
        .await;
    }

    /// Push a bus message to the client.
    pub async fn push(&mut self, source_uuid: &str, topic: &str, message: Value) {
        self.send_json(json!({
            "action": "process-message",
            "payload": {
                "sourceUuid": source_uuid,
                "sourceWindowName": source_uuid,
                "destinationUuid": "*",
                "destinationWindowName": "*",
                "topic": topic,
                "message": message,
            }
        }))
        .await;
    }

    /// Receive the first handshake request and hand out the token.
    ///
    /// Returns the client's session uuid.
    pub async fn begin_handshake(&mut self) -> String {
        let request = self.expect_action("request-external-authorization").await;
        assert_eq!(request["payload"]["type"], "file-token");
        assert_eq!(request["payload"]["messageId"], 0);
        let uuid = request["payload"]["uuid"].as_str().unwrap().to_string();

        self.send_json(json!({
            "action": "external-authorization-response",
            "payload": {
                "file": self.token_file.to_string_lossy(),
                "token": TOKEN,
            }
        }))
        .await;
        uuid
    }

    /// Receive the second handshake request and check the token file.
    pub async fn expect_authorization_request(&mut self, uuid: &str) {
        let request = self.expect_action("request-authorization").await;
        assert_eq!(request["payload"]["uuid"], uuid);
        assert_eq!(std::fs::read_to_string(&self.token_file).unwrap(), TOKEN);
    }

    /// Run the whole handshake and grant access. Returns the client uuid.
    pub async fn authorize(&mut self) -> String {
        let uuid = self.begin_handshake().await;
        self.expect_authorization_request(&uuid).await;
        self.send_json(json!({
            "action": "authorization-response",
            "payload": {"success": true},
        }))
        .await;
        uuid
    }

    /// Run the whole handshake and refuse access.
    pub async fn deny(&mut self, reason: &str) {
        let uuid = self.begin_handshake().await;
        self.expect_authorization_request(&uuid).await;
        self.send_json(json!({
            "action": "authorization-response",
            "payload": {"success": false, "reason": reason},
        }))
        .await;
    }

    /// Read until the connection ends; returns how many close frames arrived.
    pub async fn drain_until_closed(&mut self) -> usize {
        let mut closes = 0;
        while let Some(frame) = self.next_frame().await {
            if let Message::Close(_) = frame {
                closes += 1;
            }
        }
        closes
    }
}
