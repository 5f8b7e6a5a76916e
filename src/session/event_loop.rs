//! The session loop: single owner of all session state.
//!
//! # Architecture
//!
//! ```text
//!   Session handles ──SessionCommand──►┐
//!                                      │
//!   read task (WsReader)               ▼
//!     ├─ handshake replies ──► SessionLoop (tokio::select!)
//!     ├─ acks ───────────────►   ├─ handshake state machine
//!     └─ pushed messages ────►   ├─ pending actions (request id → reply)
//!                                ├─ subscription dispatch
//!                                └─ WsWriter
//! ```
//!
//! The read task is the only reader of the transport; it classifies every
//! frame into one of three queues. The loop drains those queues and the
//! command channel, so state is never shared and needs no locks.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use super::commands::{InvokeReply, SessionCommand};
use super::frame::{Ack, HandshakeReply, InboundFrame, PushedMessage};
use super::handshake::{self, HandshakeStage, HandshakeStep};
use super::ConnectionState;
use crate::constants::{CLOSE_CODE_NORMAL, CLOSE_REASON};
use crate::dispatch::Subscriptions;
use crate::error::SessionError;
use crate::ws::{self, WsMessage, WsReader, WsWriter};

/// Upper bound on the best-effort close handshake.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Longest slice of a bad frame echoed into the log.
const LOG_SNIPPET_LEN: usize = 200;

/// Senders for the three inbound queues, owned by the read task.
struct FrameQueues {
    handshake: mpsc::UnboundedSender<HandshakeReply>,
    ack: mpsc::UnboundedSender<Ack>,
    message: mpsc::UnboundedSender<PushedMessage>,
}

/// Why the read task stopped.
#[derive(Debug)]
enum ReadExit {
    /// The runtime sent a close frame.
    ClosedByPeer { code: u16, reason: String },
    /// The stream ended without a close frame.
    Ended,
    /// A read error occurred.
    Failed(String),
    /// The session loop dropped its queues.
    Abandoned,
}

/// State owned by the session loop task.
pub(crate) struct SessionLoop {
    uuid: String,
    url: String,
    state_tx: watch::Sender<ConnectionState>,
    handshake: HandshakeStage,
    handshake_timeout: Option<Duration>,
    next_request_id: u64,
    pending: BTreeMap<u64, oneshot::Sender<InvokeReply>>,
    subscriptions: Subscriptions,
    writer: Option<WsWriter>,
}

impl SessionLoop {
    pub(crate) fn new(
        uuid: String,
        url: String,
        state_tx: watch::Sender<ConnectionState>,
        handshake_timeout: Option<Duration>,
    ) -> Self {
        Self {
            uuid,
            url,
            state_tx,
            handshake: HandshakeStage::default(),
            handshake_timeout,
            next_request_id: 0,
            pending: BTreeMap::new(),
            subscriptions: Subscriptions::new(),
            writer: None,
        }
    }

    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Apply a state transition; `CLOSED` is terminal.
    fn set_state(&self, next: ConnectionState) {
        self.state_tx.send_if_modified(|state| {
            if *state == ConnectionState::Closed || *state == next {
                return false;
            }
            log::debug!("[Session] {} -> {}", state, next);
            *state = next;
            true
        });
    }

    /// Connect, run the handshake and serve until the session closes.
    pub(crate) async fn run(mut self, mut command_rx: mpsc::UnboundedReceiver<SessionCommand>) {
        // Armed before the upgrade so a stalled upgrade counts against it.
        let handshake_deadline = deadline(self.handshake_timeout);
        tokio::pin!(handshake_deadline);

        let Some((writer, reader)) = self
            .connect(&mut command_rx, handshake_deadline.as_mut())
            .await
        else {
            self.set_state(ConnectionState::Closed);
            reject_remaining(&mut command_rx);
            return;
        };
        log::info!("[Session] Connected to {}", self.url);
        self.writer = Some(writer);

        let (handshake_tx, mut handshake_rx) = mpsc::unbounded_channel();
        let (ack_tx, mut ack_rx) = mpsc::unbounded_channel();
        let (message_tx, mut message_rx) = mpsc::unbounded_channel();
        let queues = FrameQueues {
            handshake: handshake_tx,
            ack: ack_tx,
            message: message_tx,
        };
        let mut read_task: JoinHandle<ReadExit> = tokio::spawn(read_loop(reader, queues));

        let request = handshake::external_authorization_request(&self.uuid);
        if let Err(e) = self.write(&request).await {
            log::error!("[Handshake] Could not send external authorization request: {e:#}");
            self.shutdown().await;
        }

        while self.state() != ConnectionState::Closed {
            tokio::select! {
                command = command_rx.recv() => match command {
                    Some(command) => self.on_command(command).await,
                    None => {
                        log::debug!("[Session] All handles dropped, closing");
                        self.shutdown().await;
                    }
                },

                Some(reply) = handshake_rx.recv() => self.on_handshake_reply(&reply).await,

                Some(ack) = ack_rx.recv() => self.on_ack(ack),

                Some(message) = message_rx.recv() => {
                    self.subscriptions.dispatch(&self.uuid, &message);
                }

                exit = &mut read_task => {
                    // Frames already queued still count.
                    while let Ok(ack) = ack_rx.try_recv() {
                        self.on_ack(ack);
                    }
                    while let Ok(message) = message_rx.try_recv() {
                        self.subscriptions.dispatch(&self.uuid, &message);
                    }
                    match exit {
                        Ok(ReadExit::ClosedByPeer { code, reason }) => {
                            log::info!("[Session] Runtime closed the connection ({code} {reason})");
                        }
                        Ok(ReadExit::Ended) => log::info!("[Session] Connection stream ended"),
                        Ok(ReadExit::Failed(e)) => {
                            log::error!("[Session] Error reading from runtime, closing: {e}");
                        }
                        Ok(ReadExit::Abandoned) => {}
                        Err(e) => log::error!("[Session] Read task failed: {e}"),
                    }
                    self.shutdown().await;
                }

                () = &mut handshake_deadline, if self.state() == ConnectionState::Init => {
                    log::error!("[Handshake] No authorization from runtime in time, closing");
                    self.shutdown().await;
                }
            }
        }

        read_task.abort();
        reject_remaining(&mut command_rx);
        log::debug!("[Session] Loop for {} finished", self.uuid);
    }

    /// Open the transport while still serving commands.
    ///
    /// Returns `None` when the upgrade fails, the session is closed, or the
    /// handshake deadline passes first.
    async fn connect(
        &mut self,
        command_rx: &mut mpsc::UnboundedReceiver<SessionCommand>,
        mut handshake_deadline: Pin<&mut impl Future<Output = ()>>,
    ) -> Option<(WsWriter, WsReader)> {
        let url = self.url.clone();
        let connecting = ws::connect(&url);
        tokio::pin!(connecting);

        loop {
            tokio::select! {
                result = &mut connecting => {
                    return match result {
                        Ok(pair) => Some(pair),
                        Err(e) => {
                            log::error!("[Session] Could not connect to runtime bus: {e:#}");
                            None
                        }
                    };
                }

                command = command_rx.recv() => match command {
                    Some(command) => {
                        self.on_command(command).await;
                        if self.state() == ConnectionState::Closed {
                            log::info!("[Session] Closed while connecting to {}", url);
                            return None;
                        }
                    }
                    None => {
                        log::debug!("[Session] All handles dropped while connecting");
                        return None;
                    }
                },

                () = &mut handshake_deadline => {
                    log::error!("[Handshake] Runtime bus did not accept the connection in time, closing");
                    return None;
                }
            }
        }
    }

    async fn on_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Invoke {
                action,
                payload,
                reply,
            } => self.send_action(action, payload, reply).await,
            SessionCommand::Subscribe {
                key,
                callback,
                reply,
            } => {
                let id = self.subscriptions.add(key, callback);
                let _ = reply.send(id);
            }
            SessionCommand::Unsubscribe { key, id, reply } => {
                let remaining = self.subscriptions.remove(&key, id);
                let _ = reply.send(remaining);
            }
            SessionCommand::Close { reply } => {
                self.shutdown().await;
                let _ = reply.send(());
            }
        }
    }

    /// Assign the next request id, write the envelope and park the reply.
    async fn send_action(
        &mut self,
        action: String,
        payload: Value,
        reply: oneshot::Sender<InvokeReply>,
    ) {
        if self.state() != ConnectionState::Open {
            let _ = reply.send(Err(SessionError::NotOpen { attempts: 0 }));
            return;
        }

        let request_id = self.next_request_id;
        self.next_request_id += 1;

        let envelope = json!({
            "action": action,
            "payload": payload,
            "messageId": request_id,
        });

        match self.write(&envelope).await {
            Ok(()) => {
                log::trace!("[Session] Sent '{}' (messageId={})", action, request_id);
                self.pending.insert(request_id, reply);
            }
            Err(e) => {
                log::error!("[Session] Failed to send '{}': {e:#}", action);
                let _ = reply.send(Err(SessionError::Transport(format!("{e:#}"))));
                self.shutdown().await;
            }
        }
    }

    fn on_ack(&mut self, ack: Ack) {
        let waiter = ack
            .correlation_id
            .and_then(|id| self.pending.remove(&id));

        match waiter {
            Some(reply) => {
                let _ = reply.send(Ok(Some(ack.payload)));
            }
            None => {
                log::warn!(
                    "[Session] Ack correlation id {:?} matches no pending request (awaiting {:?}), dropping",
                    ack.correlation_id,
                    self.pending.keys().collect::<Vec<_>>()
                );
            }
        }
    }

    async fn on_handshake_reply(&mut self, reply: &HandshakeReply) {
        match self.handshake.on_reply(reply) {
            HandshakeStep::Authorize(token) => {
                if let Err(e) = token.write().await {
                    log::error!("[Handshake] Connection failed: {e:#}");
                    self.shutdown().await;
                    return;
                }
                let request = handshake::authorization_request(&self.url, &self.uuid);
                if let Err(e) = self.write(&request).await {
                    log::error!("[Handshake] Could not send authorization request: {e:#}");
                    self.shutdown().await;
                }
            }
            HandshakeStep::Open => {
                log::info!("[Handshake] Authorized as {}", self.uuid);
                self.set_state(ConnectionState::Open);
            }
            HandshakeStep::Fail(reason) => {
                log::error!("[Handshake] Connection failed: {reason}");
                self.shutdown().await;
            }
            HandshakeStep::Ignore => {
                log::debug!("[Handshake] Ignoring late {:?} reply", reply.action);
            }
        }
    }

    async fn write(&mut self, value: &Value) -> anyhow::Result<()> {
        match self.writer.as_mut() {
            Some(writer) => writer.send_json(value).await,
            None => anyhow::bail!("transport already released"),
        }
    }

    /// Transition to `CLOSED` and release the transport (idempotent).
    ///
    /// Pending actions resolve with no result.
    async fn shutdown(&mut self) {
        if self.state() == ConnectionState::Closed {
            return;
        }
        self.set_state(ConnectionState::Closed);
        self.handshake = HandshakeStage::Done;

        if let Some(mut writer) = self.writer.take() {
            match tokio::time::timeout(CLOSE_TIMEOUT, writer.close(CLOSE_CODE_NORMAL, CLOSE_REASON))
                .await
            {
                Ok(Ok(())) => log::debug!("[Session] Close frame sent"),
                // The transport may already be gone.
                Ok(Err(e)) => log::debug!("[Session] Close failed (ignored): {e:#}"),
                Err(_) => log::debug!("[Session] Close timed out (ignored)"),
            }
        }

        for (_, reply) in std::mem::take(&mut self.pending) {
            let _ = reply.send(Ok(None));
        }
        self.subscriptions.clear();
    }
}

/// Resolve commands that arrive after the session closed.
fn reject_remaining(command_rx: &mut mpsc::UnboundedReceiver<SessionCommand>) {
    command_rx.close();
    while let Ok(command) = command_rx.try_recv() {
        match command {
            SessionCommand::Invoke { reply, .. } => {
                let _ = reply.send(Err(SessionError::Closed));
            }
            SessionCommand::Close { reply } => {
                let _ = reply.send(());
            }
            // Dropping the reply sender reports the session as closed.
            SessionCommand::Subscribe { .. } | SessionCommand::Unsubscribe { .. } => {}
        }
    }
}

/// Sleep for `timeout`, or forever when unset.
async fn deadline(timeout: Option<Duration>) {
    match timeout {
        Some(duration) => tokio::time::sleep(duration).await,
        None => std::future::pending().await,
    }
}

/// Read frames off the transport and sort them into the three queues.
///
/// This is the only reader of the WebSocket. Malformed frames are logged and
/// skipped; they never end the session.
async fn read_loop(mut reader: WsReader, queues: FrameQueues) -> ReadExit {
    loop {
        let text = match reader.recv().await {
            Some(Ok(WsMessage::Text(text))) => text,
            Some(Ok(WsMessage::Binary(data))) => match String::from_utf8(data) {
                Ok(text) => text,
                Err(e) => {
                    log::error!("[Session] Dropping non UTF-8 binary frame: {e}");
                    continue;
                }
            },
            Some(Ok(WsMessage::Close { code, reason })) => {
                return ReadExit::ClosedByPeer { code, reason };
            }
            Some(Err(e)) => return ReadExit::Failed(format!("{e:#}")),
            None => return ReadExit::Ended,
        };

        if !route_frame(&text, &queues) {
            return ReadExit::Abandoned;
        }
    }
}

/// Classify one text frame into its queue.
///
/// Returns `false` once the session loop has gone away.
fn route_frame(text: &str, queues: &FrameQueues) -> bool {
    let frame = match InboundFrame::parse(text) {
        Ok(frame) => frame,
        Err(e) => {
            log::error!(
                "[Session] Could not parse frame ({e}): {}",
                snippet(text)
            );
            return true;
        }
    };

    match frame {
        InboundFrame::Handshake(reply) => queues.handshake.send(reply).is_ok(),
        InboundFrame::Ack(ack) => queues.ack.send(ack).is_ok(),
        InboundFrame::Message(message) => queues.message.send(message).is_ok(),
        InboundFrame::SubscriberNotice { added, payload } => {
            log::debug!(
                "[Session] subscriber-{}: {}",
                if added { "added" } else { "removed" },
                payload
            );
            true
        }
        InboundFrame::Unrecognized { action } => {
            log::warn!(
                "[Session] Unknown message type '{}', dropping message: {}",
                action,
                snippet(text)
            );
            true
        }
    }
}

fn snippet(text: &str) -> &str {
    match text.char_indices().nth(LOG_SNIPPET_LEN) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queues() -> (
        FrameQueues,
        mpsc::UnboundedReceiver<HandshakeReply>,
        mpsc::UnboundedReceiver<Ack>,
        mpsc::UnboundedReceiver<PushedMessage>,
    ) {
        let (handshake, handshake_rx) = mpsc::unbounded_channel();
        let (ack, ack_rx) = mpsc::unbounded_channel();
        let (message, message_rx) = mpsc::unbounded_channel();
        (
            FrameQueues {
                handshake,
                ack,
                message,
            },
            handshake_rx,
            ack_rx,
            message_rx,
        )
    }

    #[test]
    fn test_route_frame_sorts_each_class_into_its_queue() {
        let (queues, mut handshake_rx, mut ack_rx, mut message_rx) = queues();

        assert!(route_frame(
            r#"{"action":"authorization-response","payload":{"success":true}}"#,
            &queues
        ));
        assert!(route_frame(r#"{"action":"ack","correlationId":3,"payload":{}}"#, &queues));
        assert!(route_frame(
            r#"{"action":"process-message","payload":{"topic":"t","message":1}}"#,
            &queues
        ));

        assert!(handshake_rx.try_recv().is_ok());
        assert_eq!(ack_rx.try_recv().unwrap().correlation_id, Some(3));
        assert_eq!(message_rx.try_recv().unwrap().topic, "t");
    }

    #[test]
    fn test_route_frame_drops_malformed_and_unknown() {
        let (queues, mut handshake_rx, mut ack_rx, mut message_rx) = queues();

        assert!(route_frame("{not json", &queues));
        assert!(route_frame(r#"{"action":"mystery"}"#, &queues));
        assert!(route_frame(r#"{"action":"subscriber-added","payload":{}}"#, &queues));

        assert!(handshake_rx.try_recv().is_err());
        assert!(ack_rx.try_recv().is_err());
        assert!(message_rx.try_recv().is_err());
    }

    #[test]
    fn test_route_frame_reports_abandoned_queue() {
        let (queues, handshake_rx, ack_rx, message_rx) = queues();
        drop((handshake_rx, ack_rx, message_rx));
        assert!(!route_frame(r#"{"action":"ack","correlationId":0}"#, &queues));
    }

    #[test]
    fn test_set_state_is_monotonic() {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Init);
        let session = SessionLoop::new("u".into(), "ws://x/".into(), state_tx, None);

        session.set_state(ConnectionState::Open);
        assert_eq!(*state_rx.borrow(), ConnectionState::Open);
        session.set_state(ConnectionState::Closed);
        session.set_state(ConnectionState::Open);
        assert_eq!(*state_rx.borrow(), ConnectionState::Closed);
    }

    #[test]
    fn test_on_ack_resolves_only_matching_request() {
        let (state_tx, _state_rx) = watch::channel(ConnectionState::Open);
        let mut session = SessionLoop::new("u".into(), "ws://x/".into(), state_tx, None);
        let (reply, mut rx) = oneshot::channel();
        session.pending.insert(4, reply);

        session.on_ack(Ack {
            correlation_id: Some(9),
            payload: json!("foreign"),
        });
        assert!(rx.try_recv().is_err());
        assert_eq!(session.pending.len(), 1);

        session.on_ack(Ack {
            correlation_id: Some(4),
            payload: json!("mine"),
        });
        assert_eq!(rx.try_recv().unwrap(), Ok(Some(json!("mine"))));
        assert!(session.pending.is_empty());
    }

    #[test]
    fn test_reject_remaining_rejects_invokes() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (command, mut reply_rx) = SessionCommand::invoke("get-version", json!({}));
        tx.send(command).unwrap();

        reject_remaining(&mut rx);
        assert_eq!(reply_rx.try_recv().unwrap(), Err(SessionError::Closed));
    }

    #[test]
    fn test_snippet_truncates_long_text() {
        let long = "x".repeat(500);
        assert_eq!(snippet(&long).len(), LOG_SNIPPET_LEN);
        assert_eq!(snippet("short"), "short");
    }
}
