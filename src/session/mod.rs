//! Transport session with the runtime message bus.
//!
//! A [`Session`] owns one WebSocket connection for its whole life:
//!
//! ```text
//!   INIT ──handshake ok──► OPEN ──close / transport lost──► CLOSED
//!     └──────connect failed / handshake denied────────────────┘
//! ```
//!
//! [`Session::spawn`] starts the session loop (see [`event_loop`]) and
//! returns immediately in `INIT`. Every higher-level operation goes through
//! [`Session::invoke`], which waits for `OPEN` with exponential backoff,
//! sends `{action, payload, messageId}` and resolves with the correlated
//! acknowledgement.
//!
//! `Session` is a cheap, cloneable handle. All state lives in the loop task
//! and is reached through a command channel, so handles may be used from any
//! task.

pub mod commands;
mod event_loop;
pub mod frame;
mod handshake;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, watch};

use crate::constants::{BACKOFF_QUIET_ATTEMPTS, DEFAULT_BACKOFF_UNIT};
use crate::dispatch::{MessageCallback, SubscriptionId};
use crate::error::{SessionError, SessionResult};
use crate::key::SubscriptionKey;
use commands::{InvokeReply, SessionCommand};
use event_loop::SessionLoop;

/// Connection lifecycle state. Transitions never go backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Connecting or handshaking.
    Init,
    /// Authorized; actions are accepted.
    Open,
    /// Terminal. Nothing more is sent or received.
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Init => "INIT",
            Self::Open => "OPEN",
            Self::Closed => "CLOSED",
        })
    }
}

/// Tunables for a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// First backoff wait while the handshake is pending; doubles per attempt.
    pub backoff_unit: Duration,
    /// Give up waiting for `OPEN` after this many attempts (`None` = never).
    pub max_wait_attempts: Option<u32>,
    /// Close the session if still in `INIT` after this long (`None` = never).
    pub handshake_timeout: Option<Duration>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            backoff_unit: DEFAULT_BACKOFF_UNIT,
            max_wait_attempts: None,
            handshake_timeout: None,
        }
    }
}

/// Handle to a running session.
#[derive(Debug, Clone)]
pub struct Session {
    uuid: Arc<str>,
    url: Arc<str>,
    options: SessionOptions,
    command_tx: mpsc::UnboundedSender<SessionCommand>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl Session {
    /// Start a session against `url` and begin the handshake.
    ///
    /// Must be called from within a tokio runtime. Connection failures are
    /// not returned here: the session simply moves to `CLOSED`.
    #[must_use]
    pub fn spawn(url: &str, options: SessionOptions) -> Self {
        let uuid = uuid::Uuid::new_v4().to_string();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Init);

        let session_loop = SessionLoop::new(
            uuid.clone(),
            url.to_string(),
            state_tx,
            options.handshake_timeout,
        );
        tokio::spawn(session_loop.run(command_rx));

        log::debug!("[Session] Spawned session {} for {}", uuid, url);

        Self {
            uuid: uuid.into(),
            url: url.into(),
            options,
            command_tx,
            state_rx,
        }
    }

    /// This session's identifier (sent as `uuid` / `sourceWindowName`).
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// The bus URL this session connects to.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Current connection state.
    pub fn status(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Wait until the session leaves `INIT`.
    ///
    /// Polls with exponential backoff (1, 2, 4, ... units), waking early on
    /// any state change. Needed because the runtime silently drops some
    /// requests (notably `subscribe`) sent before the handshake completes.
    ///
    /// # Errors
    ///
    /// [`SessionError::Closed`] if the session closes first,
    /// [`SessionError::NotOpen`] if `max_wait_attempts` runs out.
    pub async fn wait_until_open(&self) -> SessionResult<()> {
        let mut state_rx = self.state_rx.clone();
        let mut delay = self.options.backoff_unit;
        let mut attempts: u32 = 0;

        loop {
            let state = *state_rx.borrow_and_update();
            match state {
                ConnectionState::Open => return Ok(()),
                ConnectionState::Closed => return Err(SessionError::Closed),
                ConnectionState::Init => {}
            }

            if self
                .options
                .max_wait_attempts
                .is_some_and(|max| attempts >= max)
            {
                return Err(SessionError::NotOpen { attempts });
            }
            attempts += 1;
            if attempts > BACKOFF_QUIET_ATTEMPTS {
                log::debug!("[Session] Waiting for connection... (attempt {})", attempts);
            }

            if let Ok(Err(_)) = tokio::time::timeout(delay, state_rx.changed()).await {
                // Loop task is gone; whatever it left behind is final.
                return match *state_rx.borrow() {
                    ConnectionState::Open => Ok(()),
                    _ => Err(SessionError::Closed),
                };
            }
            delay = delay.saturating_mul(2);
        }
    }

    /// Send `action` with `payload` and wait for its acknowledgement.
    ///
    /// Resolves with the ack payload, or `Ok(None)` if the transport closed
    /// while waiting.
    ///
    /// # Errors
    ///
    /// [`SessionError::Closed`] when the session is already closed (nothing
    /// is sent), [`SessionError::NotOpen`] when the caller gave up waiting
    /// for the handshake, [`SessionError::Transport`] when the write failed.
    pub async fn invoke(&self, action: &str, payload: Value) -> InvokeReply {
        if self.status() == ConnectionState::Closed {
            log::error!("[Session] Session is closed, cannot send request: {}", action);
            return Err(SessionError::Closed);
        }
        self.wait_until_open().await?;

        let (command, reply_rx) = SessionCommand::invoke(action, payload);
        self.command_tx
            .send(command)
            .map_err(|_| SessionError::Closed)?;

        // A dropped reply means the loop ended mid-wait.
        reply_rx.await.unwrap_or(Ok(None))
    }

    /// Fire-and-forget variant of [`Self::invoke`]; `callback` runs with the
    /// result on a spawned task.
    pub fn invoke_with<F>(&self, action: &str, payload: Value, callback: F)
    where
        F: FnOnce(InvokeReply) + Send + 'static,
    {
        let session = self.clone();
        let action = action.to_string();
        tokio::spawn(async move {
            let reply = session.invoke(&action, payload).await;
            callback(reply);
        });
    }

    /// Register `callback` for messages matching `key`.
    ///
    /// Local only: the caller still has to tell the runtime (see
    /// [`crate::client::Client::subscribe`]).
    ///
    /// # Errors
    ///
    /// [`SessionError::Closed`] if the session loop has ended.
    pub async fn add_subscription(
        &self,
        key: SubscriptionKey,
        callback: MessageCallback,
    ) -> SessionResult<SubscriptionId> {
        let (command, reply_rx) = SessionCommand::subscribe(key, callback);
        self.command_tx
            .send(command)
            .map_err(|_| SessionError::Closed)?;
        reply_rx.await.map_err(|_| SessionError::Closed)
    }

    /// Remove callbacks for `key` (just `id`, or all when `None`).
    ///
    /// Returns how many callbacks remain registered for `key`.
    ///
    /// # Errors
    ///
    /// [`SessionError::Closed`] if the session loop has ended.
    pub async fn remove_subscriptions(
        &self,
        key: SubscriptionKey,
        id: Option<SubscriptionId>,
    ) -> SessionResult<usize> {
        let (command, reply_rx) = SessionCommand::unsubscribe(key, id);
        self.command_tx
            .send(command)
            .map_err(|_| SessionError::Closed)?;
        reply_rx.await.map_err(|_| SessionError::Closed)
    }

    /// Close the session. Safe to call repeatedly and from any task.
    pub async fn close(&self) {
        let (command, reply_rx) = SessionCommand::close();
        if self.command_tx.send(command).is_ok() {
            let _ = reply_rx.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Init.to_string(), "INIT");
        assert_eq!(ConnectionState::Open.to_string(), "OPEN");
        assert_eq!(ConnectionState::Closed.to_string(), "CLOSED");
    }

    #[test]
    fn test_default_options_wait_forever() {
        let options = SessionOptions::default();
        assert_eq!(options.backoff_unit, Duration::from_secs(1));
        assert_eq!(options.max_wait_attempts, None);
        assert_eq!(options.handshake_timeout, None);
    }

    #[tokio::test]
    async fn test_unreachable_runtime_closes_session() {
        let session = Session::spawn("ws://127.0.0.1:1/", SessionOptions::default());
        assert_eq!(session.wait_until_open().await, Err(SessionError::Closed));
        assert_eq!(session.status(), ConnectionState::Closed);
        assert_eq!(
            session.invoke("get-version", Value::Null).await,
            Err(SessionError::Closed)
        );
    }

    #[tokio::test]
    async fn test_close_is_idempotent_without_connection() {
        let session = Session::spawn("ws://127.0.0.1:1/", SessionOptions::default());
        session.close().await;
        session.close().await;
        assert_eq!(session.status(), ConnectionState::Closed);
    }
}
