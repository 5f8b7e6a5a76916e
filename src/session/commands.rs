//! Commands marshalled from [`Session`](super::Session) handles onto the
//! session loop.
//!
//! The loop owns all mutable session state (request counter, pending
//! actions, subscription list, transport writer). Handles never touch that
//! state; they send a [`SessionCommand`] and, where a result is needed,
//! wait on the oneshot receiver that comes back with it (actor pattern).

use serde_json::Value;
use tokio::sync::oneshot;

use crate::dispatch::{MessageCallback, SubscriptionId};
use crate::error::SessionResult;
use crate::key::SubscriptionKey;

/// Reply to an invoked action: the ack payload, or `None` if the transport
/// closed before the ack arrived.
pub type InvokeReply = SessionResult<Option<Value>>;

/// A request processed by the session loop.
pub(crate) enum SessionCommand {
    /// Send an action and resolve `reply` with its correlated ack.
    Invoke {
        action: String,
        payload: Value,
        reply: oneshot::Sender<InvokeReply>,
    },

    /// Append a subscription entry.
    Subscribe {
        key: SubscriptionKey,
        callback: MessageCallback,
        reply: oneshot::Sender<SubscriptionId>,
    },

    /// Remove subscription entries; replies with how many remain for `key`.
    Unsubscribe {
        key: SubscriptionKey,
        id: Option<SubscriptionId>,
        reply: oneshot::Sender<usize>,
    },

    /// Close the session (idempotent).
    Close { reply: oneshot::Sender<()> },
}

impl std::fmt::Debug for SessionCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Invoke { action, .. } => f
                .debug_struct("Invoke")
                .field("action", action)
                .finish_non_exhaustive(),
            Self::Subscribe { key, .. } => f
                .debug_struct("Subscribe")
                .field("key", key)
                .finish_non_exhaustive(),
            Self::Unsubscribe { key, id, .. } => f
                .debug_struct("Unsubscribe")
                .field("key", key)
                .field("id", id)
                .finish_non_exhaustive(),
            Self::Close { .. } => f.write_str("Close"),
        }
    }
}

impl SessionCommand {
    /// Create an invoke command and its reply receiver.
    pub(crate) fn invoke(
        action: &str,
        payload: Value,
    ) -> (Self, oneshot::Receiver<InvokeReply>) {
        let (reply, rx) = oneshot::channel();
        (
            Self::Invoke {
                action: action.to_string(),
                payload,
                reply,
            },
            rx,
        )
    }

    /// Create a subscribe command and its reply receiver.
    pub(crate) fn subscribe(
        key: SubscriptionKey,
        callback: MessageCallback,
    ) -> (Self, oneshot::Receiver<SubscriptionId>) {
        let (reply, rx) = oneshot::channel();
        (Self::Subscribe { key, callback, reply }, rx)
    }

    /// Create an unsubscribe command and its reply receiver.
    pub(crate) fn unsubscribe(
        key: SubscriptionKey,
        id: Option<SubscriptionId>,
    ) -> (Self, oneshot::Receiver<usize>) {
        let (reply, rx) = oneshot::channel();
        (Self::Unsubscribe { key, id, reply }, rx)
    }

    /// Create a close command and its reply receiver.
    pub(crate) fn close() -> (Self, oneshot::Receiver<()>) {
        let (reply, rx) = oneshot::channel();
        (Self::Close { reply }, rx)
    }
}
