//! Error types surfaced by the session action API.

use thiserror::Error;

/// Why an action could not be delivered to the runtime.
///
/// Protocol-internal problems (mismatched acknowledgements, malformed or
/// unknown frames) never show up here: they are logged and dropped inside
/// the session loop.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The session is closed; nothing is sent.
    #[error("session is closed")]
    Closed,

    /// The caller stopped waiting for the handshake to finish.
    #[error("gave up waiting for the handshake after {attempts} attempts")]
    NotOpen {
        /// Backoff attempts made before giving up.
        attempts: u32,
    },

    /// Writing the request to the transport failed; the session is now closed.
    #[error("transport write failed: {0}")]
    Transport(String),
}

/// Result alias for session actions.
pub type SessionResult<T> = Result<T, SessionError>;
