//! Connection handshake with the runtime.
//!
//! Two rounds, both answered on the handshake queue:
//!
//! ```text
//! client                                       runtime
//!   │ request-external-authorization {uuid}       │
//!   │ ───────────────────────────────────────────►│
//!   │ external-authorization-response {file,token}│
//!   │ ◄───────────────────────────────────────────│
//!   │ (write token to file: proves local access)  │
//!   │ request-authorization {address, uuid}       │
//!   │ ───────────────────────────────────────────►│
//!   │ authorization-response {success, reason?}   │
//!   │ ◄───────────────────────────────────────────│
//! ```
//!
//! [`HandshakeStage`] is the pure state machine; the session loop performs
//! the I/O each [`HandshakeStep`] asks for.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde_json::{json, Value};

use super::frame::{HandshakeAction, HandshakeReply};
use crate::constants::AUTH_TYPE_FILE_TOKEN;

/// Build the first handshake request.
pub(crate) fn external_authorization_request(uuid: &str) -> Value {
    json!({
        "action": "request-external-authorization",
        "payload": {
            "uuid": uuid,
            "type": AUTH_TYPE_FILE_TOKEN,
            "messageId": 0,
        }
    })
}

/// Build the second handshake request.
pub(crate) fn authorization_request(url: &str, uuid: &str) -> Value {
    json!({
        "action": "request-authorization",
        "payload": {
            "address": url,
            "uuid": uuid,
            "type": AUTH_TYPE_FILE_TOKEN,
        }
    })
}

/// Token the runtime wants written to a file it can read back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FileToken {
    pub(crate) file: PathBuf,
    pub(crate) token: String,
}

impl FileToken {
    fn from_payload(payload: &Value) -> Option<Self> {
        let file = payload.get("file")?.as_str()?;
        let token = payload.get("token")?.as_str()?;
        Some(Self {
            file: PathBuf::from(file),
            token: token.to_string(),
        })
    }

    /// Write the token verbatim to its file.
    pub(crate) async fn write(&self) -> Result<()> {
        tokio::fs::write(&self.file, self.token.as_bytes())
            .await
            .with_context(|| format!("write auth token to {}", self.file.display()))
    }
}

/// What the session loop must do after a handshake reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum HandshakeStep {
    /// Write the token, then send `request-authorization`.
    Authorize(FileToken),
    /// Authorization granted: transition to `OPEN`.
    Open,
    /// Handshake failed: transition to `CLOSED` with this reason.
    Fail(String),
    /// Reply arrived after the handshake finished; drop it.
    Ignore,
}

/// Handshake progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum HandshakeStage {
    /// First request sent, waiting for the file/token reply.
    #[default]
    AwaitingToken,
    /// Token written and second request sent, waiting for the verdict.
    AwaitingVerdict,
    /// Finished (either way).
    Done,
}

impl HandshakeStage {
    /// Advance on a handshake-class reply.
    pub(crate) fn on_reply(&mut self, reply: &HandshakeReply) -> HandshakeStep {
        match *self {
            Self::AwaitingToken => match FileToken::from_payload(&reply.payload) {
                Some(token) => {
                    *self = Self::AwaitingVerdict;
                    HandshakeStep::Authorize(token)
                }
                None => {
                    *self = Self::Done;
                    HandshakeStep::Fail(format!(
                        "external authorization reply carried no file/token: {}",
                        reply.payload
                    ))
                }
            },
            Self::AwaitingVerdict => {
                *self = Self::Done;
                let granted = reply.action == HandshakeAction::Authorization
                    && reply.payload.get("success").and_then(Value::as_bool) == Some(true);
                if granted {
                    HandshakeStep::Open
                } else {
                    let reason = reply
                        .payload
                        .get("reason")
                        .and_then(Value::as_str)
                        .unwrap_or("no reason given");
                    HandshakeStep::Fail(reason.to_string())
                }
            }
            Self::Done => HandshakeStep::Ignore,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(action: HandshakeAction, payload: Value) -> HandshakeReply {
        HandshakeReply { action, payload }
    }

    #[test]
    fn test_request_shapes() {
        let first = external_authorization_request("abc");
        assert_eq!(first["action"], "request-external-authorization");
        assert_eq!(first["payload"]["uuid"], "abc");
        assert_eq!(first["payload"]["type"], "file-token");
        assert_eq!(first["payload"]["messageId"], 0);

        let second = authorization_request("ws://localhost:9696/", "abc");
        assert_eq!(second["action"], "request-authorization");
        assert_eq!(second["payload"]["address"], "ws://localhost:9696/");
        assert_eq!(second["payload"]["uuid"], "abc");
    }

    #[test]
    fn test_successful_handshake() {
        let mut stage = HandshakeStage::default();
        let step = stage.on_reply(&reply(
            HandshakeAction::ExternalAuthorization,
            json!({"file": "/tmp/token", "token": "secret"}),
        ));
        assert_eq!(
            step,
            HandshakeStep::Authorize(FileToken {
                file: PathBuf::from("/tmp/token"),
                token: "secret".to_string(),
            })
        );
        assert_eq!(stage, HandshakeStage::AwaitingVerdict);

        let step = stage.on_reply(&reply(HandshakeAction::Authorization, json!({"success": true})));
        assert_eq!(step, HandshakeStep::Open);
        assert_eq!(stage, HandshakeStage::Done);
    }

    #[test]
    fn test_denied_authorization_reports_reason() {
        let mut stage = HandshakeStage::AwaitingVerdict;
        let step = stage.on_reply(&reply(
            HandshakeAction::Authorization,
            json!({"success": false, "reason": "bad token"}),
        ));
        assert_eq!(step, HandshakeStep::Fail("bad token".to_string()));
    }

    #[test]
    fn test_wrong_second_reply_fails() {
        let mut stage = HandshakeStage::AwaitingVerdict;
        let step = stage.on_reply(&reply(
            HandshakeAction::ExternalAuthorization,
            json!({"success": true}),
        ));
        assert!(matches!(step, HandshakeStep::Fail(_)));
    }

    #[test]
    fn test_missing_token_fails() {
        let mut stage = HandshakeStage::default();
        let step = stage.on_reply(&reply(HandshakeAction::ExternalAuthorization, json!({})));
        assert!(matches!(step, HandshakeStep::Fail(_)));
        assert_eq!(stage, HandshakeStage::Done);
    }

    #[test]
    fn test_replies_after_done_are_ignored() {
        let mut stage = HandshakeStage::Done;
        let step = stage.on_reply(&reply(HandshakeAction::Authorization, json!({"success": true})));
        assert_eq!(step, HandshakeStep::Ignore);
    }

    #[tokio::test]
    async fn test_token_written_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let token = FileToken {
            file: dir.path().join("auth.token"),
            token: "tok-123".to_string(),
        };
        token.write().await.unwrap();
        assert_eq!(std::fs::read_to_string(&token.file).unwrap(), "tok-123");
    }
}
