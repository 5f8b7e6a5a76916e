//! Inbound frame decoding and classification.
//!
//! Every text frame from the runtime is a JSON object with an `action` tag.
//! [`InboundFrame::parse`] decodes it and sorts it into exactly one class:
//!
//! | `action`                                              | Class                  |
//! |-------------------------------------------------------|------------------------|
//! | `external-authorization-response`, `authorization-response` | [`InboundFrame::Handshake`] |
//! | `ack`                                                 | [`InboundFrame::Ack`]  |
//! | `process-message`                                     | [`InboundFrame::Message`] |
//! | `subscriber-added`, `subscriber-removed`              | [`InboundFrame::SubscriberNotice`] |
//! | anything else                                         | [`InboundFrame::Unrecognized`] |

use serde::Deserialize;
use serde_json::Value;

use crate::key::WILDCARD;

/// Handshake reply kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeAction {
    /// Reply to `request-external-authorization` (carries file + token).
    ExternalAuthorization,
    /// Reply to `request-authorization` (carries success/reason).
    Authorization,
}

/// A handshake-class frame.
#[derive(Debug, Clone, PartialEq)]
pub struct HandshakeReply {
    /// Which handshake step this replies to.
    pub action: HandshakeAction,
    /// Raw reply payload.
    pub payload: Value,
}

/// An acknowledgement of an earlier action.
#[derive(Debug, Clone, PartialEq)]
pub struct Ack {
    /// `correlationId` echoed by the runtime; `None` when absent.
    pub correlation_id: Option<u64>,
    /// Ack payload handed to the waiting caller.
    pub payload: Value,
}

/// A message pushed to this client through a subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct PushedMessage {
    /// Sending application uuid (`*` when absent).
    pub source_uuid: String,
    /// Addressed application uuid (`*` when absent).
    pub destination_uuid: String,
    /// Addressed window name (`*` when absent).
    pub destination_name: String,
    /// Topic (`*` when absent).
    pub topic: String,
    /// Message body delivered to callbacks.
    pub message: Value,
}

/// A decoded inbound frame, classified by its `action` tag.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// Authorization handshake reply.
    Handshake(HandshakeReply),
    /// Action acknowledgement.
    Ack(Ack),
    /// Pushed subscription event.
    Message(PushedMessage),
    /// Informational `subscriber-added` / `subscriber-removed` notice.
    SubscriberNotice {
        /// `true` for `subscriber-added`.
        added: bool,
        /// Notice payload.
        payload: Value,
    },
    /// Frame with an action this client does not know.
    Unrecognized {
        /// The unknown action tag.
        action: String,
    },
}

/// Wire shape shared by every inbound frame.
#[derive(Debug, Deserialize)]
struct RawFrame {
    action: String,
    #[serde(default)]
    payload: Value,
    #[serde(rename = "correlationId", default)]
    correlation_id: Option<u64>,
}

impl InboundFrame {
    /// Decode and classify one text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a JSON object with a string
    /// `action` field.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let raw: RawFrame = serde_json::from_str(text)?;
        Ok(Self::classify(raw))
    }

    fn classify(raw: RawFrame) -> Self {
        match raw.action.as_str() {
            "ack" => Self::Ack(Ack {
                correlation_id: raw.correlation_id,
                payload: raw.payload,
            }),
            "process-message" => Self::Message(PushedMessage::from_payload(raw.payload)),
            "external-authorization-response" => Self::Handshake(HandshakeReply {
                action: HandshakeAction::ExternalAuthorization,
                payload: raw.payload,
            }),
            "authorization-response" => Self::Handshake(HandshakeReply {
                action: HandshakeAction::Authorization,
                payload: raw.payload,
            }),
            "subscriber-added" | "subscriber-removed" => Self::SubscriberNotice {
                added: raw.action == "subscriber-added",
                payload: raw.payload,
            },
            _ => Self::Unrecognized { action: raw.action },
        }
    }
}

impl PushedMessage {
    fn from_payload(mut payload: Value) -> Self {
        let field = |name: &str| {
            payload
                .get(name)
                .and_then(Value::as_str)
                .unwrap_or(WILDCARD)
                .to_string()
        };
        let source_uuid = field("sourceUuid");
        let destination_uuid = field("destinationUuid");
        let destination_name = field("destinationWindowName");
        let topic = field("topic");
        let message = payload
            .get_mut("message")
            .map(Value::take)
            .unwrap_or(Value::Null);

        Self {
            source_uuid,
            destination_uuid,
            destination_name,
            topic,
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ack_is_classified_with_correlation_id() {
        let frame = InboundFrame::parse(
            r#"{"action":"ack","correlationId":7,"payload":{"success":true,"data":"1.2"}}"#,
        )
        .unwrap();
        assert_eq!(
            frame,
            InboundFrame::Ack(Ack {
                correlation_id: Some(7),
                payload: json!({"success": true, "data": "1.2"}),
            })
        );
    }

    #[test]
    fn test_ack_without_correlation_id() {
        let frame = InboundFrame::parse(r#"{"action":"ack","payload":{}}"#).unwrap();
        match frame {
            InboundFrame::Ack(ack) => assert_eq!(ack.correlation_id, None),
            other => panic!("expected ack, got {other:?}"),
        }
    }

    #[test]
    fn test_process_message_defaults_missing_fields_to_wildcard() {
        let frame = InboundFrame::parse(
            r#"{"action":"process-message","payload":{"sourceUuid":"app-1","topic":"news","message":{"a":1}}}"#,
        )
        .unwrap();
        let InboundFrame::Message(msg) = frame else {
            panic!("expected pushed message");
        };
        assert_eq!(msg.source_uuid, "app-1");
        assert_eq!(msg.destination_uuid, "*");
        assert_eq!(msg.destination_name, "*");
        assert_eq!(msg.topic, "news");
        assert_eq!(msg.message, json!({"a": 1}));
    }

    #[test]
    fn test_handshake_replies() {
        let first = InboundFrame::parse(
            r#"{"action":"external-authorization-response","payload":{"file":"/tmp/x","token":"t"}}"#,
        )
        .unwrap();
        assert!(matches!(
            first,
            InboundFrame::Handshake(HandshakeReply {
                action: HandshakeAction::ExternalAuthorization,
                ..
            })
        ));

        let second = InboundFrame::parse(
            r#"{"action":"authorization-response","payload":{"success":true}}"#,
        )
        .unwrap();
        assert!(matches!(
            second,
            InboundFrame::Handshake(HandshakeReply {
                action: HandshakeAction::Authorization,
                ..
            })
        ));
    }

    #[test]
    fn test_subscriber_notices() {
        let added = InboundFrame::parse(
            r#"{"action":"subscriber-added","payload":{"senderName":"*","topic":"*"}}"#,
        )
        .unwrap();
        assert!(matches!(added, InboundFrame::SubscriberNotice { added: true, .. }));

        let removed = InboundFrame::parse(r#"{"action":"subscriber-removed"}"#).unwrap();
        assert!(matches!(removed, InboundFrame::SubscriberNotice { added: false, .. }));
    }

    #[test]
    fn test_unknown_action_is_unrecognized() {
        let frame = InboundFrame::parse(r#"{"action":"window-moved","payload":{}}"#).unwrap();
        assert_eq!(
            frame,
            InboundFrame::Unrecognized {
                action: "window-moved".to_string()
            }
        );
    }

    #[test]
    fn test_malformed_frames_are_errors() {
        assert!(InboundFrame::parse("not json").is_err());
        assert!(InboundFrame::parse(r#"{"payload":{}}"#).is_err());
        assert!(InboundFrame::parse(r#"{"action":5}"#).is_err());
    }
}
