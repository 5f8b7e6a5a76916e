//! InterApplicationBus request payloads.

use serde_json::{json, Value};

use crate::key::SubscriptionKey;

/// Wire action for a broadcast publish.
pub const PUBLISH: &str = "publish-message";
/// Wire action for a directed send.
pub const SEND: &str = "send-message";
/// Wire action registering interest in a source.
pub const SUBSCRIBE: &str = "subscribe";
/// Wire action dropping interest in a source.
pub const UNSUBSCRIBE: &str = "unsubscribe";

/// Payload for [`PUBLISH`]; only the topic of `key` is used.
pub fn publish_payload(own_uuid: &str, key: &SubscriptionKey, message: Value) -> Value {
    json!({
        "topic": key.topic_name(),
        "message": message,
        "sourceWindowName": own_uuid,
    })
}

/// Payload for [`SEND`].
pub fn send_payload(own_uuid: &str, destination: &SubscriptionKey, message: Value) -> Value {
    json!({
        "destinationUuid": destination.uuid(),
        "destinationWindowName": destination.name(),
        "topic": destination.topic_name(),
        "message": message,
        "sourceWindowName": own_uuid,
    })
}

/// Payload for [`SUBSCRIBE`] and [`UNSUBSCRIBE`].
pub fn subscription_payload(own_uuid: &str, source: &SubscriptionKey) -> Value {
    json!({
        "sourceUuid": source.uuid(),
        "sourceWindowName": source.name(),
        "topic": source.topic_name(),
        "destinationWindowName": own_uuid,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_uses_topic_only() {
        let key = SubscriptionKey::new(Some("app"), Some("win"), Some("x"));
        assert_eq!(
            publish_payload("me", &key, json!({"a": 1})),
            json!({"topic": "x", "message": {"a": 1}, "sourceWindowName": "me"})
        );
    }

    #[test]
    fn test_send_addresses_destination() {
        let key = SubscriptionKey::new(Some("app"), None, Some("x"));
        let payload = send_payload("me", &key, json!("hi"));
        assert_eq!(payload["destinationUuid"], "app");
        assert_eq!(payload["destinationWindowName"], "*");
        assert_eq!(payload["topic"], "x");
        assert_eq!(payload["sourceWindowName"], "me");
    }

    #[test]
    fn test_subscription_payload() {
        assert_eq!(
            subscription_payload("me", &SubscriptionKey::topic("news")),
            json!({
                "sourceUuid": "*",
                "sourceWindowName": "*",
                "topic": "news",
                "destinationWindowName": "me",
            })
        );
    }
}
