//! Subscription keys for the InterApplicationBus.
//!
//! A [`SubscriptionKey`] names a message origin (`uuid`, window `name`) and a
//! `topic`. Any field may be the wildcard [`WILDCARD`], which matches every
//! value on the other side of a comparison.

use std::fmt;

/// Wildcard marker accepted in any key field.
pub const WILDCARD: &str = "*";

/// Three-part subscription identifier `(uuid, name, topic)`.
///
/// Keys are immutable once built. Equality is field-wise, so a key built
/// from a bare topic string equals one built with explicit wildcard
/// identity fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionKey {
    uuid: String,
    name: String,
    topic: String,
}

impl SubscriptionKey {
    /// Build a key from explicit fields; `None` becomes the wildcard.
    #[must_use]
    pub fn new(uuid: Option<&str>, name: Option<&str>, topic: Option<&str>) -> Self {
        Self {
            uuid: uuid.unwrap_or(WILDCARD).to_string(),
            name: name.unwrap_or(WILDCARD).to_string(),
            topic: topic.unwrap_or(WILDCARD).to_string(),
        }
    }

    /// Key matching `topic` from any origin.
    #[must_use]
    pub fn topic(topic: &str) -> Self {
        Self::new(None, None, Some(topic))
    }

    /// Key matching every message.
    #[must_use]
    pub fn any() -> Self {
        Self::new(None, None, None)
    }

    /// Origin application uuid (or `*`).
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// Origin window name (or `*`).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Topic (or `*`).
    pub fn topic_name(&self) -> &str {
        &self.topic
    }

    /// Whether this key accepts a message addressed to `(uuid, name, topic)`.
    ///
    /// A field matches when either side is the wildcard or both are equal;
    /// all three fields must match.
    pub fn matches(&self, uuid: &str, name: &str, topic: &str) -> bool {
        field_matches(&self.uuid, uuid)
            && field_matches(&self.name, name)
            && field_matches(&self.topic, topic)
    }
}

fn field_matches(ours: &str, theirs: &str) -> bool {
    ours == WILDCARD || theirs == WILDCARD || ours == theirs
}

impl Default for SubscriptionKey {
    fn default() -> Self {
        Self::any()
    }
}

impl From<&str> for SubscriptionKey {
    fn from(topic: &str) -> Self {
        Self::topic(topic)
    }
}

impl From<String> for SubscriptionKey {
    fn from(topic: String) -> Self {
        Self::topic(&topic)
    }
}

impl From<&SubscriptionKey> for SubscriptionKey {
    fn from(key: &SubscriptionKey) -> Self {
        key.clone()
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "uuid: {}, name: {}, topic: {}",
            self.uuid, self.name, self.topic
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_string_sets_topic_only() {
        let key = SubscriptionKey::from("hello");
        assert_eq!(key, SubscriptionKey::new(None, None, Some("hello")));
        assert_eq!(key.uuid(), WILDCARD);
        assert_eq!(key.name(), WILDCARD);
        assert_eq!(key.topic_name(), "hello");
    }

    #[test]
    fn test_explicit_wildcards_equal_defaults() {
        let explicit = SubscriptionKey::new(Some("*"), Some("*"), Some("news"));
        assert_eq!(explicit, SubscriptionKey::topic("news"));
        assert_eq!(SubscriptionKey::default(), SubscriptionKey::any());
    }

    #[test]
    fn test_name_only_key_differs_from_topic_key() {
        let by_name = SubscriptionKey::new(None, Some("hello"), None);
        assert_ne!(by_name, SubscriptionKey::topic("hello"));
        assert_eq!(SubscriptionKey::from(&by_name), by_name);
    }

    #[test]
    fn test_wildcard_topic_matches_any_origin() {
        let key = SubscriptionKey::topic("t");
        assert!(key.matches("app-1", "main", "t"));
        assert!(key.matches("*", "*", "t"));
        assert!(!key.matches("app-1", "main", "other"));
    }

    #[test]
    fn test_wildcard_on_message_side_matches() {
        let key = SubscriptionKey::new(Some("app-1"), Some("main"), Some("t"));
        assert!(key.matches("*", "*", "t"));
        assert!(!key.matches("app-2", "*", "t"));
    }

    #[test]
    fn test_display() {
        let key = SubscriptionKey::topic("x");
        assert_eq!(key.to_string(), "uuid: *, name: *, topic: x");
    }
}
