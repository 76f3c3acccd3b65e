//! Topic classes and client identifiers.
//!
//! Every subscriber lives in exactly one topic class. Entity and session
//! subscribers are addressed by a target key (a guest id, a chat session id);
//! global subscribers are addressed by their own client id.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Maximum target key length.
pub const MAX_TARGET_LENGTH: usize = 256;

/// Atomic counter for ensuring unique IDs even within the same microsecond.
static CLIENT_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A partition of the subscriber registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopicClass {
    /// Scoped to one record, e.g. a guest and their reservations.
    Entity,
    /// Scoped to one chat session.
    Session,
    /// Every subscriber receives every event.
    Global,
}

impl TopicClass {
    /// All topic classes, in stats order.
    pub const ALL: [TopicClass; 3] = [TopicClass::Entity, TopicClass::Session, TopicClass::Global];

    /// Wire name of the topic class.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            TopicClass::Entity => "entity",
            TopicClass::Session => "session",
            TopicClass::Global => "global",
        }
    }

    /// Whether subscribers of this class are keyed by a target.
    #[must_use]
    pub fn is_targeted(&self) -> bool {
        !matches!(self, TopicClass::Global)
    }
}

impl fmt::Display for TopicClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown topic class name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown topic class: {0}")]
pub struct ParseTopicError(pub String);

impl FromStr for TopicClass {
    type Err = ParseTopicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            // The hotel API calls the entity topic "guest".
            "entity" | "guest" => Ok(TopicClass::Entity),
            "session" => Ok(TopicClass::Session),
            "global" => Ok(TopicClass::Global),
            _ => Err(ParseTopicError(s.to_string())),
        }
    }
}

/// Validate a target key.
///
/// # Errors
///
/// Returns an error message if the key is invalid.
pub fn validate_target(target: &str) -> Result<(), &'static str> {
    if target.is_empty() {
        return Err("Target cannot be empty");
    }
    if target.len() > MAX_TARGET_LENGTH {
        return Err("Target too long");
    }
    if !target.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
        return Err("Target contains invalid characters");
    }
    Ok(())
}

/// Process-unique identifier of a client channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(String);

impl ClientId {
    /// Generate a fresh id from a process-wide counter and the wall clock.
    #[must_use]
    pub fn generate() -> Self {
        let counter = CLIENT_COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros())
            .unwrap_or_default();
        Self(format!("sse_client_{counter}_{micros}"))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClientId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ClientId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_topic_parse() {
        assert_eq!("entity".parse::<TopicClass>().unwrap(), TopicClass::Entity);
        assert_eq!("Guest".parse::<TopicClass>().unwrap(), TopicClass::Entity);
        assert_eq!("SESSION".parse::<TopicClass>().unwrap(), TopicClass::Session);
        assert_eq!("global".parse::<TopicClass>().unwrap(), TopicClass::Global);
        assert!("rooms".parse::<TopicClass>().is_err());
    }

    #[test]
    fn test_topic_targeting() {
        assert!(TopicClass::Entity.is_targeted());
        assert!(TopicClass::Session.is_targeted());
        assert!(!TopicClass::Global.is_targeted());
    }

    #[test]
    fn test_target_validation() {
        assert!(validate_target("42").is_ok());
        assert!(validate_target("session-7f3a").is_ok());
        assert!(validate_target("").is_err());
        assert!(validate_target("line\nbreak").is_err());

        let long = "a".repeat(MAX_TARGET_LENGTH + 1);
        assert!(validate_target(&long).is_err());
    }

    #[test]
    fn test_client_ids_are_unique() {
        let ids: HashSet<ClientId> = (0..1000).map(|_| ClientId::generate()).collect();
        assert_eq!(ids.len(), 1000);
        assert!(ids.iter().all(|id| id.as_str().starts_with("sse_client_")));
    }
}
