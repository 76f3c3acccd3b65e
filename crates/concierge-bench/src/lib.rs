//! Shared fixtures for the Concierge benchmarks.

use concierge_core::{
    ClientChannel, OverflowPolicy, QueueConfig, RegistryConfig, RegistryError, TopicClass,
    TopicRegistry,
};
use serde_json::{json, Value};
use std::sync::Arc;

/// A guest record padded to roughly `size` bytes of JSON.
#[must_use]
pub fn guest_payload(size: usize) -> Value {
    json!({
        "id": 42,
        "name": "Ada Lovelace",
        "email": "ada@example.com",
        "notes": "x".repeat(size.saturating_sub(64)),
    })
}

/// A registry whose queues stay small however long a benchmark runs.
#[must_use]
pub fn bounded_registry() -> TopicRegistry {
    TopicRegistry::with_config(RegistryConfig {
        queue: QueueConfig::bounded(64, OverflowPolicy::DropOldest),
        ..RegistryConfig::default()
    })
}

/// Register `count` global subscribers.
///
/// # Errors
///
/// Returns an error if the registry refuses a subscriber.
pub fn global_subscribers(
    registry: &TopicRegistry,
    count: usize,
) -> Result<Vec<Arc<ClientChannel>>, RegistryError> {
    (0..count)
        .map(|_| registry.register(TopicClass::Global, None))
        .collect()
}
