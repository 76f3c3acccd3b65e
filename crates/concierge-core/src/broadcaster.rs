//! Event fan-out for Concierge.
//!
//! The broadcaster encodes an event once, enqueues the shared bytes to every
//! matching channel and prunes the channels that refused it. Publishing never
//! blocks and never fails from the publisher's point of view.

use crate::registry::TopicRegistry;
use crate::topic::{ClientId, TopicClass};
use concierge_protocol::{codec, EventFrame};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, trace};

/// Outcome of one publish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    /// Channels that accepted the frame.
    pub delivered: usize,
    /// Channels that refused it and were unregistered.
    pub pruned: usize,
}

/// Publishes events to the channels of a topic registry.
#[derive(Clone)]
pub struct Broadcaster {
    registry: Arc<TopicRegistry>,
}

impl Broadcaster {
    /// Create a broadcaster over a registry.
    #[must_use]
    pub fn new(registry: Arc<TopicRegistry>) -> Self {
        Self { registry }
    }

    /// Publish `event_type` with a serializable payload.
    ///
    /// With a `target`, only channels filed under it receive the event;
    /// without one, every channel of the topic does. Nobody listening is a
    /// silent no-op.
    pub fn notify<P: Serialize>(
        &self,
        topic: TopicClass,
        target: Option<&str>,
        event_type: &str,
        payload: P,
    ) -> Delivery {
        let payload = match serde_json::to_value(payload) {
            Ok(payload) => payload,
            Err(e) => {
                error!(topic = %topic, event = %event_type, error = %e, "Failed to serialize event payload");
                return Delivery::default();
            }
        };

        self.publish(topic, target, &EventFrame::new(event_type, payload))
    }

    /// Publish a frame.
    pub fn publish(&self, topic: TopicClass, target: Option<&str>, frame: &EventFrame) -> Delivery {
        let channels = self.registry.lookup(topic, target);
        if channels.is_empty() {
            trace!(topic = %topic, target = ?target, event = %frame.event_type, "No subscribers");
            return Delivery::default();
        }

        let encoded = match codec::encode(frame, self.registry.config().wire_format) {
            Ok(encoded) => encoded,
            Err(e) => {
                error!(topic = %topic, event = %frame.event_type, error = %e, "Failed to encode event");
                return Delivery::default();
            }
        };

        let mut delivered = 0;
        let mut failed: Vec<ClientId> = Vec::new();
        for channel in &channels {
            if channel.send_encoded(encoded.clone()) {
                delivered += 1;
            } else {
                failed.push(channel.id().clone());
            }
        }

        for id in &failed {
            self.registry.unregister_client(id);
        }

        debug!(
            topic = %topic,
            target = ?target,
            event = %frame.event_type,
            delivered,
            pruned = failed.len(),
            "Broadcast event"
        );

        Delivery {
            delivered,
            pruned: failed.len(),
        }
    }
}
