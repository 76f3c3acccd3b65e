//! Subscription endpoint for Concierge.
//!
//! A subscription owns one registered channel and turns it into a stream of
//! encoded frames. Dropping it, which is what happens when the HTTP layer
//! tears down a disconnected response body, unregisters the channel.

use crate::channel::ClientChannel;
use crate::registry::{Binding, TopicRegistry};
use crate::topic::ClientId;
use bytes::Bytes;
use futures_util::stream::{self, Stream};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// A live subscription to one topic.
pub struct Subscription {
    channel: Arc<ClientChannel>,
    registry: Arc<TopicRegistry>,
    heartbeat_interval: Duration,
}

impl Subscription {
    pub(crate) fn new(
        channel: Arc<ClientChannel>,
        registry: Arc<TopicRegistry>,
        heartbeat_interval: Duration,
    ) -> Self {
        Self {
            channel,
            registry,
            heartbeat_interval,
        }
    }

    /// Get the channel id.
    #[must_use]
    pub fn id(&self) -> &ClientId {
        self.channel.id()
    }

    /// Get the underlying channel.
    #[must_use]
    pub fn channel(&self) -> &Arc<ClientChannel> {
        &self.channel
    }

    /// Where the channel is currently filed, if it is still registered.
    #[must_use]
    pub fn binding(&self) -> Option<Binding> {
        self.registry.binding(self.channel.id())
    }

    /// Wait for the next frame, or a heartbeat after the heartbeat interval.
    ///
    /// Returns `None` once the channel has been closed (superseded, evicted
    /// or pruned).
    pub async fn next_frame(&self) -> Option<Bytes> {
        self.channel.receive(self.heartbeat_interval).await
    }

    /// Convert into a stream of encoded frames.
    ///
    /// The stream ends when the channel closes. Dropping the stream drops the
    /// subscription.
    pub fn into_stream(self) -> impl Stream<Item = Bytes> + Send + 'static {
        stream::unfold(self, |subscription| async move {
            let frame = subscription.next_frame().await?;
            Some((frame, subscription))
        })
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let id = self.channel.id();
        if self.registry.unregister_client(id) {
            debug!(client = %id, "Subscription ended, channel unregistered");
        }
        self.channel.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topic::TopicClass;
    use concierge_protocol::codec::decode;
    use futures_util::StreamExt;
    use serde_json::json;

    fn subscribe(registry: &Arc<TopicRegistry>, topic: TopicClass, target: Option<&str>) -> Subscription {
        let channel = registry.register(topic, target).unwrap();
        Subscription::new(channel, registry.clone(), Duration::from_secs(30))
    }

    #[tokio::test]
    async fn test_drop_unregisters() {
        let registry = Arc::new(TopicRegistry::new());
        let subscription = subscribe(&registry, TopicClass::Global, None);
        let channel = subscription.channel().clone();
        assert_eq!(registry.stats().global, 1);

        drop(subscription);

        assert_eq!(registry.stats().global, 0);
        assert!(!channel.is_active());
    }

    #[tokio::test]
    async fn test_stream_yields_frames() {
        let registry = Arc::new(TopicRegistry::new());
        let subscription = subscribe(&registry, TopicClass::Entity, Some("42"));
        subscription
            .channel()
            .send(&crate::EventFrame::new("guest_updated", json!({"id": 42})))
            .unwrap();

        let mut stream = Box::pin(subscription.into_stream());
        let bytes = stream.next().await.unwrap();
        let frame = decode(std::str::from_utf8(&bytes).unwrap()).unwrap();
        assert_eq!(frame.event_type, "guest_updated");

        drop(stream);
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_heartbeats_while_idle() {
        let registry = Arc::new(TopicRegistry::new());
        let subscription = subscribe(&registry, TopicClass::Session, Some("chat-1"));
        let id = subscription.id().clone();

        let mut stream = Box::pin(subscription.into_stream());
        let bytes = stream.next().await.unwrap();
        let frame = decode(std::str::from_utf8(&bytes).unwrap()).unwrap();

        assert!(frame.is_heartbeat());
        assert!(registry.contains(&id));
    }

    #[tokio::test]
    async fn test_superseded_stream_ends_without_removing_successor() {
        let registry = Arc::new(TopicRegistry::new());
        let first = subscribe(&registry, TopicClass::Entity, Some("42"));
        let second = subscribe(&registry, TopicClass::Entity, Some("42"));

        let mut stream = Box::pin(first.into_stream());
        assert!(stream.next().await.is_none());
        drop(stream);

        assert!(registry.contains(second.id()));
        assert_eq!(registry.stats().entity, 1);
    }
}
