//! Client channel for Concierge.
//!
//! A client channel buffers encoded frames for one subscriber. Publishers
//! enqueue without blocking; the owning subscription pops them, falling back
//! to a heartbeat frame when nothing arrives in time.
//!
//! The queue is a tokio channel chosen by [`QueueConfig`]:
//!
//! - unbounded: `mpsc::unbounded_channel`
//! - bounded, drop newest or disconnect: `mpsc::channel` + `try_send`
//! - bounded, drop oldest: a single-receiver `broadcast` ring, where a
//!   lagging receiver skips the overwritten frames

use crate::topic::ClientId;
use bytes::Bytes;
use concierge_protocol::{codec, EventFrame, ProtocolError, WireFormat};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

/// Default time a subscriber waits for an event before a heartbeat is sent.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// What to do when a bounded queue is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Discard the oldest queued frame to make room.
    ///
    /// The capacity is rounded up to a power of two.
    #[default]
    DropOldest,
    /// Discard the incoming frame.
    DropNewest,
    /// Treat the subscriber as failed so the broadcaster prunes it.
    Disconnect,
}

/// Queue sizing for client channels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum queued frames; `None` means unbounded.
    pub capacity: Option<usize>,
    /// Policy applied once `capacity` is reached.
    pub overflow: OverflowPolicy,
}

impl QueueConfig {
    /// An unbounded queue.
    #[must_use]
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// A bounded queue. A capacity of zero is raised to one.
    #[must_use]
    pub fn bounded(capacity: usize, overflow: OverflowPolicy) -> Self {
        Self {
            capacity: Some(capacity.max(1)),
            overflow,
        }
    }
}

/// Sending half of a channel queue.
#[derive(Debug)]
enum Outbox {
    Unbounded(mpsc::UnboundedSender<Bytes>),
    Bounded(mpsc::Sender<Bytes>, OverflowPolicy),
    Ring(broadcast::Sender<Bytes>, usize),
}

/// Receiving half of a channel queue.
#[derive(Debug)]
enum Inbox {
    Unbounded(mpsc::UnboundedReceiver<Bytes>),
    Bounded(mpsc::Receiver<Bytes>),
    Ring(broadcast::Receiver<Bytes>),
}

impl Inbox {
    async fn recv(&mut self) -> Option<Bytes> {
        match self {
            Inbox::Unbounded(rx) => rx.recv().await,
            Inbox::Bounded(rx) => rx.recv().await,
            Inbox::Ring(rx) => loop {
                match rx.recv().await {
                    Ok(frame) => return Some(frame),
                    Err(RecvError::Lagged(skipped)) => {
                        trace!(skipped, "Skipped overwritten frames");
                    }
                    Err(RecvError::Closed) => return None,
                }
            },
        }
    }
}

fn queue(config: QueueConfig) -> (Outbox, Inbox) {
    match (config.capacity, config.overflow) {
        (None, _) => {
            let (tx, rx) = mpsc::unbounded_channel();
            (Outbox::Unbounded(tx), Inbox::Unbounded(rx))
        }
        (Some(capacity), OverflowPolicy::DropOldest) => {
            let capacity = capacity.max(1).next_power_of_two();
            let (tx, rx) = broadcast::channel(capacity);
            (Outbox::Ring(tx, capacity), Inbox::Ring(rx))
        }
        (Some(capacity), policy) => {
            let (tx, rx) = mpsc::channel(capacity.max(1));
            (Outbox::Bounded(tx, policy), Inbox::Bounded(rx))
        }
    }
}

/// Per-subscriber delivery unit.
#[derive(Debug)]
pub struct ClientChannel {
    /// Channel id.
    id: ClientId,
    /// Sending half; taken on close so the receiver sees the end.
    outbox: RwLock<Option<Outbox>>,
    /// Receiving half, owned by the subscription.
    inbox: Mutex<Inbox>,
    /// Frames waiting in an unbounded queue.
    unbounded_pending: AtomicUsize,
    /// Cleared on close or fatal delivery failure.
    active: AtomicBool,
    /// Registration time.
    created_at: Instant,
    /// Milliseconds after `created_at` of the last enqueued frame.
    last_activity_ms: AtomicU64,
    /// Frames discarded by the overflow policy.
    dropped: AtomicU64,
    /// Wire format for synthesized heartbeats.
    format: WireFormat,
}

impl ClientChannel {
    /// Create a new active channel.
    #[must_use]
    pub fn new(id: ClientId, queue_config: QueueConfig, format: WireFormat) -> Self {
        let (outbox, inbox) = queue(queue_config);
        Self {
            id,
            outbox: RwLock::new(Some(outbox)),
            inbox: Mutex::new(inbox),
            unbounded_pending: AtomicUsize::new(0),
            active: AtomicBool::new(true),
            created_at: Instant::now(),
            last_activity_ms: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            format,
        }
    }

    /// Get the channel id.
    #[must_use]
    pub fn id(&self) -> &ClientId {
        &self.id
    }

    /// Check if the channel still accepts frames.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Registration time.
    #[must_use]
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Time of the last enqueued frame (registration time if none).
    #[must_use]
    pub fn last_activity(&self) -> Instant {
        self.created_at + Duration::from_millis(self.last_activity_ms.load(Ordering::Relaxed))
    }

    /// Number of frames waiting to be received.
    #[must_use]
    pub fn pending(&self) -> usize {
        if !self.is_active() {
            return 0;
        }
        match &*self.outbox.read().unwrap_or_else(PoisonError::into_inner) {
            Some(Outbox::Unbounded(_)) => self.unbounded_pending.load(Ordering::Relaxed),
            Some(Outbox::Bounded(tx, _)) => tx.max_capacity() - tx.capacity(),
            Some(Outbox::Ring(tx, _)) => tx.len(),
            None => 0,
        }
    }

    /// Number of frames discarded by the overflow policy.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Wire format used by this channel.
    #[must_use]
    pub fn format(&self) -> WireFormat {
        self.format
    }

    /// Encode and enqueue a frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame cannot be encoded; the channel is left
    /// untouched. Otherwise the result is that of
    /// [`ClientChannel::send_encoded`].
    pub fn send(&self, frame: &EventFrame) -> Result<bool, ProtocolError> {
        let encoded = codec::encode(frame, self.format)?;
        Ok(self.send_encoded(encoded))
    }

    /// Enqueue an already encoded frame.
    ///
    /// Returns `false` if the channel is inactive, or if it overflowed under
    /// [`OverflowPolicy::Disconnect`], in which case it is now inactive.
    /// Never blocks.
    pub fn send_encoded(&self, frame: Bytes) -> bool {
        let overflowed = {
            let outbox = self.outbox.read().unwrap_or_else(PoisonError::into_inner);
            let Some(outbox) = outbox.as_ref().filter(|_| self.is_active()) else {
                return false;
            };

            match outbox {
                Outbox::Unbounded(tx) => {
                    // Counted before the send so the receiver never sees it go negative.
                    self.unbounded_pending.fetch_add(1, Ordering::Relaxed);
                    if tx.send(frame).is_err() {
                        self.unbounded_pending.fetch_sub(1, Ordering::Relaxed);
                        return false;
                    }
                    false
                }
                Outbox::Bounded(tx, policy) => match tx.try_send(frame) {
                    Ok(()) => false,
                    Err(TrySendError::Full(_)) if *policy == OverflowPolicy::DropNewest => {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        trace!(client = %self.id, "Queue full, dropped newest frame");
                        return true;
                    }
                    Err(TrySendError::Full(_)) => true,
                    Err(TrySendError::Closed(_)) => return false,
                },
                Outbox::Ring(tx, capacity) => {
                    if tx.len() >= *capacity {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        trace!(client = %self.id, "Queue full, dropped oldest frame");
                    }
                    if tx.send(frame).is_err() {
                        return false;
                    }
                    false
                }
            }
        };

        if overflowed {
            warn!(client = %self.id, "Queue full, disconnecting slow subscriber");
            self.close();
            return false;
        }

        self.touch();
        true
    }

    /// Wait up to `timeout` for the next frame.
    ///
    /// Returns a heartbeat frame if nothing arrives in time, and `None` once
    /// the channel has been closed.
    pub async fn receive(&self, timeout: Duration) -> Option<Bytes> {
        let mut inbox = self.inbox.lock().await;

        match tokio::time::timeout(timeout, inbox.recv()).await {
            Ok(Some(frame)) => {
                if !self.is_active() {
                    return None;
                }
                if matches!(*inbox, Inbox::Unbounded(_)) {
                    self.unbounded_pending.fetch_sub(1, Ordering::Relaxed);
                }
                Some(frame)
            }
            Ok(None) => None,
            Err(_) => {
                trace!(client = %self.id, "Receive timed out, sending heartbeat");
                self.is_active().then(|| codec::encode_heartbeat(self.format))
            }
        }
    }

    /// Close the channel and discard any buffered frames.
    ///
    /// Returns `true` if the channel was active.
    pub fn close(&self) -> bool {
        let was_active = self.active.swap(false, Ordering::AcqRel);
        // Dropping the only sender ends the receiver once it drains.
        let outbox = self
            .outbox
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(outbox);

        if was_active {
            debug!(client = %self.id, "Channel closed");
        }
        was_active
    }

    fn touch(&self) {
        let elapsed = self.created_at.elapsed().as_millis() as u64;
        self.last_activity_ms.fetch_max(elapsed, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concierge_protocol::codec::decode;
    use serde_json::json;

    fn channel(queue: QueueConfig) -> ClientChannel {
        ClientChannel::new(ClientId::generate(), queue, WireFormat::Named)
    }

    fn frame(event: &str, n: u64) -> EventFrame {
        EventFrame::new(event, json!({ "n": n }))
    }

    fn decoded(bytes: &Bytes) -> EventFrame {
        decode(std::str::from_utf8(bytes).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_send_receive_fifo() {
        let channel = channel(QueueConfig::unbounded());

        assert!(channel.send(&frame("a", 1)).unwrap());
        assert!(channel.send(&frame("b", 2)).unwrap());
        assert_eq!(channel.pending(), 2);

        let first = channel.receive(Duration::from_secs(1)).await.unwrap();
        let second = channel.receive(Duration::from_secs(1)).await.unwrap();
        assert_eq!(decoded(&first), frame("a", 1));
        assert_eq!(decoded(&second), frame("b", 2));
        assert_eq!(channel.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_times_out_with_heartbeat() {
        let channel = channel(QueueConfig::unbounded());

        let bytes = channel.receive(DEFAULT_HEARTBEAT_INTERVAL).await.unwrap();
        let frame = decoded(&bytes);

        assert!(frame.is_heartbeat());
        assert!(frame.payload["timestamp"].is_string());
        assert!(channel.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_wakes_on_send() {
        let channel = std::sync::Arc::new(channel(QueueConfig::unbounded()));
        let publisher = channel.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            publisher.send(&frame("late", 1)).unwrap();
        });

        let bytes = channel.receive(DEFAULT_HEARTBEAT_INTERVAL).await.unwrap();
        assert_eq!(decoded(&bytes).event_type, "late");
    }

    #[tokio::test]
    async fn test_close_discards_and_ends_receive() {
        let channel = channel(QueueConfig::unbounded());
        channel.send(&frame("a", 1)).unwrap();

        assert!(channel.close());
        assert!(!channel.close());
        assert!(!channel.is_active());
        assert_eq!(channel.pending(), 0);

        assert!(!channel.send(&frame("b", 2)).unwrap());
        assert!(channel.receive(Duration::from_secs(1)).await.is_none());
    }

    #[tokio::test]
    async fn test_overflow_drop_oldest() {
        let channel = channel(QueueConfig::bounded(2, OverflowPolicy::DropOldest));

        for n in 1..=3 {
            assert!(channel.send(&frame("e", n)).unwrap());
        }

        assert_eq!(channel.pending(), 2);
        assert_eq!(channel.dropped(), 1);
        let first = channel.receive(Duration::from_secs(1)).await.unwrap();
        assert_eq!(decoded(&first), frame("e", 2));
    }

    #[tokio::test]
    async fn test_overflow_drop_newest() {
        let channel = channel(QueueConfig::bounded(2, OverflowPolicy::DropNewest));

        for n in 1..=3 {
            assert!(channel.send(&frame("e", n)).unwrap());
        }

        assert_eq!(channel.pending(), 2);
        assert_eq!(channel.dropped(), 1);
        let first = channel.receive(Duration::from_secs(1)).await.unwrap();
        assert_eq!(decoded(&first), frame("e", 1));
    }

    #[test]
    fn test_overflow_disconnect() {
        let channel = channel(QueueConfig::bounded(1, OverflowPolicy::Disconnect));

        assert!(channel.send(&frame("e", 1)).unwrap());
        assert!(!channel.send(&frame("e", 2)).unwrap());
        assert!(!channel.is_active());
        assert_eq!(channel.pending(), 0);
    }

    #[test]
    fn test_zero_capacity_is_raised() {
        let config = QueueConfig::bounded(0, OverflowPolicy::DropOldest);
        assert_eq!(config.capacity, Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_activity_tracks_sends() {
        let channel = channel(QueueConfig::unbounded());
        assert_eq!(channel.last_activity(), channel.created_at());

        tokio::time::advance(Duration::from_secs(10)).await;
        channel.send(&frame("e", 1)).unwrap();

        assert_eq!(
            channel.last_activity() - channel.created_at(),
            Duration::from_secs(10)
        );
    }

    #[tokio::test]
    async fn test_drop_oldest_rounds_capacity_up() {
        let channel = channel(QueueConfig::bounded(3, OverflowPolicy::DropOldest));

        for n in 1..=5 {
            assert!(channel.send(&frame("e", n)).unwrap());
        }

        assert_eq!(channel.pending(), 4);
        assert_eq!(channel.dropped(), 1);
        let first = channel.receive(Duration::from_secs(1)).await.unwrap();
        assert_eq!(decoded(&first), frame("e", 2));
    }

    #[tokio::test]
    async fn test_queued_frame_with_huge_timeout() {
        let channel = channel(QueueConfig::unbounded());
        channel.send(&frame("e", 1)).unwrap();

        let bytes = channel.receive(Duration::MAX).await.unwrap();
        assert_eq!(decoded(&bytes), frame("e", 1));
    }

    #[test]
    fn test_encode_failure_leaves_channel_active() {
        let channel = channel(QueueConfig::unbounded());

        let result = channel.send(&EventFrame::new("bad\nname", json!({})));

        assert!(matches!(result, Err(ProtocolError::InvalidEventType(_))));
        assert!(channel.is_active());
        assert_eq!(channel.pending(), 0);
    }
}
