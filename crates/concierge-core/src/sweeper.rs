//! Background eviction of stale channels.
//!
//! Subscriptions normally unregister themselves when their stream is dropped.
//! The sweeper catches the rest: channels that were closed without being
//! unregistered and channels that outlived the maximum lifetime.

use crate::channel::ClientChannel;
use crate::registry::TopicRegistry;
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace};

/// Longest accepted pause between passes.
pub const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(86_400);

/// Which timestamp the lifetime limit is measured from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionClock {
    /// Registration time: a hard cap on stream lifetime.
    #[default]
    Created,
    /// Last enqueued event: a true idle timeout.
    LastActivity,
}

/// Sweeper configuration.
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// Time between passes.
    pub interval: Duration,
    /// Channels older than this are evicted.
    pub max_lifetime: Duration,
    /// Timestamp the lifetime is measured from.
    pub clock: EvictionClock,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            max_lifetime: Duration::from_secs(300),
            clock: EvictionClock::Created,
        }
    }
}

impl SweeperConfig {
    /// Check if a channel should be evicted at `now`.
    #[must_use]
    pub fn is_stale(&self, channel: &ClientChannel, now: Instant) -> bool {
        if !channel.is_active() {
            return true;
        }
        let since = match self.clock {
            EvictionClock::Created => channel.created_at(),
            EvictionClock::LastActivity => channel.last_activity(),
        };
        now.saturating_duration_since(since) > self.max_lifetime
    }
}

/// Result of one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Channels examined.
    pub scanned: usize,
    /// Channels evicted.
    pub evicted: usize,
}

/// Run one sweep pass.
pub fn sweep_once(registry: &TopicRegistry, config: &SweeperConfig) -> SweepReport {
    let now = Instant::now();
    let channels = registry.channels();
    let scanned = channels.len();

    let mut evicted = 0;
    for channel in channels.iter().filter(|c| config.is_stale(c, now)) {
        registry.unregister_client(channel.id());
        channel.close();
        evicted += 1;
        debug!(client = %channel.id(), "Evicted stale channel");
    }

    if evicted > 0 {
        info!(scanned, evicted, "Swept stale channels");
    }

    SweepReport { scanned, evicted }
}

/// Spawn the sweep loop.
///
/// The first pass runs one interval after start; the interval is clamped to
/// [`MAX_SWEEP_INTERVAL`]. A panicking pass is logged and the loop carries on
/// at the next tick.
pub fn spawn(registry: Arc<TopicRegistry>, config: SweeperConfig) -> JoinHandle<()> {
    info!(
        interval_secs = config.interval.as_secs(),
        max_lifetime_secs = config.max_lifetime.as_secs(),
        clock = ?config.clock,
        "Starting channel sweeper"
    );

    tokio::spawn(async move {
        let period = config.interval.clamp(Duration::from_millis(1), MAX_SWEEP_INTERVAL);
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            match catch_unwind(AssertUnwindSafe(|| sweep_once(&registry, &config))) {
                Ok(report) => trace!(scanned = report.scanned, evicted = report.evicted, "Sweep pass complete"),
                Err(_) => error!("Sweep pass panicked, retrying at next interval"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topic::TopicClass;

    #[tokio::test(start_paused = true)]
    async fn test_sweep_evicts_expired_and_keeps_fresh() {
        let registry = TopicRegistry::new();
        let config = SweeperConfig::default();

        let old = registry.register(TopicClass::Entity, Some("1")).unwrap();
        tokio::time::advance(Duration::from_secs(301)).await;
        let fresh = registry.register(TopicClass::Entity, Some("2")).unwrap();

        let report = sweep_once(&registry, &config);

        assert_eq!(report, SweepReport { scanned: 2, evicted: 1 });
        assert!(!registry.contains(old.id()));
        assert!(!old.is_active());
        assert!(registry.contains(fresh.id()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_evicts_inactive() {
        let registry = TopicRegistry::new();
        let closed = registry.register(TopicClass::Global, None).unwrap();
        closed.close();

        let report = sweep_once(&registry, &SweeperConfig::default());

        assert_eq!(report.evicted, 1);
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_activity_clock() {
        let registry = TopicRegistry::new();
        let config = SweeperConfig {
            clock: EvictionClock::LastActivity,
            ..SweeperConfig::default()
        };

        let busy = registry.register(TopicClass::Entity, Some("busy")).unwrap();
        let idle = registry.register(TopicClass::Entity, Some("idle")).unwrap();

        tokio::time::advance(Duration::from_secs(200)).await;
        busy.send(&crate::EventFrame::new("ping", serde_json::json!({}))).unwrap();
        tokio::time::advance(Duration::from_secs(200)).await;

        sweep_once(&registry, &config);

        assert!(registry.contains(busy.id()));
        assert!(!registry.contains(idle.id()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_sweeper_runs_on_interval() {
        let registry = Arc::new(TopicRegistry::new());
        let config = SweeperConfig {
            interval: Duration::from_secs(60),
            max_lifetime: Duration::from_secs(90),
            clock: EvictionClock::Created,
        };
        let channel = registry.register(TopicClass::Global, None).unwrap();
        let handle = spawn(registry.clone(), config);

        // First pass at 60s: too young.
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(registry.contains(channel.id()));

        // Second pass at 120s: expired.
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(!registry.contains(channel.id()));

        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_interval_is_clamped() {
        let registry = Arc::new(TopicRegistry::new());
        let channel = registry.register(TopicClass::Global, None).unwrap();
        channel.close();

        let handle = spawn(
            registry.clone(),
            SweeperConfig {
                interval: Duration::MAX,
                ..SweeperConfig::default()
            },
        );

        tokio::time::sleep(MAX_SWEEP_INTERVAL + Duration::from_secs(1)).await;

        assert!(registry.is_empty());
        assert!(!handle.is_finished());
        handle.abort();
    }
}
