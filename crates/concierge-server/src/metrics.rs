//! Metrics collection and export for Concierge.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use concierge_core::{Hub, TopicClass};
use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::info;

/// Metric names.
pub mod names {
    pub const STREAMS_TOTAL: &str = "concierge_streams_total";
    pub const STREAMS_ACTIVE: &str = "concierge_streams_active";
    pub const EVENTS_TOTAL: &str = "concierge_events_total";
    pub const EVENTS_DELIVERED: &str = "concierge_events_delivered_total";
    pub const CHANNELS_ACTIVE: &str = "concierge_channels_active";
    pub const ERRORS_TOTAL: &str = "concierge_errors_total";
}

/// Install the Prometheus exporter, then describe the metrics to it.
///
/// # Errors
///
/// Returns an error if the exporter cannot be installed.
pub fn install(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    describe_metrics();

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Register descriptions with the installed recorder.
pub fn describe_metrics() {
    metrics::describe_counter!(
        names::STREAMS_TOTAL,
        "Total number of event streams opened since server start"
    );
    metrics::describe_gauge!(names::STREAMS_ACTIVE, "Current number of open event streams");
    metrics::describe_counter!(names::EVENTS_TOTAL, "Total number of events published");
    metrics::describe_counter!(
        names::EVENTS_DELIVERED,
        "Total number of frames enqueued to subscribers"
    );
    metrics::describe_gauge!(names::CHANNELS_ACTIVE, "Registered channels per topic class");
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of rejected subscriptions");
}

/// Record a published event.
pub fn record_event(topic: TopicClass, delivered: usize) {
    counter!(names::EVENTS_TOTAL, "topic" => topic.as_str()).increment(1);
    counter!(names::EVENTS_DELIVERED, "topic" => topic.as_str()).increment(delivered as u64);
}

/// Record a rejected subscription.
pub fn record_error(kind: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => kind).increment(1);
}

/// Publish per-topic channel counts from the hub.
pub fn refresh_channel_gauges(hub: &Hub) {
    let stats = hub.stats();
    for topic in TopicClass::ALL {
        gauge!(names::CHANNELS_ACTIVE, "topic" => topic.as_str()).set(stats.count(topic) as f64);
    }
}

/// Refresh the channel gauges on a fixed period.
///
/// Picks up channels the broadcaster pruned or the sweeper evicted, which
/// never pass through a stream guard.
pub fn spawn_gauge_refresh(hub: Arc<Hub>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            refresh_channel_gauges(&hub);
        }
    })
}

/// Records an open stream for as long as it lives.
///
/// Drop it after the stream's subscription so the channel gauges see the
/// channel gone.
pub struct StreamMetricsGuard {
    topic: TopicClass,
    hub: Arc<Hub>,
}

impl StreamMetricsGuard {
    /// Create a new metrics guard, recording a stream.
    #[must_use]
    pub fn new(topic: TopicClass, hub: Arc<Hub>) -> Self {
        counter!(names::STREAMS_TOTAL, "topic" => topic.as_str()).increment(1);
        gauge!(names::STREAMS_ACTIVE, "topic" => topic.as_str()).increment(1.0);
        refresh_channel_gauges(&hub);
        Self { topic, hub }
    }
}

impl Drop for StreamMetricsGuard {
    fn drop(&mut self) {
        gauge!(names::STREAMS_ACTIVE, "topic" => self.topic.as_str()).decrement(1.0);
        refresh_channel_gauges(&self.hub);
    }
}
