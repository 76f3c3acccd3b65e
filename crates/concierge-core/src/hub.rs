//! The hub ties the registry, broadcaster and sweeper together.
//!
//! One hub is created at startup and shared by `Arc` between the HTTP layer
//! (subscribe, stats) and the handlers that publish changes (notify).

use crate::broadcaster::{Broadcaster, Delivery};
use crate::channel::DEFAULT_HEARTBEAT_INTERVAL;
use crate::registry::{HubStats, RegistryConfig, RegistryError, TopicRegistry};
use crate::subscription::Subscription;
use crate::sweeper::{self, SweepReport, SweeperConfig};
use crate::topic::TopicClass;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Registry configuration.
    pub registry: RegistryConfig,
    /// Sweeper configuration.
    pub sweeper: SweeperConfig,
    /// Idle time before a subscriber receives a heartbeat.
    pub heartbeat_interval: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            registry: RegistryConfig::default(),
            sweeper: SweeperConfig::default(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }
}

/// The real-time update hub.
pub struct Hub {
    registry: Arc<TopicRegistry>,
    broadcaster: Broadcaster,
    config: HubConfig,
    sweeper: Option<JoinHandle<()>>,
}

impl Hub {
    /// Create a hub without a background sweeper.
    #[must_use]
    pub fn new(config: HubConfig) -> Self {
        let registry = Arc::new(TopicRegistry::with_config(config.registry.clone()));
        Self {
            broadcaster: Broadcaster::new(registry.clone()),
            registry,
            config,
            sweeper: None,
        }
    }

    /// Create a hub and start its sweeper.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn start(config: HubConfig) -> Self {
        let mut hub = Self::new(config);
        hub.sweeper = Some(sweeper::spawn(
            hub.registry.clone(),
            hub.config.sweeper.clone(),
        ));
        info!("Hub started");
        hub
    }

    /// Get the hub configuration.
    #[must_use]
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Get the topic registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<TopicRegistry> {
        &self.registry
    }

    /// Get the broadcaster.
    #[must_use]
    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    /// Publish an event; see [`Broadcaster::notify`].
    pub fn notify<P: Serialize>(
        &self,
        topic: TopicClass,
        target: Option<&str>,
        event_type: &str,
        payload: P,
    ) -> Delivery {
        self.broadcaster.notify(topic, target, event_type, payload)
    }

    /// Register a new subscriber.
    ///
    /// # Errors
    ///
    /// Returns an error if the target does not suit the topic or the channel
    /// limit is reached.
    pub fn subscribe(
        &self,
        topic: TopicClass,
        target: Option<&str>,
    ) -> Result<Subscription, RegistryError> {
        let channel = self.registry.register(topic, target)?;
        debug!(client = %channel.id(), topic = %topic, "New subscription");
        Ok(Subscription::new(
            channel,
            self.registry.clone(),
            self.config.heartbeat_interval,
        ))
    }

    /// Live channel counts per topic class.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        self.registry.stats()
    }

    /// Run one sweep pass immediately.
    pub fn sweep_now(&self) -> SweepReport {
        sweeper::sweep_once(&self.registry, &self.config.sweeper)
    }
}

impl Drop for Hub {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.take() {
            handle.abort();
        }
    }
}
