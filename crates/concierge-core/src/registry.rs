//! Topic registry for Concierge.
//!
//! The registry owns every live client channel, filed by topic class and
//! key. It is the only shared mutable state in the hub; every operation is a
//! handful of non-blocking map updates.

use crate::channel::{ClientChannel, QueueConfig};
use crate::topic::{validate_target, ClientId, TopicClass};
use concierge_protocol::WireFormat;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Registry errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Invalid target key.
    #[error("Invalid target: {0}")]
    InvalidTarget(&'static str),

    /// Targeted topic subscribed without a target.
    #[error("Topic '{0}' requires a target")]
    MissingTarget(TopicClass),

    /// Untargeted topic subscribed with a target.
    #[error("Topic '{0}' does not take a target")]
    UnexpectedTarget(TopicClass),

    /// Maximum number of channels reached.
    #[error("Maximum channels reached ({0})")]
    CapacityReached(usize),
}

/// How entity and session subscriptions to an already-subscribed target are
/// handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyPolicy {
    /// The latest subscriber wins; the previous channel is closed.
    #[default]
    Replace,
    /// Every subscriber to a target receives its events.
    Fanout,
}

/// Registry configuration.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Duplicate-target handling for entity and session topics.
    pub key_policy: KeyPolicy,
    /// Maximum number of live channels across all topics.
    pub max_channels: usize,
    /// Queue sizing for new channels.
    pub queue: QueueConfig,
    /// Wire format for new channels.
    pub wire_format: WireFormat,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            key_policy: KeyPolicy::Replace,
            max_channels: 100_000,
            queue: QueueConfig::unbounded(),
            wire_format: WireFormat::Named,
        }
    }
}

/// Where a channel is filed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    /// Topic class.
    pub topic: TopicClass,
    /// Registry key: the target for entity/session, the client id for global.
    pub key: String,
}

impl Binding {
    /// The target key, absent for global subscribers.
    #[must_use]
    pub fn target(&self) -> Option<&str> {
        self.topic.is_targeted().then_some(self.key.as_str())
    }
}

/// Live channel counts per topic class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubStats {
    /// Entity-scoped channels.
    pub entity: usize,
    /// Session-scoped channels.
    pub session: usize,
    /// Global channels.
    pub global: usize,
    /// All channels.
    pub total: usize,
}

impl HubStats {
    /// Count for one topic class.
    #[must_use]
    pub fn count(&self, topic: TopicClass) -> usize {
        match topic {
            TopicClass::Entity => self.entity,
            TopicClass::Session => self.session,
            TopicClass::Global => self.global,
        }
    }
}

type Slots = DashMap<String, Vec<Arc<ClientChannel>>>;

/// Mapping from (topic class, key) to client channels.
///
/// Lock order is always slot map first, then the binding index.
pub struct TopicRegistry {
    /// Entity-scoped channels by target.
    entity: Slots,
    /// Session-scoped channels by target.
    session: Slots,
    /// Global channels by client id.
    global: Slots,
    /// Reverse index: client id -> binding.
    bindings: DashMap<ClientId, Binding>,
    /// Configuration.
    config: RegistryConfig,
}

impl TopicRegistry {
    /// Create a new registry with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create a new registry with custom configuration.
    #[must_use]
    pub fn with_config(config: RegistryConfig) -> Self {
        info!("Creating topic registry with config: {:?}", config);
        Self {
            entity: DashMap::new(),
            session: DashMap::new(),
            global: DashMap::new(),
            bindings: DashMap::new(),
            config,
        }
    }

    /// Get the registry configuration.
    #[must_use]
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    fn slots(&self, topic: TopicClass) -> &Slots {
        match topic {
            TopicClass::Entity => &self.entity,
            TopicClass::Session => &self.session,
            TopicClass::Global => &self.global,
        }
    }

    /// Create and file a new channel.
    ///
    /// Entity and session channels are keyed by `target`; global channels by
    /// their generated id. Under [`KeyPolicy::Replace`] a channel already at
    /// the target is removed and closed.
    ///
    /// # Errors
    ///
    /// Returns an error if the target is missing, unexpected or invalid, or
    /// if the channel limit is reached.
    pub fn register(
        &self,
        topic: TopicClass,
        target: Option<&str>,
    ) -> Result<Arc<ClientChannel>, RegistryError> {
        match (topic.is_targeted(), target) {
            (true, Some(target)) => validate_target(target).map_err(RegistryError::InvalidTarget)?,
            (true, None) => return Err(RegistryError::MissingTarget(topic)),
            (false, Some(_)) => return Err(RegistryError::UnexpectedTarget(topic)),
            (false, None) => {}
        }

        let replacing = self.config.key_policy == KeyPolicy::Replace
            && target.is_some_and(|t| self.slots(topic).get(t).is_some_and(|s| !s.is_empty()));
        if !replacing && self.len() >= self.config.max_channels {
            return Err(RegistryError::CapacityReached(self.config.max_channels));
        }

        let channel = Arc::new(ClientChannel::new(
            ClientId::generate(),
            self.config.queue,
            self.config.wire_format,
        ));
        let key = target.map_or_else(|| channel.id().to_string(), str::to_string);

        let superseded = self.insert(topic, &key, vec![channel.clone()]);
        self.retire(superseded, "Superseded by new subscription");

        debug!(
            client = %channel.id(),
            topic = %topic,
            target = ?target,
            "Registered channel"
        );

        Ok(channel)
    }

    /// File channels under (topic, key) and record their bindings.
    ///
    /// Returns the channels displaced under [`KeyPolicy::Replace`].
    fn insert(
        &self,
        topic: TopicClass,
        key: &str,
        mut channels: Vec<Arc<ClientChannel>>,
    ) -> Vec<Arc<ClientChannel>> {
        let replace = topic.is_targeted() && self.config.key_policy == KeyPolicy::Replace;

        // Only the most recent channel may hold a replace-keyed slot.
        let mut superseded: Vec<_> = if replace && channels.len() > 1 {
            channels.drain(..channels.len() - 1).collect()
        } else {
            Vec::new()
        };

        let mut slot = self.slots(topic).entry(key.to_string()).or_default();
        if replace {
            superseded.append(&mut *slot);
        }

        for channel in &channels {
            self.bindings.insert(
                channel.id().clone(),
                Binding {
                    topic,
                    key: key.to_string(),
                },
            );
        }
        slot.extend(channels);

        superseded
    }

    /// Drop the bindings of displaced channels and close them.
    fn retire(&self, channels: Vec<Arc<ClientChannel>>, reason: &str) {
        for channel in channels {
            self.bindings.remove(channel.id());
            channel.close();
            debug!(client = %channel.id(), reason, "Retired channel");
        }
    }

    /// Remove and close every channel at (topic, key).
    ///
    /// Returns the number of channels removed; absent keys are not an error.
    pub fn unregister(&self, topic: TopicClass, key: &str) -> usize {
        let Some((_, channels)) = self.slots(topic).remove(key) else {
            return 0;
        };

        let count = channels.len();
        for channel in channels {
            self.bindings.remove(channel.id());
            channel.close();
        }

        debug!(topic = %topic, key = %key, removed = count, "Unregistered key");
        count
    }

    /// Remove and close one channel by id, wherever it is filed.
    ///
    /// Returns `true` if the channel was registered.
    pub fn unregister_client(&self, id: &ClientId) -> bool {
        let Some((_, binding)) = self.bindings.remove(id) else {
            return false;
        };

        let slots = self.slots(binding.topic);
        let mut removed = None;
        if let Some(mut slot) = slots.get_mut(&binding.key) {
            if let Some(pos) = slot.iter().position(|c| c.id() == id) {
                removed = Some(slot.remove(pos));
            }
            if slot.is_empty() {
                drop(slot); // Release the lock
                slots.remove_if(&binding.key, |_, s| s.is_empty());
            }
        }

        if let Some(channel) = removed {
            channel.close();
        }

        debug!(client = %id, topic = %binding.topic, key = %binding.key, "Unregistered channel");
        true
    }

    /// Channels at `target`, or every channel in the topic when `target` is
    /// `None`.
    #[must_use]
    pub fn lookup(&self, topic: TopicClass, target: Option<&str>) -> Vec<Arc<ClientChannel>> {
        let slots = self.slots(topic);
        match target {
            Some(key) => slots.get(key).map(|s| s.clone()).unwrap_or_default(),
            None => slots.iter().flat_map(|e| e.value().clone()).collect(),
        }
    }

    /// Move every channel at (`from`, `from_key`) to the target `to_key` of
    /// the targeted topic `to`.
    ///
    /// The destination honours the key policy: under [`KeyPolicy::Replace`]
    /// channels already there are closed. Returns the number moved.
    ///
    /// # Errors
    ///
    /// Returns an error if `to` is not a targeted topic or `to_key` is
    /// invalid.
    pub fn rebind(
        &self,
        from: TopicClass,
        from_key: &str,
        to: TopicClass,
        to_key: &str,
    ) -> Result<usize, RegistryError> {
        if !to.is_targeted() {
            return Err(RegistryError::UnexpectedTarget(to));
        }
        validate_target(to_key).map_err(RegistryError::InvalidTarget)?;

        let Some((_, moved)) = self.slots(from).remove(from_key) else {
            return Ok(0);
        };
        let count = moved.len();

        let superseded = self.insert(to, to_key, moved);
        self.retire(superseded, "Superseded by rebind");

        info!(
            from = %from,
            from_key = %from_key,
            to = %to,
            to_key = %to_key,
            moved = count,
            "Rebound channels"
        );
        Ok(count)
    }

    /// Get the binding of a channel.
    #[must_use]
    pub fn binding(&self, id: &ClientId) -> Option<Binding> {
        self.bindings.get(id).map(|b| b.clone())
    }

    /// Check if a channel is registered.
    #[must_use]
    pub fn contains(&self, id: &ClientId) -> bool {
        self.bindings.contains_key(id)
    }

    /// Snapshot of every registered channel.
    #[must_use]
    pub fn channels(&self) -> Vec<Arc<ClientChannel>> {
        TopicClass::ALL
            .iter()
            .flat_map(|topic| self.lookup(*topic, None))
            .collect()
    }

    /// Get registry statistics.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        let count = |slots: &Slots| slots.iter().map(|e| e.value().len()).sum::<usize>();
        let entity = count(&self.entity);
        let session = count(&self.session);
        let global = count(&self.global);

        HubStats {
            entity,
            session,
            global,
            total: entity + session + global,
        }
    }

    /// Number of registered channels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Check if no channels are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

impl Default for TopicRegistry {
    fn default() -> Self {
        Self::new()
    }
}
