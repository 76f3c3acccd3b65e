//! Server configuration.
//!
//! Configuration is layered:
//! - Built-in defaults
//! - TOML configuration file (`$CONCIERGE_CONFIG`, or the first of
//!   `concierge.toml`, `/etc/concierge/concierge.toml`,
//!   `~/.config/concierge/concierge.toml` that exists)
//! - Environment variables (`CONCIERGE__PORT`, `CONCIERGE__HUB__HEARTBEAT_SECS`, ...)

use anyhow::{Context, Result};
use concierge_core::sweeper::MAX_SWEEP_INTERVAL;
use concierge_core::{
    EvictionClock, HubConfig, KeyPolicy, OverflowPolicy, QueueConfig, RegistryConfig,
    SweeperConfig, WireFormat,
};
use config::{Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Candidate config file locations, in priority order.
const CONFIG_PATHS: [&str; 3] = [
    "concierge.toml",
    "/etc/concierge/concierge.toml",
    "~/.config/concierge/concierge.toml",
];

/// Upper bound for the heartbeat and sweep intervals.
const MAX_INTERVAL_SECS: u64 = MAX_SWEEP_INTERVAL.as_secs();

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Update hub configuration.
    #[serde(default)]
    pub hub: HubSettings,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Update hub configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubSettings {
    /// Seconds without events before a heartbeat frame is sent.
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,

    /// Seconds between sweeper passes.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Seconds after which the sweeper evicts a channel.
    #[serde(default = "default_max_lifetime_secs")]
    pub max_lifetime_secs: u64,

    /// Timestamp the lifetime is measured from.
    #[serde(default)]
    pub eviction_clock: EvictionClock,

    /// Duplicate subscription handling for guest and session streams.
    #[serde(default)]
    pub key_policy: KeyPolicy,

    /// Frame layout on the wire.
    #[serde(default)]
    pub wire_format: WireFormat,

    /// Maximum number of open streams.
    #[serde(default = "default_max_channels")]
    pub max_channels: usize,

    /// Per-stream queue configuration.
    #[serde(default)]
    pub queue: QueueSettings,
}

/// Per-stream queue configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueSettings {
    /// Maximum queued frames per stream; 0 means unbounded.
    #[serde(default)]
    pub capacity: usize,

    /// What to do when a bounded queue is full.
    #[serde(default)]
    pub overflow: OverflowPolicy,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_true() -> bool {
    true
}

fn default_heartbeat_secs() -> u64 {
    30
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_max_lifetime_secs() -> u64 {
    300
}

fn default_max_channels() -> usize {
    100_000
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            hub: HubSettings::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            heartbeat_secs: default_heartbeat_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            max_lifetime_secs: default_max_lifetime_secs(),
            eviction_clock: EvictionClock::default(),
            key_policy: KeyPolicy::default(),
            wire_format: WireFormat::default(),
            max_channels: default_max_channels(),
            queue: QueueSettings::default(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl HubSettings {
    /// Build the hub configuration.
    ///
    /// Intervals are clamped to between one second and one day.
    #[must_use]
    pub fn to_hub_config(&self) -> HubConfig {
        let queue = match self.queue.capacity {
            0 => QueueConfig::unbounded(),
            capacity => QueueConfig::bounded(capacity, self.queue.overflow),
        };

        HubConfig {
            registry: RegistryConfig {
                key_policy: self.key_policy,
                max_channels: self.max_channels,
                queue,
                wire_format: self.wire_format,
            },
            sweeper: SweeperConfig {
                interval: Duration::from_secs(self.sweep_interval_secs.clamp(1, MAX_INTERVAL_SECS)),
                max_lifetime: Duration::from_secs(self.max_lifetime_secs),
                clock: self.eviction_clock,
            },
            heartbeat_interval: Duration::from_secs(self.heartbeat_secs.clamp(1, MAX_INTERVAL_SECS)),
        }
    }
}

impl Config {
    /// Load configuration from the first config file found, overlaid with
    /// `CONCIERGE__*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or a
    /// value has the wrong type.
    pub fn load() -> Result<Self> {
        Self::build(
            Self::locate(),
            Environment::with_prefix("CONCIERGE")
                .separator("__")
                .try_parsing(true),
        )
    }

    /// Find the config file to use, if any.
    fn locate() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("CONCIERGE_CONFIG") {
            return Some(PathBuf::from(shellexpand::tilde(&path).as_ref()));
        }

        CONFIG_PATHS
            .iter()
            .map(|path| PathBuf::from(shellexpand::tilde(path).as_ref()))
            .find(|path| path.exists())
    }

    fn build(file: Option<PathBuf>, env: Environment) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = &file {
            builder = builder.add_source(Self::file_source(path)?);
        }

        let source = builder
            .add_source(env)
            .build()
            .with_context(|| match &file {
                Some(path) => format!("Failed to read config file: {}", path.display()),
                None => "Failed to read configuration".to_string(),
            })?;

        source
            .try_deserialize()
            .context("Failed to parse configuration")
    }

    fn file_source(path: &Path) -> Result<File<config::FileSourceFile, FileFormat>> {
        let name = path
            .to_str()
            .with_context(|| format!("Config path is not valid UTF-8: {}", path.display()))?;
        Ok(File::with_name(name).format(FileFormat::Toml))
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid host:port {}:{}", self.host, self.port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> Environment {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Environment::with_prefix("CONCIERGE")
            .separator("__")
            .try_parsing(true)
            .source(Some(vars))
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.port, 8000);
        assert_eq!(config.hub.heartbeat_secs, 30);
        assert_eq!(config.hub.key_policy, KeyPolicy::Replace);
        assert!(config.metrics.enabled);
    }

    #[test]
    fn test_config_bind_addr() {
        let config = Config::default();
        assert_eq!(config.bind_addr().unwrap().port(), 8000);

        let bad = Config {
            host: "not a host".to_string(),
            ..Config::default()
        };
        assert!(bad.bind_addr().is_err());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            host = "127.0.0.1"
            port = 9000

            [hub]
            heartbeat_secs = 15
            key_policy = "fanout"
            wire_format = "data_only"

            [hub.queue]
            capacity = 256
            overflow = "disconnect"
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 9000);
        assert_eq!(config.hub.heartbeat_secs, 15);
        assert_eq!(config.hub.key_policy, KeyPolicy::Fanout);
        assert_eq!(config.hub.wire_format, WireFormat::DataOnly);
        assert_eq!(config.hub.max_lifetime_secs, 300);
        assert_eq!(config.hub.queue.overflow, OverflowPolicy::Disconnect);
    }

    #[test]
    fn test_env_overrides() {
        let config = Config::build(
            None,
            env(&[
                ("CONCIERGE__PORT", "9100"),
                ("CONCIERGE__HUB__MAX_LIFETIME_SECS", "600"),
                ("CONCIERGE__METRICS__ENABLED", "false"),
            ]),
        )
        .unwrap();

        assert_eq!(config.port, 9100);
        assert_eq!(config.hub.max_lifetime_secs, 600);
        assert!(!config.metrics.enabled);
        assert_eq!(config.hub.sweep_interval_secs, 60);
    }

    #[test]
    fn test_hub_config_mapping() {
        let mut settings = HubSettings::default();
        let hub = settings.to_hub_config();
        assert_eq!(hub.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(hub.sweeper.max_lifetime, Duration::from_secs(300));
        assert_eq!(hub.registry.queue, QueueConfig::unbounded());

        settings.queue.capacity = 8;
        settings.queue.overflow = OverflowPolicy::DropNewest;
        let hub = settings.to_hub_config();
        assert_eq!(
            hub.registry.queue,
            QueueConfig::bounded(8, OverflowPolicy::DropNewest)
        );
    }

    #[tokio::test]
    async fn test_huge_heartbeat_is_clamped() {
        let config: Config = toml::from_str(
            r#"
            [hub]
            heartbeat_secs = 9223372036854775807
            sweep_interval_secs = 9223372036854775807
        "#,
        )
        .unwrap();

        let hub_config = config.hub.to_hub_config();
        assert_eq!(hub_config.heartbeat_interval, Duration::from_secs(86_400));
        assert_eq!(hub_config.sweeper.interval, Duration::from_secs(86_400));

        let hub = concierge_core::Hub::new(hub_config);
        let subscription = hub.subscribe(concierge_core::TopicClass::Global, None).unwrap();
        hub.notify(concierge_core::TopicClass::Global, None, "rooms_updated", serde_json::json!({}));

        assert!(subscription.next_frame().await.is_some());
    }
}
