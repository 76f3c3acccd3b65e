//! # concierge-core
//!
//! Publish/subscribe hub that pushes change notifications to long-lived
//! event streams without polling the database.
//!
//! This crate provides the building blocks:
//!
//! - **Topic** - Topic classes (entity, session, global) and client ids
//! - **ClientChannel** - Per-subscriber queue with heartbeat fallback
//! - **TopicRegistry** - Maps (topic class, key) to channels
//! - **Broadcaster** - Encodes an event once and fans it out
//! - **Sweeper** - Background eviction of closed and expired channels
//! - **Subscription** - Stream of encoded frames that cleans up on drop
//! - **Hub** - Owns all of the above
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  notify  ┌─────────────┐  lookup  ┌───────────────┐
//! │ CRUD handler │─────────▶│ Broadcaster │─────────▶│ TopicRegistry │◀── Sweeper
//! └──────────────┘          └─────────────┘          └───────────────┘
//!                                  │ send                    │ register
//!                                  ▼                         ▼
//!                          ┌───────────────┐  receive ┌──────────────┐
//!                          │ ClientChannel │─────────▶│ Subscription │──▶ event stream
//!                          └───────────────┘          └──────────────┘
//! ```
//!
//! The hub knows nothing about the records it announces: every event is an
//! opaque name plus a JSON payload.

pub mod broadcaster;
pub mod channel;
pub mod hub;
pub mod registry;
pub mod subscription;
pub mod sweeper;
pub mod topic;

pub use broadcaster::{Broadcaster, Delivery};
pub use channel::{ClientChannel, OverflowPolicy, QueueConfig};
pub use concierge_protocol::{EventFrame, WireFormat};
pub use hub::{Hub, HubConfig};
pub use registry::{Binding, HubStats, KeyPolicy, RegistryConfig, RegistryError, TopicRegistry};
pub use subscription::Subscription;
pub use sweeper::{EvictionClock, SweepReport, SweeperConfig};
pub use topic::{ClientId, ParseTopicError, TopicClass};
