//! # Concierge Server
//!
//! Server-Sent Events gateway for the Concierge real-time update hub.
//!
//! The binary wires configuration, tracing and metrics around [`handlers::router`].
//! Services that change hotel data publish through [`notifier::HotelNotifier`].

pub mod config;
pub mod handlers;
pub mod metrics;
pub mod notifier;

pub use config::Config;
pub use handlers::{router, run_server, AppState};
pub use notifier::HotelNotifier;
