//! Hotel change notifications.
//!
//! CRUD handlers call these after a successful write. Guest and reservation
//! events go to the guest's entity topic; room list changes go to everyone
//! on the global topic.

use crate::metrics;
use concierge_core::{Delivery, Hub, TopicClass};
use serde::Serialize;
use serde_json::json;
use std::fmt::Display;
use std::sync::Arc;
use tracing::{info, warn};

/// Event names.
pub mod events {
    pub const GUEST_CREATED: &str = "guest_created";
    pub const GUEST_UPDATED: &str = "guest_updated";
    pub const ROOMS_UPDATED: &str = "rooms_updated";
    pub const RESERVATION_CREATED: &str = "reservation_created";
    pub const RESERVATION_UPDATED: &str = "reservation_updated";
    pub const RESERVATION_CANCELLED: &str = "reservation_cancelled";
}

/// Publishes hotel domain changes to the hub.
#[derive(Clone)]
pub struct HotelNotifier {
    hub: Arc<Hub>,
}

impl HotelNotifier {
    /// Create a notifier over a hub.
    #[must_use]
    pub fn new(hub: Arc<Hub>) -> Self {
        Self { hub }
    }

    /// A guest was created.
    ///
    /// When the guest was created from a chat session, the session's stream
    /// is moved onto the guest's entity topic first so that it receives this
    /// and every later guest event.
    pub fn guest_created<G: Serialize>(
        &self,
        guest_id: impl Display,
        guest: &G,
        session_id: Option<&str>,
    ) -> Delivery {
        let guest_id = guest_id.to_string();

        if let Some(session_id) = session_id {
            match self.hub.registry().rebind(
                TopicClass::Session,
                session_id,
                TopicClass::Entity,
                &guest_id,
            ) {
                Ok(0) => {}
                Ok(moved) => {
                    info!(session = %session_id, guest = %guest_id, moved, "Session stream now follows guest");
                }
                Err(e) => {
                    warn!(session = %session_id, guest = %guest_id, error = %e, "Failed to rebind session stream");
                }
            }
        }

        self.entity(&guest_id, events::GUEST_CREATED, guest)
    }

    /// A guest was updated.
    pub fn guest_updated<G: Serialize>(&self, guest_id: impl Display, guest: &G) -> Delivery {
        self.entity(&guest_id.to_string(), events::GUEST_UPDATED, guest)
    }

    /// The room list changed.
    pub fn rooms_updated<R: Serialize>(&self, rooms: &[R]) -> Delivery {
        let delivery = self
            .hub
            .notify(TopicClass::Global, None, events::ROOMS_UPDATED, json!({ "rooms": rooms }));
        metrics::record_event(TopicClass::Global, delivery.delivered);
        delivery
    }

    /// A reservation was made for a guest.
    pub fn reservation_created<R: Serialize>(
        &self,
        guest_id: impl Display,
        reservation: &R,
    ) -> Delivery {
        self.entity(&guest_id.to_string(), events::RESERVATION_CREATED, reservation)
    }

    /// A guest's reservation changed.
    pub fn reservation_updated<R: Serialize>(
        &self,
        guest_id: impl Display,
        reservation: &R,
    ) -> Delivery {
        self.entity(&guest_id.to_string(), events::RESERVATION_UPDATED, reservation)
    }

    /// A guest's reservation was cancelled.
    pub fn reservation_cancelled<R: Serialize>(
        &self,
        guest_id: impl Display,
        reservation: &R,
    ) -> Delivery {
        self.entity(&guest_id.to_string(), events::RESERVATION_CANCELLED, reservation)
    }

    fn entity<P: Serialize>(&self, guest_id: &str, event_type: &str, payload: &P) -> Delivery {
        let delivery = self
            .hub
            .notify(TopicClass::Entity, Some(guest_id), event_type, payload);
        metrics::record_event(TopicClass::Entity, delivery.delivered);
        delivery
    }
}
