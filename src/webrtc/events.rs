//! Lifecycle notifications for the embedding application
//!
//! One handler per event name: registering again replaces the previous one.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::types::PeerId;

/// Names accepted by [`EventBus::on`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventName {
    PeerJoined,
    PeerLeft,
    PeerUpdated,
}

impl EventName {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventName::PeerJoined => "peer-joined",
            EventName::PeerLeft => "peer-left",
            EventName::PeerUpdated => "peer-updated",
        }
    }
}

impl std::fmt::Display for EventName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A lifecycle notification
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    Joined(PeerId),
    Left(PeerId),
    Updated(PeerId, serde_json::Value),
}

impl PeerEvent {
    pub fn name(&self) -> EventName {
        match self {
            PeerEvent::Joined(_) => EventName::PeerJoined,
            PeerEvent::Left(_) => EventName::PeerLeft,
            PeerEvent::Updated(..) => EventName::PeerUpdated,
        }
    }

    pub fn peer_id(&self) -> &PeerId {
        match self {
            PeerEvent::Joined(id) | PeerEvent::Left(id) | PeerEvent::Updated(id, _) => id,
        }
    }
}

type Handler = Arc<dyn Fn(&PeerEvent) + Send + Sync>;

/// Named single-subscriber callback registry
#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<HashMap<EventName, Handler>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `name`, replacing any previous handler
    pub fn on<F>(&self, name: EventName, handler: F)
    where
        F: Fn(&PeerEvent) + Send + Sync + 'static,
    {
        if let Ok(mut handlers) = self.handlers.write() {
            handlers.insert(name, Arc::new(handler));
        }
    }

    /// Invoke the handler for this event's name, if any
    pub fn emit(&self, event: &PeerEvent) {
        // Clone out so a handler may call `on` without deadlocking
        let handler = self
            .handlers
            .read()
            .ok()
            .and_then(|h| h.get(&event.name()).cloned());
        if let Some(handler) = handler {
            handler(event);
        }
    }
}
