// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Event Bus Implementation - Pub/Sub for registry and migration events
//
// Provides in-memory event streaming using tokio broadcast channels.
// Events are lost on restart; LocationDB itself is the durable view.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::domain::events::{MigrationEvent, RegistryEvent};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FerryEvent {
    Registry(RegistryEvent),
    Migration(MigrationEvent),
}

/// Event bus for publishing and subscribing to coordinator events
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<FerryEvent>>,
}

impl EventBus {
    /// Capacity determines how many events can be buffered before dropping old ones
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }

    pub fn publish_registry_event(&self, event: RegistryEvent) {
        self.publish(FerryEvent::Registry(event));
    }

    pub fn publish_migration_event(&self, event: MigrationEvent) {
        self.publish(FerryEvent::Migration(event));
    }

    fn publish(&self, event: FerryEvent) {
        debug!("Publishing event: {:?}", event);

        // send() fails only when nobody is subscribed
        if self.sender.send(event).is_err() {
            debug!("No subscribers listening to event");
        }
    }

    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

pub struct EventReceiver {
    receiver: broadcast::Receiver<FerryEvent>,
}

impl EventReceiver {
    /// Receive the next event (waits until one is available)
    pub async fn recv(&mut self) -> Result<FerryEvent, EventBusError> {
        self.receiver.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Closed => EventBusError::Closed,
            broadcast::error::RecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }

    pub fn try_recv(&mut self) -> Result<FerryEvent, EventBusError> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => EventBusError::Empty,
            broadcast::error::TryRecvError::Closed => EventBusError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EventBusError {
    #[error("Event bus closed")]
    Closed,
    #[error("Receiver lagged by {0} events")]
    Lagged(u64),
    #[error("No events available")]
    Empty,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::rank::{Location, Rank};
    use chrono::Utc;

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        bus.publish_registry_event(RegistryEvent::ContainerRegistered {
            rank: Rank(1),
            location: Location::new("node-a"),
            registered_at: Utc::now(),
        });

        match rx.recv().await.unwrap() {
            FerryEvent::Registry(RegistryEvent::ContainerRegistered { rank, .. }) => {
                assert_eq!(rank, Rank(1))
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(rx.try_recv().unwrap_err(), EventBusError::Empty);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_harmless() {
        let bus = EventBus::with_default_capacity();
        bus.publish_registry_event(RegistryEvent::NymphUnregistered {
            location: Location::new("node-a"),
            unregistered_at: Utc::now(),
        });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_lagging_receiver() {
        let bus = EventBus::new(1);
        let mut rx = bus.subscribe();
        for n in 0..3 {
            bus.publish_registry_event(RegistryEvent::NymphRegistered {
                location: Location::new(format!("n{}", n)),
                slot: n,
                registered_at: Utc::now(),
            });
        }
        assert!(matches!(rx.try_recv(), Err(EventBusError::Lagged(_))));
    }
}
