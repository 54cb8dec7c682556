use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use taskboard_metrics::Metrics;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;

use crate::events::{Event, Subscription};
use crate::protocol::Message;

/// Server-assigned connection identifier
pub type ConnectionId = u64;

/// One live connection: its subscription and outbound queue
pub struct Registration {
    subscription: Option<Subscription>,
    sender: mpsc::Sender<Message>,
}

impl Registration {
    /// A connection that has not subscribed yet receives nothing
    fn wants(&self, event: &Event) -> bool {
        self.subscription
            .map(|subscription| subscription.matches(event))
            .unwrap_or(false)
    }
}

/// Outcome of fanning one event out
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FanOut {
    pub delivered: usize,
    pub dropped: usize,
}

/// Thread-safe registration table
pub struct ClientRegistry {
    clients: RwLock<HashMap<ConnectionId, Registration>>,
    next_id: AtomicU64,
    metrics: Arc<Metrics>,
}

impl ClientRegistry {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            metrics,
        }
    }

    /// Register a new connection with no subscription
    pub async fn register(&self, sender: mpsc::Sender<Message>) -> ConnectionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let mut clients = self.clients.write().await;
        clients.insert(
            id,
            Registration {
                subscription: None,
                sender,
            },
        );
        self.metrics.set_connected_clients(clients.len() as u64);
        tracing::info!("Client {} registered. Total: {}", id, clients.len());
        id
    }

    /// Remove a connection, dropping its outbound queue
    pub async fn unregister(&self, id: ConnectionId) -> bool {
        let mut clients = self.clients.write().await;
        let removed = clients.remove(&id).is_some();
        if removed {
            self.metrics.set_connected_clients(clients.len() as u64);
            tracing::info!("Client {} unregistered. Remaining: {}", id, clients.len());
        }
        removed
    }

    /// Replace a connection's subscription
    pub async fn set_subscription(&self, id: ConnectionId, subscription: Subscription) -> bool {
        let mut clients = self.clients.write().await;
        match clients.get_mut(&id) {
            Some(registration) => {
                registration.subscription = Some(subscription);
                true
            }
            None => false,
        }
    }

    pub async fn subscription(&self, id: ConnectionId) -> Option<Subscription> {
        self.clients
            .read()
            .await
            .get(&id)
            .and_then(|registration| registration.subscription)
    }

    /// Queue `event` for every matching connection except `origin`.
    ///
    /// Never waits on a client: a full queue drops this event for that
    /// client only.
    pub async fn fan_out(&self, event: &Event, origin: Option<ConnectionId>) -> FanOut {
        let clients = self.clients.read().await;
        let mut report = FanOut::default();

        for (id, registration) in clients.iter() {
            if Some(*id) == origin || !registration.wants(event) {
                continue;
            }

            match registration.sender.try_send(Message::event(event.clone())) {
                Ok(()) => {
                    self.metrics.inc_events_sent();
                    report.delivered += 1;
                }
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(
                        "Client {} queue full, dropping event seq {}",
                        id,
                        event.sequence_id
                    );
                    report.dropped += 1;
                }
                Err(TrySendError::Closed(_)) => {
                    // Writer already gone; the reader will unregister it
                    report.dropped += 1;
                }
            }
        }

        report
    }

    /// Best-effort direct reply to one connection
    pub async fn send_to(&self, id: ConnectionId, message: Message) -> bool {
        let clients = self.clients.read().await;
        match clients.get(&id) {
            Some(registration) => registration.sender.try_send(message).is_ok(),
            None => false,
        }
    }

    /// Drop every registration, returning how many there were
    pub async fn clear(&self) -> usize {
        let mut clients = self.clients.write().await;
        let count = clients.len();
        clients.clear();
        self.metrics.set_connected_clients(0);
        count
    }

    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
