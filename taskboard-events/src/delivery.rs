//! Bounded event channel between a client's background reader and its UI.
//!
//! Unlike `mpsc`, a full channel keeps the newest event and discards the
//! oldest pending one, so the UI always ends up with the latest sequence id.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::events::Event;

struct Shared {
    queue: Mutex<VecDeque<Event>>,
    capacity: usize,
    ready: Notify,
    sender_dropped: AtomicBool,
    receiver_dropped: CancellationToken,
}

impl Shared {
    fn queue(&self) -> MutexGuard<'_, VecDeque<Event>> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Create a channel holding at most `capacity` undelivered events
pub fn event_channel(capacity: usize) -> (EventSender, EventReceiver) {
    let capacity = capacity.max(1);
    let shared = Arc::new(Shared {
        queue: Mutex::new(VecDeque::with_capacity(capacity)),
        capacity,
        ready: Notify::new(),
        sender_dropped: AtomicBool::new(false),
        receiver_dropped: CancellationToken::new(),
    });
    (
        EventSender {
            shared: Arc::clone(&shared),
        },
        EventReceiver { shared },
    )
}

pub struct EventSender {
    shared: Arc<Shared>,
}

impl EventSender {
    /// Queue `event`, returning the oldest pending event if it had to make room
    pub fn push(&self, event: Event) -> Option<Event> {
        let superseded = {
            let mut queue = self.shared.queue();
            let oldest = if queue.len() >= self.shared.capacity {
                queue.pop_front()
            } else {
                None
            };
            queue.push_back(event);
            oldest
        };
        self.shared.ready.notify_one();
        superseded
    }

    /// Resolves once the receiver has been dropped
    pub async fn closed(&self) {
        self.shared.receiver_dropped.cancelled().await
    }

    pub fn is_closed(&self) -> bool {
        self.shared.receiver_dropped.is_cancelled()
    }
}

impl Drop for EventSender {
    fn drop(&mut self) {
        self.shared.sender_dropped.store(true, Ordering::SeqCst);
        self.shared.ready.notify_one();
    }
}

/// UI side of an [`event_channel`]
pub struct EventReceiver {
    shared: Arc<Shared>,
}

impl EventReceiver {
    /// Next event, or `None` once the sender is gone and the queue is empty
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            if let Some(event) = self.try_recv() {
                return Some(event);
            }
            if self.shared.sender_dropped.load(Ordering::SeqCst) {
                // Sender may have pushed right before dropping
                return self.try_recv();
            }
            self.shared.ready.notified().await;
        }
    }

    pub fn try_recv(&mut self) -> Option<Event> {
        self.shared.queue().pop_front()
    }

    /// Events waiting to be received
    pub fn len(&self) -> usize {
        self.shared.queue().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for EventReceiver {
    fn drop(&mut self) {
        self.shared.receiver_dropped.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventType;
    use std::time::Duration;

    fn event(sequence_id: u64) -> Event {
        let mut event = Event::new(EventType::TaskChanged, 1);
        event.sequence_id = sequence_id;
        event
    }

    #[tokio::test]
    async fn test_full_channel_supersedes_oldest() {
        let (tx, mut rx) = event_channel(2);

        assert!(tx.push(event(1)).is_none());
        assert!(tx.push(event(2)).is_none());
        assert_eq!(tx.push(event(3)).map(|e| e.sequence_id), Some(1));

        assert_eq!(rx.len(), 2);
        assert_eq!(rx.recv().await.unwrap().sequence_id, 2);
        assert_eq!(rx.recv().await.unwrap().sequence_id, 3);
        assert!(rx.is_empty());
    }

    #[tokio::test]
    async fn test_recv_wakes_on_push() {
        let (tx, mut rx) = event_channel(4);

        let pusher = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            tx.push(event(7));
            tx
        });

        let received = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap();
        assert_eq!(received.unwrap().sequence_id, 7);
        drop(pusher.await.unwrap());
    }

    #[tokio::test]
    async fn test_drained_then_closed_when_sender_dropped() {
        let (tx, mut rx) = event_channel(4);
        tx.push(event(1));
        drop(tx);

        assert_eq!(rx.recv().await.unwrap().sequence_id, 1);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_sender_sees_receiver_drop() {
        let (tx, rx) = event_channel(1);
        assert!(!tx.is_closed());

        drop(rx);
        tokio::time::timeout(Duration::from_secs(1), tx.closed())
            .await
            .unwrap();
        assert!(tx.is_closed());
    }
}
