//! Atomic counters for the event daemon

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use crate::models::{format_uptime, MetricsSnapshot};

/// Process-wide metrics, safe to share across tasks and threads.
#[derive(Debug)]
pub struct Metrics {
    events_sent: AtomicU64,
    events_received: AtomicU64,
    reconnections: AtomicU64,
    refreshes_total: AtomicU64,
    connected_clients: AtomicU64,
    start_time: DateTime<Utc>,
    started: Instant,
}

impl Metrics {
    /// Create a fresh set of counters starting now
    pub fn new() -> Self {
        Self {
            events_sent: AtomicU64::new(0),
            events_received: AtomicU64::new(0),
            reconnections: AtomicU64::new(0),
            refreshes_total: AtomicU64::new(0),
            connected_clients: AtomicU64::new(0),
            start_time: Utc::now(),
            started: Instant::now(),
        }
    }

    pub fn inc_events_sent(&self) {
        self.events_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_events_received(&self) {
        self.events_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_reconnections(&self) {
        self.reconnections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_refreshes_total(&self) {
        self.refreshes_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Set the connected-client gauge
    pub fn set_connected_clients(&self, n: u64) {
        self.connected_clients.store(n, Ordering::Relaxed);
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    /// Copy every counter into an owned snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events_sent: self.events_sent.load(Ordering::Relaxed),
            events_received: self.events_received.load(Ordering::Relaxed),
            reconnections: self.reconnections.load(Ordering::Relaxed),
            refreshes_total: self.refreshes_total.load(Ordering::Relaxed),
            connected_clients: self.connected_clients.load(Ordering::Relaxed),
            start_time: self.start_time,
            uptime: format_uptime(self.started.elapsed()),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL: OnceLock<Arc<Metrics>> = OnceLock::new();

/// Shared metrics instance for the whole process.
///
/// Servers and clients use this unless they were handed their own instance.
pub fn global() -> Arc<Metrics> {
    Arc::clone(GLOBAL.get_or_init(|| Arc::new(Metrics::new())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_new_metrics_are_zero() {
        let metrics = Metrics::new();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.events_sent, 0);
        assert_eq!(snapshot.events_received, 0);
        assert_eq!(snapshot.reconnections, 0);
        assert_eq!(snapshot.refreshes_total, 0);
        assert_eq!(snapshot.connected_clients, 0);
        assert_eq!(snapshot.start_time, metrics.start_time());
    }

    #[test]
    fn test_concurrent_increments() {
        const THREADS: u64 = 8;
        const PER_THREAD: u64 = 1000;

        let metrics = Metrics::new();
        thread::scope(|scope| {
            for _ in 0..THREADS {
                scope.spawn(|| {
                    for _ in 0..PER_THREAD {
                        metrics.inc_events_sent();
                        metrics.inc_events_received();
                        metrics.inc_reconnections();
                        metrics.inc_refreshes_total();
                    }
                });
            }
        });

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.events_sent, THREADS * PER_THREAD);
        assert_eq!(snapshot.events_received, THREADS * PER_THREAD);
        assert_eq!(snapshot.reconnections, THREADS * PER_THREAD);
        assert_eq!(snapshot.refreshes_total, THREADS * PER_THREAD);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_increments_from_tasks() {
        let metrics = Arc::new(Metrics::new());
        let mut handles = Vec::new();

        for _ in 0..16 {
            let metrics = Arc::clone(&metrics);
            handles.push(tokio::spawn(async move {
                for _ in 0..250 {
                    metrics.inc_events_sent();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(metrics.snapshot().events_sent, 16 * 250);
    }

    #[test]
    fn test_snapshot_is_not_retroactive() {
        let metrics = Metrics::new();
        metrics.inc_events_sent();
        metrics.set_connected_clients(3);

        let before = metrics.snapshot();
        metrics.inc_events_sent();
        metrics.inc_events_sent();
        metrics.set_connected_clients(1);

        assert_eq!(before.events_sent, 1);
        assert_eq!(before.connected_clients, 3);

        let after = metrics.snapshot();
        assert_eq!(after.events_sent, 3);
        assert_eq!(after.connected_clients, 1);
    }

    #[test]
    fn test_gauge_goes_down() {
        let metrics = Metrics::new();
        metrics.set_connected_clients(5);
        metrics.set_connected_clients(2);
        assert_eq!(metrics.snapshot().connected_clients, 2);
    }

    #[test]
    fn test_global_is_shared() {
        let a = global();
        let b = global();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
