//! Transient user-facing notifications

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::Notify;

use taskboard_events::{NotificationLevel, NotificationSink};

/// Entries kept before the oldest is discarded
pub const DEFAULT_CAPACITY: usize = 32;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub level: NotificationLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Bounded notification list shared between the event client and the UI
pub struct NotificationState {
    entries: Mutex<VecDeque<Notification>>,
    capacity: usize,
    changed: Notify,
}

impl NotificationState {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            changed: Notify::new(),
        }
    }

    /// Most recent entry, if any
    pub fn latest(&self) -> Option<Notification> {
        self.lock().back().cloned()
    }

    /// Take every entry, oldest first
    pub fn drain(&self) -> Vec<Notification> {
        self.lock().drain(..).collect()
    }

    /// Resolves once an entry has been added since the last wake-up
    pub async fn changed(&self) {
        self.changed.notified().await
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Notification>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for NotificationState {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationSink for NotificationState {
    fn add(&self, level: NotificationLevel, message: String) {
        match level {
            NotificationLevel::Info => tracing::info!("{}", message),
            NotificationLevel::Warning => tracing::warn!("{}", message),
            NotificationLevel::Error => tracing::error!("{}", message),
        }

        {
            let mut entries = self.lock();
            if entries.len() == self.capacity {
                entries.pop_front();
            }
            entries.push_back(Notification {
                level,
                message,
                timestamp: Utc::now(),
            });
        }
        self.changed.notify_one();
    }
}
