//! Client connection status and user-facing notifications

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Connection state reported by an [`crate::EventClient`].
///
/// `Connected` is only ever reported while the client holds a live socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Disconnected,
    Connected,
    Reconnecting,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Disconnected => write!(f, "disconnected"),
            ConnectionStatus::Connected => write!(f, "connected"),
            ConnectionStatus::Reconnecting => write!(f, "reconnecting"),
        }
    }
}

/// Callback fired on every status transition
pub type NotifyFn = Arc<dyn Fn(ConnectionStatus) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
}

impl fmt::Display for NotificationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotificationLevel::Info => write!(f, "info"),
            NotificationLevel::Warning => write!(f, "warning"),
            NotificationLevel::Error => write!(f, "error"),
        }
    }
}

/// Somewhere the UI shows transient messages to the user
pub trait NotificationSink: Send + Sync {
    fn add(&self, level: NotificationLevel, message: String);
}

/// Level and text shown for a status transition
pub fn status_message(status: ConnectionStatus) -> (NotificationLevel, &'static str) {
    match status {
        ConnectionStatus::Connected => (NotificationLevel::Info, "Connected to taskboard daemon"),
        ConnectionStatus::Reconnecting => (
            NotificationLevel::Warning,
            "Connection to taskboard daemon lost, reconnecting...",
        ),
        ConnectionStatus::Disconnected => {
            (NotificationLevel::Error, "Disconnected from taskboard daemon")
        }
    }
}

/// Adapt a notification sink into a status callback for `set_notify_func`
pub fn status_notifier<S>(sink: Arc<S>) -> impl Fn(ConnectionStatus) + Send + Sync + 'static
where
    S: NotificationSink + ?Sized + 'static,
{
    move |status| {
        let (level, message) = status_message(status);
        sink.add(level, message.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        entries: Mutex<Vec<(NotificationLevel, String)>>,
    }

    impl NotificationSink for RecordingSink {
        fn add(&self, level: NotificationLevel, message: String) {
            self.entries.lock().unwrap().push((level, message));
        }
    }

    #[test]
    fn test_notifier_maps_levels() {
        let sink = Arc::new(RecordingSink::default());
        let notify = status_notifier(Arc::clone(&sink));

        notify(ConnectionStatus::Reconnecting);
        notify(ConnectionStatus::Connected);
        notify(ConnectionStatus::Disconnected);

        let entries = sink.entries.lock().unwrap();
        let levels: Vec<_> = entries.iter().map(|(level, _)| *level).collect();
        assert_eq!(
            levels,
            vec![
                NotificationLevel::Warning,
                NotificationLevel::Info,
                NotificationLevel::Error
            ]
        );
        assert!(entries[0].1.contains("reconnecting"));
    }

    #[test]
    fn test_notifier_accepts_trait_object() {
        let sink: Arc<dyn NotificationSink> = Arc::new(RecordingSink::default());
        let notify = status_notifier(sink);
        notify(ConnectionStatus::Connected);
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&ConnectionStatus::Reconnecting).unwrap();
        assert_eq!(json, "\"reconnecting\"");
    }
}
