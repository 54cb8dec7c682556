//! Data models for metrics reporting

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Point-in-time copy of every counter.
///
/// Owned values only, so later increments on the live [`crate::Metrics`]
/// never show up in a snapshot that was already taken.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub events_sent: u64,
    pub events_received: u64,
    pub reconnections: u64,
    pub refreshes_total: u64,
    pub connected_clients: u64,
    pub start_time: DateTime<Utc>,

    /// Human readable time since `start_time`, e.g. `1h2m3s`
    pub uptime: String,
}

impl MetricsSnapshot {
    /// Render as pretty JSON for the status command
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Format a duration as hours, minutes and seconds (`45s`, `3m12s`, `2h0m5s`).
pub fn format_uptime(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;

    if hours > 0 {
        format!("{}h{}m{}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m{}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_uptime() {
        assert_eq!(format_uptime(Duration::from_secs(0)), "0s");
        assert_eq!(format_uptime(Duration::from_millis(45_900)), "45s");
        assert_eq!(format_uptime(Duration::from_secs(192)), "3m12s");
        assert_eq!(format_uptime(Duration::from_secs(7205)), "2h0m5s");
    }

    #[test]
    fn test_snapshot_serialization() {
        let snapshot = MetricsSnapshot {
            events_sent: 3,
            events_received: 2,
            reconnections: 1,
            refreshes_total: 4,
            connected_clients: 2,
            start_time: Utc::now(),
            uptime: "5s".to_string(),
        };

        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains("\"events_sent\":3"));
        assert!(json.contains("\"uptime\":\"5s\""));

        let parsed: MetricsSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, snapshot);
    }
}
