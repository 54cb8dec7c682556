//! Queue sizing and client settings

use std::time::Duration;

use crate::reconnect::ReconnectPolicy;

/// Environment variable for the shared broadcast queue capacity
pub const BROADCAST_BUFFER_ENV: &str = "TASKBOARD_BROADCAST_BUFFER";

/// Environment variable for each client's outbound queue capacity
pub const CLIENT_BUFFER_ENV: &str = "TASKBOARD_CLIENT_BUFFER";

pub const DEFAULT_BROADCAST_BUFFER: usize = 256;
pub const DEFAULT_CLIENT_BUFFER: usize = 64;

/// Server queue capacities
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    /// Capacity of the fan-out queue in front of the dispatcher
    pub broadcast_buffer: usize,

    /// Capacity of each registration's outbound queue
    pub client_buffer: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            broadcast_buffer: DEFAULT_BROADCAST_BUFFER,
            client_buffer: DEFAULT_CLIENT_BUFFER,
        }
    }
}

impl QueueConfig {
    /// Defaults overridden by the process environment
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply `TASKBOARD_*_BUFFER` overrides found through `lookup`.
    ///
    /// Values that are not positive integers are ignored with a warning.
    pub fn with_overrides<F>(self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            broadcast_buffer: parse_buffer(BROADCAST_BUFFER_ENV, &lookup)
                .unwrap_or(self.broadcast_buffer),
            client_buffer: parse_buffer(CLIENT_BUFFER_ENV, &lookup).unwrap_or(self.client_buffer),
        }
    }
}

fn parse_buffer<F>(key: &str, lookup: &F) -> Option<usize>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<usize>() {
        Ok(0) => {
            tracing::warn!("{} must be positive, ignoring", key);
            None
        }
        Ok(n) => Some(n),
        Err(e) => {
            tracing::warn!("Ignoring invalid {}={:?}: {}", key, raw, e);
            None
        }
    }
}

/// Client connection settings
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// How long a dial may take before failing
    pub connect_timeout: Duration,

    /// Capacity of the channel handed to the UI by `listen`
    pub event_buffer: usize,

    /// Ping interval while listening; `None` disables heartbeats
    pub heartbeat_interval: Option<Duration>,

    pub reconnect: ReconnectPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(2),
            event_buffer: 64,
            heartbeat_interval: Some(Duration::from_secs(30)),
            reconnect: ReconnectPolicy::default(),
        }
    }
}
