//! Taskboard event daemon metrics
//!
//! Lock-free counters shared by the event server, its clients, and the board
//! refresh glue. Every mutation is a single atomic operation, so connection
//! handlers never contend with a status reader.
//!
//! ## Counters
//!
//! - `events_sent` - per-client deliveries queued by the server
//! - `events_received` - events read off the wire
//! - `reconnections` - successful client re-dials
//! - `refreshes_total` - board reloads triggered by events
//! - `connected_clients` - live gauge of registered connections

pub mod counters;
pub mod models;

// Re-export main types
pub use counters::{global, Metrics};
pub use models::{format_uptime, MetricsSnapshot};
