//! Local change-event broadcaster for the taskboard UI
//!
//! A daemon owns a Unix socket and fans out small "something changed"
//! events to every connected UI process. Clients subscribe to one project
//! (or to all of them with project id `0`) and reload their view when a
//! matching event arrives. Events carry no payload beyond their kind and
//! project; receivers re-read the board themselves.
//!
//! # Wire format
//!
//! Newline-delimited JSON, one [`Message`] per line, each tagged with
//! `version` and `type`:
//!
//! ```text
//! {"version":1,"type":"subscribe","subscribe":{"project_id":3}}
//! {"version":1,"type":"event","event":{"type":"task_changed","project_id":3,"timestamp":"...","sequence_id":7}}
//! ```
//!
//! # Guarantees
//!
//! - Sequence ids are assigned by the server, start at 1 and increase by
//!   one per broadcast.
//! - Each client sees matching events in sequence order.
//! - A slow client loses events (its queue is full) without holding up
//!   anyone else.
//! - A slow UI loses its oldest undelivered events, never the newest.
//! - Delivery is best effort. There is no replay after a reconnect.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use taskboard_events::{CancellationToken, Event, EventClient, EventServer, EventType, QueueConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let socket = taskboard_paths::get_event_socket_path()?;
//!     let server = Arc::new(EventServer::new(&socket, QueueConfig::from_env())?);
//!     let cancel = CancellationToken::new();
//!     tokio::spawn(Arc::clone(&server).start(cancel.clone()));
//!
//!     let client = EventClient::new(&socket);
//!     client.connect().await?;
//!     client.subscribe(3).await?;
//!     let mut events = client.listen(cancel.clone()).await?;
//!
//!     server.broadcast(Event::new(EventType::TaskChanged, 3)).await?;
//!     if let Some(event) = events.recv().await {
//!         println!("project {} changed (seq {})", event.project_id, event.sequence_id);
//!     }
//!
//!     cancel.cancel();
//!     client.close().await?;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod delivery;
pub mod error;
pub mod events;
pub mod protocol;
pub mod reconnect;
pub mod registry;
pub mod server;
pub mod status;

// Re-exports
pub use client::EventClient;
pub use config::{ClientConfig, QueueConfig};
pub use delivery::{event_channel, EventReceiver, EventSender};
pub use error::{EventsError, Result};
pub use events::{Event, EventType, Subscription, ALL_PROJECTS};
pub use protocol::{Message, Payload, MAX_LINE_BYTES, PROTOCOL_VERSION};
pub use reconnect::{Backoff, ReconnectPolicy};
pub use server::{EventServer, ServerState};
pub use status::{
    status_message, status_notifier, ConnectionStatus, NotificationLevel, NotificationSink,
    NotifyFn,
};
pub use tokio_util::sync::CancellationToken;
