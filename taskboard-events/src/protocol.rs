//! Wire protocol shared by the event server and its clients.
//!
//! Every message is one line of JSON:
//!
//! ```text
//! {"version":1,"type":"subscribe","subscribe":{"project_id":3}}
//! {"version":1,"type":"event","event":{"type":"task_changed","project_id":3,"timestamp":"...","sequence_id":7}}
//! {"version":1,"type":"ping"}
//! {"version":1,"type":"status"}
//! ```

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use taskboard_metrics::MetricsSnapshot;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};

use crate::error::{EventsError, Result};
use crate::events::{Event, Subscription};

/// Version tag carried by every message
pub const PROTOCOL_VERSION: u32 = 1;

/// Longest accepted line, newline excluded
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Envelope for everything sent over the socket
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Message {
    pub version: u32,

    #[serde(flatten)]
    pub payload: Payload,
}

/// Typed message body, tagged by `type`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    /// Replace the connection's subscription
    Subscribe { subscribe: Subscription },

    /// Change notification, in either direction
    Event { event: Event },

    /// Keepalive; the server answers with a ping of its own
    Ping,

    /// Metrics request (no body) or reply (with body)
    Status {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<MetricsSnapshot>,
    },
}

impl Message {
    fn new(payload: Payload) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            payload,
        }
    }

    pub fn subscribe(subscription: Subscription) -> Self {
        Self::new(Payload::Subscribe {
            subscribe: subscription,
        })
    }

    pub fn event(event: Event) -> Self {
        Self::new(Payload::Event { event })
    }

    pub fn ping() -> Self {
        Self::new(Payload::Ping)
    }

    pub fn status_request() -> Self {
        Self::new(Payload::Status { status: None })
    }

    pub fn status_reply(snapshot: MetricsSnapshot) -> Self {
        Self::new(Payload::Status {
            status: Some(snapshot),
        })
    }

    /// Short name of the message type, for logs
    pub fn kind(&self) -> &'static str {
        match self.payload {
            Payload::Subscribe { .. } => "subscribe",
            Payload::Event { .. } => "event",
            Payload::Ping => "ping",
            Payload::Status { .. } => "status",
        }
    }

    /// Serialize to a single JSON line without the trailing newline
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Serialize to JSON with a trailing newline
    pub fn to_json_line(&self) -> Result<String> {
        let json = self.encode()?;
        Ok(format!("{}\n", json))
    }

    /// Parse one line and check version and project ids
    pub fn decode(line: &str) -> Result<Self> {
        let message: Message = serde_json::from_str(line)?;

        if message.version != PROTOCOL_VERSION {
            return Err(EventsError::VersionMismatch {
                expected: PROTOCOL_VERSION,
                found: message.version,
            });
        }

        match &message.payload {
            Payload::Subscribe { subscribe } => subscribe.validate()?,
            Payload::Event { event } => event.validate()?,
            Payload::Ping | Payload::Status { .. } => {}
        }

        Ok(message)
    }
}

pub type MessageReader<R> = FramedRead<R, LinesCodec>;
pub type MessageWriter<W> = FramedWrite<W, LinesCodec>;

/// Frame a byte stream into protocol lines
pub fn message_reader<R: AsyncRead>(inner: R) -> MessageReader<R> {
    FramedRead::new(inner, LinesCodec::new_with_max_length(MAX_LINE_BYTES))
}

pub fn message_writer<W: AsyncWrite>(inner: W) -> MessageWriter<W> {
    FramedWrite::new(inner, LinesCodec::new_with_max_length(MAX_LINE_BYTES))
}

/// Read the next message, skipping blank lines.
///
/// Returns `Ok(None)` on a clean end of stream. Cancel safe: the only await
/// point is the framed stream's `next`.
pub async fn next_message<R>(reader: &mut MessageReader<R>) -> Result<Option<Message>>
where
    R: AsyncRead + Unpin,
{
    loop {
        match reader.next().await {
            None => return Ok(None),
            Some(Err(e)) => return Err(e.into()),
            Some(Ok(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                return Message::decode(&line).map(Some);
            }
        }
    }
}

/// Write one message and flush it
pub async fn send_message<W>(writer: &mut MessageWriter<W>, message: &Message) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let line = message.encode()?;
    writer.send(line).await?;
    Ok(())
}
