use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};

use futures::SinkExt;
use taskboard_metrics::{Metrics, MetricsSnapshot};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::Mutex;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::ClientConfig;
use crate::delivery::{self, EventReceiver, EventSender};
use crate::error::{EventsError, Result};
use crate::events::{Event, Subscription};
use crate::protocol::{self, Message, MessageReader, MessageWriter, Payload};
use crate::status::{ConnectionStatus, NotifyFn};

type Reader = MessageReader<OwnedReadHalf>;
type Writer = MessageWriter<OwnedWriteHalf>;

/// Why a read loop ended
enum ReadOutcome {
    /// Closed, cancelled, or the UI dropped its receiver
    Stopped,
    /// The connection broke and should be re-established
    Lost(EventsError),
}

/// Connection to the event daemon, as seen from a UI process.
///
/// Cheap to clone; clones share the same connection.
#[derive(Clone)]
pub struct EventClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    socket_path: PathBuf,
    config: ClientConfig,
    writer: Mutex<Option<Writer>>,
    reader: Mutex<Option<Reader>>,
    status: StdMutex<ConnectionStatus>,
    subscription: StdMutex<Option<Subscription>>,
    notify: StdRwLock<Option<NotifyFn>>,
    listening: AtomicBool,
    closed: CancellationToken,
    metrics: Arc<Metrics>,
}

impl EventClient {
    /// Client for the daemon at `socket_path`. Does not connect yet.
    pub fn new(socket_path: impl AsRef<Path>) -> Self {
        Self::with_config(socket_path, ClientConfig::default())
    }

    pub fn with_config(socket_path: impl AsRef<Path>, config: ClientConfig) -> Self {
        Self::with_metrics(socket_path, config, taskboard_metrics::global())
    }

    pub fn with_metrics(
        socket_path: impl AsRef<Path>,
        config: ClientConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                socket_path: socket_path.as_ref().to_path_buf(),
                config,
                writer: Mutex::new(None),
                reader: Mutex::new(None),
                status: StdMutex::new(ConnectionStatus::Disconnected),
                subscription: StdMutex::new(None),
                notify: StdRwLock::new(None),
                listening: AtomicBool::new(false),
                closed: CancellationToken::new(),
                metrics,
            }),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.inner.socket_path
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner.status()
    }

    /// Last project passed to [`Self::subscribe`]
    pub fn subscription(&self) -> Option<i64> {
        self.inner
            .current_subscription()
            .map(|subscription| subscription.project_id)
    }

    pub fn is_listening(&self) -> bool {
        self.inner.listening.load(Ordering::SeqCst)
    }

    /// Register a callback for connection status transitions
    pub fn set_notify_func<F>(&self, notify: F)
    where
        F: Fn(ConnectionStatus) + Send + Sync + 'static,
    {
        let mut slot = self
            .inner
            .notify
            .write()
            .unwrap_or_else(|e| e.into_inner());
        *slot = Some(Arc::new(notify));
    }

    /// Dial the daemon, failing after `connect_timeout`.
    ///
    /// A subscription requested before connecting is sent right away.
    pub async fn connect(&self) -> Result<()> {
        if self.inner.closed.is_cancelled() {
            return Err(EventsError::Closed);
        }
        // A listening client reconnects on its own
        if self.is_listening() || self.inner.writer.lock().await.is_some() {
            return Ok(());
        }

        let stream = self.inner.dial().await?;
        let reader = self.inner.install(stream).await;
        *self.inner.reader.lock().await = Some(reader);
        self.inner.transition(ConnectionStatus::Connected);
        tracing::info!("Connected to event daemon at {:?}", self.inner.socket_path);

        if let Some(subscription) = self.inner.current_subscription() {
            self.inner.send(&Message::subscribe(subscription)).await?;
        }
        Ok(())
    }

    /// Replace the subscription with `project_id` (0 for every project).
    ///
    /// The project is remembered even when sending fails, and is restored
    /// after a reconnect.
    pub async fn subscribe(&self, project_id: i64) -> Result<()> {
        let subscription = Subscription::new(project_id)?;
        *self
            .inner
            .subscription
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(subscription);
        self.inner.send(&Message::subscribe(subscription)).await
    }

    /// Start the background reader and hand back its event channel.
    ///
    /// The channel closes when `cancel` fires or the client is closed. When
    /// the UI falls behind, the oldest undelivered event is discarded.
    pub async fn listen(&self, cancel: CancellationToken) -> Result<EventReceiver> {
        if self.inner.closed.is_cancelled() {
            return Err(EventsError::Closed);
        }
        if self.inner.listening.swap(true, Ordering::SeqCst) {
            return Err(EventsError::AlreadyListening);
        }

        let reader = self.inner.reader.lock().await.take();
        let Some(reader) = reader else {
            self.inner.listening.store(false, Ordering::SeqCst);
            return Err(EventsError::NotConnected);
        };

        let (tx, rx) = delivery::event_channel(self.inner.config.event_buffer);
        tokio::spawn(Arc::clone(&self.inner).run_listener(reader, tx, cancel));
        Ok(rx)
    }

    /// Send a client-originated event for the daemon to rebroadcast
    pub async fn send_event(&self, event: Event) -> Result<()> {
        event.validate()?;
        if self.status() != ConnectionStatus::Connected {
            return Err(EventsError::NotConnected);
        }
        self.inner.send(&Message::event(event)).await
    }

    pub async fn ping(&self) -> Result<()> {
        self.inner.send(&Message::ping()).await
    }

    /// Ask the daemon for its metrics.
    ///
    /// Only available before [`Self::listen`] takes over the read side.
    pub async fn request_status(&self) -> Result<MetricsSnapshot> {
        let mut guard = self.inner.reader.lock().await;
        let reader = match guard.as_mut() {
            Some(reader) => reader,
            None if self.is_listening() => return Err(EventsError::AlreadyListening),
            None => return Err(EventsError::NotConnected),
        };

        self.inner.send(&Message::status_request()).await?;

        let reply = async {
            loop {
                match protocol::next_message(&mut *reader).await? {
                    Some(Message {
                        payload: Payload::Status {
                            status: Some(snapshot),
                        },
                        ..
                    }) => return Ok::<_, EventsError>(snapshot),
                    Some(other) => {
                        tracing::debug!("Skipping {} while waiting for status", other.kind());
                    }
                    None => return Err(EventsError::ConnectionClosed),
                }
            }
        };

        let result = tokio::time::timeout(self.inner.config.connect_timeout, reply)
            .await
            .map_err(|_| EventsError::ReplyTimeout("status"))?;

        if let Err(EventsError::ConnectionClosed | EventsError::Io(_)) = &result {
            guard.take();
            self.inner.drop_writer().await;
            self.inner.connection_lost();
        }
        result
    }

    /// Release the connection and stop any background reader.
    ///
    /// Safe to call more than once.
    pub async fn close(&self) -> Result<()> {
        self.inner.closed.cancel();

        let writer = self.inner.writer.lock().await.take();
        if let Some(mut writer) = writer {
            if let Err(e) = SinkExt::<String>::close(&mut writer).await {
                tracing::debug!("Error closing event socket: {}", e);
            }
        }
        self.inner.reader.lock().await.take();

        self.inner.transition(ConnectionStatus::Disconnected);
        Ok(())
    }
}

impl ClientInner {
    fn status(&self) -> ConnectionStatus {
        *self.status.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn current_subscription(&self) -> Option<Subscription> {
        *self.subscription.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record a status change and tell the notify callback about it
    fn transition(&self, next: ConnectionStatus) {
        let previous = {
            let mut status = self.status.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::replace(&mut *status, next)
        };
        if previous == next {
            return;
        }

        tracing::info!("Event client status: {} -> {}", previous, next);

        let notify = self
            .notify
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(notify) = notify {
            notify(next);
        }
    }

    async fn dial(&self) -> Result<UnixStream> {
        let connect = UnixStream::connect(&self.socket_path);
        match tokio::time::timeout(self.config.connect_timeout, connect).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(EventsError::Io(e)),
            Err(_) => Err(EventsError::ConnectTimeout(self.socket_path.clone())),
        }
    }

    /// Keep the write side of `stream` and return its framed read side
    async fn install(&self, stream: UnixStream) -> Reader {
        let (read_half, write_half) = stream.into_split();
        *self.writer.lock().await = Some(protocol::message_writer(write_half));
        protocol::message_reader(read_half)
    }

    async fn drop_writer(&self) {
        self.writer.lock().await.take();
    }

    async fn send(&self, message: &Message) -> Result<()> {
        if self.closed.is_cancelled() {
            return Err(EventsError::Closed);
        }

        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(EventsError::NotConnected)?;
        if let Err(e) = protocol::send_message(writer, message).await {
            *guard = None;
            drop(guard);
            tracing::warn!("Write to event daemon failed: {}", e);
            self.connection_lost();
            return Err(e);
        }
        Ok(())
    }

    /// The socket is gone. A listener takes over reconnecting; otherwise
    /// the next `connect` dials again and replaces the stale reader.
    fn connection_lost(&self) {
        if self.listening.load(Ordering::SeqCst) {
            self.transition(ConnectionStatus::Reconnecting);
        } else {
            self.transition(ConnectionStatus::Disconnected);
        }
    }

    async fn run_listener(
        self: Arc<Self>,
        reader: Reader,
        tx: EventSender,
        cancel: CancellationToken,
    ) {
        let mut reader = Some(reader);

        while let Some(current) = reader.take() {
            match self.read_events(current, &tx, &cancel).await {
                ReadOutcome::Stopped => break,
                ReadOutcome::Lost(e) => {
                    tracing::warn!("Lost connection to event daemon: {}", e);
                    self.drop_writer().await;
                    reader = self.reconnect(&tx, &cancel).await;
                }
            }
        }

        self.drop_writer().await;
        self.listening.store(false, Ordering::SeqCst);
        self.transition(ConnectionStatus::Disconnected);
        tracing::debug!("Event listener stopped");
    }

    async fn read_events(
        &self,
        mut reader: Reader,
        tx: &EventSender,
        cancel: &CancellationToken,
    ) -> ReadOutcome {
        let mut heartbeat = self.config.heartbeat_interval.map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return ReadOutcome::Stopped,
                _ = self.closed.cancelled() => return ReadOutcome::Stopped,
                _ = tx.closed() => return ReadOutcome::Stopped,
                _ = next_tick(&mut heartbeat) => {
                    if let Err(e) = self.send(&Message::ping()).await {
                        return ReadOutcome::Lost(e);
                    }
                }
                next = protocol::next_message(&mut reader) => match next {
                    Ok(Some(message)) => self.handle_message(message, tx),
                    Ok(None) => return ReadOutcome::Lost(EventsError::ConnectionClosed),
                    Err(e) => return ReadOutcome::Lost(e),
                },
            }
        }
    }

    fn handle_message(&self, message: Message, tx: &EventSender) {
        let kind = message.kind();
        match message.payload {
            Payload::Event { event } => {
                self.metrics.inc_events_received();
                if let Some(superseded) = tx.push(event) {
                    tracing::warn!(
                        "Event channel full, superseding seq {} for project {}",
                        superseded.sequence_id,
                        superseded.project_id
                    );
                }
            }
            Payload::Ping => tracing::trace!("Heartbeat acknowledged"),
            _ => tracing::debug!("Ignoring unexpected {} message", kind),
        }
    }

    /// Re-dial with backoff until it works, or the client is closed,
    /// cancelled, or abandoned by the UI
    async fn reconnect(&self, tx: &EventSender, cancel: &CancellationToken) -> Option<Reader> {
        self.transition(ConnectionStatus::Reconnecting);
        let mut backoff = self.config.reconnect.backoff();

        loop {
            let delay = backoff.next_delay();
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return None,
                _ = self.closed.cancelled() => return None,
                _ = tx.closed() => return None,
                _ = tokio::time::sleep(delay) => {}
            }

            match self.dial().await {
                Ok(stream) => {
                    let reader = self.install(stream).await;
                    if self.closed.is_cancelled() {
                        self.drop_writer().await;
                        return None;
                    }

                    self.metrics.inc_reconnections();
                    self.transition(ConnectionStatus::Connected);
                    tracing::info!(
                        "Reconnected to event daemon after {} attempt(s)",
                        backoff.attempts()
                    );

                    if let Some(subscription) = self.current_subscription() {
                        if let Err(e) = self.send(&Message::subscribe(subscription)).await {
                            tracing::warn!("Failed to restore subscription: {}", e);
                        }
                    }
                    return Some(reader);
                }
                Err(e) => {
                    tracing::debug!("Reconnect attempt {} failed: {}", backoff.attempts(), e);
                    if backoff.exhausted() && self.status() == ConnectionStatus::Reconnecting {
                        tracing::warn!(
                            "Event daemon unreachable after {} attempts, retrying every {:?}",
                            backoff.attempts(),
                            self.config.reconnect.idle_retry
                        );
                        self.transition(ConnectionStatus::Disconnected);
                    }
                }
            }
        }
    }
}

async fn next_tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
