use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use taskboard_metrics::Metrics;
use tokio::io::AsyncWriteExt;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::config::QueueConfig;
use crate::error::{EventsError, Result};
use crate::events::Event;
use crate::protocol::{self, Message, Payload};
use crate::registry::{ClientRegistry, ConnectionId};

/// Lifecycle of an [`EventServer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Created,
    Running,
    ShuttingDown,
    Shutdown,
}

impl ServerState {
    fn as_u8(self) -> u8 {
        match self {
            ServerState::Created => 0,
            ServerState::Running => 1,
            ServerState::ShuttingDown => 2,
            ServerState::Shutdown => 3,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => ServerState::Created,
            1 => ServerState::Running,
            2 => ServerState::ShuttingDown,
            _ => ServerState::Shutdown,
        }
    }
}

/// Event waiting in the shared fan-out queue
struct Dispatch {
    event: Event,
    origin: Option<ConnectionId>,
}

/// Local event-broadcast daemon
pub struct EventServer {
    socket_path: PathBuf,
    config: QueueConfig,
    listener: Mutex<Option<UnixListener>>,
    registry: Arc<ClientRegistry>,
    sequence: AtomicU64,
    state: AtomicU8,
    broadcast_tx: mpsc::Sender<Dispatch>,
    broadcast_rx: Mutex<Option<mpsc::Receiver<Dispatch>>>,
    shutdown: CancellationToken,
    metrics: Arc<Metrics>,
}

impl EventServer {
    /// Bind the daemon socket at `socket_path` using the process-wide metrics.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(socket_path: impl AsRef<Path>, config: QueueConfig) -> Result<Self> {
        Self::with_metrics(socket_path, config, taskboard_metrics::global())
    }

    /// Bind the daemon socket, recording into `metrics`.
    ///
    /// Missing parent directories are created and a stale socket file left
    /// by a previous run is replaced.
    pub fn with_metrics(
        socket_path: impl AsRef<Path>,
        config: QueueConfig,
        metrics: Arc<Metrics>,
    ) -> Result<Self> {
        let socket_path = socket_path.as_ref().to_path_buf();

        taskboard_paths::ensure_socket_parent(&socket_path)
            .map_err(|e| EventsError::Setup(format!("{:#}", e)))?;

        // Remove stale socket file, never anything else
        if let Ok(meta) = std::fs::symlink_metadata(&socket_path) {
            if !meta.file_type().is_socket() {
                return Err(EventsError::Setup(format!(
                    "{} exists and is not a socket",
                    socket_path.display()
                )));
            }
            std::fs::remove_file(&socket_path).map_err(|e| {
                EventsError::Setup(format!(
                    "Failed to remove stale socket {}: {}",
                    socket_path.display(),
                    e
                ))
            })?;
            tracing::info!("Removed stale socket at {:?}", socket_path);
        }

        let listener = UnixListener::bind(&socket_path).map_err(|e| {
            EventsError::Setup(format!("Failed to bind {}: {}", socket_path.display(), e))
        })?;

        if let Err(e) = taskboard_paths::secure_socket_permissions(&socket_path) {
            tracing::warn!("Could not restrict socket permissions: {:#}", e);
        }

        let (broadcast_tx, broadcast_rx) = mpsc::channel(config.broadcast_buffer.max(1));

        tracing::info!(
            "Event server bound to {:?} (broadcast buffer {}, client buffer {})",
            socket_path,
            config.broadcast_buffer,
            config.client_buffer
        );

        Ok(Self {
            socket_path,
            config,
            listener: Mutex::new(Some(listener)),
            registry: Arc::new(ClientRegistry::new(Arc::clone(&metrics))),
            sequence: AtomicU64::new(0),
            state: AtomicU8::new(ServerState::Created.as_u8()),
            broadcast_tx,
            broadcast_rx: Mutex::new(Some(broadcast_rx)),
            shutdown: CancellationToken::new(),
            metrics,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn state(&self) -> ServerState {
        ServerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Highest sequence number handed out so far (0 before the first event)
    pub fn last_sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    /// Number of registered connections
    pub async fn client_count(&self) -> usize {
        self.registry.len().await
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }

    /// Accept connections until `cancel` fires, [`Self::shutdown`] is
    /// called, or accepting fails fatally. The server is shut down on return.
    pub async fn start(self: Arc<Self>, cancel: CancellationToken) -> Result<()> {
        if let Err(current) = self.state.compare_exchange(
            ServerState::Created.as_u8(),
            ServerState::Running.as_u8(),
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            return match ServerState::from_u8(current) {
                ServerState::Running => Err(EventsError::AlreadyRunning),
                _ => Err(EventsError::NotRunning),
            };
        }

        let listener = self.listener.lock().await.take();
        let broadcast_rx = self.broadcast_rx.lock().await.take();
        let (listener, broadcast_rx) = match (listener, broadcast_rx) {
            (Some(listener), Some(rx)) => (listener, rx),
            _ => return Err(EventsError::NotRunning),
        };

        tokio::spawn(Arc::clone(&self).dispatch_loop(broadcast_rx));

        tracing::info!("Event server started on {:?}", self.socket_path);

        let result = self.accept_loop(listener, &cancel).await;
        if let Err(e) = self.shutdown().await {
            tracing::warn!("Event server cleanup failed: {}", e);
        }
        result
    }

    async fn accept_loop(self: &Arc<Self>, listener: UnixListener, cancel: &CancellationToken) -> Result<()> {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!("Event server cancelled");
                    return Ok(());
                }
                _ = self.shutdown.cancelled() => {
                    return Ok(());
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, _addr)) => {
                        tracing::debug!("New client connection accepted");
                        tokio::spawn(Arc::clone(self).handle_connection(stream));
                    }
                    Err(e) if is_transient_accept_error(&e) => {
                        tracing::warn!("Transient accept error: {}", e);
                    }
                    Err(e) => {
                        tracing::error!("Failed to accept client: {}", e);
                        return Err(e.into());
                    }
                }
            }
        }
    }

    /// Publish `event` to every matching client.
    ///
    /// The event is stamped with the next sequence number when the
    /// dispatcher takes it off the shared queue. Only fails when the server
    /// is not running.
    pub async fn broadcast(&self, event: Event) -> Result<()> {
        if self.state() != ServerState::Running {
            return Err(EventsError::NotRunning);
        }
        self.enqueue(event, None).await
    }

    async fn enqueue(&self, event: Event, origin: Option<ConnectionId>) -> Result<()> {
        tokio::select! {
            sent = self.broadcast_tx.send(Dispatch { event, origin }) => {
                sent.map_err(|_| EventsError::NotRunning)
            }
            _ = self.shutdown.cancelled() => Err(EventsError::NotRunning),
        }
    }

    /// Single consumer of the broadcast queue; owns sequence assignment
    async fn dispatch_loop(self: Arc<Self>, mut rx: mpsc::Receiver<Dispatch>) {
        loop {
            let dispatch = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                next = rx.recv() => match next {
                    Some(dispatch) => dispatch,
                    None => break,
                },
            };

            let Dispatch { mut event, origin } = dispatch;
            event.sequence_id = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;

            let report = self.registry.fan_out(&event, origin).await;
            tracing::debug!(
                "Event seq {} ({}, project {}) delivered to {}, dropped for {}",
                event.sequence_id,
                event.kind,
                event.project_id,
                report.delivered,
                report.dropped
            );
        }
        tracing::debug!("Dispatcher stopped");
    }

    async fn handle_connection(self: Arc<Self>, stream: UnixStream) {
        let (read_half, write_half) = stream.into_split();
        let (tx, rx) = mpsc::channel(self.config.client_buffer.max(1));
        let conn_id = self.registry.register(tx).await;
        let token = self.shutdown.child_token();

        let writer = tokio::spawn(write_loop(conn_id, write_half, rx, token.clone()));

        match self.read_loop(conn_id, read_half, &token).await {
            Ok(()) => tracing::debug!("Client {} disconnected", conn_id),
            Err(e) => tracing::warn!("Closing client {}: {}", conn_id, e),
        }

        // Dropping the registration closes the queue, which ends the writer
        self.registry.unregister(conn_id).await;
        let _ = writer.await;
    }

    async fn read_loop(
        &self,
        conn_id: ConnectionId,
        read_half: OwnedReadHalf,
        token: &CancellationToken,
    ) -> Result<()> {
        let mut reader = protocol::message_reader(read_half);

        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => return Ok(()),
                next = protocol::next_message(&mut reader) => next?,
            };

            let Some(message) = next else {
                return Ok(());
            };

            match message.payload {
                Payload::Subscribe { subscribe } => {
                    self.registry.set_subscription(conn_id, subscribe).await;
                    tracing::debug!(
                        "Client {} subscribed to project {}",
                        conn_id,
                        subscribe.project_id
                    );
                }
                Payload::Event { event } => {
                    self.metrics.inc_events_received();
                    if self.enqueue(event, Some(conn_id)).await.is_err() {
                        return Ok(());
                    }
                }
                Payload::Ping => {
                    self.registry.send_to(conn_id, Message::ping()).await;
                }
                Payload::Status { .. } => {
                    let reply = Message::status_reply(self.metrics.snapshot());
                    self.registry.send_to(conn_id, reply).await;
                }
            }
        }
    }

    /// Stop accepting, close every connection and remove the socket file.
    ///
    /// Safe to call repeatedly and concurrently; only the first call does
    /// any work.
    pub async fn shutdown(&self) -> Result<()> {
        loop {
            let current = self.state.load(Ordering::SeqCst);
            match ServerState::from_u8(current) {
                ServerState::ShuttingDown | ServerState::Shutdown => return Ok(()),
                _ => {}
            }
            if self
                .state
                .compare_exchange(
                    current,
                    ServerState::ShuttingDown.as_u8(),
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                )
                .is_ok()
            {
                break;
            }
        }

        self.shutdown.cancel();

        // Drop the listener if the server never started
        self.listener.lock().await.take();

        let closed = self.registry.clear().await;

        let removal = match std::fs::remove_file(&self.socket_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                tracing::warn!("Failed to remove socket {:?}: {}", self.socket_path, e);
                Err(EventsError::Io(e))
            }
        };

        self.state
            .store(ServerState::Shutdown.as_u8(), Ordering::SeqCst);
        tracing::info!("Event server stopped ({} clients closed)", closed);

        removal
    }
}

async fn write_loop(
    conn_id: ConnectionId,
    write_half: OwnedWriteHalf,
    mut rx: mpsc::Receiver<Message>,
    token: CancellationToken,
) {
    let mut writer = protocol::message_writer(write_half);

    loop {
        let message = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            next = rx.recv() => match next {
                Some(message) => message,
                None => break,
            },
        };

        if let Err(e) = protocol::send_message(&mut writer, &message).await {
            tracing::debug!("Write to client {} failed: {}", conn_id, e);
            break;
        }
    }

    let _ = writer.get_mut().shutdown().await;
}

fn is_transient_accept_error(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::Interrupted
            | std::io::ErrorKind::WouldBlock
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn server_at(path: &Path) -> Arc<EventServer> {
        Arc::new(
            EventServer::with_metrics(path, QueueConfig::default(), Arc::new(Metrics::new()))
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_server_create() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("board.sock");

        let server = server_at(&path);
        assert_eq!(server.state(), ServerState::Created);
        assert_eq!(server.client_count().await, 0);
        assert_eq!(server.last_sequence(), 0);
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_broadcast_requires_running() {
        let temp = tempdir().unwrap();
        let server = server_at(&temp.path().join("board.sock"));

        let result = server.broadcast(Event::database_changed(1)).await;
        assert!(matches!(result, Err(EventsError::NotRunning)));
    }

    #[tokio::test]
    async fn test_shutdown_before_start() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("board.sock");
        let server = server_at(&path);

        server.shutdown().await.unwrap();
        assert_eq!(server.state(), ServerState::Shutdown);
        assert!(!path.exists());

        // Cannot start after shutdown
        let result = Arc::clone(&server).start(CancellationToken::new()).await;
        assert!(matches!(result, Err(EventsError::NotRunning)));
    }

    #[tokio::test]
    async fn test_double_start_rejected() {
        let temp = tempdir().unwrap();
        let server = server_at(&temp.path().join("board.sock"));
        let cancel = CancellationToken::new();

        let task = tokio::spawn(Arc::clone(&server).start(cancel.clone()));
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let second = Arc::clone(&server).start(cancel.clone()).await;
        assert!(matches!(second, Err(EventsError::AlreadyRunning)));

        cancel.cancel();
        task.await.unwrap().unwrap();
        assert_eq!(server.state(), ServerState::Shutdown);
    }

    #[tokio::test]
    async fn test_directory_at_socket_path_is_setup_error() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("occupied");
        std::fs::create_dir(&path).unwrap();

        let result = EventServer::new(&path, QueueConfig::default());
        assert!(matches!(result, Err(EventsError::Setup(_))));
    }

    #[tokio::test]
    async fn test_regular_file_at_socket_path_is_kept() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("notes.txt");
        std::fs::write(&path, "not a socket").unwrap();

        let result = EventServer::new(&path, QueueConfig::default());
        assert!(matches!(result, Err(EventsError::Setup(_))));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "not a socket");
    }
}
