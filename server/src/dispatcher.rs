//! Routes decoded messages between connections
//!
//! The [`Dispatcher`] owns the client registry behind a reader/writer lock.
//! Broadcasts only need shared access because enqueueing onto a
//! connection's outbound queue is synchronous; connects and disconnects take
//! the lock exclusively. Handles are cheap to clone and every connection
//! task holds one.

use crate::commands::{CommandExecutor, CommandTable};
use crate::config::ServerConfig;
use crate::connection::{run_reader, run_writer, Connection, ConnectionId};
use crate::outbound::{EnqueueOutcome, OutboundQueue, QueueStats, SendPipeline};
use crate::registry::ClientRegistry;
use log::{debug, info, warn};
use shared::{Frame, FrameError, Message, ReceivePipeline};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, RwLock};

#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    clients: RwLock<ClientRegistry>,
    commands: CommandExecutor,
    config: ServerConfig,
    next_id: AtomicU64,
}

impl Dispatcher {
    /// Creates a dispatcher and starts its command workers.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: ServerConfig, commands: CommandTable) -> Self {
        let (executor, evicted) = CommandExecutor::spawn(commands, config.command_workers);
        let dispatcher = Self {
            inner: Arc::new(DispatcherInner {
                clients: RwLock::new(ClientRegistry::new()),
                commands: executor,
                config,
                next_id: AtomicU64::new(1),
            }),
        };

        tokio::spawn(run_evictions(Arc::downgrade(&dispatcher.inner), evicted));
        dispatcher
    }

    /// Registers a transport and starts its reader and writer tasks
    pub async fn connect<R, W>(&self, reader: R, writer: W) -> ConnectionId
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let config = &self.inner.config;
        let id = ConnectionId::new(self.inner.next_id.fetch_add(1, Ordering::Relaxed));

        let outbound = Arc::new(OutboundQueue::new(
            config.max_queued_frames,
            config.overflow_policy,
        ));
        let send = SendPipeline::new(writer, Arc::clone(&outbound), config.write_buffer_capacity);
        let receive = ReceivePipeline::new(reader, config.receive_buffer_capacity);
        let mut connection = Connection::new(id, outbound);

        // Tasks that end immediately block on this guard until the entry exists
        let mut clients = self.inner.clients.write().await;
        let writer_task = tokio::spawn(run_writer(id, send, self.clone()));
        let reader_task = tokio::spawn(run_reader(id, receive, self.clone()));
        connection.attach_task(writer_task.abort_handle());
        connection.attach_task(reader_task.abort_handle());
        clients.insert(connection);

        debug!("Registered client {} ({} connected)", id, clients.len());
        id
    }

    /// Removes a connection and stops its tasks. Returns false if it was
    /// already gone.
    pub async fn disconnect(&self, id: ConnectionId) -> bool {
        let removed = self.inner.clients.write().await.remove(&id);

        match removed {
            Some(connection) => {
                connection.shutdown();
                info!("Client {} disconnected", id);
                true
            }
            None => false,
        }
    }

    /// Encodes `message` once and queues it for every connection except
    /// `sender`. Returns how many connections were handed the frame.
    pub async fn broadcast(&self, message: &Message, sender: ConnectionId) -> Result<usize, FrameError> {
        let frame = Frame::encode(message)?;
        let mut recipients = 0;
        let mut overflowed = Vec::new();

        {
            let clients = self.inner.clients.read().await;
            for connection in clients.iter().filter(|c| c.id() != sender) {
                recipients += 1;
                match connection.enqueue(frame.clone()) {
                    EnqueueOutcome::Queued | EnqueueOutcome::Closed => {}
                    EnqueueOutcome::DroppedOldest | EnqueueOutcome::DroppedNewest => {
                        debug!("Dropped a frame for slow client {}", connection.id())
                    }
                    EnqueueOutcome::Overflow => overflowed.push(connection.id()),
                }
            }
        }

        for id in overflowed {
            warn!("Client {} fell too far behind, disconnecting", id);
            self.disconnect(id).await;
        }

        Ok(recipients)
    }

    /// Handles one message received from `sender`
    pub async fn route(&self, sender: ConnectionId, message: Message) {
        if message.is_command() {
            let command = message.command_name().unwrap_or_default().to_string();
            self.execute_command(command, sender).await;
            return;
        }

        if let Err(e) = self.broadcast(&message, sender).await {
            warn!("Cannot relay message from client {}: {}", sender, e);
        }
    }

    /// Queues a command whose reply goes only to `requester`. Returns false
    /// if the requester is no longer connected.
    pub async fn execute_command(&self, command: String, requester: ConnectionId) -> bool {
        let reply_to = {
            let clients = self.inner.clients.read().await;
            match clients.get(&requester) {
                Some(connection) => Arc::clone(connection.outbound()),
                None => return false,
            }
        };

        debug!("Client {} requested '{}'", requester, command);
        self.inner.commands.submit(command, requester, reply_to)
    }

    /// Disconnects every client. Returns how many were connected.
    pub async fn shutdown(&self) -> usize {
        let connections = self.inner.clients.write().await.drain();
        for connection in &connections {
            connection.shutdown();
        }
        info!("Closed {} connections", connections.len());
        connections.len()
    }

    pub async fn len(&self) -> usize {
        self.inner.clients.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.clients.read().await.is_empty()
    }

    pub async fn contains(&self, id: ConnectionId) -> bool {
        self.inner.clients.read().await.contains(&id)
    }

    pub async fn ids(&self) -> Vec<ConnectionId> {
        self.inner.clients.read().await.ids()
    }

    pub async fn queue_stats(&self, id: ConnectionId) -> Option<QueueStats> {
        self.inner.clients.read().await.get(&id).map(Connection::stats)
    }
}

// Must not keep the dispatcher alive: dropping it is what closes `evicted`.
async fn run_evictions(
    dispatcher: Weak<DispatcherInner>,
    mut evicted: mpsc::UnboundedReceiver<ConnectionId>,
) {
    while let Some(id) = evicted.recv().await {
        let Some(inner) = dispatcher.upgrade() else {
            break;
        };
        Dispatcher { inner }.disconnect(id).await;
    }
}
