//! A registered client connection and the two tasks that drive it
//!
//! Each connection runs exactly one reader task (its receive pipeline) and one
//! writer task (its send pipeline). Both capture only the connection's id and
//! a dispatcher handle, so a task outliving its registry entry simply finds
//! nothing to act on.

use crate::dispatcher::Dispatcher;
use crate::outbound::{EnqueueOutcome, OutboundQueue, QueueStats, SendPipeline};
use log::{debug, error, info, warn};
use shared::{Frame, ReceivePipeline, StreamError};
use std::fmt;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::AbortHandle;

/// Identifies a connection for as long as it is registered. Never reused
/// within one dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Registry entry for one live connection
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    outbound: Arc<OutboundQueue>,
    tasks: Vec<AbortHandle>,
}

impl Connection {
    pub fn new(id: ConnectionId, outbound: Arc<OutboundQueue>) -> Self {
        Self {
            id,
            outbound,
            tasks: Vec::new(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn outbound(&self) -> &Arc<OutboundQueue> {
        &self.outbound
    }

    pub fn enqueue(&self, frame: Frame) -> EnqueueOutcome {
        self.outbound.enqueue(frame)
    }

    pub fn stats(&self) -> QueueStats {
        self.outbound.stats()
    }

    pub(crate) fn attach_task(&mut self, task: AbortHandle) {
        self.tasks.push(task);
    }

    /// Stops both tasks and closes the outbound queue.
    ///
    /// Dropping the tasks releases the transport halves, which closes the
    /// socket; the peer sees nothing else.
    pub fn shutdown(&self) {
        self.outbound.close();
        for task in &self.tasks {
            task.abort();
        }
    }
}

pub(crate) async fn run_reader<R>(
    id: ConnectionId,
    mut pipeline: ReceivePipeline<R>,
    dispatcher: Dispatcher,
) where
    R: AsyncRead + Unpin,
{
    loop {
        match pipeline.next_message().await {
            Ok(message) => {
                debug!(
                    "Client {} sent {:?} from '{}' ({} lines)",
                    id,
                    message.kind,
                    message.author,
                    message.text.len()
                );
                dispatcher.route(id, message).await;
            }
            Err(e) => {
                log_stream_end(id, &e);
                break;
            }
        }
    }

    dispatcher.disconnect(id).await;
}

pub(crate) async fn run_writer<W>(id: ConnectionId, pipeline: SendPipeline<W>, dispatcher: Dispatcher)
where
    W: AsyncWrite + Unpin,
{
    if let Err(e) = pipeline.run().await {
        log_stream_end(id, &e);
        dispatcher.disconnect(id).await;
    }
}

fn log_stream_end(id: ConnectionId, reason: &StreamError) {
    match reason {
        StreamError::Closed => info!("Client {} closed the connection", id),
        StreamError::Protocol(e) => warn!("Client {} violated the protocol: {}", id, e),
        StreamError::Transport(e) => error!("Transport error on client {}: {}", id, e),
    }
}
