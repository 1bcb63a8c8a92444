//! Server-side commands and the worker queue that runs them
//!
//! Commands may block (the `dir` command touches the filesystem), so they
//! never run on a connection's reader task. Jobs go through an unbounded
//! queue to a small pool of workers, each command body runs on the blocking
//! thread pool, and the reply re-enters the requester's outbound queue like
//! any other frame. Failures and panics become reply messages.
//!
//! Workers never touch the client registry. A requester whose queue
//! overflows under the disconnect policy is reported on the eviction channel
//! returned by [`CommandExecutor::spawn`].

use crate::connection::ConnectionId;
use crate::error::CommandError;
use crate::outbound::{EnqueueOutcome, OutboundQueue};
use log::{debug, error, warn};
use shared::{Frame, Message};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// Author of every reply produced by the command executor
pub const COMMAND_RESULT_AUTHOR: &str = "Command result";

/// Sole line of the reply to a command name with no handler
pub const UNKNOWN_COMMAND_REPLY: &str = "Unknown command";

/// Logic behind one command name. Returns the reply lines.
pub trait CommandHandler: Send + Sync + 'static {
    fn execute(&self) -> Result<Vec<String>, CommandError>;
}

impl<F> CommandHandler for F
where
    F: Fn() -> Result<Vec<String>, CommandError> + Send + Sync + 'static,
{
    fn execute(&self) -> Result<Vec<String>, CommandError> {
        self()
    }
}

/// Lists entry names of a directory, sorted
#[derive(Debug, Clone)]
pub struct DirectoryListing {
    root: PathBuf,
}

impl DirectoryListing {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Lists the server's working directory
    pub fn current() -> Self {
        Self::new(".")
    }
}

impl CommandHandler for DirectoryListing {
    fn execute(&self) -> Result<Vec<String>, CommandError> {
        let to_error = |source| CommandError::ListDirectory {
            path: self.root.clone(),
            source,
        };

        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root).map_err(to_error)? {
            let entry = entry.map_err(to_error)?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }
}

/// Maps command names to handlers
#[derive(Default)]
pub struct CommandTable {
    handlers: HashMap<String, Box<dyn CommandHandler>>,
}

impl CommandTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The commands a stock server answers: `dir`
    pub fn with_defaults() -> Self {
        let mut table = Self::new();
        table.register("dir", DirectoryListing::current());
        table
    }

    pub fn register(&mut self, name: impl Into<String>, handler: impl CommandHandler) -> &mut Self {
        self.handlers.insert(name.into(), Box::new(handler));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Runs a command synchronously and builds its reply
    pub fn run(&self, name: &str) -> Message {
        let Some(handler) = self.handlers.get(name) else {
            debug!("Unknown command '{}'", name);
            return reply([UNKNOWN_COMMAND_REPLY]);
        };

        match handler.execute() {
            Ok(lines) => reply(lines),
            Err(e) => {
                warn!("Command '{}' failed: {}", name, e);
                failure_reply(&e)
            }
        }
    }
}

/// A `Text` message from the command executor
pub fn reply<I, S>(lines: I) -> Message
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    Message::text(COMMAND_RESULT_AUTHOR, lines)
}

fn failure_reply(error: &CommandError) -> Message {
    reply([format!("Command failed: {}", error)])
}

struct CommandJob {
    command: String,
    requester: ConnectionId,
    reply_to: Arc<OutboundQueue>,
}

/// Handle to the command worker pool. Cloning shares the same queue.
#[derive(Clone)]
pub struct CommandExecutor {
    jobs: mpsc::UnboundedSender<CommandJob>,
}

impl CommandExecutor {
    /// Starts `workers` command workers on the current runtime.
    ///
    /// The returned receiver yields requesters that must be disconnected
    /// because a reply overflowed their queue. It closes once every
    /// executor handle is dropped and the workers have stopped.
    pub fn spawn(
        table: CommandTable,
        workers: usize,
    ) -> (Self, mpsc::UnboundedReceiver<ConnectionId>) {
        let (jobs, receiver) = mpsc::unbounded_channel();
        let (evictions, evicted) = mpsc::unbounded_channel();
        let receiver = Arc::new(Mutex::new(receiver));
        let table = Arc::new(table);

        for worker in 0..workers.max(1) {
            tokio::spawn(run_worker(
                worker,
                Arc::clone(&receiver),
                Arc::clone(&table),
                evictions.clone(),
            ));
        }

        (Self { jobs }, evicted)
    }

    /// Queues a command; its reply goes only to `reply_to`.
    /// Returns false if the workers have stopped.
    pub fn submit(
        &self,
        command: String,
        requester: ConnectionId,
        reply_to: Arc<OutboundQueue>,
    ) -> bool {
        self.jobs
            .send(CommandJob {
                command,
                requester,
                reply_to,
            })
            .is_ok()
    }

    /// Runs one command off the async workers, converting a panic into a
    /// failure reply
    pub async fn execute(table: Arc<CommandTable>, command: String) -> Message {
        let name = command.clone();
        match tokio::task::spawn_blocking(move || table.run(&command)).await {
            Ok(message) => message,
            Err(e) => {
                error!("Command '{}' did not complete: {}", name, e);
                failure_reply(&CommandError::Panicked(name))
            }
        }
    }
}

async fn run_worker(
    worker: usize,
    jobs: Arc<Mutex<mpsc::UnboundedReceiver<CommandJob>>>,
    table: Arc<CommandTable>,
    evictions: mpsc::UnboundedSender<ConnectionId>,
) {
    loop {
        let job = jobs.lock().await.recv().await;
        let Some(job) = job else {
            break;
        };

        debug!(
            "Worker {} running '{}' for client {}",
            worker, job.command, job.requester
        );
        let result = CommandExecutor::execute(Arc::clone(&table), job.command).await;

        let frame = match Frame::encode(&result) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Cannot encode command result for client {}: {}", job.requester, e);
                continue;
            }
        };

        match job.reply_to.enqueue(frame) {
            EnqueueOutcome::Queued | EnqueueOutcome::DroppedOldest => {}
            EnqueueOutcome::Closed => {
                debug!("Client {} left before its command finished", job.requester)
            }
            EnqueueOutcome::DroppedNewest => {
                warn!("Dropped command result for slow client {}", job.requester)
            }
            EnqueueOutcome::Overflow => {
                warn!("Client {} fell too far behind, disconnecting", job.requester);
                if evictions.send(job.requester).is_err() {
                    debug!("Dispatcher gone, cannot evict client {}", job.requester);
                }
            }
        }
    }

    debug!("Command worker {} stopped", worker);
}
