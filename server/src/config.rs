//! Runtime configuration for the relay server

use clap::ValueEnum;
use std::net::SocketAddr;

/// Per-connection read and write buffers start at 1 MiB
pub const DEFAULT_BUFFER_CAPACITY: usize = 1 << 20;

/// What an outbound queue does once it holds `max_queued_frames` frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OverflowPolicy {
    /// Discard the oldest queued frame to make room for the new one
    DropOldest,
    /// Discard the frame being enqueued
    DropNewest,
    /// Disconnect the slow consumer
    #[default]
    Disconnect,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the listener binds to
    pub listen_addr: SocketAddr,
    /// Runtime worker threads driving connection I/O
    pub worker_threads: usize,
    /// Concurrent command workers
    pub command_workers: usize,
    /// Initial capacity of each connection's receive buffer
    pub receive_buffer_capacity: usize,
    /// Initial capacity of each connection's write buffer
    pub write_buffer_capacity: usize,
    /// Frames a connection may have waiting before the overflow policy
    /// applies; `None` leaves queues unbounded
    pub max_queued_frames: Option<usize>,
    pub overflow_policy: OverflowPolicy,
}

impl ServerConfig {
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            ..Self::default()
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            worker_threads: 4,
            command_workers: 1,
            receive_buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            write_buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            max_queued_frames: None,
            overflow_policy: OverflowPolicy::default(),
        }
    }
}
