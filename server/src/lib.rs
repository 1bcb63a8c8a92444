//! # Relay Server Library
//!
//! A TCP relay that forwards length-prefixed messages between connected
//! clients and answers a small set of server-side commands.
//!
//! ## Core Responsibilities
//!
//! ### Relaying
//! Every `Text` message a client sends is encoded once and queued to every
//! other connected client. The sender never receives its own message.
//!
//! ### Commands
//! `Command` messages name a server-side command (for example `dir`). The
//! command runs off the I/O path and its reply, authored by
//! `"Command result"`, goes back to the requester alone.
//!
//! ### Connection Lifecycle
//! A connection is registered when accepted and removed exactly once, when
//! the peer closes, a transport error occurs, the peer violates the framing
//! protocol, or the connection falls too far behind under a bounded
//! outbound queue.
//!
//! ## Architecture Design
//!
//! ### Per-Connection Tasks
//! Each connection runs one reader task and one writer task on the
//! multi-threaded runtime. The reader grows its receive buffer on demand and
//! never drops partial frames; the writer batches whole frames into a single
//! write and keeps at most one write in flight.
//!
//! ### Shared Registry
//! The registry of live connections sits behind a reader/writer lock.
//! Broadcasts share it; connects and disconnects take it exclusively.
//!
//! ## Module Organization
//!
//! - `config`: listener address, buffer sizes and backpressure settings
//! - `connection`: connection ids, registry entries and the reader/writer tasks
//! - `outbound`: per-connection frame queue and the send pipeline
//! - `registry`: the set of live connections
//! - `dispatcher`: connect, disconnect, broadcast and command routing
//! - `commands`: command handlers and the worker pool that runs them
//! - `network`: the TCP accept loop
//! - `error`: command failures
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::commands::CommandTable;
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::new("127.0.0.1:8080".parse()?);
//!     let server = Server::bind(config, CommandTable::with_defaults()).await?;
//!
//!     // Accepts clients until the future is dropped
//!     server.run().await;
//!     Ok(())
//! }
//! ```

pub mod commands;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod network;
pub mod outbound;
pub mod registry;
