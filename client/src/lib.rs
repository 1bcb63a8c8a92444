//! # Chat Client Library
//!
//! A terminal client for the relay server. Lines typed on standard input are
//! sent as text messages; lines starting with `/` ask the server to run a
//! command. Everything the server relays back is printed as `author: line`.
//!
//! ## Module Organization
//!
//! ### Input Module (`input`)
//! Converts typed lines into messages and messages into printable lines.
//!
//! ### Network Module (`network`)
//! Owns the TCP connection. Outgoing messages are framed and written
//! directly; incoming frames go through the shared receive pipeline, so the
//! client handles split and coalesced frames exactly as the server does.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::ChatClient;
//! use shared::Message;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = ChatClient::connect("127.0.0.1:8080", "alice").await?;
//!     client.send(&Message::command("alice", "dir")).await?;
//!
//!     let reply = client.next_message().await?;
//!     println!("{:?}", reply.text);
//!     Ok(())
//! }
//! ```

pub mod input;
pub mod network;
