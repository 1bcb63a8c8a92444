//! # Relay Protocol
//!
//! Types and codecs shared by the relay server and its chat client.
//!
//! Every unit of data on the wire is a [`Frame`]: the payload length encoded
//! as a base-128 varint followed by the bincode encoding of a [`Message`].
//! The [`receive`] module turns an arbitrary byte stream back into messages,
//! tolerating any split of frames across reads.

pub mod frame;
pub mod receive;

pub use frame::{
    decode_payload, encode_length, try_decode_length, Frame, FrameError, HEADER_SCAN_WINDOW,
    MAX_PAYLOAD_LEN,
};
pub use receive::{ReceiveBuffer, ReceivePipeline, ReceiveState, StreamError};

use serde::{Deserialize, Serialize};

/// Distinguishes chat text from requests the server executes itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    Text,
    Command,
}

/// Application-level record carried by every frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub kind: MessageKind,
    pub author: String,
    pub text: Vec<String>,
}

impl Message {
    /// Creates a chat message with the given lines
    pub fn text<A, I, S>(author: A, lines: I) -> Self
    where
        A: Into<String>,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kind: MessageKind::Text,
            author: author.into(),
            text: lines.into_iter().map(Into::into).collect(),
        }
    }

    /// Creates a command request; the command name travels as the first line
    pub fn command(author: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Command,
            author: author.into(),
            text: vec![name.into()],
        }
    }

    pub fn is_command(&self) -> bool {
        self.kind == MessageKind::Command
    }

    /// Name of the requested command, if this is a command with any text
    pub fn command_name(&self) -> Option<&str> {
        if self.is_command() {
            self.text.first().map(String::as_str)
        } else {
            None
        }
    }
}
