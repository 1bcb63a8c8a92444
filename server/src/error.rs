//! Error types for command execution

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failure inside a command handler. Always converted into a reply for the
/// requester; never disconnects anyone.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("cannot list {}: {}", .path.display(), .source)]
    ListDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("command '{0}' panicked")]
    Panicked(String),

    #[error("{0}")]
    Failed(String),
}
