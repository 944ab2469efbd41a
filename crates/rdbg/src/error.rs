use std::io;

use thiserror::Error;

/// Failures that make a debug server unusable. Returned from construction.
#[derive(Error, Debug)]
pub enum InitError {
    #[error("failed to bind the socket to {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddrV4,
        #[source]
        source: io::Error,
    },
    #[error("failed to set non-blocking mode: {0}")]
    NonBlocking(#[source] io::Error),
    #[error("error compiling the serialization function: {0}")]
    Serializer(#[from] CompileError),
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Raised by a serializer strategy that cannot bind itself to the VM.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct CompileError(pub String);

/// Why a session ended. Always recoverable: the server listens again.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    #[error("disconnected")]
    PeerClosed,
    #[error("peer requested disconnect")]
    PeerRequested,
    #[error("socket error: {0}")]
    Io(io::ErrorKind),
}

/// Malformed input from the peer. The offending line is dropped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("line exceeds {limit} bytes ({len} received)")]
    Overlong { len: usize, limit: usize },
    #[error("unknown command: {0}")]
    UnknownCommand(String),
}

/// Errors surfaced to the embedder from a running server.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("session ended: {0}")]
    SessionEnded(DisconnectReason),
    #[error("debug server has been shut down")]
    Shutdown,
    #[error("failed to listen again after disconnect: {0}")]
    Relisten(#[source] InitError),
}

impl ServerError {
    /// True when the error only means the peer went away.
    pub fn is_session_ended(&self) -> bool {
        matches!(self, ServerError::SessionEnded(_))
    }
}

pub type Result<T, E = ServerError> = std::result::Result<T, E>;
