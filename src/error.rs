//! Error types for the relay

use relay_shared::{codec::CodecError, RequestError};
use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// Errors that stop a listener
#[derive(Error, Debug)]
pub enum ListenerError {
    #[error("Failed to bind listener on {host}:{port}: {source}")]
    Bind {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("Accept failed {attempts} times in a row on {addr}: {source}")]
    RetriesExhausted {
        addr: SocketAddr,
        attempts: u32,
        #[source]
        source: io::Error,
    },
}

/// Errors contained to a single connection
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Read error: {0}")]
    Read(#[source] io::Error),

    #[error("No request line within {0:?}")]
    ReadTimeout(std::time::Duration),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("Malformed request: {0}")]
    Malformed(#[from] RequestError),

    #[error("No executor registered for {executor_id}")]
    UnknownExecutor { executor_id: String },

    #[error("Executor {executor_id} failed: {source}")]
    Executor {
        executor_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Write error: {0}")]
    Write(#[source] io::Error),
}

impl DispatchError {
    /// Stable tag used in structured error replies
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchError::Read(_) => "read_failed",
            DispatchError::ReadTimeout(_) => "read_timeout",
            DispatchError::Codec(_) => "bad_line",
            DispatchError::Malformed(_) => "malformed_request",
            DispatchError::UnknownExecutor { .. } => "unknown_executor",
            DispatchError::Executor { .. } => "executor_failed",
            DispatchError::Write(_) => "write_failed",
        }
    }

    /// Whether the client can still be told about this error
    pub fn is_reportable(&self) -> bool {
        !matches!(self, DispatchError::Read(_) | DispatchError::Write(_))
    }
}
