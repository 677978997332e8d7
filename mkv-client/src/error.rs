//! Error model for the client.
//!
//! Store-side failures are not represented here: they arrive as
//! [`Reply::Error`](mkv_common::Reply::Error) values and are data.

use std::time::Duration;

use mkv_common::DecodeError;
use thiserror::Error;

/// Result type for the client.
pub type ClientResult<T> = Result<T, ClientError>;

/// Failures of the network/I/O layer.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Socket refused, reset or timed out.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// RESP2 framing or parse error.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// Address could not be resolved into a socket address.
    #[error("invalid address: {0}")]
    InvalidAddress(String),
}

/// Errors surfaced by pool and executor operations.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// No pooled connection became free within the configured bound.
    #[error("no pooled connection became available within {0:?}")]
    AcquireTimeout(Duration),
    /// Reply shape did not match the requested decoding.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    /// A command with no tokens; stores send no reply for it.
    #[error("command has no tokens")]
    EmptyCommand,
    /// The thread that reads an async reply could not be started.
    #[error("failed to start reply thread: {0}")]
    Spawn(#[source] std::io::Error),
    /// The reply was dropped before it could be delivered.
    #[error("reply was canceled before completion")]
    Canceled,
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        ClientError::Transport(TransportError::Io(err))
    }
}
