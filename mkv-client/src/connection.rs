//! # Connections
//!
//! Purpose: Define the seam between the pool and a live store session, and
//! ship a blocking TCP implementation speaking RESP2.
//!
//! ## Design Principles
//! 1. **Queue Then Commit**: `send` only buffers; `sync_commit` performs all
//!    I/O for the queued commands and returns replies in send order.
//! 2. **Sticky Failure**: Any I/O or framing error marks the session broken
//!    so the pool replaces it instead of reusing it.
//! 3. **Buffer Reuse**: Each TCP connection keeps its own read/write buffers.

use std::io::{BufReader, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use bytes::BytesMut;
use mkv_common::{Command, Reply};

use crate::config::ClientConfig;
use crate::error::TransportError;
use crate::resp::{encode_command, read_reply};

/// A single, non-thread-safe session with the store.
///
/// The pool guarantees exclusive use, so implementations need `Send` but
/// not `Sync`.
pub trait Connection: Send + 'static {
    /// Queues `command` for the next commit. No I/O happens here.
    fn send(&mut self, command: &Command);

    /// Flushes every queued command and blocks until all replies arrive.
    ///
    /// Replies are returned in the order the commands were sent.
    fn sync_commit(&mut self) -> Result<Vec<Reply>, TransportError>;

    /// Whether the session may be handed to another borrower.
    fn is_healthy(&self) -> bool;

    /// Sends one command and waits for its reply.
    fn exec(&mut self, command: &Command) -> Result<Reply, TransportError> {
        self.send(command);
        single_reply(self.sync_commit()?)
    }
}

/// Unwraps the reply of a commit that carried exactly one command.
pub(crate) fn single_reply(mut replies: Vec<Reply>) -> Result<Reply, TransportError> {
    match (replies.pop(), replies.is_empty()) {
        (Some(reply), true) => Ok(reply),
        _ => Err(TransportError::Protocol(
            "expected exactly one reply for one command".to_string(),
        )),
    }
}

/// Factory for fresh connections, used for lazy creation and reconnects.
pub trait Connector: Send + Sync + 'static {
    type Connection: Connection;

    fn connect(&self) -> Result<Self::Connection, TransportError>;
}

/// Opens RESP2 sessions over blocking TCP sockets.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: String,
    connect_timeout: Option<Duration>,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
}

impl TcpConnector {
    pub fn new(addr: impl Into<String>) -> Self {
        TcpConnector {
            addr: addr.into(),
            connect_timeout: None,
            read_timeout: None,
            write_timeout: None,
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        TcpConnector {
            addr: config.addr.clone(),
            connect_timeout: config.connect_timeout(),
            read_timeout: config.read_timeout(),
            write_timeout: config.write_timeout(),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    fn resolve(&self) -> Result<SocketAddr, TransportError> {
        self.addr
            .to_socket_addrs()
            .map_err(|_| TransportError::InvalidAddress(self.addr.clone()))?
            .next()
            .ok_or_else(|| TransportError::InvalidAddress(self.addr.clone()))
    }
}

impl Connector for TcpConnector {
    type Connection = TcpConnection;

    fn connect(&self) -> Result<TcpConnection, TransportError> {
        let addr = self.resolve()?;
        let stream = match self.connect_timeout {
            Some(timeout) => TcpStream::connect_timeout(&addr, timeout)?,
            None => TcpStream::connect(addr)?,
        };
        if let Some(timeout) = self.read_timeout {
            stream.set_read_timeout(Some(timeout))?;
        }
        if let Some(timeout) = self.write_timeout {
            stream.set_write_timeout(Some(timeout))?;
        }
        // Disable Nagle to keep request latency low for small payloads.
        stream.set_nodelay(true)?;

        tracing::debug!(%addr, "opened store connection");
        Ok(TcpConnection {
            reader: BufReader::new(stream),
            line_buf: Vec::with_capacity(128),
            write_buf: BytesMut::with_capacity(256),
            queued: 0,
            broken: false,
        })
    }
}

/// Single TCP session with reusable buffers.
pub struct TcpConnection {
    // Buffered reader reduces syscalls while still allowing direct writes.
    reader: BufReader<TcpStream>,
    line_buf: Vec<u8>,
    write_buf: BytesMut,
    queued: usize,
    broken: bool,
}

impl TcpConnection {
    fn flush_and_read(&mut self) -> Result<Vec<Reply>, TransportError> {
        let queued = std::mem::take(&mut self.queued);
        let stream = self.reader.get_mut();
        stream.write_all(&self.write_buf)?;
        stream.flush()?;
        self.write_buf.clear();

        let mut replies = Vec::with_capacity(queued);
        for _ in 0..queued {
            replies.push(read_reply(&mut self.reader, &mut self.line_buf)?);
        }
        Ok(replies)
    }
}

impl Connection for TcpConnection {
    fn send(&mut self, command: &Command) {
        encode_command(command, &mut self.write_buf);
        self.queued += 1;
    }

    fn sync_commit(&mut self) -> Result<Vec<Reply>, TransportError> {
        if self.queued == 0 {
            return Ok(Vec::new());
        }
        let result = self.flush_and_read();
        if result.is_err() {
            // Replies may be half-read; the stream can no longer be trusted.
            self.broken = true;
            self.write_buf.clear();
        }
        result
    }

    fn is_healthy(&self) -> bool {
        !self.broken
    }
}
