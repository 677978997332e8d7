//! # Command Executor
//!
//! Purpose: The public entry point. Every operation borrows a pooled
//! connection, times the command with a monotonic clock and reports it
//! through [`Telemetry`] before handing the reply back.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: Callers never see the pool guard, only closures
//!    and replies.
//! 2. **Errors Are Data**: A store `Error` reply is returned as a `Reply`;
//!    only transport, pool and decode failures become `ClientError`.
//! 3. **Hold Until Read**: An async command keeps its connection until the
//!    reply is read, then releases it before the caller's callback runs.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::thread;

use mkv_common::{Command, Reply};
use tokio::sync::oneshot;

use crate::clock::{Clock, MonotonicClock};
use crate::config::ClientConfig;
use crate::connection::{single_reply, Connection, Connector, TcpConnector};
use crate::error::{ClientError, ClientResult, TransportError};
use crate::pool::{ConnectionPool, PoolConfig};
use crate::telemetry::Telemetry;

/// Instrumented command executor over a connection pool.
pub struct Executor<K: Connector = TcpConnector> {
    pool: ConnectionPool<K>,
    telemetry: Telemetry,
    clock: Arc<dyn Clock>,
}

impl<K: Connector> Clone for Executor<K> {
    fn clone(&self) -> Self {
        Executor {
            pool: self.pool.clone(),
            telemetry: self.telemetry.clone(),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl Executor<TcpConnector> {
    /// Builds a TCP-backed executor. Connections open lazily.
    pub fn connect(config: ClientConfig, telemetry: Telemetry) -> ClientResult<Self> {
        config.validate()?;
        let pool = ConnectionPool::new(
            TcpConnector::from_config(&config),
            PoolConfig::from_client_config(&config),
        )?;
        Ok(Executor::new(pool, telemetry))
    }
}

impl<K: Connector> Executor<K> {
    pub fn new(pool: ConnectionPool<K>, telemetry: Telemetry) -> Self {
        Executor {
            pool,
            telemetry,
            clock: Arc::new(MonotonicClock::new()),
        }
    }

    /// Replaces the latency clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn pool(&self) -> &ConnectionPool<K> {
        &self.pool
    }

    /// Runs `work` with one exclusively borrowed connection.
    ///
    /// Commands issued through the session complete in the order sent.
    pub fn with_connection<R, F>(&self, work: F) -> ClientResult<R>
    where
        F: FnOnce(&mut Session<'_, K::Connection>) -> R,
    {
        self.pool.borrow(|conn| {
            let mut session = Session {
                conn,
                telemetry: &self.telemetry,
                clock: self.clock.as_ref(),
            };
            work(&mut session)
        })
    }

    /// Sends `command` and blocks for its reply.
    pub fn raw_sync(&self, command: &Command) -> ClientResult<Reply> {
        self.with_connection(|session| session.raw(command))?
    }

    /// [`raw_sync`](Self::raw_sync) rendered through [`Reply::as_string`].
    pub fn sync(&self, command: &Command) -> ClientResult<String> {
        self.with_connection(|session| session.sync(command))?
    }

    /// Decodes an array reply into its elements' string renderings.
    ///
    /// Any non-array reply, store errors included, is a `Decode` error.
    pub fn sync_list(&self, command: &Command) -> ClientResult<Vec<String>> {
        self.with_connection(|session| session.sync_list(command))?
    }

    /// Sends all commands in one commit on a single connection.
    pub fn pipeline(&self, commands: &[Command]) -> ClientResult<Vec<Reply>> {
        self.with_connection(|session| session.pipeline(commands))?
    }

    /// Issues `command` without waiting for the reply.
    ///
    /// **Input**: an owned `command` and the `on_reply` completion callback.
    /// **Output**: `Ok(())` once the command is handed off; empty-command,
    /// pool and spawn failures are returned here instead of to `on_reply`.
    ///
    /// **Logic**:
    /// 1. Reject empty commands, then borrow a connection on the calling
    ///    thread (the only blocking step for the caller).
    /// 2. On a dedicated `mkv-reply` thread: send, commit, time the round
    ///    trip and record telemetry.
    /// 3. Return the connection to the pool.
    /// 4. Invoke `on_reply` on that same thread with the reply or transport error.
    pub fn raw_async<F>(&self, command: Command, on_reply: F) -> ClientResult<()>
    where
        F: FnOnce(ClientResult<Reply>) + Send + 'static,
    {
        if command.is_empty() {
            return Err(ClientError::EmptyCommand);
        }
        let mut conn = self.pool.checkout()?;
        let telemetry = self.telemetry.clone();
        let clock = Arc::clone(&self.clock);

        thread::Builder::new()
            .name("mkv-reply".to_string())
            .spawn(move || {
                let start = clock.now_ns();
                conn.send(&command);
                let result = conn.sync_commit().and_then(single_reply);
                let elapsed_ns = clock.now_ns().saturating_sub(start);
                let result = match result {
                    Ok(reply) => {
                        telemetry.record(&command, &reply, elapsed_ns);
                        Ok(reply)
                    }
                    Err(err) => Err(transport_failure(&command, err)),
                };
                drop(conn);
                on_reply(result);
            })
            .map_err(ClientError::Spawn)?;
        Ok(())
    }

    /// [`raw_async`](Self::raw_async) delivered through a [`PendingReply`].
    pub fn raw_deferred(&self, command: Command) -> ClientResult<PendingReply> {
        let (tx, rx) = oneshot::channel();
        self.raw_async(command, move |result| {
            // The receiver may have been dropped; nobody is waiting then.
            let _ = tx.send(result);
        })?;
        Ok(PendingReply { rx })
    }
}

/// Exclusive, instrumented access to one pooled connection.
pub struct Session<'a, C: Connection> {
    conn: &'a mut C,
    telemetry: &'a Telemetry,
    clock: &'a dyn Clock,
}

impl<C: Connection> Session<'_, C> {
    /// Sends one command and waits for its reply.
    ///
    /// Empty commands never reach the wire: a store answers nothing to them.
    pub fn raw(&mut self, command: &Command) -> ClientResult<Reply> {
        if command.is_empty() {
            return Err(ClientError::EmptyCommand);
        }
        let start = self.clock.now_ns();
        let result = self.conn.exec(command);
        let elapsed_ns = self.clock.now_ns().saturating_sub(start);
        match result {
            Ok(reply) => {
                self.telemetry.record(command, &reply, elapsed_ns);
                Ok(reply)
            }
            Err(err) => Err(transport_failure(command, err)),
        }
    }

    pub fn sync(&mut self, command: &Command) -> ClientResult<String> {
        Ok(self.raw(command)?.as_string())
    }

    pub fn sync_list(&mut self, command: &Command) -> ClientResult<Vec<String>> {
        let items = self.raw(command)?.into_array()?;
        Ok(items.iter().map(Reply::as_string).collect())
    }

    /// Queues every command, then commits once.
    ///
    /// Each command is recorded with the elapsed time of the whole batch.
    pub fn pipeline(&mut self, commands: &[Command]) -> ClientResult<Vec<Reply>> {
        if commands.is_empty() {
            return Ok(Vec::new());
        }
        if commands.iter().any(Command::is_empty) {
            return Err(ClientError::EmptyCommand);
        }

        let start = self.clock.now_ns();
        for command in commands {
            self.conn.send(command);
        }
        let result = self.conn.sync_commit();
        let elapsed_ns = self.clock.now_ns().saturating_sub(start);

        let replies = match result {
            Ok(replies) if replies.len() == commands.len() => replies,
            Ok(replies) => {
                let err = TransportError::Protocol(format!(
                    "pipeline of {} commands got {} replies",
                    commands.len(),
                    replies.len()
                ));
                return Err(transport_failure(&commands[0], err));
            }
            Err(err) => return Err(transport_failure(&commands[0], err)),
        };

        for (command, reply) in commands.iter().zip(&replies) {
            self.telemetry.record(command, reply, elapsed_ns);
        }
        Ok(replies)
    }
}

fn transport_failure(command: &Command, err: TransportError) -> ClientError {
    tracing::warn!(query = %command, error = %err, "command failed in transport");
    err.into()
}

/// Reply of a command issued with [`Executor::raw_deferred`].
///
/// Await it from async code, or call [`wait`](Self::wait) from a plain
/// thread.
#[derive(Debug)]
pub struct PendingReply {
    rx: oneshot::Receiver<ClientResult<Reply>>,
}

impl PendingReply {
    /// Blocks until the reply arrives.
    ///
    /// Panics if called from within an async runtime; `.await` it there.
    pub fn wait(self) -> ClientResult<Reply> {
        self.rx.blocking_recv().unwrap_or(Err(ClientError::Canceled))
    }
}

impl Future for PendingReply {
    type Output = ClientResult<Reply>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(ClientError::Canceled)))
    }
}
