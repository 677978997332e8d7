//! # Metered KV Client
//!
//! Purpose: Let many threads issue commands to a Redis-compatible store
//! through a small, bounded set of persistent connections, with every
//! command timed, logged and reported as a metric.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Reuse connections; pool size is the only
//!    concurrency limit.
//! 2. **Scoped Borrowing**: Connections are lent to closures and always
//!    returned, even on panic.
//! 3. **Injected Observability**: Metrics and log sinks are constructor
//!    arguments, not globals.
//! 4. **Protocol Clarity**: The bundled TCP connection encodes/parses RESP2
//!    explicitly.
//!
//! ```no_run
//! use mkv_client::{ClientConfig, Executor, Telemetry};
//! use mkv_common::Command;
//!
//! let executor = Executor::connect(ClientConfig::default(), Telemetry::tracing())?;
//! let value = executor.sync(&Command::from(["GET", "foo"]))?;
//! # Ok::<(), mkv_client::ClientError>(())
//! ```

mod clock;
mod config;
mod connection;
mod error;
mod executor;
mod pool;
mod resp;
mod stats;
mod telemetry;

pub use clock::{Clock, MonotonicClock};
pub use config::ClientConfig;
pub use connection::{Connection, Connector, TcpConnection, TcpConnector};
pub use error::{ClientError, ClientResult, TransportError};
pub use executor::{Executor, PendingReply, Session};
pub use pool::{ConnectionPool, PoolConfig, PoolStatus};
pub use stats::{CommandStats, LatencyHistogram, LatencySnapshot, StatsSnapshot, DEFAULT_LATENCY_BUCKETS_US};
pub use telemetry::{
    describe, LogEntry, LogSink, MetricRecord, MetricsFanout, MetricsSink, NoopMetrics, Pairs,
    Severity, Telemetry, TracingLog, TracingMetrics, COMMAND_METRIC,
};

pub use mkv_common::{Command, DecodeError, Reply, ReplyKind};
