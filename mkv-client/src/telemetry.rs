//! # Telemetry Recorder
//!
//! Purpose: Turn every completed command into one metric record and one log
//! entry, and hand both to injected collaborators.
//!
//! ## Design Principles
//! 1. **Dependency Injection**: Sinks are trait objects passed at
//!    construction; there is no process-wide service locator.
//! 2. **Never Fails**: Malformed input degrades the record (e.g. no `arg0`)
//!    instead of erroring.
//! 3. **Immutable Records**: A record is built once and moved to the sink.
//!
//! ## Notes
//! - `arg0` is the second token verbatim. For two-word operations such as
//!   `CLIENT SETNAME` this records the sub-command, not the key.

use std::sync::Arc;

use mkv_common::{Command, Reply};
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;

/// Metric name used for every command record.
pub const COMMAND_METRIC: &str = "Command";

/// Ordered name/value pairs.
pub type Pairs = Vec<(&'static str, String)>;

/// Immutable per-command metric snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricRecord {
    name: &'static str,
    #[serde(serialize_with = "ordered_map")]
    fields: Pairs,
    #[serde(serialize_with = "ordered_map")]
    tags: Pairs,
}

impl MetricRecord {
    pub fn new(name: &'static str, fields: Pairs, tags: Pairs) -> Self {
        MetricRecord { name, fields, tags }
    }

    pub fn name(&self) -> &str {
        self.name
    }

    pub fn fields(&self) -> &[(&'static str, String)] {
        &self.fields
    }

    pub fn tags(&self) -> &[(&'static str, String)] {
        &self.tags
    }

    pub fn field(&self, key: &str) -> Option<&str> {
        lookup(&self.fields, key)
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        lookup(&self.tags, key)
    }

    /// JSON rendering, `{"name":..,"fields":{..},"tags":{..}}`.
    pub fn to_json(&self) -> String {
        // Serializing string pairs into a String cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

fn lookup<'a>(pairs: &'a [(&'static str, String)], key: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(name, _)| *name == key)
        .map(|(_, value)| value.as_str())
}

fn ordered_map<S: Serializer>(pairs: &Pairs, serializer: S) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(pairs.len()))?;
    for (key, value) in pairs {
        map.serialize_entry(key, value)?;
    }
    map.end()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Debug,
    Error,
}

/// Formatted log line plus severity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub severity: Severity,
    pub message: String,
}

/// Receives metric records.
pub trait MetricsSink: Send + Sync {
    fn push(&self, record: MetricRecord);
}

/// Receives log entries.
pub trait LogSink: Send + Sync {
    fn log(&self, entry: LogEntry);
}

/// Forwards log entries to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLog;

impl LogSink for TracingLog {
    fn log(&self, entry: LogEntry) {
        match entry.severity {
            Severity::Debug => tracing::debug!(target: "mkv_client::query", "{}", entry.message),
            Severity::Error => tracing::error!(target: "mkv_client::query", "{}", entry.message),
        }
    }
}

/// Emits each record as a `tracing` event carrying its JSON form.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetrics;

impl MetricsSink for TracingMetrics {
    fn push(&self, record: MetricRecord) {
        tracing::trace!(target: "mkv_client::metrics", metric = record.name(), record = %record.to_json());
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn push(&self, _record: MetricRecord) {}
}

/// Sends every record to each inner sink in order.
#[derive(Default, Clone)]
pub struct MetricsFanout {
    sinks: Vec<Arc<dyn MetricsSink>>,
}

impl MetricsFanout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl MetricsSink for MetricsFanout {
    fn push(&self, record: MetricRecord) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.push(record.clone());
            }
            last.push(record);
        }
    }
}

/// Builds and forwards telemetry for completed commands.
#[derive(Clone)]
pub struct Telemetry {
    metrics: Arc<dyn MetricsSink>,
    log: Arc<dyn LogSink>,
}

impl Telemetry {
    pub fn new(metrics: Arc<dyn MetricsSink>, log: Arc<dyn LogSink>) -> Self {
        Telemetry { metrics, log }
    }

    /// Telemetry that reports only through `tracing`.
    pub fn tracing() -> Self {
        Telemetry::new(Arc::new(TracingMetrics), Arc::new(TracingLog))
    }

    /// Records one completed command. Empty commands are ignored.
    pub fn record(&self, command: &Command, reply: &Reply, elapsed_ns: u64) {
        if let Some((record, entry)) = describe(command, reply, elapsed_ns) {
            self.metrics.push(record);
            self.log.log(entry);
        }
    }
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::tracing()
    }
}

/// Derives the metric record and log entry for a command, if it has a name.
///
/// **Input**: the `command` sent, the `reply` received and `elapsed_ns`.
/// **Output**: `None` for an empty command, else the record and log entry.
///
/// **Logic**:
/// 1. Fields: uppercased `cmd`, `arg0` when a second token exists, `reply_type`.
/// 2. Tags: `ns`, plus `error` carrying the payload of an error reply.
/// 3. Log at `Error` severity for error replies, `Debug` otherwise.
pub fn describe(command: &Command, reply: &Reply, elapsed_ns: u64) -> Option<(MetricRecord, LogEntry)> {
    let name = command.name()?;

    let mut fields: Pairs = Vec::with_capacity(3);
    fields.push(("cmd", name.to_uppercase()));
    if let Some(arg0) = command.arg(1) {
        fields.push(("arg0", arg0.to_string()));
    }
    fields.push(("reply_type", reply.kind().to_string()));

    let mut tags: Pairs = Vec::with_capacity(2);
    tags.push(("ns", elapsed_ns.to_string()));
    if let Reply::Error(message) = reply {
        tags.push(("error", message.clone()));
    }

    let query = command.to_query_string();
    let rendered = reply.as_string();
    let entry = if reply.is_error() {
        LogEntry {
            severity: Severity::Error,
            message: format!("Query failed: '{}' -> '{}'", query, rendered),
        }
    } else {
        LogEntry {
            severity: Severity::Debug,
            message: format!("Query: '{}' -> '{}'", query, rendered),
        }
    };

    Some((MetricRecord::new(COMMAND_METRIC, fields, tags), entry))
}
