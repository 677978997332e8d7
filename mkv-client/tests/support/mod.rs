#![allow(dead_code)]

use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use mkv_client::{
    Clock, Connection, Connector, LogEntry, LogSink, MetricRecord, MetricsSink, TransportError,
};
use mkv_common::{Command, Reply};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Manually advanced clock.
#[derive(Default)]
pub struct FakeClock {
    now: AtomicU64,
}

impl FakeClock {
    pub fn advance(&self, ns: u64) {
        self.now.fetch_add(ns, Ordering::SeqCst);
    }
}

impl Clock for FakeClock {
    fn now_ns(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Collects everything the telemetry recorder forwards.
#[derive(Default)]
pub struct Recorder {
    records: Mutex<Vec<MetricRecord>>,
    entries: Mutex<Vec<LogEntry>>,
}

impl Recorder {
    pub fn records(&self) -> Vec<MetricRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().unwrap().clone()
    }
}

impl MetricsSink for Recorder {
    fn push(&self, record: MetricRecord) {
        self.records.lock().unwrap().push(record);
    }
}

impl LogSink for Recorder {
    fn log(&self, entry: LogEntry) {
        self.entries.lock().unwrap().push(entry);
    }
}

/// Maps a command to a reply, or to a transport failure message.
pub type Handler = dyn Fn(&Command) -> Result<Reply, String> + Send + Sync;

/// In-memory connector whose connections answer through `handler` and
/// advance the fake clock by `step_ns` per command.
pub struct ScriptedConnector {
    clock: Arc<FakeClock>,
    step_ns: u64,
    handler: Arc<Handler>,
    opened: AtomicUsize,
}

impl ScriptedConnector {
    pub fn new<F>(clock: Arc<FakeClock>, step_ns: u64, handler: F) -> Self
    where
        F: Fn(&Command) -> Result<Reply, String> + Send + Sync + 'static,
    {
        ScriptedConnector {
            clock,
            step_ns,
            handler: Arc::new(handler),
            opened: AtomicUsize::new(0),
        }
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

impl Connector for ScriptedConnector {
    type Connection = ScriptedConnection;

    fn connect(&self) -> Result<ScriptedConnection, TransportError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(ScriptedConnection {
            queued: Vec::new(),
            clock: Arc::clone(&self.clock),
            step_ns: self.step_ns,
            handler: Arc::clone(&self.handler),
            broken: false,
        })
    }
}

pub struct ScriptedConnection {
    queued: Vec<Command>,
    clock: Arc<FakeClock>,
    step_ns: u64,
    handler: Arc<Handler>,
    broken: bool,
}

impl Connection for ScriptedConnection {
    fn send(&mut self, command: &Command) {
        self.queued.push(command.clone());
    }

    fn sync_commit(&mut self) -> Result<Vec<Reply>, TransportError> {
        let mut replies = Vec::with_capacity(self.queued.len());
        for command in self.queued.drain(..) {
            self.clock.advance(self.step_ns);
            match (self.handler)(&command) {
                Ok(reply) => replies.push(reply),
                Err(message) => {
                    self.broken = true;
                    return Err(TransportError::Io(std::io::Error::new(
                        std::io::ErrorKind::ConnectionReset,
                        message,
                    )));
                }
            }
        }
        Ok(replies)
    }

    fn is_healthy(&self) -> bool {
        !self.broken
    }
}

/// Serves `connections` sequential clients over RESP2, numbering commands
/// across them. Empty multibulks are skipped without a reply, as Redis does.
pub fn spawn_server(connections: usize, handler: fn(usize, Vec<Vec<u8>>, &mut TcpStream)) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();

    thread::spawn(move || {
        let mut idx = 0;
        for _ in 0..connections {
            let Ok((mut stream, _)) = listener.accept() else {
                return;
            };
            let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
            let mut reader = BufReader::new(stream.try_clone().expect("clone"));
            while let Ok(args) = read_request(&mut reader) {
                if args.is_empty() {
                    continue;
                }
                handler(idx, args, &mut stream);
                idx += 1;
            }
        }
    });

    addr
}

/// Reads one `*N` request of `$len` bulk arguments.
fn read_request<R: BufRead>(reader: &mut R) -> io::Result<Vec<Vec<u8>>> {
    let count = read_header(reader, b'*')?;
    (0..count)
        .map(|_| {
            let len = read_header(reader, b'$')?;
            let mut data = vec![0u8; len + 2];
            reader.read_exact(&mut data)?;
            if !data.ends_with(b"\r\n") {
                return Err(invalid("bulk argument missing CRLF"));
            }
            data.truncate(len);
            Ok(data)
        })
        .collect()
}

/// Reads a `<prefix><digits>\r\n` line and returns the number.
fn read_header<R: BufRead>(reader: &mut R, prefix: u8) -> io::Result<usize> {
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "client closed"));
    }
    line.strip_suffix("\r\n")
        .and_then(|body| body.strip_prefix(prefix as char))
        .and_then(|digits| digits.parse().ok())
        .ok_or_else(|| invalid("malformed request header"))
}

fn invalid(message: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.to_string())
}

pub fn write_raw(stream: &mut TcpStream, data: &[u8]) {
    let _ = stream.write_all(data);
    let _ = stream.flush();
}

pub fn write_bulk(stream: &mut TcpStream, data: &[u8]) {
    let mut out = format!("${}\r\n", data.len()).into_bytes();
    out.extend_from_slice(data);
    out.extend_from_slice(b"\r\n");
    write_raw(stream, &out);
}
