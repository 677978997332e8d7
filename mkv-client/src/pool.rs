//! # Connection Pool
//!
//! Purpose: Give many caller threads exclusive, blocking access to a fixed
//! set of store connections.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: A bounded set of slots, one connection each.
//! 2. **Scoped Borrow**: Callers pass a closure; an RAII guard returns the
//!    slot on every exit path, panics included.
//! 3. **Minimal Locking**: The mutex guards only the idle queue. Connecting
//!    and command I/O happen outside it.
//! 4. **Lazy Repair**: Slots connect on first borrow; broken connections are
//!    dropped on return and reconnected by the next borrower.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::config::ClientConfig;
use crate::connection::{Connection, Connector};
use crate::error::{ClientError, ClientResult, TransportError};

/// Pool sizing and wait policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of connection slots.
    pub size: usize,
    /// Upper bound on waiting for a free slot. `None` blocks indefinitely.
    pub acquire_timeout: Option<Duration>,
    /// Immediate retries after a failed connect before a borrow fails.
    pub reconnect_attempts: u32,
}

impl PoolConfig {
    pub fn from_client_config(config: &ClientConfig) -> Self {
        PoolConfig {
            size: config.pool_size,
            acquire_timeout: config.acquire_timeout(),
            reconnect_attempts: config.reconnect_attempts,
        }
    }
}

/// Point-in-time view of the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub size: usize,
    pub idle: usize,
    pub borrowed: usize,
    /// Idle slots currently holding a live connection.
    pub connected: usize,
}

struct Slot<C> {
    id: usize,
    conn: Option<C>,
}

struct PoolState<C> {
    idle: VecDeque<Slot<C>>,
    borrowed: usize,
}

struct PoolInner<K: Connector> {
    connector: K,
    config: PoolConfig,
    state: Mutex<PoolState<K::Connection>>,
    available: Condvar,
}

impl<K: Connector> PoolInner<K> {
    fn lock(&self) -> MutexGuard<'_, PoolState<K::Connection>> {
        // The state is only mutated by short, non-panicking sections.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn put_back(&self, slot: Slot<K::Connection>) {
        let mut state = self.lock();
        state.borrowed = state.borrowed.saturating_sub(1);
        state.idle.push_back(slot);
        drop(state);
        self.available.notify_one();
    }
}

/// Shared handle to a fixed-size connection pool.
pub struct ConnectionPool<K: Connector> {
    inner: Arc<PoolInner<K>>,
}

impl<K: Connector> Clone for ConnectionPool<K> {
    fn clone(&self) -> Self {
        ConnectionPool {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K: Connector> ConnectionPool<K> {
    /// Creates a pool of `config.size` empty slots.
    ///
    /// No connection is opened until the first borrow of each slot.
    pub fn new(connector: K, config: PoolConfig) -> ClientResult<Self> {
        if config.size == 0 {
            return Err(ClientError::InvalidConfig("pool size must be at least 1"));
        }
        let idle = (0..config.size).map(|id| Slot { id, conn: None }).collect();
        Ok(ConnectionPool {
            inner: Arc::new(PoolInner {
                connector,
                config,
                state: Mutex::new(PoolState { idle, borrowed: 0 }),
                available: Condvar::new(),
            }),
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Runs `work` with exclusive use of one connection.
    ///
    /// `work` cannot keep the connection: the borrow ends with the closure.
    ///
    /// **Input**: `work`, a closure receiving `&mut` access to the connection.
    /// **Output**: whatever `work` returns, or an acquire/connect error.
    ///
    /// **Logic**:
    /// 1. Pop an idle slot, waiting on the condvar (bounded by
    ///    `acquire_timeout`) while none is free.
    /// 2. Reuse the slot's connection if healthy, otherwise reconnect with
    ///    up to `reconnect_attempts` retries.
    /// 3. Run `work`; the guard returns the slot when `work` finishes or
    ///    unwinds, discarding the connection if it broke.
    pub fn borrow<R, F>(&self, work: F) -> ClientResult<R>
    where
        F: FnOnce(&mut K::Connection) -> R,
    {
        let mut conn = self.checkout()?;
        Ok(work(&mut *conn))
    }

    pub fn status(&self) -> PoolStatus {
        let state = self.inner.lock();
        PoolStatus {
            size: self.inner.config.size,
            idle: state.idle.len(),
            borrowed: state.borrowed,
            connected: state.idle.iter().filter(|slot| slot.conn.is_some()).count(),
        }
    }

    /// Checks out a connected slot as an owned guard.
    ///
    /// Kept crate-private: the guard is what lets the async path carry a
    /// borrow onto the reply thread.
    pub(crate) fn checkout(&self) -> ClientResult<PooledConnection<K>> {
        let slot = self.take_slot()?;
        let id = slot.id;
        match self.revive(slot.conn) {
            Ok(conn) => Ok(PooledConnection {
                pool: Arc::clone(&self.inner),
                id,
                conn: Some(conn),
            }),
            Err(err) => {
                self.inner.put_back(Slot { id, conn: None });
                Err(err.into())
            }
        }
    }

    fn take_slot(&self) -> ClientResult<Slot<K::Connection>> {
        let timeout = self.inner.config.acquire_timeout;
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.inner.lock();
        loop {
            if let Some(slot) = state.idle.pop_front() {
                state.borrowed += 1;
                return Ok(slot);
            }
            state = match (deadline, timeout) {
                (Some(deadline), Some(timeout)) => {
                    let now = Instant::now();
                    if now >= deadline {
                        tracing::warn!(?timeout, "timed out waiting for a pooled connection");
                        return Err(ClientError::AcquireTimeout(timeout));
                    }
                    self.inner
                        .available
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                _ => self
                    .inner
                    .available
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
            };
        }
    }

    /// Returns a healthy connection, reconnecting with bounded retries.
    fn revive(&self, conn: Option<K::Connection>) -> Result<K::Connection, TransportError> {
        if let Some(conn) = conn.filter(|c| c.is_healthy()) {
            return Ok(conn);
        }

        let retries = self.inner.config.reconnect_attempts;
        let mut attempt = 0;
        loop {
            match self.inner.connector.connect() {
                Ok(conn) => return Ok(conn),
                Err(err) if attempt < retries => {
                    attempt += 1;
                    tracing::warn!(error = %err, attempt, retries, "connect failed, retrying");
                }
                Err(err) => {
                    tracing::error!(error = %err, "connect failed, giving up");
                    return Err(err);
                }
            }
        }
    }
}

/// RAII borrow returning its slot to the pool on drop.
///
/// Broken connections are discarded on return so the slot reconnects on
/// its next borrow.
pub(crate) struct PooledConnection<K: Connector> {
    pool: Arc<PoolInner<K>>,
    id: usize,
    conn: Option<K::Connection>,
}

impl<K: Connector> Deref for PooledConnection<K> {
    type Target = K::Connection;

    fn deref(&self) -> &K::Connection {
        self.conn.as_ref().expect("connection present until drop")
    }
}

impl<K: Connector> DerefMut for PooledConnection<K> {
    fn deref_mut(&mut self) -> &mut K::Connection {
        self.conn.as_mut().expect("connection present until drop")
    }
}

impl<K: Connector> Drop for PooledConnection<K> {
    fn drop(&mut self) {
        let conn = self.conn.take().filter(|c| c.is_healthy());
        if conn.is_none() {
            tracing::debug!(slot = self.id, "discarding broken connection");
        }
        self.pool.put_back(Slot { id: self.id, conn });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{catch_unwind, AssertUnwindSafe};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::thread;

    use mkv_common::{Command, Reply};

    struct FakeConn {
        id: usize,
        healthy: bool,
        in_use: Arc<AtomicBool>,
    }

    impl Connection for FakeConn {
        fn send(&mut self, _command: &Command) {}

        fn sync_commit(&mut self) -> Result<Vec<Reply>, TransportError> {
            Ok(vec![Reply::SimpleString("OK".into())])
        }

        fn is_healthy(&self) -> bool {
            self.healthy
        }
    }

    #[derive(Default)]
    struct FakeConnector {
        opened: AtomicUsize,
        failures_left: AtomicUsize,
    }

    impl FakeConnector {
        fn failing(times: usize) -> Self {
            FakeConnector {
                opened: AtomicUsize::new(0),
                failures_left: AtomicUsize::new(times),
            }
        }
    }

    impl Connector for FakeConnector {
        type Connection = FakeConn;

        fn connect(&self) -> Result<FakeConn, TransportError> {
            let failed = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failed {
                return Err(TransportError::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "refused",
                )));
            }
            Ok(FakeConn {
                id: self.opened.fetch_add(1, Ordering::SeqCst),
                healthy: true,
                in_use: Arc::new(AtomicBool::new(false)),
            })
        }
    }

    fn pool(size: usize, connector: FakeConnector) -> ConnectionPool<FakeConnector> {
        ConnectionPool::new(
            connector,
            PoolConfig {
                size,
                acquire_timeout: None,
                reconnect_attempts: 2,
            },
        )
        .unwrap()
    }

    #[test]
    fn rejects_zero_sized_pool() {
        let result = ConnectionPool::new(
            FakeConnector::default(),
            PoolConfig {
                size: 0,
                acquire_timeout: None,
                reconnect_attempts: 0,
            },
        );
        assert!(matches!(result, Err(ClientError::InvalidConfig(_))));
    }

    #[test]
    fn connects_lazily_and_reuses() {
        let pool = pool(2, FakeConnector::default());
        assert_eq!(pool.status().connected, 0);

        let first = pool.borrow(|c| c.id).unwrap();
        let second = pool.borrow(|c| c.id).unwrap();
        assert_eq!(pool.inner.connector.opened.load(Ordering::SeqCst), 2);
        assert_ne!(first, second);

        // Both slots are now connected; further borrows open nothing new.
        pool.borrow(|_| ()).unwrap();
        pool.borrow(|_| ()).unwrap();
        assert_eq!(pool.inner.connector.opened.load(Ordering::SeqCst), 2);
        let status = pool.status();
        assert_eq!((status.idle, status.borrowed, status.connected), (2, 0, 2));
    }

    #[test]
    fn concurrency_is_capped_at_pool_size() {
        let pool = pool(2, FakeConnector::default());
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = pool.clone();
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                thread::spawn(move || {
                    pool.borrow(|conn| {
                        // Shared flag per connection: set twice means double hand-out.
                        assert!(!conn.in_use.swap(true, Ordering::SeqCst));
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(20));
                        active.fetch_sub(1, Ordering::SeqCst);
                        conn.in_use.store(false, Ordering::SeqCst);
                    })
                    .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert_eq!(pool.status().borrowed, 0);
    }

    #[test]
    fn releases_slot_when_work_panics() {
        let pool = pool(1, FakeConnector::default());
        let result = catch_unwind(AssertUnwindSafe(|| {
            pool.borrow(|_| panic!("boom")).unwrap();
        }));
        assert!(result.is_err());
        assert_eq!(pool.status().idle, 1);
        assert_eq!(pool.borrow(|c| c.id).unwrap(), 0);
    }

    #[test]
    fn acquire_times_out_when_saturated() {
        let pool = ConnectionPool::new(
            FakeConnector::default(),
            PoolConfig {
                size: 1,
                acquire_timeout: Some(Duration::from_millis(30)),
                reconnect_attempts: 0,
            },
        )
        .unwrap();

        let held = pool.checkout().unwrap();
        let started = Instant::now();
        let err = pool.borrow(|_| ()).unwrap_err();
        assert!(matches!(err, ClientError::AcquireTimeout(_)));
        assert!(started.elapsed() >= Duration::from_millis(30));

        drop(held);
        assert!(pool.borrow(|_| ()).is_ok());
    }

    #[test]
    fn waiter_wakes_when_slot_returns() {
        let pool = pool(1, FakeConnector::default());
        let held = pool.checkout().unwrap();
        let waiter = {
            let pool = pool.clone();
            thread::spawn(move || pool.borrow(|c| c.id).unwrap())
        };
        thread::sleep(Duration::from_millis(20));
        drop(held);
        assert_eq!(waiter.join().unwrap(), 0);
    }

    #[test]
    fn broken_connection_is_replaced_on_next_borrow() {
        let pool = pool(1, FakeConnector::default());
        pool.borrow(|c| c.healthy = false).unwrap();
        assert_eq!(pool.status().connected, 0);

        let id = pool.borrow(|c| c.id).unwrap();
        assert_eq!(id, 1);
    }

    #[test]
    fn reconnect_retries_before_failing() {
        let pool = pool(1, FakeConnector::failing(2));
        assert_eq!(pool.borrow(|c| c.id).unwrap(), 0);

        let pool = super::tests::pool(1, FakeConnector::failing(3));
        let err = pool.borrow(|_| ()).unwrap_err();
        assert!(matches!(err, ClientError::Transport(TransportError::Io(_))));
        // The failed borrow still gave its slot back.
        assert_eq!(pool.status().idle, 1);
        assert!(pool.borrow(|_| ()).is_ok());
    }
}
