use super::config::PoolConfig;
use super::{ConnectionFactory, ManagedConnection};
use crate::core::{Clock, PoolError, Result, SystemClock};
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Connection pool
///
/// Hands out connections most-recently-returned first, so a few warm
/// connections absorb the load while the rest age out. Liveness is checked
/// lazily: a closed or expired connection is only noticed when `acquire` pops
/// it or when a `release` sweeps the idle store.
///
/// `acquire` never waits. When every connection is checked out and the pool is
/// at `max_connections` it fails with [`PoolError::Exhausted`].
///
/// # Examples
///
/// ```
/// use lifopool::{ManagedConnection, MemoryFactory, Pool, PoolConfig};
///
/// # fn main() -> lifopool::Result<()> {
/// let pool = Pool::new(PoolConfig::new(0, 2), MemoryFactory::new())?;
///
/// let conn = pool.acquire()?;
/// conn.begin()?;
/// pool.release(conn.clone());
///
/// // rolled back on the way in, and handed out again next
/// let again = pool.acquire()?;
/// assert!(std::sync::Arc::ptr_eq(&conn, &again));
/// assert!(!again.is_mid_transaction());
/// # Ok(())
/// # }
/// ```
pub struct Pool<F: ConnectionFactory> {
    config: PoolConfig,
    factory: F,
    clock: Arc<dyn Clock>,
    state: Mutex<PoolState<F::Connection>>,
}

/// An idle connection and the time it came back to the pool
struct IdleEntry<C> {
    conn: Arc<C>,
    returned_at: Instant,
}

struct PoolState<C> {
    /// LIFO: the last element is handed out next
    idle: Vec<IdleEntry<C>>,
    /// Checked-out connections keyed by address
    in_use: HashMap<usize, Arc<C>>,
    /// Slots reserved by `acquire` for a factory call running unlocked
    connecting: usize,
    /// Slots reserved by replenishment for a factory call running unlocked
    replenishing: usize,
    counters: Counters,
}

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    created: u64,
    closed: u64,
    stale_discarded: u64,
    reused: u64,
    exhausted: u64,
}

impl<C> PoolState<C> {
    fn new() -> Self {
        Self {
            idle: Vec::new(),
            in_use: HashMap::new(),
            connecting: 0,
            replenishing: 0,
            counters: Counters::default(),
        }
    }

    /// Connections that count toward `max_connections`
    fn total(&self) -> usize {
        self.in_use.len() + self.idle.len() + self.connecting + self.replenishing
    }
}

enum Checkout<C> {
    Idle(Arc<C>),
    Reserved,
    Exhausted,
}

fn conn_key<C>(conn: &Arc<C>) -> usize {
    Arc::as_ptr(conn) as usize
}

impl<F: ConnectionFactory> Pool<F> {
    /// Create a pool and open `min_connections` idle connections up front
    pub fn new(config: PoolConfig, factory: F) -> Result<Self> {
        Self::with_clock(config, factory, Arc::new(SystemClock))
    }

    /// Create a pool that reads idle ages from `clock`
    pub fn with_clock(config: PoolConfig, factory: F, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate().map_err(PoolError::Configuration)?;

        let pool = Self {
            config,
            factory,
            clock,
            state: Mutex::new(PoolState::new()),
        };
        pool.warm_up()?;

        Ok(pool)
    }

    fn warm_up(&self) -> Result<()> {
        for _ in 0..self.config.min_connections {
            let conn = Arc::new(self.factory.connect()?);
            let mut state = self.lock_state()?;
            let returned_at = self.clock.now();
            state.counters.created += 1;
            state.idle.push(IdleEntry { conn, returned_at });
        }

        if self.config.min_connections > 0 {
            info!(
                "Connection pool warmed with {} idle connections",
                self.config.min_connections
            );
        }
        Ok(())
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, PoolState<F::Connection>>> {
        Ok(self.state.lock()?)
    }

    /// Read-only view for introspection; a poisoned lock still has consistent counts
    fn peek_state(&self) -> MutexGuard<'_, PoolState<F::Connection>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_expired(&self, entry: &IdleEntry<F::Connection>, now: Instant) -> bool {
        match self.config.idle_timeout {
            Some(timeout) => now.saturating_duration_since(entry.returned_at) >= timeout,
            None => false,
        }
    }

    /// Get a connection from the pool
    ///
    /// Reuses the most recently returned idle connection, skipping closed and
    /// expired ones. Opens a new connection only when no idle one is usable
    /// and the pool is below `max_connections`; factory errors are returned
    /// as-is.
    pub fn acquire(&self) -> Result<Arc<F::Connection>> {
        let mut expired = Vec::new();

        let checkout = {
            let mut state = self.lock_state()?;
            let now = self.clock.now();

            let reused = loop {
                let Some(entry) = state.idle.pop() else {
                    break None;
                };
                if entry.conn.is_closed() {
                    debug!("Discarding idle connection closed while pooled");
                    state.counters.stale_discarded += 1;
                    continue;
                }
                if self.is_expired(&entry, now) {
                    debug!("Discarding idle connection past idle timeout");
                    state.counters.closed += 1;
                    expired.push(entry.conn);
                    continue;
                }
                break Some(entry.conn);
            };

            match reused {
                Some(conn) => {
                    state.in_use.insert(conn_key(&conn), Arc::clone(&conn));
                    state.counters.reused += 1;
                    Checkout::Idle(conn)
                }
                None if state.total() < self.config.max_connections => {
                    state.connecting += 1;
                    Checkout::Reserved
                }
                None => {
                    state.counters.exhausted += 1;
                    Checkout::Exhausted
                }
            }
        };

        close_all(expired);

        match checkout {
            Checkout::Idle(conn) => Ok(conn),
            Checkout::Exhausted => Err(PoolError::Exhausted {
                max_connections: self.config.max_connections,
            }),
            Checkout::Reserved => {
                let connected = self.factory.connect();
                let mut state = self.lock_state()?;
                state.connecting -= 1;

                let conn = Arc::new(connected?);
                state.counters.created += 1;
                state.in_use.insert(conn_key(&conn), Arc::clone(&conn));
                Ok(conn)
            }
        }
    }

    /// Get a connection wrapped in a guard that releases it on drop
    pub fn get(&self) -> Result<PoolGuard<'_, F>> {
        Ok(PoolGuard {
            conn: Some(self.acquire()?),
            pool: self,
        })
    }

    /// Return a connection to the pool
    ///
    /// Closed connections are dropped, open transactions are rolled back, and
    /// the idle store is swept of expired entries before it is topped back up
    /// to `min_connections`. Never fails: maintenance errors are logged.
    pub fn release(&self, conn: Arc<F::Connection>) {
        if let Err(e) = self.put_back(conn) {
            error!("Failed to return connection to pool: {}", e);
            return;
        }
        self.replenish();
    }

    fn put_back(&self, conn: Arc<F::Connection>) -> Result<()> {
        let mut usable = !conn.is_closed();

        if usable && conn.is_mid_transaction() {
            if let Err(e) = conn.reset_transaction() {
                warn!("Discarding connection after failed transaction reset: {}", e);
                if let Err(e) = conn.close() {
                    warn!("Failed to close connection: {}", e);
                }
                usable = false;
            }
        }

        let mut to_close = Vec::new();
        {
            let mut state = self.lock_state()?;
            let was_in_use = state.in_use.remove(&conn_key(&conn)).is_some();
            let already_idle = !was_in_use
                && state.idle.iter().any(|entry| Arc::ptr_eq(&entry.conn, &conn));
            if already_idle {
                warn!("Released a connection that is already idle in this pool");
            } else if !was_in_use {
                warn!("Released a connection that was not checked out from this pool");
            }

            if usable && !already_idle {
                if !was_in_use && state.total() >= self.config.max_connections {
                    state.counters.closed += 1;
                    to_close.push(conn);
                } else {
                    let returned_at = self.clock.now();
                    state.idle.push(IdleEntry { conn, returned_at });
                }
            }

            if self.config.idle_timeout.is_some() {
                let now = self.clock.now();
                let (expired, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut state.idle)
                    .into_iter()
                    .partition(|entry| self.is_expired(entry, now));
                state.idle = kept;

                if !expired.is_empty() {
                    debug!("Evicting {} idle connections past idle timeout", expired.len());
                    state.counters.closed += expired.len() as u64;
                    to_close.extend(expired.into_iter().map(|entry| entry.conn));
                }
            }
        }

        close_all(to_close);
        Ok(())
    }

    /// Open idle connections until `min_connections` are available.
    ///
    /// Stops at the first factory error; the next release tries again.
    fn replenish(&self) {
        loop {
            {
                let Ok(mut state) = self.lock_state() else {
                    return;
                };
                let below_min =
                    state.idle.len() + state.replenishing < self.config.min_connections;
                if !below_min || state.total() >= self.config.max_connections {
                    return;
                }
                state.replenishing += 1;
            }

            let connected = self.factory.connect();

            let Ok(mut state) = self.lock_state() else {
                return;
            };
            state.replenishing -= 1;
            match connected {
                Ok(conn) => {
                    let returned_at = self.clock.now();
                    state.counters.created += 1;
                    state.idle.push(IdleEntry {
                        conn: Arc::new(conn),
                        returned_at,
                    });
                }
                Err(e) => {
                    warn!("Could not replenish idle connections: {}", e);
                    return;
                }
            }
        }
    }

    /// Close every idle connection
    ///
    /// Connections currently checked out are left alone and still count
    /// toward `max_connections` until released.
    pub fn purge(&self) {
        let drained: Vec<_> = {
            let mut state = self.peek_state();
            let drained: Vec<_> = state.idle.drain(..).map(|entry| entry.conn).collect();
            state.counters.closed += drained.len() as u64;
            drained
        };

        info!("Purging {} idle connections", drained.len());
        close_all(drained);
    }

    /// Number of idle connections
    pub fn idle_count(&self) -> usize {
        self.peek_state().idle.len()
    }

    /// Number of checked-out connections
    pub fn in_use_count(&self) -> usize {
        self.peek_state().in_use.len()
    }

    /// Idle connections from oldest to newest; the last one is handed out next
    pub fn idle_connections(&self) -> Vec<Arc<F::Connection>> {
        self.peek_state()
            .idle
            .iter()
            .map(|entry| Arc::clone(&entry.conn))
            .collect()
    }

    /// Time each idle connection has been sitting in the pool, in
    /// [`idle_connections`](Self::idle_connections) order
    pub fn idle_ages(&self) -> Vec<Duration> {
        let state = self.peek_state();
        let now = self.clock.now();
        state
            .idle
            .iter()
            .map(|entry| now.saturating_duration_since(entry.returned_at))
            .collect()
    }

    /// Whether `conn` is currently in the idle store
    pub fn is_idle(&self, conn: &Arc<F::Connection>) -> bool {
        self.peek_state()
            .idle
            .iter()
            .any(|entry| Arc::ptr_eq(&entry.conn, conn))
    }

    /// Whether `conn` is currently checked out from this pool
    pub fn is_in_use(&self, conn: &Arc<F::Connection>) -> bool {
        self.peek_state().in_use.contains_key(&conn_key(conn))
    }

    /// Get the pool configuration
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Get pool statistics
    pub fn stats(&self) -> PoolStats {
        let state = self.peek_state();
        let counters = state.counters;

        PoolStats {
            idle_connections: state.idle.len(),
            in_use_connections: state.in_use.len(),
            pending_connections: state.connecting + state.replenishing,
            min_connections: self.config.min_connections,
            max_connections: self.config.max_connections,
            connections_created: counters.created,
            connections_closed: counters.closed,
            stale_discarded: counters.stale_discarded,
            idle_reuses: counters.reused,
            exhausted_count: counters.exhausted,
        }
    }
}

fn close_all<C: ManagedConnection>(conns: Vec<Arc<C>>) {
    for conn in conns {
        if let Err(e) = conn.close() {
            warn!("Failed to close connection: {}", e);
        }
    }
}

/// Connection pool statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    pub idle_connections: usize,
    pub in_use_connections: usize,
    /// Factory calls in flight
    pub pending_connections: usize,
    pub min_connections: usize,
    pub max_connections: usize,
    pub connections_created: u64,
    /// Closed by the pool: expired, purged, or over capacity
    pub connections_closed: u64,
    /// Found already closed while idle
    pub stale_discarded: u64,
    /// Acquisitions served from the idle store
    pub idle_reuses: u64,
    pub exhausted_count: u64,
}

impl std::fmt::Display for PoolStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Pool Stats: {} in use, {} idle, ",
            self.in_use_connections, self.idle_connections
        )?;
        if self.max_connections == usize::MAX {
            write!(f, "unbounded")?;
        } else {
            write!(f, "max {}", self.max_connections)?;
        }
        write!(
            f,
            "; created {}, closed {}, stale {}, reused {}, exhausted {}",
            self.connections_created,
            self.connections_closed,
            self.stale_discarded,
            self.idle_reuses,
            self.exhausted_count
        )
    }
}

/// RAII guard for pooled connections
///
/// Returns the connection to the pool when dropped
pub struct PoolGuard<'a, F: ConnectionFactory> {
    conn: Option<Arc<F::Connection>>,
    pool: &'a Pool<F>,
}

impl<F: ConnectionFactory> PoolGuard<'_, F> {
    /// Shared handle to the connection
    pub fn connection(&self) -> &Arc<F::Connection> {
        self.conn
            .as_ref()
            .expect("connection is only taken in detach or drop")
    }

    /// Take the connection out of the guard without returning it.
    ///
    /// The connection stays checked out until passed to [`Pool::release`].
    pub fn detach(mut self) -> Arc<F::Connection> {
        self.conn
            .take()
            .expect("connection is only taken in detach or drop")
    }
}

impl<F: ConnectionFactory> std::ops::Deref for PoolGuard<'_, F> {
    type Target = F::Connection;

    fn deref(&self) -> &Self::Target {
        self.connection()
    }
}

impl<F: ConnectionFactory> Drop for PoolGuard<'_, F> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::memory::MemoryFactory;
    use crate::core::ManualClock;

    fn pool(min: usize, max: usize) -> Pool<MemoryFactory> {
        Pool::new(PoolConfig::new(min, max), MemoryFactory::new()).unwrap()
    }

    #[test]
    fn test_pool_creation_warms_min_connections() {
        let factory = MemoryFactory::new();
        let pool = Pool::new(PoolConfig::new(2, 5), factory.clone()).unwrap();

        assert_eq!(pool.idle_count(), 2);
        assert_eq!(pool.in_use_count(), 0);
        assert_eq!(factory.opened(), 2);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = Pool::new(PoolConfig::new(3, 1), MemoryFactory::new());
        assert!(matches!(result, Err(PoolError::Configuration(_))));
    }

    #[test]
    fn test_warm_up_failure_propagates() {
        let factory = MemoryFactory::new();
        factory.set_failing(true);

        let result = Pool::new(PoolConfig::new(1, 2), factory);
        assert!(matches!(result, Err(PoolError::Connection { .. })));
    }

    #[test]
    fn test_acquire_factory_error_frees_reservation() {
        let factory = MemoryFactory::new();
        let pool = Pool::new(PoolConfig::new(0, 1), factory.clone()).unwrap();

        factory.set_failing(true);
        assert!(matches!(pool.acquire(), Err(PoolError::Connection { .. })));
        assert_eq!(pool.stats().pending_connections, 0);

        factory.set_failing(false);
        assert!(pool.acquire().is_ok());
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let pool = pool(0, 1);
        {
            let guard = pool.get().unwrap();
            assert!(!guard.is_closed());
            assert_eq!(pool.in_use_count(), 1);
        }
        assert_eq!(pool.in_use_count(), 0);
        assert_eq!(pool.idle_count(), 1);
    }

    #[test]
    fn test_guard_detach_keeps_connection_checked_out() {
        let pool = pool(0, 1);
        let conn = pool.get().unwrap().detach();

        assert!(pool.is_in_use(&conn));
        assert!(pool.acquire().unwrap_err().is_exhausted());

        pool.release(conn);
        assert_eq!(pool.in_use_count(), 0);
    }

    #[test]
    fn test_foreign_connection_over_capacity_is_closed() {
        let pool = pool(0, 1);
        let _held = pool.acquire().unwrap();

        let stranger = Arc::new(crate::connection::memory::MemoryConnection::new(99));
        pool.release(stranger.clone());

        assert!(stranger.is_closed());
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.in_use_count(), 1);
    }

    #[test]
    fn test_idle_ages_follow_clock() {
        let clock = Arc::new(ManualClock::new());
        let pool = Pool::with_clock(
            PoolConfig::new(0, 2).no_idle_timeout(),
            MemoryFactory::new(),
            clock.clone(),
        )
        .unwrap();

        let conn = pool.acquire().unwrap();
        pool.release(conn);
        clock.advance(Duration::from_secs(42));

        assert_eq!(pool.idle_ages(), vec![Duration::from_secs(42)]);
    }

    #[test]
    fn test_pool_stats() {
        let pool = pool(0, 3);
        let a = pool.acquire().unwrap();
        let _b = pool.acquire().unwrap();
        pool.release(a);
        let _c = pool.acquire().unwrap();

        let stats = pool.stats();
        assert_eq!(stats.in_use_connections, 2);
        assert_eq!(stats.idle_connections, 0);
        assert_eq!(stats.connections_created, 2);
        assert_eq!(stats.idle_reuses, 1);
        assert_eq!(stats.max_connections, 3);
        assert!(stats.to_string().contains("2 in use"));
    }
}
