//! In-process connections with no backing server.
//!
//! `MemoryConnection` tracks the same Active / InTransaction / Closed states a
//! real driver reports, which makes it a stand-in for tests, documentation and
//! the load tool.

use super::{ConnectionFactory, ManagedConnection};
use crate::core::{PoolError, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionState {
    Active,
    InTransaction,
    Closed,
}

/// Simulated database connection
#[derive(Debug)]
pub struct MemoryConnection {
    id: u64,
    state: Mutex<ConnectionState>,
    /// Make the next rollback fail, as a lost server would
    fail_rollback: AtomicBool,
}

impl MemoryConnection {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            state: Mutex::new(ConnectionState::Active),
            fail_rollback: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Begin a new transaction
    pub fn begin(&self) -> Result<()> {
        let mut state = self.state.lock()?;
        match *state {
            ConnectionState::Closed => Err(PoolError::Transaction("Connection is closed".into())),
            ConnectionState::InTransaction => {
                Err(PoolError::Transaction("Transaction already active".into()))
            }
            ConnectionState::Active => {
                *state = ConnectionState::InTransaction;
                Ok(())
            }
        }
    }

    /// Commit the current transaction
    pub fn commit(&self) -> Result<()> {
        let mut state = self.state.lock()?;
        if *state != ConnectionState::InTransaction {
            return Err(PoolError::Transaction("No active transaction".into()));
        }
        *state = ConnectionState::Active;
        Ok(())
    }

    /// Rollback the current transaction
    pub fn rollback(&self) -> Result<()> {
        if self.fail_rollback.swap(false, Ordering::SeqCst) {
            return Err(PoolError::Transaction(format!(
                "rollback failed on connection {}: server unreachable",
                self.id
            )));
        }

        let mut state = self.state.lock()?;
        if *state != ConnectionState::InTransaction {
            return Err(PoolError::Transaction("No active transaction".into()));
        }
        *state = ConnectionState::Active;
        Ok(())
    }

    pub fn fail_next_rollback(&self) {
        self.fail_rollback.store(true, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.state() != ConnectionState::Closed
    }
}

impl ManagedConnection for MemoryConnection {
    fn is_closed(&self) -> bool {
        self.state() == ConnectionState::Closed
    }

    fn is_mid_transaction(&self) -> bool {
        self.state() == ConnectionState::InTransaction
    }

    fn close(&self) -> Result<()> {
        let mut state = self.state.lock()?;
        *state = ConnectionState::Closed;
        Ok(())
    }

    fn reset_transaction(&self) -> Result<()> {
        if self.is_mid_transaction() {
            self.rollback()?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct FactoryState {
    next_id: AtomicU64,
    opened: AtomicUsize,
    failing: AtomicBool,
}

/// Factory handing out [`MemoryConnection`]s with sequential ids.
///
/// Clones share counters, so a test can keep a handle after moving the
/// factory into a pool.
#[derive(Debug, Clone, Default)]
pub struct MemoryFactory {
    state: Arc<FactoryState>,
}

impl MemoryFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of connections opened so far
    pub fn opened(&self) -> usize {
        self.state.opened.load(Ordering::SeqCst)
    }

    /// Make every following `connect` fail (or succeed again)
    pub fn set_failing(&self, failing: bool) {
        self.state.failing.store(failing, Ordering::SeqCst);
    }
}

impl ConnectionFactory for MemoryFactory {
    type Connection = MemoryConnection;

    fn connect(&self) -> Result<MemoryConnection> {
        if self.state.failing.load(Ordering::SeqCst) {
            return Err(PoolError::connection("connection refused"));
        }

        let id = self.state.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.opened.fetch_add(1, Ordering::SeqCst);
        Ok(MemoryConnection::new(id))
    }
}
