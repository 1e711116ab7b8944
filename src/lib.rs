// ============================================================================
// lifopool Library
// ============================================================================

//! Bounded LIFO pool of database connections.
//!
//! The pool is generic over any driver that implements [`ManagedConnection`]
//! and a [`ConnectionFactory`] that opens it. Idle connections are reused
//! most-recently-returned first, checked for liveness only when touched, aged
//! out after an idle timeout, and topped back up to a warm minimum on release.
//!
//! ```
//! use lifopool::{MemoryFactory, Pool, PoolConfig};
//! use std::time::Duration;
//!
//! # fn main() -> lifopool::Result<()> {
//! let config = PoolConfig::default()
//!     .min_connections(1)
//!     .max_connections(4)
//!     .idle_timeout(Duration::from_secs(300));
//! let pool = Pool::new(config, MemoryFactory::new())?;
//!
//! {
//!     let conn = pool.get()?;
//!     conn.begin()?;
//!     conn.commit()?;
//! } // returned here
//!
//! println!("{}", pool.stats());
//! pool.purge();
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod core;

pub use crate::core::{Clock, ManualClock, PoolError, Result, SystemClock};

pub use crate::connection::{
    ConnectionFactory, ManagedConnection,
    config::PoolConfig,
    memory::{MemoryConnection, MemoryFactory},
    pool::{Pool, PoolGuard, PoolStats},
};
