pub mod config;
pub mod memory;
pub mod pool;

use crate::core::Result;

/// Driver-side capabilities the pool relies on.
///
/// The pool never inspects a connection beyond these four calls, so any
/// driver can be pooled by wrapping its handle in a small adapter. Methods
/// take `&self`: connections are shared as `Arc<C>` between the pool and the
/// caller holding them, and drivers use interior mutability for state.
pub trait ManagedConnection: Send + Sync + 'static {
    /// Whether the connection was closed by the client or the server
    fn is_closed(&self) -> bool;

    /// Whether a transaction is open on the connection
    fn is_mid_transaction(&self) -> bool;

    /// Close the connection. Closing an already closed connection is a no-op.
    fn close(&self) -> Result<()>;

    /// Roll back any open transaction, leaving the connection idle-ready.
    ///
    /// An error here means the connection cannot be trusted and the pool
    /// discards it.
    fn reset_transaction(&self) -> Result<()>;
}

/// Opens new connections for a pool.
///
/// Target, credentials and retry policy belong to the implementor; the pool
/// only sees a connection or an error.
pub trait ConnectionFactory: Send + Sync {
    type Connection: ManagedConnection;

    fn connect(&self) -> Result<Self::Connection>;
}
