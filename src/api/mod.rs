//! Calling conventions over the async core
//!
//! [`blocking`] suspends the calling thread on a private runtime.
//! [`nonblocking`] hands back spawned [`Task`](nonblocking::Task) handles and
//! cancelable [`ChunkStream`](nonblocking::ChunkStream)s. Both delegate every
//! operation to [`Client`](crate::client::Client),
//! [`Connection`](crate::connection::Connection) and [`Db`](crate::db::Db).

pub mod blocking;
pub mod nonblocking;

pub use blocking::{BlockingClient, BlockingConnection, BlockingDb, BlockingTxReport};
pub use nonblocking::{AsyncClient, AsyncConnection, AsyncDb, ChunkStream, Task};
