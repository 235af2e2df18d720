//! Datom-View: temporal database views over an immutable datom store
//!
//! A database is an append-only log of datoms `(e, a, v, tx, added)` kept in
//! four sorted indexes. Every read runs against an immutable view that can be
//! moved through time or extended speculatively without touching durable
//! state.
//!
//! # Core Concepts
//!
//! - **Views** ([`Db`]): a database at one basis, optionally filtered with
//!   `as_of`, `since` or `history`
//! - **Indexes**: EAVT, AEVT, AVET and VAET prefix scans and AVET value ranges
//! - **Connections**: serialized transactions and the current view
//! - **Speculation**: `with` applies statements to a view and returns a new,
//!   isolated one
//!
//! # Example
//!
//! ```no_run
//! use datom_view::prelude::*;
//!
//! # async fn example() -> datom_view::error::Result<()> {
//! let client = Client::from_config(ClientConfig::default())?;
//! client.create_database("films").await?;
//! let conn = client.connect("films").await?;
//!
//! conn.transact(vec![
//!     AttributeSpec::new(":movie/title", ValueType::String, Cardinality::One).into(),
//! ])
//! .await?;
//! let report = conn
//!     .transact(vec![Statement::entity().attr(":movie/title", "Commando").into()])
//!     .await?;
//!
//! let before = report.db_after().as_of(report.basis_t()).await?;
//! let titles = before.index_range(IndexRangeArgs::new(":movie/title")).await?;
//! assert!(titles.is_empty());
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod args;
pub mod cli;
pub mod client;
pub mod config;
pub mod connection;
pub mod core;
pub mod db;
pub mod error;
pub mod index;
pub mod paging;
pub mod query;
pub mod service;
pub mod storage;
pub mod tx_report;

/// Prelude module for common imports
pub mod prelude {
    pub use crate::args::{
        DatomsArgs, IndexPullArgs, IndexRangeArgs, PullArgs, QueryArgs, TxRangeArgs,
    };
    pub use crate::client::Client;
    pub use crate::config::{BackendKind, Capabilities, ClientConfig};
    pub use crate::connection::Connection;
    pub use crate::core::*;
    pub use crate::db::{Db, WithDb};
    pub use crate::error::{Anomaly, AnomalyCategory, Error, ErrorKind, Result};
    pub use crate::index::{IndexOrder, Limit};
    pub use crate::query::{PullMap, PullPattern, PullValue, Query, Row};
    pub use crate::service::{DbStats, LocalService, Service, TxEntry};
    pub use crate::tx_report::TxReport;
}
