//! Boundary to the transaction/query service
//!
//! The client core never touches storage directly; every read and write goes
//! through [`Service`]. [`local::LocalService`] implements it in-process, and
//! its capability descriptor decides whether it behaves like an embedded
//! database or like a remote peer server.

pub mod local;

pub use local::LocalService;

use crate::config::Capabilities;
use crate::core::datom::{Datom, EntityId};
use crate::core::statement::{EntityRef, Statement};
use crate::core::temporal::{Basis, TimePoint};
use crate::core::value::{Keyword, Value};
use crate::core::view::DbRef;
use crate::error::Result;
use crate::index::{IndexOrder, Page, ValueRange};
use crate::query::{PullMap, PullPattern, QueryRequest, Row};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Prefix scan of one index
#[derive(Debug, Clone, PartialEq)]
pub struct DatomsRequest {
    pub index: IndexOrder,
    /// Leading key components, 0 to 4
    pub components: Vec<Value>,
    pub page: Page,
    pub timeout: Option<Duration>,
}

/// AVET value-range scan of one attribute
#[derive(Debug, Clone, PartialEq)]
pub struct IndexRangeRequest {
    /// Attribute ident or id
    pub attribute: Value,
    pub range: ValueRange,
    pub page: Page,
    pub timeout: Option<Duration>,
}

/// Pull of one entity
#[derive(Debug, Clone, PartialEq)]
pub struct PullRequest {
    pub pattern: PullPattern,
    pub entity: EntityRef,
    /// Window over cardinality-many values
    pub page: Page,
    pub timeout: Option<Duration>,
}

/// Pull of every entity found by walking an index from a start key
#[derive(Debug, Clone, PartialEq)]
pub struct IndexPullRequest {
    /// `Avet` or `Aevt`
    pub index: IndexOrder,
    pub pattern: PullPattern,
    /// Start key; the first component names the attribute
    pub start: Vec<Value>,
    pub reverse: bool,
    pub page: Page,
    pub timeout: Option<Duration>,
}

/// Range of the transaction log
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TxRangeRequest {
    /// Inclusive; `None` from the first transaction
    pub start: Option<TimePoint>,
    /// Exclusive; `None` through the latest transaction
    pub end: Option<TimePoint>,
    pub page: Page,
}

/// One transaction of the log
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TxEntry {
    pub t: u64,
    pub tx: EntityId,
    pub data: Vec<Datom>,
}

/// Result of a durable or speculative transaction
#[derive(Debug, Clone, PartialEq)]
pub struct TxOutcome {
    pub db_before: DbRef,
    pub db_after: DbRef,
    pub tx_data: Vec<Datom>,
    pub temp_ids: BTreeMap<String, EntityId>,
}

/// Datom counts of a view
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct DbStats {
    pub datoms: u64,
    pub attrs: BTreeMap<Keyword, u64>,
}

/// Transaction and query service
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Service: Send + Sync {
    /// Behaviors of this backend variant
    fn capabilities(&self) -> Capabilities;

    /// Create a database; false when it already existed
    async fn create_database(&self, name: &str) -> Result<bool>;

    /// Delete a database; false when it did not exist
    async fn delete_database(&self, name: &str) -> Result<bool>;

    async fn list_databases(&self) -> Result<Vec<String>>;

    /// Current view of an existing database
    async fn latest(&self, name: &str) -> Result<DbRef>;

    /// View at basis `t` or later, waiting for it to be published
    async fn sync(&self, name: &str, t: u64) -> Result<DbRef>;

    async fn transact(&self, name: &str, statements: Vec<Statement>) -> Result<TxOutcome>;

    /// Apply statements speculatively on top of `seed`
    async fn with(&self, seed: &DbRef, statements: Vec<Statement>) -> Result<TxOutcome>;

    /// Canonical basis of a time point in the view's database
    async fn resolve(&self, db: &DbRef, point: TimePoint) -> Result<Basis>;

    async fn datoms(&self, db: &DbRef, request: DatomsRequest) -> Result<Vec<Datom>>;

    async fn index_range(&self, db: &DbRef, request: IndexRangeRequest) -> Result<Vec<Datom>>;

    async fn pull(&self, db: &DbRef, request: PullRequest) -> Result<PullMap>;

    async fn index_pull(&self, db: &DbRef, request: IndexPullRequest) -> Result<Vec<PullMap>>;

    async fn db_stats(&self, db: &DbRef) -> Result<DbStats>;

    async fn query(&self, request: QueryRequest) -> Result<Vec<Row>>;

    async fn tx_range(&self, name: &str, request: TxRangeRequest) -> Result<Vec<TxEntry>>;
}
