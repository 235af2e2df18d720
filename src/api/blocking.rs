//! Blocking adapter
//!
//! Every call parks the calling thread until the operation completes. The
//! adapter owns a multi-threaded runtime shared by everything derived from
//! one [`BlockingClient`]; calling it from inside an async context panics.

use crate::args::{DatomsArgs, IndexPullArgs, IndexRangeArgs, PullArgs, QueryArgs, TxRangeArgs};
use crate::client::Client;
use crate::config::ClientConfig;
use crate::connection::Connection;
use crate::core::datom::Datom;
use crate::core::statement::Statement;
use crate::core::temporal::TimePoint;
use crate::db::{Db, WithDb};
use crate::error::{Error, Result};
use crate::query::{PullMap, Row};
use crate::service::{DbStats, TxEntry};
use crate::tx_report::TxReport;
use futures::stream::{BoxStream, StreamExt};
use std::ops::Deref;
use std::sync::Arc;
use tokio::runtime::Runtime;

fn runtime() -> Result<Arc<Runtime>> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("datom-view-blocking")
        .build()
        .map(Arc::new)
        .map_err(|e| Error::Configuration(format!("failed to start runtime: {e}")))
}

/// Blocking [`Client`]
#[derive(Clone)]
pub struct BlockingClient {
    client: Client,
    runtime: Arc<Runtime>,
}

impl BlockingClient {
    pub fn new(client: Client) -> Result<Self> {
        Ok(Self {
            client,
            runtime: runtime()?,
        })
    }

    pub fn from_config(config: ClientConfig) -> Result<Self> {
        Self::new(Client::from_config(config)?)
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn create_database(&self, name: &str) -> Result<bool> {
        self.runtime.block_on(self.client.create_database(name))
    }

    pub fn delete_database(&self, name: &str) -> Result<bool> {
        self.runtime.block_on(self.client.delete_database(name))
    }

    pub fn list_databases(&self) -> Result<Vec<String>> {
        self.runtime.block_on(self.client.list_databases())
    }

    pub fn connect(&self, name: &str) -> Result<BlockingConnection> {
        let connection = self.runtime.block_on(self.client.connect(name))?;
        Ok(BlockingConnection {
            connection,
            runtime: self.runtime.clone(),
        })
    }

    pub fn q(&self, args: QueryArgs) -> Result<Vec<Row>> {
        self.runtime.block_on(self.client.q(args))
    }
}

/// Blocking [`Connection`]
#[derive(Clone)]
pub struct BlockingConnection {
    connection: Connection,
    runtime: Arc<Runtime>,
}

impl BlockingConnection {
    fn attach(&self, db: Db) -> BlockingDb {
        BlockingDb {
            db,
            runtime: self.runtime.clone(),
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn db(&self) -> Result<BlockingDb> {
        let db = self.runtime.block_on(self.connection.db())?;
        Ok(self.attach(db))
    }

    pub fn sync(&self, t: u64) -> Result<BlockingDb> {
        let db = self.runtime.block_on(self.connection.sync(t))?;
        Ok(self.attach(db))
    }

    pub fn transact(&self, statements: Vec<Statement>) -> Result<BlockingTxReport> {
        let report = self.runtime.block_on(self.connection.transact(statements))?;
        Ok(BlockingTxReport {
            report,
            runtime: self.runtime.clone(),
        })
    }

    pub fn with_db(&self) -> Result<WithDb> {
        self.runtime.block_on(self.connection.with_db())
    }

    /// Speculative transaction on top of a seed from
    /// [`BlockingConnection::with_db`]
    pub fn with(&self, seed: &WithDb, statements: Vec<Statement>) -> Result<BlockingTxReport> {
        let report = self.runtime.block_on(seed.with(statements))?;
        Ok(BlockingTxReport {
            report,
            runtime: self.runtime.clone(),
        })
    }

    /// Transactions in `[start, end)`, fetched a page at a time as the
    /// iterator advances
    pub fn tx_range(&self, args: TxRangeArgs) -> Result<TxIter> {
        Ok(TxIter {
            stream: self.connection.tx_range(args)?,
            runtime: self.runtime.clone(),
        })
    }
}

/// Iterator over a lazily fetched transaction range
pub struct TxIter {
    stream: BoxStream<'static, Result<TxEntry>>,
    runtime: Arc<Runtime>,
}

impl Iterator for TxIter {
    type Item = Result<TxEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        self.runtime.block_on(self.stream.next())
    }
}

/// Blocking [`Db`]. Dereferences to the view for its accessors.
#[derive(Clone)]
pub struct BlockingDb {
    db: Db,
    runtime: Arc<Runtime>,
}

impl Deref for BlockingDb {
    type Target = Db;

    fn deref(&self) -> &Db {
        &self.db
    }
}

impl BlockingDb {
    fn derive(&self, db: Db) -> BlockingDb {
        BlockingDb {
            db,
            runtime: self.runtime.clone(),
        }
    }

    pub fn as_of(&self, point: impl Into<TimePoint>) -> Result<BlockingDb> {
        let db = self.runtime.block_on(self.db.as_of(point))?;
        Ok(self.derive(db))
    }

    pub fn since(&self, point: impl Into<TimePoint>) -> Result<BlockingDb> {
        let db = self.runtime.block_on(self.db.since(point))?;
        Ok(self.derive(db))
    }

    pub fn history(&self) -> BlockingDb {
        self.derive(self.db.history())
    }

    pub fn with(&self, statements: Vec<Statement>) -> Result<BlockingTxReport> {
        let report = self.runtime.block_on(self.db.with(statements))?;
        Ok(BlockingTxReport {
            report,
            runtime: self.runtime.clone(),
        })
    }

    pub fn datoms(&self, args: DatomsArgs) -> Result<Vec<Datom>> {
        self.runtime.block_on(self.db.datoms(args))
    }

    pub fn index_range(&self, args: IndexRangeArgs) -> Result<Vec<Datom>> {
        self.runtime.block_on(self.db.index_range(args))
    }

    pub fn pull(&self, args: PullArgs) -> Result<PullMap> {
        self.runtime.block_on(self.db.pull(args))
    }

    pub fn index_pull(&self, args: IndexPullArgs) -> Result<Vec<PullMap>> {
        self.runtime.block_on(self.db.index_pull(args))
    }

    pub fn db_stats(&self) -> Result<DbStats> {
        self.runtime.block_on(self.db.db_stats())
    }

    pub fn q(&self, args: QueryArgs) -> Result<Vec<Row>> {
        self.runtime.block_on(self.db.q(args))
    }
}

/// Blocking [`TxReport`]; its views are blocking too
#[derive(Clone)]
pub struct BlockingTxReport {
    report: TxReport,
    runtime: Arc<Runtime>,
}

impl Deref for BlockingTxReport {
    type Target = TxReport;

    fn deref(&self) -> &TxReport {
        &self.report
    }
}

impl BlockingTxReport {
    pub fn db_before(&self) -> BlockingDb {
        BlockingDb {
            db: self.report.db_before().clone(),
            runtime: self.runtime.clone(),
        }
    }

    pub fn db_after(&self) -> BlockingDb {
        BlockingDb {
            db: self.report.db_after().clone(),
            runtime: self.runtime.clone(),
        }
    }

    pub fn into_inner(self) -> TxReport {
        self.report
    }
}
