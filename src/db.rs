//! Immutable database views
//!
//! A [`Db`] names one database at one basis, optionally filtered by as-of,
//! since or history, and optionally speculative. It is a value: every
//! time-travel call returns a new `Db` and never touches the one it was
//! derived from. Reads go through the service with the view's descriptor.

use crate::args::{DatomsArgs, IndexPullArgs, IndexRangeArgs, PullArgs, QueryArg, QueryArgs};
use crate::client::query_chunks;
use crate::config::{Capabilities, ClientConfig};
use crate::core::datom::Datom;
use crate::core::statement::Statement;
use crate::core::temporal::{TimePoint, TxInstant};
use crate::core::view::DbRef;
use crate::error::{Anomaly, Error, Result};
use crate::query::{PullMap, Row};
use crate::service::{DbStats, Service};
use crate::tx_report::TxReport;
use futures::stream::BoxStream;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

/// Run `fut` under an optional deadline. Expiry yields [`Error::Timeout`]
/// with an interrupted anomaly.
pub(crate) async fn within<T, F>(timeout: Option<Duration>, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout {
        Some(deadline) => tokio::time::timeout(deadline, fut)
            .await
            .map_err(|_| Error::Timeout(Anomaly::timeout()))?,
        None => fut.await,
    }
}

/// Database view
#[derive(Clone)]
pub struct Db {
    inner: Arc<DbInner>,
}

struct DbInner {
    view: DbRef,
    service: Arc<dyn Service>,
    config: Arc<ClientConfig>,
}

impl Db {
    pub(crate) fn new(view: DbRef, service: Arc<dyn Service>, config: Arc<ClientConfig>) -> Self {
        Self {
            inner: Arc::new(DbInner {
                view,
                service,
                config,
            }),
        }
    }

    fn derive(&self, view: DbRef) -> Self {
        Self::new(view, self.inner.service.clone(), self.inner.config.clone())
    }

    /// Descriptor the service identifies this view by
    pub fn view(&self) -> &DbRef {
        &self.inner.view
    }

    pub fn name(&self) -> &str {
        &self.inner.view.name
    }

    /// `t` of the latest transaction this view reflects
    pub fn basis_t(&self) -> u64 {
        self.inner.view.basis.t
    }

    /// Instant of the basis transaction
    pub fn basis_tx_instant(&self) -> Option<TxInstant> {
        self.inner.view.basis.tx_instant
    }

    /// As-of boundary; `0` when unset
    pub fn as_of_t(&self) -> u64 {
        self.inner.view.filter.as_of_point().map_or(0, |b| b.t)
    }

    pub fn as_of_tx_instant(&self) -> Option<TxInstant> {
        self.inner.view.filter.as_of_point().and_then(|b| b.tx_instant)
    }

    /// Since boundary; `0` when unset
    pub fn since_t(&self) -> u64 {
        self.inner.view.filter.since_point().map_or(0, |b| b.t)
    }

    pub fn since_tx_instant(&self) -> Option<TxInstant> {
        self.inner.view.filter.since_point().and_then(|b| b.tx_instant)
    }

    pub fn is_history(&self) -> bool {
        self.inner.view.filter.history
    }

    /// True for views produced by `with`
    pub fn is_speculative(&self) -> bool {
        self.inner.view.is_speculative()
    }

    /// True when both handles are the same view instance
    pub fn same_instance(&self, other: &Db) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn capabilities(&self) -> Capabilities {
        self.inner.service.capabilities()
    }

    fn check_time_filter(&self, op: &str) -> Result<()> {
        if self.is_speculative() && !self.capabilities().filters_on_speculative {
            return Err(Error::FilterCombinationUnsupported(format!(
                "{op} cannot be applied to a with database on this backend"
            )));
        }
        Ok(())
    }

    /// View of the data committed at or before `point`; clears since
    #[instrument(skip(self, point), fields(db = %self.name()))]
    pub async fn as_of(&self, point: impl Into<TimePoint>) -> Result<Db> {
        self.check_time_filter("as-of")?;
        let point = point.into();
        let basis = self.inner.service.resolve(&self.inner.view, point).await?;
        debug!(%point, t = basis.t, "as-of resolved");
        let filter = self.inner.view.filter.as_of(basis);
        Ok(self.derive(self.inner.view.with_filter(filter)))
    }

    /// View of the data committed strictly after `point`; clears as-of
    #[instrument(skip(self, point), fields(db = %self.name()))]
    pub async fn since(&self, point: impl Into<TimePoint>) -> Result<Db> {
        self.check_time_filter("since")?;
        let point = point.into();
        let basis = self.inner.service.resolve(&self.inner.view, point).await?;
        debug!(%point, t = basis.t, "since resolved");
        let filter = self.inner.view.filter.since(basis);
        Ok(self.derive(self.inner.view.with_filter(filter)))
    }

    /// View exposing every assertion and retraction
    pub fn history(&self) -> Db {
        let filter = self.inner.view.filter.history();
        self.derive(self.inner.view.with_filter(filter))
    }

    /// Apply `statements` speculatively on top of this view. The result's
    /// `db_after` may be fed back into `with`; the durable database never
    /// changes.
    #[instrument(skip(self, statements), fields(db = %self.name(), statements = statements.len()))]
    pub async fn with(&self, statements: Vec<Statement>) -> Result<TxReport> {
        if self.inner.view.filter.is_time_filtered() || self.is_history() {
            return Err(Error::FilterCombinationUnsupported(
                "with cannot be applied to an as-of, since or history database".to_string(),
            ));
        }
        let outcome = self.inner.service.with(&self.inner.view, statements).await?;
        Ok(TxReport::new(
            self.derive(outcome.db_before),
            self.derive(outcome.db_after),
            outcome.tx_data,
            outcome.temp_ids,
        ))
    }

    /// Datoms matching a key prefix, in index order
    pub async fn datoms(&self, args: DatomsArgs) -> Result<Vec<Datom>> {
        let request = args.into_request(&self.inner.config)?;
        within(
            request.timeout,
            self.inner.service.datoms(&self.inner.view, request),
        )
        .await
    }

    /// AVET datoms of one attribute with values in `[start, end)`
    pub async fn index_range(&self, args: IndexRangeArgs) -> Result<Vec<Datom>> {
        let request = args.into_request(&self.inner.config)?;
        within(
            request.timeout,
            self.inner.service.index_range(&self.inner.view, request),
        )
        .await
    }

    /// Attribute map of one entity
    pub async fn pull(&self, args: PullArgs) -> Result<PullMap> {
        let request = args.into_request(&self.inner.config)?;
        within(
            request.timeout,
            self.inner.service.pull(&self.inner.view, request),
        )
        .await
    }

    /// Attribute maps of the entities found walking an index
    pub async fn index_pull(&self, args: IndexPullArgs) -> Result<Vec<PullMap>> {
        let request = args.into_request(&self.inner.config)?;
        within(
            request.timeout,
            self.inner.service.index_pull(&self.inner.view, request),
        )
        .await
    }

    /// Total and per-attribute datom counts. Scans the whole view.
    pub async fn db_stats(&self) -> Result<DbStats> {
        within(
            self.inner.config.timeout,
            self.inner.service.db_stats(&self.inner.view),
        )
        .await
    }

    /// Run a query with this view as its first input
    pub async fn q(&self, args: QueryArgs) -> Result<Vec<Row>> {
        let mut args = args;
        args.inputs.insert(0, QueryArg::Db(self.clone()));
        let request = args.into_request(&self.inner.config)?;
        within(request.timeout, self.inner.service.query(request)).await
    }

    /// Lazily paged query results with this view as the first input
    pub fn qseq(&self, args: QueryArgs) -> Result<BoxStream<'static, Result<Vec<Row>>>> {
        let mut args = args;
        args.inputs.insert(0, QueryArg::Db(self.clone()));
        let request = args.into_request(&self.inner.config)?;
        Ok(query_chunks(
            self.inner.service.clone(),
            self.inner.config.chunk_size,
            request,
        ))
    }
}

impl fmt::Debug for Db {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Db")
            .field("name", &self.name())
            .field("basis_t", &self.basis_t())
            .field("as_of_t", &self.as_of_t())
            .field("since_t", &self.since_t())
            .field("history", &self.is_history())
            .field("speculative", &self.is_speculative())
            .finish()
    }
}

/// Baseline for speculative transactions, handed out by
/// [`Connection::with_db`](crate::connection::Connection::with_db)
#[derive(Debug, Clone)]
pub struct WithDb(Db);

impl WithDb {
    pub(crate) fn new(db: Db) -> Self {
        Self(db)
    }

    pub fn basis_t(&self) -> u64 {
        self.0.basis_t()
    }

    /// Apply `statements` speculatively on top of the seed
    pub async fn with(&self, statements: Vec<Statement>) -> Result<TxReport> {
        self.0.with(statements).await
    }
}
