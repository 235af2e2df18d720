//! Long-lived handle to one database
//!
//! A connection serializes its own transactions: each `transact` waits for
//! the previous one to commit before it is submitted. Once submitted, a
//! transaction runs to completion on its own task even if the caller stops
//! waiting for it.

use crate::args::TxRangeArgs;
use crate::config::{Capabilities, ClientConfig};
use crate::core::statement::Statement;
use crate::core::view::DbRef;
use crate::db::{within, Db, WithDb};
use crate::error::{Anomaly, AnomalyCategory, Error, Result};
use crate::paging;
use crate::service::{Service, TxEntry, TxRangeRequest};
use crate::tx_report::TxReport;
use futures::stream::BoxStream;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Connection to a named database
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

struct ConnectionInner {
    name: String,
    service: Arc<dyn Service>,
    config: Arc<ClientConfig>,
    capabilities: Capabilities,
    /// Last view handed out, when the backend caches the current view
    current: Mutex<Option<Db>>,
    write_gate: Arc<tokio::sync::Mutex<()>>,
}

impl Connection {
    pub(crate) fn new(name: &str, service: Arc<dyn Service>, config: Arc<ClientConfig>) -> Self {
        let capabilities = service.capabilities();
        Self {
            inner: Arc::new(ConnectionInner {
                name: name.to_string(),
                service,
                config,
                capabilities,
                current: Mutex::new(None),
                write_gate: Arc::new(tokio::sync::Mutex::new(())),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn capabilities(&self) -> Capabilities {
        self.inner.capabilities
    }

    fn view(&self, view: DbRef) -> Db {
        Db::new(view, self.inner.service.clone(), self.inner.config.clone())
    }

    /// Hand out a view of `view`, reusing the cached instance when the
    /// backend caches and the basis has not moved
    fn current(&self, view: DbRef) -> Db {
        if !self.inner.capabilities.caches_current_db {
            return self.view(view);
        }
        let mut cached = self
            .inner
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match cached.as_ref() {
            Some(db) if db.basis_t() >= view.basis.t => db.clone(),
            _ => {
                let db = self.view(view);
                *cached = Some(db.clone());
                db
            }
        }
    }

    /// Current database view
    pub async fn db(&self) -> Result<Db> {
        let latest = self.inner.service.latest(&self.inner.name).await?;
        Ok(self.current(latest))
    }

    /// View reflecting at least transaction `t`. Gives up with
    /// [`Error::Timeout`] after the configured sync timeout.
    pub async fn sync(&self, t: u64) -> Result<Db> {
        self.sync_within(t, self.inner.config.sync_timeout).await
    }

    /// [`Connection::sync`] with an explicit bound on the wait
    #[instrument(skip(self), fields(db = %self.inner.name))]
    pub async fn sync_within(&self, t: u64, timeout: Duration) -> Result<Db> {
        let view = within(Some(timeout), self.inner.service.sync(&self.inner.name, t)).await?;
        debug!(basis_t = view.basis.t, "synced");
        Ok(self.current(view))
    }

    /// Commit `statements` durably. An empty list commits a transaction
    /// holding only its tx-instant datom.
    #[instrument(skip(self, statements), fields(db = %self.inner.name, statements = statements.len()))]
    pub async fn transact(&self, statements: Vec<Statement>) -> Result<TxReport> {
        let gate = self.inner.write_gate.clone().lock_owned().await;

        let service = self.inner.service.clone();
        let name = self.inner.name.clone();
        let submitted = tokio::spawn(async move {
            let _gate = gate;
            service.transact(&name, statements).await
        });
        let outcome = submitted.await.map_err(|e| {
            Error::Interrupted(Anomaly::new(
                AnomalyCategory::Interrupted,
                format!("transaction task failed: {e}"),
            ))
        })??;

        info!(t = outcome.db_after.basis.t, datoms = outcome.tx_data.len(), "transaction committed");
        let db_after = self.current(outcome.db_after);
        Ok(TxReport::new(
            self.view(outcome.db_before),
            db_after,
            outcome.tx_data,
            outcome.temp_ids,
        ))
    }

    /// Seed for speculative transactions at the current basis
    pub async fn with_db(&self) -> Result<WithDb> {
        let latest = self.inner.service.latest(&self.inner.name).await?;
        Ok(WithDb::new(self.view(latest)))
    }

    /// Apply `statements` speculatively on top of the current basis
    pub async fn with(&self, statements: Vec<Statement>) -> Result<TxReport> {
        self.with_db().await?.with(statements).await
    }

    /// Lazy, ordered stream of transactions in `[start, end)`. Arguments are
    /// checked before the stream is returned; pages are fetched on demand.
    pub fn tx_range(&self, args: TxRangeArgs) -> Result<BoxStream<'static, Result<TxEntry>>> {
        let (start, end, limit) = args.resolve()?;
        let service = self.inner.service.clone();
        let name = self.inner.name.clone();
        Ok(paging::items(self.inner.config.chunk_size, limit, move |page| {
            let service = service.clone();
            let name = name.clone();
            async move {
                service
                    .tx_range(&name, TxRangeRequest { start, end, page })
                    .await
            }
        }))
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.inner.name)
            .field("capabilities", &self.inner.capabilities)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::statement::EntityRef;
    use crate::core::temporal::Basis;
    use crate::service::{LocalService, MockService, TxOutcome};
    use futures::TryStreamExt;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn connect(service: LocalService) -> Connection {
        service.provision("films").await.unwrap();
        Connection::new("films", Arc::new(service), Arc::new(ClientConfig::default()))
    }

    #[tokio::test]
    async fn test_in_process_caches_current_view() {
        let conn = connect(LocalService::in_process()).await;
        let first = conn.db().await.unwrap();
        let second = conn.db().await.unwrap();
        assert!(first.same_instance(&second));

        let report = conn.transact(Vec::new()).await.unwrap();
        let third = conn.db().await.unwrap();
        assert!(!third.same_instance(&first));
        assert!(third.same_instance(report.db_after()));
    }

    #[tokio::test]
    async fn test_remote_peer_materializes_fresh_views() {
        let conn = connect(LocalService::remote_peer()).await;
        let first = conn.db().await.unwrap();
        let second = conn.db().await.unwrap();
        assert!(!first.same_instance(&second));
        assert_eq!(first.basis_t(), second.basis_t());
    }

    #[tokio::test]
    async fn test_empty_transaction_holds_only_tx_instant() {
        let conn = connect(LocalService::in_process()).await;
        let report = conn.transact(Vec::new()).await.unwrap();
        assert_eq!(report.tx_data().len(), 1);
        assert_eq!(report.t(), report.basis_t() + 1);
        assert_eq!(report.tx_data()[0].e, report.tx());
    }

    #[tokio::test]
    async fn test_concurrent_transactions_apply_in_order() {
        let conn = connect(LocalService::in_process()).await;
        let before = conn.db().await.unwrap().basis_t();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let conn = conn.clone();
                tokio::spawn(async move { conn.transact(Vec::new()).await.unwrap().t() })
            })
            .collect();
        let mut ts = Vec::new();
        for handle in handles {
            ts.push(handle.await.unwrap());
        }
        ts.sort_unstable();
        assert_eq!(ts, (before + 1..=before + 8).collect::<Vec<_>>());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_beyond_horizon_times_out() {
        let conn = connect(LocalService::in_process()).await;
        let err = conn
            .sync_within(99, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_dropped_caller_does_not_cancel_submitted_transaction() {
        let committed = Arc::new(AtomicUsize::new(0));
        let counter = committed.clone();
        let mut service = MockService::new();
        service
            .expect_capabilities()
            .returning(Capabilities::remote_peer);
        service.expect_transact().times(2).returning(move |name, _| {
            let t = counter.fetch_add(1, Ordering::SeqCst) as u64;
            Ok(TxOutcome {
                db_before: DbRef::new(name, Basis::new(t, None)),
                db_after: DbRef::new(name, Basis::new(t + 1, None)),
                tx_data: Vec::new(),
                temp_ids: BTreeMap::new(),
            })
        });
        let conn = Connection::new("films", Arc::new(service), Arc::new(ClientConfig::default()));

        // Poll once so the submission is spawned, then abandon the call.
        let mut call = Box::pin(conn.transact(vec![Statement::retract_entity(EntityRef::Id(
            1000.into(),
        ))]));
        assert!(futures::poll!(call.as_mut()).is_pending());
        drop(call);

        let report = conn.transact(Vec::new()).await.unwrap();
        assert_eq!(report.t(), 2);
        assert_eq!(committed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_tx_range_is_lazy_and_ordered() {
        let service = LocalService::in_process();
        service.provision("films").await.unwrap();
        let mut config = ClientConfig::default();
        config.chunk_size = 2;
        let conn = Connection::new("films", Arc::new(service), Arc::new(config));
        for _ in 0..5 {
            conn.transact(Vec::new()).await.unwrap();
        }

        let entries: Vec<TxEntry> = conn
            .tx_range(TxRangeArgs::new().start(2u64).end(0u64))
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        let ts: Vec<u64> = entries.iter().map(|e| e.t).collect();
        assert_eq!(ts, vec![2, 3, 4, 5]);

        let same: Vec<TxEntry> = conn
            .tx_range(TxRangeArgs::new().start(3u64).end(3u64))
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert!(same.is_empty());

        assert!(conn.tx_range(TxRangeArgs::new().limit(0)).is_err());
    }
}
