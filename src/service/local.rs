//! In-process implementation of the service boundary

use crate::config::Capabilities;
use crate::core::datom::{Datom, EntityId};
use crate::core::statement::{EntityRef, Statement};
use crate::core::temporal::{Basis, TRange, TimePoint};
use crate::core::value::Value;
use crate::core::view::{DbRef, SpeculativeToken};
use crate::error::{Anomaly, AnomalyCategory, Error, Result};
use crate::index::order::check_index;
use crate::index::{IndexOrder, KeyPart, KeyPrefix, Page};
use crate::query::{PullMap, Puller, QueryRequest, Row};
use crate::service::{
    DatomsRequest, DbStats, IndexPullRequest, IndexRangeRequest, PullRequest, Service, TxEntry,
    TxOutcome, TxRangeRequest,
};
use crate::storage::{transactor, DbState, InMemoryJournal, TxJournal};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::any::Any;
use std::cmp::Ordering;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, instrument};

/// One hosted database
struct LocalDatabase {
    /// Latest committed state; receivers wake on every commit
    current: watch::Sender<Arc<DbState>>,
    journal: Arc<dyn TxJournal>,
    /// Serializes transactions
    write_gate: Mutex<()>,
}

impl LocalDatabase {
    async fn create() -> Result<Self> {
        let (state, genesis) = DbState::genesis();
        let journal = InMemoryJournal::new();
        journal.append(genesis).await?;
        let (current, _) = watch::channel(Arc::new(state));
        Ok(Self {
            current,
            journal: Arc::new(journal),
            write_gate: Mutex::new(()),
        })
    }

    fn state(&self) -> Arc<DbState> {
        self.current.borrow().clone()
    }
}

/// Databases hosted in this process
pub struct LocalService {
    capabilities: Capabilities,
    databases: DashMap<String, Arc<LocalDatabase>>,
}

impl LocalService {
    pub fn new(capabilities: Capabilities) -> Self {
        Self {
            capabilities,
            databases: DashMap::new(),
        }
    }

    /// Embedded database behavior
    pub fn in_process() -> Self {
        Self::new(Capabilities::in_process())
    }

    /// Behaves like a remote peer server
    pub fn remote_peer() -> Self {
        Self::new(Capabilities::remote_peer())
    }

    /// Create a database regardless of the admin capability, the way an
    /// operator provisions one on a peer server
    pub async fn provision(&self, name: &str) -> Result<bool> {
        if self.databases.contains_key(name) {
            return Ok(false);
        }
        let database = Arc::new(LocalDatabase::create().await?);
        match self.databases.entry(name.to_string()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(database);
                info!(db = name, "created database");
                Ok(true)
            }
        }
    }

    fn database(&self, name: &str) -> Result<Arc<LocalDatabase>> {
        self.databases
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::db_not_found(name))
    }

    /// State backing a view
    fn state_of(&self, db: &DbRef) -> Result<Arc<DbState>> {
        if let Some(token) = &db.speculative {
            return token.payload::<DbState>().ok_or_else(|| {
                Error::InvalidArgument("speculative view belongs to another service".to_string())
            });
        }
        Ok(self.database(&db.name)?.state())
    }

    fn admin_unsupported(op: &str, name: &str) -> Error {
        Error::Unsupported(format!("{op} is not supported on this backend: {name}"))
    }

    fn resolve_entity(state: &DbState, entity: &EntityRef) -> Result<EntityId> {
        let unresolved = || -> Error {
            Anomaly::new(
                AnomalyCategory::Incorrect,
                format!("Unable to resolve entity: {entity}"),
            )
            .into()
        };
        match entity {
            EntityRef::Id(id) => Ok(*id),
            EntityRef::Ident(k) => state.schema().resolve_ident(k).ok_or_else(unresolved),
            EntityRef::Lookup(a, v) => {
                let attr = state
                    .schema()
                    .attribute_by_ident(a)
                    .filter(|attr| attr.unique.is_some())
                    .ok_or_else(unresolved)?;
                state.entity_with(attr.id, v).ok_or_else(unresolved)
            }
            EntityRef::TempId(tid) => Err(Error::InvalidArgument(format!(
                "temp id {tid:?} cannot be read from a database"
            ))),
        }
    }

    fn outcome_ref(name: &str, state: &DbState) -> DbRef {
        DbRef::new(name, state.basis())
    }
}

impl Default for LocalService {
    fn default() -> Self {
        Self::in_process()
    }
}

fn unresolved_attribute(raw: &Value) -> Error {
    Anomaly::new(
        AnomalyCategory::Incorrect,
        format!("Unable to resolve entity: {raw}"),
    )
    .into()
}

fn history_unsupported(op: &str) -> Error {
    Error::Unsupported(format!("{op} is not supported on a history database"))
}

#[async_trait]
impl Service for LocalService {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    #[instrument(skip(self))]
    async fn create_database(&self, name: &str) -> Result<bool> {
        if !self.capabilities.database_admin {
            return Err(Self::admin_unsupported("create-database", name));
        }
        self.provision(name).await
    }

    #[instrument(skip(self))]
    async fn delete_database(&self, name: &str) -> Result<bool> {
        if !self.capabilities.database_admin {
            return Err(Self::admin_unsupported("delete-database", name));
        }
        let removed = self.databases.remove(name).is_some();
        if removed {
            info!(db = name, "deleted database");
        }
        Ok(removed)
    }

    async fn list_databases(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.databases.iter().map(|e| e.key().clone()).collect();
        names.sort();
        Ok(names)
    }

    async fn latest(&self, name: &str) -> Result<DbRef> {
        let state = self.database(name)?.state();
        Ok(Self::outcome_ref(name, &state))
    }

    #[instrument(skip(self))]
    async fn sync(&self, name: &str, t: u64) -> Result<DbRef> {
        let mut updates = self.database(name)?.current.subscribe();
        let state = updates
            .wait_for(|state| state.basis().t >= t)
            .await
            .map_err(|_| Error::db_not_found(name))?
            .clone();
        debug!(basis_t = state.basis().t, "synced");
        Ok(Self::outcome_ref(name, &state))
    }

    #[instrument(skip(self, statements), fields(statements = statements.len()))]
    async fn transact(&self, name: &str, statements: Vec<Statement>) -> Result<TxOutcome> {
        let database = self.database(name)?;
        let _gate = database.write_gate.lock().await;

        let before = database.state();
        let applied = transactor::apply(&before, &statements)?;
        database.journal.append(applied.record.clone()).await?;
        let after = Arc::new(applied.state);
        database.current.send_replace(after.clone());
        info!(t = applied.record.t, datoms = applied.record.datoms.len(), "transacted");

        let temp_ids = if self.capabilities.resolves_temp_ids_locally {
            Default::default()
        } else {
            applied.temp_ids
        };
        Ok(TxOutcome {
            db_before: Self::outcome_ref(name, &before),
            db_after: Self::outcome_ref(name, &after),
            tx_data: applied.record.datoms,
            temp_ids,
        })
    }

    #[instrument(skip(self, seed, statements), fields(db = %seed.name, basis_t = seed.basis.t))]
    async fn with(&self, seed: &DbRef, statements: Vec<Statement>) -> Result<TxOutcome> {
        if seed.filter.is_time_filtered() || seed.filter.history {
            return Err(Error::FilterCombinationUnsupported(
                "with requires an unfiltered database".to_string(),
            ));
        }
        let base = self.state_of(seed)?.at(seed.basis.t);
        let applied = transactor::apply(&base, &statements)?;
        debug!(t = applied.record.t, "applied speculative transaction");

        let basis = applied.state.basis();
        let payload: Arc<dyn Any + Send + Sync> = Arc::new(applied.state);
        let db_after = DbRef {
            speculative: Some(SpeculativeToken::new(payload)),
            ..DbRef::new(seed.name.clone(), basis)
        };
        let temp_ids = if self.capabilities.resolves_temp_ids_locally {
            Default::default()
        } else {
            applied.temp_ids
        };
        Ok(TxOutcome {
            db_before: seed.clone(),
            db_after,
            tx_data: applied.record.datoms,
            temp_ids,
        })
    }

    async fn resolve(&self, db: &DbRef, point: TimePoint) -> Result<Basis> {
        Ok(self.state_of(db)?.resolve(point))
    }

    #[instrument(skip(self, db), fields(db = %db.name))]
    async fn datoms(&self, db: &DbRef, request: DatomsRequest) -> Result<Vec<Datom>> {
        let state = self.state_of(db)?;
        let prefix = KeyPrefix::resolve(
            request.index,
            &request.components,
            state.schema(),
            self.capabilities.avet_requires_index,
        )?;
        let visible = db.filter.visible(db.basis.t, state.scan(&prefix).iter());
        Ok(request.page.apply(visible).cloned().collect())
    }

    #[instrument(skip(self, db), fields(db = %db.name))]
    async fn index_range(&self, db: &DbRef, request: IndexRangeRequest) -> Result<Vec<Datom>> {
        let state = self.state_of(db)?;
        let attr = state
            .schema()
            .attribute_for(&request.attribute)
            .ok_or_else(|| unresolved_attribute(&request.attribute))?;
        check_index(IndexOrder::Avet, attr, self.capabilities.avet_requires_index)?;

        let prefix = KeyPrefix::from_parts(IndexOrder::Avet, vec![KeyPart::Attribute(attr.id)]);
        let run = state.scan(&prefix);
        let range = &request.range;
        let lo = range
            .start
            .as_ref()
            .map(|s| run.partition_point(|d| d.v < *s))
            .unwrap_or(0);
        let hi = range
            .end
            .as_ref()
            .map(|e| run.partition_point(|d| d.v < *e))
            .unwrap_or(run.len())
            .max(lo);

        let visible = db.filter.visible(db.basis.t, run[lo..hi].iter());
        Ok(request.page.apply(visible).cloned().collect())
    }

    #[instrument(skip(self, db), fields(db = %db.name))]
    async fn pull(&self, db: &DbRef, request: PullRequest) -> Result<PullMap> {
        if db.filter.history {
            return Err(history_unsupported("pull"));
        }
        let state = self.state_of(db)?;
        let e = Self::resolve_entity(&state, &request.entity)?;
        let puller = Puller::new(&state, db.filter, db.basis.t, request.page);
        Ok(puller.pull(e, &request.pattern))
    }

    #[instrument(skip(self, db), fields(db = %db.name))]
    async fn index_pull(&self, db: &DbRef, request: IndexPullRequest) -> Result<Vec<PullMap>> {
        if db.filter.history {
            return Err(history_unsupported("index-pull"));
        }
        if !matches!(request.index, IndexOrder::Avet | IndexOrder::Aevt) {
            return Err(Error::InvalidArgument(format!(
                "index-pull walks :avet or :aevt, not {}",
                request.index
            )));
        }
        let state = self.state_of(db)?;
        let Some(first) = request.start.first() else {
            return Err(Error::InvalidArgument(
                "index-pull start must name an attribute".to_string(),
            ));
        };
        let attr = state
            .schema()
            .attribute_for(first)
            .ok_or_else(|| unresolved_attribute(first))?;
        let start = KeyPrefix::resolve(
            request.index,
            &request.start,
            state.schema(),
            self.capabilities.avet_requires_index,
        )?;

        let run = state.scan(&KeyPrefix::from_parts(
            request.index,
            vec![KeyPart::Attribute(attr.id)],
        ));
        let visible: Vec<&Datom> = db.filter.visible(db.basis.t, run.iter()).collect();
        let entities: Vec<EntityId> = if request.reverse {
            let end = visible.partition_point(|d| start.compare_datom(d) != Ordering::Greater);
            visible[..end].iter().rev().map(|d| d.e).collect()
        } else {
            let begin = visible.partition_point(|d| start.compare_datom(d) == Ordering::Less);
            visible[begin..].iter().map(|d| d.e).collect()
        };

        let puller = Puller::new(&state, db.filter, db.basis.t, Page::all());
        Ok(request
            .page
            .apply(entities.into_iter())
            .map(|e| puller.pull(e, &request.pattern))
            .collect())
    }

    async fn db_stats(&self, db: &DbRef) -> Result<DbStats> {
        let state = self.state_of(db)?;
        let mut stats = DbStats::default();
        for datom in db
            .filter
            .visible(db.basis.t, state.index(IndexOrder::Eavt).iter())
        {
            stats.datoms += 1;
            if let Some(ident) = state.schema().ident_of(datom.a) {
                *stats.attrs.entry(ident.clone()).or_insert(0) += 1;
            }
        }
        Ok(stats)
    }

    async fn query(&self, request: QueryRequest) -> Result<Vec<Row>> {
        debug!(query = ?request.query, "query rejected");
        Err(Error::Unsupported(
            "query evaluation is not available on the in-process backend".to_string(),
        ))
    }

    #[instrument(skip(self))]
    async fn tx_range(&self, name: &str, request: TxRangeRequest) -> Result<Vec<TxEntry>> {
        let database = self.database(name)?;
        let state = database.state();
        let start = request.start.map(|p| state.range_bound(p));
        let end = match request.end {
            None | Some(TimePoint::T(0)) => None,
            Some(p) => Some(state.range_bound(p)),
        };
        let records = database.journal.range(TRange::new(start, end)).await?;
        Ok(request
            .page
            .apply(records.into_iter())
            .map(|r| TxEntry {
                t: r.t,
                tx: r.tx,
                data: r.datoms.clone(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::{AttributeSpec, Cardinality, Unique};
    use crate::core::statement::EntityMap;
    use crate::core::value::{Keyword, ValueType};
    use crate::index::{Limit, ValueRange};
    use crate::query::PullPattern;

    async fn films(service: &LocalService) -> DbRef {
        service.provision("films").await.unwrap();
        let schema: Vec<Statement> = vec![
            AttributeSpec::new(":movie/title", ValueType::String, Cardinality::One)
                .unique(Unique::Identity)
                .into(),
            AttributeSpec::new(":movie/genre", ValueType::String, Cardinality::One).into(),
        ];
        service.transact("films", schema).await.unwrap();
        let films: Vec<Statement> = ["The Goonies", "Commando", "Repo Man"]
            .into_iter()
            .map(|title| {
                EntityMap::new()
                    .attr(":movie/title", title)
                    .attr(":movie/genre", "action")
                    .into()
            })
            .collect();
        service.transact("films", films).await.unwrap().db_after
    }

    fn titles(datoms: &[Datom]) -> Vec<String> {
        datoms
            .iter()
            .filter_map(|d| d.v.as_str().map(str::to_string))
            .collect()
    }

    #[tokio::test]
    async fn test_unknown_database_is_not_found() {
        let service = LocalService::in_process();
        let err = service.latest("nope").await.unwrap_err();
        assert_eq!(err, Error::NotFound("Db not found: nope".to_string()));
    }

    #[tokio::test]
    async fn test_admin_follows_capability() {
        let local = LocalService::in_process();
        assert!(local.create_database("a").await.unwrap());
        assert!(!local.create_database("a").await.unwrap());
        assert_eq!(local.list_databases().await.unwrap(), vec!["a".to_string()]);
        assert!(local.delete_database("a").await.unwrap());

        let peer = LocalService::remote_peer();
        let err = peer.create_database("a").await.unwrap_err();
        assert_eq!(
            err,
            Error::Unsupported("create-database is not supported on this backend: a".to_string())
        );
        assert!(peer.provision("a").await.unwrap());
    }

    #[tokio::test]
    async fn test_index_range_bounds() {
        let service = LocalService::in_process();
        let db = films(&service).await;
        let range = |start: Option<&str>, end: Option<&str>| IndexRangeRequest {
            attribute: Value::Keyword(Keyword::new("movie/title")),
            range: ValueRange::new(start.map(Value::from), end.map(Value::from)),
            page: Page::all(),
            timeout: None,
        };

        let hits = service.index_range(&db, range(Some("D"), None)).await.unwrap();
        assert_eq!(titles(&hits), vec!["Repo Man", "The Goonies"]);

        let hits = service.index_range(&db, range(Some("C"), Some("S"))).await.unwrap();
        assert_eq!(titles(&hits), vec!["Commando", "Repo Man"]);

        let hits = service.index_range(&db, range(Some("c"), None)).await.unwrap();
        assert!(hits.is_empty());

        let mut paged = range(None, None);
        paged.page = Page::new(1, Limit::At(1));
        let hits = service.index_range(&db, paged).await.unwrap();
        assert_eq!(titles(&hits), vec!["Repo Man"]);
    }

    #[tokio::test]
    async fn test_remote_peer_requires_value_index() {
        let service = LocalService::remote_peer();
        let db = films(&service).await;
        let request = IndexRangeRequest {
            attribute: Value::Keyword(Keyword::new("movie/genre")),
            range: ValueRange::default(),
            page: Page::all(),
            timeout: None,
        };
        let err = service.index_range(&db, request).await.unwrap_err();
        assert!(matches!(err, Error::UnsupportedIndex(_)));
    }

    #[tokio::test]
    async fn test_index_pull_walks_from_start() {
        let service = LocalService::in_process();
        let db = films(&service).await;
        let request = |reverse| IndexPullRequest {
            index: IndexOrder::Avet,
            pattern: PullPattern::of([":movie/title"]),
            start: vec![
                Value::Keyword(Keyword::new("movie/title")),
                Value::from("D"),
            ],
            reverse,
            page: Page::all(),
            timeout: None,
        };
        let title = |m: &PullMap| format!("{:?}", m[&Keyword::new("movie/title")]);

        let forward = service.index_pull(&db, request(false)).await.unwrap();
        assert_eq!(forward.len(), 2);
        assert!(title(&forward[0]).contains("Repo Man"));

        let backward = service.index_pull(&db, request(true)).await.unwrap();
        assert_eq!(backward.len(), 1);
        assert!(title(&backward[0]).contains("Commando"));
    }

    #[tokio::test]
    async fn test_pull_on_history_is_unsupported() {
        let service = LocalService::in_process();
        let db = films(&service).await;
        let history = db.with_filter(db.filter.history());
        let request = PullRequest {
            pattern: PullPattern::wildcard(),
            entity: EntityRef::Ident(Keyword::new("movie/title")),
            page: Page::all(),
            timeout: None,
        };
        assert!(matches!(
            service.pull(&history, request).await,
            Err(Error::Unsupported(_))
        ));
    }

    #[tokio::test]
    async fn test_sync_waits_for_commit() {
        let service = Arc::new(LocalService::in_process());
        let db = films(&service).await;
        let target = db.basis_t() + 1;

        let waiter = {
            let service = service.clone();
            tokio::spawn(async move { service.sync("films", target).await })
        };
        service.transact("films", vec![]).await.unwrap();
        let synced = waiter.await.unwrap().unwrap();
        assert_eq!(synced.basis_t(), target);
    }

    async fn tx_ts(
        service: &LocalService,
        start: Option<TimePoint>,
        end: Option<TimePoint>,
    ) -> Vec<u64> {
        let request = TxRangeRequest {
            start,
            end,
            page: Page::all(),
        };
        let entries = service.tx_range("films", request).await.unwrap();
        entries.into_iter().map(|e| e.t).collect()
    }

    #[tokio::test]
    async fn test_tx_range_instant_between_transactions() {
        let service = LocalService::in_process();
        films(&service).await;
        let first = service.transact("films", vec![]).await.unwrap().db_after.basis;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let second = service.transact("films", vec![]).await.unwrap().db_after.basis;
        let between = first.tx_instant.unwrap() + chrono::Duration::milliseconds(5);
        assert!(between < second.tx_instant.unwrap());

        let after = tx_ts(&service, Some(TimePoint::Instant(between)), None).await;
        assert_eq!(after, vec![second.t]);

        let end = Some(TimePoint::Instant(between));
        let before = tx_ts(&service, Some(TimePoint::T(first.t)), end).await;
        assert_eq!(before, vec![first.t]);

        let exact = tx_ts(&service, first.tx_instant.map(TimePoint::Instant), None).await;
        assert_eq!(exact, vec![first.t, second.t]);
    }

    #[tokio::test]
    async fn test_db_stats_counts_current_datoms() {
        let service = LocalService::in_process();
        let db = films(&service).await;
        let stats = service.db_stats(&db).await.unwrap();
        assert_eq!(stats.attrs[&Keyword::new("movie/title")], 3);
        assert_eq!(stats.attrs[&Keyword::new("movie/genre")], 3);
        assert!(stats.datoms > 6);
    }
}
