//! Immutable database state: the four sorted indexes plus timeline and schema
//!
//! Every index keeps the full history of assertions and retractions. A new
//! state is produced by merging one transaction's datoms into a copy of the
//! previous state; existing states are never mutated, so readers holding an
//! `Arc<DbState>` always see a complete transaction boundary.

use crate::core::datom::{Datom, EntityId, PART_USER};
use crate::core::schema::{ids, Schema};
use crate::core::temporal::{next_instant, Basis, TimePoint, TxInstant};
use crate::core::value::Value;
use crate::core::view::CurrentState;
use crate::index::{IndexOrder, KeyPart, KeyPrefix};
use crate::storage::journal::TxRecord;
use std::sync::Arc;

/// Snapshot of a database at one basis
#[derive(Debug, Clone)]
pub struct DbState {
    basis: Basis,
    indexes: [Arc<Vec<Datom>>; 4],
    /// `(t, instant)` of every transaction, ascending
    timeline: Arc<Vec<(u64, TxInstant)>>,
    schema: Arc<Schema>,
    next_entity: u64,
    next_attribute: u64,
}

/// Entity id counters handed to the transactor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdCounters {
    pub next_entity: u64,
    pub next_attribute: u64,
}

impl DbState {
    /// Fresh database holding only the bootstrap transaction at `t = 0`
    pub fn genesis() -> (Self, TxRecord) {
        let instant = next_instant(None);
        let (_, datoms) = Schema::bootstrap(instant);
        let tx = EntityId::from_t(0);

        let empty = Self {
            basis: Basis::new(0, Some(instant)),
            indexes: Default::default(),
            timeline: Arc::new(Vec::new()),
            schema: Arc::new(Schema::default()),
            next_entity: ids::FIRST_USER_ENTITY,
            next_attribute: ids::FIRST_USER_ATTRIBUTE,
        };
        let record = TxRecord {
            t: 0,
            tx,
            instant,
            datoms,
        };
        let state = empty.commit(&record, empty.counters());
        (state, record)
    }

    pub fn basis(&self) -> Basis {
        self.basis
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn counters(&self) -> IdCounters {
        IdCounters {
            next_entity: self.next_entity,
            next_attribute: self.next_attribute,
        }
    }

    /// Instant of the latest transaction
    pub fn last_instant(&self) -> Option<TxInstant> {
        self.timeline.last().map(|(_, i)| *i)
    }

    /// Every datom ever asserted or retracted, in `order`
    pub fn index(&self, order: IndexOrder) -> &[Datom] {
        &self.indexes[order.slot()]
    }

    /// Datoms matching `prefix`, in its index order, across all time
    pub fn scan(&self, prefix: &KeyPrefix) -> &[Datom] {
        prefix.slice(self.index(prefix.order()))
    }

    /// Resolve a time point to its canonical `t` and the instant of the
    /// latest transaction at or before it. Instants before the first
    /// transaction resolve to `t = 0`.
    pub fn resolve(&self, point: TimePoint) -> Basis {
        let t = match point {
            TimePoint::T(t) => t,
            TimePoint::Tx(tx) => tx.t(),
            TimePoint::Instant(instant) => {
                let n = self.timeline.partition_point(|(_, i)| *i <= instant);
                n.checked_sub(1).map(|i| self.timeline[i].0).unwrap_or(0)
            }
        };
        let n = self.timeline.partition_point(|(tt, _)| *tt <= t);
        let tx_instant = n.checked_sub(1).map(|i| self.timeline[i].1);
        Basis::new(t, tx_instant)
    }

    /// `t` of a transaction-range bound. An instant maps to the first
    /// transaction committed at or after it, or one past the latest.
    pub fn range_bound(&self, point: TimePoint) -> u64 {
        match point {
            TimePoint::Instant(instant) => {
                let n = self.timeline.partition_point(|(_, i)| *i < instant);
                match self.timeline.get(n) {
                    Some((t, _)) => *t,
                    None => self.basis.t + 1,
                }
            }
            other => self.resolve(other).t,
        }
    }

    /// Values of `(e, a)` currently asserted
    pub fn current_values(&self, e: EntityId, a: EntityId) -> Vec<Value> {
        let prefix = self.prefix(IndexOrder::Eavt, vec![KeyPart::Entity(e), KeyPart::Attribute(a)]);
        CurrentState::new(self.scan(&prefix).iter())
            .map(|d| d.v.clone())
            .collect()
    }

    /// Currently asserted datoms about `e`
    pub fn current_entity(&self, e: EntityId) -> Vec<Datom> {
        let prefix = self.prefix(IndexOrder::Eavt, vec![KeyPart::Entity(e)]);
        CurrentState::new(self.scan(&prefix).iter()).cloned().collect()
    }

    /// Currently asserted datoms referencing `e`
    pub fn current_references(&self, e: EntityId) -> Vec<Datom> {
        let prefix = self.prefix(IndexOrder::Vaet, vec![KeyPart::Value(Value::Ref(e))]);
        CurrentState::new(self.scan(&prefix).iter()).cloned().collect()
    }

    /// Entity currently holding `v` for attribute `a`
    pub fn entity_with(&self, a: EntityId, v: &Value) -> Option<EntityId> {
        let prefix = self.prefix(
            IndexOrder::Avet,
            vec![KeyPart::Attribute(a), KeyPart::Value(v.clone())],
        );
        CurrentState::new(self.scan(&prefix).iter())
            .next()
            .map(|d| d.e)
    }

    fn prefix(&self, order: IndexOrder, parts: Vec<KeyPart>) -> KeyPrefix {
        KeyPrefix::from_parts(order, parts)
    }

    /// This state as it stood at basis `t`
    pub fn at(&self, t: u64) -> DbState {
        if t >= self.basis.t {
            return self.clone();
        }
        let indexes: [Arc<Vec<Datom>>; 4] = self.indexes.clone().map(|index| {
            Arc::new(index.iter().filter(|d| d.t() <= t).cloned().collect::<Vec<_>>())
        });
        let timeline: Vec<(u64, TxInstant)> =
            self.timeline.iter().filter(|(tt, _)| *tt <= t).copied().collect();
        let mut schema = Schema::default();
        for datom in indexes[IndexOrder::Eavt.slot()].iter() {
            schema.apply(datom);
        }

        DbState {
            basis: Basis::new(t, timeline.last().map(|(_, i)| *i)),
            indexes,
            timeline: Arc::new(timeline),
            schema: Arc::new(schema),
            next_entity: self.next_entity,
            next_attribute: self.next_attribute,
        }
    }

    /// State after `record`, with entity counters advanced to `counters`
    pub fn commit(&self, record: &TxRecord, counters: IdCounters) -> DbState {
        let mut indexes = self.indexes.clone();
        for order in IndexOrder::ALL {
            let merged = Arc::make_mut(&mut indexes[order.slot()]);
            merged.extend(record.datoms.iter().filter(|d| order.admits(d)).cloned());
            merged.sort_by(|a, b| order.compare(a, b));
        }

        let mut timeline = self.timeline.clone();
        Arc::make_mut(&mut timeline).push((record.t, record.instant));

        let mut schema = self.schema.clone();
        if record.datoms.iter().any(|d| touches_schema(d)) {
            let schema = Arc::make_mut(&mut schema);
            for datom in &record.datoms {
                schema.apply(datom);
            }
        }

        DbState {
            basis: Basis::new(record.t, Some(record.instant)),
            indexes,
            timeline,
            schema,
            next_entity: counters.next_entity,
            next_attribute: counters.next_attribute,
        }
    }
}

fn touches_schema(datom: &Datom) -> bool {
    datom.e.partition() != PART_USER
        && matches!(
            datom.a,
            ids::DB_IDENT
                | ids::VALUE_TYPE
                | ids::CARDINALITY
                | ids::UNIQUE
                | ids::INDEX
                | ids::DOC
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::value::Keyword;

    #[test]
    fn test_genesis_indexes_bootstrap() {
        let (state, record) = DbState::genesis();
        assert_eq!(state.basis().t, 0);
        assert_eq!(state.index(IndexOrder::Eavt).len(), record.datoms.len());
        assert!(state.index(IndexOrder::Vaet).len() < record.datoms.len());
        assert!(state
            .schema()
            .attribute_by_ident(&Keyword::new("db/txInstant"))
            .is_some());
        assert_eq!(state.counters().next_entity, ids::FIRST_USER_ENTITY);
    }

    #[test]
    fn test_resolve_accepts_every_time_point_form() {
        let (state, _) = DbState::genesis();
        let t0_instant = state.last_instant().unwrap();
        let tx = EntityId::from_t(1);
        let instant = t0_instant + chrono::Duration::milliseconds(5);
        let record = TxRecord {
            t: 1,
            tx,
            instant,
            datoms: vec![Datom::new(tx, ids::TX_INSTANT, instant, tx, true)],
        };
        let state = state.commit(&record, state.counters());

        let by_t = state.resolve(TimePoint::T(1));
        assert_eq!(by_t, Basis::new(1, Some(instant)));
        assert_eq!(state.resolve(TimePoint::Tx(tx)), by_t);
        assert_eq!(state.resolve(TimePoint::Instant(instant)), by_t);
        assert_eq!(
            state.resolve(TimePoint::Instant(instant - chrono::Duration::milliseconds(1))).t,
            0
        );
    }

    #[test]
    fn test_range_bound_rounds_instants_up() {
        let (state, _) = DbState::genesis();
        let t0_instant = state.last_instant().unwrap();
        let mut state = state;
        for t in 1..=2u64 {
            let tx = EntityId::from_t(t);
            let instant = t0_instant + chrono::Duration::milliseconds(10 * t as i64);
            let record = TxRecord {
                t,
                tx,
                instant,
                datoms: vec![Datom::new(tx, ids::TX_INSTANT, instant, tx, true)],
            };
            state = state.commit(&record, state.counters());
        }
        let ms = chrono::Duration::milliseconds;

        assert_eq!(state.range_bound(TimePoint::Instant(t0_instant + ms(15))), 2);
        assert_eq!(state.range_bound(TimePoint::Instant(t0_instant + ms(10))), 1);
        assert_eq!(state.range_bound(TimePoint::Instant(t0_instant + ms(25))), 3);
        assert_eq!(state.range_bound(TimePoint::T(1)), 1);
        assert_eq!(state.range_bound(TimePoint::Tx(EntityId::from_t(2))), 2);
        assert_eq!(state.resolve(TimePoint::Instant(t0_instant + ms(15))).t, 1);
    }

    #[test]
    fn test_current_values_follow_retractions() {
        let (state, _) = DbState::genesis();
        let e = EntityId::new(PART_USER, 1000);
        let a = ids::DOC;
        let tx1 = EntityId::from_t(1);
        let tx2 = EntityId::from_t(2);
        let instant = state.last_instant().unwrap();

        let first = TxRecord {
            t: 1,
            tx: tx1,
            instant,
            datoms: vec![Datom::new(e, a, "draft", tx1, true)],
        };
        let state = state.commit(&first, state.counters());
        assert_eq!(state.current_values(e, a), vec![Value::from("draft")]);
        assert_eq!(state.entity_with(a, &Value::from("draft")), Some(e));

        let second = TxRecord {
            t: 2,
            tx: tx2,
            instant,
            datoms: vec![Datom::new(e, a, "draft", tx2, false)],
        };
        let state = state.commit(&second, state.counters());
        assert!(state.current_values(e, a).is_empty());
        assert!(state.current_entity(e).is_empty());
    }
}
