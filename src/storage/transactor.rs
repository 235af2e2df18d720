//! Applies transaction statements to a database state
//!
//! Resolution runs in three passes: statements are expanded into primitive
//! operations, temp ids are resolved (unique-identity values upsert onto the
//! entity already holding them, anything left gets a fresh id), and finally
//! each operation is checked against the current state and turned into
//! datoms. The transaction-instant datom is always first.

use crate::core::datom::{Datom, EntityId, PART_DB, PART_USER};
use crate::core::schema::{ids, Attribute, Cardinality, Unique};
use crate::core::statement::{EntityRef, Statement, TX_TEMP_ID};
use crate::core::temporal::{next_instant, TxInstant};
use crate::core::value::{Keyword, Value, ValueType};
use crate::error::{Anomaly, AnomalyCategory, Error, Result};
use crate::storage::journal::TxRecord;
use crate::storage::state::{DbState, IdCounters};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::debug;
use uuid::Uuid;

/// Outcome of applying one transaction
#[derive(Debug, Clone)]
pub struct Applied {
    pub state: DbState,
    pub record: TxRecord,
    /// Caller-supplied temp ids and the entities they resolved to
    pub temp_ids: BTreeMap<String, EntityId>,
}

enum Op {
    Assert(EntityRef, Keyword, Value),
    Retract(EntityRef, Keyword, Value),
    RetractEntity(EntityRef),
}

impl Op {
    fn entity(&self) -> &EntityRef {
        match self {
            Op::Assert(e, _, _) | Op::Retract(e, _, _) | Op::RetractEntity(e) => e,
        }
    }
}

/// Apply `statements` as the transaction following `state`
pub fn apply(state: &DbState, statements: &[Statement]) -> Result<Applied> {
    let t = state.basis().t + 1;
    let instant = next_instant(state.last_instant());
    let mut builder = TxBuilder::new(state, t, instant);

    let ops = builder.expand(statements);
    builder.upsert(&ops)?;
    builder.allocate(&ops);
    for op in &ops {
        builder.emit(op)?;
    }
    Ok(builder.finish())
}

struct TxBuilder<'s> {
    state: &'s DbState,
    t: u64,
    tx: EntityId,
    instant: TxInstant,
    counters: IdCounters,
    temp_ids: HashMap<String, EntityId>,
    explicit: BTreeSet<String>,
    schema_temp_ids: HashSet<String>,
    datoms: Vec<Datom>,
    emitted: HashSet<(EntityId, EntityId, Value, bool)>,
    /// Card-one values asserted in this transaction
    assigned: HashMap<(EntityId, EntityId), Value>,
}

impl<'s> TxBuilder<'s> {
    fn new(state: &'s DbState, t: u64, instant: TxInstant) -> Self {
        let tx = EntityId::from_t(t);
        Self {
            state,
            t,
            tx,
            instant,
            counters: state.counters(),
            temp_ids: HashMap::from([(TX_TEMP_ID.to_string(), tx)]),
            explicit: BTreeSet::new(),
            schema_temp_ids: HashSet::new(),
            datoms: vec![Datom::new(tx, ids::TX_INSTANT, instant, tx, true)],
            emitted: HashSet::new(),
            assigned: HashMap::new(),
        }
    }

    fn expand(&mut self, statements: &[Statement]) -> Vec<Op> {
        let mut ops = Vec::new();
        for statement in statements {
            match statement {
                Statement::Map(map) => {
                    let id = match &map.id {
                        Some(id) => {
                            self.note_explicit(id);
                            id.clone()
                        }
                        None => EntityRef::TempId(Uuid::new_v4().to_string()),
                    };
                    let installs_attribute = map.get(&Keyword::new("db/ident")).is_some()
                        && map.get(&Keyword::new("db/valueType")).is_some();
                    if installs_attribute {
                        if let EntityRef::TempId(tid) = &id {
                            self.schema_temp_ids.insert(tid.clone());
                        }
                    }
                    for (a, v) in &map.attrs {
                        self.note_value(v);
                        ops.push(Op::Assert(id.clone(), a.clone(), v.clone()));
                    }
                    if installs_attribute {
                        if let Some(v) = ref_value(&id) {
                            ops.push(Op::Assert(
                                EntityRef::Ident(Keyword::new("db.part/db")),
                                Keyword::new("db.install/attribute"),
                                v,
                            ));
                        }
                    }
                }
                Statement::Add { e, a, v } => {
                    self.note_explicit(e);
                    self.note_value(v);
                    ops.push(Op::Assert(e.clone(), a.clone(), v.clone()));
                }
                Statement::Retract { e, a, v } => {
                    self.note_explicit(e);
                    ops.push(Op::Retract(e.clone(), a.clone(), v.clone()));
                }
                Statement::RetractEntity(e) => {
                    self.note_explicit(e);
                    ops.push(Op::RetractEntity(e.clone()));
                }
            }
        }
        ops
    }

    fn note_explicit(&mut self, e: &EntityRef) {
        if let EntityRef::TempId(tid) = e {
            self.explicit.insert(tid.clone());
        }
    }

    fn note_value(&mut self, v: &Value) {
        if let Value::String(s) = v {
            // Only meaningful in ref position; filtered in `finish`
            self.explicit.insert(s.clone());
        }
    }

    /// Resolve temp ids asserting a unique-identity value already held by
    /// an existing entity
    fn upsert(&mut self, ops: &[Op]) -> Result<()> {
        for op in ops {
            let Op::Assert(EntityRef::TempId(tid), a, v) = op else {
                continue;
            };
            let Some(attr) = self.state.schema().attribute_by_ident(a) else {
                continue;
            };
            if attr.unique != Some(Unique::Identity) || attr.is_ref() {
                continue;
            }
            if let Some(existing) = self.state.entity_with(attr.id, v) {
                match self.temp_ids.get(tid) {
                    Some(bound) if *bound != existing => {
                        return Err(conflict(format!(
                            "Temp id {tid} upserts to both {bound} and {existing}"
                        )))
                    }
                    _ => {
                        self.temp_ids.insert(tid.clone(), existing);
                    }
                }
            }
        }
        Ok(())
    }

    /// Hand out fresh ids to temp ids in entity position, in statement order
    fn allocate(&mut self, ops: &[Op]) {
        for op in ops {
            let EntityRef::TempId(tid) = op.entity() else {
                continue;
            };
            if self.temp_ids.contains_key(tid) {
                continue;
            }
            let id = if self.schema_temp_ids.contains(tid) {
                let id = EntityId::new(PART_DB, self.counters.next_attribute);
                self.counters.next_attribute += 1;
                id
            } else {
                let id = EntityId::new(PART_USER, self.counters.next_entity);
                self.counters.next_entity += 1;
                id
            };
            self.temp_ids.insert(tid.clone(), id);
        }
    }

    fn emit(&mut self, op: &Op) -> Result<()> {
        match op {
            Op::Assert(e, a, v) => {
                let e = self.resolve_entity(e)?;
                let attr = self.attribute(a)?.clone();
                let v = self.coerce(&attr, v)?;
                self.assert(e, &attr, v)
            }
            Op::Retract(e, a, v) => {
                let e = self.resolve_entity(e)?;
                let attr = self.attribute(a)?.clone();
                let v = self.coerce(&attr, v)?;
                if self.state.current_values(e, attr.id).contains(&v) {
                    self.push(Datom::new(e, attr.id, v, self.tx, false));
                }
                Ok(())
            }
            Op::RetractEntity(e) => {
                let e = self.resolve_entity(e)?;
                let mut doomed = self.state.current_entity(e);
                doomed.extend(self.state.current_references(e));
                for datom in doomed {
                    self.push(datom.retraction(self.tx));
                }
                Ok(())
            }
        }
    }

    fn assert(&mut self, e: EntityId, attr: &Attribute, v: Value) -> Result<()> {
        if attr.unique.is_some() {
            if let Some(holder) = self.state.entity_with(attr.id, &v) {
                if holder != e {
                    return Err(conflict(format!(
                        "Unique conflict: {}, value: {v} already held by: {holder}",
                        attr.ident
                    )));
                }
            }
        }

        let current = self.state.current_values(e, attr.id);
        if attr.cardinality == Cardinality::One {
            match self.assigned.get(&(e, attr.id)) {
                Some(other) if *other != v => {
                    return Err(conflict(format!(
                        "Two datoms in the same transaction conflict: {e} {} {other} and {v}",
                        attr.ident
                    )))
                }
                Some(_) => return Ok(()),
                None => {}
            }
            self.assigned.insert((e, attr.id), v.clone());
            if current.contains(&v) {
                return Ok(());
            }
            for old in current {
                self.push(Datom::new(e, attr.id, old, self.tx, false));
            }
        } else if current.contains(&v) {
            return Ok(());
        }
        self.push(Datom::new(e, attr.id, v, self.tx, true));
        Ok(())
    }

    fn push(&mut self, datom: Datom) {
        let key = (datom.e, datom.a, datom.v.clone(), datom.added);
        if self.emitted.insert(key) {
            self.datoms.push(datom);
        }
    }

    fn attribute(&self, ident: &Keyword) -> Result<&'s Attribute> {
        let state: &'s DbState = self.state;
        state
            .schema()
            .attribute_by_ident(ident)
            .ok_or_else(|| incorrect(format!("Unable to resolve entity: {ident}")))
    }

    fn resolve_entity(&self, e: &EntityRef) -> Result<EntityId> {
        match e {
            EntityRef::Id(id) => Ok(*id),
            EntityRef::TempId(tid) => self
                .temp_ids
                .get(tid)
                .copied()
                .ok_or_else(|| incorrect(format!("Unable to resolve tempid: {tid:?}"))),
            EntityRef::Ident(k) => self
                .state
                .schema()
                .resolve_ident(k)
                .ok_or_else(|| incorrect(format!("Unable to resolve entity: {k}"))),
            EntityRef::Lookup(a, v) => {
                let attr = self.attribute(a)?;
                if attr.unique.is_none() {
                    return Err(incorrect(format!(
                        "Attribute {a} is not unique and cannot be used in a lookup ref"
                    )));
                }
                let v = self.coerce(attr, v)?;
                self.state
                    .entity_with(attr.id, &v)
                    .ok_or_else(|| incorrect(format!("Unable to resolve entity: [{a} {v}]")))
            }
        }
    }

    fn coerce(&self, attr: &Attribute, v: &Value) -> Result<Value> {
        if attr.value_type != ValueType::Ref {
            return if v.value_type() == attr.value_type {
                Ok(v.clone())
            } else {
                Err(incorrect(format!(
                    "Value {v} is not a valid {} for attribute {}",
                    attr.value_type.ident(),
                    attr.ident
                )))
            };
        }
        let target = match v {
            Value::String(tid) => self.temp_ids.get(tid).copied(),
            Value::Keyword(k) => self.state.schema().resolve_ident(k),
            other => other.as_entity(),
        };
        target
            .map(Value::Ref)
            .ok_or_else(|| incorrect(format!("Unable to resolve entity: {v}")))
    }

    fn finish(self) -> Applied {
        let record = TxRecord {
            t: self.t,
            tx: self.tx,
            instant: self.instant,
            datoms: self.datoms,
        };
        let state = self.state.commit(&record, self.counters);
        let temp_ids = self
            .explicit
            .into_iter()
            .filter_map(|tid| self.temp_ids.get(&tid).map(|id| (tid, *id)))
            .collect();
        debug!(t = record.t, datoms = record.datoms.len(), "applied transaction");
        Applied {
            state,
            record,
            temp_ids,
        }
    }
}

fn ref_value(id: &EntityRef) -> Option<Value> {
    match id {
        EntityRef::Id(e) => Some(Value::Ref(*e)),
        EntityRef::TempId(tid) => Some(Value::String(tid.clone())),
        EntityRef::Ident(k) => Some(Value::Keyword(k.clone())),
        EntityRef::Lookup(..) => None,
    }
}

fn incorrect(message: String) -> Error {
    Anomaly::new(AnomalyCategory::Incorrect, message).into()
}

fn conflict(message: String) -> Error {
    Anomaly::new(AnomalyCategory::Conflict, message).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::AttributeSpec;
    use crate::core::statement::EntityMap;

    fn schema_state() -> DbState {
        let (state, _) = DbState::genesis();
        let schema: Vec<Statement> = vec![
            AttributeSpec::new(":movie/title", ValueType::String, Cardinality::One)
                .unique(Unique::Identity)
                .into(),
            AttributeSpec::new(":movie/genre", ValueType::String, Cardinality::One).into(),
            AttributeSpec::new(":movie/sequel", ValueType::Ref, Cardinality::One).into(),
        ];
        apply(&state, &schema).unwrap().state
    }

    fn film(tid: &str, title: &str, genre: &str) -> Statement {
        EntityMap::new()
            .id(tid)
            .attr(":movie/title", title)
            .attr(":movie/genre", genre)
            .into()
    }

    #[test]
    fn test_empty_transaction_records_only_the_instant() {
        let (state, _) = DbState::genesis();
        let applied = apply(&state, &[]).unwrap();
        assert_eq!(applied.record.datoms.len(), 1);
        assert_eq!(applied.record.datoms[0].e, EntityId::from_t(1));
        assert_eq!(applied.state.basis().t, 1);
        assert!(applied.temp_ids.is_empty());
    }

    #[test]
    fn test_schema_maps_install_attributes() {
        let state = schema_state();
        let title = state
            .schema()
            .attribute_by_ident(&Keyword::new("movie/title"))
            .unwrap();
        assert_eq!(title.id.as_u64(), ids::FIRST_USER_ATTRIBUTE);
        assert_eq!(title.unique, Some(Unique::Identity));
        assert!(state.schema().attribute_by_ident(&Keyword::new("movie/sequel")).unwrap().is_ref());
    }

    #[test]
    fn test_card_one_assert_retracts_previous_value() {
        let state = schema_state();
        let first = apply(&state, &[film("commando", "Commando", "action")]).unwrap();
        let e = first.temp_ids["commando"];

        let second = apply(&first.state, &[Statement::add(e, ":movie/genre", "thriller")]).unwrap();
        let ops: Vec<(bool, Value)> = second.record.datoms[1..]
            .iter()
            .map(|d| (d.added, d.v.clone()))
            .collect();
        assert_eq!(
            ops,
            vec![(false, Value::from("action")), (true, Value::from("thriller"))]
        );
    }

    #[test]
    fn test_redundant_assertions_are_elided() {
        let state = schema_state();
        let first = apply(&state, &[film("commando", "Commando", "action")]).unwrap();
        let again = apply(&first.state, &[film("other", "Commando", "action")]).unwrap();
        // The title upserts onto the existing entity; nothing changes
        assert_eq!(again.record.datoms.len(), 1);
        assert_eq!(again.temp_ids["other"], first.temp_ids["commando"]);
    }

    #[test]
    fn test_retract_entity_removes_facts_and_references() {
        let state = schema_state();
        let first = apply(
            &state,
            &[
                film("commando", "Commando", "action"),
                EntityMap::new()
                    .id("sequel")
                    .attr(":movie/title", "Commando 2")
                    .attr(":movie/sequel", "commando")
                    .into(),
            ],
        )
        .unwrap();
        let commando = first.temp_ids["commando"];

        let gone = apply(&first.state, &[Statement::retract_entity(commando)]).unwrap();
        assert_eq!(gone.record.datoms.len(), 4);
        assert!(gone.record.datoms[1..].iter().all(|d| !d.added));
        assert!(gone.state.current_entity(commando).is_empty());
        assert!(gone.state.current_references(commando).is_empty());
    }

    #[test]
    fn test_unknown_attribute_is_rejected() {
        let state = schema_state();
        let err = apply(&state, &[Statement::add("x", ":movie/rating", 5)]).unwrap_err();
        assert_eq!(
            err.anomaly().map(|a| a.category),
            Some(AnomalyCategory::Incorrect)
        );
    }

    #[test]
    fn test_conflicting_card_one_values_fail() {
        let state = schema_state();
        let err = apply(
            &state,
            &[
                Statement::add("x", ":movie/genre", "action"),
                Statement::add("x", ":movie/genre", "comedy"),
            ],
        )
        .unwrap_err();
        assert_eq!(err.anomaly().map(|a| a.category), Some(AnomalyCategory::Conflict));
    }

    #[test]
    fn test_tx_temp_id_names_the_transaction() {
        let state = schema_state();
        let applied = apply(&state, &[Statement::add(TX_TEMP_ID, ":db/doc", "import")]).unwrap();
        assert_eq!(applied.record.datoms[1].e, applied.record.tx);
        assert_eq!(applied.temp_ids[TX_TEMP_ID], applied.record.tx);
    }
}
