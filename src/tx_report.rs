//! Result of a transaction

use crate::core::datom::{Datom, EntityId};
use crate::core::temporal::TxInstant;
use crate::db::Db;
use std::collections::BTreeMap;

/// Views around one transaction plus the datoms it produced
#[derive(Debug, Clone)]
pub struct TxReport {
    db_before: Db,
    db_after: Db,
    tx_data: Vec<Datom>,
    temp_ids: BTreeMap<String, EntityId>,
}

impl TxReport {
    pub(crate) fn new(
        db_before: Db,
        db_after: Db,
        tx_data: Vec<Datom>,
        temp_ids: BTreeMap<String, EntityId>,
    ) -> Self {
        Self {
            db_before,
            db_after,
            tx_data,
            temp_ids,
        }
    }

    pub fn db_before(&self) -> &Db {
        &self.db_before
    }

    pub fn db_after(&self) -> &Db {
        &self.db_after
    }

    /// Datoms of the transaction; the tx-instant datom comes first
    pub fn tx_data(&self) -> &[Datom] {
        &self.tx_data
    }

    /// Temp id resolutions. Empty when the backend resolves them locally.
    pub fn temp_ids(&self) -> &BTreeMap<String, EntityId> {
        &self.temp_ids
    }

    pub fn temp_id(&self, temp_id: &str) -> Option<EntityId> {
        self.temp_ids.get(temp_id).copied()
    }

    /// `t` of the database before the transaction
    pub fn basis_t(&self) -> u64 {
        self.db_before.basis_t()
    }

    /// `t` of this transaction
    pub fn t(&self) -> u64 {
        self.db_after.basis_t()
    }

    /// Entity id of this transaction
    pub fn tx(&self) -> EntityId {
        EntityId::from_t(self.t())
    }

    pub fn tx_instant(&self) -> Option<TxInstant> {
        self.db_after.basis_tx_instant()
    }
}
