//! Datoms: atomic (entity, attribute, value, tx, added) facts

use crate::core::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of bits reserved for the index inside a partition
pub const PARTITION_SHIFT: u32 = 42;

/// Partition holding schema and system entities
pub const PART_DB: u64 = 0;
/// Partition holding transaction entities
pub const PART_TX: u64 = 3;
/// Partition holding user entities
pub const PART_USER: u64 = 4;

/// Opaque, integer-valued entity identifier
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct EntityId(pub u64);

impl EntityId {
    /// Build an id from a partition and an index within it
    pub const fn new(partition: u64, index: u64) -> Self {
        Self((partition << PARTITION_SHIFT) | index)
    }

    /// Raw numeric id
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Partition this id was allocated in
    pub fn partition(&self) -> u64 {
        self.0 >> PARTITION_SHIFT
    }

    /// Transaction entity for a given `t`
    pub fn from_t(t: u64) -> Self {
        Self::new(PART_TX, t)
    }

    /// True when this id names a transaction
    pub fn is_tx(&self) -> bool {
        self.partition() == PART_TX
    }

    /// The `t` of a transaction id (the index bits)
    pub fn t(&self) -> u64 {
        self.0 & ((1 << PARTITION_SHIFT) - 1)
    }
}

impl From<u64> for EntityId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Immutable fact. Ordering is the EAVT tuple order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Datom {
    /// Entity
    pub e: EntityId,
    /// Attribute id
    pub a: EntityId,
    /// Value
    pub v: Value,
    /// Transaction that produced the datom
    pub tx: EntityId,
    /// True for an assertion, false for a retraction
    pub added: bool,
}

impl Datom {
    /// Create a new datom
    pub fn new(e: EntityId, a: EntityId, v: impl Into<Value>, tx: EntityId, added: bool) -> Self {
        Self {
            e,
            a,
            v: v.into(),
            tx,
            added,
        }
    }

    /// Entity
    pub fn e(&self) -> EntityId {
        self.e
    }

    /// Attribute id
    pub fn a(&self) -> EntityId {
        self.a
    }

    /// Value
    pub fn v(&self) -> &Value {
        &self.v
    }

    /// Transaction id
    pub fn tx(&self) -> EntityId {
        self.tx
    }

    /// Assertion flag
    pub fn added(&self) -> bool {
        self.added
    }

    /// Logical time of the producing transaction
    pub fn t(&self) -> u64 {
        self.tx.t()
    }

    /// Same entity, attribute and value (ignores tx and op)
    pub fn same_fact(&self, other: &Datom) -> bool {
        self.e == other.e && self.a == other.a && self.v == other.v
    }

    /// A retraction of this datom's fact in transaction `tx`
    pub fn retraction(&self, tx: EntityId) -> Datom {
        Datom {
            e: self.e,
            a: self.a,
            v: self.v.clone(),
            tx,
            added: false,
        }
    }
}

impl fmt::Display for Datom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#datom[{} {} {} {} {}]",
            self.e, self.a, self.v, self.tx, self.added
        )
    }
}
