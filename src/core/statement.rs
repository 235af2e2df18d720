//! Transaction statements

use crate::core::datom::EntityId;
use crate::core::value::{Keyword, Value};
use std::fmt;

/// Reserved temp id naming the current transaction entity
pub const TX_TEMP_ID: &str = "datomic.tx";

/// Reference to an entity inside a statement
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityRef {
    /// An existing entity id
    Id(EntityId),
    /// Caller-supplied placeholder, resolved by the transaction
    TempId(String),
    /// Entity named by `:db/ident`
    Ident(Keyword),
    /// Entity holding a unique attribute value
    Lookup(Keyword, Value),
}

impl From<EntityId> for EntityRef {
    fn from(id: EntityId) -> Self {
        EntityRef::Id(id)
    }
}

impl From<&str> for EntityRef {
    fn from(s: &str) -> Self {
        match s.strip_prefix(':') {
            Some(ident) => EntityRef::Ident(Keyword::new(ident)),
            None => EntityRef::TempId(s.to_string()),
        }
    }
}

impl From<Keyword> for EntityRef {
    fn from(k: Keyword) -> Self {
        EntityRef::Ident(k)
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityRef::Id(id) => write!(f, "{id}"),
            EntityRef::TempId(t) => write!(f, "{t:?}"),
            EntityRef::Ident(k) => write!(f, "{k}"),
            EntityRef::Lookup(a, v) => write!(f, "[{a} {v}]"),
        }
    }
}

/// Map form of an assertion: every attribute/value pair is asserted about
/// one entity, in insertion order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EntityMap {
    pub id: Option<EntityRef>,
    pub attrs: Vec<(Keyword, Value)>,
}

impl EntityMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `:db/id`
    pub fn id(mut self, id: impl Into<EntityRef>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Add an attribute/value pair
    pub fn attr(mut self, attribute: impl Into<Keyword>, value: impl Into<Value>) -> Self {
        self.attrs.push((attribute.into(), value.into()));
        self
    }

    /// Value given for an attribute, if any
    pub fn get(&self, attribute: &Keyword) -> Option<&Value> {
        self.attrs
            .iter()
            .find(|(a, _)| a == attribute)
            .map(|(_, v)| v)
    }
}

/// One transaction statement.
///
/// In ref position a `Value::String` names a temp id and a `Value::Keyword`
/// names an ident.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// `{:db/id e :a v ...}`
    Map(EntityMap),
    /// `[:db/add e a v]`
    Add { e: EntityRef, a: Keyword, v: Value },
    /// `[:db/retract e a v]`
    Retract { e: EntityRef, a: Keyword, v: Value },
    /// `[:db/retractEntity e]`
    RetractEntity(EntityRef),
}

impl Statement {
    /// Start an entity map
    pub fn entity() -> EntityMap {
        EntityMap::new()
    }

    pub fn add(e: impl Into<EntityRef>, a: impl Into<Keyword>, v: impl Into<Value>) -> Self {
        Statement::Add {
            e: e.into(),
            a: a.into(),
            v: v.into(),
        }
    }

    pub fn retract(e: impl Into<EntityRef>, a: impl Into<Keyword>, v: impl Into<Value>) -> Self {
        Statement::Retract {
            e: e.into(),
            a: a.into(),
            v: v.into(),
        }
    }

    pub fn retract_entity(e: impl Into<EntityRef>) -> Self {
        Statement::RetractEntity(e.into())
    }
}

impl From<EntityMap> for Statement {
    fn from(map: EntityMap) -> Self {
        Statement::Map(map)
    }
}
