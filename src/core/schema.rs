//! Attribute definitions and the bootstrap schema

use crate::core::datom::{Datom, EntityId, PART_DB, PART_TX, PART_USER};
use crate::core::statement::{EntityMap, Statement};
use crate::core::temporal::TxInstant;
use crate::core::value::{Keyword, Value, ValueType};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Fixed ids of system entities
pub mod ids {
    use crate::core::datom::EntityId;

    pub const DB_IDENT: EntityId = EntityId(10);
    pub const INSTALL_PARTITION: EntityId = EntityId(11);
    pub const INSTALL_VALUE_TYPE: EntityId = EntityId(12);
    pub const INSTALL_ATTRIBUTE: EntityId = EntityId(13);
    pub const TYPE_REF: EntityId = EntityId(20);
    pub const TYPE_KEYWORD: EntityId = EntityId(21);
    pub const TYPE_LONG: EntityId = EntityId(22);
    pub const TYPE_STRING: EntityId = EntityId(23);
    pub const TYPE_BOOLEAN: EntityId = EntityId(24);
    pub const TYPE_INSTANT: EntityId = EntityId(25);
    pub const CARDINALITY_ONE: EntityId = EntityId(35);
    pub const CARDINALITY_MANY: EntityId = EntityId(36);
    pub const UNIQUE_VALUE: EntityId = EntityId(37);
    pub const UNIQUE_IDENTITY: EntityId = EntityId(38);
    pub const VALUE_TYPE: EntityId = EntityId(40);
    pub const CARDINALITY: EntityId = EntityId(41);
    pub const UNIQUE: EntityId = EntityId(42);
    pub const INDEX: EntityId = EntityId(44);
    pub const TX_INSTANT: EntityId = EntityId(50);
    pub const DOC: EntityId = EntityId(62);

    /// First id handed out to user-installed attributes
    pub const FIRST_USER_ATTRIBUTE: u64 = 72;
    /// First index handed out in the user partition
    pub const FIRST_USER_ENTITY: u64 = 1000;
}

/// Attribute cardinality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cardinality {
    One,
    Many,
}

/// Uniqueness constraint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Unique {
    Value,
    Identity,
}

/// An installed attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub id: EntityId,
    pub ident: Keyword,
    pub value_type: ValueType,
    pub cardinality: Cardinality,
    pub unique: Option<Unique>,
    pub indexed: bool,
    pub doc: Option<String>,
}

impl Attribute {
    /// Whether the attribute has an AVET entry under a backend that only
    /// indexes explicitly indexed or unique attributes
    pub fn has_value_index(&self) -> bool {
        self.indexed || self.unique.is_some()
    }

    pub fn is_ref(&self) -> bool {
        self.value_type == ValueType::Ref
    }
}

/// Builder producing the statement that installs an attribute
#[derive(Debug, Clone)]
pub struct AttributeSpec {
    ident: Keyword,
    value_type: ValueType,
    cardinality: Cardinality,
    unique: Option<Unique>,
    indexed: bool,
    doc: Option<String>,
}

impl AttributeSpec {
    pub fn new(ident: impl Into<Keyword>, value_type: ValueType, cardinality: Cardinality) -> Self {
        Self {
            ident: ident.into(),
            value_type,
            cardinality,
            unique: None,
            indexed: false,
            doc: None,
        }
    }

    pub fn unique(mut self, unique: Unique) -> Self {
        self.unique = Some(unique);
        self
    }

    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    pub fn doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }
}

impl From<AttributeSpec> for Statement {
    fn from(spec: AttributeSpec) -> Self {
        let mut map = EntityMap::new()
            .attr(":db/ident", spec.ident)
            .attr(":db/valueType", spec.value_type.ident())
            .attr(":db/cardinality", cardinality_ident(spec.cardinality));
        if let Some(unique) = spec.unique {
            map = map.attr(":db/unique", unique_ident(unique));
        }
        if spec.indexed {
            map = map.attr(":db/index", true);
        }
        if let Some(doc) = spec.doc {
            map = map.attr(":db/doc", doc);
        }
        Statement::Map(map)
    }
}

fn cardinality_ident(cardinality: Cardinality) -> Keyword {
    match cardinality {
        Cardinality::One => Keyword::new("db.cardinality/one"),
        Cardinality::Many => Keyword::new("db.cardinality/many"),
    }
}

fn unique_ident(unique: Unique) -> Keyword {
    match unique {
        Unique::Value => Keyword::new("db.unique/value"),
        Unique::Identity => Keyword::new("db.unique/identity"),
    }
}

fn value_type_of(id: EntityId) -> Option<ValueType> {
    match id {
        ids::TYPE_REF => Some(ValueType::Ref),
        ids::TYPE_KEYWORD => Some(ValueType::Keyword),
        ids::TYPE_LONG => Some(ValueType::Long),
        ids::TYPE_STRING => Some(ValueType::String),
        ids::TYPE_BOOLEAN => Some(ValueType::Boolean),
        ids::TYPE_INSTANT => Some(ValueType::Instant),
        _ => None,
    }
}

/// Partial attribute assembled from schema datoms
#[derive(Debug, Clone, Default)]
struct Draft {
    value_type: Option<ValueType>,
    cardinality: Option<Cardinality>,
    unique: Option<Unique>,
    indexed: bool,
    doc: Option<String>,
}

/// Idents and installed attributes, derived from schema datoms
#[derive(Debug, Clone, Default)]
pub struct Schema {
    idents: HashMap<Keyword, EntityId>,
    names: HashMap<EntityId, Keyword>,
    drafts: HashMap<EntityId, Draft>,
    attributes: HashMap<EntityId, Attribute>,
}

impl Schema {
    /// Schema and datoms of a freshly created database, asserted in the
    /// transaction at `t = 0`
    pub fn bootstrap(instant: TxInstant) -> (Schema, Vec<Datom>) {
        let tx = EntityId::from_t(0);
        let mut datoms = vec![Datom::new(tx, ids::TX_INSTANT, instant, tx, true)];
        let mut fact = |e: EntityId, a: EntityId, v: Value| {
            datoms.push(Datom::new(e, a, v, tx, true));
        };

        let partitions = [
            (PART_DB, "db.part/db"),
            (PART_TX, "db.part/tx"),
            (PART_USER, "db.part/user"),
        ];
        for (part, ident) in partitions {
            fact(EntityId(part), ids::DB_IDENT, Keyword::new(ident).into());
            fact(EntityId(PART_DB), ids::INSTALL_PARTITION, EntityId(part).into());
        }

        for ty in ValueType::ALL {
            let id = type_id(ty);
            fact(id, ids::DB_IDENT, ty.ident().into());
            fact(EntityId(PART_DB), ids::INSTALL_VALUE_TYPE, id.into());
        }

        let enums = [
            (ids::CARDINALITY_ONE, cardinality_ident(Cardinality::One)),
            (ids::CARDINALITY_MANY, cardinality_ident(Cardinality::Many)),
            (ids::UNIQUE_VALUE, unique_ident(Unique::Value)),
            (ids::UNIQUE_IDENTITY, unique_ident(Unique::Identity)),
        ];
        for (id, ident) in enums {
            fact(id, ids::DB_IDENT, ident.into());
        }

        let system = [
            (ids::DB_IDENT, "db/ident", ValueType::Keyword, Some(Unique::Identity)),
            (ids::INSTALL_PARTITION, "db.install/partition", ValueType::Ref, None),
            (ids::INSTALL_VALUE_TYPE, "db.install/valueType", ValueType::Ref, None),
            (ids::INSTALL_ATTRIBUTE, "db.install/attribute", ValueType::Ref, None),
            (ids::VALUE_TYPE, "db/valueType", ValueType::Ref, None),
            (ids::CARDINALITY, "db/cardinality", ValueType::Ref, None),
            (ids::UNIQUE, "db/unique", ValueType::Ref, None),
            (ids::INDEX, "db/index", ValueType::Boolean, None),
            (ids::TX_INSTANT, "db/txInstant", ValueType::Instant, None),
            (ids::DOC, "db/doc", ValueType::String, None),
        ];
        for (id, ident, ty, unique) in system {
            let many = id == ids::INSTALL_PARTITION
                || id == ids::INSTALL_VALUE_TYPE
                || id == ids::INSTALL_ATTRIBUTE;
            let cardinality = if many { ids::CARDINALITY_MANY } else { ids::CARDINALITY_ONE };
            fact(id, ids::DB_IDENT, Keyword::new(ident).into());
            fact(id, ids::VALUE_TYPE, type_id(ty).into());
            fact(id, ids::CARDINALITY, cardinality.into());
            if let Some(unique) = unique {
                let u = match unique {
                    Unique::Value => ids::UNIQUE_VALUE,
                    Unique::Identity => ids::UNIQUE_IDENTITY,
                };
                fact(id, ids::UNIQUE, u.into());
            }
            fact(EntityId(PART_DB), ids::INSTALL_ATTRIBUTE, id.into());
        }

        let mut schema = Schema::default();
        for datom in &datoms {
            schema.apply(datom);
        }
        (schema, datoms)
    }

    /// Fold one datom into the schema. Retractions of schema facts are
    /// ignored; installed attributes are immutable here.
    pub fn apply(&mut self, datom: &Datom) {
        if !datom.added {
            return;
        }
        match datom.a {
            ids::DB_IDENT => {
                if let Value::Keyword(k) = &datom.v {
                    self.idents.insert(k.clone(), datom.e);
                    self.names.insert(datom.e, k.clone());
                }
            }
            ids::VALUE_TYPE => {
                self.draft(datom.e).value_type = datom.v.as_entity().and_then(value_type_of);
            }
            ids::CARDINALITY => {
                self.draft(datom.e).cardinality = match datom.v.as_entity() {
                    Some(ids::CARDINALITY_MANY) => Some(Cardinality::Many),
                    Some(ids::CARDINALITY_ONE) => Some(Cardinality::One),
                    _ => None,
                };
            }
            ids::UNIQUE => {
                self.draft(datom.e).unique = match datom.v.as_entity() {
                    Some(ids::UNIQUE_VALUE) => Some(Unique::Value),
                    Some(ids::UNIQUE_IDENTITY) => Some(Unique::Identity),
                    _ => None,
                };
            }
            ids::INDEX => {
                self.draft(datom.e).indexed = datom.v.as_bool().unwrap_or(false);
            }
            ids::DOC => {
                if let Some(doc) = datom.v.as_str() {
                    self.draft(datom.e).doc = Some(doc.to_string());
                }
            }
            _ => return,
        }
        self.promote(datom.e);
    }

    fn draft(&mut self, e: EntityId) -> &mut Draft {
        self.drafts.entry(e).or_default()
    }

    fn promote(&mut self, e: EntityId) {
        let (Some(ident), Some(draft)) = (self.names.get(&e), self.drafts.get(&e)) else {
            return;
        };
        if let (Some(value_type), Some(cardinality)) = (draft.value_type, draft.cardinality) {
            self.attributes.insert(
                e,
                Attribute {
                    id: e,
                    ident: ident.clone(),
                    value_type,
                    cardinality,
                    unique: draft.unique,
                    indexed: draft.indexed,
                    doc: draft.doc.clone(),
                },
            );
        }
    }

    /// Entity named by an ident
    pub fn resolve_ident(&self, ident: &Keyword) -> Option<EntityId> {
        self.idents.get(ident).copied()
    }

    /// Ident of an entity, if it has one
    pub fn ident_of(&self, e: EntityId) -> Option<&Keyword> {
        self.names.get(&e)
    }

    /// Installed attribute by id
    pub fn attribute(&self, id: EntityId) -> Option<&Attribute> {
        self.attributes.get(&id)
    }

    /// Installed attribute by ident
    pub fn attribute_by_ident(&self, ident: &Keyword) -> Option<&Attribute> {
        self.resolve_ident(ident).and_then(|id| self.attribute(id))
    }

    /// Installed attribute named by a keyword or an id value
    pub fn attribute_for(&self, value: &Value) -> Option<&Attribute> {
        match value {
            Value::Keyword(k) => self.attribute_by_ident(k),
            other => other.as_entity().and_then(|id| self.attribute(id)),
        }
    }
}

fn type_id(ty: ValueType) -> EntityId {
    match ty {
        ValueType::Ref => ids::TYPE_REF,
        ValueType::Keyword => ids::TYPE_KEYWORD,
        ValueType::Long => ids::TYPE_LONG,
        ValueType::String => ids::TYPE_STRING,
        ValueType::Boolean => ids::TYPE_BOOLEAN,
        ValueType::Instant => ids::TYPE_INSTANT,
    }
}

/// Instant of the bootstrap transaction
pub fn epoch() -> TxInstant {
    DateTime::<Utc>::default()
}
