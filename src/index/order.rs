//! The four canonical sort orders and key-prefix matching

use crate::core::datom::{Datom, EntityId};
use crate::core::schema::{Attribute, Schema};
use crate::core::temporal::TimePoint;
use crate::core::value::{Value, ValueType};
use crate::error::{Anomaly, AnomalyCategory, Error, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Index sort order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexOrder {
    /// entity, attribute, value, tx: all facts about an entity
    Eavt,
    /// attribute, entity, value, tx: all facts for an attribute
    Aevt,
    /// attribute, value, entity, tx: lookup by value
    Avet,
    /// value, attribute, entity, tx: reverse references
    Vaet,
}

/// Datom field occupying one key position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Entity,
    Attribute,
    Value,
    Tx,
}

impl IndexOrder {
    pub const ALL: [IndexOrder; 4] = [
        IndexOrder::Eavt,
        IndexOrder::Aevt,
        IndexOrder::Avet,
        IndexOrder::Vaet,
    ];

    /// Key roles, most significant first
    pub fn roles(&self) -> [Role; 4] {
        use Role::*;
        match self {
            IndexOrder::Eavt => [Entity, Attribute, Value, Tx],
            IndexOrder::Aevt => [Attribute, Entity, Value, Tx],
            IndexOrder::Avet => [Attribute, Value, Entity, Tx],
            IndexOrder::Vaet => [Value, Attribute, Entity, Tx],
        }
    }

    /// Slot of this order in per-index arrays
    pub fn slot(&self) -> usize {
        match self {
            IndexOrder::Eavt => 0,
            IndexOrder::Aevt => 1,
            IndexOrder::Avet => 2,
            IndexOrder::Vaet => 3,
        }
    }

    pub fn keyword(&self) -> &'static str {
        match self {
            IndexOrder::Eavt => ":eavt",
            IndexOrder::Aevt => ":aevt",
            IndexOrder::Avet => ":avet",
            IndexOrder::Vaet => ":vaet",
        }
    }

    /// Total order over datoms; ties on the four key roles break on the
    /// assertion flag
    pub fn compare(&self, a: &Datom, b: &Datom) -> Ordering {
        self.roles()
            .iter()
            .map(|role| compare_role(*role, a, b))
            .find(|o| *o != Ordering::Equal)
            .unwrap_or_else(|| a.added.cmp(&b.added))
    }

    /// Whether a datom belongs in this index at all
    pub fn admits(&self, datom: &Datom) -> bool {
        match self {
            IndexOrder::Vaet => matches!(datom.v, Value::Ref(_)),
            _ => true,
        }
    }
}

impl fmt::Display for IndexOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

impl FromStr for IndexOrder {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim_start_matches(':').to_ascii_lowercase().as_str() {
            "eavt" => Ok(IndexOrder::Eavt),
            "aevt" => Ok(IndexOrder::Aevt),
            "avet" => Ok(IndexOrder::Avet),
            "vaet" => Ok(IndexOrder::Vaet),
            other => Err(Error::InvalidArgument(format!("Unknown index: {other}"))),
        }
    }
}

fn compare_role(role: Role, a: &Datom, b: &Datom) -> Ordering {
    match role {
        Role::Entity => a.e.cmp(&b.e),
        Role::Attribute => a.a.cmp(&b.a),
        Role::Value => a.v.cmp(&b.v),
        Role::Tx => a.tx.cmp(&b.tx),
    }
}

/// A key component resolved to ids
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyPart {
    Entity(EntityId),
    Attribute(EntityId),
    Value(Value),
    Tx(EntityId),
}

impl KeyPart {
    pub fn role(&self) -> Role {
        match self {
            KeyPart::Entity(_) => Role::Entity,
            KeyPart::Attribute(_) => Role::Attribute,
            KeyPart::Value(_) => Role::Value,
            KeyPart::Tx(_) => Role::Tx,
        }
    }

    /// Compare the datom's field against this part
    fn compare_datom(&self, datom: &Datom) -> Ordering {
        match self {
            KeyPart::Entity(e) => datom.e.cmp(e),
            KeyPart::Attribute(a) => datom.a.cmp(a),
            KeyPart::Value(v) => datom.v.cmp(v),
            KeyPart::Tx(tx) => datom.tx.cmp(tx),
        }
    }
}

/// Ordered key prefix of one index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPrefix {
    order: IndexOrder,
    parts: Vec<KeyPart>,
}

impl KeyPrefix {
    /// Create a prefix; each part must fill the role of its position
    pub fn new(order: IndexOrder, parts: Vec<KeyPart>) -> Result<Self> {
        if parts.len() > 4 {
            return Err(Error::InvalidArgument(format!(
                "{order} takes at most 4 components, got {}",
                parts.len()
            )));
        }
        for (part, role) in parts.iter().zip(order.roles()) {
            if part.role() != role {
                return Err(Error::InvalidArgument(format!(
                    "{order} expects {role:?} at this position, got {part:?}"
                )));
            }
        }
        Ok(Self { order, parts })
    }

    /// Prefix from parts already known to fill the order's roles
    pub(crate) fn from_parts(order: IndexOrder, parts: Vec<KeyPart>) -> Self {
        debug_assert!(parts.iter().zip(order.roles()).all(|(p, r)| p.role() == r));
        Self { order, parts }
    }

    pub fn order(&self) -> IndexOrder {
        self.order
    }

    pub fn parts(&self) -> &[KeyPart] {
        &self.parts
    }

    /// Attribute fixed by this prefix, if any
    pub fn attribute(&self) -> Option<EntityId> {
        self.parts.iter().find_map(|p| match p {
            KeyPart::Attribute(a) => Some(*a),
            _ => None,
        })
    }

    /// Compare a datom's key against the prefix; `Equal` means it matches
    pub fn compare_datom(&self, datom: &Datom) -> Ordering {
        self.parts
            .iter()
            .map(|part| part.compare_datom(datom))
            .find(|o| *o != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    }

    /// The run of `sorted` (ordered by this prefix's index) matching the prefix
    pub fn slice<'a>(&self, sorted: &'a [Datom]) -> &'a [Datom] {
        let lo = sorted.partition_point(|d| self.compare_datom(d) == Ordering::Less);
        let len = sorted[lo..].partition_point(|d| self.compare_datom(d) == Ordering::Equal);
        &sorted[lo..lo + len]
    }

    /// Resolve raw components against a schema.
    ///
    /// Attributes may be given by ident or id, entities by id or ident, and
    /// tx positions by `t` or tx id. AVET requires a value index on the
    /// attribute when `require_value_index` is set; VAET holds reference
    /// values only.
    pub fn resolve(
        order: IndexOrder,
        components: &[Value],
        schema: &Schema,
        require_value_index: bool,
    ) -> Result<Self> {
        let mut parts = Vec::with_capacity(components.len());
        let mut attribute: Option<&Attribute> = None;

        for (raw, role) in components.iter().zip(order.roles()) {
            let part = match role {
                Role::Entity => KeyPart::Entity(resolve_entity(raw, schema)?),
                Role::Attribute => {
                    let attr = schema.attribute_for(raw).ok_or_else(|| unresolved(raw))?;
                    check_index(order, attr, require_value_index)?;
                    attribute = Some(attr);
                    KeyPart::Attribute(attr.id)
                }
                Role::Value => {
                    let as_ref = order == IndexOrder::Vaet
                        || attribute.map(|a| a.is_ref()).unwrap_or(false);
                    KeyPart::Value(coerce_component(raw, as_ref, order, schema)?)
                }
                Role::Tx => KeyPart::Tx(resolve_tx(raw)?),
            };
            parts.push(part);
        }
        if components.len() > 4 {
            return Err(Error::InvalidArgument(format!(
                "{order} takes at most 4 components, got {}",
                components.len()
            )));
        }
        Self::new(order, parts)
    }
}

/// AVET needs a value index, VAET a reference attribute
pub fn check_index(order: IndexOrder, attr: &Attribute, require_value_index: bool) -> Result<()> {
    match order {
        IndexOrder::Avet if require_value_index && !attr.has_value_index() => {
            Err(Error::UnsupportedIndex(format!(
                "{} is not indexed; AVET requires :db/index or :db/unique",
                attr.ident
            )))
        }
        IndexOrder::Vaet if !attr.is_ref() => Err(Error::UnsupportedIndex(format!(
            "{} is not a reference attribute; VAET holds :db.type/ref values only",
            attr.ident
        ))),
        _ => Ok(()),
    }
}

fn unresolved(raw: &Value) -> Error {
    Anomaly::new(
        AnomalyCategory::Incorrect,
        format!("Unable to resolve entity: {raw}"),
    )
    .into()
}

fn resolve_entity(raw: &Value, schema: &Schema) -> Result<EntityId> {
    match raw {
        Value::Keyword(k) => schema.resolve_ident(k).ok_or_else(|| unresolved(raw)),
        other => other.as_entity().ok_or_else(|| {
            Error::InvalidArgument(format!("{other} cannot be used as an entity id"))
        }),
    }
}

fn coerce_component(raw: &Value, as_ref: bool, order: IndexOrder, schema: &Schema) -> Result<Value> {
    if !as_ref {
        return Ok(raw.clone());
    }
    let target = match raw {
        Value::Keyword(k) => schema.resolve_ident(k),
        other => other.as_entity(),
    };
    match target {
        Some(e) => Ok(Value::Ref(e)),
        None if order == IndexOrder::Vaet => Err(Error::UnsupportedIndex(format!(
            "{raw} is not a reference value; VAET holds :db.type/ref values only"
        ))),
        None => Err(Error::InvalidArgument(format!(
            "{raw} is not a valid {}",
            ValueType::Ref.ident()
        ))),
    }
}

fn resolve_tx(raw: &Value) -> Result<EntityId> {
    let point = match raw {
        Value::Long(n) if *n >= 0 => TimePoint::from(*n as u64),
        Value::Ref(e) => TimePoint::Tx(*e),
        other => {
            return Err(Error::InvalidArgument(format!(
                "{other} is not a t or tx id"
            )))
        }
    };
    match point {
        TimePoint::T(t) => Ok(EntityId::from_t(t)),
        TimePoint::Tx(tx) => Ok(tx),
        TimePoint::Instant(_) => Err(Error::InvalidArgument(
            "tx components must be a t or tx id, not an instant".to_string(),
        )),
    }
}
