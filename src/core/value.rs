//! Keywords, polymorphic datom values and value types

use crate::core::datom::EntityId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Namespaced keyword such as `:movie/title`. Stored without the colon,
/// serialized with it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Keyword(String);

impl Keyword {
    /// Create a keyword; a leading `:` is optional
    pub fn new(name: &str) -> Self {
        Self(name.strip_prefix(':').unwrap_or(name).to_string())
    }

    /// Namespace part (`movie` in `:movie/title`)
    pub fn namespace(&self) -> Option<&str> {
        self.0.split_once('/').map(|(ns, _)| ns)
    }

    /// Name part (`title` in `:movie/title`)
    pub fn name(&self) -> &str {
        self.0.split_once('/').map(|(_, n)| n).unwrap_or(&self.0)
    }

    /// Name without the colon
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Keyword {
    fn from(s: &str) -> Self {
        Keyword::new(s)
    }
}

impl From<&Keyword> for Keyword {
    fn from(k: &Keyword) -> Self {
        k.clone()
    }
}

impl fmt::Display for Keyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ":{}", self.0)
    }
}

impl Serialize for Keyword {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Keyword {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Keyword::new(&raw))
    }
}

/// Datom value. Values of one type sort in their natural order; strings
/// compare by code point, so uppercase sorts before lowercase.
///
/// Booleans, longs and strings serialize as plain JSON scalars. Keywords,
/// instants and refs are wrapped in a one-key object (`{"keyword":
/// ":movie/title"}`, `{"ref": 17592186045418}`) so they read back as the
/// same variant.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "WireValue", from = "WireValue")]
pub enum Value {
    Boolean(bool),
    Long(i64),
    String(String),
    Keyword(Keyword),
    Instant(DateTime<Utc>),
    Ref(EntityId),
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum WireValue {
    Boolean(bool),
    Long(i64),
    String(String),
    Tagged(TaggedValue),
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum TaggedValue {
    Keyword(Keyword),
    Instant(DateTime<Utc>),
    Ref(EntityId),
}

impl From<Value> for WireValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Boolean(b) => WireValue::Boolean(b),
            Value::Long(n) => WireValue::Long(n),
            Value::String(s) => WireValue::String(s),
            Value::Keyword(k) => WireValue::Tagged(TaggedValue::Keyword(k)),
            Value::Instant(i) => WireValue::Tagged(TaggedValue::Instant(i)),
            Value::Ref(e) => WireValue::Tagged(TaggedValue::Ref(e)),
        }
    }
}

impl From<WireValue> for Value {
    fn from(wire: WireValue) -> Self {
        match wire {
            WireValue::Boolean(b) => Value::Boolean(b),
            WireValue::Long(n) => Value::Long(n),
            WireValue::String(s) => Value::String(s),
            WireValue::Tagged(TaggedValue::Keyword(k)) => Value::Keyword(k),
            WireValue::Tagged(TaggedValue::Instant(i)) => Value::Instant(i),
            WireValue::Tagged(TaggedValue::Ref(e)) => Value::Ref(e),
        }
    }
}

impl Value {
    /// Type of this value
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Boolean(_) => ValueType::Boolean,
            Value::Long(_) => ValueType::Long,
            Value::String(_) => ValueType::String,
            Value::Keyword(_) => ValueType::Keyword,
            Value::Instant(_) => ValueType::Instant,
            Value::Ref(_) => ValueType::Ref,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_long(&self) -> Option<i64> {
        match self {
            Value::Long(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_keyword(&self) -> Option<&Keyword> {
        match self {
            Value::Keyword(k) => Some(k),
            _ => None,
        }
    }

    pub fn as_instant(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Instant(i) => Some(*i),
            _ => None,
        }
    }

    /// Entity id carried by a ref, or by a non-negative long used as an id
    pub fn as_entity(&self) -> Option<EntityId> {
        match self {
            Value::Ref(e) => Some(*e),
            Value::Long(n) if *n >= 0 => Some(EntityId(*n as u64)),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Long(n) => write!(f, "{n}"),
            Value::String(s) => write!(f, "{s:?}"),
            Value::Keyword(k) => write!(f, "{k}"),
            Value::Instant(i) => write!(f, "#inst \"{}\"", i.to_rfc3339()),
            Value::Ref(e) => write!(f, "{e}"),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Long(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Long(n as i64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<Keyword> for Value {
    fn from(k: Keyword) -> Self {
        Value::Keyword(k)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(i: DateTime<Utc>) -> Self {
        Value::Instant(i)
    }
}

impl From<EntityId> for Value {
    fn from(e: EntityId) -> Self {
        Value::Ref(e)
    }
}

/// Attribute value type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ValueType {
    Ref,
    Keyword,
    Long,
    String,
    Boolean,
    Instant,
}

impl ValueType {
    pub const ALL: [ValueType; 6] = [
        ValueType::Ref,
        ValueType::Keyword,
        ValueType::Long,
        ValueType::String,
        ValueType::Boolean,
        ValueType::Instant,
    ];

    /// Ident of the type entity, e.g. `:db.type/string`
    pub fn ident(&self) -> Keyword {
        Keyword::new(match self {
            ValueType::Ref => "db.type/ref",
            ValueType::Keyword => "db.type/keyword",
            ValueType::Long => "db.type/long",
            ValueType::String => "db.type/string",
            ValueType::Boolean => "db.type/boolean",
            ValueType::Instant => "db.type/instant",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_parts() {
        let k = Keyword::new(":movie/title");
        assert_eq!(k, Keyword::from("movie/title"));
        assert_eq!(k.namespace(), Some("movie"));
        assert_eq!(k.name(), "title");
        assert_eq!(k.to_string(), ":movie/title");
    }

    #[test]
    fn test_strings_sort_by_code_point() {
        let mut titles: Vec<Value> = vec!["c".into(), "The Goonies".into(), "Commando".into()];
        titles.sort();
        assert_eq!(
            titles,
            vec![
                Value::from("Commando"),
                Value::from("The Goonies"),
                Value::from("c")
            ]
        );
    }

    #[test]
    fn test_json_keeps_variants_apart() {
        let instant = "2026-03-01T12:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let values = vec![
            Value::from("movie/title"),
            Value::from(Keyword::new("movie/title")),
            Value::Long(17592186045418),
            Value::Ref(EntityId(17592186045418)),
            Value::from(instant),
            Value::from(true),
        ];
        let json = serde_json::to_value(&values).unwrap();
        assert_eq!(
            json,
            serde_json::json!([
                "movie/title",
                {"keyword": ":movie/title"},
                17592186045418i64,
                {"ref": 17592186045418u64},
                {"instant": "2026-03-01T12:00:00Z"},
                true,
            ])
        );
        let back: Vec<Value> = serde_json::from_value(json).unwrap();
        assert_eq!(back, values);

        let bare: Value = serde_json::from_value(serde_json::json!({"keyword": "db/ident"})).unwrap();
        assert_eq!(bare, Value::Keyword(Keyword::new(":db/ident")));
    }

    #[test]
    fn test_long_reads_as_entity() {
        assert_eq!(Value::Long(42).as_entity(), Some(EntityId(42)));
        assert_eq!(Value::Long(-1).as_entity(), None);
        assert_eq!(Value::from("x").as_entity(), None);
    }
}
