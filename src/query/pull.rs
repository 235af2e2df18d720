//! Pull patterns and their evaluation against a database state

use crate::core::datom::{Datom, EntityId};
use crate::core::schema::{Attribute, Cardinality, Schema};
use crate::core::value::{Keyword, Value};
use crate::core::view::ViewFilter;
use crate::error::Result;
use crate::index::{IndexOrder, KeyPart, KeyPrefix, Page};
use crate::query::parser::parse_pattern;
use crate::storage::DbState;
use serde::Serialize;
use std::collections::BTreeMap;
use std::str::FromStr;

/// Nested joins deeper than this come back as bare `{:db/id ..}` maps
pub const MAX_DEPTH: usize = 8;

/// One element of a pull pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullAttr {
    /// `*`: every attribute of the entity
    Wildcard,
    /// A forward attribute, or a reverse one spelled `:ns/_name`
    Attr(Keyword),
    /// `{:ref [...]}`: follow a reference with a nested pattern
    Join(Keyword, PullPattern),
}

/// Declarative shape of a pull result
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PullPattern {
    pub attrs: Vec<PullAttr>,
}

impl PullPattern {
    /// `[*]`
    pub fn wildcard() -> Self {
        Self {
            attrs: vec![PullAttr::Wildcard],
        }
    }

    /// Plain attribute list
    pub fn of<I, K>(attrs: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<Keyword>,
    {
        Self {
            attrs: attrs
                .into_iter()
                .map(|k| PullAttr::Attr(k.into()))
                .collect(),
        }
    }

    /// Add a join
    pub fn join(mut self, attr: impl Into<Keyword>, pattern: PullPattern) -> Self {
        self.attrs.push(PullAttr::Join(attr.into(), pattern));
        self
    }
}

impl FromStr for PullPattern {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self> {
        parse_pattern(s)
    }
}

/// Value in a pull result
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum PullValue {
    Scalar(Value),
    Many(Vec<PullValue>),
    Entity(PullMap),
}

/// Attribute map returned by pull
pub type PullMap = BTreeMap<Keyword, PullValue>;

fn db_id() -> Keyword {
    Keyword::new("db/id")
}

/// Reverse attribute named by `:ns/_name`
fn reverse_of(k: &Keyword) -> Option<Keyword> {
    let name = k.name().strip_prefix('_')?;
    let ns = k.namespace()?;
    Some(Keyword::new(&format!("{ns}/{name}")))
}

/// Evaluates pull patterns over the visible datoms of one view
pub struct Puller<'s> {
    state: &'s DbState,
    filter: ViewFilter,
    basis_t: u64,
    /// Window applied to cardinality-many values
    page: Page,
}

impl<'s> Puller<'s> {
    pub fn new(state: &'s DbState, filter: ViewFilter, basis_t: u64, page: Page) -> Self {
        Self {
            state,
            filter,
            basis_t,
            page,
        }
    }

    fn schema(&self) -> &'s Schema {
        let state: &'s DbState = self.state;
        state.schema()
    }

    /// Pull `pattern` for entity `e`; an entity with no visible facts
    /// yields an empty map
    pub fn pull(&self, e: EntityId, pattern: &PullPattern) -> PullMap {
        self.pull_at(e, pattern, 0)
    }

    fn pull_at(&self, e: EntityId, pattern: &PullPattern, depth: usize) -> PullMap {
        let facts = self.facts(e);
        let mut out = PullMap::new();
        for attr in &pattern.attrs {
            match attr {
                PullAttr::Wildcard => {
                    out.insert(db_id(), PullValue::Scalar(Value::Long(e.as_u64() as i64)));
                    for (ident, values) in self.group(&facts) {
                        if let Some(v) = self.shape(&ident, values, None, depth) {
                            out.entry(ident).or_insert(v);
                        }
                    }
                }
                PullAttr::Attr(k) if *k == db_id() => {
                    out.insert(db_id(), PullValue::Scalar(Value::Long(e.as_u64() as i64)));
                }
                PullAttr::Attr(k) => {
                    if let Some(v) = self.lookup(e, &facts, k, None, depth) {
                        out.insert(k.clone(), v);
                    }
                }
                PullAttr::Join(k, sub) => {
                    if let Some(v) = self.lookup(e, &facts, k, Some(sub), depth) {
                        out.insert(k.clone(), v);
                    }
                }
            }
        }
        out
    }

    /// Visible facts about `e`, EAVT ordered
    fn facts(&self, e: EntityId) -> Vec<&'s Datom> {
        let state: &'s DbState = self.state;
        let prefix = KeyPrefix::from_parts(IndexOrder::Eavt, vec![KeyPart::Entity(e)]);
        self.filter
            .visible(self.basis_t, state.scan(&prefix).iter())
            .collect()
    }

    fn group(&self, facts: &[&'s Datom]) -> Vec<(Keyword, Vec<Value>)> {
        let mut grouped: Vec<(Keyword, Vec<Value>)> = Vec::new();
        for datom in facts {
            let Some(ident) = self.schema().ident_of(datom.a) else {
                continue;
            };
            match grouped.last_mut() {
                Some((k, values)) if k == ident => values.push(datom.v.clone()),
                _ => grouped.push((ident.clone(), vec![datom.v.clone()])),
            }
        }
        grouped
    }

    fn lookup(
        &self,
        e: EntityId,
        facts: &[&'s Datom],
        k: &Keyword,
        sub: Option<&PullPattern>,
        depth: usize,
    ) -> Option<PullValue> {
        if let Some(forward) = reverse_of(k) {
            let attr = self.schema().attribute_by_ident(&forward)?;
            let state: &'s DbState = self.state;
            let prefix = KeyPrefix::from_parts(
                IndexOrder::Vaet,
                vec![KeyPart::Value(Value::Ref(e)), KeyPart::Attribute(attr.id)],
            );
            let sources: Vec<Value> = self
                .filter
                .visible(self.basis_t, state.scan(&prefix).iter())
                .map(|d| Value::Ref(d.e))
                .collect();
            if sources.is_empty() {
                return None;
            }
            let refs = self.page.apply(sources.into_iter()).map(|v| self.reference(&v, sub, depth));
            return Some(PullValue::Many(refs.collect()));
        }

        let attr = self.schema().attribute_by_ident(k)?;
        let values: Vec<Value> = facts
            .iter()
            .filter(|d| d.a == attr.id)
            .map(|d| d.v.clone())
            .collect();
        if values.is_empty() {
            return None;
        }
        self.shape_attr(attr, values, sub, depth)
    }

    fn shape(
        &self,
        ident: &Keyword,
        values: Vec<Value>,
        sub: Option<&PullPattern>,
        depth: usize,
    ) -> Option<PullValue> {
        let attr = self.schema().attribute_by_ident(ident)?;
        self.shape_attr(attr, values, sub, depth)
    }

    fn shape_attr(
        &self,
        attr: &Attribute,
        values: Vec<Value>,
        sub: Option<&PullPattern>,
        depth: usize,
    ) -> Option<PullValue> {
        let single = |v: Value| {
            if attr.is_ref() {
                self.reference(&v, sub, depth)
            } else {
                PullValue::Scalar(v)
            }
        };
        match attr.cardinality {
            Cardinality::One => values.into_iter().next_back().map(single),
            Cardinality::Many => Some(PullValue::Many(
                self.page.apply(values.into_iter()).map(single).collect(),
            )),
        }
    }

    fn reference(&self, v: &Value, sub: Option<&PullPattern>, depth: usize) -> PullValue {
        let Some(target) = v.as_entity() else {
            return PullValue::Scalar(v.clone());
        };
        match sub {
            Some(pattern) if depth < MAX_DEPTH => {
                PullValue::Entity(self.pull_at(target, pattern, depth + 1))
            }
            _ => PullValue::Entity(PullMap::from([(
                db_id(),
                PullValue::Scalar(Value::Long(target.as_u64() as i64)),
            )])),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::{AttributeSpec, Unique};
    use crate::core::statement::{EntityMap, Statement};
    use crate::core::value::ValueType;
    use crate::index::Limit;
    use crate::storage::transactor;

    fn films() -> (DbState, EntityId) {
        let (state, _) = DbState::genesis();
        let schema: Vec<Statement> = vec![
            AttributeSpec::new(":movie/title", ValueType::String, Cardinality::One)
                .unique(Unique::Identity)
                .into(),
            AttributeSpec::new(":movie/cast", ValueType::String, Cardinality::Many).into(),
            AttributeSpec::new(":movie/sequel", ValueType::Ref, Cardinality::One).into(),
        ];
        let state = transactor::apply(&state, &schema).unwrap().state;
        let applied = transactor::apply(
            &state,
            &[
                EntityMap::new()
                    .id("first")
                    .attr(":movie/title", "Commando")
                    .attr(":movie/cast", "Arnold")
                    .attr(":movie/cast", "Rae Dawn")
                    .into(),
                EntityMap::new()
                    .id("second")
                    .attr(":movie/title", "Commando 2")
                    .attr(":movie/sequel", "first")
                    .into(),
            ],
        )
        .unwrap();
        let first = applied.temp_ids["first"];
        (applied.state, first)
    }

    fn puller(state: &DbState, page: Page) -> Puller<'_> {
        Puller::new(state, ViewFilter::default(), state.basis().t, page)
    }

    #[test]
    fn test_pull_named_attributes() {
        let (state, e) = films();
        let result = puller(&state, Page::all()).pull(e, &PullPattern::of([":movie/title", ":db/id"]));
        assert_eq!(
            result.get(&Keyword::new("movie/title")),
            Some(&PullValue::Scalar(Value::from("Commando")))
        );
        assert_eq!(
            result.get(&Keyword::new("db/id")),
            Some(&PullValue::Scalar(Value::Long(e.as_u64() as i64)))
        );
        assert!(!result.contains_key(&Keyword::new("movie/cast")));
    }

    #[test]
    fn test_pull_reverse_join() {
        let (state, e) = films();
        let pattern: PullPattern = "[{:movie/_sequel [:movie/title]}]".parse().unwrap();
        let result = puller(&state, Page::all()).pull(e, &pattern);
        let sequels = &result[&Keyword::new("movie/_sequel")];
        let PullValue::Many(items) = sequels else {
            panic!("expected many, got {sequels:?}");
        };
        assert_eq!(
            items,
            &vec![PullValue::Entity(PullMap::from([(
                Keyword::new("movie/title"),
                PullValue::Scalar(Value::from("Commando 2"))
            )]))]
        );
    }

    #[test]
    fn test_pull_pages_many_values() {
        let (state, e) = films();
        let pattern = PullPattern::of([":movie/cast"]);
        let result = puller(&state, Page::new(1, Limit::At(1))).pull(e, &pattern);
        assert_eq!(
            result[&Keyword::new("movie/cast")],
            PullValue::Many(vec![PullValue::Scalar(Value::from("Rae Dawn"))])
        );
    }

    #[test]
    fn test_wildcard_includes_id_and_refs() {
        let (state, e) = films();
        let sequel = state.entity_with(
            state.schema().resolve_ident(&Keyword::new("movie/title")).unwrap(),
            &Value::from("Commando 2"),
        )
        .unwrap();
        let result = puller(&state, Page::all()).pull(sequel, &PullPattern::wildcard());
        assert_eq!(
            result[&Keyword::new("movie/sequel")],
            PullValue::Entity(PullMap::from([(
                Keyword::new("db/id"),
                PullValue::Scalar(Value::Long(e.as_u64() as i64))
            )]))
        );
        assert!(result.contains_key(&Keyword::new("db/id")));
    }
}
