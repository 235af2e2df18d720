//! Query specs, pull patterns and their parsers
//!
//! Datalog evaluation belongs to the service; this module only carries the
//! query and its inputs across the boundary.

pub mod parser;
pub mod pull;

pub use parser::{parse_pattern, parse_selector, parse_value};
pub use pull::{PullAttr, PullMap, PullPattern, PullValue, Puller};

use crate::core::value::Value;
use crate::core::view::DbRef;
use crate::index::Page;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A query in any of the forms the service accepts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Query {
    /// String-encoded query, e.g. `[:find ?e :where [?e :movie/title]]`
    Text(String),
    /// Structured query data
    Data(serde_json::Value),
}

impl From<&str> for Query {
    fn from(s: &str) -> Self {
        Query::Text(s.to_string())
    }
}

impl From<serde_json::Value> for Query {
    fn from(v: serde_json::Value) -> Self {
        Query::Data(v)
    }
}

/// One positional query input
#[derive(Debug, Clone, PartialEq)]
pub enum QueryInput {
    Db(DbRef),
    Value(Value),
}

/// Query with its inputs and the arg-map options
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub query: Query,
    pub inputs: Vec<QueryInput>,
    pub page: Page,
    pub timeout: Option<Duration>,
}

/// One result tuple
pub type Row = Vec<Value>;
