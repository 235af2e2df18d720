//! Core data types and models

pub mod datom;
pub mod schema;
pub mod statement;
pub mod temporal;
pub mod value;
pub mod view;

pub use datom::*;
pub use schema::{Attribute, AttributeSpec, Cardinality, Schema, Unique};
pub use statement::*;
pub use temporal::*;
pub use value::*;
pub use view::*;
