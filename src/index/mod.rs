//! Index orders, prefix scans and range bounds

pub mod order;
pub mod scan;

pub use order::{IndexOrder, KeyPart, KeyPrefix, Role};
pub use scan::{Limit, Page, ValueRange};
