//! Scan paging and value-range bounds

use crate::core::value::Value;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Cap on the number of results of a scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Limit {
    /// Explicit opt-in to every match (`-1`)
    Unbounded,
    At(usize),
}

impl Limit {
    /// Parse the wire form: `-1` is unbounded, `0` and other negatives are
    /// rejected
    pub fn from_raw(raw: i64) -> Result<Self> {
        match raw {
            -1 => Ok(Limit::Unbounded),
            0 => Err(Error::limit_zero()),
            n if n < 0 => Err(Error::InvalidArgument(format!(
                "limit must be positive or -1, got {n}"
            ))),
            n => Ok(Limit::At(n as usize)),
        }
    }

    fn cap(&self) -> usize {
        match self {
            Limit::Unbounded => usize::MAX,
            Limit::At(n) => *n,
        }
    }
}

/// Offset and limit applied after filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub offset: usize,
    pub limit: Limit,
}

impl Page {
    pub fn new(offset: usize, limit: Limit) -> Self {
        Self { offset, limit }
    }

    /// Every match
    pub fn all() -> Self {
        Self::new(0, Limit::Unbounded)
    }

    /// Window over an already filtered iterator
    pub fn apply<I: Iterator>(&self, items: I) -> std::iter::Take<std::iter::Skip<I>> {
        items.skip(self.offset).take(self.limit.cap())
    }
}

/// Value bounds of an AVET range: start inclusive, end exclusive, `None`
/// unbounded
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ValueRange {
    pub start: Option<Value>,
    pub end: Option<Value>,
}

impl ValueRange {
    pub fn new(start: Option<Value>, end: Option<Value>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, value: &Value) -> bool {
        self.start.as_ref().map_or(true, |s| value >= s)
            && self.end.as_ref().map_or(true, |e| value < e)
    }
}
