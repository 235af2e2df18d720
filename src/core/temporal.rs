//! Time points on the database timeline

use crate::core::datom::{EntityId, PART_TX, PARTITION_SHIFT};
use chrono::{DateTime, Duration, DurationRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Wall-clock instant recorded by a transaction
pub type TxInstant = DateTime<Utc>;

/// Smallest raw value interpreted as a transaction id rather than a `t`
pub const TX_ID_FLOOR: u64 = PART_TX << PARTITION_SHIFT;

/// A point in database time, given in any of the three accepted forms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimePoint {
    /// Logical time coordinate
    T(u64),
    /// Transaction entity id
    Tx(EntityId),
    /// Transaction instant
    Instant(TxInstant),
}

impl TimePoint {
    /// The `t` this point denotes, when it can be known without a lookup
    pub fn as_t(&self) -> Option<u64> {
        match self {
            TimePoint::T(t) => Some(*t),
            TimePoint::Tx(tx) => Some(tx.t()),
            TimePoint::Instant(_) => None,
        }
    }
}

/// Raw numbers at or above the tx partition floor are tx ids
impl From<u64> for TimePoint {
    fn from(raw: u64) -> Self {
        if raw >= TX_ID_FLOOR {
            TimePoint::Tx(EntityId(raw))
        } else {
            TimePoint::T(raw)
        }
    }
}

impl From<EntityId> for TimePoint {
    fn from(tx: EntityId) -> Self {
        TimePoint::Tx(tx)
    }
}

impl From<TxInstant> for TimePoint {
    fn from(instant: TxInstant) -> Self {
        TimePoint::Instant(instant)
    }
}

impl fmt::Display for TimePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimePoint::T(t) => write!(f, "t {t}"),
            TimePoint::Tx(tx) => write!(f, "tx {tx}"),
            TimePoint::Instant(i) => write!(f, "{}", i.to_rfc3339()),
        }
    }
}

/// A time point resolved to its canonical `t`, with the instant of the
/// latest transaction at or before it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Basis {
    pub t: u64,
    pub tx_instant: Option<TxInstant>,
}

impl Basis {
    pub fn new(t: u64, tx_instant: Option<TxInstant>) -> Self {
        Self { t, tx_instant }
    }
}

/// Half-open range of `t` values `[start, end)`; `None` is unbounded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TRange {
    pub start: Option<u64>,
    pub end: Option<u64>,
}

impl TRange {
    /// Create a range period
    pub fn new(start: Option<u64>, end: Option<u64>) -> Self {
        Self { start, end }
    }

    /// Check if `t` is within this range
    pub fn contains(&self, t: u64) -> bool {
        self.start.map(|s| t >= s).unwrap_or(true) && self.end.map(|e| t < e).unwrap_or(true)
    }

    /// True when no `t` can satisfy the range
    pub fn is_empty(&self) -> bool {
        matches!((self.start, self.end), (Some(s), Some(e)) if s >= e)
    }
}

/// Truncate an instant to millisecond precision
pub fn to_millis(instant: TxInstant) -> TxInstant {
    instant
        .duration_trunc(Duration::milliseconds(1))
        .unwrap_or(instant)
}

/// Next transaction instant: now, but strictly after `previous`
pub fn next_instant(previous: Option<TxInstant>) -> TxInstant {
    let now = to_millis(Utc::now());
    match previous {
        Some(prev) if now <= prev => prev + Duration::milliseconds(1),
        _ => now,
    }
}
