//! Transaction journal: append-only log of committed transactions

use crate::core::datom::{Datom, EntityId};
use crate::core::temporal::{TRange, TxInstant};
use crate::error::{Anomaly, AnomalyCategory, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

/// One committed transaction
#[derive(Debug, Clone, PartialEq)]
pub struct TxRecord {
    pub t: u64,
    pub tx: EntityId,
    pub instant: TxInstant,
    /// Datoms in transaction order; the tx-instant datom comes first
    pub datoms: Vec<Datom>,
}

/// Trait for transaction journal implementations
#[async_trait]
pub trait TxJournal: Send + Sync {
    /// Append a transaction; `t` must exceed every journaled `t`
    async fn append(&self, record: TxRecord) -> Result<()>;

    /// Transactions whose `t` falls in `range`, ascending
    async fn range(&self, range: TRange) -> Result<Vec<Arc<TxRecord>>>;
}

/// In-memory implementation of the transaction journal
#[derive(Default)]
pub struct InMemoryJournal {
    records: RwLock<Vec<Arc<TxRecord>>>,
}

impl InMemoryJournal {
    /// Create a new in-memory journal
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TxJournal for InMemoryJournal {
    async fn append(&self, record: TxRecord) -> Result<()> {
        let mut records = self.records.write().await;
        if let Some(last) = records.last() {
            if record.t <= last.t {
                return Err(Anomaly::new(
                    AnomalyCategory::Conflict,
                    format!("Transaction t {} does not follow t {}", record.t, last.t),
                )
                .into());
            }
        }
        records.push(Arc::new(record));
        Ok(())
    }

    async fn range(&self, range: TRange) -> Result<Vec<Arc<TxRecord>>> {
        if range.is_empty() {
            return Ok(Vec::new());
        }
        let records = self.records.read().await;
        let lo = range
            .start
            .map(|s| records.partition_point(|r| r.t < s))
            .unwrap_or(0);
        Ok(records[lo..]
            .iter()
            .take_while(|r| range.contains(r.t))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::{epoch, ids};
    use crate::error::Error;

    fn record(t: u64) -> TxRecord {
        let tx = EntityId::from_t(t);
        TxRecord {
            t,
            tx,
            instant: epoch(),
            datoms: vec![Datom::new(tx, ids::TX_INSTANT, epoch(), tx, true)],
        }
    }

    #[tokio::test]
    async fn test_range_is_half_open() {
        let journal = InMemoryJournal::new();
        for t in 0..6 {
            journal.append(record(t)).await.unwrap();
        }

        let ts = |records: Vec<Arc<TxRecord>>| records.iter().map(|r| r.t).collect::<Vec<_>>();
        assert_eq!(ts(journal.range(TRange::new(Some(2), Some(4))).await.unwrap()), vec![2, 3]);
        assert_eq!(ts(journal.range(TRange::new(Some(4), None)).await.unwrap()), vec![4, 5]);
        assert!(journal.range(TRange::new(Some(4), Some(4))).await.unwrap().is_empty());
        assert_eq!(journal.range(TRange::default()).await.unwrap().len(), 6);
    }

    #[tokio::test]
    async fn test_append_rejects_stale_t() {
        let journal = InMemoryJournal::new();
        journal.append(record(1)).await.unwrap();
        let err = journal.append(record(1)).await.unwrap_err();
        assert!(matches!(err, Error::Remote(_)));

        let ts: Vec<u64> = journal
            .range(TRange::default())
            .await
            .unwrap()
            .iter()
            .map(|r| r.t)
            .collect();
        assert_eq!(ts, vec![1]);
    }
}
