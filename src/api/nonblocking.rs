//! Non-blocking adapter
//!
//! Operations start immediately on the ambient tokio runtime and return a
//! [`Task`]. Reads may be cancelled without side effects; a transaction,
//! once started, always runs to completion. Streaming results arrive as a
//! [`ChunkStream`] whose producer stops as soon as the consumer cancels it
//! or drops it.

use crate::args::{DatomsArgs, IndexPullArgs, IndexRangeArgs, PullArgs, QueryArgs, TxRangeArgs};
use crate::client::Client;
use crate::connection::Connection;
use crate::core::datom::Datom;
use crate::core::statement::Statement;
use crate::core::temporal::TimePoint;
use crate::db::Db;
use crate::error::{Anomaly, AnomalyCategory, Error, Result};
use crate::query::{PullMap, Row};
use crate::service::{DbStats, TxEntry};
use crate::tx_report::TxReport;
use futures::stream::{BoxStream, Stream, StreamExt};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

fn cancelled() -> Error {
    Error::Interrupted(Anomaly::new(
        AnomalyCategory::Interrupted,
        "operation cancelled",
    ))
}

/// Handle to a spawned operation. Awaiting it yields the operation's result.
pub struct Task<T> {
    handle: JoinHandle<Result<T>>,
    cancel: Option<CancellationToken>,
}

impl<T: Send + 'static> Task<T> {
    /// Run `fut`; [`Task::cancel`] abandons it with [`Error::Interrupted`]
    pub fn cancelable<F>(fut: F) -> Self
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let token = CancellationToken::new();
        let child = token.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = child.cancelled() => Err(cancelled()),
                result = fut => result,
            }
        });
        Self {
            handle,
            cancel: Some(token),
        }
    }

    /// Run `fut` to completion regardless of the caller
    pub fn uncancelable<F>(fut: F) -> Self
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        Self {
            handle: tokio::spawn(fut),
            cancel: None,
        }
    }
}

impl<T> Task<T> {
    pub fn is_cancelable(&self) -> bool {
        self.cancel.is_some()
    }

    /// Request cancellation; false when the task cannot be cancelled
    pub fn cancel(&self) -> bool {
        match &self.cancel {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl<T> Future for Task<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.handle).poll(cx).map(|joined| match joined {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(cancelled()),
            Err(e) => Err(Error::Interrupted(Anomaly::new(
                AnomalyCategory::Fault,
                format!("task failed: {e}"),
            ))),
        })
    }
}

/// Cancelable, lazily produced sequence of result chunks
pub struct ChunkStream<T> {
    chunks: mpsc::Receiver<Result<Vec<T>>>,
    cancel: CancellationToken,
}

impl<T: Send + 'static> ChunkStream<T> {
    /// Drive `source` on a background task, keeping at most `buffer` chunks
    /// ready ahead of the consumer
    pub fn spawn(mut source: BoxStream<'static, Result<Vec<T>>>, buffer: usize) -> Self {
        let (tx, chunks) = mpsc::channel(buffer.max(1));
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        tokio::spawn(async move {
            loop {
                let next = tokio::select! {
                    _ = token.cancelled() => break,
                    next = source.next() => next,
                };
                let Some(chunk) = next else { break };
                tokio::select! {
                    _ = token.cancelled() => break,
                    sent = tx.send(chunk) => if sent.is_err() { break },
                }
            }
            debug!("chunk producer stopped");
        });
        Self { chunks, cancel }
    }
}

impl<T> ChunkStream<T> {
    /// Stop producing; chunks already buffered are discarded
    pub fn cancel(&mut self) {
        self.cancel.cancel();
        self.chunks.close();
    }

    pub async fn next_chunk(&mut self) -> Option<Result<Vec<T>>> {
        self.chunks.recv().await
    }
}

impl<T> Stream for ChunkStream<T> {
    type Item = Result<Vec<T>>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.chunks.poll_recv(cx)
    }
}

impl<T> Drop for ChunkStream<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Non-blocking [`Client`]
#[derive(Debug, Clone)]
pub struct AsyncClient {
    client: Client,
}

impl AsyncClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn create_database(&self, name: &str) -> Task<bool> {
        let client = self.client.clone();
        let name = name.to_string();
        Task::cancelable(async move { client.create_database(&name).await })
    }

    pub fn delete_database(&self, name: &str) -> Task<bool> {
        let client = self.client.clone();
        let name = name.to_string();
        Task::cancelable(async move { client.delete_database(&name).await })
    }

    pub fn list_databases(&self) -> Task<Vec<String>> {
        let client = self.client.clone();
        Task::cancelable(async move { client.list_databases().await })
    }

    pub fn connect(&self, name: &str) -> Task<AsyncConnection> {
        let client = self.client.clone();
        let name = name.to_string();
        Task::cancelable(async move {
            let connection = client.connect(&name).await?;
            Ok(AsyncConnection { connection })
        })
    }

    pub fn q(&self, args: QueryArgs) -> Task<Vec<Row>> {
        let client = self.client.clone();
        Task::cancelable(async move { client.q(args).await })
    }

    /// Query results as a stream of row chunks
    pub fn qseq(&self, args: QueryArgs) -> Result<ChunkStream<Row>> {
        let source = self.client.qseq(args)?;
        Ok(ChunkStream::spawn(source, 2))
    }
}

/// Non-blocking [`Connection`]
#[derive(Debug, Clone)]
pub struct AsyncConnection {
    connection: Connection,
}

impl AsyncConnection {
    pub fn new(connection: Connection) -> Self {
        Self { connection }
    }

    pub fn db(&self) -> Task<AsyncDb> {
        let connection = self.connection.clone();
        Task::cancelable(async move { Ok(AsyncDb::new(connection.db().await?)) })
    }

    pub fn sync(&self, t: u64) -> Task<AsyncDb> {
        let connection = self.connection.clone();
        Task::cancelable(async move { Ok(AsyncDb::new(connection.sync(t).await?)) })
    }

    /// Submit a transaction; the returned task cannot be cancelled
    pub fn transact(&self, statements: Vec<Statement>) -> Task<TxReport> {
        let connection = self.connection.clone();
        Task::uncancelable(async move { connection.transact(statements).await })
    }

    pub fn with(&self, statements: Vec<Statement>) -> Task<TxReport> {
        let connection = self.connection.clone();
        Task::cancelable(async move { connection.with(statements).await })
    }

    /// Transactions in `[start, end)` as chunks of entries
    pub fn tx_range(&self, args: TxRangeArgs) -> Result<ChunkStream<TxEntry>> {
        let entries = self.connection.tx_range(args)?;
        Ok(ChunkStream::spawn(entries.map(|entry| entry.map(|e| vec![e])).boxed(), 16))
    }
}

/// Non-blocking [`Db`]
#[derive(Debug, Clone)]
pub struct AsyncDb {
    db: Db,
}

impl AsyncDb {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    pub fn as_of(&self, point: impl Into<TimePoint>) -> Task<AsyncDb> {
        let db = self.db.clone();
        let point = point.into();
        Task::cancelable(async move { Ok(AsyncDb::new(db.as_of(point).await?)) })
    }

    pub fn since(&self, point: impl Into<TimePoint>) -> Task<AsyncDb> {
        let db = self.db.clone();
        let point = point.into();
        Task::cancelable(async move { Ok(AsyncDb::new(db.since(point).await?)) })
    }

    pub fn history(&self) -> AsyncDb {
        AsyncDb::new(self.db.history())
    }

    pub fn with(&self, statements: Vec<Statement>) -> Task<TxReport> {
        let db = self.db.clone();
        Task::cancelable(async move { db.with(statements).await })
    }

    pub fn datoms(&self, args: DatomsArgs) -> Task<Vec<Datom>> {
        let db = self.db.clone();
        Task::cancelable(async move { db.datoms(args).await })
    }

    pub fn index_range(&self, args: IndexRangeArgs) -> Task<Vec<Datom>> {
        let db = self.db.clone();
        Task::cancelable(async move { db.index_range(args).await })
    }

    pub fn pull(&self, args: PullArgs) -> Task<PullMap> {
        let db = self.db.clone();
        Task::cancelable(async move { db.pull(args).await })
    }

    pub fn index_pull(&self, args: IndexPullArgs) -> Task<Vec<PullMap>> {
        let db = self.db.clone();
        Task::cancelable(async move { db.index_pull(args).await })
    }

    pub fn db_stats(&self) -> Task<DbStats> {
        let db = self.db.clone();
        Task::cancelable(async move { db.db_stats().await })
    }

    pub fn q(&self, args: QueryArgs) -> Task<Vec<Row>> {
        let db = self.db.clone();
        Task::cancelable(async move { db.q(args).await })
    }

    pub fn qseq(&self, args: QueryArgs) -> Result<ChunkStream<Row>> {
        Ok(ChunkStream::spawn(self.db.qseq(args)?, 2))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::index::IndexOrder;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    async fn connect() -> AsyncConnection {
        let client = AsyncClient::new(Client::from_config(ClientConfig::default()).unwrap());
        client.create_database("films").await.unwrap();
        client.connect("films").await.unwrap()
    }

    #[tokio::test]
    async fn test_cancelled_read_reports_interrupted() {
        let task: Task<()> = Task::cancelable(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        });
        assert!(task.cancel());
        let err = task.await.unwrap_err();
        assert!(matches!(err, Error::Interrupted(_)));
    }

    #[tokio::test]
    async fn test_transact_task_is_not_cancelable() {
        let conn = connect().await;
        let task = conn.transact(Vec::new());
        assert!(!task.is_cancelable());
        assert!(!task.cancel());
        let report = task.await.unwrap();
        assert_eq!(report.tx_data().len(), 1);
    }

    #[tokio::test]
    async fn test_errors_resolve_through_the_task() {
        let conn = connect().await;
        let db = conn.db().await.unwrap();
        let err = db
            .datoms(DatomsArgs::new(IndexOrder::Eavt).limit(0))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_dropping_chunk_stream_stops_producer() {
        let produced = Arc::new(AtomicUsize::new(0));
        let counter = produced.clone();
        let source = futures::stream::iter(0..)
            .map(move |n: u64| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(vec![n])
            })
            .boxed();

        let mut stream = ChunkStream::spawn(source, 1);
        assert_eq!(stream.next().await.unwrap().unwrap(), vec![0]);
        drop(stream);

        tokio::time::sleep(Duration::from_millis(20)).await;
        let after_drop = produced.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(produced.load(Ordering::SeqCst), after_drop);
        assert!(after_drop <= 4);
    }

    #[tokio::test]
    async fn test_tx_range_streams_entries() {
        let conn = connect().await;
        for _ in 0..3 {
            conn.transact(Vec::new()).await.unwrap();
        }
        let mut stream = conn.tx_range(TxRangeArgs::new().start(1u64)).unwrap();
        let mut ts = Vec::new();
        while let Some(chunk) = stream.next_chunk().await {
            ts.extend(chunk.unwrap().into_iter().map(|e| e.t));
        }
        assert_eq!(ts, vec![1, 2, 3]);
    }
}
