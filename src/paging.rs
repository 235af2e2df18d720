//! Lazy paged streams over offset/limit reads

use crate::error::Result;
use crate::index::{Limit, Page};
use futures::stream::{self, BoxStream, StreamExt};
use std::future::Future;

struct Cursor<F> {
    fetch: F,
    offset: usize,
    remaining: Option<usize>,
    done: bool,
}

/// Stream of pages of at most `chunk_size` items. Each page is fetched only
/// when the consumer asks for it; the stream ends after a short page, after
/// `limit` items, or after the first error.
pub fn chunks<T, F, Fut>(chunk_size: usize, limit: Limit, fetch: F) -> BoxStream<'static, Result<Vec<T>>>
where
    T: Send + 'static,
    F: FnMut(Page) -> Fut + Send + 'static,
    Fut: Future<Output = Result<Vec<T>>> + Send + 'static,
{
    let chunk_size = chunk_size.max(1);
    let cursor = Cursor {
        fetch,
        offset: 0,
        remaining: match limit {
            Limit::Unbounded => None,
            Limit::At(n) => Some(n),
        },
        done: false,
    };

    stream::unfold(cursor, move |mut cursor| async move {
        if cursor.done || cursor.remaining == Some(0) {
            return None;
        }
        let size = cursor.remaining.map_or(chunk_size, |r| r.min(chunk_size));
        match (cursor.fetch)(Page::new(cursor.offset, Limit::At(size))).await {
            Ok(items) if items.is_empty() => None,
            Ok(items) => {
                cursor.done = items.len() < size;
                cursor.offset += items.len();
                if let Some(remaining) = cursor.remaining.as_mut() {
                    *remaining = remaining.saturating_sub(items.len());
                }
                Some((Ok(items), cursor))
            }
            Err(e) => {
                cursor.done = true;
                Some((Err(e), cursor))
            }
        }
    })
    .boxed()
}

/// Item-at-a-time view of [`chunks`]
pub fn items<T, F, Fut>(chunk_size: usize, limit: Limit, fetch: F) -> BoxStream<'static, Result<T>>
where
    T: Send + 'static,
    F: FnMut(Page) -> Fut + Send + 'static,
    Fut: Future<Output = Result<Vec<T>>> + Send + 'static,
{
    chunks(chunk_size, limit, fetch)
        .flat_map(|chunk| {
            let items: Vec<Result<T>> = match chunk {
                Ok(items) => items.into_iter().map(Ok).collect(),
                Err(e) => vec![Err(e)],
            };
            stream::iter(items)
        })
        .boxed()
}
