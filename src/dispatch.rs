//! Bounded fan-out of one unit of work over many items.
//!
//! At most `limit` workers are pending at once. A new item is admitted as soon
//! as any pending worker finishes, so one slow item never holds back a whole
//! chunk. Every item is attempted exactly once regardless of other failures,
//! and results come back in input order.
//!
//! Everything runs inside the calling task: workers are polled by
//! `buffer_unordered`, not spawned, so admission needs no synchronisation.

use futures::{stream, FutureExt, StreamExt};
use std::future::Future;
use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Concurrency limit must be at least 1, got {0}")]
    InvalidLimit(i64),
    #[error("Concurrency limit is not a number")]
    Unparseable,
}

/// Parser for concurrency limits given on the command line or in the environment
pub fn parse_limit(value: &str) -> Result<usize, DispatchError> {
    let limit = value
        .trim()
        .parse::<i64>()
        .map_err(|_| DispatchError::Unparseable)?;
    if limit < 1 {
        return Err(DispatchError::InvalidLimit(limit));
    }
    usize::try_from(limit).map_err(|_| DispatchError::InvalidLimit(limit))
}

/// Runs `worker` once per item with at most `limit` in flight.
///
/// Resolves only after every worker has resolved. The output has one entry per
/// input item, at the same position.
pub async fn dispatch<T, R, E, F, Fut>(
    items: Vec<T>,
    limit: usize,
    mut worker: F,
) -> Result<Vec<Result<R, E>>, DispatchError>
where
    F: FnMut(T) -> Fut,
    Fut: Future<Output = Result<R, E>>,
{
    if limit == 0 {
        return Err(DispatchError::InvalidLimit(0));
    }
    let total = items.len();
    let mut finished = stream::iter(items.into_iter().enumerate())
        .map(|(index, item)| worker(item).map(move |result| (index, result)))
        .buffer_unordered(limit)
        .collect::<Vec<_>>()
        .await;
    debug_assert_eq!(finished.len(), total);
    // Completion order is arbitrary, put results back where their items were
    finished.sort_unstable_by_key(|(index, _)| *index);
    Ok(finished.into_iter().map(|(_, result)| result).collect())
}
