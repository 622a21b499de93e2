use std::{future::Future, num::NonZeroUsize};

use tokio::task::{JoinError, JoinSet};

/// Runs `iterable` on at most `capacity` tasks at a time and folds each
/// output into `accumulator` in completion order.
///
/// Futures are spawned lazily: a new one starts only when a running one
/// finishes. A panicking task ends the fold with its `JoinError`; the
/// remaining tasks are aborted when the set is dropped.
pub async fn fold_bounded<Iterable, Output, Accumulator, FoldWith>(
    iterable: Iterable,
    capacity: NonZeroUsize,
    mut accumulator: Accumulator,
    mut fold_with: FoldWith,
) -> Result<Accumulator, JoinError>
where
    Iterable: IntoIterator,
    Iterable::Item: Future<Output = Output> + Send + 'static,
    Output: Send + 'static,
    FoldWith: FnMut(Accumulator, Output) -> Accumulator,
{
    let mut iter = iterable.into_iter().fuse();
    let mut set: JoinSet<Output> = (&mut iter).take(capacity.get()).collect();

    while let Some(result) = set.join_next().await {
        accumulator = fold_with(accumulator, result?);

        if let Some(future) = iter.next() {
            set.spawn(future);
        }
    }

    Ok(accumulator)
}
