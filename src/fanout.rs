//! The shared fan-out primitive.

use std::future::Future;

use futures::future::join_all;

/// Runs every mapper concurrently, then folds the successful results into
/// the accumulator serially, in input order. Mapper errors are collected;
/// the reduce still runs over whatever succeeded so callers can decide
/// whether a partial result is usable.
pub(crate) async fn async_map_reduce<T, P, A, E, M, Fut, R>(
    inputs: Vec<T>,
    seed: A,
    map: M,
    mut reduce: R,
) -> Result<A, Vec<E>>
where
    M: Fn(T) -> Fut,
    Fut: Future<Output = Result<P, E>>,
    R: FnMut(A, P) -> A,
{
    let outcomes = join_all(inputs.into_iter().map(map)).await;

    let mut acc = seed;
    let mut errors = Vec::new();
    for outcome in outcomes {
        match outcome {
            Ok(value) => acc = reduce(acc, value),
            Err(error) => errors.push(error),
        }
    }

    if errors.is_empty() {
        Ok(acc)
    } else {
        Err(errors)
    }
}
