//! Bounded N-way concurrency for bulk operations.
//!
//! Each submitted future runs under a shared semaphore so at most
//! `max_concurrency` rclone sessions are in flight. All tasks are allowed to
//! settle; the caller inspects the per-task results and typically re-raises
//! the first failure.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::error::{Error, Result};

/// Run `futures` with at most `max_concurrency` in flight, optionally
/// applying a per-task timeout. Results are returned in submission order.
pub async fn run_throttled<T, F>(
    futures: Vec<F>,
    max_concurrency: usize,
    timeout: Option<Duration>,
) -> Vec<Result<T>>
where
    F: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(max_concurrency.max(1)));
    let total = futures.len();
    let mut set = JoinSet::new();
    for (index, future) in futures.into_iter().enumerate() {
        let semaphore = Arc::clone(&semaphore);
        set.spawn(async move {
            let result = match semaphore.acquire_owned().await {
                Err(e) => Err(Error::Task(e.to_string())),
                Ok(_permit) => match timeout {
                    Some(limit) => match tokio::time::timeout(limit, future).await {
                        Ok(result) => result,
                        Err(_) => Err(Error::Timeout(limit)),
                    },
                    None => future.await,
                },
            };
            (index, result)
        });
    }

    let mut slots: Vec<Option<Result<T>>> = (0..total).map(|_| None).collect();
    let mut panics = Vec::new();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((index, result)) => slots[index] = Some(result),
            Err(e) => panics.push(Error::Task(e.to_string())),
        }
    }
    // A panicked task loses its index; fill panics into whatever slots are
    // left empty, in order.
    let mut panics = panics.into_iter();
    slots
        .into_iter()
        .map(|slot| match slot {
            Some(result) => result,
            None => Err(panics
                .next()
                .unwrap_or_else(|| Error::Task("task vanished without a result".into()))),
        })
        .collect()
}

/// Convenience over [`run_throttled`]: log nothing, return the first error
/// after every task has settled.
pub async fn run_throttled_all_ok<T, F>(
    futures: Vec<F>,
    max_concurrency: usize,
) -> Result<Vec<T>>
where
    F: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    let results = run_throttled(futures, max_concurrency, None).await;
    let mut values = Vec::with_capacity(results.len());
    let mut first_error = None;
    for result in results {
        match result {
            Ok(value) => values.push(value),
            Err(e) => {
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(values),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn bounds_concurrency() {
        static IN_FLIGHT: AtomicUsize = AtomicUsize::new(0);
        static PEAK: AtomicUsize = AtomicUsize::new(0);

        let tasks: Vec<_> = (0..10)
            .map(|i| async move {
                let now = IN_FLIGHT.fetch_add(1, Ordering::SeqCst) + 1;
                PEAK.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                IN_FLIGHT.fetch_sub(1, Ordering::SeqCst);
                Ok::<usize, Error>(i)
            })
            .collect();

        let results = run_throttled(tasks, 2, None).await;
        assert_eq!(results.len(), 10);
        for (i, result) in results.into_iter().enumerate() {
            assert_eq!(result.unwrap(), i);
        }
        assert!(PEAK.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn errors_settle_without_aborting_others() {
        let tasks: Vec<_> = (0..4)
            .map(|i| async move {
                if i == 1 {
                    Err(Error::Lifecycle("boom".into()))
                } else {
                    Ok(i)
                }
            })
            .collect();
        let err = run_throttled_all_ok(tasks, 3).await.unwrap_err();
        assert!(matches!(err, Error::Lifecycle(_)));
    }

    #[tokio::test]
    async fn per_task_timeout_fires() {
        let tasks = vec![async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<(), Error>(())
        }];
        let results = run_throttled(tasks, 1, Some(Duration::from_millis(50))).await;
        assert!(matches!(results[0], Err(Error::Timeout(_))));
    }
}
