//! Bounded fan-out with fail-fast cancellation

use std::future::Future;

use futures::{StreamExt, TryStreamExt, stream};

use crate::error::Result;

/// Workers for one category: its share of `parallelism`, at least one
pub fn proportional_workers(category_len: usize, total_len: usize, parallelism: usize) -> usize {
    let parallelism = parallelism.max(1);
    if total_len == 0 {
        return 1;
    }
    (category_len * parallelism / total_len).clamp(1, parallelism)
}

/// Run `f` over `items` with at most `workers` futures in flight
///
/// The first error stops the pool: futures still running are dropped and no
/// new item is started. Results come back in completion order.
pub async fn run_bounded<T, R, F, Fut>(items: Vec<T>, workers: usize, f: F) -> Result<Vec<R>>
where
    F: FnMut(T) -> Fut,
    Fut: Future<Output = Result<R>>,
{
    stream::iter(items)
        .map(f)
        .buffer_unordered(workers.max(1))
        .try_collect()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KubeError;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_proportional_workers() {
        assert_eq!(proportional_workers(10, 100, 30), 3);
        assert_eq!(proportional_workers(100, 100, 30), 30);
        // Small categories still get one worker
        assert_eq!(proportional_workers(1, 100, 30), 1);
        assert_eq!(proportional_workers(0, 100, 30), 1);
        assert_eq!(proportional_workers(0, 0, 30), 1);
        assert_eq!(proportional_workers(5, 5, 0), 1);
    }

    #[tokio::test]
    async fn test_respects_worker_limit() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let results = run_bounded((0..20).collect(), 3, |i: usize| {
            let running = running.clone();
            let peak = peak.clone();
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(i * 2)
            }
        })
        .await
        .unwrap();

        assert_eq!(results.len(), 20);
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_first_error_stops_new_work() {
        let started = Arc::new(AtomicUsize::new(0));

        let result: Result<Vec<()>> = run_bounded((0..50).collect(), 1, |i: usize| {
            let started = started.clone();
            async move {
                started.fetch_add(1, Ordering::SeqCst);
                if i == 2 {
                    return Err(KubeError::Diff("boom".to_string()));
                }
                Ok(())
            }
        })
        .await;

        assert!(matches!(result, Err(KubeError::Diff(_))));
        assert!(started.load(Ordering::SeqCst) < 50);
    }
}
