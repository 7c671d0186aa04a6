//! Bounded concurrent fan-out with per-item result collection.
//!
//! [`BoundedConcurrentMap`] is the single concurrency primitive used by the
//! orchestrator: DNS preflight lookups, per-domain authorizations and
//! per-certificate renewal jobs all run through it.
//!
//! # Semantics
//!
//! - At most `limit` tasks are in flight at any time (counting semaphore).
//! - Every task runs to completion; a failing task never cancels a sibling.
//! - Tasks acquire their permit in input order (the semaphore is FIFO-fair),
//!   but may complete in any order.
//! - Results are keyed by the original input index, never by completion order.

use std::collections::BTreeMap;
use std::future::Future;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{debug, trace};

/// Results of a bounded batch, partitioned by outcome.
///
/// The key sets of `successes` and `errors` are disjoint and together cover
/// every input index exactly once.
#[derive(Debug)]
pub struct BatchOutcome<T, E> {
    /// Successful results keyed by input index
    pub successes: BTreeMap<usize, T>,
    /// Errors keyed by input index
    pub errors: BTreeMap<usize, E>,
}

impl<T, E> BatchOutcome<T, E> {
    fn empty() -> Self {
        Self {
            successes: BTreeMap::new(),
            errors: BTreeMap::new(),
        }
    }

    /// Total number of tasks that ran
    pub fn len(&self) -> usize {
        self.successes.len() + self.errors.len()
    }

    /// Whether the batch had no inputs
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether every task succeeded
    pub fn all_succeeded(&self) -> bool {
        self.errors.is_empty()
    }

    /// Split into the two index-keyed maps
    pub fn into_parts(self) -> (BTreeMap<usize, T>, BTreeMap<usize, E>) {
        (self.successes, self.errors)
    }

    /// Turn into `Ok(successes)` when nothing failed, `Err(errors)` otherwise.
    pub fn into_result(self) -> Result<BTreeMap<usize, T>, BTreeMap<usize, E>> {
        if self.errors.is_empty() {
            Ok(self.successes)
        } else {
            Err(self.errors)
        }
    }
}

/// Runs independent async tasks with a concurrency ceiling.
#[derive(Debug, Clone, Copy)]
pub struct BoundedConcurrentMap {
    limit: usize,
}

impl BoundedConcurrentMap {
    /// Create a map that keeps at most `limit` tasks in flight.
    ///
    /// A limit of zero is treated as one.
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
        }
    }

    /// The effective concurrency limit
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Run `task` once per input and collect every result.
    ///
    /// `task` receives the input index and the item. The future it returns is
    /// not polled until a permit is available, so any work done inside the
    /// `async` block counts against the limit.
    pub async fn run<I, F, Fut, T, E>(&self, inputs: I, mut task: F) -> BatchOutcome<T, E>
    where
        I: IntoIterator,
        F: FnMut(usize, I::Item) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let semaphore = Semaphore::new(self.limit);
        let semaphore = &semaphore;

        let pending: Vec<_> = inputs
            .into_iter()
            .enumerate()
            .map(|(index, item)| {
                let fut = task(index, item);
                async move {
                    // The semaphore is never closed, so acquisition cannot fail.
                    let _permit = semaphore.acquire().await.ok();
                    trace!(index = index, "Batch task started");
                    let result = fut.await;
                    trace!(index = index, ok = result.is_ok(), "Batch task finished");
                    (index, result)
                }
            })
            .collect();

        let total = pending.len();
        debug!(tasks = total, limit = self.limit, "Running bounded batch");

        let mut outcome = BatchOutcome::empty();
        for (index, result) in join_all(pending).await {
            match result {
                Ok(value) => {
                    outcome.successes.insert(index, value);
                }
                Err(error) => {
                    outcome.errors.insert(index, error);
                }
            }
        }

        debug!(
            tasks = total,
            succeeded = outcome.successes.len(),
            failed = outcome.errors.len(),
            "Bounded batch complete"
        );

        outcome
    }
}

impl Default for BoundedConcurrentMap {
    fn default() -> Self {
        Self::new(10)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
    }

    async fn tracked_task(
        index: usize,
        total: usize,
        in_flight: &AtomicUsize,
        peak: &AtomicUsize,
    ) -> Result<usize, String> {
        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);

        // Earlier inputs stay suspended longer so completion order differs
        // from input order.
        for _ in 0..(total - index) {
            tokio::task::yield_now().await;
        }

        in_flight.fetch_sub(1, Ordering::SeqCst);

        if index % 3 == 1 {
            Err(format!("task {} failed", index))
        } else {
            Ok(index * 10)
        }
    }

    proptest! {
        #[test]
        fn never_exceeds_limit_and_covers_all_indices(n in 1usize..40, c in 1usize..12) {
            let c = c.min(n);
            let in_flight = AtomicUsize::new(0);
            let peak = AtomicUsize::new(0);

            let outcome = runtime().block_on(async {
                BoundedConcurrentMap::new(c)
                    .run(0..n, |index, _| tracked_task(index, n, &in_flight, &peak))
                    .await
            });

            prop_assert!(peak.load(Ordering::SeqCst) <= c);
            prop_assert_eq!(outcome.len(), n);

            for index in 0..n {
                let in_ok = outcome.successes.contains_key(&index);
                let in_err = outcome.errors.contains_key(&index);
                prop_assert!(in_ok != in_err, "index {} must be in exactly one map", index);
            }
        }
    }

    #[tokio::test]
    async fn test_results_keyed_by_input_index() {
        let in_flight = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);

        let outcome = BoundedConcurrentMap::new(4)
            .run(0..6, |index, _| tracked_task(index, 6, &in_flight, &peak))
            .await;

        assert_eq!(outcome.successes.get(&0), Some(&0));
        assert_eq!(outcome.successes.get(&5), Some(&50));
        assert_eq!(outcome.errors.get(&1).map(String::as_str), Some("task 1 failed"));
        assert_eq!(outcome.errors.get(&4).map(String::as_str), Some("task 4 failed"));
        assert_eq!(outcome.errors.len(), 2);
    }

    #[tokio::test]
    async fn test_failure_does_not_cancel_siblings() {
        let completed = AtomicUsize::new(0);

        let outcome = BoundedConcurrentMap::new(2)
            .run(vec!["fail", "slow", "slow", "slow"], |_, kind| {
                let completed = &completed;
                async move {
                    if kind == "fail" {
                        return Err("boom");
                    }
                    for _ in 0..5 {
                        tokio::task::yield_now().await;
                    }
                    completed.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await;

        assert_eq!(completed.load(Ordering::SeqCst), 3);
        assert_eq!(outcome.errors.len(), 1);
        assert!(outcome.errors.contains_key(&0));
    }

    #[tokio::test]
    async fn test_start_order_follows_input_order() {
        let started = tokio::sync::Mutex::new(Vec::new());

        BoundedConcurrentMap::new(1)
            .run(0..5, |index, _| {
                let started = &started;
                async move {
                    started.lock().await.push(index);
                    tokio::task::yield_now().await;
                    Ok::<_, ()>(())
                }
            })
            .await;

        assert_eq!(*started.lock().await, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_zero_limit_treated_as_one() {
        let map = BoundedConcurrentMap::new(0);
        assert_eq!(map.limit(), 1);

        let outcome = map
            .run(0..3, |index, _| async move { Ok::<_, ()>(index) })
            .await;
        assert!(outcome.all_succeeded());
        assert_eq!(outcome.len(), 3);
    }

    #[tokio::test]
    async fn test_empty_input() {
        let outcome = BoundedConcurrentMap::default()
            .run(Vec::<u8>::new(), |_, _| async { Ok::<(), ()>(()) })
            .await;
        assert!(outcome.is_empty());
        assert!(outcome.into_result().is_ok());
    }
}
