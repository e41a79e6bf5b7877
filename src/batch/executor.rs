//! Concurrent fan-out of single writes.

use futures::future::join_all;
use std::future::Future;

#[derive(Debug, Clone)]
pub struct BatchResult<T, E> {
    pub successes: Vec<(usize, T)>,
    pub failures: Vec<(usize, E)>,
    pub total_processed: usize,
}

impl<T, E> BatchResult<T, E> {
    pub fn new() -> Self {
        Self {
            successes: Vec::new(),
            failures: Vec::new(),
            total_processed: 0,
        }
    }
    pub fn add_success(&mut self, i: usize, r: T) {
        self.successes.push((i, r));
    }
    pub fn add_failure(&mut self, i: usize, e: E) {
        self.failures.push((i, e));
    }
    pub fn all_succeeded(&self) -> bool {
        self.failures.is_empty()
    }
    pub fn success_count(&self) -> usize {
        self.successes.len()
    }
    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }
}

impl<T, E> Default for BatchResult<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Run one future per item concurrently and wait for all of them.
///
/// Results are indexed by input position; a failure never cancels the others.
pub async fn fan_out<I, T, E, F, Fut>(items: I, op: F) -> BatchResult<T, E>
where
    I: IntoIterator,
    F: Fn(I::Item) -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
{
    let outcomes = join_all(items.into_iter().map(op)).await;
    let mut result = BatchResult::new();
    result.total_processed = outcomes.len();
    for (i, outcome) in outcomes.into_iter().enumerate() {
        match outcome {
            Ok(r) => result.add_success(i, r),
            Err(e) => result.add_failure(i, e),
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[tokio::test]
    async fn test_fan_out_collects_by_index() {
        let result: BatchResult<i32, String> = fan_out(0..5, |i| async move {
            if i % 2 == 0 {
                Ok(i * 10)
            } else {
                Err(format!("odd {}", i))
            }
        })
        .await;
        assert_eq!(result.total_processed, 5);
        assert_eq!(result.successes, vec![(0, 0), (2, 20), (4, 40)]);
        assert_eq!(result.failure_count(), 2);
        assert_eq!(result.failures[0], (1, "odd 1".to_string()));
        assert!(!result.all_succeeded());
    }

    #[tokio::test]
    async fn test_fan_out_runs_concurrently() {
        let start = Instant::now();
        let result: BatchResult<(), ()> = fan_out(0..10, |_| async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(())
        })
        .await;
        assert!(result.all_succeeded());
        assert_eq!(result.success_count(), 10);
        // sequential would take ~500ms
        assert!(start.elapsed() < Duration::from_millis(400));
    }

    #[tokio::test]
    async fn test_fan_out_empty() {
        let result: BatchResult<(), ()> = fan_out(Vec::<u8>::new(), |_| async { Ok(()) }).await;
        assert_eq!(result.total_processed, 0);
        assert!(result.all_succeeded());
    }
}
