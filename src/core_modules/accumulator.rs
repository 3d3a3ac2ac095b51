// THEORY:
// The `accumulator` module holds the single piece of state that is mutated
// concurrently in the whole pipeline: the per-column running sum of match
// strength for one localization pass.
//
// Key architectural principles:
// 1.  **Pass-Scoped Lifetime**: A `ColumnAccumulator` is created fresh at the
//     start of a pass, shared by every worker of that pass behind an `Arc`,
//     consumed exactly once by the peak resolver, then dropped. It is never
//     ambient or global state.
// 2.  **Coarse-Grained Merging**: Workers scan into a private per-row buffer
//     and merge it under one mutex acquisition, rather than taking a lock per
//     pixel. Lost updates are impossible; contention stays one lock per row.
// 3.  **Fixed Width Invariant**: The accumulator always has exactly one cell
//     per image column; merges of any other width are rejected.

use std::sync::Mutex;

/// Per-column running sums of match-strength contributions for one pass.
pub struct ColumnAccumulator {
    width: usize,
    columns: Mutex<Vec<f64>>,
}

impl ColumnAccumulator {
    pub fn new(width: usize) -> Self {
        Self {
            width,
            columns: Mutex::new(vec![0.0; width]),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Adds a worker's locally accumulated row contributions.
    ///
    /// Returns `false` without touching any cell when the widths disagree;
    /// the caller logs and drops the contribution.
    pub fn merge(&self, contributions: &[f64]) -> bool {
        if contributions.len() != self.width {
            return false;
        }
        let mut columns = self.columns.lock().unwrap();
        for (cell, value) in columns.iter_mut().zip(contributions) {
            *cell += value;
        }
        true
    }

    /// Total accumulated match strength over all columns.
    pub fn sum(&self) -> f64 {
        self.columns.lock().unwrap().iter().sum()
    }

    /// A copy of the current column sums, for the resolver and diagnostics.
    pub fn snapshot(&self) -> Vec<f64> {
        self.columns.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn starts_zeroed_at_configured_width() {
        let accumulator = ColumnAccumulator::new(100);
        assert_eq!(accumulator.width(), 100);
        assert_eq!(accumulator.snapshot().len(), 100);
        assert_eq!(accumulator.sum(), 0.0);
    }

    #[test]
    fn merge_rejects_mismatched_width() {
        let accumulator = ColumnAccumulator::new(10);
        assert!(!accumulator.merge(&[1.0; 9]));
        assert_eq!(accumulator.sum(), 0.0);
        assert!(accumulator.merge(&[1.0; 10]));
        assert_eq!(accumulator.sum(), 10.0);
    }

    /// Concurrent merges from N tasks must never lose an update: the final
    /// sum is exactly the arithmetic sum of every contribution.
    async fn stress(workers: usize) {
        const MERGES_PER_WORKER: usize = 200;
        let accumulator = Arc::new(ColumnAccumulator::new(64));

        let mut handles = Vec::with_capacity(workers);
        for worker in 0..workers {
            let accumulator = Arc::clone(&accumulator);
            handles.push(tokio::spawn(async move {
                // Overlapping column subsets: even workers hit the left half,
                // odd workers the whole width.
                let mut contribution = vec![0.0; 64];
                let span = if worker % 2 == 0 { 32 } else { 64 };
                for cell in contribution.iter_mut().take(span) {
                    *cell = 0.5;
                }
                for _ in 0..MERGES_PER_WORKER {
                    assert!(accumulator.merge(&contribution));
                }
                span as f64 * 0.5 * MERGES_PER_WORKER as f64
            }));
        }

        let mut expected = 0.0;
        for handle in handles {
            expected += handle.await.unwrap();
        }
        assert_eq!(accumulator.sum(), expected);
    }

    #[tokio::test]
    async fn concurrent_merges_lose_no_updates_1() {
        stress(1).await;
    }

    #[tokio::test]
    async fn concurrent_merges_lose_no_updates_4() {
        stress(4).await;
    }

    #[tokio::test]
    async fn concurrent_merges_lose_no_updates_16() {
        stress(16).await;
    }
}
