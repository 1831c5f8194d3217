//! # Work Queue
//!
//! A shared fetch-add ticket line over an index range. Workers pull the
//! next index until the range is drained; the pool is a `thread::scope`
//! so workers may borrow the tree and data directly.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Monotone ticket dispenser over `[begin, end)`.
pub struct Ticket {
    next: AtomicUsize,
    end: usize,
}

impl Ticket {
    pub fn new(begin: usize, end: usize) -> Self {
        Self {
            next: AtomicUsize::new(begin),
            end,
        }
    }

    /// Next unclaimed index, or `None` once the range is drained.
    pub fn take(&self) -> Option<usize> {
        let idx = self.next.fetch_add(1, Ordering::Relaxed);
        (idx < self.end).then_some(idx)
    }
}

/// Runs `op(idx)` for every index in `[begin, end)` across `threads`
/// workers and returns the wall-clock duration of the whole batch.
pub fn work<F>(begin: usize, end: usize, threads: usize, op: F) -> Duration
where
    F: Fn(usize) + Sync,
{
    let line = Ticket::new(begin, end);
    let start = Instant::now();
    std::thread::scope(|scope| {
        for _ in 0..threads.max(1) {
            scope.spawn(|| {
                while let Some(idx) = line.take() {
                    op(idx);
                }
            });
        }
    });
    start.elapsed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    #[test]
    fn ticket_drains_exact_range() {
        let line = Ticket::new(3, 10);
        let mut seen = Vec::new();
        while let Some(idx) = line.take() {
            seen.push(idx);
        }
        assert_eq!(seen, (3..10).collect::<Vec<_>>());
        assert!(line.take().is_none());
    }

    #[test]
    fn work_visits_every_index_once() {
        let hits = AtomicU64::new(0);
        let sum = AtomicU64::new(0);
        work(0, 1000, 4, |idx| {
            hits.fetch_add(1, Ordering::Relaxed);
            sum.fetch_add(idx as u64, Ordering::Relaxed);
        });
        assert_eq!(hits.load(Ordering::Relaxed), 1000);
        assert_eq!(sum.load(Ordering::Relaxed), 999 * 1000 / 2);
    }

    #[test]
    fn work_handles_empty_range() {
        let hits = AtomicU64::new(0);
        let elapsed = work(5, 5, 2, |_| {
            hits.fetch_add(1, Ordering::Relaxed);
        });
        assert_eq!(hits.load(Ordering::Relaxed), 0);
        assert!(elapsed.as_nanos() < u128::MAX);
    }
}
