//! Bounded worker pool and run cancellation.

use crate::{Error, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Default number of concurrent workers.
pub const DEFAULT_WORKERS: usize = 4;

/// Shared cancellation flag with an optional deadline.
///
/// Cloned tokens observe the same flag. Cancellation is cooperative: work that
/// has already started runs to completion, later work is not started.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    /// A token that is only cancelled explicitly.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that also counts as cancelled once `timeout` has elapsed.
    #[must_use]
    pub fn with_deadline(mut self, timeout: Duration) -> Self {
        self.deadline = Instant::now().checked_add(timeout);
        self
    }

    /// Cancels every clone of this token.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether the token was cancelled or its deadline passed.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
            || self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// Fails with [`Error::Cancelled`] if the run should not enter `stage`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] naming `stage`.
    pub fn check(&self, stage: &str) -> Result<()> {
        if self.is_cancelled() {
            tracing::warn!(stage, "Run cancelled");
            return Err(Error::Cancelled {
                stage: stage.to_string(),
            });
        }
        Ok(())
    }
}

/// Runs `work` over `items` on at most `workers` scoped threads.
///
/// Workers pull the next index from a shared cursor, so one slow item never
/// holds up the rest. Results come back in item order regardless of which
/// worker finished first. Once `cancel` fires no further items are started.
///
/// # Errors
///
/// Returns [`Error::Cancelled`] naming `stage` if any item was left unstarted.
pub fn run_bounded<T, R, F>(
    stage: &str,
    items: &[T],
    workers: usize,
    cancel: &CancelToken,
    work: F,
) -> Result<Vec<R>>
where
    T: Sync,
    R: Send,
    F: Fn(usize, &T) -> R + Sync,
{
    let finished = run_bounded_partial(items, workers, cancel, work);
    if finished.len() < items.len() {
        tracing::warn!(
            stage,
            completed = finished.len(),
            total = items.len(),
            "Run cancelled mid-stage"
        );
        return Err(Error::Cancelled {
            stage: stage.to_string(),
        });
    }
    Ok(finished.into_iter().map(|(_, result)| result).collect())
}

/// Like [`run_bounded`], but keeps what finished before cancellation.
///
/// Returns `(index, result)` pairs sorted by index. Items that were never
/// started are absent.
pub fn run_bounded_partial<T, R, F>(
    items: &[T],
    workers: usize,
    cancel: &CancelToken,
    work: F,
) -> Vec<(usize, R)>
where
    T: Sync,
    R: Send,
    F: Fn(usize, &T) -> R + Sync,
{
    let workers = workers.clamp(1, items.len().max(1));
    let cursor = AtomicUsize::new(0);

    let mut finished: Vec<(usize, R)> = thread::scope(|scope| {
        let handles: Vec<_> = (0..workers)
            .map(|_| {
                scope.spawn(|| {
                    let mut done = Vec::new();
                    while !cancel.is_cancelled() {
                        let index = cursor.fetch_add(1, Ordering::SeqCst);
                        let Some(item) = items.get(index) else {
                            break;
                        };
                        done.push((index, work(index, item)));
                    }
                    done
                })
            })
            .collect();

        handles
            .into_iter()
            .flat_map(|handle| {
                handle
                    .join()
                    .unwrap_or_else(|payload| std::panic::resume_unwind(payload))
            })
            .collect()
    });

    finished.sort_by_key(|(index, _)| *index);
    finished
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_results_in_item_order() {
        let items: Vec<u64> = (0..20).collect();
        let results = run_bounded("test", &items, 4, &CancelToken::new(), |_, item| {
            // Later items finish first.
            thread::sleep(Duration::from_millis(20 - item));
            item * 10
        })
        .unwrap();
        assert_eq!(results, (0..20).map(|i| i * 10).collect::<Vec<_>>());
    }

    #[test]
    fn test_concurrency_is_bounded() {
        let active = AtomicUsize::new(0);
        let peak = Mutex::new(0);
        let items = vec![(); 16];
        run_bounded("test", &items, 3, &CancelToken::new(), |_, ()| {
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            {
                let mut peak = peak.lock().unwrap();
                *peak = (*peak).max(now);
            }
            thread::sleep(Duration::from_millis(5));
            active.fetch_sub(1, Ordering::SeqCst);
        })
        .unwrap();
        assert!(*peak.lock().unwrap() <= 3);
    }

    #[test]
    fn test_empty_items() {
        let items: Vec<u8> = Vec::new();
        let results: Vec<u8> =
            run_bounded("test", &items, 4, &CancelToken::new(), |_, item| *item).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_cancel_stops_new_work() {
        let cancel = CancelToken::new();
        let started = AtomicUsize::new(0);
        let items = vec![(); 50];
        let result = run_bounded("chunk_summaries", &items, 1, &cancel, |index, ()| {
            started.fetch_add(1, Ordering::SeqCst);
            if index == 2 {
                cancel.cancel();
            }
        });

        assert!(matches!(result, Err(Error::Cancelled { ref stage }) if stage == "chunk_summaries"));
        assert_eq!(started.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_partial_keeps_finished_items() {
        let cancel = CancelToken::new();
        let items: Vec<u32> = (0..10).collect();
        let finished = run_bounded_partial(&items, 1, &cancel, |index, item| {
            if index == 3 {
                cancel.cancel();
            }
            item * 2
        });
        assert_eq!(finished, vec![(0, 0), (1, 2), (2, 4), (3, 6)]);
    }

    #[test]
    fn test_deadline() {
        let token = CancelToken::new().with_deadline(Duration::ZERO);
        assert!(token.is_cancelled());
        assert!(token.check("synthesis").is_err());

        let token = CancelToken::new().with_deadline(Duration::from_secs(3600));
        assert!(!token.is_cancelled());
        let clone = token.clone();
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
