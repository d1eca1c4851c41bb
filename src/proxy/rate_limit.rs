//! FIFO rate limiter.
//!
//! VB365 rejects bursts above one request per second, so every token-grant
//! call to it is funneled through a single queue that spaces job starts by
//! a fixed minimum interval. Jobs run strictly in submission order, one at
//! a time; `clear` rejects everything still queued without touching the
//! job currently executing.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// Error delivered to queued jobs dropped by [`RateLimiter::clear`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

impl fmt::Display for Cancelled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("rate limiter queue cleared before execution")
    }
}

impl std::error::Error for Cancelled {}

struct QueueEntry<T> {
    job: BoxFuture<'static, T>,
    settle: oneshot::Sender<Result<T, Cancelled>>,
}

struct LimiterInner<T> {
    min_interval: Duration,
    queue: Mutex<VecDeque<QueueEntry<T>>>,
    last_started: Mutex<Option<Instant>>,
    draining: AtomicBool,
}

pub struct RateLimiter<T> {
    inner: Arc<LimiterInner<T>>,
}

// Clones share the same queue and spacing state.
impl<T> Clone for RateLimiter<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Send + 'static> RateLimiter<T> {
    /// `rate` is operations per second; the spacing between consecutive job
    /// starts is `1000 / rate` milliseconds.
    pub fn new(rate: f64) -> Self {
        let min_interval = Duration::from_millis((1000.0 / rate) as u64);
        Self {
            inner: Arc::new(LimiterInner {
                min_interval,
                queue: Mutex::new(VecDeque::new()),
                last_started: Mutex::new(None),
                draining: AtomicBool::new(false),
            }),
        }
    }

    /// Enqueue `job` and wait for its result. Jobs execute FIFO with at
    /// least the configured interval between starts.
    pub async fn execute<F, Fut>(&self, job: F) -> Result<T, Cancelled>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = T> + Send + 'static,
    {
        let (settle, result) = oneshot::channel();

        {
            let mut queue = self
                .inner
                .queue
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            queue.push_back(QueueEntry {
                job: job().boxed(),
                settle,
            });
        }

        // Start the drain loop unless one is already running
        if !self.inner.draining.swap(true, Ordering::SeqCst) {
            let inner = self.inner.clone();
            tokio::spawn(async move {
                inner.drain().await;
            });
        }

        match result.await {
            Ok(outcome) => outcome,
            Err(_) => Err(Cancelled),
        }
    }

    /// Reject all queued (not yet started) jobs. The job currently
    /// executing, if any, is unaffected.
    pub fn clear(&self) {
        let entries: Vec<QueueEntry<T>> = {
            let mut queue = self
                .inner
                .queue
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            queue.drain(..).collect()
        };
        for entry in entries {
            let _ = entry.settle.send(Err(Cancelled));
        }
    }

    #[cfg(test)]
    fn queued(&self) -> usize {
        self.inner
            .queue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

impl<T: Send + 'static> LimiterInner<T> {
    async fn drain(self: Arc<Self>) {
        loop {
            let wait = {
                let last = self
                    .last_started
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                match *last {
                    Some(started) => self.min_interval.saturating_sub(started.elapsed()),
                    None => Duration::ZERO,
                }
            };
            if !wait.is_zero() {
                tokio::time::sleep(wait).await;
            }

            let entry = {
                let mut queue = self
                    .queue
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                queue.pop_front()
            };

            let Some(entry) = entry else {
                self.draining.store(false, Ordering::SeqCst);
                // An execute() may have enqueued between the pop and the
                // flag reset; take the flag back and keep draining if so.
                let empty = self
                    .queue
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .is_empty();
                if empty || self.draining.swap(true, Ordering::SeqCst) {
                    return;
                }
                continue;
            };

            {
                let mut last = self
                    .last_started
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                *last = Some(Instant::now());
            }

            let outcome = entry.job.await;
            let _ = entry.settle.send(Ok(outcome));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc as StdArc;

    #[tokio::test]
    async fn test_fifo_spacing() {
        // Compressed timescale: 20 ops/sec -> 50ms spacing
        let limiter = StdArc::new(RateLimiter::new(20.0));
        let starts: StdArc<Mutex<Vec<(usize, Instant)>>> = StdArc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..3 {
            let limiter = limiter.clone();
            let starts = starts.clone();
            handles.push(tokio::spawn(async move {
                limiter
                    .execute(move || async move {
                        starts.lock().unwrap().push((i, Instant::now()));
                        i
                    })
                    .await
            }));
            // Deterministic submission order
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap().unwrap());
        }
        assert_eq!(results, vec![0, 1, 2]);

        let starts = starts.lock().unwrap();
        assert_eq!(
            starts.iter().map(|(i, _)| *i).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert!(starts[1].1 - starts[0].1 >= Duration::from_millis(45));
        assert!(starts[2].1 - starts[1].1 >= Duration::from_millis(45));
    }

    #[tokio::test]
    async fn test_clear_rejects_queued_but_not_running() {
        let limiter = StdArc::new(RateLimiter::<u32>::new(10.0));

        let first = {
            let limiter = limiter.clone();
            tokio::spawn(async move {
                limiter
                    .execute(|| async {
                        tokio::time::sleep(Duration::from_millis(150)).await;
                        1
                    })
                    .await
            })
        };
        // Let the first job start executing
        tokio::time::sleep(Duration::from_millis(20)).await;

        let second = {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.execute(|| async { 2 }).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(limiter.queued(), 1);

        limiter.clear();

        assert_eq!(second.await.unwrap(), Err(Cancelled));
        assert_eq!(first.await.unwrap(), Ok(1));
    }

    #[tokio::test]
    async fn test_job_result_propagates() {
        let limiter = RateLimiter::<Result<u32, String>>::new(100.0);

        let ok = limiter.execute(|| async { Ok(7) }).await.unwrap();
        assert_eq!(ok, Ok(7));

        let err = limiter
            .execute(|| async { Err("boom".to_string()) })
            .await
            .unwrap();
        assert_eq!(err, Err("boom".to_string()));
    }
}
