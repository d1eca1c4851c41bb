//! Authentication call debouncer.
//!
//! Token grants are expensive and, for rotating refresh tokens, unsafe to
//! run twice concurrently. The debouncer collapses overlapping `execute`
//! calls into one in-flight future that every caller awaits, and serves a
//! short-lived cached result so bursts arriving just after completion do
//! not re-authenticate.

use std::time::Duration;

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use tokio::sync::Mutex;
use tokio::time::Instant;

type SharedJob<T> = Shared<BoxFuture<'static, Result<T, String>>>;

struct DebounceState<T> {
    cached: Option<(T, Instant)>,
    pending: Option<SharedJob<T>>,
}

pub struct Debouncer<T: Clone> {
    cache_timeout: Duration,
    state: Mutex<DebounceState<T>>,
}

impl<T: Clone + Send + Sync + 'static> Debouncer<T> {
    pub fn new(cache_timeout: Duration) -> Self {
        Self {
            cache_timeout,
            state: Mutex::new(DebounceState {
                cached: None,
                pending: None,
            }),
        }
    }

    /// Run `job` unless a fresh cached result or an in-flight invocation
    /// can serve the caller instead.
    ///
    /// Failures are shared with every waiter of the same invocation and
    /// never cached, so the next call after a failure re-invokes.
    pub async fn execute<F, Fut>(&self, job: F) -> Result<T, String>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, String>> + Send + 'static,
    {
        let shared = {
            let mut state = self.state.lock().await;

            if let Some((value, stored_at)) = &state.cached {
                if stored_at.elapsed() < self.cache_timeout {
                    return Ok(value.clone());
                }
            }

            match state.pending.clone() {
                Some(pending) => pending,
                None => {
                    let shared = job().boxed().shared();
                    state.pending = Some(shared.clone());
                    shared
                }
            }
        };

        let result = shared.clone().await;

        // Whichever waiter gets the lock first retires the pending slot;
        // ptr_eq guards against retiring a newer invocation.
        let mut state = self.state.lock().await;
        if state
            .pending
            .as_ref()
            .map_or(false, |pending| pending.ptr_eq(&shared))
        {
            state.pending = None;
            if let Ok(value) = &result {
                state.cached = Some((value.clone(), Instant::now()));
            }
        }

        result
    }

    /// Forget the cached result. Does not cancel an in-flight invocation.
    pub async fn clear(&self) {
        self.state.lock().await.cached = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_concurrent_calls_invoke_once() {
        let debouncer = Arc::new(Debouncer::<u32>::new(Duration::from_millis(200)));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..2 {
            let debouncer = debouncer.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                debouncer
                    .execute(move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(42)
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), Ok(42));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cache_expiry_reinvokes() {
        let debouncer = Debouncer::<u32>::new(Duration::from_millis(40));
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            let result = debouncer
                .execute(|| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Ok(1) }
                })
                .await;
            assert_eq!(result, Ok(1));
        }
        // Second call inside the window hits the cache
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(60)).await;

        let result = debouncer
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(2) }
            })
            .await;
        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failure_shared_and_not_cached() {
        let debouncer = Arc::new(Debouncer::<u32>::new(Duration::from_millis(200)));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..2 {
            let debouncer = debouncer.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                debouncer
                    .execute(move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        Err::<u32, _>("denied".to_string())
                    })
                    .await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap(), Err("denied".to_string()));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Errors are not cached: the next call re-invokes
        let result = debouncer
            .execute(|| async {
                Ok(9)
            })
            .await;
        assert_eq!(result, Ok(9));
    }

    #[tokio::test]
    async fn test_clear_forgets_cache() {
        let debouncer = Debouncer::<u32>::new(Duration::from_secs(60));
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            let _ = debouncer
                .execute(|| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Ok(5) }
                })
                .await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        debouncer.clear().await;

        let _ = debouncer
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(5) }
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
