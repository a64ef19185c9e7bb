//! Single-flight execution with a freshness window
//!
//! [`Single`] collapses concurrent refreshes of one value into a single
//! computation and keeps the result for a fixed window. The state machine is
//! `Idle -> Refreshing -> Fresh`; callers arriving while a refresh is in
//! flight subscribe to its result instead of starting another one.

use parking_lot::Mutex;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::watch;

enum State<T> {
    Idle,
    Refreshing(watch::Receiver<Option<T>>),
    Fresh { value: T, at: Instant },
}

struct Inner<T> {
    state: State<T>,
    /// Bumped by `reset`; a refresh that started under an older generation
    /// hands its value to waiters but does not cache it.
    generation: u64,
}

/// A value refreshed at most once per window, with shared in-flight refreshes
pub struct Single<T> {
    wait: Duration,
    inner: Mutex<Inner<T>>,
}

impl<T: Clone> Single<T> {
    pub fn new(wait: Duration) -> Self {
        Single {
            wait,
            inner: Mutex::new(Inner {
                state: State::Idle,
                generation: 0,
            }),
        }
    }

    /// Return the cached value, or compute it with `f`.
    ///
    /// The boolean is `true` when the value was produced by another caller
    /// (cache hit or joined an in-flight refresh).
    pub async fn run<F, Fut>(&self, f: F) -> (T, bool)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let (tx, generation) = loop {
            let mut rx = {
                let mut inner = self.inner.lock();
                match &inner.state {
                    State::Fresh { value, at } if at.elapsed() < self.wait => {
                        return (value.clone(), true);
                    }
                    State::Refreshing(rx) => rx.clone(),
                    _ => {
                        let (tx, rx) = watch::channel(None);
                        inner.state = State::Refreshing(rx);
                        break (tx, inner.generation);
                    }
                }
            };

            let published = match rx.wait_for(Option::is_some).await {
                Ok(value) => value.clone(),
                Err(_) => None,
            };
            if let Some(value) = published {
                return (value, true);
            }
            // The refreshing caller went away before publishing; take over.
        };

        let mut guard = RefreshGuard {
            inner: &self.inner,
            armed: true,
        };

        let started = Instant::now();
        let value = f().await;

        {
            let mut inner = self.inner.lock();
            inner.state = if inner.generation == generation {
                State::Fresh {
                    value: value.clone(),
                    at: started,
                }
            } else {
                State::Idle
            };
        }
        guard.armed = false;

        let _ = tx.send(Some(value.clone()));
        (value, false)
    }

    /// Force the next `run` to recompute.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.generation = inner.generation.wrapping_add(1);
        if matches!(inner.state, State::Fresh { .. }) {
            inner.state = State::Idle;
        }
    }

    /// Freshness window
    pub fn wait(&self) -> Duration {
        self.wait
    }
}

/// Returns the state to `Idle` if the refreshing future is dropped early.
struct RefreshGuard<'a, T> {
    inner: &'a Mutex<Inner<T>>,
    armed: bool,
}

impl<T> Drop for RefreshGuard<'_, T> {
    fn drop(&mut self) {
        if self.armed {
            self.inner.lock().state = State::Idle;
        }
    }
}
