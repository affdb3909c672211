//! Producer/consumer coordination around a single mutex.
//!
//! [`SyncPoint`] owns the shared state. The producer mutates it through
//! [`SyncPoint::produce`]; the consumer waits for a predicate and then splits
//! its work into a short critical step that runs under the lock and a longer
//! step that runs after the lock is released.

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak,
    },
};

use crate::{BeatMatrixError, Result};

/// Something blocked on a condition variable that must re-check the
/// shutdown flag.
trait Wake: Send + Sync {
    fn wake(&self);
}

#[derive(Default)]
struct TokenInner {
    requested: AtomicBool,
    wakers: Mutex<Vec<Weak<dyn Wake>>>,
}

/// Cooperative cancellation flag shared by every thread of a pipeline.
///
/// Requesting shutdown wakes the consumers of every [`SyncPoint`] built on
/// this token. It must not be requested from inside a `produce` or `consume`
/// step of one of those sync points, as waking them takes their lock.
#[derive(Clone, Default)]
pub struct ShutdownToken {
    inner: Arc<TokenInner>,
}

impl ShutdownToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.inner.requested.store(true, Ordering::SeqCst);

        let wakers: Vec<Arc<dyn Wake>> = self
            .inner
            .wakers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        for waker in wakers {
            waker.wake();
        }
    }

    pub fn is_requested(&self) -> bool {
        self.inner.requested.load(Ordering::SeqCst)
    }

    fn register(&self, waker: Weak<dyn Wake>) {
        let mut wakers = self
            .inner
            .wakers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        wakers.retain(|existing| existing.strong_count() > 0);
        wakers.push(waker);
    }
}

impl fmt::Debug for ShutdownToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShutdownToken")
            .field("requested", &self.is_requested())
            .finish()
    }
}

#[derive(Debug)]
struct Shared<S> {
    state: Mutex<S>,
    ready: Condvar,
}

impl<S: Send> Wake for Shared<S> {
    fn wake(&self) {
        // Taking the lock orders the wake-up after any consumer that checked
        // the flag before it was set and has not reached its wait yet.
        drop(self.state.lock().unwrap_or_else(PoisonError::into_inner));
        self.ready.notify_all();
    }
}

/// Mutex plus condition variable with injected producer and consumer steps.
#[derive(Debug)]
pub struct SyncPoint<S> {
    shared: Arc<Shared<S>>,
    shutdown: ShutdownToken,
}

impl<S: Send + 'static> SyncPoint<S> {
    pub fn new(state: S, shutdown: ShutdownToken) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(state),
            ready: Condvar::new(),
        });
        let waker: Weak<dyn Wake> = Arc::<Shared<S>>::downgrade(&shared);
        shutdown.register(waker);
        Self { shared, shutdown }
    }
}

impl<S> SyncPoint<S> {
    pub fn shutdown_token(&self) -> &ShutdownToken {
        &self.shutdown
    }

    /// Runs `work` under the lock, then wakes every waiting consumer.
    pub fn produce<R>(&self, work: impl FnOnce(&mut S) -> R) -> Result<R> {
        let mut guard = self.lock()?;
        let output = work(&mut guard);
        drop(guard);
        self.shared.ready.notify_all();
        Ok(output)
    }

    /// Waits until `predicate` holds, runs `critical` under the lock, then
    /// releases the lock and runs `noncritical` on whatever `critical` returned.
    ///
    /// Returns `Ok(None)` without running either step when shutdown is
    /// requested while the predicate is false.
    pub fn consume<T, U>(
        &self,
        mut predicate: impl FnMut(&S) -> bool,
        critical: impl FnOnce(&mut S) -> T,
        noncritical: impl FnOnce(T) -> U,
    ) -> Result<Option<U>> {
        let mut guard = self.lock()?;
        while !predicate(&guard) {
            if self.shutdown.is_requested() {
                return Ok(None);
            }
            guard = self
                .shared
                .ready
                .wait(guard)
                .map_err(|_| BeatMatrixError::Poisoned("sync point"))?;
        }

        let taken = critical(&mut guard);
        drop(guard);
        Ok(Some(noncritical(taken)))
    }

    /// Reads the shared state under the lock without waiting.
    pub fn inspect<R>(&self, read: impl FnOnce(&S) -> R) -> Result<R> {
        let guard = self.lock()?;
        Ok(read(&guard))
    }

    /// Requests shutdown on the shared token, waking every blocked consumer.
    pub fn shutdown(&self) {
        self.shutdown.request();
    }

    fn lock(&self) -> Result<MutexGuard<'_, S>> {
        self.shared
            .state
            .lock()
            .map_err(|_| BeatMatrixError::Poisoned("sync point"))
    }
}
