//! Synchronization primitives shared by the tasks.
use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Condvar, Mutex, MutexGuard, PoisonError, TryLockError,
    },
    time::{Duration, Instant},
};

/// The default interval at which [`SignalLatch::wait_cancellable`] rechecks
/// the cancellation token.
pub const DEFAULT_WAIT_POLL: Duration = Duration::from_millis(20);

/// Returned by blocking operations that were interrupted by a [`CancelToken`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("The operation was cancelled.")]
pub struct Cancelled;

/// Acquire `mutex`, ignoring poisoning. None of the data protected in this
/// module can be left in an inconsistent state by a panic.
#[inline]
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ----------------------------------------------------------------------------

/// A cooperative cancellation flag.
///
/// Clones share the same flag. Once cancelled, a token stays cancelled.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Default)]
struct CancelInner {
    /// Mirrors `cancelled` so that polling doesn't need the lock.
    flag: AtomicBool,
    cancelled: Mutex<bool>,
    cond: Condvar,
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CancelToken")
            .field(&self.is_cancelled())
            .finish()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation and wake up everyone sleeping on this token.
    pub fn cancel(&self) {
        let mut cancelled = lock(&self.inner.cancelled);
        if !*cancelled {
            log::trace!("cancellation requested");
            *cancelled = true;
            self.inner.flag.store(true, Ordering::Release);
            self.inner.cond.notify_all();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.flag.load(Ordering::Acquire)
    }

    /// Return `Err(Cancelled)` if cancellation has been requested.
    pub fn check(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleep for `duration` or until cancellation is requested, whichever
    /// comes first.
    pub fn sleep(&self, duration: Duration) -> Result<(), Cancelled> {
        let deadline = Instant::now() + duration;
        let mut cancelled = lock(&self.inner.cancelled);
        loop {
            if *cancelled {
                return Err(Cancelled);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            cancelled = self
                .inner
                .cond
                .wait_timeout(cancelled, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Return a guard that cancels this token when dropped during a panic.
    ///
    /// A task holds one of these for its whole body so that its peers stop
    /// if it dies.
    pub fn cancel_on_panic(&self) -> CancelOnPanic<'_> {
        CancelOnPanic(self)
    }
}

/// Returned by [`CancelToken::cancel_on_panic`].
#[must_use]
pub struct CancelOnPanic<'a>(&'a CancelToken);

impl Drop for CancelOnPanic<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            log::error!("a task panicked; cancelling the run");
            self.0.cancel();
        }
    }
}

// ----------------------------------------------------------------------------

/// A counter guarded by a mutex.
///
/// Every operation holds the lock for its entire duration, and the lock is
/// released on every exit path, including unwinding. None of the methods may
/// be called from inside a closure passed to another method of the same
/// counter; that would deadlock.
#[derive(Debug, Default)]
pub struct SharedCounter {
    value: Mutex<u32>,
}

impl SharedCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment the counter and return the new value.
    pub fn increment(&self) -> u32 {
        self.increment_with(|_| ()).0
    }

    /// Increment the counter, then call `f` with the new value while the lock
    /// is still held. Returns the new value and the result of `f`.
    pub fn increment_with<R>(&self, f: impl FnOnce(u32) -> R) -> (u32, R) {
        let mut value = lock(&self.value);
        // Saturate rather than wrap so that the value never decreases
        *value = value.saturating_add(1);
        let new_value = *value;
        log::trace!("counter = {new_value}");
        (new_value, f(new_value))
    }

    /// Read the current value.
    pub fn read(&self) -> u32 {
        *lock(&self.value)
    }

    /// Returns `true` if the lock is currently free. Only meaningful once
    /// every other user has stopped. A lock poisoned by a panicking holder
    /// still counts as free.
    pub fn is_unlocked(&self) -> bool {
        !matches!(self.value.try_lock(), Err(TryLockError::WouldBlock))
    }
}

// ----------------------------------------------------------------------------

/// A counting semaphore used to wake the dependent task.
///
/// The count never goes negative. Signals sent while nobody is waiting
/// accumulate.
#[derive(Debug)]
pub struct SignalLatch {
    count: Mutex<usize>,
    cond: Condvar,
    poll: Duration,
}

impl Default for SignalLatch {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalLatch {
    /// Construct a latch with a count of zero.
    pub fn new() -> Self {
        Self::with_poll(DEFAULT_WAIT_POLL)
    }

    /// Construct a latch whose cancellable waits recheck their token every
    /// `poll`.
    pub fn with_poll(poll: Duration) -> Self {
        Self {
            count: Mutex::new(0),
            cond: Condvar::new(),
            poll,
        }
    }

    /// Increment the count and wake one waiter.
    pub fn signal(&self) {
        let mut count = lock(&self.count);
        *count += 1;
        log::trace!("latch signaled (count = {})", *count);
        self.cond.notify_one();
    }

    /// Block until the count is positive, then decrement it.
    pub fn wait(&self) {
        let mut count = lock(&self.count);
        while *count == 0 {
            count = self.cond.wait(count).unwrap_or_else(PoisonError::into_inner);
        }
        *count -= 1;
    }

    /// Like [`Self::wait`], but gives up once `cancel` is cancelled. The
    /// cancellation is noticed within one poll interval.
    ///
    /// A pending cancellation takes precedence over an available signal.
    pub fn wait_cancellable(&self, cancel: &CancelToken) -> Result<(), Cancelled> {
        let mut count = lock(&self.count);
        loop {
            cancel.check()?;
            if *count > 0 {
                *count -= 1;
                return Ok(());
            }
            count = self
                .cond
                .wait_timeout(count, self.poll)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Decrement the count if it's positive. Returns `true` on success.
    pub fn try_wait(&self) -> bool {
        let mut count = lock(&self.count);
        if *count > 0 {
            *count -= 1;
            true
        } else {
            false
        }
    }

    /// The number of signals not yet consumed.
    pub fn count(&self) -> usize {
        *lock(&self.count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_starts_at_zero() {
        let c = SharedCounter::new();
        assert_eq!(c.read(), 0);
        assert_eq!(c.increment(), 1);
        assert_eq!(c.increment(), 2);
        assert_eq!(c.read(), 2);
    }

    #[test]
    fn increment_with_sees_new_value_under_lock() {
        let c = SharedCounter::new();
        let (v, seen) = c.increment_with(|v| (v, c.is_unlocked()));
        assert_eq!(v, 1);
        assert_eq!(seen, (1, false));
        assert!(c.is_unlocked());
    }

    #[test]
    fn panic_inside_lock_releases_it() {
        let c = SharedCounter::new();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            c.increment_with(|_| panic!("workload failed"));
        }));
        assert!(result.is_err());
        assert!(c.is_unlocked());
        assert_eq!(c.read(), 1);
        assert_eq!(c.increment(), 2);
    }

    #[test]
    fn latch_accumulates() {
        let l = SignalLatch::new();
        assert!(!l.try_wait());
        l.signal();
        l.signal();
        l.signal();
        assert_eq!(l.count(), 3);
        l.wait();
        assert!(l.try_wait());
        assert!(l.try_wait());
        assert!(!l.try_wait());
        assert_eq!(l.count(), 0);
    }

    #[test]
    fn cancelled_wait_does_not_consume() {
        let l = SignalLatch::new();
        let token = CancelToken::new();
        l.signal();
        token.cancel();
        assert_eq!(l.wait_cancellable(&token), Err(Cancelled));
        assert_eq!(l.count(), 1);
    }

    #[test]
    fn token_sleep_completes_when_not_cancelled() {
        let token = CancelToken::new();
        let start = Instant::now();
        assert_eq!(token.sleep(Duration::from_millis(30)), Ok(()));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn token_is_sticky() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert_eq!(clone.check(), Ok(()));
        token.cancel();
        token.cancel();
        assert!(clone.is_cancelled());
        assert_eq!(clone.sleep(Duration::from_secs(60)), Err(Cancelled));
    }

    #[test]
    fn panic_guard_cancels() {
        let token = CancelToken::new();
        let token2 = token.clone();
        let result = std::thread::spawn(move || {
            let _guard = token2.cancel_on_panic();
            panic!("task died");
        })
        .join();
        assert!(result.is_err());
        assert!(token.is_cancelled());
    }

    #[test]
    fn panic_guard_is_quiet_on_normal_exit() {
        let token = CancelToken::new();
        drop(token.cancel_on_panic());
        assert!(!token.is_cancelled());
    }
}
