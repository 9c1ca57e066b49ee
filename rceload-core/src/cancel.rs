//! Run-level cancellation
//!
//! A `CancellationToken` is cloned into every dispatcher of a run. Cancelling
//! it wakes every registered `mio::Poll` and every thread sleeping through
//! `CancellationToken::sleep`, so nothing waits out a pacing delay or a
//! readiness event after the run was stopped.

use mio::Waker;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[derive(Default)]
struct Inner {
    cancelled: AtomicBool,
    /// Guards the condvar wait; holds the same flag as `cancelled`
    state: Mutex<bool>,
    cond: Condvar,
    wakers: Mutex<Vec<Arc<Waker>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Clone, Default)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!("Cancellation requested");

        *lock(&self.inner.state) = true;
        self.inner.cond.notify_all();

        for waker in lock(&self.inner.wakers).iter() {
            if let Err(e) = waker.wake() {
                tracing::warn!("Failed to wake poller on cancellation: {}", e);
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Wake `waker` when the token is cancelled
    ///
    /// A waker registered after cancellation is woken immediately.
    pub fn register_waker(&self, waker: Arc<Waker>) {
        let mut wakers = lock(&self.inner.wakers);
        if self.is_cancelled() {
            if let Err(e) = waker.wake() {
                tracing::warn!("Failed to wake poller on cancellation: {}", e);
            }
        }
        wakers.push(waker);
    }

    /// Sleep for `duration` unless cancelled first
    ///
    /// Returns `true` if the full duration elapsed, `false` on cancellation.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut cancelled = lock(&self.inner.state);
        while !*cancelled {
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            cancelled = match self.inner.cond.wait_timeout(cancelled, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        false
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken").field("cancelled", &self.is_cancelled()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mio::{Events, Poll, Token};
    use std::thread;

    #[test]
    fn test_sleep_completes_without_cancel() {
        let token = CancellationToken::new();
        let start = Instant::now();
        assert!(token.sleep(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_cancel_interrupts_sleep() {
        let token = CancellationToken::new();
        let canceller = token.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            canceller.cancel();
        });

        let start = Instant::now();
        assert!(!token.sleep(Duration::from_secs(30)));
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(token.is_cancelled());
        handle.join().unwrap();
    }

    #[test]
    fn test_cancel_wakes_poller() {
        let mut poll = Poll::new().unwrap();
        let waker = Arc::new(Waker::new(poll.registry(), Token(usize::MAX)).unwrap());
        let token = CancellationToken::new();
        token.register_waker(waker);

        let canceller = token.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            canceller.cancel();
        });

        let mut events = Events::with_capacity(4);
        let start = Instant::now();
        poll.poll(&mut events, Some(Duration::from_secs(30))).unwrap();
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(events.iter().any(|e| e.token() == Token(usize::MAX)));
        handle.join().unwrap();
    }

    #[test]
    fn test_register_after_cancel_wakes_immediately() {
        let mut poll = Poll::new().unwrap();
        let token = CancellationToken::new();
        token.cancel();
        token.register_waker(Arc::new(Waker::new(poll.registry(), Token(9)).unwrap()));

        let mut events = Events::with_capacity(4);
        poll.poll(&mut events, Some(Duration::from_secs(5))).unwrap();
        assert!(events.iter().any(|e| e.token() == Token(9)));
    }
}
