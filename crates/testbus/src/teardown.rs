//! Bounded wait for the last reference to a torn-down resource.
//!
//! After the harness stops the daemon, the session connection should be
//! released by whoever still holds it. [`wait_for_sole_owner`] gives those
//! holders a bounded amount of time, so a leaked reference surfaces as a
//! warning naming the outstanding count rather than as a hang.

use std::collections::VecDeque;
use std::fmt;
use std::ops::Deref;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

const TEARDOWN_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::teardown");

type DropObserver = Box<dyn FnOnce() + Send>;

/// Value wrapper that notifies observers when it is dropped.
pub struct Watched<T> {
    value: T,
    observers: Mutex<Vec<DropObserver>>,
}

impl<T> Watched<T> {
    /// Wraps `value` with no observers.
    #[must_use]
    pub const fn new(value: T) -> Self {
        Self {
            value,
            observers: Mutex::new(Vec::new()),
        }
    }

    /// Registers `observer` to run once when the value is dropped.
    pub fn on_drop(&self, observer: impl FnOnce() + Send + 'static) {
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::new(observer));
    }
}

impl<T> Deref for Watched<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T: fmt::Debug> fmt::Debug for Watched<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let observers = self
            .observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        f.debug_struct("Watched")
            .field("value", &self.value)
            .field("observers", &observers)
            .finish()
    }
}

impl<T> Drop for Watched<T> {
    fn drop(&mut self) {
        let observers = std::mem::take(
            self.observers
                .get_mut()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for observer in observers {
            observer();
        }
    }
}

/// How a teardown wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The last reference was released in time.
    Released,
    /// The deadline passed with references still alive.
    TimedOut {
        /// Strong references observed when the wait gave up.
        strong_count: usize,
    },
}

/// Releases `resource` and waits up to `timeout` for every other holder to
/// release theirs.
///
/// The caller's reference is always consumed. It is dropped from the wait
/// loop after the drop observer is armed, never inline, so a release that
/// happens during the call cannot be missed.
pub fn wait_for_sole_owner<T>(resource: Arc<Watched<T>>, timeout: Duration) -> WaitOutcome
where
    T: Send + Sync + 'static,
{
    let (sender, receiver) = mpsc::channel::<()>();
    resource.on_drop(move || {
        if sender.send(()).is_err() {
            debug!(target: TEARDOWN_TARGET, "resource released after the wait gave up");
        }
    });
    let witness = Arc::downgrade(&resource);

    let mut wait_loop = WaitLoop::default();
    wait_loop.defer(move || drop(resource));
    // A timeout too large to add to the clock waits without a deadline.
    let deadline = Instant::now().checked_add(timeout);
    if wait_loop.run_until(&receiver, deadline) {
        debug!(target: TEARDOWN_TARGET, "resource released");
        return WaitOutcome::Released;
    }

    let strong_count = witness.strong_count();
    warn!(
        target: TEARDOWN_TARGET,
        strong_count,
        timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        "timed out waiting for the last reference to be released"
    );
    WaitOutcome::TimedOut { strong_count }
}

/// Single-threaded loop that runs deferred tasks between waits.
#[derive(Default)]
struct WaitLoop {
    deferred: VecDeque<Box<dyn FnOnce()>>,
}

impl WaitLoop {
    fn defer(&mut self, task: impl FnOnce() + 'static) {
        self.deferred.push_back(Box::new(task));
    }

    /// Runs deferred work, then waits for a completion signal until
    /// `deadline`, or indefinitely without one. Returns whether completion
    /// arrived.
    fn run_until(&mut self, completion: &mpsc::Receiver<()>, deadline: Option<Instant>) -> bool {
        loop {
            while let Some(task) = self.deferred.pop_front() {
                task();
            }
            let Some(limit) = deadline else {
                if completion.recv().is_err() {
                    debug!(target: TEARDOWN_TARGET, "drop observer went away without signalling");
                }
                return true;
            };
            let remaining = limit.saturating_duration_since(Instant::now());
            match completion.recv_timeout(remaining) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => return true,
                Err(RecvTimeoutError::Timeout) if self.deferred.is_empty() => return false,
                Err(RecvTimeoutError::Timeout) => {}
            }
        }
    }
}
