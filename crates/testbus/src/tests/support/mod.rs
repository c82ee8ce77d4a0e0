//! Shared fixtures and test doubles.

#[cfg(unix)]
mod fake_daemon;
mod guard;
mod reporter;

use std::sync::{Mutex, MutexGuard, PoisonError};

#[cfg(unix)]
pub use fake_daemon::{FAKE_ADDRESS, FakeDaemon, FakeMode, process_exists};
pub use guard::{GuardEvent, RecordingGuard};
pub use reporter::{LifecycleEvent, RecordingLifecycleReporter};

static ENV_LOCK: Mutex<()> = Mutex::new(());

/// Serialises tests that touch the process environment or the session
/// singleton.
pub fn lock_env() -> MutexGuard<'static, ()> {
    ENV_LOCK.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Sets or removes a variable, returning its previous value.
pub fn replace_env(key: &str, value: Option<&str>) -> Option<std::ffi::OsString> {
    let previous = std::env::var_os(key);
    // Callers hold `lock_env()`.
    match value {
        Some(text) => unsafe { std::env::set_var(key, text) },
        None => unsafe { std::env::remove_var(key) },
    }
    previous
}

/// Restores a value captured by [`replace_env`].
pub fn restore_env(key: &str, previous: Option<std::ffi::OsString>) {
    match previous {
        Some(value) => unsafe { std::env::set_var(key, value) },
        None => unsafe { std::env::remove_var(key) },
    }
}
