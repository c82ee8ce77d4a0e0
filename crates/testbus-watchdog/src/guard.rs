//! The supervision contract and the process-wide guard.

#[cfg(any(unix, windows))]
use once_cell::sync::OnceCell;

use crate::error::WatchdogError;

#[cfg_attr(not(any(unix, windows)), expect(dead_code, reason = "no guard to log about"))]
pub(crate) const WATCHDOG_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::guard");

/// Terminates tracked processes when the owning process goes away.
///
/// Callers must untrack a process once they have reaped it themselves;
/// otherwise the guard may later signal an unrelated process that reused the
/// pid.
pub trait ProcessGuard: Send + Sync {
    /// Starts supervising `pid`.
    ///
    /// # Errors
    ///
    /// Returns a [`WatchdogError`] when the pid is unusable or the guard
    /// cannot record it. Guards with a bounded registry return
    /// [`WatchdogError::Capacity`] once it is full rather than leaving the
    /// process unsupervised.
    fn track(&self, pid: u32) -> Result<(), WatchdogError>;

    /// Stops supervising `pid`.
    ///
    /// # Errors
    ///
    /// Returns a [`WatchdogError`] when the guard cannot be reached.
    fn untrack(&self, pid: u32) -> Result<(), WatchdogError>;
}

impl<G> ProcessGuard for &G
where
    G: ProcessGuard + ?Sized,
{
    fn track(&self, pid: u32) -> Result<(), WatchdogError> {
        (**self).track(pid)
    }

    fn untrack(&self, pid: u32) -> Result<(), WatchdogError> {
        (**self).untrack(pid)
    }
}

impl<G> ProcessGuard for std::sync::Arc<G>
where
    G: ProcessGuard + ?Sized,
{
    fn track(&self, pid: u32) -> Result<(), WatchdogError> {
        (**self).track(pid)
    }

    fn untrack(&self, pid: u32) -> Result<(), WatchdogError> {
        (**self).untrack(pid)
    }
}

#[cfg(unix)]
type PlatformGuard = crate::helper::HelperProcessGuard;
#[cfg(windows)]
type PlatformGuard = crate::job::JobObjectGuard;

#[cfg(any(unix, windows))]
static GUARD: OnceCell<PlatformGuard> = OnceCell::new();

/// Returns the process-wide guard, creating it on first use.
///
/// Concurrent first calls race safely: exactly one guard is created and every
/// caller observes it.
///
/// # Errors
///
/// Returns a [`WatchdogError`] when the guard cannot be created. A later call
/// retries creation.
#[cfg(any(unix, windows))]
pub fn platform_guard() -> Result<&'static dyn ProcessGuard, WatchdogError> {
    let guard = GUARD.get_or_try_init(|| {
        let created = PlatformGuard::spawn()?;
        tracing::info!(target: WATCHDOG_TARGET, "process guard initialised");
        Ok::<_, WatchdogError>(created)
    })?;
    Ok(guard)
}

/// Returns the process-wide guard, creating it on first use.
///
/// # Errors
///
/// Always returns [`WatchdogError::UnsupportedPlatform`].
#[cfg(not(any(unix, windows)))]
pub fn platform_guard() -> Result<&'static dyn ProcessGuard, WatchdogError> {
    Err(WatchdogError::UnsupportedPlatform)
}
