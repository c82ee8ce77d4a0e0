//! Crash-safe supervision of processes spawned by a test harness.
//!
//! A test that starts a message-bus daemon must not leak that daemon when the
//! test binary aborts, panics past its cleanup, or is killed outright. This
//! crate provides a [`ProcessGuard`] that terminates every tracked process
//! once the owning process goes away, however it goes away.
//!
//! Two strategies exist, chosen at build time:
//!
//! - On Unix a [`HelperProcessGuard`] forks a small companion process that
//!   reads `add pid <n>` / `remove pid <n>` lines from a pipe. The operating
//!   system closes the pipe when the owner dies; the companion then sends
//!   `SIGTERM` to whatever is still tracked and exits.
//! - On Windows a [`JobObjectGuard`] assigns tracked processes to a job object
//!   configured to kill its members when the last handle to it closes.
//!
//! [`platform_guard`] hands out the process-wide guard for the current
//! platform, creating it on first use.

mod error;
mod guard;
#[cfg(unix)]
mod helper;
#[cfg(windows)]
mod job;
pub mod protocol;
mod registry;
mod stack;
pub mod watch;

pub use error::WatchdogError;
pub use guard::{ProcessGuard, platform_guard};
#[cfg(unix)]
pub use helper::HelperProcessGuard;
#[cfg(windows)]
pub use job::JobObjectGuard;
pub use protocol::ControlCommand;
pub use registry::{Insertion, PidRegistry, REGISTRY_CAPACITY, RegistryFull};
