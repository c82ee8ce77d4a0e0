//! Errors raised while creating or talking to a process guard.

use std::io;

use thiserror::Error;

use crate::registry::RegistryFull;

/// Errors surfaced by [`crate::ProcessGuard`] implementations.
#[derive(Debug, Error)]
pub enum WatchdogError {
    /// The control pipe could not be created.
    #[error("failed to create watchdog control pipe: {source}")]
    Pipe {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Forking the helper process failed.
    #[error("failed to fork watchdog helper: {source}")]
    Spawn {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Writing a command to the helper failed.
    #[error("failed to send '{command}' to the watchdog: {source}")]
    Send {
        /// Rendered command that could not be delivered.
        command: String,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The guard was shut down and no longer accepts commands.
    #[error("watchdog guard has been shut down")]
    Closed,
    /// Reaping the helper process failed.
    #[error("failed to reap watchdog helper {pid}: {source}")]
    Reap {
        /// Helper process identifier.
        pid: i32,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The pid cannot be supervised (zero, or outside the signed pid range).
    #[error("pid {pid} cannot be supervised")]
    InvalidPid {
        /// Rejected process identifier.
        pid: u32,
    },
    /// The guard already supervises as many processes as it can hold.
    #[error("cannot supervise another process: {source}")]
    Capacity {
        /// Registry refusal naming the pid.
        #[source]
        source: RegistryFull,
    },
    /// A job object call failed.
    #[error("job object operation '{operation}' failed: {source}")]
    JobObject {
        /// Name of the failing Win32 call.
        operation: &'static str,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
    /// No supervision strategy exists for this platform.
    #[error("process supervision is not supported on this platform")]
    UnsupportedPlatform,
}
