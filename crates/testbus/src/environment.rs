//! Process environment sandboxing for a running bus.

use std::env;
use std::ffi::OsString;

use tracing::debug;

const ENVIRONMENT_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::environment");

/// Variable through which clients find the session bus.
pub const SESSION_BUS_ADDRESS_ENV: &str = "DBUS_SESSION_BUS_ADDRESS";

/// Variables that could leak the caller's desktop session into a test.
pub const SANDBOX_VARIABLES: [&str; 5] = [
    "DISPLAY",
    SESSION_BUS_ADDRESS_ENV,
    "DBUS_STARTER_ADDRESS",
    "DBUS_STARTER_BUS_TYPE",
    "XDG_RUNTIME_DIR",
];

/// Removes [`SANDBOX_VARIABLES`] from the process environment.
///
/// Safe to call at any time and any number of times. Mutating the
/// environment races with other threads reading it, so call this before tests
/// spawn threads that consult the environment.
pub fn unset_environment() {
    for key in SANDBOX_VARIABLES {
        // Environment mutation is `unsafe` on the 2024 edition; the harness
        // only mutates the variables it manages.
        unsafe { env::remove_var(key) };
    }
    debug!(target: ENVIRONMENT_TARGET, "session variables unset");
}

/// Exports `address` as the session bus address.
pub(crate) fn export_session_address(address: &str) {
    unsafe { env::set_var(SESSION_BUS_ADDRESS_ENV, address) };
}

/// Snapshot of the managed variables taken before a bus starts.
#[derive(Debug)]
pub(crate) struct EnvSnapshot {
    saved: Vec<(&'static str, Option<OsString>)>,
}

impl EnvSnapshot {
    pub(crate) fn capture() -> Self {
        Self {
            saved: SANDBOX_VARIABLES
                .iter()
                .map(|key| (*key, env::var_os(key)))
                .collect(),
        }
    }

    /// Puts every managed variable back to its captured value.
    pub(crate) fn restore(self) {
        for (key, value) in self.saved {
            match value {
                Some(previous) => unsafe { env::set_var(key, previous) },
                None => unsafe { env::remove_var(key) },
            }
        }
        debug!(target: ENVIRONMENT_TARGET, "session variables restored");
    }
}
