//! Disposable message buses for integration tests.
//!
//! [`TestBus`] starts a private bus daemon, exports its address through
//! `DBUS_SESSION_BUS_ADDRESS`, and tears everything down again when the test
//! finishes. Three properties make the harness safe to use in large suites:
//!
//! - The daemon is registered with a process guard from `testbus-watchdog`
//!   before the harness waits on it, so it is terminated even if the test
//!   binary is killed.
//! - `down()` waits a bounded time for the session connection to be released
//!   and reports a leak instead of hanging.
//! - The caller's environment is restored once the bus is gone.
//!
//! Configuration comes from `testbus-config`; see [`HarnessConfig`] for the
//! knobs and the variables that override them.

pub mod address;
pub mod busconfig;
pub mod connectivity;
pub mod daemon;
mod environment;
mod error;
mod flags;
mod harness;
mod reporter;
pub mod session;
pub mod teardown;
pub mod telemetry;

pub use address::{AddressError, BusAddress};
pub use environment::{SANDBOX_VARIABLES, SESSION_BUS_ADDRESS_ENV, unset_environment};
pub use error::{DaemonError, HarnessError};
pub use flags::HarnessFlags;
pub use harness::{BusState, TestBus, TestBusBuilder};
pub use reporter::{LifecycleReporter, StructuredLifecycleReporter};
pub use session::{
    BusConnection, SessionBus, SessionBusError, forget_session_bus, session_bus,
    session_bus_if_exists,
};
pub use teardown::{WaitOutcome, Watched, wait_for_sole_owner};
pub use testbus_config::HarnessConfig;

#[cfg(test)]
mod tests;
