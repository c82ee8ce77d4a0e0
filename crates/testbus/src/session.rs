//! Process-wide session-bus connection handle.
//!
//! The registry holds only a weak reference, so the connection lives exactly
//! as long as the tests using it hold strong references. The harness relies
//! on this to observe the final release during teardown.

use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use thiserror::Error;
use tracing::debug;

use crate::address::{AddressError, BusAddress};
use crate::environment::SESSION_BUS_ADDRESS_ENV;
use crate::teardown::Watched;

const SESSION_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::session");

static SESSION_BUS: Mutex<Weak<Watched<BusConnection>>> = Mutex::new(Weak::new());

/// Shared handle to the session bus.
pub type SessionBus = Arc<Watched<BusConnection>>;

/// Errors raised while resolving the session bus.
#[derive(Debug, Error)]
pub enum SessionBusError {
    /// No session bus address is exported.
    #[error("DBUS_SESSION_BUS_ADDRESS is not set")]
    AddressUnset,
    /// The exported address is not valid Unicode.
    #[error("DBUS_SESSION_BUS_ADDRESS is not valid unicode")]
    AddressNotUnicode,
    /// The exported address does not parse.
    #[error("DBUS_SESSION_BUS_ADDRESS is invalid: {source}")]
    AddressInvalid {
        /// Parse failure.
        #[source]
        source: AddressError,
    },
}

/// Connection-level state for the session bus.
#[derive(Debug)]
pub struct BusConnection {
    address: BusAddress,
    exit_on_close: AtomicBool,
}

impl BusConnection {
    /// Creates a connection handle for `address`, exiting on close by default.
    #[must_use]
    pub const fn new(address: BusAddress) -> Self {
        Self {
            address,
            exit_on_close: AtomicBool::new(true),
        }
    }

    /// Address the connection targets.
    #[must_use]
    pub const fn address(&self) -> &BusAddress {
        &self.address
    }

    /// Whether losing the connection should terminate the process.
    #[must_use]
    pub fn exit_on_close(&self) -> bool {
        self.exit_on_close.load(Ordering::SeqCst)
    }

    /// Changes the exit-on-close behaviour.
    pub fn set_exit_on_close(&self, exit: bool) {
        self.exit_on_close.store(exit, Ordering::SeqCst);
    }
}

/// Returns the shared session bus, creating it from
/// `DBUS_SESSION_BUS_ADDRESS` when none is alive.
///
/// # Errors
///
/// Returns a [`SessionBusError`] when the variable is unset or invalid.
pub fn session_bus() -> Result<SessionBus, SessionBusError> {
    let mut slot = SESSION_BUS.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(existing) = slot.upgrade() {
        return Ok(existing);
    }
    let raw = env::var_os(SESSION_BUS_ADDRESS_ENV).ok_or(SessionBusError::AddressUnset)?;
    let text = raw
        .into_string()
        .map_err(|_| SessionBusError::AddressNotUnicode)?;
    let address = text
        .parse::<BusAddress>()
        .map_err(|source| SessionBusError::AddressInvalid { source })?;
    debug!(target: SESSION_TARGET, address = %address, "session bus handle created");
    let connection = Arc::new(Watched::new(BusConnection::new(address)));
    *slot = Arc::downgrade(&connection);
    Ok(connection)
}

/// Returns the shared session bus if some caller still holds it.
#[must_use]
pub fn session_bus_if_exists() -> Option<SessionBus> {
    SESSION_BUS
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .upgrade()
}

/// Drops the registry's weak reference so the next [`session_bus`] call
/// creates a fresh handle.
pub fn forget_session_bus() {
    *SESSION_BUS.lock().unwrap_or_else(PoisonError::into_inner) = Weak::new();
}
