//! Maps a network service's raw state codes onto connectivity status.
//!
//! The codes follow the NetworkManager D-Bus API: a global `State`, a
//! `Connectivity` probe result, and an optional `Metered` hint. Tests drive a
//! [`ConnectivityMonitor`] with raw values and observe the derived status and
//! the change notifications it emits.

use tracing::warn;

const CONNECTIVITY_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::connectivity");

const STATE_CONNECTED_LOCAL: u32 = 50;
const STATE_CONNECTED_SITE: u32 = 60;

const CONNECTIVITY_UNKNOWN: u32 = 0;
const CONNECTIVITY_NONE: u32 = 1;
const CONNECTIVITY_PORTAL: u32 = 2;
const CONNECTIVITY_LIMITED: u32 = 3;
const CONNECTIVITY_FULL: u32 = 4;

/// How far the network reaches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Connectivity {
    /// Only the local machine is reachable.
    #[default]
    Local,
    /// Some hosts are reachable, but not the internet.
    Limited,
    /// A captive portal intercepts traffic.
    Portal,
    /// The internet is reachable.
    Full,
}

/// Raw values reported by the network service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawNetworkState {
    /// Global state code.
    pub state: u32,
    /// Connectivity probe code.
    pub connectivity: u32,
    /// Metering code, absent on services that do not report it.
    pub metered: Option<u32>,
}

/// Derived network status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetworkStatus {
    /// Whether a non-local network is available.
    pub available: bool,
    /// Whether the network is believed to be metered.
    pub metered: bool,
    /// Reach of the network.
    pub connectivity: Connectivity,
}

impl NetworkStatus {
    /// Derives the status from raw service values.
    #[must_use]
    pub fn from_raw(raw: RawNetworkState) -> Self {
        if raw.state <= STATE_CONNECTED_LOCAL {
            return Self {
                available: false,
                metered: false,
                connectivity: Connectivity::Local,
            };
        }
        if raw.state <= STATE_CONNECTED_SITE {
            let connectivity = if raw.connectivity == CONNECTIVITY_PORTAL {
                Connectivity::Portal
            } else {
                Connectivity::Limited
            };
            return Self {
                available: true,
                metered: false,
                connectivity,
            };
        }
        Self {
            available: true,
            metered: raw.metered.is_some_and(metered_from_code),
            connectivity: connectivity_from_code(raw.connectivity),
        }
    }
}

/// A single field change announced by [`ConnectivityMonitor::sync`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusChange {
    /// Availability changed.
    Available(bool),
    /// Metering changed.
    Metered(bool),
    /// Connectivity changed.
    Connectivity(Connectivity),
}

type Subscriber = Box<dyn Fn(StatusChange) + Send>;

/// Tracks network status and notifies subscribers of changes.
#[derive(Default)]
pub struct ConnectivityMonitor {
    status: NetworkStatus,
    subscribers: Vec<Subscriber>,
}

impl std::fmt::Debug for ConnectivityMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectivityMonitor")
            .field("status", &self.status)
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

impl ConnectivityMonitor {
    /// Creates a monitor reporting an unavailable local-only network.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current status.
    #[must_use]
    pub const fn status(&self) -> NetworkStatus {
        self.status
    }

    /// Registers `subscriber` for change notifications.
    pub fn subscribe(&mut self, subscriber: impl Fn(StatusChange) + Send + 'static) {
        self.subscribers.push(Box::new(subscriber));
    }

    /// Updates the status without notifying anyone, for initial population.
    pub fn sync_silently(&mut self, raw: RawNetworkState) {
        self.status = NetworkStatus::from_raw(raw);
    }

    /// Updates the status and announces each field that changed.
    pub fn sync(&mut self, raw: RawNetworkState) {
        let next = NetworkStatus::from_raw(raw);
        let previous = std::mem::replace(&mut self.status, next);
        let changes = [
            (previous.available != next.available).then_some(StatusChange::Available(next.available)),
            (previous.metered != next.metered).then_some(StatusChange::Metered(next.metered)),
            (previous.connectivity != next.connectivity)
                .then_some(StatusChange::Connectivity(next.connectivity)),
        ];
        for change in changes.into_iter().flatten() {
            for subscriber in &self.subscribers {
                subscriber(change);
            }
        }
    }
}

fn connectivity_from_code(code: u32) -> Connectivity {
    match code {
        CONNECTIVITY_UNKNOWN | CONNECTIVITY_NONE => Connectivity::Local,
        CONNECTIVITY_PORTAL => Connectivity::Portal,
        CONNECTIVITY_LIMITED => Connectivity::Limited,
        CONNECTIVITY_FULL => Connectivity::Full,
        other => {
            warn!(target: CONNECTIVITY_TARGET, code = other, "unknown connectivity state");
            Connectivity::Local
        }
    }
}

/// Yes and guess-yes are metered. Unknown is treated like no: a machine
/// without the service is assumed unmetered, so one whose service cannot tell
/// is too.
fn metered_from_code(code: u32) -> bool {
    match code {
        1 | 3 => true,
        0 | 2 | 4 => false,
        other => {
            warn!(target: CONNECTIVITY_TARGET, code = other, "unknown metered state");
            false
        }
    }
}
