//! Fixed-capacity set of supervised pids.

use thiserror::Error;

/// Maximum number of processes a single helper can supervise.
pub const REGISTRY_CAPACITY: usize = 1024;

/// Returned when the registry has no room for another pid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("watchdog registry is full; pid {pid} is not supervised")]
pub struct RegistryFull {
    /// Pid that could not be added.
    pub pid: u32,
}

/// Result of a successful [`PidRegistry::insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insertion {
    /// The pid was not tracked before.
    Added,
    /// The pid was already tracked; nothing changed.
    AlreadyTracked,
}

/// Set of tracked pids stored inline.
///
/// The registry never allocates, so the helper can keep it on its stack after
/// `fork`. Each pid appears at most once, which means it is signalled at most
/// once when the owner disappears.
#[derive(Debug)]
pub struct PidRegistry {
    pids: [u32; REGISTRY_CAPACITY],
    len: usize,
}

impl Default for PidRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PidRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            pids: [0; REGISTRY_CAPACITY],
            len: 0,
        }
    }

    /// Starts tracking `pid`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryFull`] when [`REGISTRY_CAPACITY`] pids are already
    /// tracked.
    pub fn insert(&mut self, pid: u32) -> Result<Insertion, RegistryFull> {
        if self.contains(pid) {
            return Ok(Insertion::AlreadyTracked);
        }
        let slot = self.pids.get_mut(self.len).ok_or(RegistryFull { pid })?;
        *slot = pid;
        self.len += 1;
        Ok(Insertion::Added)
    }

    /// Stops tracking `pid`, returning whether it was tracked.
    pub fn remove(&mut self, pid: u32) -> bool {
        let Some(position) = self.tracked().iter().position(|tracked| *tracked == pid) else {
            return false;
        };
        let last = self.len - 1;
        self.pids.swap(position, last);
        self.len = last;
        true
    }

    /// Whether `pid` is currently tracked.
    #[must_use]
    pub fn contains(&self, pid: u32) -> bool {
        self.tracked().contains(&pid)
    }

    /// Tracked pids, in no particular order.
    #[must_use]
    pub fn tracked(&self) -> &[u32] {
        self.pids.get(..self.len).unwrap_or_default()
    }

    /// Number of tracked pids.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether nothing is tracked.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }
}
