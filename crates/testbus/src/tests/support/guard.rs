//! Test double for [`ProcessGuard`] that records supervision requests.

use std::sync::Mutex;

use testbus_watchdog::{ProcessGuard, WatchdogError};

/// Supervision requests seen by [`RecordingGuard`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardEvent {
    /// `track(pid)` was called.
    Track(u32),
    /// `untrack(pid)` was called.
    Untrack(u32),
}

/// Records requests; optionally refuses to track.
#[derive(Debug, Default)]
pub struct RecordingGuard {
    events: Mutex<Vec<GuardEvent>>,
    refuse_tracking: bool,
}

impl RecordingGuard {
    /// A guard whose `track` always fails.
    pub fn refusing() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            refuse_tracking: true,
        }
    }

    /// Every request in call order.
    pub fn events(&self) -> Vec<GuardEvent> {
        self.events.lock().expect("guard mutex poisoned").clone()
    }

    /// Pids tracked and not yet untracked.
    pub fn supervised(&self) -> Vec<u32> {
        let mut live = Vec::new();
        for event in self.events() {
            match event {
                GuardEvent::Track(pid) => live.push(pid),
                GuardEvent::Untrack(pid) => live.retain(|tracked| *tracked != pid),
            }
        }
        live
    }

    fn record(&self, event: GuardEvent) {
        self.events.lock().expect("guard mutex poisoned").push(event);
    }
}

impl ProcessGuard for RecordingGuard {
    fn track(&self, pid: u32) -> Result<(), WatchdogError> {
        if self.refuse_tracking {
            return Err(WatchdogError::Closed);
        }
        self.record(GuardEvent::Track(pid));
        Ok(())
    }

    fn untrack(&self, pid: u32) -> Result<(), WatchdogError> {
        self.record(GuardEvent::Untrack(pid));
        Ok(())
    }
}
