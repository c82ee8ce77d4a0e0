//! Test double for [`LifecycleReporter`] that records events for assertions.

use std::path::Path;
use std::sync::Mutex;

use crate::error::DaemonError;
use crate::reporter::LifecycleReporter;
use crate::teardown::WaitOutcome;

/// Lifecycle events tracked during scenarios.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// The daemon was about to start.
    Starting,
    /// The daemon printed its address.
    Ready {
        /// Daemon pid.
        pid: u32,
    },
    /// The daemon failed to start.
    Failed(String),
    /// The daemon was stopped.
    Stopped {
        /// Daemon pid.
        pid: u32,
    },
    /// The teardown wait finished.
    Teardown(WaitOutcome),
}

/// Records lifecycle events.
#[derive(Debug, Default)]
pub struct RecordingLifecycleReporter {
    events: Mutex<Vec<LifecycleEvent>>,
}

impl RecordingLifecycleReporter {
    /// Captures a copy of the recorded events.
    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events
            .lock()
            .expect("lifecycle reporter mutex poisoned")
            .clone()
    }

    fn record(&self, event: LifecycleEvent) {
        self.events
            .lock()
            .expect("lifecycle reporter mutex poisoned")
            .push(event);
    }
}

impl LifecycleReporter for RecordingLifecycleReporter {
    fn bus_starting(&self, _program: &Path) {
        self.record(LifecycleEvent::Starting);
    }

    fn bus_ready(&self, pid: u32, _address: &str) {
        self.record(LifecycleEvent::Ready { pid });
    }

    fn bus_failed(&self, error: &DaemonError) {
        self.record(LifecycleEvent::Failed(error.to_string()));
    }

    fn bus_stopped(&self, pid: u32) {
        self.record(LifecycleEvent::Stopped { pid });
    }

    fn teardown_finished(&self, outcome: WaitOutcome) {
        self.record(LifecycleEvent::Teardown(outcome));
    }
}
