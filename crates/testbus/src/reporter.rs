//! Structured reporting for harness lifecycle events.

use std::path::Path;
use std::sync::Arc;

use crate::error::DaemonError;
use crate::teardown::WaitOutcome;

const LIFECYCLE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::lifecycle");

/// Observer trait used to surface lifecycle events to telemetry sinks.
pub trait LifecycleReporter: Send + Sync {
    /// Invoked before the daemon is spawned.
    fn bus_starting(&self, program: &Path);

    /// Invoked once the daemon has printed its address.
    fn bus_ready(&self, pid: u32, address: &str);

    /// Invoked when the daemon fails to start.
    fn bus_failed(&self, error: &DaemonError);

    /// Invoked after the daemon has been terminated and reaped.
    fn bus_stopped(&self, pid: u32);

    /// Invoked after the teardown wait on the session connection.
    fn teardown_finished(&self, outcome: WaitOutcome);
}

impl<T> LifecycleReporter for Arc<T>
where
    T: LifecycleReporter,
{
    fn bus_starting(&self, program: &Path) {
        (**self).bus_starting(program);
    }

    fn bus_ready(&self, pid: u32, address: &str) {
        (**self).bus_ready(pid, address);
    }

    fn bus_failed(&self, error: &DaemonError) {
        (**self).bus_failed(error);
    }

    fn bus_stopped(&self, pid: u32) {
        (**self).bus_stopped(pid);
    }

    fn teardown_finished(&self, outcome: WaitOutcome) {
        (**self).teardown_finished(outcome);
    }
}

/// Default reporter that records lifecycle events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredLifecycleReporter;

impl StructuredLifecycleReporter {
    /// Builds a new reporter.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl LifecycleReporter for StructuredLifecycleReporter {
    fn bus_starting(&self, program: &Path) {
        tracing::info!(
            target: LIFECYCLE_TARGET,
            event = "bus_starting",
            program = %program.display(),
            "starting bus daemon"
        );
    }

    fn bus_ready(&self, pid: u32, address: &str) {
        tracing::info!(
            target: LIFECYCLE_TARGET,
            event = "bus_ready",
            pid,
            address,
            "bus daemon ready"
        );
    }

    fn bus_failed(&self, error: &DaemonError) {
        tracing::error!(
            target: LIFECYCLE_TARGET,
            event = "bus_failed",
            error = %error,
            "bus daemon failed to start"
        );
    }

    fn bus_stopped(&self, pid: u32) {
        tracing::info!(
            target: LIFECYCLE_TARGET,
            event = "bus_stopped",
            pid,
            "bus daemon stopped"
        );
    }

    fn teardown_finished(&self, outcome: WaitOutcome) {
        match outcome {
            WaitOutcome::Released => tracing::info!(
                target: LIFECYCLE_TARGET,
                event = "teardown_finished",
                "session connection released"
            ),
            WaitOutcome::TimedOut { strong_count } => tracing::warn!(
                target: LIFECYCLE_TARGET,
                event = "teardown_finished",
                strong_count,
                "session connection still referenced after teardown"
            ),
        }
    }
}
