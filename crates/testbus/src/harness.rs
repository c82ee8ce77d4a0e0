//! The lifecycle controller tests interact with.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use testbus_config::{ConfigLoader, HarnessConfig, StaticConfigLoader, SystemConfigLoader};
use testbus_watchdog::{ProcessGuard, WatchdogError, platform_guard};
use tracing::debug;

use crate::daemon::BusDaemon;
use crate::environment::{self, EnvSnapshot};
use crate::error::HarnessError;
use crate::flags::HarnessFlags;
use crate::reporter::{LifecycleReporter, StructuredLifecycleReporter};
use crate::session::{forget_session_bus, session_bus_if_exists};
use crate::teardown::wait_for_sole_owner;
use crate::telemetry;

const HARNESS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::harness");

/// Where a [`TestBus`] is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusState {
    /// Not started, or fully torn down.
    Idle,
    /// The daemon is running and exported.
    Up,
    /// The daemon was stopped; [`TestBus::down`] has not run yet.
    Stopped,
}

/// An isolated message bus for the duration of a test.
///
/// ```rust,ignore
/// let mut bus = TestBus::new(HarnessFlags::NONE);
/// bus.add_service_dir(env!("CARGO_MANIFEST_DIR").to_owned() + "/services");
/// bus.up();
/// // DBUS_SESSION_BUS_ADDRESS now points at the private bus.
/// bus.down();
/// ```
///
/// Lifecycle methods take `&mut self`; a harness is driven from one place at
/// a time. Dropping a harness that is not idle tears it down.
pub struct TestBus {
    flags: HarnessFlags,
    loader: Box<dyn ConfigLoader>,
    guard: Option<Arc<dyn ProcessGuard>>,
    reporter: Arc<dyn LifecycleReporter>,
    service_dirs: Vec<PathBuf>,
    state: BusState,
    daemon: Option<BusDaemon>,
    environment: Option<EnvSnapshot>,
    teardown_timeout: Duration,
}

impl std::fmt::Debug for TestBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestBus")
            .field("flags", &self.flags)
            .field("service_dirs", &self.service_dirs)
            .field("state", &self.state)
            .field("daemon", &self.daemon)
            .finish_non_exhaustive()
    }
}

impl TestBus {
    /// Creates an idle harness whose configuration is loaded on [`Self::up`].
    #[must_use]
    pub fn new(flags: HarnessFlags) -> Self {
        Self::builder(flags).build()
    }

    /// Starts building a harness with injected collaborators.
    #[must_use]
    pub fn builder(flags: HarnessFlags) -> TestBusBuilder {
        TestBusBuilder::new(flags)
    }

    /// Removes the variables that could leak a desktop session into tests.
    pub fn unset_environment() {
        environment::unset_environment();
    }

    /// Flags given at construction.
    #[must_use]
    pub const fn flags(&self) -> HarnessFlags {
        self.flags
    }

    /// Address of the running bus; `None` unless the state is [`BusState::Up`].
    #[must_use]
    pub fn bus_address(&self) -> Option<&str> {
        self.daemon
            .as_ref()
            .map(|daemon| daemon.address().as_str())
    }

    /// Pid of the running daemon; `None` unless the state is [`BusState::Up`].
    #[must_use]
    pub fn bus_pid(&self) -> Option<u32> {
        self.daemon.as_ref().map(BusDaemon::pid)
    }

    /// Pid of the attached bus monitor, if monitoring is enabled and the
    /// monitor started.
    #[must_use]
    pub fn monitor_pid(&self) -> Option<u32> {
        self.daemon.as_ref().and_then(BusDaemon::monitor_pid)
    }

    /// Service directories in the order they were added.
    #[must_use]
    pub fn service_dirs(&self) -> &[PathBuf] {
        &self.service_dirs
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> BusState {
        self.state
    }

    /// Adds a directory the daemon searches for activatable services.
    ///
    /// # Panics
    ///
    /// Panics unless the harness is idle.
    pub fn add_service_dir(&mut self, path: impl Into<PathBuf>) {
        assert!(
            self.state == BusState::Idle,
            "service directories can only be added before up()"
        );
        self.service_dirs.push(path.into());
    }

    /// Starts the daemon and exports its address.
    ///
    /// # Panics
    ///
    /// Panics unless the harness is idle, or when the daemon cannot be
    /// started. Use [`Self::try_up`] to handle start failures.
    pub fn up(&mut self) {
        if let Err(error) = self.try_up() {
            panic!("failed to start the test bus: {error}");
        }
    }

    /// Starts the daemon and exports its address, returning start failures.
    ///
    /// On success the sandbox variables are cleared and
    /// `DBUS_SESSION_BUS_ADDRESS` names the new bus. The previous values are
    /// restored by [`Self::down`].
    ///
    /// # Errors
    ///
    /// Returns a [`HarnessError`] when configuration, telemetry, supervision
    /// or the daemon fail. The harness stays idle.
    ///
    /// # Panics
    ///
    /// Panics unless the harness is idle.
    pub fn try_up(&mut self) -> Result<(), HarnessError> {
        assert!(
            self.state == BusState::Idle,
            "the test bus is already running; call down() first"
        );
        let config = self.loader.load()?;
        if config.log_filter().is_some() {
            telemetry::initialise(&config)?;
        }
        let guard = self
            .guard
            .as_ref()
            .map_or_else(shared_platform_guard, |guard| Ok(Arc::clone(guard)))?;

        self.reporter.bus_starting(config.daemon_program());
        let daemon = BusDaemon::start(&config, &self.service_dirs, guard).inspect_err(|error| {
            self.reporter.bus_failed(error);
        })?;

        self.environment = Some(EnvSnapshot::capture());
        environment::unset_environment();
        environment::export_session_address(daemon.address().as_str());
        self.reporter
            .bus_ready(daemon.pid(), daemon.address().as_str());
        self.teardown_timeout = config.teardown_timeout();
        self.daemon = Some(daemon);
        self.state = BusState::Up;
        Ok(())
    }

    /// Stops the daemon without tearing down the harness.
    ///
    /// Lets a test observe how clients react to losing the bus. Call
    /// [`Self::down`] afterwards.
    ///
    /// # Panics
    ///
    /// Panics unless the bus is up.
    pub fn stop(&mut self) {
        assert!(
            self.state == BusState::Up,
            "stop() requires a running bus; call up() first"
        );
        self.stop_daemon();
        self.state = BusState::Stopped;
    }

    /// Stops the daemon if needed, waits for the session connection to be
    /// released, and restores the environment.
    ///
    /// # Panics
    ///
    /// Panics when the harness is idle.
    pub fn down(&mut self) {
        assert!(
            self.state != BusState::Idle,
            "down() requires a bus started with up()"
        );
        self.teardown();
    }

    fn stop_daemon(&mut self) {
        if let Some(daemon) = self.daemon.take() {
            let pid = daemon.pid();
            daemon.stop();
            self.reporter.bus_stopped(pid);
        }
    }

    fn teardown(&mut self) {
        let connection = session_bus_if_exists();
        if let Some(shared) = connection.as_ref() {
            shared.set_exit_on_close(false);
        }
        self.stop_daemon();
        if let Some(shared) = connection {
            let outcome = wait_for_sole_owner(shared, self.teardown_timeout);
            self.reporter.teardown_finished(outcome);
        }
        if let Some(snapshot) = self.environment.take() {
            snapshot.restore();
        }
        forget_session_bus();
        self.state = BusState::Idle;
        debug!(target: HARNESS_TARGET, "test bus torn down");
    }
}

impl Drop for TestBus {
    fn drop(&mut self) {
        if self.state != BusState::Idle {
            self.teardown();
        }
    }
}

fn shared_platform_guard() -> Result<Arc<dyn ProcessGuard>, WatchdogError> {
    platform_guard().map(|guard| Arc::new(guard) as Arc<dyn ProcessGuard>)
}

/// Builder for [`TestBus`] with injectable configuration, supervision and
/// reporting.
pub struct TestBusBuilder {
    flags: HarnessFlags,
    loader: Box<dyn ConfigLoader>,
    guard: Option<Arc<dyn ProcessGuard>>,
    reporter: Arc<dyn LifecycleReporter>,
}

impl std::fmt::Debug for TestBusBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestBusBuilder")
            .field("flags", &self.flags)
            .field("custom_guard", &self.guard.is_some())
            .finish_non_exhaustive()
    }
}

impl TestBusBuilder {
    fn new(flags: HarnessFlags) -> Self {
        Self {
            flags,
            loader: Box::new(SystemConfigLoader),
            guard: None,
            reporter: Arc::new(StructuredLifecycleReporter::new()),
        }
    }

    /// Uses `config` instead of loading one from the environment.
    #[must_use]
    pub fn config(self, config: HarnessConfig) -> Self {
        self.config_loader(StaticConfigLoader::new(config))
    }

    /// Uses `loader` to resolve the configuration on each start.
    #[must_use]
    pub fn config_loader(mut self, loader: impl ConfigLoader + 'static) -> Self {
        self.loader = Box::new(loader);
        self
    }

    /// Supervises daemons with `guard` instead of the process-wide guard.
    #[must_use]
    pub fn guard(mut self, guard: Arc<dyn ProcessGuard>) -> Self {
        self.guard = Some(guard);
        self
    }

    /// Sends lifecycle events to `reporter`.
    #[must_use]
    pub fn reporter(mut self, reporter: Arc<dyn LifecycleReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Builds an idle harness.
    #[must_use]
    pub fn build(self) -> TestBus {
        TestBus {
            flags: self.flags,
            loader: self.loader,
            guard: self.guard,
            reporter: self.reporter,
            service_dirs: Vec::new(),
            state: BusState::Idle,
            daemon: None,
            environment: None,
            teardown_timeout: testbus_config::DEFAULT_TEARDOWN_TIMEOUT,
        }
    }
}
