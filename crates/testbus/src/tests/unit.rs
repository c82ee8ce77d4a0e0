//! Unit tests driving the harness against the stand-in daemon.

use std::ffi::OsString;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, MutexGuard};
use std::thread;
use std::time::Duration;

use rstest::{fixture, rstest};
use testbus_config::HarnessConfig;

use super::support::{
    FAKE_ADDRESS, FakeDaemon, FakeMode, GuardEvent, LifecycleEvent, RecordingGuard,
    RecordingLifecycleReporter, lock_env, process_exists, replace_env, restore_env,
};
use crate::{
    BusState, DaemonError, HarnessError, HarnessFlags, SANDBOX_VARIABLES, SESSION_BUS_ADDRESS_ENV,
    SessionBusError, TestBus, WaitOutcome, forget_session_bus, session_bus,
    session_bus_if_exists,
};

struct Fixture {
    _env: MutexGuard<'static, ()>,
    daemon: FakeDaemon,
    guard: Arc<RecordingGuard>,
    reporter: Arc<RecordingLifecycleReporter>,
}

impl Fixture {
    fn bus(&self, mode: FakeMode) -> TestBus {
        self.bus_with(self.daemon.config(mode))
    }

    fn bus_with(&self, config: HarnessConfig) -> TestBus {
        TestBus::builder(HarnessFlags::NONE)
            .config(config)
            .guard(self.guard.clone())
            .reporter(self.reporter.clone())
            .build()
    }
}

#[fixture]
fn fixture() -> Fixture {
    Fixture {
        _env: lock_env(),
        daemon: FakeDaemon::new(),
        guard: Arc::new(RecordingGuard::default()),
        reporter: Arc::new(RecordingLifecycleReporter::default()),
    }
}

#[rstest]
fn up_exports_the_bus_and_down_reclaims_it(fixture: Fixture) {
    let mut bus = fixture.bus(FakeMode::Address);
    assert_eq!(bus.state(), BusState::Idle);
    assert_eq!(bus.bus_address(), None);

    bus.up();
    let pid = bus.bus_pid().expect("pid while up");
    assert_eq!(bus.state(), BusState::Up);
    assert_eq!(bus.bus_address(), Some(FAKE_ADDRESS));
    assert_eq!(
        std::env::var(SESSION_BUS_ADDRESS_ENV).as_deref(),
        Ok(FAKE_ADDRESS)
    );
    assert!(process_exists(pid));
    assert_eq!(fixture.guard.supervised(), vec![pid]);

    bus.down();
    assert_eq!(bus.state(), BusState::Idle);
    assert_eq!(bus.bus_address(), None);
    assert_eq!(bus.bus_pid(), None);
    assert!(!process_exists(pid), "daemon should be reaped");
    assert_eq!(
        fixture.guard.events(),
        vec![GuardEvent::Track(pid), GuardEvent::Untrack(pid)]
    );
    assert_eq!(
        fixture.reporter.events(),
        vec![
            LifecycleEvent::Starting,
            LifecycleEvent::Ready { pid },
            LifecycleEvent::Stopped { pid },
        ]
    );
}

#[rstest]
fn daemon_receives_service_dirs_in_order(fixture: Fixture) {
    let mut bus = fixture.bus(FakeMode::Address);
    bus.add_service_dir("/srv/services/second");
    bus.add_service_dir("/srv/services/first");
    bus.up();

    let document = fixture.daemon.received_config();
    let second = document
        .find("<servicedir>/srv/services/second</servicedir>")
        .expect("second dir listed");
    let first = document
        .find("<servicedir>/srv/services/first</servicedir>")
        .expect("first dir listed");
    assert!(second < first);
    assert!(document.contains("<type>session</type>"));
    assert_eq!(
        bus.service_dirs(),
        &[
            PathBuf::from("/srv/services/second"),
            PathBuf::from("/srv/services/first")
        ]
    );

    bus.down();
}

#[rstest]
fn configuration_file_is_removed_once_the_address_is_read(fixture: Fixture) {
    let mut bus = fixture.bus(FakeMode::Address);
    bus.up();

    let handed_over = fixture.daemon.received_config_path();
    assert!(handed_over.is_absolute());
    assert!(!handed_over.exists(), "{} should be removed", handed_over.display());

    bus.down();
}

#[rstest]
#[case::garbage(FakeMode::Garbage)]
#[case::blank(FakeMode::Blank)]
#[case::silent(FakeMode::Silent)]
fn bad_addresses_fail_and_reclaim_the_daemon(fixture: Fixture, #[case] mode: FakeMode) {
    let mut bus = fixture.bus(mode);
    let error = bus.try_up().expect_err("start should fail");

    match (mode, &error) {
        (FakeMode::Garbage, HarnessError::Daemon(DaemonError::AddressInvalid { address, .. })) => {
            assert_eq!(address, "not an address");
        }
        (FakeMode::Blank, HarnessError::Daemon(DaemonError::AddressEmpty))
        | (FakeMode::Silent, HarnessError::Daemon(DaemonError::AddressMissing)) => {}
        other => panic!("unexpected outcome {other:?}"),
    }

    assert_eq!(bus.state(), BusState::Idle);
    let events = fixture.guard.events();
    let [GuardEvent::Track(pid), GuardEvent::Untrack(untracked)] = events.as_slice() else {
        panic!("expected track then untrack, got {events:?}");
    };
    assert_eq!(pid, untracked);
    assert!(!process_exists(*pid));
    assert!(matches!(
        fixture.reporter.events().last(),
        Some(LifecycleEvent::Failed(_))
    ));
}

#[rstest]
fn missing_daemon_binary_is_a_spawn_error(fixture: Fixture) {
    let config = HarnessConfig::default().with_daemon_program("/nonexistent/testbus-daemon");
    let mut bus = fixture.bus_with(config);

    let error = bus.try_up().expect_err("start should fail");
    assert!(matches!(
        error,
        HarnessError::Daemon(DaemonError::Spawn { ref program, .. })
            if program == Path::new("/nonexistent/testbus-daemon")
    ));
    assert!(fixture.guard.events().is_empty());
}

#[rstest]
#[should_panic(expected = "failed to start the test bus")]
fn up_panics_when_the_daemon_cannot_start(fixture: Fixture) {
    let mut bus =
        fixture.bus_with(HarnessConfig::default().with_daemon_program("/nonexistent/daemon"));
    bus.up();
}

#[rstest]
fn unsupervised_daemons_are_not_left_running(fixture: Fixture) {
    let mut bus = TestBus::builder(HarnessFlags::NONE)
        .config(fixture.daemon.config(FakeMode::Address))
        .guard(Arc::new(RecordingGuard::refusing()))
        .build();

    let error = bus.try_up().expect_err("start should fail");
    assert!(matches!(
        error,
        HarnessError::Daemon(DaemonError::Watchdog { .. })
    ));
    assert_eq!(bus.state(), BusState::Idle);
}

#[rstest]
fn stop_keeps_the_harness_until_down(fixture: Fixture) {
    let mut bus = fixture.bus(FakeMode::Address);
    bus.up();
    let pid = bus.bus_pid().expect("pid while up");

    bus.stop();
    assert_eq!(bus.state(), BusState::Stopped);
    assert_eq!(bus.bus_address(), None);
    assert_eq!(bus.bus_pid(), None);
    assert!(!process_exists(pid));
    assert!(fixture.guard.supervised().is_empty());

    bus.down();
    assert_eq!(bus.state(), BusState::Idle);
}

#[rstest]
fn the_harness_can_be_reused_after_down(fixture: Fixture) {
    let mut bus = fixture.bus(FakeMode::Address);
    bus.up();
    let first = bus.bus_pid().expect("first pid");
    bus.down();

    bus.up();
    let second = bus.bus_pid().expect("second pid");
    assert_ne!(first, second);
    bus.down();
}

#[rstest]
#[should_panic(expected = "already running")]
fn double_up_panics(fixture: Fixture) {
    let mut bus = fixture.bus(FakeMode::Address);
    bus.up();
    bus.up();
}

#[rstest]
fn adding_service_dirs_after_up_panics_and_keeps_the_list(fixture: Fixture) {
    let mut bus = fixture.bus(FakeMode::Address);
    bus.add_service_dir("/srv/early");
    bus.up();

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| bus.add_service_dir("/srv/late")));

    let payload = outcome.expect_err("adding a directory while up must panic");
    let message = payload
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_default();
    assert!(message.contains("before up()"), "unexpected panic: {message}");
    assert_eq!(bus.service_dirs(), [PathBuf::from("/srv/early")]);
    bus.down();
    assert_eq!(bus.service_dirs(), [PathBuf::from("/srv/early")]);
}

#[rstest]
#[should_panic(expected = "requires a running bus")]
fn stop_without_up_panics(fixture: Fixture) {
    let mut bus = fixture.bus(FakeMode::Address);
    bus.stop();
}

#[rstest]
#[should_panic(expected = "requires a running bus")]
fn stopping_twice_panics(fixture: Fixture) {
    let mut bus = fixture.bus(FakeMode::Address);
    bus.up();
    bus.stop();
    bus.stop();
}

#[rstest]
#[should_panic(expected = "started with up()")]
fn down_while_idle_panics(fixture: Fixture) {
    let mut bus = fixture.bus(FakeMode::Address);
    bus.down();
}

fn managed_environment() -> Vec<(&'static str, Option<OsString>)> {
    SANDBOX_VARIABLES
        .iter()
        .map(|key| (*key, std::env::var_os(key)))
        .collect()
}

#[rstest]
fn down_restores_the_previous_environment(fixture: Fixture) {
    let outer = [
        (SESSION_BUS_ADDRESS_ENV, Some("unix:path=/tmp/outer")),
        ("DISPLAY", Some(":42")),
        ("DBUS_STARTER_ADDRESS", None),
        ("DBUS_STARTER_BUS_TYPE", Some("session")),
        ("XDG_RUNTIME_DIR", None),
    ];
    let saved: Vec<_> = outer
        .iter()
        .map(|(key, value)| (*key, replace_env(key, *value)))
        .collect();
    let before = managed_environment();
    assert_eq!(before.len(), SANDBOX_VARIABLES.len());

    let mut bus = fixture.bus(FakeMode::Address);
    bus.up();
    for key in SANDBOX_VARIABLES.iter().filter(|key| **key != SESSION_BUS_ADDRESS_ENV) {
        assert!(std::env::var_os(key).is_none(), "{key} is cleared while up");
    }
    assert_eq!(
        std::env::var(SESSION_BUS_ADDRESS_ENV).as_deref(),
        Ok(FAKE_ADDRESS)
    );
    bus.down();

    assert_eq!(managed_environment(), before);

    for (key, value) in saved.into_iter().rev() {
        restore_env(key, value);
    }
}

#[rstest]
fn unset_environment_is_idempotent(fixture: Fixture) {
    let saved: Vec<_> = SANDBOX_VARIABLES
        .iter()
        .map(|key| (*key, replace_env(key, Some("leak"))))
        .collect();

    TestBus::unset_environment();
    TestBus::unset_environment();
    for key in SANDBOX_VARIABLES {
        assert!(std::env::var_os(key).is_none(), "{key} should be unset");
    }

    for (key, value) in saved {
        restore_env(key, value);
    }
    drop(fixture);
}

#[rstest]
fn released_session_connection_completes_teardown(fixture: Fixture) {
    let mut bus = fixture.bus(FakeMode::Address);
    bus.up();

    let connection = session_bus().expect("session bus resolves");
    assert_eq!(connection.address().as_str(), FAKE_ADDRESS);
    assert!(connection.exit_on_close());
    let again = session_bus().expect("session bus resolves");
    assert!(Arc::ptr_eq(&connection, &again));
    drop(again);
    drop(connection);

    bus.down();
    assert!(session_bus_if_exists().is_none());
    assert!(
        !fixture
            .reporter
            .events()
            .iter()
            .any(|event| matches!(event, LifecycleEvent::Teardown(_))),
        "no live connection means no teardown wait"
    );
}

#[rstest]
fn teardown_waits_for_a_connection_released_late(fixture: Fixture) {
    let mut bus = fixture.bus(FakeMode::Address);
    bus.up();
    let connection = session_bus().expect("session bus resolves");
    let holder = Arc::clone(&connection);
    drop(connection);
    let releaser = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        assert!(!holder.exit_on_close(), "down() disables exit-on-close");
        drop(holder);
    });

    bus.down();
    releaser.join().expect("releaser thread");

    assert_eq!(
        fixture.reporter.events().last(),
        Some(&LifecycleEvent::Teardown(WaitOutcome::Released))
    );
}

#[rstest]
fn leaked_session_connection_times_out(fixture: Fixture) {
    let config = fixture
        .daemon
        .config(FakeMode::Address)
        .with_teardown_timeout(Duration::from_millis(100));
    let mut bus = fixture.bus_with(config);
    bus.up();
    let leaked = session_bus().expect("session bus resolves");

    bus.down();

    assert_eq!(
        fixture.reporter.events().last(),
        Some(&LifecycleEvent::Teardown(WaitOutcome::TimedOut {
            strong_count: 1
        }))
    );
    assert!(!leaked.exit_on_close());
    assert!(session_bus_if_exists().is_none(), "registry is cleared");
}

#[rstest]
fn dropping_a_running_harness_tears_it_down(fixture: Fixture) {
    let outer = replace_env(SESSION_BUS_ADDRESS_ENV, None);
    let mut bus = fixture.bus(FakeMode::Address);
    bus.up();
    let pid = bus.bus_pid().expect("pid while up");

    drop(bus);

    assert!(!process_exists(pid));
    assert!(std::env::var_os(SESSION_BUS_ADDRESS_ENV).is_none());
    assert!(fixture.guard.supervised().is_empty());
    restore_env(SESSION_BUS_ADDRESS_ENV, outer);
}

#[rstest]
fn monitor_is_supervised_and_reaped_by_down(fixture: Fixture) {
    let mut bus = fixture.bus_with(fixture.daemon.config_with_monitor(FakeMode::Address));
    bus.up();
    let pid = bus.bus_pid().expect("pid while up");
    let monitor = bus.monitor_pid().expect("monitor attached");

    assert!(process_exists(monitor), "monitor accepted its address");
    let supervised = fixture.guard.supervised();
    assert_eq!(supervised.len(), 2, "daemon and monitor: {supervised:?}");
    assert!(supervised.contains(&pid));
    assert!(supervised.contains(&monitor));

    bus.down();
    assert_eq!(bus.monitor_pid(), None);
    assert!(!process_exists(monitor), "monitor is reaped by down()");
    assert!(fixture.guard.supervised().is_empty());
}

#[rstest]
fn monitor_spawn_failure_is_not_fatal(fixture: Fixture) {
    let config = fixture
        .daemon
        .config(FakeMode::Address)
        .with_monitor(true)
        .with_monitor_program("/nonexistent/testbus-monitor");
    let mut bus = fixture.bus_with(config);
    bus.up();

    assert_eq!(bus.monitor_pid(), None);
    assert_eq!(fixture.guard.supervised().len(), 1);
    bus.down();
}

#[test]
fn flags_default_to_none() {
    let bus = TestBus::new(HarnessFlags::NONE);
    assert_eq!(bus.flags(), HarnessFlags::NONE);
    assert!(HarnessFlags::default().contains(HarnessFlags::NONE));
    assert_eq!(HarnessFlags::NONE.bits(), 0);
    assert!(bus.service_dirs().is_empty());
}

#[rstest]
fn session_bus_requires_an_exported_address(fixture: Fixture) {
    let previous = replace_env(SESSION_BUS_ADDRESS_ENV, None);
    forget_session_bus();

    let error = session_bus().expect_err("no address is exported");
    assert!(matches!(error, SessionBusError::AddressUnset));

    restore_env(SESSION_BUS_ADDRESS_ENV, previous);
    drop(fixture);
}

#[rstest]
fn session_bus_rejects_unparsable_addresses(fixture: Fixture) {
    let previous = replace_env(SESSION_BUS_ADDRESS_ENV, Some("carrier-pigeon:coop=3"));
    forget_session_bus();

    let error = session_bus().expect_err("address is invalid");
    assert!(matches!(error, SessionBusError::AddressInvalid { .. }));

    restore_env(SESSION_BUS_ADDRESS_ENV, previous);
    drop(fixture);
}

#[rstest]
fn forgetting_the_session_bus_starts_afresh(fixture: Fixture) {
    let previous = replace_env(SESSION_BUS_ADDRESS_ENV, Some(FAKE_ADDRESS));
    forget_session_bus();

    let first = session_bus().expect("session bus resolves");
    forget_session_bus();
    assert!(session_bus_if_exists().is_none());
    let second = session_bus().expect("session bus resolves");
    assert!(!Arc::ptr_eq(&first, &second));

    drop((first, second));
    forget_session_bus();
    restore_env(SESSION_BUS_ADDRESS_ENV, previous);
    drop(fixture);
}

#[rstest]
fn unbounded_teardown_timeouts_still_complete(fixture: Fixture) {
    let config = fixture
        .daemon
        .config(FakeMode::Address)
        .with_teardown_timeout(Duration::MAX);
    let mut bus = fixture.bus_with(config);
    bus.up();
    let connection = session_bus().expect("session bus resolves");
    let holder = Arc::clone(&connection);
    drop(connection);
    let releaser = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        drop(holder);
    });

    bus.down();
    releaser.join().expect("releaser thread");

    assert_eq!(
        fixture.reporter.events().last(),
        Some(&LifecycleEvent::Teardown(WaitOutcome::Released))
    );
}
