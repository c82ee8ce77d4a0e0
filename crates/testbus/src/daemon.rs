//! Spawning, supervising and stopping the bus daemon.
//!
//! The daemon is told to print its bound address on a dedicated descriptor.
//! The harness blocks on that descriptor until one line arrives, so a test
//! never races the daemon's startup.

use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tempfile::NamedTempFile;
use testbus_config::HarnessConfig;
use testbus_watchdog::ProcessGuard;
use tracing::{debug, info, warn};

use crate::address::BusAddress;
use crate::busconfig;
use crate::error::DaemonError;

const DAEMON_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::daemon");

/// Time given to a monitor to attach before tests send traffic.
pub const MONITOR_SETTLE_DELAY: Duration = Duration::from_millis(500);

/// A running, supervised bus daemon.
///
/// Dropping the value stops the daemon, so it cannot outlive its owner even
/// when [`BusDaemon::stop`] is never reached.
pub struct BusDaemon {
    child: Option<Child>,
    pid: u32,
    address: BusAddress,
    monitor: Option<Child>,
    guard: Arc<dyn ProcessGuard>,
}

impl std::fmt::Debug for BusDaemon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusDaemon")
            .field("pid", &self.pid)
            .field("address", &self.address)
            .field("running", &self.child.is_some())
            .field("monitor", &self.monitor.as_ref().map(Child::id))
            .finish_non_exhaustive()
    }
}

impl BusDaemon {
    /// Starts a daemon serving `service_dirs` and waits for its address.
    ///
    /// The daemon is registered with `guard` before the address is read, so
    /// it is reclaimed even if the owner dies while waiting.
    ///
    /// # Errors
    ///
    /// Returns a [`DaemonError`] when the configuration cannot be written,
    /// the daemon cannot be spawned or supervised, or it does not print a
    /// valid address. Any started process is terminated and reaped first.
    pub fn start(
        config: &HarnessConfig,
        service_dirs: &[PathBuf],
        guard: Arc<dyn ProcessGuard>,
    ) -> Result<Self, DaemonError> {
        let config_file = write_config(config, service_dirs)?;
        let mut command = Command::new(config.daemon_program());
        command.args(config.daemon_args()).stdin(Stdio::null());
        let (mut child, reader) = spawn_with_address_channel(command, config_file.path())
            .map_err(|error| match error {
                SpawnFailure::Channel(source) => DaemonError::AddressChannel { source },
                SpawnFailure::Spawn(source) => DaemonError::Spawn {
                    program: config.daemon_program().to_path_buf(),
                    source,
                },
            })?;
        let pid = child.id();

        if let Err(source) = guard.track(pid) {
            reap(&mut child);
            return Err(DaemonError::Watchdog { source });
        }
        debug!(target: DAEMON_TARGET, pid, "bus daemon spawned");

        let address = match read_address(reader) {
            Ok(address) => address,
            Err(error) => {
                reap(&mut child);
                untrack(guard.as_ref(), pid);
                return Err(error);
            }
        };
        drop(config_file);
        info!(
            target: DAEMON_TARGET,
            pid,
            address = %address,
            "bus daemon listening"
        );

        let monitor = if config.monitor() {
            spawn_monitor(config, &address, guard.as_ref())
        } else {
            None
        };

        Ok(Self {
            child: Some(child),
            pid,
            address,
            monitor,
            guard,
        })
    }

    /// Pid of the daemon process.
    #[must_use]
    pub const fn pid(&self) -> u32 {
        self.pid
    }

    /// Address the daemon printed.
    #[must_use]
    pub const fn address(&self) -> &BusAddress {
        &self.address
    }

    /// Pid of the attached monitor, if one is running.
    #[must_use]
    pub fn monitor_pid(&self) -> Option<u32> {
        self.monitor.as_ref().map(Child::id)
    }

    /// Terminates, deregisters and reaps the daemon and its monitor.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(mut monitor) = self.monitor.take() {
            terminate(&mut monitor, self.guard.as_ref());
        }
        if let Some(mut child) = self.child.take() {
            terminate(&mut child, self.guard.as_ref());
            info!(target: DAEMON_TARGET, pid = self.pid, "bus daemon stopped");
        }
    }
}

impl Drop for BusDaemon {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn write_config(
    config: &HarnessConfig,
    service_dirs: &[PathBuf],
) -> Result<NamedTempFile, DaemonError> {
    let document = busconfig::render(config.listen_address(), service_dirs);
    let mut builder = tempfile::Builder::new();
    builder.prefix("testbus-").suffix(".conf");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        builder.permissions(std::fs::Permissions::from_mode(0o600));
    }
    let mut file = builder
        .tempfile()
        .map_err(|source| DaemonError::ConfigWrite { source })?;
    file.write_all(document.as_bytes())
        .and_then(|()| file.flush())
        .map_err(|source| DaemonError::ConfigWrite { source })?;
    debug!(
        target: DAEMON_TARGET,
        file = %file.path().display(),
        "bus configuration written"
    );
    Ok(file)
}

enum SpawnFailure {
    Channel(io::Error),
    Spawn(io::Error),
}

#[cfg(unix)]
type AddressReader = std::io::PipeReader;
#[cfg(not(unix))]
type AddressReader = std::process::ChildStdout;

/// Spawns the daemon with a private pipe for its address.
///
/// Only the daemon inherits the write end: it is close-on-exec everywhere
/// else and the flag is cleared in the daemon between `fork` and `exec`.
#[cfg(unix)]
fn spawn_with_address_channel(
    mut command: Command,
    config_path: &Path,
) -> Result<(Child, AddressReader), SpawnFailure> {
    use std::os::fd::AsRawFd;
    use std::os::unix::process::CommandExt;

    let (reader, writer) = io::pipe().map_err(SpawnFailure::Channel)?;
    let write_fd = writer.as_raw_fd();
    command
        .arg(format!("--print-address={write_fd}"))
        .arg(config_file_arg(config_path));
    // SAFETY: the hook only calls `fcntl`, which is async-signal-safe.
    unsafe {
        command.pre_exec(move || {
            let flags = libc::fcntl(write_fd, libc::F_GETFD);
            if flags < 0 || libc::fcntl(write_fd, libc::F_SETFD, flags & !libc::FD_CLOEXEC) < 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }
    let child = command.spawn().map_err(SpawnFailure::Spawn)?;
    drop(writer);
    Ok((child, reader))
}

#[cfg(not(unix))]
fn spawn_with_address_channel(
    mut command: Command,
    config_path: &Path,
) -> Result<(Child, AddressReader), SpawnFailure> {
    command
        .arg("--print-address=1")
        .arg(config_file_arg(config_path))
        .stdout(Stdio::piped());
    let mut child = command.spawn().map_err(SpawnFailure::Spawn)?;
    let Some(stdout) = child.stdout.take() else {
        reap(&mut child);
        return Err(SpawnFailure::Channel(io::Error::from(
            io::ErrorKind::BrokenPipe,
        )));
    };
    Ok((child, stdout))
}

fn config_file_arg(path: &Path) -> std::ffi::OsString {
    let mut arg = std::ffi::OsString::from("--config-file=");
    arg.push(path.as_os_str());
    arg
}

fn read_address(reader: AddressReader) -> Result<BusAddress, DaemonError> {
    let mut line = String::new();
    let read = BufReader::new(reader)
        .read_line(&mut line)
        .map_err(|source| DaemonError::AddressRead { source })?;
    if read == 0 {
        return Err(DaemonError::AddressMissing);
    }
    let trimmed = line.trim_end_matches(['\n', '\r']);
    if trimmed.is_empty() {
        return Err(DaemonError::AddressEmpty);
    }
    trimmed
        .parse::<BusAddress>()
        .map_err(|source| DaemonError::AddressInvalid {
            address: trimmed.to_owned(),
            source,
        })
}

fn spawn_monitor(
    config: &HarnessConfig,
    address: &BusAddress,
    guard: &dyn ProcessGuard,
) -> Option<Child> {
    let program = config.monitor_program();
    let spawned = Command::new(program)
        .args(config.monitor_args())
        .arg("--address")
        .arg(address.as_str())
        .stdin(Stdio::null())
        .spawn();
    let mut monitor = match spawned {
        Ok(monitor) => monitor,
        Err(error) => {
            warn!(
                target: DAEMON_TARGET,
                program = %program.display(),
                error = %error,
                "failed to spawn bus monitor"
            );
            return None;
        }
    };
    if let Err(error) = guard.track(monitor.id()) {
        warn!(
            target: DAEMON_TARGET,
            pid = monitor.id(),
            error = %error,
            "bus monitor is not supervised; stopping it"
        );
        reap(&mut monitor);
        return None;
    }
    info!(target: DAEMON_TARGET, pid = monitor.id(), "bus monitor attached");
    thread::sleep(MONITOR_SETTLE_DELAY);
    Some(monitor)
}

/// Requests termination, deregisters, and reaps `child`.
fn terminate(child: &mut Child, guard: &dyn ProcessGuard) {
    let pid = child.id();
    if let Err(error) = request_termination(child) {
        warn!(
            target: DAEMON_TARGET,
            pid,
            error = %error,
            "failed to signal process; it may already have exited"
        );
    }
    untrack(guard, pid);
    if let Err(error) = child.wait() {
        warn!(target: DAEMON_TARGET, pid, error = %error, "failed to reap process");
    }
}

#[cfg(unix)]
fn request_termination(child: &Child) -> io::Result<()> {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let raw = i32::try_from(child.id()).map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;
    kill(Pid::from_raw(raw), Signal::SIGTERM).map_err(io::Error::from)
}

#[cfg(not(unix))]
fn request_termination(child: &mut Child) -> io::Result<()> {
    child.kill()
}

/// Kills and reaps a child that never became usable.
fn reap(child: &mut Child) {
    if let Err(error) = child.kill() {
        debug!(target: DAEMON_TARGET, pid = child.id(), error = %error, "kill failed");
    }
    if let Err(error) = child.wait() {
        warn!(target: DAEMON_TARGET, pid = child.id(), error = %error, "failed to reap process");
    }
}

fn untrack(guard: &dyn ProcessGuard, pid: u32) {
    if let Err(error) = guard.untrack(pid) {
        warn!(target: DAEMON_TARGET, pid, error = %error, "failed to stop supervising process");
    }
}
