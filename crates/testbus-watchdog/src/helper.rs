//! Unix guard backed by a forked helper process.
//!
//! The helper is forked from a process that may already run many threads, so
//! everything it executes after `fork` is restricted to async-signal-safe
//! calls: raw `read`, `write`, `kill`, `close` and `_exit`, with state held in
//! fixed-size stack buffers.

use std::fmt::Write as _;
use std::io::{self, ErrorKind, PipeWriter, Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::sync::{Mutex, MutexGuard, PoisonError};

use nix::errno::Errno;
use nix::sys::wait::waitpid;
use nix::unistd::{ForkResult, Pid, fork};
use tracing::{debug, info, warn};

use crate::error::WatchdogError;
use crate::guard::{ProcessGuard, WATCHDOG_TARGET};
use crate::protocol::{ControlCommand, is_supervisable};
use crate::registry::{PidRegistry, REGISTRY_CAPACITY, RegistryFull};
use crate::stack::StackBuf;
use crate::watch::{Signaller, WatchReporter, watch_owner};

/// Highest descriptor number the helper bothers to close.
const MAX_FD_SCAN: RawFd = 65_536;
const DIAGNOSTIC_PREFIX: &[u8] = b"testbus-watchdog: ";

/// Guard that delegates supervision to a forked helper process.
///
/// The owner keeps the write end of a pipe; the helper keeps the read end.
/// When the owner exits for any reason the kernel closes the write end, the
/// helper sees end-of-stream, and every still-tracked pid receives `SIGTERM`.
///
/// The owner mirrors the helper's registry, so `track` reports
/// [`WatchdogError::Capacity`] instead of handing the helper a pid it would
/// have to drop.
#[derive(Debug)]
pub struct HelperProcessGuard {
    helper: Pid,
    control: Mutex<ControlChannel<PipeWriter>>,
}

impl HelperProcessGuard {
    /// Forks a new helper.
    ///
    /// # Errors
    ///
    /// Returns [`WatchdogError::Pipe`] or [`WatchdogError::Spawn`] when the
    /// pipe or the helper cannot be created.
    pub fn spawn() -> Result<Self, WatchdogError> {
        let (reader, writer) = io::pipe().map_err(|source| WatchdogError::Pipe { source })?;
        let read_fd = reader.as_raw_fd();
        // SAFETY: the child branch runs only async-signal-safe code and
        // terminates with `_exit`, never returning into the caller.
        match unsafe { fork() } {
            Ok(ForkResult::Child) => run_helper(read_fd),
            Ok(ForkResult::Parent { child }) => {
                drop(reader);
                info!(
                    target: WATCHDOG_TARGET,
                    helper = child.as_raw(),
                    "watchdog helper started"
                );
                Ok(Self {
                    helper: child,
                    control: Mutex::new(ControlChannel::new(writer)),
                })
            }
            Err(errno) => Err(WatchdogError::Spawn {
                source: io::Error::from(errno),
            }),
        }
    }

    /// Pid of the helper process.
    #[must_use]
    pub const fn helper_pid(&self) -> i32 {
        self.helper.as_raw()
    }

    /// Closes the control pipe and reaps the helper.
    ///
    /// Processes still tracked receive `SIGTERM` before this returns. Further
    /// `track`/`untrack` calls fail with [`WatchdogError::Closed`]. Calling
    /// `shutdown` twice is harmless.
    ///
    /// # Errors
    ///
    /// Returns [`WatchdogError::Reap`] when waiting for the helper fails.
    pub fn shutdown(&self) -> Result<(), WatchdogError> {
        let Some(writer) = self.lock_control().close() else {
            return Ok(());
        };
        drop(writer);
        loop {
            match waitpid(self.helper, None) {
                Ok(_) => break,
                Err(Errno::EINTR) => {}
                Err(errno) => {
                    return Err(WatchdogError::Reap {
                        pid: self.helper.as_raw(),
                        source: io::Error::from(errno),
                    });
                }
            }
        }
        info!(
            target: WATCHDOG_TARGET,
            helper = self.helper.as_raw(),
            "watchdog helper stopped"
        );
        Ok(())
    }

    fn lock_control(&self) -> MutexGuard<'_, ControlChannel<PipeWriter>> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ProcessGuard for HelperProcessGuard {
    fn track(&self, pid: u32) -> Result<(), WatchdogError> {
        self.lock_control().add(pid)
    }

    fn untrack(&self, pid: u32) -> Result<(), WatchdogError> {
        self.lock_control().remove(pid)
    }
}

impl Drop for HelperProcessGuard {
    fn drop(&mut self) {
        if let Err(error) = self.shutdown() {
            warn!(
                target: WATCHDOG_TARGET,
                error = %error,
                "failed to stop watchdog helper"
            );
        }
    }
}

/// Owner side of the control pipe and its copy of the helper's registry.
#[derive(Debug)]
struct ControlChannel<W> {
    writer: Option<W>,
    tracked: PidRegistry,
}

impl<W: Write> ControlChannel<W> {
    const fn new(writer: W) -> Self {
        Self {
            writer: Some(writer),
            tracked: PidRegistry::new(),
        }
    }

    fn add(&mut self, pid: u32) -> Result<(), WatchdogError> {
        if self.tracked.contains(pid) {
            return Ok(());
        }
        if self.tracked.len() >= REGISTRY_CAPACITY {
            return Err(WatchdogError::Capacity {
                source: RegistryFull { pid },
            });
        }
        self.send(ControlCommand::Add(pid))?;
        self.tracked
            .insert(pid)
            .map_err(|source| WatchdogError::Capacity { source })?;
        Ok(())
    }

    fn remove(&mut self, pid: u32) -> Result<(), WatchdogError> {
        self.send(ControlCommand::Remove(pid))?;
        if !self.tracked.remove(pid) {
            debug!(target: WATCHDOG_TARGET, pid, "removed a pid that was not tracked");
        }
        Ok(())
    }

    /// Hands back the writer so the caller decides when the pipe closes.
    fn close(&mut self) -> Option<W> {
        self.tracked = PidRegistry::new();
        self.writer.take()
    }

    fn send(&mut self, command: ControlCommand) -> Result<(), WatchdogError> {
        if !is_supervisable(command.pid()) {
            return Err(WatchdogError::InvalidPid { pid: command.pid() });
        }
        let writer = self.writer.as_mut().ok_or(WatchdogError::Closed)?;
        writer
            .write_all(command.to_line().as_bytes())
            .map_err(|source| WatchdogError::Send {
                command: command.to_string(),
                source,
            })?;
        debug!(target: WATCHDOG_TARGET, %command, "watchdog command sent");
        Ok(())
    }
}

fn run_helper(read_fd: RawFd) -> ! {
    // SAFETY: `signal`, `open`, `dup2` and `close` are async-signal-safe.
    unsafe {
        libc::signal(libc::SIGINT, libc::SIG_IGN);
        detach_stdio();
        close_inherited(read_fd);
    }
    let mut registry = PidRegistry::new();
    let status = match watch_owner(
        FdReader(read_fd),
        &mut registry,
        &mut KillSignaller,
        &mut StderrReporter,
    ) {
        Ok(_) => 0,
        Err(_) => 1,
    };
    // SAFETY: `_exit` skips atexit handlers and destructors inherited from the
    // owner, which must not run twice.
    unsafe { libc::_exit(status) }
}

/// Points stdin and stdout at `/dev/null` so the helper does not hold the
/// owner's terminal or output pipes open.
unsafe fn detach_stdio() {
    // SAFETY: plain descriptor syscalls on a path literal.
    unsafe {
        let null = libc::open(c"/dev/null".as_ptr(), libc::O_RDWR);
        if null < 0 {
            return;
        }
        libc::dup2(null, libc::STDIN_FILENO);
        libc::dup2(null, libc::STDOUT_FILENO);
        if null > libc::STDERR_FILENO {
            libc::close(null);
        }
    }
}

/// Closes every descriptor above stderr except `keep`.
unsafe fn close_inherited(keep: RawFd) {
    // SAFETY: `sysconf` and `close` are async-signal-safe; closing an unused
    // descriptor number fails harmlessly with `EBADF`.
    unsafe {
        let reported = libc::sysconf(libc::_SC_OPEN_MAX);
        let limit = RawFd::try_from(reported)
            .ok()
            .filter(|limit| *limit > 0)
            .map_or(MAX_FD_SCAN, |limit| limit.min(MAX_FD_SCAN));
        for fd in (libc::STDERR_FILENO + 1)..limit {
            if fd != keep {
                libc::close(fd);
            }
        }
    }
}

struct FdReader(RawFd);

impl Read for FdReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        // SAFETY: `buf` is valid for `buf.len()` bytes of writes.
        let count = unsafe { libc::read(self.0, buf.as_mut_ptr().cast(), buf.len()) };
        usize::try_from(count).map_err(|_| io::Error::last_os_error())
    }
}

struct KillSignaller;

impl Signaller for KillSignaller {
    fn terminate(&mut self, pid: u32) -> io::Result<()> {
        let target =
            libc::pid_t::try_from(pid).map_err(|_| io::Error::from(ErrorKind::InvalidInput))?;
        // SAFETY: `kill` has no memory-safety preconditions.
        if unsafe { libc::kill(target, libc::SIGTERM) } == 0 {
            return Ok(());
        }
        let error = io::Error::last_os_error();
        if error.raw_os_error() == Some(libc::ESRCH) {
            // Already gone.
            return Ok(());
        }
        Err(error)
    }
}

/// Writes diagnostics straight to fd 2 from a stack buffer.
struct StderrReporter;

impl StderrReporter {
    fn emit(args: std::fmt::Arguments<'_>) {
        let mut line = StackBuf::<128>::new();
        line.extend(DIAGNOSTIC_PREFIX);
        let complete = line.write_fmt(args).is_ok();
        write_stderr(line.as_bytes());
        write_stderr(if complete { b"\n".as_slice() } else { b"...\n".as_slice() });
    }
}

impl WatchReporter for StderrReporter {
    fn unknown_command(&mut self, line: &[u8]) {
        let mut message = StackBuf::<128>::new();
        message.extend(DIAGNOSTIC_PREFIX);
        message.extend(b"unknown command \"");
        message.extend(line);
        message.extend(b"\"\n");
        write_stderr(message.as_bytes());
    }

    fn unknown_pid(&mut self, pid: u32) {
        Self::emit(format_args!("unknown pid {pid} to remove"));
    }

    fn registry_full(&mut self, pid: u32) {
        Self::emit(format_args!("too many processes; pid {pid} is not supervised"));
    }

    fn signal_failed(&mut self, pid: u32, error: &io::Error) {
        Self::emit(format_args!(
            "failed to terminate pid {pid}: errno {}",
            error.raw_os_error().unwrap_or_default()
        ));
    }
}

fn write_stderr(mut bytes: &[u8]) {
    while !bytes.is_empty() {
        // SAFETY: `bytes` is valid for `bytes.len()` bytes of reads.
        let written = unsafe { libc::write(libc::STDERR_FILENO, bytes.as_ptr().cast(), bytes.len()) };
        match usize::try_from(written) {
            Ok(0) => return,
            Ok(count) => bytes = bytes.get(count..).unwrap_or_default(),
            Err(_) if io::Error::last_os_error().kind() == ErrorKind::Interrupted => {}
            Err(_) => return,
        }
    }
}
