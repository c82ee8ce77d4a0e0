//! The helper's watch loop.
//!
//! [`watch_owner`] reads control lines until the owner's end of the pipe
//! closes, maintaining a [`PidRegistry`] as it goes, then terminates whatever
//! is still tracked. The loop is generic over its input, its signal delivery,
//! and its diagnostics so it can be exercised in-process; the forked helper
//! plugs in raw file descriptors and `kill(2)`.

use std::io::{self, ErrorKind, Read};

use crate::protocol::ControlCommand;
use crate::registry::{PidRegistry, RegistryFull};
use crate::stack::StackBuf;

/// Longest control line the loop accepts, terminator excluded.
pub const MAX_LINE_LEN: usize = 64;

const READ_CHUNK: usize = 256;

/// Delivers the termination request to a tracked process.
pub trait Signaller {
    /// Asks `pid` to terminate.
    ///
    /// # Errors
    ///
    /// Returns the OS error when the signal cannot be delivered.
    fn terminate(&mut self, pid: u32) -> io::Result<()>;
}

/// Receives the anomalies the watch loop tolerates.
pub trait WatchReporter {
    /// A line did not parse as a command. Overlong lines arrive truncated.
    fn unknown_command(&mut self, line: &[u8]);
    /// A `remove` named a pid that was not tracked.
    fn unknown_pid(&mut self, pid: u32);
    /// An `add` could not be honoured because the registry is full.
    fn registry_full(&mut self, pid: u32);
    /// Terminating a tracked pid failed.
    fn signal_failed(&mut self, pid: u32, error: &io::Error);
}

/// Runs the watch loop until `input` reaches end-of-stream.
///
/// Returns the number of processes the loop asked to terminate.
///
/// # Errors
///
/// Returns the read error when `input` fails with anything other than an
/// interruption. Tracked processes are still signalled first, since a broken
/// pipe means the owner is gone just as surely as a clean close.
pub fn watch_owner<R, S, W>(
    mut input: R,
    registry: &mut PidRegistry,
    signaller: &mut S,
    reporter: &mut W,
) -> io::Result<usize>
where
    R: Read,
    S: Signaller,
    W: WatchReporter,
{
    let mut lines = LineAssembler::new();
    let mut chunk = [0_u8; READ_CHUNK];
    let outcome = loop {
        match input.read(&mut chunk) {
            Ok(0) => break Ok(()),
            Ok(count) => {
                for byte in chunk.iter().take(count) {
                    if let Some(line) = lines.feed(*byte) {
                        apply_line(line, registry, reporter);
                        lines.reset();
                    }
                }
            }
            Err(error) if error.kind() == ErrorKind::Interrupted => {}
            Err(error) => break Err(error),
        }
    };
    if let Some(line) = lines.finish() {
        apply_line(line, registry, reporter);
    }
    let signalled = terminate_all(registry, signaller, reporter);
    outcome.map(|()| signalled)
}

fn apply_line<W: WatchReporter>(line: Line<'_>, registry: &mut PidRegistry, reporter: &mut W) {
    let bytes = match line {
        Line::Complete(bytes) => bytes,
        Line::Overlong(prefix) => {
            reporter.unknown_command(prefix);
            return;
        }
    };
    match ControlCommand::parse(bytes) {
        Some(ControlCommand::Add(pid)) => {
            if let Err(RegistryFull { pid: rejected }) = registry.insert(pid) {
                reporter.registry_full(rejected);
            }
        }
        Some(ControlCommand::Remove(pid)) => {
            if !registry.remove(pid) {
                reporter.unknown_pid(pid);
            }
        }
        None => reporter.unknown_command(bytes),
    }
}

fn terminate_all<S, W>(registry: &PidRegistry, signaller: &mut S, reporter: &mut W) -> usize
where
    S: Signaller,
    W: WatchReporter,
{
    let mut signalled = 0;
    for pid in registry.tracked() {
        match signaller.terminate(*pid) {
            Ok(()) => signalled += 1,
            Err(error) => reporter.signal_failed(*pid, &error),
        }
    }
    signalled
}

#[derive(Clone, Copy)]
enum Line<'a> {
    Complete(&'a [u8]),
    Overlong(&'a [u8]),
}

/// Accumulates bytes into lines of at most [`MAX_LINE_LEN`] bytes.
struct LineAssembler {
    buffer: StackBuf<MAX_LINE_LEN>,
    overflowed: bool,
}

impl LineAssembler {
    const fn new() -> Self {
        Self {
            buffer: StackBuf::new(),
            overflowed: false,
        }
    }

    fn feed(&mut self, byte: u8) -> Option<Line<'_>> {
        if byte == b'\n' {
            return Some(self.current());
        }
        if !self.buffer.push(byte) {
            self.overflowed = true;
        }
        None
    }

    fn finish(&self) -> Option<Line<'_>> {
        (self.overflowed || !self.buffer.as_bytes().is_empty()).then(|| self.current())
    }

    fn current(&self) -> Line<'_> {
        if self.overflowed {
            Line::Overlong(self.buffer.as_bytes())
        } else {
            Line::Complete(self.buffer.as_bytes())
        }
    }

    const fn reset(&mut self) {
        self.buffer.clear();
        self.overflowed = false;
    }
}
