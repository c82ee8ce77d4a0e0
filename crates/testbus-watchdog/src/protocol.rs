//! Line protocol spoken between a guard's owner and its helper.
//!
//! Each command is one ASCII line: `add pid <n>` or `remove pid <n>`,
//! terminated by `\n`. A trailing `\r` is tolerated. Parsing works on borrowed
//! bytes and never allocates, so the helper can use it after `fork`.

use std::fmt;

const ADD_PREFIX: &[u8] = b"add pid ";
const REMOVE_PREFIX: &[u8] = b"remove pid ";
const MAX_PID_DIGITS: usize = 10;

/// A single supervision command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    /// Start supervising the process.
    Add(u32),
    /// Stop supervising the process.
    Remove(u32),
}

impl ControlCommand {
    /// Parses one line, with or without its line terminator.
    ///
    /// Returns `None` for anything that is not a well-formed command,
    /// including pids that [`is_supervisable`] rejects.
    #[must_use]
    pub fn parse(line: &[u8]) -> Option<Self> {
        let body = strip_line_ending(line);
        body.strip_prefix(ADD_PREFIX)
            .and_then(parse_pid)
            .map(Self::Add)
            .or_else(|| {
                body.strip_prefix(REMOVE_PREFIX)
                    .and_then(parse_pid)
                    .map(Self::Remove)
            })
    }

    /// Process identifier carried by the command.
    #[must_use]
    pub const fn pid(self) -> u32 {
        match self {
            Self::Add(pid) | Self::Remove(pid) => pid,
        }
    }

    /// Renders the command as a terminated line ready for the pipe.
    #[must_use]
    pub fn to_line(self) -> String {
        format!("{self}\n")
    }
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Add(pid) => write!(f, "add pid {pid}"),
            Self::Remove(pid) => write!(f, "remove pid {pid}"),
        }
    }
}

/// Whether `pid` names a single process that can safely be signalled.
///
/// Zero addresses the caller's process group and values above `i32::MAX`
/// become negative `pid_t` values, so both are refused.
#[must_use]
pub fn is_supervisable(pid: u32) -> bool {
    pid != 0 && i32::try_from(pid).is_ok()
}

fn strip_line_ending(line: &[u8]) -> &[u8] {
    let without_newline = line.strip_suffix(b"\n").unwrap_or(line);
    without_newline
        .strip_suffix(b"\r")
        .unwrap_or(without_newline)
}

fn parse_pid(digits: &[u8]) -> Option<u32> {
    if digits.is_empty() || digits.len() > MAX_PID_DIGITS {
        return None;
    }
    let mut value: u32 = 0;
    for byte in digits {
        if !byte.is_ascii_digit() {
            return None;
        }
        value = value.checked_mul(10)?.checked_add(u32::from(byte - b'0'))?;
    }
    is_supervisable(value).then_some(value)
}
