//! Fixed-capacity byte buffer usable without the allocator.

use std::fmt;

/// Byte buffer backed by an inline array.
///
/// Pushing past capacity fails instead of growing, which keeps the buffer
/// usable in a forked child where allocation is off limits.
#[derive(Debug)]
pub(crate) struct StackBuf<const N: usize> {
    bytes: [u8; N],
    len: usize,
}

impl<const N: usize> StackBuf<N> {
    pub(crate) const fn new() -> Self {
        Self {
            bytes: [0; N],
            len: 0,
        }
    }

    /// Appends `byte`, returning `false` when the buffer is full.
    pub(crate) fn push(&mut self, byte: u8) -> bool {
        match self.bytes.get_mut(self.len) {
            Some(slot) => {
                *slot = byte;
                self.len += 1;
                true
            }
            None => false,
        }
    }

    /// Appends as much of `bytes` as fits, returning `false` on truncation.
    pub(crate) fn extend(&mut self, bytes: &[u8]) -> bool {
        bytes.iter().all(|byte| self.push(*byte))
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        self.bytes.get(..self.len).unwrap_or_default()
    }

    pub(crate) const fn clear(&mut self) {
        self.len = 0;
    }
}

impl<const N: usize> fmt::Write for StackBuf<N> {
    fn write_str(&mut self, text: &str) -> fmt::Result {
        if self.extend(text.as_bytes()) {
            Ok(())
        } else {
            Err(fmt::Error)
        }
    }
}
