//! Construction-time options for a harness.

/// Flags fixed when a [`crate::TestBus`] is created.
///
/// Only [`HarnessFlags::NONE`] is currently defined; the type exists so new
/// options can be added without changing constructor signatures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct HarnessFlags(u32);

impl HarnessFlags {
    /// No special behaviour.
    pub const NONE: Self = Self(0);

    /// Raw bit representation.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Whether every bit in `other` is also set in `self`.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}
