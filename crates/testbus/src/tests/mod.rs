//! Test suites for the harness.

mod support;
#[cfg(unix)]
mod unit;
