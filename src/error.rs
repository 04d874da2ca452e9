//! Error surface for the core's fallible operations.

use core::fmt;

/// Failure kinds surfaced by the thread/scheduler API.
///
/// `#[non_exhaustive]` so a future boundary-rejection kind can be added
/// without breaking callers that match on this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum KernelError {
    /// No free thread descriptor is available for `thread_create`.
    NoMemory,
    /// `thread_join` was called by the target thread on itself.
    Deadlock,
    /// A raw stack pointer/length argument failed a boundary check.
    BadArgument,
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            KernelError::NoMemory => "no free thread descriptor available",
            KernelError::Deadlock => "thread_join would deadlock on itself",
            KernelError::BadArgument => "invalid stack pointer or stack length",
        };
        f.write_str(msg)
    }
}

/// Outcome of a successful `thread_join`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// The joined thread ran to completion while we waited.
    Ended,
    /// The target was already `NONE` or `ENDED`; we never blocked.
    AlreadyDone,
}
