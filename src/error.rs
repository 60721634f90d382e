//! Canonical error types for the crate.
//!
//! The taxonomy separates transport faults from the two timeout kinds a
//! packet read can report, and both from contract violations around buffer
//! sizes and classifier return values. Mock errors only ever come out of
//! the test fixture.

use std::{fmt, io};

use thiserror::Error;

/// Which deadline a timeout refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeoutKind {
    /// No byte at all arrived before the first-byte deadline.
    FirstByte,
    /// Bytes arrived, but no complete packet before the packet deadline.
    Packet,
    /// Internal sentinel reported by the stream wait primitives. Re-tagged
    /// by the engine; never escapes a public read or write call.
    None,
}

impl fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FirstByte => f.write_str("first-byte"),
            Self::Packet => f.write_str("packet"),
            Self::None => f.write_str("wait"),
        }
    }
}

/// Buffer-size and classifier-contract violations.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LengthError {
    /// The internal buffer filled up without the classifier finding a packet.
    #[error("current packet too large for the internal buffer ({capacity} bytes)")]
    PacketTooLarge {
        /// Capacity of the internal buffer, i.e. the maximum packet size.
        capacity: usize,
    },

    /// The caller-supplied output buffer cannot hold a maximum-size packet.
    #[error("provided buffer too small: got {got}, expected at least {expected}")]
    BufferTooSmall {
        /// Size of the buffer the caller handed in.
        got: usize,
        /// Minimum acceptable size, i.e. the maximum packet size.
        expected: usize,
    },

    /// The classifier returned a value outside the admissible range.
    #[error("extract_packet returned {returned} on a view of {buffered} bytes")]
    ClassifierContract {
        /// Value the classifier returned.
        returned: i64,
        /// Number of bytes the classifier was shown.
        buffered: usize,
    },
}

/// Errors raised by the mock machinery of the test fixture.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum MockError {
    /// An expectation was queued while no mock context was active.
    #[error("expectation set outside a mock context; enter Fixture::mock_context first")]
    OutsideContext,

    /// A mock context was left with expectations still queued.
    #[error("mock context closed with {remaining} unsatisfied expectation(s)")]
    UnsatisfiedExpectations {
        /// Number of expectation/reply pairs still queued.
        remaining: usize,
    },
}

/// Top-level error type exposed by `driverframe`.
#[derive(Debug, Error)]
pub enum DriverError {
    /// A transport fault, annotated with what the driver was doing.
    #[error("I/O error while {context}: {source}")]
    Io {
        /// What the driver was doing when the fault surfaced.
        context: &'static str,
        /// The underlying OS error.
        #[source]
        source: io::Error,
    },

    /// A deadline was exceeded.
    #[error("{kind} timeout")]
    Timeout {
        /// Which deadline ran out.
        kind: TimeoutKind,
    },

    /// A buffer-size or classifier-contract violation.
    #[error(transparent)]
    Length(#[from] LengthError),

    /// Bad URI syntax, unsupported scheme or conflicting options.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Mock machinery misuse (test fixture only).
    #[error(transparent)]
    Mock(#[from] MockError),
}

impl DriverError {
    /// Wrap an OS error with the operation it interrupted.
    pub(crate) fn io(context: &'static str, source: io::Error) -> Self {
        Self::Io { context, source }
    }

    /// The sentinel returned by `wait_read`/`wait_write` when their budget
    /// runs out. The engine re-tags it before it reaches a caller.
    pub(crate) fn wait_timeout() -> Self {
        Self::Timeout {
            kind: TimeoutKind::None,
        }
    }

    /// Returns true if this error is a timeout of any kind.
    #[must_use]
    pub fn is_timeout(&self) -> bool { matches!(self, Self::Timeout { .. }) }

    /// Which deadline ran out, if this error is a timeout.
    #[must_use]
    pub fn timeout_kind(&self) -> Option<TimeoutKind> {
        match self {
            Self::Timeout { kind } => Some(*kind),
            _ => None,
        }
    }

    pub(crate) fn is_wait_timeout(&self) -> bool {
        matches!(
            self,
            Self::Timeout {
                kind: TimeoutKind::None
            }
        )
    }

    /// The raw OS error code, if this error wraps one.
    #[must_use]
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::Io { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }
}

/// Canonical result alias used by `driverframe` public APIs.
pub type Result<T> = std::result::Result<T, DriverError>;
