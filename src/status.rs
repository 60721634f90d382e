//! Byte-movement counters for a driver instance.

use std::time::Instant;

/// Counters describing everything a driver has moved on the wire.
///
/// `good_rx + bad_rx + queued_bytes` always equals the number of bytes ever
/// read from the underlying stream.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Status {
    /// Bytes returned to callers as part of complete packets.
    pub good_rx: u64,
    /// Bytes discarded as junk in front of (or instead of) packets.
    pub bad_rx: u64,
    /// Bytes successfully written out.
    pub tx: u64,
    /// Bytes currently sitting unparsed in the internal buffer.
    pub queued_bytes: usize,
    /// Monotonic time of the last byte movement, if any.
    pub stamp: Option<Instant>,
}

impl Status {
    /// Record that bytes moved just now.
    pub(crate) fn mark(&mut self) { self.stamp = Some(Instant::now()); }
}
