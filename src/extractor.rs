//! The packet classifier capability.
//!
//! A driver knows how to shepherd bytes; only the protocol implementation
//! knows where one packet ends and the next begins. That knowledge is
//! supplied as a [`PacketExtractor`], consulted by the engine every time the
//! internal buffer changes.

/// Framing oracle for one wire protocol.
///
/// `extract_packet` is handed a view of the unparsed bytes (never empty) and
/// answers with a framing verdict:
///
/// - `n > 0`: a complete packet occupies the first `n` bytes of the view;
/// - `0`: the view starts with a valid packet prefix, more bytes are needed;
/// - `-k` with `1 <= k <= len`: the first `k` bytes are junk and must be
///   discarded (`k == len` throws the whole view away).
///
/// Any value outside `[-len, len]` is a programming error; the engine
/// rejects it with [`LengthError::ClassifierContract`].
///
/// The method must be pure with respect to the driver: it may keep its own
/// state, but the same view must always produce the same verdict within one
/// read, as the engine re-runs it while bytes accumulate.
///
/// [`LengthError::ClassifierContract`]: crate::LengthError::ClassifierContract
pub trait PacketExtractor: Send + Sync {
    /// Classify the start of `buffer`. See the trait docs for the verdict
    /// encoding.
    fn extract_packet(&self, buffer: &[u8]) -> i64;
}

/// Closures classify too; handy for tests and one-off tools.
impl<F> PacketExtractor for F
where
    F: Fn(&[u8]) -> i64 + Send + Sync,
{
    fn extract_packet(&self, buffer: &[u8]) -> i64 { self(buffer) }
}
