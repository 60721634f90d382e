//! The packet-reassembly engine.
//!
//! A [`Driver`] owns a bounded internal buffer and one transport. Reads on
//! byte streams seldom deliver a whole packet at once, so the engine
//! accumulates bytes and consults a [`PacketExtractor`] after every
//! delivery until a complete packet emerges, while keeping the caller's
//! first-byte and whole-packet deadlines.
//!
//! The engine is policy-free about framing: the classifier decides what a
//! packet is, the engine decides when to wait, what to discard and what to
//! hand out.

use std::{
    num::NonZeroUsize,
    sync::Arc,
    time::{Duration, Instant},
};

use crate::{
    deadline::Deadline,
    error::{DriverError, LengthError, Result, TimeoutKind},
    extractor::PacketExtractor,
    listener::IoListener,
    status::Status,
    stream::IoStream,
};

mod open;

#[cfg(test)]
#[path = "tests.rs"]
mod tests;

/// Render bytes for log output, with NUL and line endings escaped.
#[must_use]
pub fn printable_bytes(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() + 2);
    out.push('"');
    for &byte in data {
        match byte {
            0 => out.push_str("\\x00"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            _ => out.push(char::from(byte)),
        }
    }
    out.push('"');
    out
}

/// Render bytes as a plain lowercase hex string.
#[must_use]
pub fn hex_bytes(data: &[u8]) -> String {
    use std::fmt::Write;

    let mut out = String::with_capacity(data.len() * 2);
    for &byte in data {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// Locate the packet to deliver inside `buffer`.
///
/// Returns `(skip, size)`: `skip` junk bytes precede the packet, which is
/// `size` bytes long (`0` when only a prefix is present). In extract-last
/// mode the scan continues past a complete packet and later finds supersede
/// earlier ones; statistics are then updated here so superseded packets
/// still count.
fn find_packet(
    extractor: &dyn PacketExtractor,
    buffer: &[u8],
    extract_last: bool,
    mut stats: Option<&mut Status>,
) -> Result<(usize, usize)> {
    let mut base = 0;
    let mut best: Option<(usize, usize)> = None;

    loop {
        let window = &buffer[base..];
        let verdict = extractor.extract_packet(window);
        let window_len = window.len() as i64;
        if verdict > window_len || verdict < -window_len {
            return Err(LengthError::ClassifierContract {
                returned: verdict,
                buffered: window.len(),
            }
            .into());
        }

        if verdict == 0 {
            // Valid prefix at `base`; an already-found packet wins over an
            // incomplete later one.
            return Ok(match best {
                Some(found) if extract_last => found,
                _ => (base, 0),
            });
        }

        let (skip, size) = if verdict < 0 {
            ((-verdict) as usize, 0)
        } else {
            (0, verdict as usize)
        };
        let start = base + skip;

        if extract_last {
            if let Some(stats) = stats.as_deref_mut() {
                stats.mark();
                stats.bad_rx += skip as u64;
                stats.good_rx += size as u64;
            }
            if size > 0 {
                best = Some((start, size));
            }
        }

        let next = start + size;
        if next == buffer.len() {
            if size > 0 {
                return Ok((start, size));
            }
            // Everything from `start` on was junk; fall back to the last
            // complete packet if the policy kept one.
            return Ok(match best {
                Some(found) if extract_last => found,
                _ => (start, 0),
            });
        }

        if size == 0 || extract_last {
            base = next;
            continue;
        }
        return Ok((start, size));
    }
}

/// Packet-reassembly engine over one byte stream.
///
/// The engine carries no classifier of its own: every read path takes the
/// [`PacketExtractor`] explicitly, which is also what lets a bus route one
/// engine between several parsers.
pub struct Driver {
    buffer: Box<[u8]>,
    fill: usize,
    stream: Option<Box<dyn IoStream>>,
    listeners: Vec<Arc<dyn IoListener>>,
    extract_last: bool,
    read_timeout: Duration,
    write_timeout: Duration,
    stats: Status,
}

impl Driver {
    /// Create an engine able to hold packets of up to `max_packet_size`
    /// bytes, with no stream attached.
    ///
    /// With `extract_last` set, a read that finds several complete packets
    /// queued returns only the most recent one and counts the older ones
    /// as received-and-superseded.
    #[must_use]
    pub fn new(max_packet_size: NonZeroUsize, extract_last: bool) -> Self {
        Self {
            buffer: vec![0; max_packet_size.get()].into_boxed_slice(),
            fill: 0,
            stream: None,
            listeners: Vec::new(),
            extract_last,
            read_timeout: Duration::ZERO,
            write_timeout: Duration::ZERO,
            stats: Status::default(),
        }
    }

    /// The maximum packet size this engine can deliver.
    #[must_use]
    pub fn max_packet_size(&self) -> usize { self.buffer.len() }

    /// Attach `stream`, dropping (and thereby closing) any previous one.
    pub fn set_main_stream(&mut self, stream: Box<dyn IoStream>) { self.stream = Some(stream); }

    /// Whether a stream is attached.
    #[must_use]
    pub fn is_open(&self) -> bool { self.stream.is_some() }

    /// Drop the stream, closing any owned descriptors. Idempotent.
    pub fn close(&mut self) { self.stream = None; }

    /// True once the peer has closed and everything is drained. False when
    /// no stream is attached.
    #[must_use]
    pub fn eof(&self) -> bool { self.stream.as_deref().is_some_and(|stream| stream.eof()) }

    /// Drain queued stream input and empty the internal buffer. Idempotent.
    ///
    /// # Errors
    ///
    /// Propagates stream faults hit while draining.
    pub fn clear(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.as_deref_mut() {
            stream.clear()?;
        }
        self.fill = 0;
        Ok(())
    }

    /// Register a listener tapping every byte moved.
    pub fn add_listener(&mut self, listener: Arc<dyn IoListener>) {
        self.listeners.push(listener);
    }

    /// Unregister a previously added listener.
    pub fn remove_listener(&mut self, listener: &Arc<dyn IoListener>) {
        self.listeners
            .retain(|existing| !Arc::ptr_eq(existing, listener));
    }

    /// Snapshot of the byte-movement counters.
    #[must_use]
    pub fn status(&self) -> Status {
        let mut status = self.stats;
        status.queued_bytes = self.fill;
        status
    }

    /// Reset all counters to zero.
    pub fn reset_status(&mut self) { self.stats = Status::default(); }

    /// Whether reads deliver the most recent packet instead of the oldest.
    #[must_use]
    pub fn extract_last(&self) -> bool { self.extract_last }

    /// Switch the extract-last policy.
    pub fn set_extract_last(&mut self, enabled: bool) { self.extract_last = enabled; }

    /// Default timeout used by [`read_packet`](Self::read_packet) and
    /// [`read_raw`](Self::read_raw).
    #[must_use]
    pub fn read_timeout(&self) -> Duration { self.read_timeout }

    /// Set the default read timeout.
    pub fn set_read_timeout(&mut self, timeout: Duration) { self.read_timeout = timeout; }

    /// Default timeout used by [`write_packet`](Self::write_packet).
    #[must_use]
    pub fn write_timeout(&self) -> Duration { self.write_timeout }

    /// Set the default write timeout.
    pub fn set_write_timeout(&mut self, timeout: Duration) { self.write_timeout = timeout; }

    /// Whether the internal buffer currently holds a complete packet.
    ///
    /// Pure query: neither the buffer nor the statistics change.
    ///
    /// # Errors
    ///
    /// Returns a length error when the classifier violates its contract.
    pub fn has_packet(&self, extractor: &dyn PacketExtractor) -> Result<bool> {
        if self.fill == 0 {
            return Ok(false);
        }
        let (_, size) = find_packet(
            extractor,
            &self.buffer[..self.fill],
            self.extract_last,
            None,
        )?;
        Ok(size > 0)
    }

    /// Read one complete packet into `out` using the default read timeout
    /// for both deadlines.
    ///
    /// # Errors
    ///
    /// See [`read_packet_timed`](Self::read_packet_timed).
    pub async fn read_packet(
        &mut self,
        extractor: &dyn PacketExtractor,
        out: &mut [u8],
    ) -> Result<usize> {
        self.read_packet_timed(extractor, out, self.read_timeout, self.read_timeout)
            .await
    }

    /// Read one complete packet into `out`.
    ///
    /// `first_byte_timeout` bounds the wait for the first byte of the
    /// packet; `packet_timeout` bounds the whole operation from its start.
    /// `out` must hold at least [`max_packet_size`](Self::max_packet_size)
    /// bytes. Returns the packet length; `out[..len]` is the packet.
    ///
    /// Without an attached stream the internal buffer is given one chance
    /// to produce a packet, then the read reports a packet timeout.
    ///
    /// # Errors
    ///
    /// - [`DriverError::Timeout`] with [`TimeoutKind::FirstByte`] when no byte arrived in time,
    ///   with [`TimeoutKind::Packet`] when bytes arrived but no packet completed;
    /// - [`DriverError::Length`] for an undersized `out`, an overlong packet or a classifier
    ///   contract violation;
    /// - [`DriverError::Io`] for stream faults.
    pub async fn read_packet_timed(
        &mut self,
        extractor: &dyn PacketExtractor,
        out: &mut [u8],
        packet_timeout: Duration,
        first_byte_timeout: Duration,
    ) -> Result<usize> {
        if out.len() < self.max_packet_size() {
            return Err(LengthError::BufferTooSmall {
                got: out.len(),
                expected: self.max_packet_size(),
            }
            .into());
        }

        if self.stream.is_none() {
            let size = self.extract_from_queue(extractor, out)?;
            if size > 0 {
                return Ok(size);
            }
            return Err(DriverError::Timeout {
                kind: TimeoutKind::Packet,
            });
        }

        let mut kind = TimeoutKind::FirstByte;
        let mut budget = packet_timeout.min(first_byte_timeout);
        let deadline = Deadline::new(budget);
        let mut received_any = false;

        loop {
            let (size, received) = self.read_step(extractor, out)?;
            received_any |= received;
            if size > 0 {
                return Ok(size);
            }

            if packet_timeout.is_zero() && !received_any {
                return Err(DriverError::Timeout {
                    kind: TimeoutKind::FirstByte,
                });
            }

            if kind == TimeoutKind::FirstByte && received {
                kind = TimeoutKind::Packet;
                budget = packet_timeout;
            }

            if deadline.elapsed_for(budget) {
                return Err(DriverError::Timeout { kind });
            }

            let remaining = deadline.remaining_for(budget);
            let stream = self.stream.as_deref_mut().expect("stream checked above");
            match stream.wait_read(remaining).await {
                Ok(()) => {}
                Err(e) if e.is_wait_timeout() => {
                    return Err(DriverError::Timeout { kind });
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Fill `out` with whatever bytes arrive, without parsing, using the
    /// default read timeout for every deadline.
    ///
    /// # Errors
    ///
    /// See [`read_raw_timed`](Self::read_raw_timed).
    pub async fn read_raw(&mut self, out: &mut [u8]) -> Result<usize> {
        self.read_raw_timed(out, self.read_timeout, self.read_timeout, None)
            .await
    }

    /// Fill `out` with whatever bytes arrive, without parsing.
    ///
    /// Three deadlines run in parallel: `first_byte_timeout` until the
    /// first byte, `packet_timeout` from then on for the whole read, and
    /// `inter_byte_timeout` restarted on every received byte (defaulting
    /// to `packet_timeout` when `None`). Bytes already queued in the
    /// internal buffer are drained into `out` first.
    ///
    /// Deadlines ending the read are not errors: the call returns however
    /// many bytes it gathered, possibly zero.
    ///
    /// # Errors
    ///
    /// [`DriverError::Io`] on stream faults, [`DriverError::InvalidArgument`]
    /// when no stream is attached.
    pub async fn read_raw_timed(
        &mut self,
        out: &mut [u8],
        packet_timeout: Duration,
        first_byte_timeout: Duration,
        inter_byte_timeout: Option<Duration>,
    ) -> Result<usize> {
        if self.stream.is_none() {
            return Err(DriverError::InvalidArgument(
                "read_raw called on a driver with no stream attached".into(),
            ));
        }

        let mut fill = self.fill.min(out.len());
        self.pull_bytes(out, 0, fill);

        let first_byte_timeout = packet_timeout.min(first_byte_timeout);
        let inter_byte_timeout = inter_byte_timeout.unwrap_or(packet_timeout);

        let mut global_deadline = Instant::now() + first_byte_timeout;
        // The inter-byte clock only starts once the first byte has landed.
        let mut last_byte: Option<Instant> = None;

        while fill < out.len() {
            let now = Instant::now();
            if now > global_deadline {
                break;
            }
            let mut limit = global_deadline;
            if let Some(last) = last_byte {
                limit = limit.min(last + inter_byte_timeout);
            }

            let stream = self.stream.as_deref_mut().expect("stream checked above");
            match stream.wait_read(limit.saturating_duration_since(now)).await {
                Ok(()) => {}
                Err(e) if e.is_wait_timeout() => break,
                Err(e) => return Err(e),
            }

            let count = {
                let stream = self.stream.as_deref_mut().expect("stream checked above");
                stream.read(&mut out[fill..])?
            };
            if count > 0 {
                let now = Instant::now();
                if last_byte.is_none() {
                    global_deadline = now + packet_timeout;
                }
                last_byte = Some(now);
                for listener in &self.listeners {
                    listener.on_read(&out[fill..fill + count]);
                }
                fill += count;
            }
        }

        Ok(fill)
    }

    /// Write all of `buffer` using the default write timeout.
    ///
    /// # Errors
    ///
    /// See [`write_packet_timed`](Self::write_packet_timed).
    pub async fn write_packet(&mut self, buffer: &[u8]) -> Result<()> {
        self.write_packet_timed(buffer, self.write_timeout).await
    }

    /// Write all of `buffer`, retrying short writes until `timeout` runs
    /// out. Partial progress is never reported: the call either writes
    /// everything or fails.
    ///
    /// # Errors
    ///
    /// [`DriverError::Timeout`] with [`TimeoutKind::Packet`] when the
    /// budget runs out, [`DriverError::Io`] on stream faults,
    /// [`DriverError::InvalidArgument`] when no stream is attached.
    pub async fn write_packet_timed(&mut self, buffer: &[u8], timeout: Duration) -> Result<()> {
        if self.stream.is_none() {
            return Err(DriverError::InvalidArgument(
                "write_packet called on a driver with no stream attached; \
                 did you forget to call open_uri?"
                    .into(),
            ));
        }

        let deadline = Deadline::new(timeout);
        let mut written = 0;
        loop {
            let count = {
                let stream = self.stream.as_deref_mut().expect("stream checked above");
                stream.write(&buffer[written..])?
            };
            if count > 0 {
                for listener in &self.listeners {
                    listener.on_write(&buffer[written..written + count]);
                }
                written += count;
            }

            if written == buffer.len() {
                self.stats.mark();
                self.stats.tx += buffer.len() as u64;
                return Ok(());
            }

            if deadline.elapsed() {
                return Err(DriverError::Timeout {
                    kind: TimeoutKind::Packet,
                });
            }

            let stream = self.stream.as_deref_mut().expect("stream checked above");
            match stream.wait_write(deadline.remaining()).await {
                Ok(()) => {}
                Err(e) if e.is_wait_timeout() => {
                    return Err(DriverError::Timeout {
                        kind: TimeoutKind::Packet,
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Bounded wait until a read on this driver is expected to make
    /// progress. Used by the forwarder to multiplex two drivers.
    ///
    /// # Errors
    ///
    /// The internal wait timeout when `timeout` runs out, stream faults
    /// otherwise.
    pub async fn wait_read(&mut self, timeout: Duration) -> Result<()> {
        let Some(stream) = self.stream.as_deref_mut() else {
            return Err(DriverError::InvalidArgument(
                "wait_read called on a driver with no stream attached".into(),
            ));
        };
        stream.wait_read(timeout).await
    }

    /// One non-blocking engine step: drain the stream into the internal
    /// buffer and attempt extraction after every delivery.
    ///
    /// Returns `(packet_size, received_any)`. A zero `packet_size` means
    /// no complete packet is available yet.
    fn read_step(&mut self, extractor: &dyn PacketExtractor, out: &mut [u8]) -> Result<(usize, bool)> {
        let mut packet_size = 0;
        if self.fill > 0 {
            packet_size = self.do_packet_extraction(extractor, out)?;
            if packet_size > 0 && !self.extract_last {
                return Ok((packet_size, false));
            }
        }

        let mut received = false;
        loop {
            let count = {
                let Some(stream) = self.stream.as_deref_mut() else {
                    return Ok((packet_size, received));
                };
                stream.read(&mut self.buffer[self.fill..])?
            };
            if count == 0 {
                return Ok((packet_size, received));
            }

            received = true;
            let start = self.fill;
            self.fill += count;
            for listener in &self.listeners {
                listener.on_read(&self.buffer[start..start + count]);
            }

            let fresh = self.do_packet_extraction(extractor, out)?;
            if fresh > 0 {
                if !self.extract_last {
                    return Ok((fresh, true));
                }
                packet_size = fresh;
            }

            if self.fill == self.buffer.len() {
                return Err(LengthError::PacketTooLarge {
                    capacity: self.buffer.len(),
                }
                .into());
            }
        }
    }

    /// Run the classifier over the internal buffer and, when a packet is
    /// found, move it into `out` and shift the remainder to offset zero.
    fn do_packet_extraction(
        &mut self,
        extractor: &dyn PacketExtractor,
        out: &mut [u8],
    ) -> Result<usize> {
        let (skip, size) = find_packet(
            extractor,
            &self.buffer[..self.fill],
            self.extract_last,
            Some(&mut self.stats),
        )?;
        if !self.extract_last {
            self.stats.mark();
            self.stats.bad_rx += skip as u64;
            self.stats.good_rx += size as u64;
        }
        self.pull_bytes(out, skip, size);
        Ok(size)
    }

    /// Repeated extraction for stream-less use: callers park bytes in the
    /// internal buffer and pull packets out of it directly.
    fn extract_from_queue(
        &mut self,
        extractor: &dyn PacketExtractor,
        out: &mut [u8],
    ) -> Result<usize> {
        let mut result = 0;
        while self.fill > 0 {
            let size = self.do_packet_extraction(extractor, out)?;
            if size > 0 {
                result = size;
            }
            if size == 0 || !self.extract_last {
                break;
            }
        }
        Ok(result)
    }

    /// Copy `size` bytes at offset `skip` out of the internal buffer into
    /// `out` and close the gap.
    fn pull_bytes(&mut self, out: &mut [u8], skip: usize, size: usize) {
        let consumed = skip + size;
        out[..size].copy_from_slice(&self.buffer[skip..consumed]);
        self.buffer.copy_within(consumed..self.fill, 0);
        self.fill -= consumed;
    }

    /// Park `data` in the internal buffer without going through a stream.
    ///
    /// This is how stream-less callers feed
    /// [`read_packet`](Self::read_packet); it is also what the test
    /// fixture builds on.
    ///
    /// # Errors
    ///
    /// A length error when the bytes do not fit next to what is queued.
    pub fn push_bytes(&mut self, data: &[u8]) -> Result<()> {
        if self.fill + data.len() > self.buffer.len() {
            return Err(LengthError::PacketTooLarge {
                capacity: self.buffer.len(),
            }
            .into());
        }
        self.buffer[self.fill..self.fill + data.len()].copy_from_slice(data);
        self.fill += data.len();
        Ok(())
    }
}
