//! Several classifiers sharing one byte stream.
//!
//! On a shared medium (an RS-485 line, typically) several devices talk
//! over the same wire and no single classifier can frame all of it. A
//! [`Bus`] owns one [`Driver`] and a registry of [`BusParser`]s: a
//! *directed* read routes classification to exactly one parser, while a
//! *broadcast* read asks every parser, delivers unsolicited matches to
//! their owners, and advances the buffer by the smallest amount any parser
//! tolerated.

use std::{num::NonZeroUsize, sync::Arc, time::Duration};

use tokio::sync::Mutex as AsyncMutex;

use crate::{
    driver::Driver,
    error::Result,
    extractor::PacketExtractor,
    status::Status,
    stream::IoStream,
};

/// A classifier that can dock onto a [`Bus`].
///
/// `on_packet` is invoked during broadcast reads whenever this parser
/// recognises a complete packet; periodic devices override it to consume
/// unsolicited traffic, request/reply devices keep the default no-op and
/// use directed reads instead.
pub trait BusParser: PacketExtractor {
    /// A packet this parser recognised went by during a broadcast read.
    fn on_packet(&self, _packet: &[u8]) {}
}

/// Routes classification to a single parser during a directed read.
struct Directed<'a>(&'a dyn BusParser);

impl PacketExtractor for Directed<'_> {
    fn extract_packet(&self, buffer: &[u8]) -> i64 { self.0.extract_packet(buffer) }
}

/// Asks every registered parser and advances by the smallest tolerated
/// skip. Positive matches are handed to their parser before the next one
/// is consulted.
struct Broadcast {
    parsers: Vec<Arc<dyn BusParser>>,
}

impl PacketExtractor for Broadcast {
    fn extract_packet(&self, buffer: &[u8]) -> i64 {
        let mut min_skip = buffer.len() as i64;
        for parser in &self.parsers {
            let verdict = parser.extract_packet(buffer);
            if verdict > 0 {
                let span = (verdict as usize).min(buffer.len());
                parser.on_packet(&buffer[..span]);
            }
            min_skip = min_skip.min(verdict.abs());
        }
        min_skip
    }
}

/// One engine multiplexed between several parsers.
///
/// The engine sits behind an async mutex, so directed reads, broadcast
/// reads and writes serialise; the parser registry has its own lock and
/// can be changed while I/O is in flight. The active parser travels
/// through the read path as an explicit argument, so there is no shared
/// "current caller" state to clean up on error paths.
pub struct Bus {
    driver: AsyncMutex<Driver>,
    parsers: std::sync::Mutex<Vec<Arc<dyn BusParser>>>,
}

impl Bus {
    /// Create a bus around a fresh engine.
    #[must_use]
    pub fn new(max_packet_size: NonZeroUsize, extract_last: bool) -> Self {
        Self {
            driver: AsyncMutex::new(Driver::new(max_packet_size, extract_last)),
            parsers: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Attach the stream a URI names to the underlying engine.
    ///
    /// # Errors
    ///
    /// See [`Driver::open_uri`].
    pub async fn open_uri(&self, uri: &str) -> Result<()> {
        self.driver.lock().await.open_uri(uri).await
    }

    /// Attach `stream` to the underlying engine.
    pub async fn set_main_stream(&self, stream: Box<dyn IoStream>) {
        self.driver.lock().await.set_main_stream(stream);
    }

    /// Register `parser` at the end of the broadcast order.
    pub fn add_parser(&self, parser: Arc<dyn BusParser>) {
        self.parsers.lock().expect("lock poisoned").push(parser);
    }

    /// Unregister a previously added parser.
    pub fn remove_parser(&self, parser: &Arc<dyn BusParser>) {
        self.parsers
            .lock()
            .expect("lock poisoned")
            .retain(|existing| !Arc::ptr_eq(existing, parser));
    }

    /// Directed read: classification consults only `parser`.
    ///
    /// # Errors
    ///
    /// See [`Driver::read_packet_timed`].
    pub async fn read_packet(
        &self,
        parser: &dyn BusParser,
        out: &mut [u8],
        packet_timeout: Duration,
        first_byte_timeout: Duration,
    ) -> Result<usize> {
        let mut driver = self.driver.lock().await;
        driver
            .read_packet_timed(&Directed(parser), out, packet_timeout, first_byte_timeout)
            .await
    }

    /// Broadcast read: every registered parser classifies, in registration
    /// order, and unsolicited matches reach their parser's
    /// [`BusParser::on_packet`]. Returns the span the engine advanced by.
    ///
    /// # Errors
    ///
    /// See [`Driver::read_packet_timed`].
    pub async fn read_any(
        &self,
        out: &mut [u8],
        packet_timeout: Duration,
        first_byte_timeout: Duration,
    ) -> Result<usize> {
        let broadcast = Broadcast {
            parsers: self.parsers.lock().expect("lock poisoned").clone(),
        };
        let mut driver = self.driver.lock().await;
        driver
            .read_packet_timed(&broadcast, out, packet_timeout, first_byte_timeout)
            .await
    }

    /// Write through the shared engine.
    ///
    /// # Errors
    ///
    /// See [`Driver::write_packet_timed`].
    pub async fn write_packet(&self, buffer: &[u8], timeout: Duration) -> Result<()> {
        self.driver.lock().await.write_packet_timed(buffer, timeout).await
    }

    /// Snapshot of the engine counters.
    pub async fn status(&self) -> Status { self.driver.lock().await.status() }

    /// Run `f` with exclusive access to the engine, e.g. to configure
    /// timeouts or park bytes for stream-less tests.
    pub async fn with_driver<R>(&self, f: impl FnOnce(&mut Driver) -> R) -> R {
        f(&mut *self.driver.lock().await)
    }
}

#[cfg(test)]
#[path = "bus_tests.rs"]
mod tests;
