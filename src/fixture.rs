//! Harness for testing drivers against the in-memory stream.
//!
//! The fixture owns an engine wired to a [`TestStream`] plus the
//! classifier under test, and exposes the device side of the
//! conversation: push bytes "from the device", read back what the driver
//! wrote, and (inside a mock context) script expectation/reply exchanges.

use std::num::NonZeroUsize;

use crate::{
    driver::Driver,
    error::{MockError, Result},
    extractor::PacketExtractor,
    stream::{TestStream, TestStreamHandle},
};

/// A driver under test, its classifier, and the device side of its stream.
pub struct Fixture<E> {
    /// The engine under test; public so tests can poke at timeouts,
    /// policies and statistics directly.
    pub driver: Driver,
    /// The classifier under test.
    pub extractor: E,
    handle: TestStreamHandle,
    packet_buffer: Vec<u8>,
}

impl<E: PacketExtractor> Fixture<E> {
    /// Create a driver of `max_packet_size` wired to a fresh test stream.
    #[must_use]
    pub fn new(max_packet_size: NonZeroUsize, extractor: E) -> Self {
        Self::with_driver(Driver::new(max_packet_size, false), extractor)
    }

    /// Wire an existing driver (e.g. one configured for extract-last) to a
    /// fresh test stream.
    #[must_use]
    pub fn with_driver(mut driver: Driver, extractor: E) -> Self {
        let stream = TestStream::new();
        let handle = stream.handle();
        driver.set_main_stream(Box::new(stream));
        let packet_buffer = vec![0; driver.max_packet_size()];
        Self {
            driver,
            extractor,
            handle,
            packet_buffer,
        }
    }

    /// Read one packet and return it as an owned byte sequence.
    ///
    /// # Errors
    ///
    /// See [`Driver::read_packet`].
    pub async fn read_packet(&mut self) -> Result<Vec<u8>> {
        let size = self
            .driver
            .read_packet(&self.extractor, &mut self.packet_buffer)
            .await?;
        Ok(self.packet_buffer[..size].to_vec())
    }

    /// Write `data` through the driver.
    ///
    /// # Errors
    ///
    /// See [`Driver::write_packet`].
    pub async fn write_packet(&mut self, data: &[u8]) -> Result<()> {
        self.driver.write_packet(data).await
    }

    /// Queue `data` as if the device had sent it.
    pub fn push_data_to_driver(&self, data: &[u8]) { self.handle.push_data_to_driver(data); }

    /// Take everything the driver has written since the last call.
    #[must_use]
    pub fn read_data_from_driver(&self) -> Vec<u8> { self.handle.read_data_from_driver() }

    /// Bytes currently queued in the driver's internal buffer.
    #[must_use]
    pub fn queued_bytes(&self) -> usize { self.driver.status().queued_bytes }

    /// Queue an expectation/reply pair. Only valid inside a
    /// [`mock_context`](Self::mock_context) scope.
    ///
    /// # Errors
    ///
    /// [`MockError::OutsideContext`] when no mock context is active.
    pub fn expect_reply(&self, expectation: &[u8], reply: &[u8]) -> Result<()> {
        self.handle.expect_reply(expectation, reply)
    }

    /// Drop queued expectations, e.g. to recover after a failed exchange.
    pub fn clear_expectations(&self) { self.handle.clear_expectations(); }

    /// Device-side handle, for tests that want to drive the stream
    /// directly.
    #[must_use]
    pub fn stream_handle(&self) -> &TestStreamHandle { &self.handle }

    /// Enter mock mode for the duration of the returned guard.
    ///
    /// Leaving the scope restores plain mode and clears leftover
    /// expectations on every exit path; leaving with expectations still
    /// queued fails the test unless [`MockContext::verify`] collected the
    /// error first.
    pub fn mock_context(&self) -> MockContext {
        self.handle.set_mock_mode(true);
        MockContext {
            handle: self.handle.clone(),
            defused: false,
        }
    }
}

/// RAII scope during which the test stream matches writes against
/// scripted expectations.
pub struct MockContext {
    handle: TestStreamHandle,
    defused: bool,
}

impl MockContext {
    /// Close the scope, reporting leftover expectations as an error
    /// instead of a panic.
    ///
    /// # Errors
    ///
    /// [`MockError::UnsatisfiedExpectations`] when the expectation FIFO is
    /// not empty.
    pub fn verify(mut self) -> Result<()> {
        self.defused = true;
        let remaining = self.handle.expectations_pending();
        self.handle.clear_expectations();
        self.handle.set_mock_mode(false);
        if remaining == 0 {
            Ok(())
        } else {
            Err(MockError::UnsatisfiedExpectations { remaining }.into())
        }
    }
}

impl Drop for MockContext {
    fn drop(&mut self) {
        if self.defused {
            return;
        }
        let remaining = self.handle.expectations_pending();
        self.handle.clear_expectations();
        self.handle.set_mock_mode(false);
        if remaining != 0 && !std::thread::panicking() {
            panic!("mock context dropped with {remaining} unsatisfied expectation(s)");
        }
    }
}

#[cfg(test)]
#[path = "fixture_tests.rs"]
mod tests;
