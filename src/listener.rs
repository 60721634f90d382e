//! Passive taps on the byte flow through a driver.

use std::sync::Mutex;

use bytes::{Bytes, BytesMut};

/// Observer of the bytes a driver actually moves.
///
/// Listeners see bytes in wire order, before the corresponding read or
/// write call returns. They must not block: both callbacks run on the
/// driver's I/O path.
pub trait IoListener: Send + Sync {
    /// Bytes just read from the stream.
    fn on_read(&self, data: &[u8]);

    /// Bytes just accepted by the stream.
    fn on_write(&self, data: &[u8]);
}

/// Listener that records traffic into two drainable byte queues.
#[derive(Debug, Default)]
pub struct BufferListener {
    read: Mutex<BytesMut>,
    write: Mutex<BytesMut>,
}

impl BufferListener {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Take everything recorded on the read side since the last flush.
    pub fn flush_read(&self) -> Bytes {
        self.read.lock().expect("lock poisoned").split().freeze()
    }

    /// Take everything recorded on the write side since the last flush.
    pub fn flush_write(&self) -> Bytes {
        self.write.lock().expect("lock poisoned").split().freeze()
    }
}

impl IoListener for BufferListener {
    fn on_read(&self, data: &[u8]) {
        self.read.lock().expect("lock poisoned").extend_from_slice(data);
    }

    fn on_write(&self, data: &[u8]) {
        self.write.lock().expect("lock poisoned").extend_from_slice(data);
    }
}
