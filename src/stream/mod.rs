//! The transport abstraction the packet engine drives.
//!
//! An [`IoStream`] is deliberately small: bounded waits for readiness, plus
//! non-blocking reads and writes. The engine composes those into timed
//! packet operations, so implementations never block outside `wait_read`
//! and `wait_write`.
//!
//! Four transports are provided: [`FdStream`] for anything that is a file
//! descriptor (serial ports, files, connected sockets), [`TcpServerStream`]
//! for a listening socket with at most one client, [`UdpServerStream`] for
//! datagram links with ICMP error masking, and [`TestStream`] for
//! deterministic in-memory testing.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

mod fd;
mod tcp;
mod udp;

pub use fd::FdStream;
pub use tcp::TcpServerStream;
pub use test::{TestStream, TestStreamHandle};
pub use udp::UdpServerStream;

/// Uniform non-blocking read/write/wait interface over one transport.
#[async_trait]
pub trait IoStream: Send {
    /// Complete once a subsequent [`read`](Self::read) is expected to make
    /// progress, or fail with the internal wait timeout after `timeout`.
    async fn wait_read(&mut self, timeout: Duration) -> Result<()>;

    /// Complete once a subsequent [`write`](Self::write) is expected to
    /// make progress, or fail with the internal wait timeout.
    async fn wait_write(&mut self, timeout: Duration) -> Result<()>;

    /// Non-blocking read into `buffer`. Returns the byte count, with `0`
    /// meaning "no data available right now".
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize>;

    /// Non-blocking write of as much of `buffer` as the transport accepts.
    /// May be short; `0` means "try again after `wait_write`".
    fn write(&mut self, buffer: &[u8]) -> Result<usize>;

    /// Throw away whatever input is currently queued on the transport.
    fn clear(&mut self) -> Result<()>;

    /// True once the peer has closed and all data has been drained.
    fn eof(&self) -> bool;

    /// True for the in-memory test transport. Lets `open_uri("test://")`
    /// keep an already-attached test stream in place.
    fn is_test_stream(&self) -> bool { false }
}
