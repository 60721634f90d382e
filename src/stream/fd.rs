//! File-descriptor transport.

use std::{
    io,
    os::fd::{AsRawFd, OwnedFd, RawFd},
    time::Duration,
};

use async_trait::async_trait;
use log::warn;
use tokio::{
    io::{unix::AsyncFd, Interest},
    time,
};

use crate::error::{DriverError, Result};

use super::IoStream;

/// Transport over an owned, non-blocking file descriptor.
///
/// Fits serial ports, plain files and connected sockets alike. Dropping the
/// stream closes the descriptor; callers that need to keep one must
/// duplicate it before handing it over.
///
/// Serial-over-USB converters are known to spuriously return zero-byte
/// reads, so the serial factory creates the stream with `has_eof = false`
/// and a short read never marks end-of-file there.
pub struct FdStream {
    inner: Inner,
    has_eof: bool,
    eof: bool,
}

enum Inner {
    /// Registered with the reactor; waits go through epoll.
    Reactor(AsyncFd<OwnedFd>),
    /// Regular files cannot be registered with epoll and never block
    /// anyway, so waits complete immediately, as `select` would report.
    AlwaysReady(OwnedFd),
}

impl FdStream {
    /// Adopt `fd`, switching it to non-blocking mode if it was not already.
    ///
    /// # Errors
    ///
    /// Fails if the descriptor flags cannot be queried or changed.
    pub fn new(fd: OwnedFd, has_eof: bool) -> Result<Self> {
        if set_nonblocking_flag(fd.as_raw_fd())
            .map_err(|e| DriverError::io("setting the descriptor non-blocking", e))?
        {
            warn!("descriptor handed to FdStream was blocking, O_NONBLOCK has been set");
        }
        let inner = match AsyncFd::try_new(fd) {
            Ok(registered) => Inner::Reactor(registered),
            Err(error) => {
                let (fd, error) = error.into_parts();
                // EPERM is epoll refusing a regular file.
                if error.raw_os_error() == Some(libc::EPERM) {
                    Inner::AlwaysReady(fd)
                } else {
                    return Err(DriverError::io(
                        "registering the descriptor with the reactor",
                        error,
                    ));
                }
            }
        };
        Ok(Self {
            inner,
            has_eof,
            eof: false,
        })
    }

    fn raw(&self) -> RawFd {
        match &self.inner {
            Inner::Reactor(fd) => fd.get_ref().as_raw_fd(),
            Inner::AlwaysReady(fd) => fd.as_raw_fd(),
        }
    }
}

impl AsRawFd for FdStream {
    fn as_raw_fd(&self) -> RawFd { self.raw() }
}

#[async_trait]
impl IoStream for FdStream {
    async fn wait_read(&mut self, timeout: Duration) -> Result<()> {
        match &self.inner {
            Inner::Reactor(fd) => {
                wait_ready(fd, Interest::READABLE, timeout, "waiting for data").await
            }
            Inner::AlwaysReady(_) => Ok(()),
        }
    }

    async fn wait_write(&mut self, timeout: Duration) -> Result<()> {
        match &self.inner {
            Inner::Reactor(fd) => {
                wait_ready(fd, Interest::WRITABLE, timeout, "waiting for write space").await
            }
            Inner::AlwaysReady(_) => Ok(()),
        }
    }

    fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        if buffer.is_empty() {
            return Ok(0);
        }
        let count = unsafe { libc::read(self.raw(), buffer.as_mut_ptr().cast(), buffer.len()) };
        if count > 0 {
            Ok(count as usize)
        } else if count == 0 {
            self.eof = self.has_eof;
            Ok(0)
        } else {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                Ok(0)
            } else {
                Err(DriverError::io("reading the file descriptor", err))
            }
        }
    }

    fn write(&mut self, buffer: &[u8]) -> Result<usize> {
        if buffer.is_empty() {
            return Ok(0);
        }
        let count = unsafe { libc::write(self.raw(), buffer.as_ptr().cast(), buffer.len()) };
        if count >= 0 {
            Ok(count as usize)
        } else {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock
                || err.raw_os_error() == Some(libc::ENOBUFS)
            {
                Ok(0)
            } else {
                Err(DriverError::io("writing the file descriptor", err))
            }
        }
    }

    fn clear(&mut self) -> Result<()> {
        let mut scratch = [0u8; 256];
        while self.read(&mut scratch)? > 0 {}
        Ok(())
    }

    fn eof(&self) -> bool { self.eof }
}

/// Set `O_NONBLOCK` on `fd`; returns true if the flag had to be added.
fn set_nonblocking_flag(fd: RawFd) -> io::Result<bool> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if flags & libc::O_NONBLOCK != 0 {
        return Ok(false);
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(true)
}

/// Bounded wait for real readiness on `fd`.
///
/// Reactor readiness can be stale after a short read left the descriptor
/// drained, so every wake-up is checked with a zero-timeout `poll` probe.
/// A stale wake-up clears the readiness and re-arms the wait; the reactor
/// retries interrupted waits internally, within the same budget.
pub(crate) async fn wait_ready(
    fd: &AsyncFd<OwnedFd>,
    interest: Interest,
    timeout: Duration,
    context: &'static str,
) -> Result<()> {
    let events = if interest.is_readable() {
        libc::POLLIN
    } else {
        libc::POLLOUT
    };
    let wait = async {
        loop {
            let mut guard = fd
                .ready(interest)
                .await
                .map_err(|e| DriverError::io(context, e))?;
            match guard.try_io(|inner| probe(inner.get_ref().as_raw_fd(), events)) {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(e)) => return Err(DriverError::io(context, e)),
                Err(_would_block) => {}
            }
        }
    };
    match time::timeout(timeout, wait).await {
        Ok(result) => result,
        Err(_) => Err(DriverError::wait_timeout()),
    }
}

/// Zero-timeout poll; `WouldBlock` when the descriptor is not actually
/// ready for `events`.
fn probe(fd: RawFd, events: libc::c_short) -> io::Result<()> {
    let mut pollfd = libc::pollfd {
        fd,
        events,
        revents: 0,
    };
    loop {
        let ret = unsafe { libc::poll(&mut pollfd, 1, 0) };
        if ret > 0 {
            return Ok(());
        }
        if ret == 0 {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::EINTR) {
            return Err(err);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        os::fd::{AsRawFd, FromRawFd, OwnedFd},
        time::Duration,
    };

    use super::FdStream;
    use crate::stream::IoStream;

    fn pipe_pair() -> (OwnedFd, OwnedFd) {
        let mut fds = [0; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) }
    }

    #[tokio::test]
    async fn read_maps_would_block_to_zero() {
        let (rx, _tx) = pipe_pair();
        let mut stream = FdStream::new(rx, true).expect("fd stream");
        let mut buffer = [0u8; 16];
        assert_eq!(stream.read(&mut buffer).expect("read"), 0);
        assert!(!stream.eof());
    }

    #[tokio::test]
    async fn wait_read_completes_once_data_arrives() {
        let (rx, tx) = pipe_pair();
        let mut stream = FdStream::new(rx, true).expect("fd stream");

        assert!(stream
            .wait_read(Duration::from_millis(10))
            .await
            .expect_err("no data yet")
            .is_timeout());

        assert_eq!(unsafe { libc::write(tx.as_raw_fd(), b"hi".as_ptr().cast(), 2) }, 2);
        stream
            .wait_read(Duration::from_secs(1))
            .await
            .expect("data is queued");

        let mut buffer = [0u8; 16];
        assert_eq!(stream.read(&mut buffer).expect("read"), 2);
        assert_eq!(&buffer[..2], b"hi");
    }

    #[tokio::test]
    async fn closed_writer_marks_eof_when_enabled() {
        let (rx, tx) = pipe_pair();
        let mut stream = FdStream::new(rx, true).expect("fd stream");
        drop(tx);
        let mut buffer = [0u8; 16];
        assert_eq!(stream.read(&mut buffer).expect("read"), 0);
        assert!(stream.eof());
    }

    #[tokio::test]
    async fn zero_read_is_spurious_without_eof_semantics() {
        let (rx, tx) = pipe_pair();
        let mut stream = FdStream::new(rx, false).expect("fd stream");
        drop(tx);
        let mut buffer = [0u8; 16];
        assert_eq!(stream.read(&mut buffer).expect("read"), 0);
        assert!(!stream.eof());
    }
}
