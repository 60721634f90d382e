//! Datagram transport with ICMP error masking.

use std::{io, net::SocketAddr, os::fd::AsRawFd, time::Duration};

use async_trait::async_trait;
use socket2::{Domain, Socket, Type};
use tokio::{io::Interest, net::UdpSocket, time};

use crate::error::{DriverError, Result};

use super::IoStream;

/// Transport over a UDP socket, optionally pinned to one peer.
///
/// Without a pinned peer the remote address is learned from the first
/// datagram received, and writes before that claim full success while the
/// bytes go nowhere, as there is nobody to send them to yet.
///
/// Asynchronous ICMP errors (connection refused, host/net unreachable)
/// surface on later socket calls. Each can be masked: a masked error reads
/// as "no data" and writes as "whole buffer sent". An unmasked error
/// discovered during `wait_read` is latched and raised by the next `read`,
/// exactly once.
pub struct UdpServerStream {
    socket: UdpSocket,
    peer: Option<SocketAddr>,
    peer_is_dynamic: bool,
    connected: bool,
    ignore_connrefused: bool,
    ignore_hostunreach: bool,
    ignore_netunreach: bool,
    pending_error: Option<io::Error>,
    eof: bool,
}

fn make_socket(local: SocketAddr, peer: Option<SocketAddr>) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(local), Type::DGRAM, None)?;
    socket.set_reuse_address(true)?;
    socket.bind(&local.into())?;
    if let Some(peer) = peer {
        socket.connect(&peer.into())?;
    }
    socket.set_nonblocking(true)?;
    UdpSocket::from_std(socket.into())
}

impl UdpServerStream {
    /// Bind a datagram socket on `local`; the peer is learned from the
    /// first datagram received.
    ///
    /// # Errors
    ///
    /// Fails if the socket cannot be created, bound or registered.
    pub fn bind(local: SocketAddr) -> Result<Self> {
        let socket = make_socket(local, None)
            .map_err(|e| DriverError::io("binding the UDP server socket", e))?;
        Ok(Self::from_socket(socket))
    }

    /// Bind on `local` and pin `peer` as the remote side. With `connected`
    /// the socket is connected, restricting both directions to that peer
    /// and enabling ICMP error reporting.
    ///
    /// # Errors
    ///
    /// Fails if the socket cannot be created, bound, connected or
    /// registered.
    pub fn bind_to_peer(local: SocketAddr, peer: SocketAddr, connected: bool) -> Result<Self> {
        let socket = make_socket(local, connected.then_some(peer))
            .map_err(|e| DriverError::io("binding the UDP socket", e))?;
        Ok(Self::from_socket_with_peer(socket, peer, connected))
    }

    /// Wrap an already-bound socket with a dynamically learned peer.
    #[must_use]
    pub fn from_socket(socket: UdpSocket) -> Self {
        Self {
            socket,
            peer: None,
            peer_is_dynamic: true,
            connected: false,
            ignore_connrefused: true,
            ignore_hostunreach: true,
            ignore_netunreach: true,
            pending_error: None,
            eof: false,
        }
    }

    /// Wrap an already-bound socket pinned to `peer`.
    #[must_use]
    pub fn from_socket_with_peer(socket: UdpSocket, peer: SocketAddr, connected: bool) -> Self {
        Self {
            socket,
            peer: Some(peer),
            peer_is_dynamic: false,
            connected,
            ignore_connrefused: true,
            ignore_hostunreach: true,
            ignore_netunreach: true,
            pending_error: None,
            eof: false,
        }
    }

    /// Mask or surface `ECONNREFUSED`.
    pub fn set_ignore_connrefused(&mut self, enable: bool) { self.ignore_connrefused = enable; }

    /// Mask or surface `EHOSTUNREACH`.
    pub fn set_ignore_hostunreach(&mut self, enable: bool) { self.ignore_hostunreach = enable; }

    /// Mask or surface `ENETUNREACH`.
    pub fn set_ignore_netunreach(&mut self, enable: bool) { self.ignore_netunreach = enable; }

    /// Address the socket is bound to.
    ///
    /// # Errors
    ///
    /// Propagates the OS error if the address cannot be queried.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket
            .local_addr()
            .map_err(|e| DriverError::io("querying the UDP socket address", e))
    }

    fn is_masked(&self, error: &io::Error) -> bool {
        match error.raw_os_error() {
            Some(libc::ECONNREFUSED) => self.ignore_connrefused,
            Some(libc::EHOSTUNREACH) => self.ignore_hostunreach,
            Some(libc::ENETUNREACH) => self.ignore_netunreach,
            _ => false,
        }
    }
}

#[async_trait]
impl IoStream for UdpServerStream {
    /// Wait for a datagram, classifying pending socket errors on the way.
    ///
    /// After each readiness wake-up a zero-length `MSG_PEEK` receive
    /// surfaces any queued ICMP error without consuming data. A masked
    /// error consumes the wake-up and the wait continues on the remaining
    /// budget; an unmasked one is latched for the next `read`.
    async fn wait_read(&mut self, timeout: Duration) -> Result<()> {
        if self.pending_error.is_some() {
            return Ok(());
        }
        let fd = self.socket.as_raw_fd();
        let socket = &self.socket;
        let masked = |error: &io::Error| self.is_masked(error);
        let wait = async {
            loop {
                socket
                    .readable()
                    .await
                    .map_err(|e| DriverError::io("waiting for a datagram", e))?;
                let probe = socket.try_io(Interest::READABLE, || {
                    let ret =
                        unsafe { libc::recv(fd, std::ptr::null_mut(), 0, libc::MSG_PEEK) };
                    if ret < 0 {
                        Err(io::Error::last_os_error())
                    } else {
                        Ok(())
                    }
                });
                match probe {
                    Ok(()) => return Ok(None),
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                    Err(e) if masked(&e) => {}
                    Err(e) => return Ok(Some(e)),
                }
            }
        };
        match time::timeout(timeout, wait).await {
            Err(_) => Err(DriverError::wait_timeout()),
            Ok(Err(e)) => Err(e),
            Ok(Ok(Some(latched))) => {
                self.pending_error = Some(latched);
                Ok(())
            }
            Ok(Ok(None)) => Ok(()),
        }
    }

    async fn wait_write(&mut self, timeout: Duration) -> Result<()> {
        match time::timeout(timeout, self.socket.writable()).await {
            Err(_) => Err(DriverError::wait_timeout()),
            Ok(Err(e)) => Err(DriverError::io("waiting for datagram write space", e)),
            Ok(Ok(())) => Ok(()),
        }
    }

    fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        if let Some(error) = self.pending_error.take() {
            return Err(DriverError::io("reading from the UDP socket", error));
        }
        if buffer.is_empty() {
            return Ok(0);
        }
        let received = if self.peer_is_dynamic {
            match self.socket.try_recv_from(buffer) {
                Ok((count, from)) => {
                    self.peer = Some(from);
                    Ok(count)
                }
                Err(e) => Err(e),
            }
        } else {
            self.socket.try_recv(buffer)
        };
        match received {
            Ok(count) => {
                // A zero-length datagram is the datagram world's close
                // notification.
                if count == 0 {
                    self.eof = true;
                }
                Ok(count)
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) if self.is_masked(&e) => Ok(0),
            Err(e) => Err(DriverError::io("reading from the UDP socket", e)),
        }
    }

    fn write(&mut self, buffer: &[u8]) -> Result<usize> {
        let sent = if self.connected {
            self.socket.try_send(buffer)
        } else if let Some(peer) = self.peer {
            self.socket.try_send_to(buffer, peer)
        } else {
            // No peer learned yet; nothing useful to do with the bytes.
            return Ok(buffer.len());
        };
        match sent {
            Ok(count) => Ok(count),
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.raw_os_error() == Some(libc::ENOBUFS) =>
            {
                Ok(0)
            }
            Err(e) if self.is_masked(&e) => Ok(buffer.len()),
            Err(e) => Err(DriverError::io("writing to the UDP socket", e)),
        }
    }

    fn clear(&mut self) -> Result<()> {
        self.pending_error = None;
        let mut scratch = [0u8; 2048];
        loop {
            match self.socket.try_recv_from(&mut scratch) {
                Ok((0, _)) => {
                    self.eof = true;
                    return Ok(());
                }
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if self.is_masked(&e) => {}
                Err(e) => return Err(DriverError::io("draining the UDP socket", e)),
            }
        }
    }

    fn eof(&self) -> bool { self.eof }
}
