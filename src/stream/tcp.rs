//! Listening TCP transport with a single active client.

use std::{io, net::SocketAddr, time::Duration};

use async_trait::async_trait;
use log::info;
use socket2::{Domain, Socket, Type};
use tokio::{
    net::{TcpListener, TcpStream},
    time,
};

use crate::error::{DriverError, Result};

use super::IoStream;

/// Transport that owns a listening socket and at most one accepted client.
///
/// Reads and writes target the client and report "no data" while none is
/// connected. Accepting is folded into the wait primitives: a wait
/// completes either because the client has I/O space or because a new
/// client connected, in which case the previous client is dropped.
pub struct TcpServerStream {
    listener: TcpListener,
    client: Option<TcpStream>,
    eof: bool,
}

enum Wakeup {
    Accepted(io::Result<(TcpStream, SocketAddr)>),
    ClientReady(io::Result<()>),
}

fn bind_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, None)?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(5)?;
    socket.set_nonblocking(true)?;
    TcpListener::from_std(socket.into())
}

impl TcpServerStream {
    /// Bind a listening socket on `addr` with `SO_REUSEADDR` set.
    ///
    /// # Errors
    ///
    /// Fails if the socket cannot be created, bound or registered.
    pub fn bind(addr: SocketAddr) -> Result<Self> {
        let listener = bind_listener(addr)
            .map_err(|e| DriverError::io("binding the TCP server socket", e))?;
        Ok(Self::from_listener(listener))
    }

    /// Wrap an already-bound tokio listener.
    #[must_use]
    pub fn from_listener(listener: TcpListener) -> Self {
        Self {
            listener,
            client: None,
            eof: false,
        }
    }

    /// Address the listening socket is bound to.
    ///
    /// # Errors
    ///
    /// Propagates the OS error if the address cannot be queried.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| DriverError::io("querying the server address", e))
    }

    /// Whether a client is currently connected.
    #[must_use]
    pub fn is_client_connected(&self) -> bool { self.client.is_some() }

    fn install_client(&mut self, client: TcpStream, peer: SocketAddr) {
        if self.client.take().is_some() {
            info!("tcpserver: new client {peer} replaces the previous connection");
        } else {
            info!("tcpserver: client {peer} connected");
        }
        self.client = Some(client);
        self.eof = false;
    }

    async fn wait(&mut self, timeout: Duration, want_write: bool) -> Result<()> {
        let context = if want_write {
            "waiting for write space on the TCP client"
        } else {
            "waiting for data on the TCP client"
        };
        let wakeup = time::timeout(timeout, async {
            match &self.client {
                Some(client) => {
                    tokio::select! {
                        accepted = self.listener.accept() => Wakeup::Accepted(accepted),
                        ready = async {
                            if want_write {
                                client.writable().await
                            } else {
                                client.readable().await
                            }
                        } => Wakeup::ClientReady(ready),
                    }
                }
                None => Wakeup::Accepted(self.listener.accept().await),
            }
        })
        .await
        .map_err(|_| DriverError::wait_timeout())?;

        match wakeup {
            Wakeup::Accepted(Ok((client, peer))) => {
                self.install_client(client, peer);
                Ok(())
            }
            Wakeup::Accepted(Err(e)) => Err(DriverError::io("accepting a TCP client", e)),
            Wakeup::ClientReady(Ok(())) => Ok(()),
            Wakeup::ClientReady(Err(e)) => Err(DriverError::io(context, e)),
        }
    }
}

#[async_trait]
impl IoStream for TcpServerStream {
    async fn wait_read(&mut self, timeout: Duration) -> Result<()> {
        self.wait(timeout, false).await
    }

    async fn wait_write(&mut self, timeout: Duration) -> Result<()> {
        self.wait(timeout, true).await
    }

    fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        let Some(client) = &self.client else {
            return Ok(0);
        };
        if buffer.is_empty() {
            return Ok(0);
        }
        match client.try_read(buffer) {
            Ok(0) => {
                self.eof = true;
                Ok(0)
            }
            Ok(count) => Ok(count),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(DriverError::io("reading from the TCP client", e)),
        }
    }

    fn write(&mut self, buffer: &[u8]) -> Result<usize> {
        let Some(client) = &self.client else {
            return Ok(0);
        };
        if buffer.is_empty() {
            return Ok(0);
        }
        match client.try_write(buffer) {
            Ok(count) => Ok(count),
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.raw_os_error() == Some(libc::ENOBUFS) =>
            {
                Ok(0)
            }
            Err(e) => Err(DriverError::io("writing to the TCP client", e)),
        }
    }

    fn clear(&mut self) -> Result<()> {
        let mut scratch = [0u8; 256];
        while self.read(&mut scratch)? > 0 {}
        Ok(())
    }

    fn eof(&self) -> bool { self.eof }
}
