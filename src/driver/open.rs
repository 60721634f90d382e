//! Scheme dispatch: turning a URI into an attached stream.

use std::{
    fs::OpenOptions,
    net::{Ipv4Addr, SocketAddr},
    os::{fd::OwnedFd, unix::fs::OpenOptionsExt},
};

use log::warn;
use tokio::net::{lookup_host, TcpStream};

use crate::{
    error::{DriverError, Result},
    serial::{self, SerialConfiguration},
    stream::{FdStream, IoStream, TcpServerStream, TestStream, UdpServerStream},
    uri::Uri,
};

use super::Driver;

const KNOWN_SCHEMES: [&str; 7] = [
    "serial",
    "tcp",
    "tcpserver",
    "udp",
    "udpserver",
    "file",
    "test",
];

fn port_u16(port: u32, what: &str) -> Result<u16> {
    u16::try_from(port)
        .map_err(|_| DriverError::InvalidArgument(format!("{what} port {port} out of range")))
}

fn require_port(port: u32, what: &str) -> Result<u16> {
    if port == 0 {
        return Err(DriverError::InvalidArgument(format!(
            "missing port specification in {what} URI"
        )));
    }
    port_u16(port, what)
}

async fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    lookup_host((host, port))
        .await
        .map_err(|e| DriverError::io("resolving the remote host", e))?
        .next()
        .ok_or_else(|| DriverError::InvalidArgument(format!("cannot resolve host {host}")))
}

impl Driver {
    /// Attach the stream a URI names.
    ///
    /// Recognised schemes: `serial://device:baud`, `tcp://host:port`,
    /// `tcpserver://:port`, `udp://host:port[?options]`,
    /// `udpserver://port`, `file://path` and `test://`. The historical
    /// `udp://host:remote_port:local_port` shape is accepted and
    /// rewritten. Any previously attached stream is dropped, except that
    /// `test://` keeps an already-attached test stream in place.
    ///
    /// # Errors
    ///
    /// [`DriverError::InvalidArgument`] for syntax violations, unknown
    /// schemes and conflicting options; [`DriverError::Io`] when the
    /// transport cannot be opened.
    pub async fn open_uri(&mut self, uri: &str) -> Result<()> {
        let parsed = if uri.starts_with("udp://") {
            Uri::parse_udp_compat(uri)?
        } else {
            Uri::parse(uri)?
        };
        let scheme = parsed.scheme();
        if !KNOWN_SCHEMES.contains(&scheme) {
            return Err(DriverError::InvalidArgument(format!(
                "unknown scheme {scheme}"
            )));
        }

        match scheme {
            "serial" => {
                if parsed.port() == 0 {
                    return Err(DriverError::InvalidArgument(
                        "missing baud rate specification in serial URI".into(),
                    ));
                }
                let config = SerialConfiguration::from_uri(&parsed)?;
                self.open_serial(parsed.host(), parsed.port(), &config)
            }
            "tcp" => {
                let port = require_port(parsed.port(), "tcp")?;
                self.open_tcp(parsed.host(), port).await
            }
            "tcpserver" => {
                let port = require_port(parsed.port(), "tcp server")?;
                self.open_tcp_server(port)
            }
            "udp" => self.open_udp_uri(&parsed).await,
            "udpserver" => {
                let port = parsed.host().parse().map_err(|_| {
                    DriverError::InvalidArgument(format!(
                        "invalid udpserver port {:?}",
                        parsed.host()
                    ))
                })?;
                self.open_udp_server(port)
            }
            "file" => self.open_file(parsed.host()),
            "test" => {
                let already_test = self
                    .stream
                    .as_deref()
                    .is_some_and(|stream| stream.is_test_stream());
                if !already_test {
                    self.set_main_stream(Box::new(TestStream::new()));
                }
                Ok(())
            }
            _ => unreachable!("scheme was validated against KNOWN_SCHEMES"),
        }
    }

    /// Adopt an already-open descriptor as the main stream.
    ///
    /// Ownership transfers: the descriptor is closed when the stream is
    /// dropped. `has_eof` selects whether zero-byte reads mean
    /// end-of-file; serial converters lie about that, so the serial path
    /// disables it.
    ///
    /// # Errors
    ///
    /// Propagates descriptor registration failures.
    pub fn set_file_descriptor(&mut self, fd: OwnedFd, has_eof: bool) -> Result<()> {
        self.set_main_stream(Box::new(FdStream::new(fd, has_eof)?));
        Ok(())
    }

    /// Open and configure a serial device.
    ///
    /// # Errors
    ///
    /// [`DriverError::InvalidArgument`] for non-canonical baud rates,
    /// [`DriverError::Io`] when the device cannot be opened or programmed.
    pub fn open_serial(
        &mut self,
        device: &str,
        baud_rate: u32,
        config: &SerialConfiguration,
    ) -> Result<()> {
        use std::os::fd::AsRawFd;

        let fd = serial::open_device(device, baud_rate)?;
        serial::apply_configuration(fd.as_raw_fd(), config)?;
        self.set_file_descriptor(fd, false)
    }

    /// Connect to a TCP endpoint, with `TCP_NODELAY` set.
    ///
    /// # Errors
    ///
    /// [`DriverError::Io`] when resolution or connection fails.
    pub async fn open_tcp(&mut self, host: &str, port: u16) -> Result<()> {
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|e| DriverError::io("connecting the TCP socket", e))?;
        stream
            .set_nodelay(true)
            .map_err(|e| DriverError::io("setting TCP_NODELAY", e))?;
        let std_stream = stream
            .into_std()
            .map_err(|e| DriverError::io("detaching the TCP socket", e))?;
        self.set_file_descriptor(OwnedFd::from(std_stream), true)
    }

    /// Listen for a single TCP client on `port`.
    ///
    /// # Errors
    ///
    /// [`DriverError::Io`] when the socket cannot be bound.
    pub fn open_tcp_server(&mut self, port: u16) -> Result<()> {
        let stream = TcpServerStream::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))?;
        self.set_main_stream(Box::new(stream));
        Ok(())
    }

    /// Bind a UDP socket on `port`, learning the peer from the first
    /// datagram received.
    ///
    /// # Errors
    ///
    /// [`DriverError::Io`] when the socket cannot be bound.
    pub fn open_udp_server(&mut self, port: u16) -> Result<()> {
        let stream = UdpServerStream::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))?;
        self.set_main_stream(Box::new(stream));
        Ok(())
    }

    /// Open a plain file read-write and non-blocking.
    ///
    /// # Errors
    ///
    /// [`DriverError::Io`] when the file cannot be opened.
    pub fn open_file(&mut self, path: &str) -> Result<()> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path)
            .map_err(|e| DriverError::io("opening the file", e))?;
        self.set_file_descriptor(OwnedFd::from(file), true)
    }

    /// `udp://host:port` with its option matrix.
    ///
    /// Defaults preserve the historical behaviour and warn where that
    /// behaviour is scheduled to change: `connected` defaults to `1` only
    /// when no `local_port` is given, and `ignore_connrefused` defaults
    /// accordingly. Asking for `ignore_connrefused=0` on an unconnected
    /// socket is refused, as nothing would ever report the error.
    async fn open_udp_uri(&mut self, uri: &Uri) -> Result<()> {
        let remote_port = require_port(uri.port(), "udp")?;

        let local_port = uri.option("local_port");
        let connected = uri.option("connected");
        let ignore_connrefused = uri.option("ignore_connrefused");

        if local_port.is_none() && ignore_connrefused.is_none() {
            warn!(
                "udp://host:port streams historically would report connection refused \
                 errors; this default will change. Set ignore_connrefused explicitly \
                 to silence this warning."
            );
        }
        if local_port.is_some() && connected.is_none() {
            warn!(
                "udp://host:remote_port?local_port=PORT historically left the socket \
                 unconnected, letting any remote host send to it; this default will \
                 change. Set connected explicitly to silence this warning."
            );
        }

        let connected = match connected {
            Some(value) => value == "1",
            None => local_port.is_none(),
        };
        let ignore_connrefused = match ignore_connrefused {
            Some(value) => value == "1",
            None => !connected || local_port.is_some(),
        };
        let ignore_hostunreach = uri.option_or("ignore_hostunreach", "0") == "1";
        let ignore_netunreach = uri.option_or("ignore_netunreach", "0") == "1";

        if !ignore_connrefused && !connected {
            return Err(DriverError::InvalidArgument(
                "cannot set ignore_connrefused=0 on an unconnected UDP stream".into(),
            ));
        }

        let local_port = match local_port {
            Some(value) => value.parse().map_err(|_| {
                DriverError::InvalidArgument(format!("invalid local_port {value:?}"))
            })?,
            None => 0,
        };

        let peer = resolve(uri.host(), remote_port).await?;
        let local = SocketAddr::from((Ipv4Addr::UNSPECIFIED, local_port));
        let mut stream = UdpServerStream::bind_to_peer(local, peer, connected)?;
        stream.set_ignore_connrefused(ignore_connrefused);
        stream.set_ignore_hostunreach(ignore_hostunreach);
        stream.set_ignore_netunreach(ignore_netunreach);
        self.set_main_stream(Box::new(stream));
        Ok(())
    }
}
