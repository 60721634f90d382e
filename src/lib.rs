//! Building blocks for device drivers that exchange discrete packets over
//! byte-oriented, possibly lossy streams.
//!
//! Reads on serial lines, sockets and pipes seldom deliver a whole packet
//! in one call: bytes arrive fragmented, interleaved with garbage or
//! truncated packets. The [`Driver`] engine accumulates bytes in a bounded
//! buffer and consults a protocol-supplied [`PacketExtractor`] until a
//! complete packet emerges, honouring per-packet, per-first-byte and
//! inter-byte deadlines throughout.
//!
//! Transports hide behind the [`IoStream`] trait: raw descriptors, a
//! single-client TCP server, UDP with ICMP error masking, and a
//! deterministic in-memory stream for tests. `Driver::open_uri` picks one
//! from a `scheme://host:port?options` locator. On top of the engine sit a
//! [`Bus`] that shares one stream between several classifiers, a
//! [`forward`] pump bridging two drivers, and a [`Fixture`] that makes
//! driver tests deterministic.
//!
//! The crate never installs signal handlers; processes writing to sockets
//! should arrange for `SIGPIPE` to be ignored themselves.

pub mod bus;
pub mod deadline;
pub mod driver;
pub mod error;
pub mod extractor;
pub mod fixture;
pub mod forward;
pub mod listener;
pub mod serial;
pub mod status;
pub mod stream;
pub mod uri;

pub use bus::{Bus, BusParser};
pub use deadline::Deadline;
pub use driver::{hex_bytes, printable_bytes, Driver};
pub use error::{DriverError, LengthError, MockError, Result, TimeoutKind};
pub use extractor::PacketExtractor;
pub use fixture::{Fixture, MockContext};
pub use forward::{forward, ForwardMode, ForwardOptions};
pub use listener::{BufferListener, IoListener};
pub use serial::{ByteSize, Parity, SerialConfiguration, StopBits};
pub use status::Status;
pub use stream::{FdStream, IoStream, TcpServerStream, TestStream, TestStreamHandle, UdpServerStream};
pub use uri::Uri;
