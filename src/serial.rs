//! Serial line settings and their application to a descriptor.
//!
//! Settings travel either as URI options (`byte_size`, `parity`,
//! `stop_bits`) or in the compact `8N1` notation. Only the canonical POSIX
//! baud constants are accepted; asking for anything else fails instead of
//! attempting platform-specific divisor tricks.

use std::{
    ffi::CString,
    io,
    mem,
    os::fd::{FromRawFd, OwnedFd, RawFd},
};

use crate::{
    error::{DriverError, Result},
    uri::Uri,
};

/// Number of data bits per character.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ByteSize {
    /// Five data bits.
    Bits5,
    /// Six data bits.
    Bits6,
    /// Seven data bits.
    Bits7,
    /// Eight data bits.
    Bits8,
}

/// Parity checking mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Parity {
    /// No parity bit.
    None,
    /// Even parity.
    Even,
    /// Odd parity.
    Odd,
}

/// Number of stop bits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopBits {
    /// One stop bit.
    One,
    /// Two stop bits.
    Two,
}

/// Character framing settings for a serial line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SerialConfiguration {
    /// Data bits per character.
    pub byte_size: ByteSize,
    /// Parity mode.
    pub parity: Parity,
    /// Stop bits.
    pub stop_bits: StopBits,
}

impl Default for SerialConfiguration {
    /// The ubiquitous `8N1`.
    fn default() -> Self {
        Self {
            byte_size: ByteSize::Bits8,
            parity: Parity::None,
            stop_bits: StopBits::One,
        }
    }
}

fn invalid(description: &str) -> DriverError {
    DriverError::InvalidArgument(format!("invalid serial configuration: {description}"))
}

fn parse_byte_size(value: &str) -> Result<ByteSize> {
    match value {
        "5" => Ok(ByteSize::Bits5),
        "6" => Ok(ByteSize::Bits6),
        "7" => Ok(ByteSize::Bits7),
        "8" => Ok(ByteSize::Bits8),
        other => Err(invalid(&format!("byte size {other}, expected 5-8"))),
    }
}

fn parse_stop_bits(value: &str) -> Result<StopBits> {
    match value {
        "1" => Ok(StopBits::One),
        "2" => Ok(StopBits::Two),
        other => Err(invalid(&format!("stop bits {other}, expected 1 or 2"))),
    }
}

impl SerialConfiguration {
    /// Parse the compact `<bits><parity><stop>` notation, e.g. `8N1` or
    /// `7e2` (case-insensitive).
    ///
    /// # Errors
    ///
    /// [`DriverError::InvalidArgument`] when the description does not
    /// match the notation.
    pub fn parse(description: &str) -> Result<Self> {
        let bytes = description.as_bytes();
        if bytes.len() != 3 {
            return Err(invalid(description));
        }
        let byte_size = parse_byte_size(&description[..1])?;
        let parity = match bytes[1].to_ascii_uppercase() {
            b'N' => Parity::None,
            b'E' => Parity::Even,
            b'O' => Parity::Odd,
            _ => return Err(invalid(description)),
        };
        let stop_bits = parse_stop_bits(&description[2..])?;
        Ok(Self {
            byte_size,
            parity,
            stop_bits,
        })
    }

    /// Read `byte_size`, `parity` and `stop_bits` options off a URI,
    /// defaulting to `8N1` for absent ones.
    ///
    /// # Errors
    ///
    /// [`DriverError::InvalidArgument`] on out-of-range values.
    pub fn from_uri(uri: &Uri) -> Result<Self> {
        let mut config = Self::default();
        if let Some(value) = uri.option("byte_size") {
            config.byte_size = parse_byte_size(value)?;
        }
        if let Some(value) = uri.option("parity") {
            config.parity = match value {
                "none" => Parity::None,
                "even" => Parity::Even,
                "odd" => Parity::Odd,
                other => {
                    return Err(invalid(&format!(
                        "parity {other}, expected none, even or odd"
                    )));
                }
            };
        }
        if let Some(value) = uri.option("stop_bits") {
            config.stop_bits = parse_stop_bits(value)?;
        }
        Ok(config)
    }
}

/// Map a numeric rate onto its termios constant.
///
/// Rates outside the canonical set are refused; custom divisors are a
/// platform-specific game this crate does not play.
pub fn canonical_baud(rate: u32) -> Result<libc::speed_t> {
    match rate {
        1200 => Ok(libc::B1200),
        2400 => Ok(libc::B2400),
        4800 => Ok(libc::B4800),
        9600 => Ok(libc::B9600),
        19_200 => Ok(libc::B19200),
        38_400 => Ok(libc::B38400),
        57_600 => Ok(libc::B57600),
        115_200 => Ok(libc::B115200),
        230_400 => Ok(libc::B230400),
        460_800 => Ok(libc::B460800),
        576_000 => Ok(libc::B576000),
        921_600 => Ok(libc::B921600),
        1_000_000 => Ok(libc::B1000000),
        other => Err(DriverError::InvalidArgument(format!(
            "non-canonical baud rate {other}"
        ))),
    }
}

fn last_error(context: &'static str) -> DriverError {
    DriverError::io(context, io::Error::last_os_error())
}

/// Open `path` read-write, non-blocking, without becoming its controlling
/// terminal, and program raw 8-bit framing at `baud_rate`.
pub(crate) fn open_device(path: &str, baud_rate: u32) -> Result<OwnedFd> {
    let speed = canonical_baud(baud_rate)?;
    let c_path = CString::new(path)
        .map_err(|_| DriverError::InvalidArgument(format!("NUL byte in device path {path:?}")))?;

    let raw = unsafe {
        libc::open(
            c_path.as_ptr(),
            libc::O_RDWR | libc::O_NOCTTY | libc::O_SYNC | libc::O_NONBLOCK,
        )
    };
    if raw < 0 {
        return Err(last_error("opening the serial device"));
    }
    let fd = unsafe { OwnedFd::from_raw_fd(raw) };

    let mut tio: libc::termios = unsafe { mem::zeroed() };
    tio.c_cflag = libc::CS8 | libc::CREAD;
    tio.c_iflag = libc::IGNBRK;
    unsafe {
        if libc::cfsetispeed(&mut tio, speed) != 0 || libc::cfsetospeed(&mut tio, speed) != 0 {
            return Err(last_error("setting the serial baud rate"));
        }
        if libc::tcsetattr(raw, libc::TCSANOW, &tio) != 0 {
            return Err(last_error("programming the serial line"));
        }
    }
    Ok(fd)
}

/// Apply character framing settings to an already-open descriptor.
pub(crate) fn apply_configuration(fd: RawFd, config: &SerialConfiguration) -> Result<()> {
    let mut tio: libc::termios = unsafe { mem::zeroed() };
    if unsafe { libc::tcgetattr(fd, &mut tio) } != 0 {
        return Err(last_error("querying the serial line settings"));
    }

    match config.parity {
        Parity::None => tio.c_cflag &= !libc::PARENB,
        Parity::Even => {
            tio.c_cflag |= libc::PARENB;
            tio.c_cflag &= !libc::PARODD;
        }
        Parity::Odd => {
            tio.c_cflag |= libc::PARENB;
            tio.c_cflag |= libc::PARODD;
        }
    }

    tio.c_cflag &= !libc::CSIZE;
    tio.c_cflag |= match config.byte_size {
        ByteSize::Bits5 => libc::CS5,
        ByteSize::Bits6 => libc::CS6,
        ByteSize::Bits7 => libc::CS7,
        ByteSize::Bits8 => libc::CS8,
    };

    match config.stop_bits {
        StopBits::One => tio.c_cflag &= !libc::CSTOPB,
        StopBits::Two => tio.c_cflag |= libc::CSTOPB,
    }

    if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &tio) } != 0 {
        return Err(last_error("applying the serial line settings"));
    }
    Ok(())
}
