//! Bi-directional pump between two drivers.
//!
//! Useful for bridging transports (serial device to TCP, say) or for
//! interposing on a conversation. Each direction reads one chunk, either a
//! raw span or a complete packet depending on the mode, and writes it to
//! the opposite driver. The per-side timeout trades latency against
//! fragmentation when a slow upstream feeds a packet-based downstream.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::{driver::Driver, error::Result, extractor::PacketExtractor};

/// How chunks are lifted off a driver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ForwardMode {
    /// Move bytes as they come, without parsing.
    Raw,
    /// Move only complete packets, as framed by each side's classifier.
    Packet,
}

/// Knobs for [`forward`].
#[derive(Clone, Debug)]
pub struct ForwardOptions {
    /// Chunking discipline.
    pub mode: ForwardMode,
    /// Read timeout on side A.
    pub timeout_a: Duration,
    /// Read timeout on side B.
    pub timeout_b: Duration,
    /// Size of the shuttle buffer; must hold a maximum-size packet of
    /// either driver in packet mode.
    pub buffer_size: usize,
    /// Forward only A towards B.
    pub one_way: bool,
    /// Cooperative stop signal; the pump exits at the next iteration.
    pub stop: CancellationToken,
}

impl Default for ForwardOptions {
    fn default() -> Self {
        Self {
            mode: ForwardMode::Raw,
            timeout_a: Duration::from_millis(100),
            timeout_b: Duration::from_millis(100),
            buffer_size: 32_768,
            one_way: false,
            stop: CancellationToken::new(),
        }
    }
}

enum Side {
    A,
    B,
}

/// Pump data between `a` and `b` until either side reports end-of-file or
/// the stop token fires.
///
/// Read timeouts are part of normal operation and never abort the pump;
/// every other error does. In packet mode, only complete packets cross
/// over; a partial packet waits on its own side.
///
/// # Errors
///
/// Stream faults and length errors from either side.
pub async fn forward(
    a: &mut Driver,
    extractor_a: &dyn PacketExtractor,
    b: &mut Driver,
    extractor_b: &dyn PacketExtractor,
    options: &ForwardOptions,
) -> Result<()> {
    const POLL_TICK: Duration = Duration::from_secs(10);

    let mut chunk = vec![0; options.buffer_size];

    while !a.eof() && !b.eof() {
        let woken = tokio::select! {
            () = options.stop.cancelled() => break,
            ready = a.wait_read(POLL_TICK) => match ready {
                Ok(()) => Some(Side::A),
                Err(e) if e.is_wait_timeout() => None,
                Err(e) => return Err(e),
            },
            ready = b.wait_read(POLL_TICK), if !options.one_way => match ready {
                Ok(()) => Some(Side::B),
                Err(e) if e.is_wait_timeout() => None,
                Err(e) => return Err(e),
            },
        };

        match woken {
            Some(Side::A) => {
                pump(a, extractor_a, options.timeout_a, b, &mut chunk, options.mode).await?;
            }
            Some(Side::B) => {
                pump(b, extractor_b, options.timeout_b, a, &mut chunk, options.mode).await?;
            }
            None => {}
        }
    }
    Ok(())
}

/// Move one chunk from `from` to `to`, treating read timeouts as "nothing
/// to move this round".
async fn pump(
    from: &mut Driver,
    extractor: &dyn PacketExtractor,
    timeout: Duration,
    to: &mut Driver,
    chunk: &mut [u8],
    mode: ForwardMode,
) -> Result<()> {
    let size = match mode {
        ForwardMode::Raw => from.read_raw_timed(chunk, timeout, timeout, None).await?,
        ForwardMode::Packet => {
            match from.read_packet_timed(extractor, chunk, timeout, timeout).await {
                Ok(size) => size,
                Err(e) if e.is_timeout() => 0,
                Err(e) => return Err(e),
            }
        }
    };
    if size > 0 {
        to.write_packet(&chunk[..size]).await?;
    }
    Ok(())
}
