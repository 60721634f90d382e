//! Forward data two-way between a pair of driverframe URIs.

use std::{num::NonZeroUsize, process::ExitCode, time::Duration};

use clap::Parser;
use driverframe::{forward, Driver, ForwardMode, ForwardOptions};

const BUFFER_SIZE: usize = 32_768;

/// Forward data (two-way) between two driverframe-compatible URIs.
#[derive(Debug, Parser)]
#[command(name = "driverframe-forward", version)]
struct Cli {
    /// First endpoint.
    uri1: String,

    /// How long to wait on reads from the first endpoint, in milliseconds,
    /// before forwarding what arrived. Longer waits mean less
    /// fragmentation on the other side.
    timeout1_ms: u64,

    /// Second endpoint.
    uri2: String,

    /// Read timeout for the second endpoint, in milliseconds.
    timeout2_ms: u64,
}

async fn run(cli: Cli) -> driverframe::Result<()> {
    // Raw forwarding never parses, so the classifier is a permanent
    // "need more bytes".
    let raw = |_: &[u8]| 0i64;
    let capacity = NonZeroUsize::new(BUFFER_SIZE).expect("buffer size is non-zero");
    let write_timeout = Duration::from_secs(10);

    loop {
        let mut driver1 = Driver::new(capacity, false);
        driver1.set_write_timeout(write_timeout);
        driver1.open_uri(&cli.uri1).await?;

        let mut driver2 = Driver::new(capacity, false);
        driver2.set_write_timeout(write_timeout);
        driver2.open_uri(&cli.uri2).await?;

        let options = ForwardOptions {
            mode: ForwardMode::Raw,
            timeout_a: Duration::from_millis(cli.timeout1_ms),
            timeout_b: Duration::from_millis(cli.timeout2_ms),
            buffer_size: BUFFER_SIZE,
            ..ForwardOptions::default()
        };
        forward(&mut driver1, &raw, &mut driver2, &raw, &options).await?;
        // One side reached end-of-file; reopen both and carry on.
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(error) => {
            let _ = error.print();
            return ExitCode::from(u8::from(error.use_stderr()));
        }
    };

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("driverframe-forward: {error}");
            ExitCode::from(2)
        }
    }
}
