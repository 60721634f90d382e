//! Dump whatever arrives on a driverframe URI as hex + ASCII.

use std::{num::NonZeroUsize, process::ExitCode, time::Duration};

use clap::Parser;
use driverframe::Driver;

const BUFFER_SIZE: usize = 32_768;
const COLUMN_SIZE: usize = 8;
const LINE_SIZE: usize = COLUMN_SIZE * 2;

/// Display data coming from a driverframe-compatible URI.
#[derive(Debug, Parser)]
#[command(name = "driverframe-cat", version)]
struct Cli {
    /// URI to read from, e.g. tcp://host:port or serial:///dev/ttyUSB0:115200.
    uri: String,

    /// How long to wait on each read, in milliseconds, before displaying
    /// whatever arrived.
    #[arg(default_value_t = 100)]
    timeout_ms: u64,
}

/// Accumulates bytes and prints 16-per-line hex alongside the ASCII
/// rendering once a line fills up.
#[derive(Default)]
struct HexDump {
    line: Vec<u8>,
}

impl HexDump {
    fn push(&mut self, byte: u8) {
        self.line.push(byte);
        if self.line.len() == LINE_SIZE {
            self.flush();
        }
    }

    fn flush(&mut self) {
        if self.line.is_empty() {
            return;
        }
        let mut hex = String::new();
        for (index, byte) in self.line.iter().enumerate() {
            if index > 0 {
                hex.push(' ');
                if index % COLUMN_SIZE == 0 {
                    hex.push(' ');
                }
            }
            hex.push_str(&format!("{byte:02x}"));
        }
        let ascii: String = self
            .line
            .iter()
            .map(|&byte| {
                if byte.is_ascii_graphic() || byte == b' ' {
                    char::from(byte)
                } else {
                    '.'
                }
            })
            .collect();
        let width = LINE_SIZE * 3 + 1;
        println!("{hex:width$}  {ascii}");
        self.line.clear();
    }
}

async fn run(cli: Cli) -> driverframe::Result<()> {
    let mut driver = Driver::new(
        NonZeroUsize::new(BUFFER_SIZE).expect("buffer size is non-zero"),
        false,
    );
    driver.open_uri(&cli.uri).await?;

    let timeout = Duration::from_millis(cli.timeout_ms);
    let mut buffer = vec![0; BUFFER_SIZE];
    let mut dump = HexDump::default();

    loop {
        let count = driver
            .read_raw_timed(&mut buffer, timeout, timeout, None)
            .await?;
        for &byte in &buffer[..count] {
            dump.push(byte);
        }
        if count > 0 {
            dump.flush();
        }
        if driver.eof() {
            return Ok(());
        }
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
            eprintln!("driverframe-cat: {error}");
            ExitCode::from(2)
        }
    }
}
