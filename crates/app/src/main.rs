mod pipeline;

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use iq_sdr::file::{FileHandler, SampleFormat};
use iq_sdr::{DeviceHandler, SetupError};
use pipeline::{DumpConfig, DumpFormat, RunConfig};

#[derive(Parser, Debug)]
#[command(name = "iqlink")]
#[command(about = "Streams SDR baseband samples to a demodulator at 2.048 MS/s")]
struct Cli {
    /// Device backend: pluto, hackrf or file
    #[arg(short = 'd', long, default_value = "pluto")]
    device: String,

    /// IQ file input (file backend)
    #[arg(short = 'f', long)]
    file: Option<PathBuf>,

    /// Sample format for file input: ci8, ci16, cf32
    #[arg(long, default_value = "ci16")]
    format: String,

    /// Restart the file at end of input
    #[arg(long)]
    repeat: bool,

    /// Receive frequency in Hz
    #[arg(short = 'c', long, default_value = "227360000")]
    frequency: u64,

    /// Fine frequency correction in Hz
    #[arg(short = 'o', long, default_value = "0", allow_hyphen_values = true)]
    offset: i32,

    /// Manual receive gain in dB (AGC when omitted)
    #[arg(short = 'g', long)]
    gain: Option<i64>,

    /// Transmit LO frequency in Hz (pluto)
    #[arg(long, default_value = "110000000")]
    tx_frequency: u64,

    /// Transmit a test tone at this offset in Hz (pluto)
    #[arg(long, allow_hyphen_values = true)]
    tone: Option<i32>,

    /// Disable the transmit path (pluto)
    #[arg(long)]
    no_transmit: bool,

    /// Interface name, hackrf or hackrf-SERIAL
    #[arg(long, default_value = "hackrf")]
    iface: String,

    /// HackRF LNA gain in dB
    #[arg(long, default_value = "32")]
    lna_gain: u32,

    /// HackRF VGA gain in dB
    #[arg(long, default_value = "20")]
    vga_gain: u32,

    /// Dump consumed samples to this file
    #[arg(short = 'w', long)]
    dump: Option<PathBuf>,

    /// Dump format: wav or raw
    #[arg(long, default_value = "wav")]
    dump_format: String,

    /// Dump scale as a power of two (0-15), defaults to the device bit depth
    #[arg(long)]
    dump_bits: Option<usize>,

    /// Stop after this many seconds
    #[arg(short = 't', long)]
    seconds: Option<f64>,

    /// Verbose output
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Print statistics
    #[arg(long)]
    stats: bool,
}

fn fail(msg: impl std::fmt::Display) -> ! {
    eprintln!("error: {}", msg);
    std::process::exit(1);
}

fn open_file(cli: &Cli) -> Result<Box<dyn DeviceHandler>, SetupError> {
    let Some(path) = cli.file.as_ref() else {
        fail("file backend needs -f <file>");
    };
    let format = match cli.format.as_str() {
        "ci8" => SampleFormat::Ci8,
        "ci16" => SampleFormat::Ci16,
        "cf32" => SampleFormat::Cf32,
        other => fail(format!("unknown sample format: {} (use ci8, ci16, or cf32)", other)),
    };
    let mut handler = FileHandler::open(path, format)?;
    handler.set_repeat(cli.repeat);
    Ok(Box::new(handler))
}

#[cfg(feature = "pluto")]
fn open_pluto(cli: &Cli) -> Result<Box<dyn DeviceHandler>, SetupError> {
    use iq_sdr::pluto::{self, PlutoConfig};
    use iq_sdr::rf::GainMode;

    let mut config = PlutoConfig::default();
    config.stream.rx.lo_hz = cli.frequency;
    config.stream.tx.lo_hz = cli.tx_frequency;
    config.stream.rx_gain = match cli.gain {
        Some(db) => GainMode::Manual(db),
        None => GainMode::Agc,
    };
    config.transmit = !cli.no_transmit;
    let source_rate = config.stream.source_rate;

    let mut handler = pluto::open(config)?;
    if let (Some(tone), Some(transmitter)) = (cli.tone, handler.transmitter()) {
        log::info!(
            "transmitting {} Hz tone ({}x expansion)",
            tone,
            transmitter.expansion()
        );
        if let Err(e) = pipeline::spawn_tone(transmitter, tone, source_rate, handler.running_flag())
        {
            fail(e);
        }
    }
    Ok(Box::new(handler))
}

#[cfg(not(feature = "pluto"))]
fn open_pluto(_cli: &Cli) -> Result<Box<dyn DeviceHandler>, SetupError> {
    fail("pluto support not compiled in (build with --features pluto)");
}

#[cfg(feature = "hackrf")]
fn open_hackrf(cli: &Cli) -> Result<Box<dyn DeviceHandler>, SetupError> {
    use iq_sdr::hackrf::{self, HackrfConfig};

    let config = HackrfConfig {
        iface: cli.iface.clone(),
        lna_gain: cli.lna_gain,
        vga_gain: cli.vga_gain,
    };
    Ok(Box::new(hackrf::open(&config)?))
}

#[cfg(not(feature = "hackrf"))]
fn open_hackrf(_cli: &Cli) -> Result<Box<dyn DeviceHandler>, SetupError> {
    fail("hackrf support not compiled in (build with --features hackrf)");
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if cli.verbose {
        log::info!("iqlink starting");
        log::info!("device: {}", cli.device);
        log::info!("frequency: {} Hz", cli.frequency);
    }

    let dump = cli.dump.as_ref().map(|path| {
        let format = match cli.dump_format.as_str() {
            "wav" => DumpFormat::Wav,
            "raw" => DumpFormat::Raw,
            other => fail(format!("unknown dump format: {} (use wav or raw)", other)),
        };
        DumpConfig {
            path: path.clone(),
            format,
            bits: cli.dump_bits,
        }
    });

    let handler = match cli.device.as_str() {
        "pluto" => open_pluto(&cli),
        "hackrf" => open_hackrf(&cli),
        "file" => open_file(&cli),
        other => fail(format!("unknown device: {} (use pluto, hackrf, or file)", other)),
    };
    let mut handler = match handler {
        Ok(h) => h,
        Err(e) => fail(format!("device setup failed: {}", e)),
    };

    let config = RunConfig {
        frequency: cli.frequency,
        phase_offset: cli.offset,
        dump,
        duration: cli.seconds.map(Duration::from_secs_f64),
        print_stats: cli.stats,
    };

    match pipeline::run(handler.as_mut(), &config) {
        Ok(stats) => {
            if cli.stats {
                eprintln!(
                    "done ({:.1}s): samples: {} level: {:.4}",
                    stats.elapsed.as_secs_f64(),
                    stats.samples,
                    stats.level,
                );
            }
        }
        Err(e) => fail(e),
    }
}
