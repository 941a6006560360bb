use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver};
use num_complex::Complex32;

use iq_dsp::OscillatorTable;
use iq_output::{RawDump, WavDump};
use iq_sdr::dump::{DumpSink, DUMP_SCALES};
use iq_sdr::{sample_ring, DeviceHandler, SampleReader, POLL_INTERVAL};

/// Samples between the acquisition thread and the reader
pub const RING_CAPACITY: usize = 32 * 32768;

/// Samples consumed per reader call
const READ_BLOCK: usize = 2048;

/// Largest dump scale exponent
const MAX_DUMP_BITS: usize = DUMP_SCALES.len() - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpFormat {
    Wav,
    Raw,
}

#[derive(Debug, Clone)]
pub struct DumpConfig {
    pub path: PathBuf,
    pub format: DumpFormat,
    /// Scale as a power of two; the device bit depth when unset
    pub bits: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub frequency: u64,
    /// Fine frequency correction applied by the reader, in Hz
    pub phase_offset: i32,
    pub dump: Option<DumpConfig>,
    pub duration: Option<Duration>,
    pub print_stats: bool,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RunStats {
    pub samples: u64,
    pub elapsed: Duration,
    pub level: f32,
}

/// Why the run ended
enum Shutdown {
    Interrupt,
    Timeout,
}

fn open_dump(cfg: &DumpConfig, sample_rate: u32) -> Result<Box<dyn DumpSink>, String> {
    let sink: Box<dyn DumpSink> = match cfg.format {
        DumpFormat::Wav => Box::new(
            WavDump::create(&cfg.path, sample_rate)
                .map_err(|e| format!("failed to create {}: {}", cfg.path.display(), e))?,
        ),
        DumpFormat::Raw => Box::new(
            RawDump::create(&cfg.path)
                .map_err(|e| format!("failed to create {}: {}", cfg.path.display(), e))?,
        ),
    };
    Ok(sink)
}

/// Clears `running` on Ctrl-C or once `duration` has passed, whichever
/// comes first.
fn spawn_watchdog(
    interrupts: Receiver<()>,
    duration: Option<Duration>,
    running: Arc<AtomicBool>,
) -> Result<JoinHandle<()>, String> {
    thread::Builder::new()
        .name("watchdog".to_string())
        .spawn(move || {
            let deadline = match duration {
                Some(d) => channel::after(d),
                None => channel::never(),
            };
            let reason = crossbeam::select! {
                recv(interrupts) -> _ => Shutdown::Interrupt,
                recv(deadline) -> _ => Shutdown::Timeout,
            };
            match reason {
                Shutdown::Interrupt => log::info!("interrupted, stopping"),
                Shutdown::Timeout => log::info!("run time elapsed, stopping"),
            }
            running.store(false, Ordering::SeqCst);
        })
        .map_err(|e| format!("failed to spawn watchdog: {}", e))
}

/// Stream from `handler` into a sample reader until interrupted.
pub fn run(handler: &mut dyn DeviceHandler, cfg: &RunConfig) -> Result<RunStats, String> {
    let (producer, consumer) = sample_ring(RING_CAPACITY);
    handler.attach_output(producer);

    let sample_rate = handler.sample_rate();
    let oscillator = Arc::new(OscillatorTable::new(sample_rate as usize));
    let running = handler.running_flag();
    let mut reader = SampleReader::new(consumer, running.clone(), oscillator);

    log::info!(
        "device: {} ({} bits, {} S/s)",
        handler.device_name(),
        handler.bit_depth(),
        sample_rate
    );

    if let Some(dump) = &cfg.dump {
        let bits = dump.bits.unwrap_or_else(|| handler.bit_depth().min(MAX_DUMP_BITS));
        reader.start_dumping(open_dump(dump, sample_rate)?, bits);
        log::info!("dumping to {} ({} bits)", dump.path.display(), bits);
    }

    let (interrupt_tx, interrupt_rx) = channel::bounded(1);
    ctrlc::set_handler(move || {
        let _ = interrupt_tx.try_send(());
    })
    .map_err(|e| format!("failed to install Ctrl-C handler: {}", e))?;

    handler
        .start(cfg.frequency)
        .map_err(|e| format!("failed to start streaming: {}", e))?;
    let watchdog = spawn_watchdog(interrupt_rx, cfg.duration, running)?;

    let mut block = vec![Complex32::default(); READ_BLOCK];
    let start = Instant::now();
    let mut last_stats = Instant::now();

    // Ends when the watchdog, or anything else, clears the running flag
    while let Ok(n) = reader.get_samples(&mut block, cfg.phase_offset) {
        if n == 0 {
            thread::sleep(POLL_INTERVAL);
        }
        if cfg.print_stats && last_stats.elapsed() >= Duration::from_secs(5) {
            eprintln!(
                "[{:.1}s] samples: {} level: {:.4}",
                start.elapsed().as_secs_f64(),
                reader.sample_count(),
                reader.signal_level(),
            );
            last_stats = Instant::now();
        }
    }

    reader.stop_dumping();
    handler.stop();

    let stats = RunStats {
        samples: reader.sample_count(),
        elapsed: start.elapsed(),
        level: reader.signal_level(),
    };

    if !watchdog.is_finished() {
        log::debug!("streaming ended before the watchdog fired");
    } else if watchdog.join().is_err() {
        log::error!("watchdog thread panicked");
    }

    Ok(stats)
}

/// Feed a continuous tone into a transmitter until `running` clears.
#[cfg(feature = "pluto")]
pub fn spawn_tone(
    mut transmitter: iq_sdr::direct::Transmitter,
    tone_hz: i32,
    source_rate: u32,
    running: Arc<AtomicBool>,
) -> Result<JoinHandle<()>, String> {
    let table = OscillatorTable::new(source_rate as usize);
    thread::Builder::new()
        .name("tone".to_string())
        .spawn(move || {
            let mut phase = 0;
            let mut pending: Option<Complex32> = None;
            // Wait for the handler to start
            while !running.load(Ordering::SeqCst) {
                thread::sleep(POLL_INTERVAL);
            }
            while running.load(Ordering::SeqCst) {
                let sample = match pending.take() {
                    Some(s) => s,
                    None => {
                        phase = table.advance(phase, -tone_hz);
                        table[phase] * 0.05
                    }
                };
                if !transmitter.send_sample(sample) {
                    pending = Some(sample);
                    thread::sleep(POLL_INTERVAL);
                }
            }
        })
        .map_err(|e| format!("failed to spawn tone source: {}", e))
}
