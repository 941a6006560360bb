// Copyright 2025-2026 CEMAXECUTER LLC

//! Pull/push handler for hardware that streams at its own rate.
//!
//! An acquisition thread refills the hardware receive buffer, resamples to
//! the processing rate and enqueues the result. An optional transmission
//! thread drains the transmit queue into the hardware transmit buffer.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use byteorder::{ByteOrder, LittleEndian};
use iq_dsp::{Expander, RateConverter};
use num_complex::Complex32;

use crate::buffer::{sample_ring, SampleConsumer, SampleProducer};
use crate::error::StartError;
use crate::rf::{configure_best_effort, Direction, GainMode, RfFrontEnd, StreamConfig};
use crate::{DeviceHandler, POLL_INTERVAL, PROCESSING_RATE, STOP_GRACE};

/// Receive ADC full scale (12 bit, LSB aligned)
pub const RX_SCALE: f32 = 2048.0;
/// Transmit DAC full scale before shifting
pub const TX_SCALE: f32 = 4096.0;
/// DAC samples are MSB aligned in 16-bit words
pub const TX_SHIFT: u32 = 4;
/// Gain applied by the transmitter to source samples
pub const TX_SOURCE_GAIN: f32 = 10.0;
/// Samples of transmit queue between the source and the transmission thread
pub const TX_QUEUE_LEN: usize = 32 * 32768;

/// Raw view of a refilled hardware receive buffer.
pub struct RawBlock<'a> {
    /// Bytes from the first record to the end of the buffer
    pub data: &'a [u8],
    /// Bytes between consecutive records; each record starts with I then Q
    pub step: usize,
}

/// Raw view of the hardware transmit buffer, filled in place before a push.
pub struct RawBlockMut<'a> {
    pub data: &'a mut [u8],
    pub step: usize,
}

/// Hardware receive buffer.
pub trait RxStream: Send + 'static {
    /// Block until the hardware delivered a new buffer.
    fn refill(&mut self) -> io::Result<RawBlock<'_>>;
}

/// Hardware transmit buffer.
pub trait TxStream: Send + 'static {
    /// Complex samples per hardware buffer
    fn capacity(&self) -> usize;

    fn block_mut(&mut self) -> RawBlockMut<'_>;

    /// Hand the filled buffer to the hardware.
    fn push(&mut self) -> io::Result<usize>;
}

#[derive(Debug, Clone)]
pub struct DirectConfig {
    pub rx: StreamConfig,
    pub tx: StreamConfig,
    pub rx_gain: GainMode,
    pub tx_gain: GainMode,
    /// Rate of the samples delivered to the output buffer
    pub processing_rate: u32,
    /// Common divider of the hardware and processing rates
    pub divider: u32,
    /// Rate of the transmit signal source before expansion
    pub source_rate: u32,
    pub device_name: String,
    /// ADC resolution in bits
    pub bit_depth: usize,
}

impl Default for DirectConfig {
    fn default() -> Self {
        Self {
            rx: StreamConfig {
                bandwidth_hz: 1_536_000,
                sample_rate_hz: 2_112_000,
                lo_hz: 227_360_000,
                rf_port: "A_BALANCED".to_string(),
            },
            tx: StreamConfig {
                bandwidth_hz: 192_000,
                sample_rate_hz: 2_112_000,
                lo_hz: 110_000_000,
                rf_port: "A".to_string(),
            },
            rx_gain: GainMode::Agc,
            tx_gain: GainMode::Manual(0),
            processing_rate: PROCESSING_RATE,
            divider: 1000,
            source_rate: 192_000,
            device_name: "ADALM-Pluto".to_string(),
            bit_depth: 12,
        }
    }
}

struct RxWorker<R> {
    stream: R,
    converter: RateConverter,
    output: Option<SampleProducer>,
}

struct TxWorker<T> {
    stream: T,
    input: SampleConsumer,
}

/// Feeds the transmit queue of a [`DirectHandler`] from a signal source.
pub struct Transmitter {
    output: SampleProducer,
    expander: Expander,
}

impl Transmitter {
    /// Queue one source-rate sample. Returns false, queueing nothing, if
    /// the expanded block does not fit.
    pub fn send_sample(&mut self, sample: Complex32) -> bool {
        if self.output.write_available() < self.expander.factor() {
            return false;
        }
        let block = self.expander.expand(sample);
        self.output.put(block) == block.len()
    }

    /// Hardware samples produced per source sample
    pub fn expansion(&self) -> usize {
        self.expander.factor()
    }
}

pub struct DirectHandler<F, R, T>
where
    F: RfFrontEnd,
    R: RxStream,
    T: TxStream,
{
    front_end: F,
    config: DirectConfig,
    running: Arc<AtomicBool>,
    rx_worker: Option<RxWorker<R>>,
    tx_worker: Option<TxWorker<T>>,
    rx_thread: Option<JoinHandle<RxWorker<R>>>,
    tx_thread: Option<JoinHandle<TxWorker<T>>>,
    transmitter: Option<Transmitter>,
    has_tx: bool,
    spawned: usize,
}

impl<F, R, T> DirectHandler<F, R, T>
where
    F: RfFrontEnd,
    R: RxStream,
    T: TxStream,
{
    /// Configure both directions (best-effort) and build the rate tables.
    /// Channel and buffer resolution must already have succeeded.
    pub fn new(mut front_end: F, rx: R, tx: Option<T>, config: DirectConfig) -> Self {
        configure_best_effort(&mut front_end, Direction::Rx, &config.rx, config.rx_gain);
        if tx.is_some() {
            configure_best_effort(&mut front_end, Direction::Tx, &config.tx, config.tx_gain);
        }

        let converter = RateConverter::new(
            config.rx.sample_rate_hz,
            config.processing_rate,
            config.divider,
        );

        let has_tx = tx.is_some();
        let (tx_worker, transmitter) = match tx {
            Some(stream) => {
                let (prod, cons) = sample_ring(TX_QUEUE_LEN);
                let expander =
                    Expander::new(config.tx.sample_rate_hz, config.source_rate, TX_SOURCE_GAIN);
                (
                    Some(TxWorker {
                        stream,
                        input: cons,
                    }),
                    Some(Transmitter {
                        output: prod,
                        expander,
                    }),
                )
            }
            None => (None, None),
        };

        Self {
            front_end,
            config,
            running: Arc::new(AtomicBool::new(false)),
            rx_worker: Some(RxWorker {
                stream: rx,
                converter,
                output: None,
            }),
            tx_worker,
            rx_thread: None,
            tx_thread: None,
            transmitter,
            has_tx,
            spawned: 0,
        }
    }

    /// Take the transmit queue producer. Available once, and only when the
    /// handler was built with a transmit stream.
    pub fn transmitter(&mut self) -> Option<Transmitter> {
        self.transmitter.take()
    }

    /// Worker threads spawned over the handler's lifetime
    pub fn spawned_threads(&self) -> usize {
        self.spawned
    }

    fn spawn_rx(&mut self, mut worker: RxWorker<R>) -> Result<(), StartError> {
        let running = self.running.clone();
        let handle = thread::Builder::new()
            .name("rx-acquire".to_string())
            .spawn(move || {
                run_receiver(&mut worker, &running);
                worker
            })
            .map_err(StartError::Spawn)?;
        self.rx_thread = Some(handle);
        self.spawned += 1;
        Ok(())
    }

    fn spawn_tx(&mut self, mut worker: TxWorker<T>) -> Result<(), StartError> {
        let running = self.running.clone();
        let handle = thread::Builder::new()
            .name("tx-transmit".to_string())
            .spawn(move || {
                run_transmitter(&mut worker, &running);
                worker
            })
            .map_err(StartError::Spawn)?;
        self.tx_thread = Some(handle);
        self.spawned += 1;
        Ok(())
    }
}

impl<F, R, T> DeviceHandler for DirectHandler<F, R, T>
where
    F: RfFrontEnd,
    R: RxStream,
    T: TxStream,
{
    fn start(&mut self, frequency: u64) -> Result<(), StartError> {
        // The flag alone is not ours: the reader can set it too
        if self.rx_thread.is_some() && self.running.load(Ordering::SeqCst) {
            return Ok(());
        }
        // Collect workers whose flag was cleared from outside
        self.stop();

        match &self.rx_worker {
            None => return Err(StartError::WorkerLost),
            Some(w) if w.output.is_none() => return Err(StartError::NoOutput),
            Some(_) => {}
        }
        if self.has_tx && self.tx_worker.is_none() {
            return Err(StartError::WorkerLost);
        }

        self.front_end
            .set_local_oscillator(Direction::Rx, frequency)
            .map_err(StartError::Tune)?;
        self.config.rx.lo_hz = frequency;

        // Workers check the flag on their first iteration
        self.running.store(true, Ordering::SeqCst);

        if let Some(worker) = self.rx_worker.take() {
            if let Err(e) = self.spawn_rx(worker) {
                self.running.store(false, Ordering::SeqCst);
                return Err(e);
            }
        }
        if let Some(worker) = self.tx_worker.take() {
            if let Err(e) = self.spawn_tx(worker) {
                self.stop();
                return Err(e);
            }
        }

        log::info!(
            "streaming started ({:.3} MHz, {} S/s -> {} S/s{})",
            frequency as f64 / 1e6,
            self.config.rx.sample_rate_hz,
            self.config.processing_rate,
            if self.has_tx { ", transmit on" } else { "" },
        );
        Ok(())
    }

    fn stop(&mut self) {
        let spawned = self.rx_thread.is_some() || self.tx_thread.is_some();
        self.running.store(false, Ordering::SeqCst);
        if !spawned {
            return;
        }
        thread::sleep(STOP_GRACE);

        if let Some(handle) = self.rx_thread.take() {
            match handle.join() {
                Ok(worker) => self.rx_worker = Some(worker),
                Err(_) => log::error!("acquisition thread panicked"),
            }
        }
        if let Some(handle) = self.tx_thread.take() {
            match handle.join() {
                Ok(worker) => self.tx_worker = Some(worker),
                Err(_) => log::error!("transmission thread panicked"),
            }
        }
        log::info!("streaming stopped");
    }

    fn attach_output(&mut self, output: SampleProducer) {
        match self.rx_worker.as_mut() {
            Some(worker) => worker.output = Some(output),
            None => log::warn!("cannot attach output while streaming"),
        }
    }

    fn running_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    fn sample_rate(&self) -> u32 {
        self.config.processing_rate
    }

    fn center_frequency(&self) -> u64 {
        self.config.rx.lo_hz
    }

    fn bit_depth(&self) -> usize {
        self.config.bit_depth
    }

    fn device_name(&self) -> String {
        self.config.device_name.clone()
    }
}

impl<F, R, T> Drop for DirectHandler<F, R, T>
where
    F: RfFrontEnd,
    R: RxStream,
    T: TxStream,
{
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_receiver<R: RxStream>(worker: &mut RxWorker<R>, running: &AtomicBool) {
    let RxWorker {
        stream,
        converter,
        output,
    } = worker;
    let Some(output) = output.as_mut() else {
        return;
    };
    let mut dropped: u64 = 0;

    while running.load(Ordering::SeqCst) {
        let block = match stream.refill() {
            Ok(block) => block,
            Err(e) => {
                log::warn!("receive refill failed: {}", e);
                thread::sleep(POLL_INTERVAL);
                continue;
            }
        };
        if block.step < 4 {
            log::error!("receive record stride {} too small", block.step);
            break;
        }

        for record in block.data.chunks_exact(block.step) {
            let i = LittleEndian::read_i16(&record[0..2]);
            let q = LittleEndian::read_i16(&record[2..4]);
            let sample = Complex32::new(i as f32 / RX_SCALE, q as f32 / RX_SCALE);
            if let Some(resampled) = converter.push(sample) {
                let written = output.put(resampled);
                dropped += (resampled.len() - written) as u64;
            }
        }
    }

    if dropped > 0 {
        log::debug!("receive buffer overflow: {} samples dropped", dropped);
    }
}

/// Scale a transmit component into the MSB-aligned 12-bit DAC window.
pub fn to_dac(x: f32) -> i16 {
    let v = (x * TX_SCALE).clamp(-2048.0, 2047.0) as i16;
    v << TX_SHIFT
}

fn run_transmitter<T: TxStream>(worker: &mut TxWorker<T>, running: &AtomicBool) {
    let TxWorker { stream, input } = worker;
    let mut pending = vec![Complex32::default(); stream.capacity()];

    log::info!("transmitter started ({} samples per buffer)", pending.len());
    while running.load(Ordering::SeqCst) {
        let amount = input.get(&mut pending);
        let block = stream.block_mut();
        if block.step < 4 {
            log::error!("transmit record stride {} too small", block.step);
            break;
        }
        for (index, record) in block.data.chunks_exact_mut(block.step).enumerate() {
            let (i, q) = if index < amount {
                (to_dac(pending[index].re), to_dac(pending[index].im))
            } else {
                (0, 0)
            };
            LittleEndian::write_i16(&mut record[0..2], i);
            LittleEndian::write_i16(&mut record[2..4], q);
        }
        if let Err(e) = stream.push() {
            log::warn!("transmit push failed: {}", e);
            thread::sleep(POLL_INTERVAL);
        }
    }
}
