// Copyright 2025-2026 CEMAXECUTER LLC

//! Synchronous sample source for the demodulator.
//!
//! The reader sits on the consumer end of the sample queue. It waits for data
//! by polling, applies fine frequency correction from a shared oscillator
//! table and keeps a long-term signal level estimate. Waiting ends with
//! [`Stopped`] as soon as the running flag clears.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use iq_dsp::{LevelMeter, OscillatorTable};
use num_complex::Complex32;

use crate::buffer::SampleConsumer;
use crate::dump::{DumpControl, DumpSink, DumpTap};
use crate::error::Stopped;
use crate::POLL_INTERVAL;

pub struct SampleReader {
    input: SampleConsumer,
    running: Arc<AtomicBool>,
    oscillator: Arc<OscillatorTable>,
    phase: usize,
    level: LevelMeter,
    sample_count: u64,
    dump: DumpTap,
    poll_interval: Duration,
}

impl SampleReader {
    pub fn new(
        input: SampleConsumer,
        running: Arc<AtomicBool>,
        oscillator: Arc<OscillatorTable>,
    ) -> Self {
        Self {
            input,
            running,
            oscillator,
            phase: 0,
            level: LevelMeter::default(),
            sample_count: 0,
            dump: DumpTap::new(),
            poll_interval: POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Read one sample, shifted by `phase_offset` Hz.
    pub fn get_sample(&mut self, phase_offset: i32) -> Result<Complex32, Stopped> {
        self.wait_for(1)?;

        let mut one = [Complex32::default()];
        self.input.get(&mut one);
        Ok(self.process(one[0], phase_offset))
    }

    /// Fill `out` with up to `out.len()` samples, shifted by `phase_offset` Hz.
    ///
    /// Waits until the whole request (capped at the queue capacity) is
    /// available, then returns however many samples could be read.
    pub fn get_samples(&mut self, out: &mut [Complex32], phase_offset: i32) -> Result<usize, Stopped> {
        let wanted = out.len().min(self.input.capacity());
        self.wait_for(wanted)?;

        let n = self.input.get(out);
        for sample in out[..n].iter_mut() {
            *sample = self.process(*sample, phase_offset);
        }
        Ok(n)
    }

    fn wait_for(&self, wanted: usize) -> Result<(), Stopped> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(Stopped);
        }
        while self.running.load(Ordering::SeqCst) && self.input.read_available() < wanted {
            thread::sleep(self.poll_interval);
        }
        if !self.running.load(Ordering::SeqCst) {
            return Err(Stopped);
        }
        Ok(())
    }

    fn process(&mut self, sample: Complex32, phase_offset: i32) -> Complex32 {
        self.dump.record(sample);

        let mut sample = sample;
        if phase_offset != 0 {
            self.phase = self.oscillator.advance(self.phase, phase_offset);
            sample *= self.oscillator[self.phase];
        }
        self.level.update(sample);
        self.sample_count += 1;
        sample
    }

    /// Forget the frequency correction history and level estimate.
    pub fn reset(&mut self) {
        self.phase = 0;
        self.level.reset();
        self.sample_count = 0;
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    pub fn signal_level(&self) -> f32 {
        self.level.level()
    }

    pub fn sample_count(&self) -> u64 {
        self.sample_count
    }

    pub fn phase(&self) -> usize {
        self.phase
    }

    pub fn start_dumping(&self, sink: Box<dyn DumpSink>, bits: usize) {
        self.dump.control().start_dumping(sink, bits);
    }

    pub fn stop_dumping(&self) {
        self.dump.control().stop_dumping();
    }

    /// Handle for controlling the dump from another thread.
    pub fn dump_control(&self) -> DumpControl {
        self.dump.control()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{sample_ring, SampleProducer};
    use crate::dump::tests::MemorySink;
    use crate::dump::DUMP_BATCH;
    use iq_dsp::SIGNAL_LEVEL_ALPHA;
    use std::sync::Mutex;
    use std::time::Instant;

    const TABLE_LEN: usize = 1000;

    fn reader(capacity: usize) -> (SampleProducer, SampleReader, Arc<AtomicBool>) {
        let (prod, cons) = sample_ring(capacity);
        let running = Arc::new(AtomicBool::new(true));
        let table = Arc::new(OscillatorTable::new(TABLE_LEN));
        let reader = SampleReader::new(cons, running.clone(), table)
            .with_poll_interval(Duration::from_millis(1));
        (prod, reader, running)
    }

    fn ramp(n: usize) -> Vec<Complex32> {
        (0..n)
            .map(|i| Complex32::new(i as f32 * 0.01, -(i as f32) * 0.02))
            .collect()
    }

    #[test]
    fn test_zero_offset_returns_fifo_unmodified() {
        let (mut prod, mut reader, _running) = reader(64);
        let input = ramp(20);
        prod.put(&input);
        for expected in &input {
            assert_eq!(reader.get_sample(0).unwrap(), *expected);
        }
        assert_eq!(reader.phase(), 0);
        assert_eq!(reader.sample_count(), 20);
    }

    #[test]
    fn test_constant_offset_steps_phase() {
        let (mut prod, mut reader, _running) = reader(4096);
        prod.put(&vec![Complex32::new(1.0, 0.0); 3000]);

        let p = 7;
        let step = (-(p as i64)).rem_euclid(TABLE_LEN as i64) as usize;
        let mut expected = 0usize;
        for _ in 0..3000 {
            let out = reader.get_sample(p).unwrap();
            expected = (expected + step) % TABLE_LEN;
            assert_eq!(reader.phase(), expected);
            assert!(reader.phase() < TABLE_LEN);
            assert!((out.norm() - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_offset_rotates_by_table_entry() {
        let (mut prod, mut reader, _running) = reader(16);
        prod.put(&[Complex32::new(1.0, 0.0)]);
        // phase 0 - (-250) = 250: a quarter turn
        let out = reader.get_sample(-250).unwrap();
        assert!(out.re.abs() < 1e-6 && (out.im - 1.0).abs() < 1e-6, "got {}", out);
    }

    #[test]
    fn test_level_after_one_sample() {
        let (mut prod, mut reader, _running) = reader(16);
        prod.put(&[Complex32::new(0.6, 0.8)]);
        reader.get_sample(0).unwrap();
        assert!((reader.signal_level() - SIGNAL_LEVEL_ALPHA).abs() < 1e-9);
    }

    #[test]
    fn test_batch_matches_single_sample_path() {
        let input = ramp(100);

        let (mut prod_a, mut single, _ra) = reader(256);
        prod_a.put(&input);
        let singles: Vec<Complex32> = (0..100).map(|_| single.get_sample(13).unwrap()).collect();

        let (mut prod_b, mut batch, _rb) = reader(256);
        prod_b.put(&input);
        let mut out = vec![Complex32::default(); 100];
        assert_eq!(batch.get_samples(&mut out, 13).unwrap(), 100);

        assert_eq!(singles, out);
        assert_eq!(single.phase(), batch.phase());
        assert_eq!(single.signal_level(), batch.signal_level());
    }

    #[test]
    fn test_batch_larger_than_capacity_is_truncated() {
        let (mut prod, mut reader, _running) = reader(8);
        prod.put(&ramp(8));
        let mut out = vec![Complex32::default(); 32];
        assert_eq!(reader.get_samples(&mut out, 0).unwrap(), 8);
    }

    #[test]
    fn test_stopped_before_wait() {
        let (mut prod, mut reader, running) = reader(16);
        prod.put(&ramp(4));
        running.store(false, Ordering::SeqCst);
        assert_eq!(reader.get_sample(0), Err(Stopped));
        let mut out = [Complex32::default(); 2];
        assert_eq!(reader.get_samples(&mut out, 0), Err(Stopped));
    }

    #[test]
    fn test_stop_during_wait_cancels() {
        let (_prod, mut reader, running) = reader(16);
        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            running.store(false, Ordering::SeqCst);
        });
        let t0 = Instant::now();
        assert_eq!(reader.get_sample(0), Err(Stopped));
        assert!(t0.elapsed() < Duration::from_millis(150));
        stopper.join().unwrap();
    }

    #[test]
    fn test_reset_clears_state() {
        let (mut prod, mut reader, _running) = reader(16);
        prod.put(&ramp(10));
        for _ in 0..10 {
            reader.get_sample(3).unwrap();
        }
        reader.reset();
        assert_eq!(reader.phase(), 0);
        assert_eq!(reader.signal_level(), 0.0);
        assert_eq!(reader.sample_count(), 0);
    }

    #[test]
    fn test_dump_records_uncorrected_samples() {
        let (mut prod, mut reader, _running) = reader(2 * DUMP_BATCH);
        let store = Arc::new(Mutex::new(Vec::new()));
        reader.start_dumping(Box::new(MemorySink(store.clone())), 12);

        let amplitude = Complex32::new(0.3, -0.7);
        prod.put(&vec![amplitude; DUMP_BATCH]);
        let mut out = vec![Complex32::default(); DUMP_BATCH];
        reader.get_samples(&mut out, 500).unwrap();
        reader.stop_dumping();

        let written = store.lock().unwrap();
        assert_eq!(written.len(), 2 * DUMP_BATCH);
        let step = 1.0 / 4096.0;
        for iq in written.chunks_exact(2) {
            assert!((iq[0] as f32 / 4096.0 - amplitude.re).abs() <= step);
            assert!((iq[1] as f32 / 4096.0 - amplitude.im).abs() <= step);
        }
    }
}
