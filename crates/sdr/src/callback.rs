// Copyright 2025-2026 CEMAXECUTER LLC

//! Push-only handler for hardware whose vendor library calls back with
//! samples already at the processing rate.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use num_complex::Complex32;

use crate::buffer::SampleProducer;
use crate::error::StartError;
use crate::rf::RfError;
use crate::{DeviceHandler, STOP_GRACE};

/// Destination handed to the vendor callback. Converts raw integer I/Q into
/// complex samples and enqueues them.
pub struct CallbackSink {
    output: SampleProducer,
    running: Arc<AtomicBool>,
    scratch: Vec<Complex32>,
    dropped: u64,
}

impl CallbackSink {
    fn new(output: SampleProducer, running: Arc<AtomicBool>) -> Self {
        Self {
            output,
            running,
            scratch: Vec::new(),
            dropped: 0,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Enqueue complex samples as-is.
    pub fn push(&mut self, samples: &[Complex32]) {
        if !self.is_running() {
            return;
        }
        let written = self.output.put(samples);
        self.dropped += (samples.len() - written) as u64;
    }

    /// Enqueue interleaved signed 8-bit I/Q.
    pub fn push_ci8(&mut self, data: &[i8]) {
        self.convert(data.chunks_exact(2).map(|iq| {
            Complex32::new(iq[0] as f32 / 128.0, iq[1] as f32 / 128.0)
        }));
    }

    /// Enqueue interleaved signed 16-bit I/Q, dividing by `full_scale`.
    pub fn push_ci16(&mut self, data: &[i16], full_scale: f32) {
        self.convert(data.chunks_exact(2).map(|iq| {
            Complex32::new(iq[0] as f32 / full_scale, iq[1] as f32 / full_scale)
        }));
    }

    fn convert(&mut self, samples: impl Iterator<Item = Complex32>) {
        if !self.is_running() {
            return;
        }
        let mut scratch = std::mem::take(&mut self.scratch);
        scratch.clear();
        scratch.extend(samples);
        self.push(&scratch);
        self.scratch = scratch;
    }

    /// Samples discarded because the output was full
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

/// Vendor device that drives sample delivery from its own thread.
pub trait CallbackDevice: Send {
    fn tune(&mut self, frequency: u64) -> Result<(), RfError>;

    /// Begin delivering samples into `sink`. On failure the sink is handed
    /// back so the handler can retry later.
    fn start_streaming(&mut self, sink: CallbackSink) -> Result<(), (StartError, CallbackSink)>;

    /// Stop delivery and return the sink once no callback can still run.
    fn stop_streaming(&mut self) -> Option<CallbackSink>;

    fn sample_rate(&self) -> u32;

    /// ADC resolution in bits
    fn bit_depth(&self) -> usize;

    fn name(&self) -> String;
}

pub struct CallbackHandler<D: CallbackDevice> {
    device: D,
    running: Arc<AtomicBool>,
    output: Option<SampleProducer>,
    center_freq: u64,
    /// The device holds the sink
    streaming: bool,
}

impl<D: CallbackDevice> CallbackHandler<D> {
    pub fn new(device: D) -> Self {
        Self {
            device,
            running: Arc::new(AtomicBool::new(false)),
            output: None,
            center_freq: 0,
            streaming: false,
        }
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }
}

impl<D: CallbackDevice> DeviceHandler for CallbackHandler<D> {
    fn start(&mut self, frequency: u64) -> Result<(), StartError> {
        if self.streaming && self.running.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.stop();
        if self.output.is_none() {
            return Err(StartError::NoOutput);
        }
        self.device.tune(frequency).map_err(StartError::Tune)?;
        self.center_freq = frequency;

        let output = self.output.take().ok_or(StartError::NoOutput)?;
        self.running.store(true, Ordering::SeqCst);
        let sink = CallbackSink::new(output, self.running.clone());
        if let Err((e, sink)) = self.device.start_streaming(sink) {
            self.running.store(false, Ordering::SeqCst);
            self.output = Some(sink.output);
            return Err(e);
        }
        self.streaming = true;

        log::info!(
            "callback streaming started ({:.3} MHz, {} S/s)",
            frequency as f64 / 1e6,
            self.device.sample_rate()
        );
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if !self.streaming {
            return;
        }
        thread::sleep(STOP_GRACE);
        self.streaming = false;

        match self.device.stop_streaming() {
            Some(sink) => {
                if sink.dropped() > 0 {
                    log::debug!("receive buffer overflow: {} samples dropped", sink.dropped());
                }
                self.output = Some(sink.output);
            }
            None => log::error!("device did not return its sample sink"),
        }
        log::info!("callback streaming stopped");
    }

    fn attach_output(&mut self, output: SampleProducer) {
        if self.streaming {
            log::warn!("cannot attach output while streaming");
            return;
        }
        self.output = Some(output);
    }

    fn running_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    fn sample_rate(&self) -> u32 {
        self.device.sample_rate()
    }

    fn center_frequency(&self) -> u64 {
        self.center_freq
    }

    fn bit_depth(&self) -> usize {
        self.device.bit_depth()
    }

    fn device_name(&self) -> String {
        self.device.name()
    }
}

impl<D: CallbackDevice> Drop for CallbackHandler<D> {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::sample_ring;
    use std::sync::Mutex;

    /// Device whose "vendor thread" is driven by the test through a shared slot.
    struct ManualDevice {
        slot: Arc<Mutex<Option<CallbackSink>>>,
        tuned: Vec<u64>,
        fail_start: bool,
    }

    impl CallbackDevice for ManualDevice {
        fn tune(&mut self, frequency: u64) -> Result<(), RfError> {
            self.tuned.push(frequency);
            Ok(())
        }

        fn start_streaming(
            &mut self,
            sink: CallbackSink,
        ) -> Result<(), (StartError, CallbackSink)> {
            if self.fail_start {
                return Err((
                    StartError::Vendor {
                        call: "start_rx",
                        code: -5,
                    },
                    sink,
                ));
            }
            *self.slot.lock().unwrap() = Some(sink);
            Ok(())
        }

        fn stop_streaming(&mut self) -> Option<CallbackSink> {
            self.slot.lock().unwrap().take()
        }

        fn sample_rate(&self) -> u32 {
            2_048_000
        }

        fn bit_depth(&self) -> usize {
            10
        }

        fn name(&self) -> String {
            "manual".to_string()
        }
    }

    fn manual() -> (ManualDevice, Arc<Mutex<Option<CallbackSink>>>) {
        let slot = Arc::new(Mutex::new(None));
        (
            ManualDevice {
                slot: slot.clone(),
                tuned: Vec::new(),
                fail_start: false,
            },
            slot,
        )
    }

    #[test]
    fn test_callback_samples_reach_buffer() {
        let (dev, slot) = manual();
        let (prod, mut cons) = sample_ring(64);
        let mut handler = CallbackHandler::new(dev);
        handler.attach_output(prod);
        handler.start(227_360_000).unwrap();

        slot.lock()
            .unwrap()
            .as_mut()
            .unwrap()
            .push_ci16(&[1024, -1024, 2048, 0], 2048.0);

        let mut out = [Complex32::default(); 4];
        assert_eq!(cons.get(&mut out), 2);
        assert_eq!(out[0], Complex32::new(0.5, -0.5));
        assert_eq!(out[1], Complex32::new(1.0, 0.0));
        assert_eq!(handler.center_frequency(), 227_360_000);
    }

    #[test]
    fn test_start_is_idempotent_and_restartable() {
        let (dev, slot) = manual();
        let (prod, _cons) = sample_ring(64);
        let mut handler = CallbackHandler::new(dev);
        handler.attach_output(prod);

        handler.start(100_000_000).unwrap();
        handler.start(200_000_000).unwrap();
        assert_eq!(handler.device_mut().tuned, vec![100_000_000]);

        handler.stop();
        assert!(!handler.is_running());
        assert!(slot.lock().unwrap().is_none());

        handler.start(200_000_000).unwrap();
        assert!(handler.is_running());
        assert!(slot.lock().unwrap().is_some());
    }

    #[test]
    fn test_sink_ignores_samples_after_stop() {
        let (dev, slot) = manual();
        let (prod, cons) = sample_ring(64);
        let mut handler = CallbackHandler::new(dev);
        handler.attach_output(prod);
        handler.start(100_000_000).unwrap();

        let mut sink = slot.lock().unwrap().take().unwrap();
        handler.running_flag().store(false, Ordering::SeqCst);
        sink.push_ci8(&[64, 64]);
        assert_eq!(cons.read_available(), 0);
    }

    #[test]
    fn test_stop_after_external_clear_recovers_sink() {
        let (dev, slot) = manual();
        let (prod, _cons) = sample_ring(64);
        let mut handler = CallbackHandler::new(dev);
        handler.attach_output(prod);
        handler.start(100_000_000).unwrap();

        handler.running_flag().store(false, Ordering::SeqCst);
        handler.stop();
        assert!(slot.lock().unwrap().is_none(), "sink should be back with the handler");
        handler.start(100_000_000).unwrap();
        assert!(handler.is_running());
    }

    #[test]
    fn test_start_after_reader_armed_flag_still_streams() {
        let (dev, slot) = manual();
        let (prod, mut cons) = sample_ring(64);
        let mut handler = CallbackHandler::new(dev);
        handler.attach_output(prod);

        // Consumer sets the shared flag before the device is started
        handler.running_flag().store(true, Ordering::SeqCst);
        handler.start(100_000_000).unwrap();
        assert_eq!(handler.device_mut().tuned, vec![100_000_000]);

        slot.lock().unwrap().as_mut().unwrap().push_ci8(&[64, -64]);
        let mut out = [Complex32::default(); 1];
        assert_eq!(cons.get(&mut out), 1);
        assert_eq!(out[0], Complex32::new(0.5, -0.5));
    }

    #[test]
    fn test_reports_device_identity() {
        let (dev, _slot) = manual();
        let handler = CallbackHandler::new(dev);
        assert_eq!(handler.bit_depth(), 10);
        assert_eq!(handler.device_name(), "manual");
    }

    #[test]
    fn test_failed_start_keeps_output() {
        let (mut dev, _slot) = manual();
        dev.fail_start = true;
        let (prod, _cons) = sample_ring(64);
        let mut handler = CallbackHandler::new(dev);
        handler.attach_output(prod);

        assert!(matches!(
            handler.start(100_000_000),
            Err(StartError::Vendor { .. })
        ));
        assert!(!handler.is_running());

        handler.device_mut().fail_start = false;
        handler.start(100_000_000).unwrap();
    }

    #[test]
    fn test_start_without_output_fails() {
        let (dev, _slot) = manual();
        let mut handler = CallbackHandler::new(dev);
        assert!(matches!(handler.start(1), Err(StartError::NoOutput)));
    }
}
