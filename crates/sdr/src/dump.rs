// Copyright 2025-2026 CEMAXECUTER LLC

//! Diagnostic recording of consumed samples as interleaved 16-bit I/Q.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use num_complex::Complex32;

/// Complex samples collected before a batch is written out.
pub const DUMP_BATCH: usize = 2048;

/// Write scale per requested bit depth.
pub const DUMP_SCALES: [u32; 16] = [
    1, 2, 4, 8, 16, 32, 64, 128, 256, 512, 1024, 2048, 4096, 8192, 16384, 32768,
];

/// Write-only destination for dumped samples.
pub trait DumpSink: Send {
    /// Write interleaved I/Q values.
    fn write(&mut self, batch: &[i16]) -> io::Result<()>;

    /// Flush and close. Called once when the sink is detached.
    fn finish(self: Box<Self>) -> io::Result<()> {
        Ok(())
    }
}

pub fn scale_for_bits(bits: usize) -> u32 {
    if bits >= DUMP_SCALES.len() {
        log::warn!("dump bit depth {} out of range, using 15", bits);
    }
    DUMP_SCALES[bits.min(DUMP_SCALES.len() - 1)]
}

struct Shared {
    attached: AtomicBool,
    /// Bumped on every attach and detach, under the sink lock
    generation: AtomicU64,
    scale: AtomicU32,
    sink: Mutex<Option<Box<dyn DumpSink>>>,
}

/// Handle for attaching and detaching the dump sink from any thread.
#[derive(Clone)]
pub struct DumpControl {
    shared: Arc<Shared>,
}

impl DumpControl {
    /// Attach `sink`, replacing (and finishing) any previous one.
    pub fn start_dumping(&self, sink: Box<dyn DumpSink>, bits: usize) {
        let mut slot = self.lock();
        if let Some(old) = slot.take() {
            finish(old);
        }
        self.shared.scale.store(scale_for_bits(bits), Ordering::SeqCst);
        *slot = Some(sink);
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        self.shared.attached.store(true, Ordering::SeqCst);
    }

    /// Detach and finish the current sink, if any.
    pub fn stop_dumping(&self) {
        let mut slot = self.lock();
        self.shared.attached.store(false, Ordering::SeqCst);
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(old) = slot.take() {
            finish(old);
        }
    }

    pub fn is_dumping(&self) -> bool {
        self.shared.attached.load(Ordering::SeqCst)
    }

    fn generation(&self) -> u64 {
        self.shared.generation.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, Option<Box<dyn DumpSink>>> {
        // Recover the slot from a sink that panicked while held
        self.shared
            .sink
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn finish(sink: Box<dyn DumpSink>) {
    if let Err(e) = sink.finish() {
        log::warn!("closing dump failed: {}", e);
    }
}

/// Consumer-side batching of dumped samples. Owned by the reading thread.
///
/// A pending batch belongs to the sink that was attached when it was
/// started; it is discarded when that sink is detached or replaced.
pub struct DumpTap {
    control: DumpControl,
    batch: Vec<i16>,
    /// Attach generation the pending batch was recorded under
    generation: u64,
}

impl DumpTap {
    pub fn new() -> Self {
        Self {
            control: DumpControl {
                shared: Arc::new(Shared {
                    attached: AtomicBool::new(false),
                    generation: AtomicU64::new(0),
                    scale: AtomicU32::new(DUMP_SCALES[11]),
                    sink: Mutex::new(None),
                }),
            },
            batch: Vec::with_capacity(2 * DUMP_BATCH),
            generation: 0,
        }
    }

    pub fn control(&self) -> DumpControl {
        self.control.clone()
    }

    /// Append one sample if a sink is attached; writes a full batch out.
    pub fn record(&mut self, sample: Complex32) {
        let generation = self.control.generation();
        if generation != self.generation {
            self.batch.clear();
            self.generation = generation;
        }
        if !self.control.is_dumping() {
            return;
        }
        let scale = self.control.shared.scale.load(Ordering::Relaxed) as f32;
        self.batch.push((sample.re * scale) as i16);
        self.batch.push((sample.im * scale) as i16);
        if self.batch.len() >= 2 * DUMP_BATCH {
            self.flush();
        }
    }

    fn flush(&mut self) {
        let mut slot = self.control.lock();
        if self.control.generation() != self.generation {
            // Sink swapped since the batch started
            self.batch.clear();
            return;
        }
        if let Some(sink) = slot.as_mut() {
            if let Err(e) = sink.write(&self.batch) {
                log::error!("dump write failed, detaching: {}", e);
                self.control.shared.attached.store(false, Ordering::SeqCst);
                if let Some(old) = slot.take() {
                    finish(old);
                }
            }
        }
        self.batch.clear();
    }
}

impl Default for DumpTap {
    fn default() -> Self {
        Self::new()
    }
}
