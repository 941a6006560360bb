// Copyright 2025-2026 CEMAXECUTER LLC

use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use byteorder::{ByteOrder, LittleEndian};
use num_complex::Complex32;

use crate::buffer::SampleProducer;
use crate::error::{SetupError, StartError};
use crate::{DeviceHandler, POLL_INTERVAL, PROCESSING_RATE, STOP_GRACE};

/// IQ sample format for file input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    /// Complex int8 (CS8): pairs of i8
    Ci8,
    /// Complex int16 (CS16): pairs of i16, little-endian
    Ci16,
    /// Complex float32 (CF32): pairs of f32, little-endian
    Cf32,
}

impl SampleFormat {
    /// Resolution of the recorded samples. Float recordings are taken as
    /// 16-bit.
    pub fn bit_depth(self) -> usize {
        match self {
            SampleFormat::Ci8 => 8,
            SampleFormat::Ci16 | SampleFormat::Cf32 => 16,
        }
    }

    fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::Ci8 => 2,
            SampleFormat::Ci16 => 4,
            SampleFormat::Cf32 => 8,
        }
    }

    fn decode(self, raw: &[u8], out: &mut Vec<Complex32>) {
        out.clear();
        let chunks = raw.chunks_exact(self.bytes_per_sample());
        match self {
            SampleFormat::Ci8 => out.extend(chunks.map(|c| {
                Complex32::new(c[0] as i8 as f32 / 128.0, c[1] as i8 as f32 / 128.0)
            })),
            SampleFormat::Ci16 => out.extend(chunks.map(|c| {
                Complex32::new(
                    LittleEndian::read_i16(&c[0..2]) as f32 / 32768.0,
                    LittleEndian::read_i16(&c[2..4]) as f32 / 32768.0,
                )
            })),
            SampleFormat::Cf32 => out.extend(chunks.map(|c| {
                Complex32::new(
                    LittleEndian::read_f32(&c[0..4]),
                    LittleEndian::read_f32(&c[4..8]),
                )
            })),
        }
    }
}

struct FileWorker {
    reader: BufReader<File>,
    output: Option<SampleProducer>,
}

/// Replays a raw I/Q recording made at the processing rate.
///
/// The acquisition thread waits while the output is full, so the consumer
/// sets the pace.
pub struct FileHandler {
    path: PathBuf,
    format: SampleFormat,
    sample_rate: u32,
    /// Number of complex samples per block
    block_size: usize,
    repeat: bool,
    center_freq: u64,
    running: Arc<AtomicBool>,
    worker: Option<FileWorker>,
    thread: Option<JoinHandle<FileWorker>>,
}

impl FileHandler {
    pub fn open(path: impl AsRef<Path>, format: SampleFormat) -> Result<Self, SetupError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|source| SetupError::Input {
            path: path.clone(),
            source,
        })?;

        Ok(Self {
            path,
            format,
            sample_rate: PROCESSING_RATE,
            block_size: 32768,
            repeat: false,
            center_freq: 0,
            running: Arc::new(AtomicBool::new(false)),
            worker: Some(FileWorker {
                reader: BufReader::with_capacity(1024 * 1024, file),
                output: None,
            }),
            thread: None,
        })
    }

    pub fn set_block_size(&mut self, size: usize) {
        self.block_size = size.max(1);
    }

    /// Restart from the beginning at end of file instead of going idle.
    pub fn set_repeat(&mut self, repeat: bool) {
        self.repeat = repeat;
    }
}

impl DeviceHandler for FileHandler {
    fn start(&mut self, frequency: u64) -> Result<(), StartError> {
        if self.thread.is_some() && self.running.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.stop();
        let mut worker = self.worker.take().ok_or(StartError::WorkerLost)?;
        if worker.output.is_none() {
            self.worker = Some(worker);
            return Err(StartError::NoOutput);
        }
        self.center_freq = frequency;

        let running = self.running.clone();
        let format = self.format;
        let block_size = self.block_size;
        let repeat = self.repeat;
        let path = self.path.clone();

        self.running.store(true, Ordering::SeqCst);
        let handle = thread::Builder::new()
            .name("file-replay".to_string())
            .spawn(move || {
                if let Err(e) = replay(&mut worker, format, block_size, repeat, &running) {
                    log::error!("read error on {}: {}", path.display(), e);
                }
                worker
            });
        match handle {
            Ok(handle) => self.thread = Some(handle),
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(StartError::Spawn(e));
            }
        }

        log::info!(
            "reading IQ from {} ({:?}, {} Hz)",
            self.path.display(),
            self.format,
            self.sample_rate
        );
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if self.thread.is_none() {
            return;
        }
        thread::sleep(STOP_GRACE);
        if let Some(handle) = self.thread.take() {
            match handle.join() {
                Ok(worker) => self.worker = Some(worker),
                Err(_) => log::error!("file replay thread panicked"),
            }
        }
    }

    fn attach_output(&mut self, output: SampleProducer) {
        match self.worker.as_mut() {
            Some(worker) => worker.output = Some(output),
            None => log::warn!("cannot attach output while streaming"),
        }
    }

    fn running_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn center_frequency(&self) -> u64 {
        self.center_freq
    }

    fn bit_depth(&self) -> usize {
        self.format.bit_depth()
    }

    fn device_name(&self) -> String {
        format!("file:{}", self.path.display())
    }
}

impl Drop for FileHandler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn replay(
    worker: &mut FileWorker,
    format: SampleFormat,
    block_size: usize,
    repeat: bool,
    running: &AtomicBool,
) -> io::Result<()> {
    let FileWorker { reader, output } = worker;
    let Some(output) = output.as_mut() else {
        return Ok(());
    };
    let mut raw = vec![0u8; block_size * format.bytes_per_sample()];
    let mut samples = Vec::with_capacity(block_size);
    // Samples decoded since the last rewind
    let mut pass = 0usize;

    while running.load(Ordering::SeqCst) {
        let n = read_full(reader, &mut raw)?;
        if n == 0 {
            if !repeat {
                log::info!("end of file");
                return Ok(());
            }
            if pass == 0 {
                // Nothing to replay: idle instead of spinning on rewinds
                thread::sleep(POLL_INTERVAL);
            }
            reader.seek(SeekFrom::Start(0))?;
            pass = 0;
            continue;
        }
        format.decode(&raw[..n], &mut samples);
        pass += samples.len();

        let mut offset = 0;
        while offset < samples.len() {
            if !running.load(Ordering::SeqCst) {
                return Ok(());
            }
            let written = output.put(&samples[offset..]);
            offset += written;
            if written == 0 {
                thread::sleep(POLL_INTERVAL);
            }
        }
    }
    Ok(())
}

/// Read until `buf` is full or the file ends. A trailing partial sample is
/// left for `chunks_exact` to drop.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
