// Copyright 2025-2026 CEMAXECUTER LLC

//! Stereo 16-bit WAV dump: I on the left channel, Q on the right.

use std::fs::File;
use std::io::{self, BufWriter, Seek, Write};
use std::path::Path;

use hound::{SampleFormat, WavSpec, WavWriter};
use iq_sdr::dump::DumpSink;

fn wav_spec(sample_rate: u32) -> WavSpec {
    WavSpec {
        channels: 2,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    }
}

fn to_io(e: hound::Error) -> io::Error {
    match e {
        hound::Error::IoError(e) => e,
        other => io::Error::new(io::ErrorKind::Other, other),
    }
}

pub struct WavDump<W: Write + Seek> {
    writer: WavWriter<W>,
    frames: u64,
}

impl WavDump<BufWriter<File>> {
    /// Create (or truncate) a WAV file recording at `sample_rate` Hz.
    pub fn create(path: impl AsRef<Path>, sample_rate: u32) -> io::Result<Self> {
        let writer = WavWriter::create(path, wav_spec(sample_rate)).map_err(to_io)?;
        Ok(Self { writer, frames: 0 })
    }
}

impl<W: Write + Seek> WavDump<W> {
    pub fn new(inner: W, sample_rate: u32) -> io::Result<Self> {
        let writer = WavWriter::new(inner, wav_spec(sample_rate)).map_err(to_io)?;
        Ok(Self { writer, frames: 0 })
    }

    /// I/Q pairs written so far
    pub fn frames(&self) -> u64 {
        self.frames
    }
}

impl<W: Write + Seek + Send> DumpSink for WavDump<W> {
    fn write(&mut self, batch: &[i16]) -> io::Result<()> {
        for &v in batch {
            self.writer.write_sample(v).map_err(to_io)?;
        }
        self.frames += (batch.len() / 2) as u64;
        Ok(())
    }

    fn finish(self: Box<Self>) -> io::Result<()> {
        log::info!("dump closed after {} samples", self.frames);
        self.writer.finalize().map_err(to_io)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::WavReader;
    use iq_dsp::OscillatorTable;
    use iq_sdr::dump::DUMP_BATCH;
    use iq_sdr::{sample_ring, SampleReader};
    use num_complex::Complex32;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    #[test]
    fn test_dump_reads_back_as_stereo_pcm() {
        let path = std::env::temp_dir().join(format!("iq_output_wav_{}.wav", std::process::id()));
        let mut dump = Box::new(WavDump::create(&path, 2_048_000).unwrap());
        dump.write(&[100, -200, 300, -400]).unwrap();
        dump.write(&[5, 6]).unwrap();
        assert_eq!(dump.frames(), 3);
        dump.finish().unwrap();

        let mut reader = WavReader::open(&path).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 2);
        assert_eq!(spec.bits_per_sample, 16);
        assert_eq!(spec.sample_rate, 2_048_000);
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![100, -200, 300, -400, 5, 6]);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_reader_output_round_trips_through_wav() {
        let path = std::env::temp_dir().join(format!("iq_output_reader_{}.wav", std::process::id()));
        let (mut prod, cons) = sample_ring(2 * DUMP_BATCH);
        let running = Arc::new(AtomicBool::new(true));
        let mut reader = SampleReader::new(cons, running, Arc::new(OscillatorTable::new(2_048_000)));

        let tone = Complex32::new(0.3, -0.2);
        assert_eq!(prod.put(&vec![tone; DUMP_BATCH]), DUMP_BATCH);

        let bits = 12;
        reader.start_dumping(Box::new(WavDump::create(&path, 2_048_000).unwrap()), bits);
        let mut out = vec![Complex32::default(); DUMP_BATCH];
        assert_eq!(reader.get_samples(&mut out, 0).unwrap(), DUMP_BATCH);
        reader.stop_dumping();

        let mut wav = WavReader::open(&path).unwrap();
        assert_eq!(wav.spec().channels, 2);
        let samples: Vec<i16> = wav.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples.len(), 2 * DUMP_BATCH);

        let scale = (1 << bits) as f32;
        for iq in samples.chunks_exact(2) {
            assert!((iq[0] as f32 / scale - tone.re).abs() <= 1.0 / scale, "I = {}", iq[0]);
            assert!((iq[1] as f32 / scale - tone.im).abs() <= 1.0 / scale, "Q = {}", iq[1]);
        }
        std::fs::remove_file(&path).ok();
    }
}
