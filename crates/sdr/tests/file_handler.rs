use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use iq_dsp::OscillatorTable;
use iq_sdr::file::{FileHandler, SampleFormat};
use iq_sdr::{sample_ring, DeviceHandler, SampleReader, PROCESSING_RATE};
use num_complex::Complex32;

/// Write `n` ci16 samples with I = 16 * (k mod 2048) and Q = -I.
fn recording(name: &str, n: usize) -> PathBuf {
    let path = std::env::temp_dir().join(format!("iq_sdr_{}_{}.ci16", name, std::process::id()));
    let mut raw = Vec::with_capacity(n * 4);
    for k in 0..n {
        let v = (16 * (k % 2048)) as i16;
        raw.extend_from_slice(&v.to_le_bytes());
        raw.extend_from_slice(&(-v).to_le_bytes());
    }
    std::fs::write(&path, raw).unwrap();
    path
}

fn expected(k: usize) -> Complex32 {
    let v = (16 * (k % 2048)) as f32 / 32768.0;
    Complex32::new(v, -v)
}

fn reader_for(handler: &mut FileHandler) -> SampleReader {
    let (prod, cons) = sample_ring(1024);
    handler.attach_output(prod);
    SampleReader::new(
        cons,
        handler.running_flag(),
        Arc::new(OscillatorTable::new(PROCESSING_RATE as usize)),
    )
    .with_poll_interval(Duration::from_millis(1))
}

#[test]
fn test_replays_recording_in_order() {
    let path = recording("replay", 300);
    let mut handler = FileHandler::open(&path, SampleFormat::Ci16).unwrap();
    handler.set_block_size(64);
    let mut reader = reader_for(&mut handler);
    handler.start(0).unwrap();

    let mut out = vec![Complex32::default(); 300];
    assert_eq!(reader.get_samples(&mut out, 0).unwrap(), 300);
    for (k, s) in out.iter().enumerate() {
        assert_eq!(*s, expected(k), "sample {}", k);
    }

    // End of file leaves the handler running
    assert!(handler.is_running());
    handler.stop();
    assert!(!handler.is_running());
    std::fs::remove_file(&path).ok();
}

#[test]
fn test_backpressure_keeps_every_sample() {
    // Recording larger than the buffer: the replay thread must wait
    let path = recording("backpressure", 3000);
    let mut handler = FileHandler::open(&path, SampleFormat::Ci16).unwrap();
    let mut reader = reader_for(&mut handler);
    handler.start(0).unwrap();

    let mut block = vec![Complex32::default(); 500];
    let mut k = 0;
    while k < 3000 {
        let n = reader.get_samples(&mut block, 0).unwrap();
        for s in &block[..n] {
            assert_eq!(*s, expected(k), "sample {}", k);
            k += 1;
        }
    }
    handler.stop();
    std::fs::remove_file(&path).ok();
}

#[test]
fn test_repeat_wraps_to_start() {
    let path = recording("repeat", 100);
    let mut handler = FileHandler::open(&path, SampleFormat::Ci16).unwrap();
    handler.set_repeat(true);
    let mut reader = reader_for(&mut handler);
    handler.start(0).unwrap();

    for k in 0..250 {
        assert_eq!(reader.get_sample(0).unwrap(), expected(k % 100), "sample {}", k);
    }
    handler.stop();
    std::fs::remove_file(&path).ok();
}

#[test]
fn test_start_after_reader_armed_flag_replays() {
    let path = recording("armed", 50);
    let mut handler = FileHandler::open(&path, SampleFormat::Ci16).unwrap();
    let mut reader = reader_for(&mut handler);

    // Consumer arms its reader before the handler is started
    reader.set_running(true);
    handler.start(0).unwrap();

    for k in 0..50 {
        assert_eq!(reader.get_sample(0).unwrap(), expected(k), "sample {}", k);
    }
    handler.stop();
    std::fs::remove_file(&path).ok();
}

#[test]
fn test_repeat_of_file_without_samples_idles() {
    // Three bytes: less than one ci16 sample
    let path = std::env::temp_dir().join(format!("iq_sdr_short_{}.ci16", std::process::id()));
    std::fs::write(&path, [1u8, 2, 3]).unwrap();
    let mut handler = FileHandler::open(&path, SampleFormat::Ci16).unwrap();
    handler.set_repeat(true);
    let mut reader = reader_for(&mut handler);
    handler.start(0).unwrap();

    thread::sleep(Duration::from_millis(30));
    assert!(handler.is_running());
    let t0 = Instant::now();
    handler.stop();
    assert!(t0.elapsed() < Duration::from_millis(200), "stop took {:?}", t0.elapsed());
    assert_eq!(reader.get_sample(0), Err(iq_sdr::Stopped));
    std::fs::remove_file(&path).ok();
}

#[test]
fn test_reports_format_depth_and_path() {
    let path = recording("identity", 4);
    let handler = FileHandler::open(&path, SampleFormat::Ci8).unwrap();
    assert_eq!(handler.bit_depth(), 8);
    assert!(handler.device_name().starts_with("file:"));
    assert!(handler.device_name().ends_with(".ci16"));
    std::fs::remove_file(&path).ok();
}
