// Copyright 2025-2026 CEMAXECUTER LLC

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Rx,
    Tx,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Rx => write!(f, "RX"),
            Direction::Tx => write!(f, "TX"),
        }
    }
}

/// Per-direction stream settings. Only `lo_hz` changes after the stream starts.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamConfig {
    pub bandwidth_hz: u64,
    pub sample_rate_hz: u32,
    pub lo_hz: u64,
    pub rf_port: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GainMode {
    /// Hardware AGC
    Agc,
    /// Fixed hardware gain in dB
    Manual(i64),
}

/// A single rejected attribute write. Never fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RfError {
    pub attribute: &'static str,
    pub code: i32,
}

impl fmt::Display for RfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "writing '{}' failed ({})", self.attribute, self.code)
    }
}

impl std::error::Error for RfError {}

/// Configuration contract of the radio hardware.
///
/// All calls are best-effort: callers log failures and keep going with the
/// hardware defaults.
pub trait RfFrontEnd: Send {
    fn apply_stream_config(&mut self, dir: Direction, cfg: &StreamConfig) -> Result<(), RfError>;

    fn set_local_oscillator(&mut self, dir: Direction, hz: u64) -> Result<(), RfError>;

    fn set_gain(&mut self, dir: Direction, mode: GainMode) -> Result<(), RfError>;
}

/// Apply `cfg` and `gain` to one direction, logging instead of failing.
pub fn configure_best_effort<F: RfFrontEnd + ?Sized>(
    front_end: &mut F,
    dir: Direction,
    cfg: &StreamConfig,
    gain: GainMode,
) {
    if let Err(e) = front_end.apply_stream_config(dir, cfg) {
        log::warn!("{} stream config: {}", dir, e);
    }
    if let Err(e) = front_end.set_gain(dir, gain) {
        log::warn!("{} gain ({:?}): {}", dir, gain, e);
    }
}
