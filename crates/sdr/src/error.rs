// Copyright 2025-2026 CEMAXECUTER LLC

//! Error taxonomy for device setup, stream start and cancellation.

use std::fmt;
use std::io;
use std::path::PathBuf;

use crate::rf::{Direction, RfError};

/// I or Q half of a streaming channel pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IqComponent {
    I,
    Q,
}

/// Fatal, non-retriable initialization failure. The device is unusable.
#[derive(Debug)]
pub enum SetupError {
    /// Every step of the context fallback chain failed
    NoContext,
    /// Context has no devices
    NoDevices,
    StreamDeviceNotFound(Direction),
    PhyChannelNotFound(Direction),
    LoChannelNotFound(Direction),
    StreamChannelNotFound {
        dir: Direction,
        component: IqComponent,
    },
    BufferAllocation(Direction),
    /// A vendor library call returned an error code
    Vendor { call: &'static str, code: i32 },
    /// Recording could not be opened
    Input { path: PathBuf, source: io::Error },
}

impl fmt::Display for SetupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetupError::NoContext => write!(f, "no hardware context found (default, local, network)"),
            SetupError::NoDevices => write!(f, "hardware context has no devices"),
            SetupError::StreamDeviceNotFound(dir) => write!(f, "no {} streaming device", dir),
            SetupError::PhyChannelNotFound(dir) => write!(f, "{} phy channel not found", dir),
            SetupError::LoChannelNotFound(dir) => write!(f, "{} LO channel not found", dir),
            SetupError::StreamChannelNotFound { dir, component } => {
                write!(f, "{} stream channel {:?} not found", dir, component)
            }
            SetupError::BufferAllocation(dir) => write!(f, "could not create {} buffer", dir),
            SetupError::Vendor { call, code } => write!(f, "{} failed: {}", call, code),
            SetupError::Input { path, source } => {
                write!(f, "failed to open {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for SetupError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SetupError::Input { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Why `start` did not bring the stream up.
#[derive(Debug)]
pub enum StartError {
    /// Retuning the receive LO was rejected
    Tune(RfError),
    /// No output buffer attached
    NoOutput,
    Spawn(io::Error),
    /// A worker thread panicked earlier and took its stream with it
    WorkerLost,
    /// The vendor library refused to start streaming
    Vendor { call: &'static str, code: i32 },
}

impl fmt::Display for StartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartError::Tune(e) => write!(f, "retune failed: {}", e),
            StartError::NoOutput => write!(f, "no output buffer attached"),
            StartError::Spawn(e) => write!(f, "could not spawn worker: {}", e),
            StartError::WorkerLost => write!(f, "worker lost after a previous failure"),
            StartError::Vendor { call, code } => write!(f, "{} failed: {}", call, code),
        }
    }
}

impl std::error::Error for StartError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StartError::Tune(e) => Some(e),
            StartError::Spawn(e) => Some(e),
            _ => None,
        }
    }
}

/// The stream was stopped while (or before) a reader waited for data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stopped;

impl fmt::Display for Stopped {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream stopped")
    }
}

impl std::error::Error for Stopped {}
