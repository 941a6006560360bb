// Copyright 2025-2026 CEMAXECUTER LLC

use std::ffi::CString;
use std::os::raw::{c_char, c_int, c_void};
use std::ptr;

use crate::callback::{CallbackDevice, CallbackHandler, CallbackSink};
use crate::error::{SetupError, StartError};
use crate::rf::RfError;
use crate::PROCESSING_RATE;

const HACKRF_SUCCESS: c_int = 0;

#[repr(C)]
pub struct HackrfTransfer {
    pub device: *mut c_void,
    pub buffer: *mut u8,
    pub buffer_length: i32,
    pub valid_length: i32,
    pub rx_ctx: *mut c_void,
    pub tx_ctx: *mut c_void,
}

type RawDevice = c_void;

extern "C" {
    fn hackrf_init() -> c_int;
    fn hackrf_exit() -> c_int;
    fn hackrf_open(device: *mut *mut RawDevice) -> c_int;
    fn hackrf_open_by_serial(
        desired_serial_number: *const c_char,
        device: *mut *mut RawDevice,
    ) -> c_int;
    fn hackrf_close(device: *mut RawDevice) -> c_int;
    fn hackrf_set_sample_rate(device: *mut RawDevice, freq_hz: f64) -> c_int;
    fn hackrf_set_freq(device: *mut RawDevice, freq_hz: u64) -> c_int;
    fn hackrf_set_vga_gain(device: *mut RawDevice, value: u32) -> c_int;
    fn hackrf_set_lna_gain(device: *mut RawDevice, value: u32) -> c_int;
    fn hackrf_start_rx(
        device: *mut RawDevice,
        callback: unsafe extern "C" fn(*mut HackrfTransfer) -> c_int,
        rx_ctx: *mut c_void,
    ) -> c_int;
    fn hackrf_stop_rx(device: *mut RawDevice) -> c_int;
}

#[derive(Debug, Clone)]
pub struct HackrfConfig {
    /// Interface name: "hackrf" for the first device or "hackrf-SERIAL"
    pub iface: String,
    pub lna_gain: u32,
    pub vga_gain: u32,
}

impl Default for HackrfConfig {
    fn default() -> Self {
        Self {
            iface: "hackrf".to_string(),
            lna_gain: 32,
            vga_gain: 20,
        }
    }
}

pub type HackrfHandler = CallbackHandler<Hackrf>;

/// Extract serial from interface string like "hackrf-SERIAL"
fn parse_serial(iface: &str) -> Option<String> {
    let (kind, serial) = iface.split_once('-')?;
    if kind == "hackrf" && !serial.is_empty() {
        Some(serial.to_string())
    } else {
        None
    }
}

unsafe extern "C" fn rx_callback(transfer: *mut HackrfTransfer) -> c_int {
    let sink = &mut *((*transfer).rx_ctx as *mut CallbackSink);
    if !sink.is_running() {
        // Non-zero asks libhackrf to stop streaming
        return -1;
    }
    let valid = (*transfer).valid_length.max(0) as usize;
    let data = std::slice::from_raw_parts((*transfer).buffer as *const i8, valid);
    sink.push_ci8(data);
    0
}

/// Opened HackRF delivering 8-bit I/Q at the processing rate from the
/// libhackrf transfer thread.
pub struct Hackrf {
    dev: *mut RawDevice,
    sink: *mut CallbackSink,
    serial: Option<String>,
    lna_gain: u32,
    vga_gain: u32,
}

unsafe impl Send for Hackrf {}

fn check(call: &'static str, ret: c_int) -> Result<(), SetupError> {
    if ret != HACKRF_SUCCESS {
        return Err(SetupError::Vendor { call, code: ret });
    }
    Ok(())
}

/// Open and configure a HackRF and wrap it in a handler.
pub fn open(config: &HackrfConfig) -> Result<HackrfHandler, SetupError> {
    let serial = if config.iface.is_empty() || config.iface == "hackrf" {
        None
    } else {
        Some(parse_serial(&config.iface).ok_or(SetupError::Vendor {
            call: "hackrf_open_by_serial",
            code: -2,
        })?)
    };

    unsafe {
        check("hackrf_init", hackrf_init())?;

        let mut dev: *mut RawDevice = ptr::null_mut();
        let r = match serial.as_deref() {
            Some(s) => {
                let cs = CString::new(s).unwrap_or_default();
                hackrf_open_by_serial(cs.as_ptr(), &mut dev)
            }
            None => hackrf_open(&mut dev),
        };
        if let Err(e) = check("hackrf_open", r) {
            hackrf_exit();
            return Err(e);
        }
        log::info!("HackRF opened (serial={:?})", serial);

        let configured = check(
            "hackrf_set_sample_rate",
            hackrf_set_sample_rate(dev, PROCESSING_RATE as f64),
        )
        .and_then(|_| check("hackrf_set_lna_gain", hackrf_set_lna_gain(dev, config.lna_gain)))
        .and_then(|_| check("hackrf_set_vga_gain", hackrf_set_vga_gain(dev, config.vga_gain)));
        if let Err(e) = configured {
            hackrf_close(dev);
            hackrf_exit();
            return Err(e);
        }

        Ok(CallbackHandler::new(Hackrf {
            dev,
            sink: ptr::null_mut(),
            serial,
            lna_gain: config.lna_gain,
            vga_gain: config.vga_gain,
        }))
    }
}

impl CallbackDevice for Hackrf {
    fn tune(&mut self, frequency: u64) -> Result<(), RfError> {
        let r = unsafe { hackrf_set_freq(self.dev, frequency) };
        if r != HACKRF_SUCCESS {
            return Err(RfError {
                attribute: "frequency",
                code: r,
            });
        }
        Ok(())
    }

    fn start_streaming(&mut self, sink: CallbackSink) -> Result<(), (StartError, CallbackSink)> {
        let ctx = Box::into_raw(Box::new(sink));
        let r = unsafe { hackrf_start_rx(self.dev, rx_callback, ctx as *mut c_void) };
        if r != HACKRF_SUCCESS {
            let sink = unsafe { *Box::from_raw(ctx) };
            return Err((
                StartError::Vendor {
                    call: "hackrf_start_rx",
                    code: r,
                },
                sink,
            ));
        }
        self.sink = ctx;
        log::info!(
            "HackRF streaming (LNA={} dB, VGA={} dB)",
            self.lna_gain,
            self.vga_gain
        );
        Ok(())
    }

    fn stop_streaming(&mut self) -> Option<CallbackSink> {
        if self.sink.is_null() {
            return None;
        }
        // Returns after the transfer thread has finished its last callback
        let r = unsafe { hackrf_stop_rx(self.dev) };
        if r != HACKRF_SUCCESS {
            log::warn!("hackrf_stop_rx failed: {}", r);
        }
        let sink = unsafe { *Box::from_raw(self.sink) };
        self.sink = ptr::null_mut();
        Some(sink)
    }

    fn sample_rate(&self) -> u32 {
        PROCESSING_RATE
    }

    fn bit_depth(&self) -> usize {
        8
    }

    fn name(&self) -> String {
        match &self.serial {
            Some(serial) => format!("HackRF {}", serial),
            None => "HackRF".to_string(),
        }
    }
}

impl Drop for Hackrf {
    fn drop(&mut self) {
        drop(self.stop_streaming());
        unsafe {
            hackrf_close(self.dev);
            hackrf_exit();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_serial() {
        assert_eq!(parse_serial("hackrf-0000abcd"), Some("0000abcd".to_string()));
        assert_eq!(parse_serial("hackrf-"), None);
        assert_eq!(parse_serial("pluto-1"), None);
        assert_eq!(parse_serial("hackrf"), None);
    }
}
