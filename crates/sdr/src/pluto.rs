// Copyright 2025-2026 CEMAXECUTER LLC

//! ADALM-Pluto (AD9361) backend on libiio.
//!
//! Receives at 2.112 MS/s and resamples to the processing rate; transmits at
//! 2.112 MS/s from an expanded 192 kS/s source.

use std::ffi::{CStr, CString};
use std::io;
use std::os::raw::{c_char, c_int, c_longlong, c_uint, c_ulong, c_void};
use std::sync::Arc;

use crate::direct::{DirectConfig, DirectHandler, RawBlock, RawBlockMut, RxStream, TxStream};
use crate::error::{IqComponent, SetupError};
use crate::rf::{Direction, GainMode, RfError, RfFrontEnd, StreamConfig};

type IioContext = c_void;
type IioDevice = c_void;
type IioChannel = c_void;
type IioBuffer = c_void;

extern "C" {
    fn iio_create_default_context() -> *mut IioContext;
    fn iio_create_local_context() -> *mut IioContext;
    fn iio_create_network_context(host: *const c_char) -> *mut IioContext;
    fn iio_context_destroy(ctx: *mut IioContext);
    fn iio_context_get_devices_count(ctx: *const IioContext) -> c_uint;
    fn iio_context_find_device(ctx: *const IioContext, name: *const c_char) -> *mut IioDevice;
    fn iio_device_find_channel(
        dev: *const IioDevice,
        name: *const c_char,
        output: bool,
    ) -> *mut IioChannel;
    fn iio_channel_attr_write(chn: *const IioChannel, attr: *const c_char, src: *const c_char)
        -> isize;
    fn iio_channel_attr_write_longlong(
        chn: *const IioChannel,
        attr: *const c_char,
        val: c_longlong,
    ) -> c_int;
    fn iio_channel_enable(chn: *mut IioChannel);
    fn iio_device_create_buffer(
        dev: *const IioDevice,
        samples_count: usize,
        cyclic: bool,
    ) -> *mut IioBuffer;
    fn iio_buffer_destroy(buf: *mut IioBuffer);
    fn iio_buffer_set_blocking_mode(buf: *mut IioBuffer, blocking: bool) -> c_int;
    fn iio_buffer_refill(buf: *mut IioBuffer) -> isize;
    fn iio_buffer_push(buf: *mut IioBuffer) -> isize;
    fn iio_buffer_step(buf: *const IioBuffer) -> isize;
    fn iio_buffer_end(buf: *const IioBuffer) -> *mut c_void;
    fn iio_buffer_first(buf: *const IioBuffer, chn: *const IioChannel) -> *mut c_void;

    fn ad9361_set_bb_rate_custom_filter_manual(
        dev: *mut IioDevice,
        rate: c_ulong,
        fpass: c_ulong,
        fstop: c_ulong,
        wnom_tx: c_ulong,
        wnom_rx: c_ulong,
    ) -> c_int;
}

/// Network hosts tried after the default and local contexts
const NETWORK_HOSTS: [&str; 2] = ["pluto.local", "192.168.2.1"];

const PHY_DEVICE: &CStr = c"ad9361-phy";
const RX_STREAM_DEVICE: &CStr = c"cf-ad9361-lpc";
const TX_STREAM_DEVICE: &CStr = c"cf-ad9361-dds-core-lpc";

/// Receive buffer length in samples
const RX_BUFFER_SAMPLES: usize = 256 * 1024;
/// Transmit buffer length in samples
const TX_BUFFER_SAMPLES: usize = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct PlutoConfig {
    pub stream: DirectConfig,
    /// Create the transmit path
    pub transmit: bool,
}

impl Default for PlutoConfig {
    fn default() -> Self {
        Self {
            stream: DirectConfig::default(),
            transmit: true,
        }
    }
}

pub type PlutoHandler = DirectHandler<PlutoFrontEnd, PlutoRx, PlutoTx>;

/// Owns the libiio context; destroyed after every buffer and channel user.
struct Context {
    ctx: *mut IioContext,
}

unsafe impl Send for Context {}
unsafe impl Sync for Context {}

impl Drop for Context {
    fn drop(&mut self) {
        unsafe { iio_context_destroy(self.ctx) };
    }
}

/// Channel name such as `voltage0`. Formatted per call.
fn channel_name(kind: &str, id: u32) -> CString {
    CString::new(format!("{}{}", kind, id)).unwrap_or_default()
}

fn create_context() -> Result<Context, SetupError> {
    let mut ctx = unsafe { iio_create_default_context() };
    if ctx.is_null() {
        ctx = unsafe { iio_create_local_context() };
    }
    for host in NETWORK_HOSTS {
        if !ctx.is_null() {
            break;
        }
        log::debug!("trying network context {}", host);
        let host = CString::new(host).unwrap_or_default();
        ctx = unsafe { iio_create_network_context(host.as_ptr()) };
    }
    if ctx.is_null() {
        return Err(SetupError::NoContext);
    }
    Ok(Context { ctx })
}

fn find_device(ctx: &Context, name: &CStr) -> *mut IioDevice {
    unsafe { iio_context_find_device(ctx.ctx, name.as_ptr()) }
}

/// Streaming channel `voltage<id>`, falling back to `altvoltage<id>`.
fn stream_channel(dev: *mut IioDevice, dir: Direction, id: u32) -> *mut IioChannel {
    let output = dir == Direction::Tx;
    let name = channel_name("voltage", id);
    let chn = unsafe { iio_device_find_channel(dev, name.as_ptr(), output) };
    if !chn.is_null() {
        return chn;
    }
    let name = channel_name("altvoltage", id);
    unsafe { iio_device_find_channel(dev, name.as_ptr(), output) }
}

fn phy_channel(phy: *mut IioDevice, dir: Direction) -> *mut IioChannel {
    let name = channel_name("voltage", 0);
    unsafe { iio_device_find_channel(phy, name.as_ptr(), dir == Direction::Tx) }
}

/// LO channels are always outputs: altvoltage0 tunes RX, altvoltage1 TX.
fn lo_channel(phy: *mut IioDevice, dir: Direction) -> *mut IioChannel {
    let id = match dir {
        Direction::Rx => 0,
        Direction::Tx => 1,
    };
    let name = channel_name("altvoltage", id);
    unsafe { iio_device_find_channel(phy, name.as_ptr(), true) }
}

fn non_null<T>(p: *mut T, err: SetupError) -> Result<*mut T, SetupError> {
    if p.is_null() {
        Err(err)
    } else {
        Ok(p)
    }
}

/// Acquire the Pluto and build a streaming handler for it.
pub fn open(config: PlutoConfig) -> Result<PlutoHandler, SetupError> {
    let ctx = Arc::new(create_context()?);

    if unsafe { iio_context_get_devices_count(ctx.ctx) } == 0 {
        return Err(SetupError::NoDevices);
    }

    log::info!("acquiring AD9361 streaming devices");
    let phy = non_null(find_device(&ctx, PHY_DEVICE), SetupError::PhyChannelNotFound(Direction::Rx))?;
    let tx_dev = non_null(
        find_device(&ctx, TX_STREAM_DEVICE),
        SetupError::StreamDeviceNotFound(Direction::Tx),
    )?;
    let rx_dev = non_null(
        find_device(&ctx, RX_STREAM_DEVICE),
        SetupError::StreamDeviceNotFound(Direction::Rx),
    )?;

    let front_end = PlutoFrontEnd {
        rx_phy: non_null(phy_channel(phy, Direction::Rx), SetupError::PhyChannelNotFound(Direction::Rx))?,
        tx_phy: non_null(phy_channel(phy, Direction::Tx), SetupError::PhyChannelNotFound(Direction::Tx))?,
        rx_lo: non_null(lo_channel(phy, Direction::Rx), SetupError::LoChannelNotFound(Direction::Rx))?,
        tx_lo: non_null(lo_channel(phy, Direction::Tx), SetupError::LoChannelNotFound(Direction::Tx))?,
        _ctx: ctx.clone(),
    };

    log::info!("initializing AD9361 IIO streaming channels");
    let missing = |dir, component| SetupError::StreamChannelNotFound { dir, component };
    let rx_i = non_null(stream_channel(rx_dev, Direction::Rx, 0), missing(Direction::Rx, IqComponent::I))?;
    let rx_q = non_null(stream_channel(rx_dev, Direction::Rx, 1), missing(Direction::Rx, IqComponent::Q))?;
    unsafe {
        iio_channel_enable(rx_i);
        iio_channel_enable(rx_q);
    }

    let tx_channels = if config.transmit {
        let tx_i = non_null(stream_channel(tx_dev, Direction::Tx, 0), missing(Direction::Tx, IqComponent::I))?;
        let tx_q = non_null(stream_channel(tx_dev, Direction::Tx, 1), missing(Direction::Tx, IqComponent::Q))?;
        unsafe {
            iio_channel_enable(tx_i);
            iio_channel_enable(tx_q);
        }
        Some(tx_i)
    } else {
        None
    };

    let rx_buf = unsafe { iio_device_create_buffer(rx_dev, RX_BUFFER_SAMPLES, false) };
    let rx_buf = non_null(rx_buf, SetupError::BufferAllocation(Direction::Rx))?;
    let rx = PlutoRx {
        buf: rx_buf,
        first: rx_i,
        _ctx: ctx.clone(),
    };
    if unsafe { iio_buffer_set_blocking_mode(rx.buf, true) } < 0 {
        log::warn!("could not make the RX buffer blocking");
    }

    let tx = match tx_channels {
        Some(tx_i) => {
            let tx_buf = unsafe { iio_device_create_buffer(tx_dev, TX_BUFFER_SAMPLES, false) };
            let tx_buf = non_null(tx_buf, SetupError::BufferAllocation(Direction::Tx))?;
            Some(PlutoTx {
                buf: tx_buf,
                first: tx_i,
                _ctx: ctx.clone(),
            })
        }
        None => None,
    };

    let rx_rate = config.stream.rx.sample_rate_hz as c_ulong;
    let filter = unsafe {
        ad9361_set_bb_rate_custom_filter_manual(
            phy,
            rx_rate,
            1_540_000 / 2,
            (1.1 * 1_540_000.0 / 2.0) as c_ulong,
            1_920_000,
            1_536_000,
        )
    };
    if filter < 0 {
        log::warn!("custom baseband filter not applied ({})", filter);
    }

    Ok(DirectHandler::new(front_end, rx, tx, config.stream))
}

/// Attribute writes on the AD9361 phy and LO channels.
pub struct PlutoFrontEnd {
    rx_phy: *mut IioChannel,
    tx_phy: *mut IioChannel,
    rx_lo: *mut IioChannel,
    tx_lo: *mut IioChannel,
    _ctx: Arc<Context>,
}

unsafe impl Send for PlutoFrontEnd {}

impl PlutoFrontEnd {
    fn phy(&self, dir: Direction) -> *mut IioChannel {
        match dir {
            Direction::Rx => self.rx_phy,
            Direction::Tx => self.tx_phy,
        }
    }

    fn lo(&self, dir: Direction) -> *mut IioChannel {
        match dir {
            Direction::Rx => self.rx_lo,
            Direction::Tx => self.tx_lo,
        }
    }
}

fn write_str(chn: *mut IioChannel, attr: &'static CStr, value: &str) -> Result<(), RfError> {
    let value = CString::new(value).map_err(|_| RfError {
        attribute: attr.to_str().unwrap_or("?"),
        code: -22,
    })?;
    let ret = unsafe { iio_channel_attr_write(chn, attr.as_ptr(), value.as_ptr()) };
    if ret < 0 {
        return Err(RfError {
            attribute: attr.to_str().unwrap_or("?"),
            code: ret as i32,
        });
    }
    Ok(())
}

fn write_ll(chn: *mut IioChannel, attr: &'static CStr, value: i64) -> Result<(), RfError> {
    let ret = unsafe { iio_channel_attr_write_longlong(chn, attr.as_ptr(), value) };
    if ret < 0 {
        return Err(RfError {
            attribute: attr.to_str().unwrap_or("?"),
            code: ret,
        });
    }
    Ok(())
}

impl RfFrontEnd for PlutoFrontEnd {
    fn apply_stream_config(&mut self, dir: Direction, cfg: &StreamConfig) -> Result<(), RfError> {
        let phy = self.phy(dir);
        // Try every attribute; report the first rejection
        let results = [
            write_str(phy, c"rf_port_select", &cfg.rf_port),
            write_ll(phy, c"rf_bandwidth", cfg.bandwidth_hz as i64),
            write_ll(phy, c"sampling_frequency", cfg.sample_rate_hz as i64),
            write_ll(self.lo(dir), c"frequency", cfg.lo_hz as i64),
        ];
        results.into_iter().collect()
    }

    fn set_local_oscillator(&mut self, dir: Direction, hz: u64) -> Result<(), RfError> {
        write_ll(self.lo(dir), c"frequency", hz as i64)
    }

    fn set_gain(&mut self, dir: Direction, mode: GainMode) -> Result<(), RfError> {
        let phy = self.phy(dir);
        match (dir, mode) {
            (Direction::Rx, GainMode::Agc) => write_str(phy, c"gain_control_mode", "slow_attack"),
            (Direction::Rx, GainMode::Manual(db)) => {
                write_str(phy, c"gain_control_mode", "manual")?;
                write_ll(phy, c"hardwaregain", db)
            }
            // No transmit AGC: attenuation only
            (Direction::Tx, GainMode::Agc) => Ok(()),
            (Direction::Tx, GainMode::Manual(db)) => write_ll(phy, c"hardwaregain", db),
        }
    }
}

pub struct PlutoRx {
    buf: *mut IioBuffer,
    first: *mut IioChannel,
    _ctx: Arc<Context>,
}

unsafe impl Send for PlutoRx {}

impl RxStream for PlutoRx {
    fn refill(&mut self) -> io::Result<RawBlock<'_>> {
        let ret = unsafe { iio_buffer_refill(self.buf) };
        if ret < 0 {
            return Err(io::Error::from_raw_os_error(-ret as i32));
        }
        let (data, (step, len)) = unsafe { buffer_span(self.buf, self.first) };
        Ok(RawBlock {
            data: unsafe { std::slice::from_raw_parts(data, len) },
            step,
        })
    }
}

impl Drop for PlutoRx {
    fn drop(&mut self) {
        unsafe { iio_buffer_destroy(self.buf) };
    }
}

pub struct PlutoTx {
    buf: *mut IioBuffer,
    first: *mut IioChannel,
    _ctx: Arc<Context>,
}

unsafe impl Send for PlutoTx {}

impl TxStream for PlutoTx {
    fn capacity(&self) -> usize {
        let (_, (step, len)) = unsafe { buffer_span(self.buf, self.first) };
        if step == 0 {
            0
        } else {
            len / step
        }
    }

    fn block_mut(&mut self) -> RawBlockMut<'_> {
        let (data, (step, len)) = unsafe { buffer_span(self.buf, self.first) };
        RawBlockMut {
            data: unsafe { std::slice::from_raw_parts_mut(data, len) },
            step,
        }
    }

    fn push(&mut self) -> io::Result<usize> {
        let ret = unsafe { iio_buffer_push(self.buf) };
        if ret < 0 {
            return Err(io::Error::from_raw_os_error(-ret as i32));
        }
        Ok(ret as usize)
    }
}

impl Drop for PlutoTx {
    fn drop(&mut self) {
        unsafe { iio_buffer_destroy(self.buf) };
    }
}

/// First record of `chn` in `buf`, with `(step, bytes to end of buffer)`.
unsafe fn buffer_span(buf: *mut IioBuffer, chn: *mut IioChannel) -> (*mut u8, (usize, usize)) {
    let first = iio_buffer_first(buf, chn) as *mut u8;
    let end = iio_buffer_end(buf) as *mut u8;
    let step = iio_buffer_step(buf).max(0) as usize;
    let len = (end as usize).saturating_sub(first as usize);
    (first, (step, len))
}
