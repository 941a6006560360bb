pub mod buffer;
pub mod callback;
pub mod direct;
pub mod dump;
pub mod error;
pub mod file;
pub mod reader;
pub mod rf;

#[cfg(feature = "pluto")]
pub mod pluto;

#[cfg(feature = "hackrf")]
pub mod hackrf;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub use buffer::{sample_ring, SampleConsumer, SampleProducer};
pub use error::{SetupError, StartError, Stopped};
pub use reader::SampleReader;

/// Processing rate delivered to the demodulator (DAB).
pub const PROCESSING_RATE: u32 = 2_048_000;

/// Sleep between checks of the running flag and buffer fill level.
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Time `stop()` gives in-flight hardware calls before joining workers.
pub const STOP_GRACE: Duration = Duration::from_millis(50);

/// Common trait for all device backends
pub trait DeviceHandler: Send {
    /// Tune the receiver to `frequency` Hz and start streaming into the
    /// attached output. Calling it while already running is a no-op.
    fn start(&mut self, frequency: u64) -> Result<(), StartError>;

    /// Stop streaming and wait for the workers. No-op when not running.
    fn stop(&mut self);

    /// Set the buffer receive samples are delivered into.
    fn attach_output(&mut self, output: SampleProducer);

    /// Flag that is true between `start` and `stop`.
    fn running_flag(&self) -> Arc<AtomicBool>;

    /// Rate of the samples delivered to the output buffer, in Hz
    fn sample_rate(&self) -> u32;

    /// Current receive LO frequency in Hz
    fn center_frequency(&self) -> u64;

    /// Resolution of the converter behind the samples, in bits. The
    /// default dump scale is taken from it.
    fn bit_depth(&self) -> usize;

    fn device_name(&self) -> String;

    fn is_running(&self) -> bool {
        self.running_flag().load(Ordering::SeqCst)
    }
}
