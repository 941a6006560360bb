pub mod raw;
pub mod wav;

pub use raw::RawDump;
pub use wav::WavDump;
