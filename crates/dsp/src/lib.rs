pub mod level;
pub mod nco;
pub mod rate;

pub use level::{LevelMeter, SIGNAL_LEVEL_ALPHA};
pub use nco::OscillatorTable;
pub use rate::{Expander, RateConverter, RateTable};
