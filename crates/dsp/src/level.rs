use num_complex::Complex32;

/// Smoothing factor for the long-term signal level.
pub const SIGNAL_LEVEL_ALPHA: f32 = 1e-5;

/// Envelope follower tracking the average sample magnitude.
///
/// With the default alpha it follows the long-term level over roughly 10^5
/// samples and ignores short peaks.
#[derive(Debug, Clone)]
pub struct LevelMeter {
    alpha: f32,
    level: f32,
}

impl LevelMeter {
    pub fn new(alpha: f32) -> Self {
        Self { alpha, level: 0.0 }
    }

    /// Fold one sample into the estimate and return the new level.
    pub fn update(&mut self, sample: Complex32) -> f32 {
        self.level = self.alpha * sample.norm() + (1.0 - self.alpha) * self.level;
        self.level
    }

    pub fn level(&self) -> f32 {
        self.level
    }

    pub fn reset(&mut self) {
        self.level = 0.0;
    }
}

impl Default for LevelMeter {
    fn default() -> Self {
        Self::new(SIGNAL_LEVEL_ALPHA)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_sample_scales_by_alpha() {
        let mut meter = LevelMeter::default();
        let level = meter.update(Complex32::new(0.3, 0.4));
        assert!(
            (level - SIGNAL_LEVEL_ALPHA * 0.5).abs() < 1e-9,
            "level = {}, expected alpha * 0.5",
            level
        );
    }

    #[test]
    fn test_approaches_magnitude_monotonically() {
        let mut meter = LevelMeter::new(0.01);
        let mut prev = 0.0;
        for _ in 0..500 {
            let level = meter.update(Complex32::new(0.0, -0.8));
            assert!(level > prev, "level must keep rising");
            assert!(level <= 0.8);
            prev = level;
        }
        assert!((prev - 0.8).abs() < 1e-2);
    }

    #[test]
    fn test_reset_clears_level() {
        let mut meter = LevelMeter::new(0.5);
        meter.update(Complex32::new(1.0, 0.0));
        meter.reset();
        assert_eq!(meter.level(), 0.0);
    }
}
