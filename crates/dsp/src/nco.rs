use std::f64::consts::PI;
use std::ops::Index;

use num_complex::Complex32;

/// Table of unit rotations `e^(j*2*pi*i/N)` for table-driven frequency shifting.
///
/// One entry per sample period at the input rate, so stepping the phase by
/// `k` entries per sample shifts the signal by `k` Hz. The table is immutable
/// once built and is meant to be shared (`Arc`) between readers.
pub struct OscillatorTable {
    table: Vec<Complex32>,
}

impl OscillatorTable {
    pub fn new(len: usize) -> Self {
        assert!(len > 0, "oscillator table must not be empty");
        let table = (0..len)
            .map(|i| {
                let arg = 2.0 * PI * i as f64 / len as f64;
                Complex32::new(arg.cos() as f32, arg.sin() as f32)
            })
            .collect();
        Self { table }
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Move `phase` backward by `offset` entries, wrapped into `[0, len)`.
    pub fn advance(&self, phase: usize, offset: i32) -> usize {
        let len = self.table.len() as i64;
        (phase as i64 - offset as i64).rem_euclid(len) as usize
    }
}

impl Index<usize> for OscillatorTable {
    type Output = Complex32;

    fn index(&self, phase: usize) -> &Complex32 {
        &self.table[phase]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entries_are_unit_rotations() {
        let nco = OscillatorTable::new(1000);
        for i in (0..1000).step_by(37) {
            assert!((nco[i].norm() - 1.0).abs() < 1e-6, "entry {} not unit", i);
        }
        assert_eq!(nco[0], Complex32::new(1.0, 0.0));
        assert!((nco[250].re).abs() < 1e-6 && (nco[250].im - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_advance_wraps_both_directions() {
        let nco = OscillatorTable::new(100);
        assert_eq!(nco.advance(0, 1), 99);
        assert_eq!(nco.advance(99, -1), 0);
        assert_eq!(nco.advance(10, 3), 7);
        assert_eq!(nco.advance(10, -95), 5);
        // Offsets larger than the table still land inside it
        assert_eq!(nco.advance(0, 250), 50);
        assert_eq!(nco.advance(0, -250), 50);
    }
}
