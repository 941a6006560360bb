use num_complex::Complex32;

/// Linear-interpolation map from one processing-rate period onto a window of
/// hardware-rate samples.
///
/// Entry `j` holds the window index just below the ideal input position of
/// output sample `j`, plus the fractional distance to the next input sample.
/// Positions are computed with integer arithmetic so the weights are exact
/// fractions of the output period.
#[derive(Debug, Clone)]
pub struct RateTable {
    bases: Vec<usize>,
    weights: Vec<f32>,
    input_len: usize,
}

impl RateTable {
    /// Build the table for `hardware_rate -> processing_rate`.
    ///
    /// Both rates are divided by `divider` first; the quotients give the input
    /// window length and the table length. The divider must divide both rates.
    pub fn new(hardware_rate: u32, processing_rate: u32, divider: u32) -> Self {
        assert!(divider > 0, "rate divider must be non-zero");
        assert!(
            hardware_rate % divider == 0 && processing_rate % divider == 0,
            "divider {} must divide both {} and {}",
            divider,
            hardware_rate,
            processing_rate
        );
        let input_len = (hardware_rate / divider) as usize;
        let output_len = (processing_rate / divider) as usize;
        assert!(output_len > 0, "processing rate must be at least the divider");

        let mut bases = Vec::with_capacity(output_len);
        let mut weights = Vec::with_capacity(output_len);
        for j in 0..output_len {
            let pos = j as u64 * input_len as u64;
            let base = pos / output_len as u64;
            let rem = pos % output_len as u64;
            bases.push(base as usize);
            weights.push((rem as f64 / output_len as f64) as f32);
        }

        Self {
            bases,
            weights,
            input_len,
        }
    }

    /// Number of output samples produced per block.
    pub fn len(&self) -> usize {
        self.bases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bases.is_empty()
    }

    /// Number of hardware samples consumed per block.
    pub fn input_len(&self) -> usize {
        self.input_len
    }

    /// `(base index, weight)` for output index `j`.
    pub fn entry(&self, j: usize) -> (usize, f32) {
        (self.bases[j], self.weights[j])
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, f32)> + '_ {
        self.bases.iter().copied().zip(self.weights.iter().copied())
    }
}

/// Fixed-ratio resampler driven by a [`RateTable`].
///
/// Samples are collected into a window of `input_len + 1` slots. When the
/// window is full one output block of `table.len()` samples is produced, the
/// last window slot is copied to slot 0 and filling restarts at index 1, so
/// exactly one input sample is carried across every block boundary.
pub struct RateConverter {
    table: RateTable,
    window: Vec<Complex32>,
    fill: usize,
    output: Vec<Complex32>,
}

impl RateConverter {
    pub fn new(hardware_rate: u32, processing_rate: u32, divider: u32) -> Self {
        Self::with_table(RateTable::new(hardware_rate, processing_rate, divider))
    }

    pub fn with_table(table: RateTable) -> Self {
        let window = vec![Complex32::default(); table.input_len() + 1];
        let output = vec![Complex32::default(); table.len()];
        Self {
            table,
            window,
            fill: 0,
            output,
        }
    }

    pub fn table(&self) -> &RateTable {
        &self.table
    }

    /// Feed one hardware-rate sample. Returns a full output block when this
    /// sample completed the window.
    pub fn push(&mut self, sample: Complex32) -> Option<&[Complex32]> {
        self.window[self.fill] = sample;
        self.fill += 1;
        if self.fill <= self.table.input_len() {
            return None;
        }

        for (out, (base, weight)) in self.output.iter_mut().zip(self.table.iter()) {
            *out = self.window[base + 1] * weight + self.window[base] * (1.0 - weight);
        }
        self.window[0] = self.window[self.table.input_len()];
        self.fill = 1;
        Some(&self.output)
    }
}

/// Expands one source-rate sample into `factor` hardware-rate samples for the
/// transmit path: the first sample carries the gain-scaled input, the rest are
/// zero.
pub struct Expander {
    gain: f32,
    block: Vec<Complex32>,
}

impl Expander {
    pub fn new(hardware_rate: u32, source_rate: u32, gain: f32) -> Self {
        assert!(
            source_rate > 0 && hardware_rate >= source_rate,
            "transmit rate {} cannot be expanded from {}",
            hardware_rate,
            source_rate
        );
        let factor = (hardware_rate / source_rate) as usize;
        Self {
            gain,
            block: vec![Complex32::default(); factor],
        }
    }

    pub fn factor(&self) -> usize {
        self.block.len()
    }

    pub fn expand(&mut self, sample: Complex32) -> &[Complex32] {
        self.block.fill(Complex32::default());
        self.block[0] = sample * self.gain;
        &self.block
    }
}
