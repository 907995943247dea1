//! Anti-aliased integer decimation of the IF stream.
//!
//! The baseband of a wide-band FM multiplex is empty above ~100 kHz, so the
//! tuned signal can be taken down to ~200 kS/s before demodulation. The
//! decimator runs a real-coefficient low-pass over the complex input (see
//! [`crate::dsp::fir`]), then keeps every `factor`-th sample. Both the
//! filter history and the decimation phase survive block boundaries.

use crate::dsp::fir::Fir;
use crate::IQSample;

/// Low-pass filter plus integer decimation.
///
/// # Example
///
/// ```
/// use heterodyne::dsp::downsample::DecimatingFir;
/// use num_complex::Complex;
///
/// // 1.2 MS/s IF down to 240 kS/s, keeping 50 kHz of bandwidth.
/// let mut decim = DecimatingFir::new(5, 50_000.0, 1_200_000.0, 121);
/// let out = decim.process(&vec![Complex::new(0.1, 0.0); 4096]);
/// assert!((out.len() as i64 - 4096 / 5).abs() <= 1);
/// ```
pub struct DecimatingFir {
    fir: Fir<IQSample>,
    factor: usize,
    /// Index into the next filtered block of the first sample to keep.
    skip: usize,
}

impl DecimatingFir {
    /// Create a decimator by `factor` with an anti-alias cut-off of
    /// `cutoff_hz` at `sample_rate`.
    ///
    /// # Panics
    ///
    /// Panics if `factor` is 0.
    pub fn new(factor: usize, cutoff_hz: f32, sample_rate: f32, taps: usize) -> Self {
        assert!(factor > 0, "Decimation factor must be greater than 0");
        Self {
            fir: Fir::lowpass(cutoff_hz, sample_rate, taps),
            factor,
            skip: 0,
        }
    }

    /// Filter and decimate one block.
    pub fn process(&mut self, input: &[IQSample]) -> Vec<IQSample> {
        let filtered = self.fir.process(input);
        let mut out = Vec::with_capacity(filtered.len() / self.factor + 1);
        let mut i = self.skip;
        while i < filtered.len() {
            out.push(filtered[i]);
            i += self.factor;
        }
        self.skip = i - filtered.len();
        out
    }

    /// The decimation factor.
    pub fn factor(&self) -> usize {
        self.factor
    }

    /// Clear filter history and decimation phase.
    pub fn reset(&mut self) {
        self.fir.reset();
        self.skip = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use num_complex::Complex;

    #[test]
    fn test_output_count_exact_over_splits() {
        // 10000 input samples at factor 7 must yield ceil(10000/7) outputs
        // no matter how the stream is chopped up.
        let mut decim = DecimatingFir::new(7, 50_000.0, 1_200_000.0, 31);
        let block = vec![Complex::new(0.5, 0.5); 1000];
        let mut total = 0;
        for _ in 0..10 {
            total += decim.process(&block).len();
        }
        assert_eq!(total, 10000usize.div_ceil(7));
    }

    #[test]
    fn test_dc_preserved() {
        let mut decim = DecimatingFir::new(4, 50_000.0, 1_200_000.0, 61);
        let out = decim.process(&vec![Complex::new(0.25, -0.5); 4096]);
        let tail = &out[out.len() - 100..];
        for z in tail {
            assert_relative_eq!(z.re, 0.25, epsilon = 1e-3);
            assert_relative_eq!(z.im, -0.5, epsilon = 1e-3);
        }
    }

    #[test]
    fn test_split_equals_whole() {
        let input: Vec<IQSample> = (0..5000)
            .map(|i| {
                let p = 2.0 * std::f32::consts::PI * 10_000.0 * i as f32 / 1_200_000.0;
                Complex::new(p.cos(), p.sin())
            })
            .collect();

        let mut whole = DecimatingFir::new(5, 50_000.0, 1_200_000.0, 41);
        let expected = whole.process(&input);

        let mut split = DecimatingFir::new(5, 50_000.0, 1_200_000.0, 41);
        let mut got = split.process(&input[..1234]);
        got.extend(split.process(&input[1234..1235]));
        got.extend(split.process(&input[1235..]));

        assert_eq!(expected.len(), got.len());
        for (a, b) in expected.iter().zip(got.iter()) {
            assert_relative_eq!(a.re, b.re, epsilon = 1e-6);
            assert_relative_eq!(a.im, b.im, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_factor_one_is_filter_only() {
        let mut decim = DecimatingFir::new(1, 50_000.0, 225_001.0, 31);
        let out = decim.process(&vec![Complex::new(0.1, 0.1); 512]);
        assert_eq!(out.len(), 512);
    }
}
