//! Stateful FIR low-pass filtering.
//!
//! Filters here are designed with the windowed-sinc method (Blackman
//! window, normalized to unity DC gain) and keep the last `taps - 1` input
//! samples across calls, so block boundaries leave no seam in the output:
//! processing a stream in chunks equals processing it whole.
//!
//! The filter is generic over the sample type; the receiver uses it both on
//! real audio (`Fir<f32>`) and on complex IF samples
//! (`Fir<Complex<f32>>`) with real coefficients.

use std::f32::consts::PI;
use std::ops::{Add, Mul};

/// Design a windowed-sinc low-pass, `cutoff_hz` at `sample_rate`, unity DC
/// gain.
///
/// # Panics
///
/// Panics if `taps` is 0 or `sample_rate` is not positive.
pub fn lowpass_taps(cutoff_hz: f32, sample_rate: f32, taps: usize) -> Vec<f32> {
    assert!(taps > 0, "Number of taps must be greater than 0");
    assert!(sample_rate > 0.0, "Sample rate must be greater than 0");

    let mut fir = Vec::with_capacity(taps);
    let mid = (taps / 2) as isize;
    let norm_cutoff = cutoff_hz / (sample_rate / 2.0);

    for n in 0..taps {
        let x = n as isize - mid;
        let sinc = if x == 0 {
            2.0 * norm_cutoff
        } else {
            (2.0 * norm_cutoff * PI * x as f32).sin() / (PI * x as f32)
        };
        // Blackman window
        let window = 0.42 - 0.5 * ((2.0 * PI * n as f32) / (taps as f32 - 1.0)).cos()
            + 0.08 * ((4.0 * PI * n as f32) / (taps as f32 - 1.0)).cos();
        fir.push(sinc * window);
    }

    let norm: f32 = fir.iter().sum();
    for v in fir.iter_mut() {
        *v /= norm;
    }
    fir
}

/// FIR filter with real coefficients and cross-block history.
///
/// # Example
///
/// ```
/// use heterodyne::dsp::fir::Fir;
///
/// // Isolate mono audio (0-15 kHz) from a 240 kHz FM baseband.
/// let mut filter: Fir<f32> = Fir::lowpass(15_000.0, 240_000.0, 257);
/// let out = filter.process(&vec![0.5; 1024]);
/// assert_eq!(out.len(), 1024);
/// ```
pub struct Fir<T> {
    taps: Vec<f32>,
    hist: Vec<T>,
}

impl<T> Fir<T>
where
    T: Copy + Default + Add<Output = T> + Mul<f32, Output = T>,
{
    /// Build a filter from explicit coefficients.
    pub fn new(taps: Vec<f32>) -> Self {
        assert!(!taps.is_empty(), "Number of taps must be greater than 0");
        let hist = vec![T::default(); taps.len() - 1];
        Self { taps, hist }
    }

    /// Build a windowed-sinc low-pass via [`lowpass_taps`].
    pub fn lowpass(cutoff_hz: f32, sample_rate: f32, taps: usize) -> Self {
        Self::new(lowpass_taps(cutoff_hz, sample_rate, taps))
    }

    /// Filter one block. Output length equals input length.
    pub fn process(&mut self, input: &[T]) -> Vec<T> {
        let ntaps = self.taps.len();
        let mut ext = Vec::with_capacity(self.hist.len() + input.len());
        ext.extend_from_slice(&self.hist);
        ext.extend_from_slice(input);

        let mut out = Vec::with_capacity(input.len());
        for i in 0..input.len() {
            let newest = i + ntaps - 1;
            let mut acc = T::default();
            for (j, &tap) in self.taps.iter().enumerate() {
                acc = acc + ext[newest - j] * tap;
            }
            out.push(acc);
        }

        let keep = ext.len() - self.hist.len();
        self.hist.copy_from_slice(&ext[keep..]);
        out
    }

    /// Number of coefficients.
    pub fn taps(&self) -> usize {
        self.taps.len()
    }

    /// Clear the history, as after a DSP fault.
    pub fn reset(&mut self) {
        self.hist.fill(T::default());
    }
}
