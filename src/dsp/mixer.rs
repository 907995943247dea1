//! Digital fine tuning: multiply the I/Q stream by a complex exponential.
//!
//! The tuner is deliberately parked off the wanted station (to keep the DC
//! spike out of band), and this mixer shifts the station back to 0 Hz:
//! `y[n] = x[n] · exp(-j·2π·f_offset·n / f_if)`.
//!
//! The phase accumulator is kept in double precision and wrapped to
//! (-π, π] after each block; at 1.2 MS/s a single-precision accumulator
//! would drift audibly within the hour.

use num_complex::Complex;

use crate::dsp::wrap_phase;
use crate::IQSample;

/// Complex mixer with a block-persistent phase accumulator.
///
/// # Example
///
/// ```
/// use heterodyne::dsp::mixer::FineTuner;
/// use num_complex::Complex;
///
/// // Shift a station 300 kHz below the tuner centre up to baseband.
/// let mut tuner = FineTuner::new(-300_000.0, 1_200_000.0);
/// let output = tuner.process(&vec![Complex::new(1.0, 0.0); 1024]);
/// assert_eq!(output.len(), 1024);
/// ```
pub struct FineTuner {
    /// Current phase in radians, wrapped to (-π, π] at block boundaries.
    phase: f64,
    /// Phase advance per sample in radians.
    step: f64,
}

impl FineTuner {
    /// Create a mixer translating `offset_hz` down to 0 Hz at `if_rate` S/s.
    pub fn new(offset_hz: f64, if_rate: f64) -> Self {
        assert!(if_rate > 0.0, "IF rate must be greater than 0");
        Self {
            phase: 0.0,
            step: wrap_phase(-2.0 * std::f64::consts::PI * offset_hz / if_rate),
        }
    }

    /// Mix one block. Output length equals input length.
    pub fn process(&mut self, input: &[IQSample]) -> Vec<IQSample> {
        let mut out = Vec::with_capacity(input.len());
        let mut phase = self.phase;
        for &s in input {
            let rot = Complex::new(phase.cos() as f32, phase.sin() as f32);
            out.push(s * rot);
            phase += self.step;
        }
        self.phase = wrap_phase(phase);
        out
    }

    /// Reset the accumulator to phase zero.
    pub fn reset(&mut self) {
        self.phase = 0.0;
    }
}
