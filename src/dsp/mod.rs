//! Digital signal processing building blocks for the receiver pipeline.
//!
//! Every block here keeps its filter memory across calls so that a stream
//! processed block-by-block is bit-for-bit the stream processed in one go:
//! - [`mixer::FineTuner`]: complex mixer with a double-precision phase
//!   accumulator, for digital retuning.
//! - [`fir::Fir`]: stateful windowed-sinc FIR low-pass over real or complex
//!   samples.
//! - [`downsample::DecimatingFir`]: anti-alias filter plus integer
//!   decimation.
//! - [`resampler::FractionalResampler`]: polyphase rational-ratio resampler.

use std::f64::consts::PI;

use crate::IQSample;

pub mod downsample;
pub mod fir;
pub mod mixer;
pub mod resampler;

/// Wrap a phase in radians to (-π, π].
pub fn wrap_phase(phase: f64) -> f64 {
    let mut p = phase - (phase / (2.0 * PI)).round() * 2.0 * PI;
    if p <= -PI {
        p += 2.0 * PI;
    }
    p
}

/// Mean and RMS over a block of real samples.
pub fn mean_rms(samples: &[f32]) -> (f64, f64) {
    if samples.is_empty() {
        return (0.0, 0.0);
    }
    let mut sum = 0.0f64;
    let mut sumsq = 0.0f64;
    for &v in samples {
        sum += v as f64;
        sumsq += (v as f64) * (v as f64);
    }
    let n = samples.len() as f64;
    (sum / n, (sumsq / n).sqrt())
}

/// RMS modulus over a block of complex samples.
pub fn rms_complex(samples: &[IQSample]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sumsq: f64 = samples.iter().map(|z| z.norm_sqr() as f64).sum();
    (sumsq / samples.len() as f64).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use num_complex::Complex;

    #[test]
    fn test_wrap_phase_range() {
        for k in -5..=5 {
            let p = wrap_phase(1.0 + k as f64 * 2.0 * PI);
            assert_relative_eq!(p, 1.0, epsilon = 1e-12);
        }
        assert_relative_eq!(wrap_phase(PI), PI, epsilon = 1e-12);
        assert_relative_eq!(wrap_phase(-PI), PI, epsilon = 1e-12);
    }

    #[test]
    fn test_mean_rms() {
        let (mean, rms) = mean_rms(&[1.0, -1.0, 1.0, -1.0]);
        assert_relative_eq!(mean, 0.0);
        assert_relative_eq!(rms, 1.0);
    }

    #[test]
    fn test_rms_complex_unit_circle() {
        let samples = vec![Complex::new(0.6, 0.8); 10];
        assert_relative_eq!(rms_complex(&samples), 1.0, epsilon = 1e-6);
    }
}
