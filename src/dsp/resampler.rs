//! Polyphase fractional resampling from the baseband rate to the PCM rate.
//!
//! The ratio is expressed as `up / down`, the best rational approximation
//! of `pcm_rate / baseband_rate` found by continued fractions (exact for
//! every common pair, e.g. 240 kHz → 48 kHz is 1/5 and 48 kHz → 44.1 kHz
//! is 147/160). The prototype low-pass is a windowed sinc designed at the
//! virtual rate `up · baseband_rate` and split into `up` phase banks, so
//! only the output samples actually needed are computed.
//!
//! The last `filter_length - 1` input samples persist across blocks; a
//! stream resampled block-by-block carries no seams at block boundaries.

use std::collections::VecDeque;

use crate::dsp::fir::lowpass_taps;

/// Best rational approximation `num/den` of `ratio` by continued
/// fractions, stopping at `tol` relative error or a denominator bound.
pub fn best_rational(ratio: f64, tol: f64, max_den: usize) -> (usize, usize) {
    assert!(ratio > 0.0, "ratio must be positive");

    let mut x = ratio;
    // Convergents h/k, seeded per the standard recurrence.
    let (mut h1, mut k1, mut h0, mut k0) = (1u64, 0u64, 0u64, 1u64);
    loop {
        let a = x.floor() as u64;
        let h = a * h1 + h0;
        let k = a * k1 + k0;
        if k as usize > max_den && k1 != 0 {
            break;
        }
        h0 = h1;
        k0 = k1;
        h1 = h;
        k1 = k;
        let err = (h as f64 / k as f64 - ratio).abs() / ratio;
        if err <= tol {
            break;
        }
        let frac = x - a as f64;
        if frac < 1e-12 {
            break;
        }
        x = 1.0 / frac;
    }
    (h1 as usize, k1 as usize)
}

/// Polyphase rational-ratio resampler for one real channel.
///
/// # Example
///
/// ```
/// use heterodyne::dsp::resampler::FractionalResampler;
///
/// // 240 kHz baseband down to 48 kHz audio.
/// let mut resampler = FractionalResampler::new(240_000.0, 48_000.0);
/// let out = resampler.process(&vec![0.0; 2400]);
/// assert_eq!(out.len(), 480);
/// ```
pub struct FractionalResampler {
    up: usize,
    down: usize,
    /// `up` banks of `taps_per_phase` prototype coefficients.
    banks: Vec<Vec<f32>>,
    taps_per_phase: usize,
    /// The most recent `taps_per_phase` input samples, newest at the back.
    hist: VecDeque<f32>,
    /// Output-phase accumulator in [0, up).
    phase_acc: usize,
}

impl FractionalResampler {
    /// Sinc taps per polyphase bank.
    const TAPS_PER_PHASE: usize = 24;

    /// Create a resampler from `input_rate` to `output_rate` (Hz).
    ///
    /// # Panics
    ///
    /// Panics if either rate is not positive.
    pub fn new(input_rate: f64, output_rate: f64) -> Self {
        assert!(input_rate > 0.0, "input rate must be greater than 0");
        assert!(output_rate > 0.0, "output rate must be greater than 0");

        let (up, down) = best_rational(output_rate / input_rate, 1e-6, 1024);
        Self::with_ratio(up, down, input_rate, output_rate)
    }

    /// Create a resampler with an explicit `up/down` ratio.
    pub fn with_ratio(up: usize, down: usize, input_rate: f64, output_rate: f64) -> Self {
        assert!(up > 0 && down > 0, "resampling ratio must be positive");

        let taps_per_phase = Self::TAPS_PER_PHASE;
        let length = up * taps_per_phase;
        let cutoff = 0.45 * input_rate.min(output_rate);
        let virtual_rate = up as f64 * input_rate;
        let mut proto = lowpass_taps(cutoff as f32, virtual_rate as f32, length);
        // The prototype is normalized to unity gain; zero-stuffing by `up`
        // divides the passband level by the same factor.
        for tap in proto.iter_mut() {
            *tap *= up as f32;
        }

        let banks = (0..up)
            .map(|p| proto.iter().skip(p).step_by(up).copied().collect())
            .collect();

        let mut hist = VecDeque::with_capacity(taps_per_phase);
        hist.extend(std::iter::repeat(0.0f32).take(taps_per_phase));

        Self {
            up,
            down,
            banks,
            taps_per_phase,
            hist,
            phase_acc: 0,
        }
    }

    /// The rational ratio in use.
    pub fn ratio(&self) -> (usize, usize) {
        (self.up, self.down)
    }

    /// Resample one block.
    pub fn process(&mut self, input: &[f32]) -> Vec<f32> {
        let mut out = Vec::with_capacity(input.len() * self.up / self.down + 1);
        for &x in input {
            self.hist.pop_front();
            self.hist.push_back(x);
            while self.phase_acc < self.up {
                let bank = &self.banks[self.phase_acc];
                let mut acc = 0.0f32;
                for (k, &tap) in bank.iter().enumerate() {
                    acc += tap * self.hist[self.taps_per_phase - 1 - k];
                }
                out.push(acc);
                self.phase_acc += self.down;
            }
            self.phase_acc -= self.up;
        }
        out
    }

    /// Drain the delay line at end of stream.
    pub fn flush(&mut self) -> Vec<f32> {
        let zeros = vec![0.0f32; self.taps_per_phase];
        self.process(&zeros)
    }

    /// Clear history and phase, as after a DSP fault.
    pub fn reset(&mut self) {
        for v in self.hist.iter_mut() {
            *v = 0.0;
        }
        self.phase_acc = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f32::consts::PI;

    #[test]
    fn test_best_rational_exact_pairs() {
        assert_eq!(best_rational(48_000.0 / 240_000.0, 1e-6, 1024), (1, 5));
        assert_eq!(best_rational(44_100.0 / 48_000.0, 1e-6, 1024), (147, 160));
        assert_eq!(best_rational(48_000.0 / (1_000_000.0 / 6.0), 1e-6, 1024), (36, 125));
        assert_eq!(best_rational(2.0, 1e-6, 1024), (2, 1));
    }

    #[test]
    fn test_best_rational_bounded_denominator() {
        // An irrational ratio still yields a small-denominator convergent.
        let (up, down) = best_rational(std::f64::consts::SQRT_2, 1e-9, 100);
        assert!(down <= 100);
        let err = (up as f64 / down as f64 - std::f64::consts::SQRT_2).abs();
        assert!(err < 1e-3, "convergent error {err}");
    }

    #[test]
    fn test_output_count_tracks_ratio() {
        let mut resampler = FractionalResampler::new(48_000.0, 44_100.0);
        let mut total = 0usize;
        for _ in 0..100 {
            total += resampler.process(&vec![0.0; 480]).len();
        }
        // 48000 input samples in, 44100 out (±1 for phase).
        assert!((total as i64 - 44_100).abs() <= 1, "got {total}");
    }

    #[test]
    fn test_dc_gain_unity() {
        let mut resampler = FractionalResampler::new(240_000.0, 48_000.0);
        let out = resampler.process(&vec![0.5; 4000]);
        for &v in &out[out.len() - 100..] {
            assert_relative_eq!(v, 0.5, epsilon = 1e-3);
        }
    }

    #[test]
    fn test_tone_level_preserved() {
        // An in-band tone keeps its level through the rate change.
        let input: Vec<f32> = (0..24_000)
            .map(|i| (2.0 * PI * 1_000.0 * i as f32 / 240_000.0).sin())
            .collect();
        let mut resampler = FractionalResampler::new(240_000.0, 48_000.0);
        let out = resampler.process(&input);

        let tail = &out[out.len() / 2..];
        let rms = (tail.iter().map(|v| v * v).sum::<f32>() / tail.len() as f32).sqrt();
        assert_relative_eq!(rms, 1.0 / 2.0f32.sqrt(), epsilon = 0.02);
    }

    #[test]
    fn test_split_equals_whole() {
        let input: Vec<f32> = (0..10_000)
            .map(|i| (2.0 * PI * 3_000.0 * i as f32 / 240_000.0).sin())
            .collect();

        let mut whole = FractionalResampler::new(240_000.0, 44_100.0);
        let expected = whole.process(&input);

        let mut split = FractionalResampler::new(240_000.0, 44_100.0);
        let mut got = split.process(&input[..777]);
        got.extend(split.process(&input[777..5000]));
        got.extend(split.process(&input[5000..]));

        assert_eq!(expected.len(), got.len());
        for (a, b) in expected.iter().zip(got.iter()) {
            assert_relative_eq!(a, b, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_flush_drains_tail() {
        let mut resampler = FractionalResampler::new(240_000.0, 48_000.0);
        resampler.process(&vec![1.0; 100]);
        let tail = resampler.flush();
        assert!(!tail.is_empty());
    }
}
