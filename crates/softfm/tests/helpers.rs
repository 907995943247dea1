//! Test helpers: synthetic FM multiplex generation and tone measurement.

#![allow(dead_code)]

use std::f64::consts::PI;

use num_complex::Complex;

/// Frequency-modulate a multiplex signal onto a complex carrier at DC.
///
/// `mpx` is sampled at `sample_rate`; instantaneous frequency is
/// `freq_dev · mpx[n]`.
pub fn fm_modulate(mpx: &[f64], sample_rate: f64, freq_dev: f64) -> Vec<Complex<f32>> {
    let mut phase = 0.0f64;
    let mut out = Vec::with_capacity(mpx.len());
    for &m in mpx {
        out.push(Complex::new(phase.cos() as f32, phase.sin() as f32));
        phase += 2.0 * PI * freq_dev * m / sample_rate;
        phase %= 2.0 * PI;
    }
    out
}

/// Mono multiplex: a single audio tone at `freq`, amplitude in [0, 1].
pub fn mono_mpx(freq: f64, amplitude: f64, sample_rate: f64, n: usize) -> Vec<f64> {
    (0..n)
        .map(|i| amplitude * (2.0 * PI * freq * i as f64 / sample_rate).sin())
        .collect()
}

/// Stereo multiplex with `left` carrying a tone at `freq` and a silent
/// right channel: `(L+R)/2 + pilot + (L-R)/2 · cos(2ω_p t)`.
pub fn left_only_mpx(freq: f64, amplitude: f64, sample_rate: f64, n: usize) -> Vec<f64> {
    let pilot = 0.1;
    (0..n)
        .map(|i| {
            let t = i as f64 / sample_rate;
            let audio = amplitude * (2.0 * PI * freq * t).sin();
            audio / 2.0
                + pilot * (2.0 * PI * 19_000.0 * t).cos()
                + audio / 2.0 * (2.0 * 2.0 * PI * 19_000.0 * t).cos()
        })
        .collect()
}

/// Deterministic xorshift noise source for repeatable tests.
pub struct Noise(u64);

impl Noise {
    pub fn new(seed: u64) -> Self {
        Noise(seed.max(1))
    }

    /// Next white-noise sample uniform in [-1, 1).
    pub fn next(&mut self) -> f64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        (x >> 11) as f64 / (1u64 << 52) as f64 * 2.0 - 1.0
    }
}

/// Power of `signal` at `frequency` via the Goertzel recurrence,
/// normalized so a full-scale sine reports 0.25.
pub fn goertzel_power(signal: &[f32], frequency: f64, sample_rate: f64) -> f64 {
    let w = 2.0 * PI * frequency / sample_rate;
    let coeff = 2.0 * w.cos();
    let (mut s1, mut s2) = (0.0f64, 0.0f64);
    for &x in signal {
        let s0 = x as f64 + coeff * s1 - s2;
        s2 = s1;
        s1 = s0;
    }
    let n = signal.len() as f64;
    (s1 * s1 + s2 * s2 - coeff * s1 * s2) / (n * n)
}
