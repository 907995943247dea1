//! Phase lock on the 19 kHz stereo pilot.
//!
//! The PLL tracks the pilot buried in the FM multiplex and synthesises a
//! numerically controlled oscillator that is phase-coherent with it. The
//! doubled NCO phase gives the 38 kHz reference used to demodulate the
//! L-R subcarrier, and counting pilot cycles gives a pulse-per-second
//! marker accurate to a fraction of a sample.
//!
//! Both the NCO phase and frequency are kept in double precision; the
//! loop runs for hours and single-precision phase steps would walk off.

use std::f64::consts::{FRAC_1_SQRT_2, PI, SQRT_2};

/// Nominal pilot frequency of an FM broadcast multiplex, Hz.
pub const PILOT_HZ: f64 = 19_000.0;

/// NCO capture range around the nominal pilot, Hz.
const FREQ_RANGE_HZ: f64 = 100.0;

/// Natural frequency of the closed loop, Hz.
const LOOP_BANDWIDTH_HZ: f64 = 100.0;

/// Pilot injection the loop gains are normalized for (10% of deviation);
/// the phase detector gain scales with the received pilot amplitude.
const NOMINAL_PILOT_AMPLITUDE: f64 = 0.1;

/// Minimum in-phase pilot level accepted as a real pilot.
const MIN_PILOT_LEVEL: f64 = 0.01;

/// Seconds the lock condition must hold before stereo is reported.
const LOCK_HOLD_SECONDS: f64 = 0.05;

/// One pulse-per-second marker, pinned to the pilot cycle that completed
/// a full second.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PpsEvent {
    /// Monotonic event counter, starting at 0.
    pub pps_index: u64,
    /// Baseband samples consumed when the marker fired.
    pub sample_index: u64,
    /// Fractional position of the marker inside the current block, [0, 1).
    pub block_position: f64,
}

/// PLL tracking the 19 kHz pilot; emits the coherent 38 kHz reference.
///
/// # Example
///
/// ```
/// use softfm::pll::PilotPhaseLock;
///
/// let mut pll = PilotPhaseLock::new(240_000.0);
/// let pilot: Vec<f32> = (0..24_000)
///     .map(|n| 0.1 * (2.0 * std::f64::consts::PI * 19_000.0 * n as f64 / 240_000.0).cos() as f32)
///     .collect();
/// let ref38 = pll.process(&pilot);
/// assert_eq!(ref38.len(), pilot.len());
/// ```
pub struct PilotPhaseLock {
    /// NCO phase in radians, wrapped to (-π, π].
    phase: f64,
    /// Nominal NCO step, radians per sample.
    freq_nominal: f64,
    /// Frequency window half-width, radians per sample.
    freq_range: f64,
    /// Proportional gain.
    alpha: f64,
    /// Integral gain.
    beta: f64,
    /// Loop-filter integrator (frequency offset from nominal).
    integrator: f64,

    /// Smoothing coefficient for the lock detector.
    lock_alpha: f64,
    /// Smoothed in-phase pilot product, ≈ A/2 when locked.
    pilot_filt: f64,
    /// Low-passed phase error.
    err_filt: f64,
    /// Smoothed power of the filtered error.
    err_pow: f64,
    /// Consecutive samples the lock condition has held.
    lock_count: usize,
    /// Samples of sustained condition required to report lock.
    lock_hold: usize,
    locked: bool,

    /// Pilot cycles counted since the last PPS marker.
    cycles: u32,
    /// Cycles per marker: one true second of an on-frequency pilot.
    cycles_per_second: u32,
    /// Baseband samples consumed before the current block.
    sample_count: u64,
    next_pps_index: u64,
    events: Vec<PpsEvent>,
}

impl PilotPhaseLock {
    /// Create a pilot lock for a baseband running at `sample_rate` S/s.
    pub fn new(sample_rate: f64) -> Self {
        assert!(
            sample_rate > 2.0 * 2.0 * PILOT_HZ,
            "baseband rate too low to carry the 38 kHz subcarrier"
        );

        // Second-order loop: alpha = 2ζω_n, beta = ω_n², scaled by the
        // nominal detector gain A/2.
        let omega_n = 2.0 * PI * LOOP_BANDWIDTH_HZ / sample_rate;
        let detector_gain = NOMINAL_PILOT_AMPLITUDE / 2.0;
        let alpha = 2.0 * FRAC_1_SQRT_2 * omega_n / detector_gain;
        let beta = omega_n * omega_n / detector_gain;

        let lock_fc = 50.0;
        let lock_alpha = 2.0 * PI * lock_fc / (sample_rate + 2.0 * PI * lock_fc);

        Self {
            phase: 0.0,
            freq_nominal: 2.0 * PI * PILOT_HZ / sample_rate,
            freq_range: 2.0 * PI * FREQ_RANGE_HZ / sample_rate,
            alpha,
            beta,
            integrator: 0.0,
            lock_alpha,
            pilot_filt: 0.0,
            err_filt: 0.0,
            err_pow: 0.0,
            lock_count: 0,
            lock_hold: (LOCK_HOLD_SECONDS * sample_rate) as usize,
            locked: false,
            cycles: 0,
            cycles_per_second: PILOT_HZ as u32,
            sample_count: 0,
            next_pps_index: 0,
            events: Vec::new(),
        }
    }

    /// Track one block of baseband samples and return the coherent 38 kHz
    /// reference, one sample per input sample.
    ///
    /// PPS markers found in this block replace the previous block's in
    /// [`pps_events`](Self::pps_events).
    pub fn process(&mut self, input: &[f32]) -> Vec<f32> {
        self.events.clear();
        let n = input.len();
        let mut ref38 = Vec::with_capacity(n);

        for (k, &x) in input.iter().enumerate() {
            let s = x as f64;
            let (q, c) = self.phase.sin_cos();
            ref38.push((2.0 * c * c - 1.0) as f32);

            // Multiplier phase detector: averages to (A/2)·sin(θ - φ)
            // for a pilot A·cos(θ).
            let err = s * -q;
            let control = self.alpha * err + self.integrator;
            self.integrator =
                (self.integrator + self.beta * err).clamp(-self.freq_range, self.freq_range);
            let freq = (self.freq_nominal + control).clamp(
                self.freq_nominal - self.freq_range,
                self.freq_nominal + self.freq_range,
            );

            let before = self.phase;
            self.phase += freq;
            if before < 0.0 && self.phase >= 0.0 {
                // Upward zero crossing: one pilot cycle completed.
                self.cycles += 1;
                if self.cycles == self.cycles_per_second {
                    self.cycles = 0;
                    let frac = -before / freq;
                    self.events.push(PpsEvent {
                        pps_index: self.next_pps_index,
                        sample_index: self.sample_count + k as u64,
                        block_position: (k as f64 + frac) / n as f64,
                    });
                    self.next_pps_index += 1;
                }
            }
            if self.phase > PI {
                self.phase -= 2.0 * PI;
            }

            // Lock detector: in-phase level against filtered error RMS.
            self.pilot_filt += self.lock_alpha * (s * c - self.pilot_filt);
            self.err_filt += self.lock_alpha * (err - self.err_filt);
            self.err_pow += self.lock_alpha * (self.err_filt * self.err_filt - self.err_pow);
            let in_lock = self.pilot_filt > MIN_PILOT_LEVEL
                && self.pilot_filt > 4.0 * self.err_pow.sqrt();
            self.lock_count = if in_lock { self.lock_count + 1 } else { 0 };
            self.locked = self.lock_count >= self.lock_hold;
        }

        self.sample_count += n as u64;
        ref38
    }

    /// `true` once the pilot has been held for the lock window.
    pub fn locked(&self) -> bool {
        self.locked
    }

    /// RMS level of the recovered 19 kHz pilot tone.
    pub fn pilot_level(&self) -> f64 {
        (self.pilot_filt * SQRT_2).max(0.0)
    }

    /// PPS markers found in the most recent block.
    pub fn pps_events(&self) -> &[PpsEvent] {
        &self.events
    }

    /// Drop lock state and loop memory, keeping the PPS counters.
    pub fn reset(&mut self) {
        self.phase = 0.0;
        self.integrator = 0.0;
        self.pilot_filt = 0.0;
        self.err_filt = 0.0;
        self.err_pow = 0.0;
        self.lock_count = 0;
        self.locked = false;
    }
}
