//! Stereo demultiplexing of the FM baseband.
//!
//! The multiplex carries L+R in the 0-15 kHz band and L-R on a 38 kHz
//! double-sideband subcarrier. The sum channel is a plain low-pass; the
//! difference channel is the baseband multiplied by twice the coherent
//! 38 kHz reference, then low-passed. Reconstruction is `L = sum + diff`,
//! `R = sum - diff` while the pilot is locked, collapsing to mono when it
//! is not. Lock transitions ramp the difference gain over ~10 ms so a
//! station fading in and out of stereo does not click.

use heterodyne::dsp::fir::Fir;

/// Audio bandwidth of each multiplex channel, Hz.
const CHANNEL_BANDWIDTH: f32 = 15_000.0;

/// Length of the channel filters.
const CHANNEL_TAPS: usize = 127;

/// Seconds over which the stereo blend ramps on a gating transition.
const BLEND_SECONDS: f64 = 0.010;

/// Sum/difference extraction and left/right reconstruction.
pub struct StereoDemux {
    sum_filter: Fir<f32>,
    diff_filter: Fir<f32>,
    /// Current difference-channel gain in [0, 1].
    blend: f32,
    /// Per-sample blend ramp step.
    blend_step: f32,
}

impl StereoDemux {
    /// Create a demultiplexer for a baseband at `sample_rate` S/s.
    pub fn new(sample_rate: f64) -> Self {
        Self {
            sum_filter: Fir::lowpass(CHANNEL_BANDWIDTH, sample_rate as f32, CHANNEL_TAPS),
            diff_filter: Fir::lowpass(CHANNEL_BANDWIDTH, sample_rate as f32, CHANNEL_TAPS),
            blend: 0.0,
            blend_step: (1.0 / (BLEND_SECONDS * sample_rate)) as f32,
        }
    }

    /// Demultiplex one block into (left, right).
    ///
    /// `ref38` is the coherent subcarrier reference, one sample per
    /// baseband sample; `active` gates the difference channel.
    pub fn process(&mut self, baseband: &[f32], ref38: &[f32], active: bool) -> (Vec<f32>, Vec<f32>) {
        debug_assert_eq!(baseband.len(), ref38.len());

        let sum = self.sum_filter.process(baseband);
        let product: Vec<f32> = baseband
            .iter()
            .zip(ref38.iter())
            .map(|(&s, &r)| s * 2.0 * r)
            .collect();
        let diff = self.diff_filter.process(&product);

        let target = if active { 1.0f32 } else { 0.0f32 };
        let mut left = Vec::with_capacity(sum.len());
        let mut right = Vec::with_capacity(sum.len());
        for (&s, &d) in sum.iter().zip(diff.iter()) {
            if self.blend < target {
                self.blend = (self.blend + self.blend_step).min(target);
            } else if self.blend > target {
                self.blend = (self.blend - self.blend_step).max(target);
            }
            let d = d * self.blend;
            left.push(s + d);
            right.push(s - d);
        }
        (left, right)
    }

    /// Mono path: the sum channel only.
    pub fn process_mono(&mut self, baseband: &[f32]) -> Vec<f32> {
        self.sum_filter.process(baseband)
    }

    /// Clear filter memories and drop back to mono blend.
    pub fn reset(&mut self) {
        self.sum_filter.reset();
        self.diff_filter.reset();
        self.blend = 0.0;
    }
}
