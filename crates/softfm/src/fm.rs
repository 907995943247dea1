//! FM demodulation: the phase discriminator, de-emphasis, and the decoder
//! that strings every stage together per input block.

use num_complex::Complex;

use heterodyne::dsp::downsample::DecimatingFir;
use heterodyne::dsp::fir::Fir;
use heterodyne::dsp::mixer::FineTuner;
use heterodyne::dsp::resampler::FractionalResampler;
use heterodyne::dsp::{mean_rms, rms_complex};
use heterodyne::IQSample;

use crate::pll::{PilotPhaseLock, PpsEvent};
use crate::stereo::StereoDemux;

/// Default de-emphasis time constant, µs (50 in Europe, 75 in the US).
pub const DEFAULT_DEEMPHASIS: f64 = 50.0;
/// Default IF bandwidth of the FM channel, Hz.
pub const DEFAULT_BANDWIDTH_IF: f64 = 100_000.0;
/// Default peak frequency deviation, Hz.
pub const DEFAULT_FREQ_DEV: f64 = 75_000.0;
/// Default audio bandwidth, Hz.
pub const DEFAULT_BANDWIDTH_PCM: f64 = 15_000.0;

/// Fixed gain applied to the finished audio.
const OUTPUT_GAIN: f32 = 0.5;

/// Phase discriminator: instantaneous frequency from consecutive samples.
///
/// `y[n] = arg(z[n] · conj(z[n-1])) / (π · k_dev)`, scaled so a carrier at
/// full deviation reads ±1. The previous sample persists across blocks.
pub struct PhaseDiscriminator {
    last: Complex<f32>,
    scale: f32,
}

impl PhaseDiscriminator {
    /// `freq_dev` is the peak deviation; `sample_rate` the baseband rate.
    pub fn new(freq_dev: f64, sample_rate: f64) -> Self {
        let k_dev = freq_dev / (sample_rate / 2.0);
        Self {
            last: Complex::new(1.0, 0.0),
            scale: (1.0 / (std::f64::consts::PI * k_dev)) as f32,
        }
    }

    pub fn process(&mut self, samples: &[IQSample]) -> Vec<f32> {
        let mut out = Vec::with_capacity(samples.len());
        for &z in samples {
            out.push((z * self.last.conj()).arg() * self.scale);
            self.last = z;
        }
        out
    }

    pub fn reset(&mut self) {
        self.last = Complex::new(1.0, 0.0);
    }
}

/// First-order de-emphasis filter, the inverse of the transmitter's
/// pre-emphasis: `y[n] = y[n-1] + (1 - exp(-1/(τ·fs))) · (x[n] - y[n-1])`.
pub struct Deemphasis {
    a: f32,
    b: f32,
    prev: f32,
}

impl Deemphasis {
    /// `tau_us` is the time constant in microseconds.
    pub fn new(sample_rate: f64, tau_us: f64) -> Self {
        let decay = (-1.0 / (tau_us * 1e-6 * sample_rate)).exp() as f32;
        Self {
            a: decay,
            b: 1.0 - decay,
            prev: 0.0,
        }
    }

    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        let mut out = Vec::with_capacity(samples.len());
        for &x in samples {
            let y = self.b * x + self.a * self.prev;
            out.push(y);
            self.prev = y;
        }
        out
    }

    pub fn reset(&mut self) {
        self.prev = 0.0;
    }
}

/// Frozen decoder configuration.
#[derive(Debug, Clone)]
pub struct DecoderConfig {
    /// IF sample rate delivered by the tuner, Hz.
    pub if_rate: f64,
    /// Offset of the wanted station from the tuner centre, Hz.
    pub tuning_offset: f64,
    /// Output audio rate, Hz.
    pub pcm_rate: f64,
    /// Decode the stereo subcarrier.
    pub stereo: bool,
    /// De-emphasis time constant, µs.
    pub deemphasis: f64,
    /// IF channel bandwidth, Hz.
    pub bandwidth_if: f64,
    /// Peak frequency deviation, Hz.
    pub freq_dev: f64,
    /// Audio bandwidth, Hz.
    pub bandwidth_pcm: f64,
    /// Integer IF-to-baseband decimation factor.
    pub downsample: usize,
}

/// The receiver core: owns every DSP stage and all cross-block state, and
/// turns I/Q capture blocks into audio frames.
///
/// Block boundaries are invisible to the signal path; all filter memories,
/// the mixer phase and the PLL state live here and persist across calls.
pub struct FmDecoder {
    fine_tuner: FineTuner,
    if_downsample: DecimatingFir,
    discriminator: PhaseDiscriminator,
    pilot_pll: PilotPhaseLock,
    demux: StereoDemux,
    deemph_left: Deemphasis,
    deemph_right: Deemphasis,
    audio_filter_left: Fir<f32>,
    audio_filter_right: Fir<f32>,
    resample_left: FractionalResampler,
    resample_right: FractionalResampler,

    stereo: bool,
    tuning_offset: f64,
    baseband_rate: f64,

    if_level: f64,
    baseband_level: f64,
    audio_level: f64,
    stereo_detected: bool,
    pps_events: Vec<PpsEvent>,
}

impl FmDecoder {
    pub fn new(config: &DecoderConfig) -> Self {
        assert!(config.downsample >= 1, "downsample factor must be >= 1");
        let baseband_rate = config.if_rate / config.downsample as f64;
        let if_taps = 16 * config.downsample + 1;

        Self {
            fine_tuner: FineTuner::new(config.tuning_offset, config.if_rate),
            if_downsample: DecimatingFir::new(
                config.downsample,
                (config.bandwidth_if / 2.0) as f32,
                config.if_rate as f32,
                if_taps,
            ),
            discriminator: PhaseDiscriminator::new(config.freq_dev, baseband_rate),
            pilot_pll: PilotPhaseLock::new(baseband_rate),
            demux: StereoDemux::new(baseband_rate),
            deemph_left: Deemphasis::new(baseband_rate, config.deemphasis),
            deemph_right: Deemphasis::new(baseband_rate, config.deemphasis),
            audio_filter_left: Fir::lowpass(config.bandwidth_pcm as f32, baseband_rate as f32, 127),
            audio_filter_right: Fir::lowpass(config.bandwidth_pcm as f32, baseband_rate as f32, 127),
            resample_left: FractionalResampler::new(baseband_rate, config.pcm_rate),
            resample_right: FractionalResampler::new(baseband_rate, config.pcm_rate),
            stereo: config.stereo,
            tuning_offset: config.tuning_offset,
            baseband_rate,
            if_level: 0.0,
            baseband_level: 0.0,
            audio_level: 0.0,
            stereo_detected: false,
            pps_events: Vec::new(),
        }
    }

    /// Decode one I/Q block into audio frames: interleaved left/right in
    /// stereo mode, single samples in mono.
    pub fn process(&mut self, iq: &[IQSample]) -> Vec<f32> {
        let mixed = self.fine_tuner.process(iq);
        let tuned = self.if_downsample.process(&mixed);
        self.if_level = rms_complex(&tuned);

        let baseband = self.discriminator.process(&tuned);
        let (_, baseband_rms) = mean_rms(&baseband);
        self.baseband_level = baseband_rms;

        let ref38 = self.pilot_pll.process(&baseband);
        self.pps_events.clear();
        self.pps_events.extend_from_slice(self.pilot_pll.pps_events());
        self.stereo_detected = self.stereo && self.pilot_pll.locked();

        let mut audio = if self.stereo {
            let (left, right) = self
                .demux
                .process(&baseband, &ref38, self.pilot_pll.locked());
            let left = self.deemph_left.process(&left);
            let right = self.deemph_right.process(&right);
            let left = self.audio_filter_left.process(&left);
            let right = self.audio_filter_right.process(&right);
            let left = self.resample_left.process(&left);
            let right = self.resample_right.process(&right);
            interleave(&left, &right)
        } else {
            let mono = self.demux.process_mono(&baseband);
            let mono = self.deemph_left.process(&mono);
            let mono = self.audio_filter_left.process(&mono);
            self.resample_left.process(&mono)
        };

        for s in audio.iter_mut() {
            *s *= OUTPUT_GAIN;
        }

        let (_, audio_rms) = mean_rms(&audio);
        if audio_rms.is_finite() {
            self.audio_level = 0.95 * self.audio_level + 0.05 * audio_rms;
        } else {
            debug_assert!(false, "non-finite sample in decoder output");
            audio.iter_mut().for_each(|s| *s = 0.0);
            self.reset();
        }
        audio
    }

    /// Drain the resampler tails at end of stream.
    pub fn finish(&mut self) -> Vec<f32> {
        if self.stereo {
            let left = self.resample_left.flush();
            let right = self.resample_right.flush();
            interleave(&left, &right)
        } else {
            self.resample_left.flush()
        }
    }

    /// Offset of the station from the tuner centre, Hz.
    pub fn tuning_offset(&self) -> f64 {
        self.tuning_offset
    }

    /// Rate of the discriminator output, S/s.
    pub fn baseband_rate(&self) -> f64 {
        self.baseband_rate
    }

    /// Audio channels produced per frame.
    pub fn channels(&self) -> usize {
        if self.stereo {
            2
        } else {
            1
        }
    }

    /// RMS of the tuned, decimated IF signal, updated per block.
    pub fn if_level(&self) -> f64 {
        self.if_level
    }

    /// RMS of the discriminator output, updated per block.
    pub fn baseband_level(&self) -> f64 {
        self.baseband_level
    }

    /// Exponentially smoothed audio RMS.
    pub fn audio_level(&self) -> f64 {
        self.audio_level
    }

    /// RMS of the recovered 19 kHz pilot.
    pub fn pilot_level(&self) -> f64 {
        self.pilot_pll.pilot_level()
    }

    /// `true` while stereo decoding is enabled and the pilot is locked.
    pub fn stereo_detected(&self) -> bool {
        self.stereo_detected
    }

    /// PPS markers found in the most recent block.
    pub fn pps_events(&self) -> &[PpsEvent] {
        &self.pps_events
    }

    fn reset(&mut self) {
        self.fine_tuner.reset();
        self.if_downsample.reset();
        self.discriminator.reset();
        self.pilot_pll.reset();
        self.demux.reset();
        self.deemph_left.reset();
        self.deemph_right.reset();
        self.audio_filter_left.reset();
        self.audio_filter_right.reset();
        self.resample_left.reset();
        self.resample_right.reset();
        self.audio_level = 0.0;
    }
}

fn interleave(left: &[f32], right: &[f32]) -> Vec<f32> {
    let frames = left.len().min(right.len());
    let mut out = Vec::with_capacity(frames * 2);
    for i in 0..frames {
        out.push(left[i]);
        out.push(right[i]);
    }
    out
}
