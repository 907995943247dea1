//! RTL-SDR source handle: opens the tuner and streams fixed-size I/Q
//! blocks, either synchronously or from a background capture thread that
//! publishes into the lock-free hand-off ring.
//!
//! Requires the `rtlsdr` feature (on by default).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use rtl_sdr_rs::{RtlSdr, TunerGain};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::handoff::BlockWriter;
use crate::{bytes_to_iq_slot, IQSample};

/// Preferred number of I/Q samples per capture block.
pub const DEFAULT_BLOCK_LENGTH: usize = 65536;

const MIN_BLOCK_LENGTH: usize = 4096;
const MAX_BLOCK_LENGTH: usize = 1024 * 1024;

/// Valid IF sample-rate ranges of the RTL2832 in Hz.
pub const SAMPLE_RATE_RANGES: [(u32, u32); 2] = [(225_001, 300_000), (900_001, 3_200_000)];

/// Tenth-dB LNA gain steps of the R820T tuner. The pure-Rust backend has no
/// gain enumeration call; this is the same table the tuner reports through
/// the C library.
pub const TUNER_GAINS: &[i32] = &[
    0, 9, 14, 27, 37, 77, 87, 125, 144, 157, 166, 197, 207, 229, 254, 280, 297, 328, 338, 364,
    372, 386, 402, 421, 434, 439, 445, 480, 496,
];

/// LNA gain request: hardware auto-gain or a manual tenth-dB value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gain {
    Auto,
    /// Tenths of a dB; must be one of [`TUNER_GAINS`].
    Manual(i32),
}

/// Frozen tuner configuration.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// IF sample rate in Hz; validated against [`SAMPLE_RATE_RANGES`].
    pub sample_rate: u32,
    /// Centre frequency in Hz.
    pub frequency: u32,
    pub gain: Gain,
    /// Preferred samples per block; snapped down to a multiple of 4096 in
    /// [4096, 1048576].
    pub block_length: usize,
    /// RTL2832 digital AGC request.
    pub agc: bool,
}

/// `true` when `rate` falls in a range the RTL2832 can actually deliver.
pub fn sample_rate_valid(rate: u32) -> bool {
    SAMPLE_RATE_RANGES
        .iter()
        .any(|&(lo, hi)| rate >= lo && rate <= hi)
}

/// Snap a preferred block length to the nearest lower multiple of 4096
/// within the device limits.
pub fn snap_block_length(preferred: usize) -> usize {
    let clamped = preferred.clamp(MIN_BLOCK_LENGTH, MAX_BLOCK_LENGTH);
    clamped - clamped % MIN_BLOCK_LENGTH
}

/// An opened RTL-SDR tuner, configured for streaming.
pub struct SdrSource {
    dev: RtlSdr,
    block_length: usize,
    gain: Gain,
}

impl SdrSource {
    /// Open the device at `device_index`.
    pub fn open(device_index: usize) -> Result<Self> {
        let dev = RtlSdr::open_with_index(device_index)
            .map_err(|e| Error::DeviceOpen(format!("device {device_index}: {e:?}")))?;
        Ok(Self {
            dev,
            block_length: DEFAULT_BLOCK_LENGTH,
            gain: Gain::Auto,
        })
    }

    /// Probe which device indices below `max` can be opened.
    ///
    /// The backend has no enumeration call, so listing briefly opens each
    /// index in turn. Call before [`SdrSource::open`].
    pub fn probe_devices(max: usize) -> Vec<usize> {
        (0..max)
            .filter(|&i| RtlSdr::open_with_index(i).is_ok())
            .collect()
    }

    /// Configure tuner and prepare for streaming.
    pub fn configure(&mut self, config: &SourceConfig) -> Result<()> {
        if !sample_rate_valid(config.sample_rate) {
            return Err(Error::config(format!(
                "sample rate {} Hz outside supported ranges",
                config.sample_rate
            )));
        }
        if let Gain::Manual(tenths) = config.gain {
            if !TUNER_GAINS.contains(&tenths) {
                return Err(Error::config(format!(
                    "LNA gain {:.1} dB not supported by tuner",
                    tenths as f64 * 0.1
                )));
            }
        }

        self.dev
            .set_sample_rate(config.sample_rate)
            .map_err(|e| Error::config(format!("set_sample_rate failed: {e:?}")))?;
        self.dev
            .set_center_freq(config.frequency)
            .map_err(|e| Error::config(format!("set_center_freq failed: {e:?}")))?;
        let gain = match config.gain {
            Gain::Auto => TunerGain::Auto,
            Gain::Manual(tenths) => TunerGain::Manual(tenths),
        };
        self.dev
            .set_tuner_gain(gain)
            .map_err(|e| Error::config(format!("set_tuner_gain failed: {e:?}")))?;
        if config.agc {
            // The RTL2832 digital AGC has no control path in this backend.
            warn!("RTL AGC requested but not supported by this backend; ignoring");
        }
        let _ = self.dev.set_bias_tee(false);

        self.block_length = snap_block_length(config.block_length);
        self.gain = config.gain;

        self.dev
            .reset_buffer()
            .map_err(|e| Error::config(format!("reset_buffer failed: {e:?}")))?;
        debug!(
            block_length = self.block_length,
            "tuner configured for streaming"
        );
        Ok(())
    }

    /// Current sample rate in Hz, as rounded by the device.
    pub fn sample_rate(&self) -> u32 {
        self.dev.get_sample_rate()
    }

    /// Current centre frequency in Hz, as rounded by the device.
    pub fn frequency(&self) -> u32 {
        self.dev.get_center_freq()
    }

    /// The configured LNA gain request.
    pub fn tuner_gain(&self) -> Gain {
        self.gain
    }

    /// Supported manual gains in tenths of a dB.
    pub fn supported_gains(&self) -> &'static [i32] {
        TUNER_GAINS
    }

    /// Samples per block after snapping.
    pub fn block_length(&self) -> usize {
        self.block_length
    }

    /// Fetch one block of samples synchronously into `out`.
    ///
    /// Must be called continuously to maintain streaming.
    pub fn read_block(&mut self, out: &mut Vec<IQSample>) -> Result<()> {
        let want = 2 * self.block_length;
        let mut bytes = vec![0u8; want];
        read_exact_from_device(&mut self.dev, &mut bytes)?;
        crate::bytes_to_iq(&bytes, out);
        Ok(())
    }

    /// Spawn the capture thread.
    ///
    /// The thread loops on the device read, converts each buffer in place
    /// into a claimed ring slot and publishes it. A full ring drops the
    /// block (counted by the writer) rather than stalling the tuner. The
    /// thread exits when `stop` is raised or the device fails; either way
    /// it marks the stream end so the consumer drains and returns.
    pub fn start_async(self, mut writer: BlockWriter, stop: Arc<AtomicBool>) -> AsyncCapture {
        let block_length = self.block_length;
        let thread_stop = Arc::clone(&stop);
        let handle = std::thread::spawn(move || {
            let mut dev = self.dev;
            let mut bytes = vec![0u8; 2 * block_length];
            let result = loop {
                if thread_stop.load(Ordering::Relaxed) {
                    break Ok(());
                }
                if let Err(e) = read_exact_from_device(&mut dev, &mut bytes) {
                    break Err(e);
                }
                if !writer.publish_with(|slot| bytes_to_iq_slot(&bytes, slot)) {
                    warn!(
                        dropped = writer.dropped(),
                        "capture ring full, dropping block"
                    );
                }
            };
            writer.finish();
            result
        });
        AsyncCapture { stop, handle }
    }
}

/// Handle to the background capture thread.
pub struct AsyncCapture {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<Result<()>>,
}

impl AsyncCapture {
    /// Request cancellation and join the capture thread. After this returns
    /// no further blocks are published.
    pub fn stop(self) -> Result<()> {
        self.stop.store(true, Ordering::Relaxed);
        self.handle
            .join()
            .map_err(|_| Error::internal("capture thread panicked"))?
    }
}

fn read_exact_from_device(dev: &mut RtlSdr, bytes: &mut [u8]) -> Result<()> {
    let mut filled = 0;
    while filled < bytes.len() {
        let n = dev
            .read_sync(&mut bytes[filled..])
            .map_err(|e| Error::DeviceRead(format!("{e:?}")))?;
        if n == 0 {
            return Err(Error::DeviceRead("short read, samples lost".into()));
        }
        filled += n;
    }
    Ok(())
}
