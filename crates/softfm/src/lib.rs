//! Software decoder for FM broadcast radio with RTL-SDR.
//!
//! Builds the full wide-band FM receive chain on top of the `heterodyne`
//! capture and DSP primitives:
//! - [`fm`]: phase discriminator, de-emphasis, and the [`fm::FmDecoder`]
//!   orchestrator that turns I/Q blocks into audio frames.
//! - [`pll`]: the 19 kHz pilot phase lock, coherent 38 kHz reference and
//!   pulse-per-second markers.
//! - [`stereo`]: stereo demultiplexing with click-free lock gating.
//! - [`output`]: raw S16LE, RIFF/WAVE and realtime playback sinks.
//!
//! The `softfm` binary wires these to the tuner: one capture thread, one
//! decode-and-output thread, and the host audio callback.

pub mod fm;
pub mod output;
pub mod pll;
pub mod stereo;

pub use fm::{DecoderConfig, FmDecoder};
pub use output::AudioOutput;
pub use pll::PpsEvent;
