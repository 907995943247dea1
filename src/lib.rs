#![doc = include_str!("../readme.md")]

use num_complex::Complex;

pub mod dsp;
pub mod error;
pub mod handoff;
#[cfg(feature = "rtlsdr")]
pub mod rtlsdr;

pub use error::{Error, Result};

/// One complex baseband sample: in-phase and quadrature, each in [-1, 1].
pub type IQSample = Complex<f32>;

/// Convert interleaved unsigned 8-bit I/Q bytes into complex samples,
/// writing into `out` (cleared first).
///
/// The tuner delivers each component as an unsigned byte centred on 128;
/// ingest maps it to `(b - 128) / 128`, landing in [-1, 127/128]. No other
/// scaling is applied at this stage.
///
/// # Example
///
/// ```
/// let mut samples = Vec::new();
/// heterodyne::bytes_to_iq(&[128, 128, 255, 0], &mut samples);
/// assert_eq!(samples[0], num_complex::Complex::new(0.0, 0.0));
/// ```
pub fn bytes_to_iq(buffer: &[u8], out: &mut Vec<IQSample>) {
    out.clear();
    out.extend(buffer.chunks_exact(2).map(|c| {
        Complex::new(
            (c[0] as f32 - 128.0) / 128.0,
            (c[1] as f32 - 128.0) / 128.0,
        )
    }));
}

/// In-place variant of [`bytes_to_iq`] for a pre-sized block slot: converts
/// exactly `slot.len()` samples from `buffer`, which must hold
/// `2 * slot.len()` bytes.
pub fn bytes_to_iq_slot(buffer: &[u8], slot: &mut [IQSample]) {
    assert_eq!(buffer.len(), 2 * slot.len());
    for (s, c) in slot.iter_mut().zip(buffer.chunks_exact(2)) {
        *s = Complex::new(
            (c[0] as f32 - 128.0) / 128.0,
            (c[1] as f32 - 128.0) / 128.0,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_to_iq_mapping() {
        let mut out = Vec::new();
        bytes_to_iq(&[0, 64, 128, 192, 255, 255], &mut out);
        assert_eq!(out.len(), 3);
        assert_eq!(out[0], Complex::new(-1.0, -0.5));
        assert_eq!(out[1], Complex::new(0.0, 0.5));
        assert_eq!(out[2], Complex::new(127.0 / 128.0, 127.0 / 128.0));
    }

    #[test]
    fn test_bytes_to_iq_odd_tail_ignored() {
        let mut out = Vec::new();
        bytes_to_iq(&[128, 128, 7], &mut out);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_bytes_to_iq_slot_in_place() {
        let mut slot = vec![Complex::new(9.0, 9.0); 2];
        bytes_to_iq_slot(&[128, 128, 0, 255], &mut slot);
        assert_eq!(slot[0], Complex::new(0.0, 0.0));
        assert_eq!(slot[1], Complex::new(-1.0, 127.0 / 128.0));
    }
}
