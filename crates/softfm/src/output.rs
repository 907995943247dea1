//! Audio sinks: raw S16LE, RIFF/WAVE, and realtime playback.
//!
//! Every sink takes blocks of float frames in [-1, 1], converts them to
//! little-endian signed 16-bit, and reports failures as `Result` rather
//! than sticky error state. The playback sink feeds a bounded ring drained by
//! the host audio callback; when the decoder outruns the device it blocks
//! briefly, and when the device outruns the decoder it plays silence and
//! counts the underrun.

use std::fs::File;
use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::{bounded, Sender};
use tinyaudio::prelude::*;
use tracing::debug;

use heterodyne::{Error, Result};

/// Sample count written into a fresh WAVE header, replaced on finish.
const WAV_DUMMY_SAMPLE_COUNT: u32 = 0x7fff_0000;

/// Encode float samples as S16LE into `bytes` (cleared first): clamp to
/// [-1, 1], scale by 32767, round to nearest.
pub fn samples_to_s16le(samples: &[f32], bytes: &mut Vec<u8>) {
    bytes.clear();
    bytes.reserve(samples.len() * 2);
    for &s in samples {
        let v = (s.clamp(-1.0, 1.0) * 32767.0).round() as i16;
        bytes.extend_from_slice(&v.to_le_bytes());
    }
}

/// The sink selected on the command line.
pub enum AudioOutput {
    Raw(RawOutput),
    Wav(WavOutput),
    Playback(PlaybackOutput),
}

impl AudioOutput {
    /// Write one block of frames.
    pub fn write(&mut self, samples: &[f32]) -> Result<()> {
        match self {
            AudioOutput::Raw(out) => out.write(samples),
            AudioOutput::Wav(out) => out.write(samples),
            AudioOutput::Playback(out) => out.write(samples),
        }
    }

    /// Flush buffers and finalize the stream.
    pub fn finish(&mut self) -> Result<()> {
        match self {
            AudioOutput::Raw(out) => out.finish(),
            AudioOutput::Wav(out) => out.finish(),
            AudioOutput::Playback(out) => out.finish(),
        }
    }

    /// Playback underruns so far; zero for file sinks.
    pub fn underruns(&self) -> u64 {
        match self {
            AudioOutput::Playback(out) => out.underruns(),
            _ => 0,
        }
    }

    /// Seconds of audio waiting in the playback ring, if any.
    pub fn buffered_seconds(&self) -> Option<f64> {
        match self {
            AudioOutput::Playback(out) => Some(out.buffered_seconds()),
            _ => None,
        }
    }
}

enum RawTarget {
    Stdout(io::Stdout),
    File(File),
}

/// Raw S16LE writer; `-` writes to standard output.
pub struct RawOutput {
    target: RawTarget,
    bytes: Vec<u8>,
}

impl RawOutput {
    pub fn create(path: &str) -> Result<Self> {
        let target = if path == "-" {
            RawTarget::Stdout(io::stdout())
        } else {
            let file = File::create(path).map_err(|e| Error::SinkOpen {
                path: path.to_string(),
                reason: e.to_string(),
            })?;
            RawTarget::File(file)
        };
        Ok(Self {
            target,
            bytes: Vec::new(),
        })
    }

    fn write(&mut self, samples: &[f32]) -> Result<()> {
        samples_to_s16le(samples, &mut self.bytes);
        // write_all restarts interrupted writes and advances on short ones.
        let res = match &mut self.target {
            RawTarget::Stdout(out) => out.lock().write_all(&self.bytes),
            RawTarget::File(file) => file.write_all(&self.bytes),
        };
        res.map_err(|e| Error::SinkWrite(e.to_string()))
    }

    fn finish(&mut self) -> Result<()> {
        match &mut self.target {
            RawTarget::Stdout(out) => out.lock().flush(),
            RawTarget::File(file) => file.flush(),
        }
        .map_err(|e| Error::SinkWrite(e.to_string()))
    }
}

/// RIFF/WAVE writer. The header goes out immediately with a dummy sample
/// count; both size fields are rewritten with the exact count on finish.
pub struct WavOutput {
    stream: BufWriter<File>,
    channels: u16,
    sample_rate: u32,
    /// Total 16-bit samples written (all channels).
    samples_written: u64,
    finished: bool,
    bytes: Vec<u8>,
}

impl WavOutput {
    pub fn create(path: &str, sample_rate: u32, stereo: bool) -> Result<Self> {
        let file = File::create(path).map_err(|e| Error::SinkOpen {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
        let mut out = Self {
            stream: BufWriter::new(file),
            channels: if stereo { 2 } else { 1 },
            sample_rate,
            samples_written: 0,
            finished: false,
            bytes: Vec::new(),
        };
        let header = wav_header(out.channels, out.sample_rate, WAV_DUMMY_SAMPLE_COUNT);
        out.stream
            .write_all(&header)
            .map_err(|e| Error::SinkWrite(e.to_string()))?;
        Ok(out)
    }

    fn write(&mut self, samples: &[f32]) -> Result<()> {
        samples_to_s16le(samples, &mut self.bytes);
        self.stream
            .write_all(&self.bytes)
            .map_err(|e| Error::SinkWrite(e.to_string()))?;
        self.samples_written += samples.len() as u64;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        self.stream
            .flush()
            .map_err(|e| Error::SinkWrite(e.to_string()))?;

        // Go back and fill in the real sample count. An unseekable target
        // keeps the dummy header.
        let file = self.stream.get_mut();
        if file.seek(SeekFrom::Start(0)).is_ok() {
            let header = wav_header(self.channels, self.sample_rate, self.samples_written as u32);
            file.write_all(&header)
                .map_err(|e| Error::SinkWrite(e.to_string()))?;
            file.flush().map_err(|e| Error::SinkWrite(e.to_string()))?;
        }
        Ok(())
    }
}

impl Drop for WavOutput {
    fn drop(&mut self) {
        let _ = self.finish();
    }
}

/// Compose the canonical 44-byte header: PCM format tag, 16 bits/sample,
/// all multi-byte fields little-endian.
fn wav_header(channels: u16, sample_rate: u32, nsamples: u32) -> [u8; 44] {
    const BYTES_PER_SAMPLE: u32 = 2;
    let data_size = nsamples * BYTES_PER_SAMPLE;
    let byte_rate = sample_rate * channels as u32 * BYTES_PER_SAMPLE;
    let block_align = channels * BYTES_PER_SAMPLE as u16;

    let mut header = [0u8; 44];
    header[0..4].copy_from_slice(b"RIFF");
    header[4..8].copy_from_slice(&(36 + data_size).to_le_bytes());
    header[8..12].copy_from_slice(b"WAVE");
    header[12..16].copy_from_slice(b"fmt ");
    header[16..20].copy_from_slice(&16u32.to_le_bytes());
    header[20..22].copy_from_slice(&0x0001u16.to_le_bytes());
    header[22..24].copy_from_slice(&channels.to_le_bytes());
    header[24..28].copy_from_slice(&sample_rate.to_le_bytes());
    header[28..32].copy_from_slice(&byte_rate.to_le_bytes());
    header[32..34].copy_from_slice(&block_align.to_le_bytes());
    header[34..36].copy_from_slice(&16u16.to_le_bytes());
    header[36..40].copy_from_slice(b"data");
    header[40..44].copy_from_slice(&data_size.to_le_bytes());
    header
}

/// Realtime playback through the default host audio device.
pub struct PlaybackOutput {
    tx: Sender<i16>,
    underruns: Arc<AtomicU64>,
    sample_rate: usize,
    channels: usize,
    // Host device handle; playback stops when this drops.
    _device: Box<dyn std::any::Any>,
}

impl PlaybackOutput {
    /// `buffer_frames` sizes the ring between decoder and device, in
    /// frames per channel.
    pub fn create(sample_rate: usize, stereo: bool, buffer_frames: usize) -> Result<Self> {
        let channels = if stereo { 2 } else { 1 };
        let capacity = (buffer_frames * channels).max(sample_rate * channels / 4);
        let (tx, rx) = bounded::<i16>(capacity);
        let underruns = Arc::new(AtomicU64::new(0));
        let starved = Arc::clone(&underruns);

        let device = run_output_device(
            OutputDeviceParameters {
                channels_count: channels,
                sample_rate,
                channel_sample_count: 1024,
            },
            move |data| {
                let mut empty = false;
                for sample in data.iter_mut() {
                    match rx.try_recv() {
                        Ok(v) => *sample = v as f32 / 32767.0,
                        Err(_) => {
                            *sample = 0.0;
                            empty = true;
                        }
                    }
                }
                if empty {
                    starved.fetch_add(1, Ordering::Relaxed);
                }
            },
        )
        .map_err(|e| Error::SinkOpen {
            path: "audio device".to_string(),
            reason: e.to_string(),
        })?;
        debug!(sample_rate, channels, capacity, "playback device running");

        Ok(Self {
            tx,
            underruns,
            sample_rate,
            channels,
            _device: Box::new(device),
        })
    }

    fn write(&mut self, samples: &[f32]) -> Result<()> {
        for &s in samples {
            let v = (s.clamp(-1.0, 1.0) * 32767.0).round() as i16;
            self.tx
                .send(v)
                .map_err(|_| Error::SinkWrite("playback device closed".to_string()))?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        // Let the device drain what is already queued, bounded in time.
        let deadline = Instant::now() + Duration::from_secs(2);
        while !self.tx.is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        Ok(())
    }

    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }

    pub fn buffered_seconds(&self) -> f64 {
        self.tx.len() as f64 / (self.sample_rate * self.channels) as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_s16le_round_trip_within_lsb() {
        let samples: Vec<f32> = (0..2001).map(|i| (i as f32 - 1000.0) / 1000.0).collect();
        let mut bytes = Vec::new();
        samples_to_s16le(&samples, &mut bytes);
        assert_eq!(bytes.len(), samples.len() * 2);
        for (s, pair) in samples.iter().zip(bytes.chunks_exact(2)) {
            let v = i16::from_le_bytes([pair[0], pair[1]]);
            let back = v as f32 / 32767.0;
            assert!((back - s).abs() <= 1.0 / 32767.0, "{s} -> {v} -> {back}");
        }
    }

    #[test]
    fn test_s16le_clamps_out_of_range() {
        let mut bytes = Vec::new();
        samples_to_s16le(&[2.0, -3.5, 1.0, -1.0, f32::INFINITY, f32::NEG_INFINITY], &mut bytes);
        for pair in bytes.chunks_exact(2) {
            let v = i16::from_le_bytes([pair[0], pair[1]]);
            assert!((-32767..=32767).contains(&v));
        }
        assert_eq!(i16::from_le_bytes([bytes[0], bytes[1]]), 32767);
        assert_eq!(i16::from_le_bytes([bytes[2], bytes[3]]), -32767);
    }

    #[test]
    fn test_s16le_rounds_to_nearest() {
        let mut bytes = Vec::new();
        samples_to_s16le(&[0.5], &mut bytes);
        let v = i16::from_le_bytes([bytes[0], bytes[1]]);
        // 0.5 * 32767 = 16383.5 rounds away from zero.
        assert_eq!(v, 16384);
    }

    #[test]
    fn test_wav_header_layout() {
        let header = wav_header(2, 48_000, 1000);
        assert_eq!(&header[0..4], b"RIFF");
        assert_eq!(u32::from_le_bytes(header[4..8].try_into().unwrap()), 36 + 2000);
        assert_eq!(&header[8..12], b"WAVE");
        assert_eq!(u16::from_le_bytes(header[20..22].try_into().unwrap()), 1);
        assert_eq!(u16::from_le_bytes(header[22..24].try_into().unwrap()), 2);
        assert_eq!(u32::from_le_bytes(header[24..28].try_into().unwrap()), 48_000);
        assert_eq!(u32::from_le_bytes(header[28..32].try_into().unwrap()), 192_000);
        assert_eq!(u16::from_le_bytes(header[32..34].try_into().unwrap()), 4);
        assert_eq!(u16::from_le_bytes(header[34..36].try_into().unwrap()), 16);
        assert_eq!(&header[36..40], b"data");
        assert_eq!(u32::from_le_bytes(header[40..44].try_into().unwrap()), 2000);
    }
}
