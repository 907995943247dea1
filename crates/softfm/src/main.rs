//! softfm: receive an FM broadcast station with an RTL-SDR and play or
//! record the audio.
//!
//! ```text
//! softfm -f 98.5M                    # play 98.5 MHz on the default device
//! softfm -f 98500k -M -W out.wav     # record mono to a WAVE file
//! softfm -f 98.5M -R - | aplay ...   # raw S16LE to stdout
//! softfm -f 98.5M -T pps.log        # log pilot-derived PPS timestamps
//! ```
//!
//! Three threads run in steady state: the capture thread inside the source
//! handle, this decode-and-output thread, and the host audio callback.

use std::fs::File;
use std::io::{self, Write};
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use clap::Parser;
use tracing::info;

use heterodyne::handoff::block_ring;
use heterodyne::rtlsdr::{sample_rate_valid, Gain, SdrSource, SourceConfig, DEFAULT_BLOCK_LENGTH};
use heterodyne::{Error, Result};
use softfm::fm::{self, DecoderConfig, FmDecoder};
use softfm::output::{AudioOutput, PlaybackOutput, RawOutput, WavOutput};
use softfm::pll::PpsEvent;

/// Capture blocks the hand-off ring can hold before dropping.
const RING_BLOCKS: usize = 16;

/// Device indices probed by `-d list`.
const PROBE_LIMIT: usize = 8;

#[derive(Parser, Debug)]
#[command(
    name = "softfm",
    version,
    about = "Software decoder for FM broadcast radio with RTL-SDR",
    long_about = None
)]
struct Args {
    /// Frequency of radio station in Hz (accepts k/M/G suffix)
    #[arg(short = 'f')]
    freq: String,

    /// RTL-SDR device index, 'list' to show device list
    #[arg(short = 'd', default_value = "0")]
    device: String,

    /// LNA gain in dB, 'auto', or 'list' to show supported gains
    #[arg(short = 'g', default_value = "auto")]
    gain: String,

    /// Enable RTL AGC mode
    #[arg(short = 'a')]
    agc: bool,

    /// IF sample rate in Hz (valid ranges: [225001, 300000], [900001, 3200000])
    #[arg(short = 's', default_value = "1200000")]
    ifrate: String,

    /// Audio sample rate in Hz
    #[arg(short = 'r', default_value = "48000")]
    pcmrate: String,

    /// Disable stereo decoding
    #[arg(short = 'M')]
    mono: bool,

    /// Write audio data as raw S16_LE samples, '-' for stdout
    #[arg(short = 'R')]
    raw: Option<String>,

    /// Write audio data to .WAV file
    #[arg(short = 'W')]
    wav: Option<String>,

    /// Play audio via the default playback device
    #[arg(short = 'P', num_args = 0..=1, default_missing_value = "default")]
    play: Option<String>,

    /// Write pulse-per-second timestamps, '-' for stdout
    #[arg(short = 'T')]
    pps: Option<String>,

    /// Output buffer size in seconds
    #[arg(short = 'b')]
    bufsecs: Option<f64>,
}

fn main() {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let _ = err.print();
            process::exit(1);
        }
    };

    let _ = tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_max_level(tracing::Level::INFO)
        .try_init();

    if let Err(err) = run(args) {
        eprintln!("ERROR: {err}");
        process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    eprintln!("SoftFM - software decoder for FM broadcast radio with RTL-SDR");

    let freq = parse_frequency(&args.freq)
        .filter(|f| *f > 0.0)
        .ok_or(Error::Argument("-f"))?;
    let ifrate = parse_frequency(&args.ifrate).ok_or(Error::Argument("-s"))?;
    if !sample_rate_valid(ifrate as u32) {
        return Err(Error::Argument("-s"));
    }
    let pcmrate = parse_rate(&args.pcmrate)
        .filter(|r| *r >= 1)
        .ok_or(Error::Argument("-r"))?;
    if matches!(args.bufsecs, Some(b) if b < 0.0) {
        return Err(Error::Argument("-b"));
    }
    let stereo = !args.mono;

    let devidx: usize = if args.device == "list" {
        let found = SdrSource::probe_devices(PROBE_LIMIT);
        eprintln!("Found {} devices:", found.len());
        for i in &found {
            eprintln!("{i:2}: RTL-SDR device #{i}");
        }
        process::exit(1);
    } else {
        args.device.parse().map_err(|_| Error::Argument("-d"))?
    };

    // Tune deliberately high so the tuner's DC spike falls outside the
    // wanted channel; the fine tuner shifts the station back down.
    let mut tuner_freq = freq + 0.25 * ifrate;

    let mut source = SdrSource::open(devidx)?;

    let gain = match args.gain.as_str() {
        "auto" => Gain::Auto,
        "list" => {
            eprintln!("Supported LNA gains:");
            for g in source.supported_gains() {
                eprint!(" {:.1} dB", *g as f64 * 0.1);
            }
            eprintln!();
            process::exit(1);
        }
        text => {
            let db: f64 = text.parse().map_err(|_| Error::Argument("-g"))?;
            let tenths = (db * 10.0).round() as i32;
            if !source.supported_gains().contains(&tenths) {
                eprint!("Supported LNA gains:");
                for g in source.supported_gains() {
                    eprint!(" {:.1}", *g as f64 * 0.1);
                }
                eprintln!(" dB");
                return Err(Error::config(format!(
                    "LNA gain {db:.1} dB not supported by tuner"
                )));
            }
            Gain::Manual(tenths)
        }
    };

    source.configure(&SourceConfig {
        sample_rate: ifrate as u32,
        frequency: tuner_freq as u32,
        gain,
        block_length: DEFAULT_BLOCK_LENGTH,
        agc: args.agc,
    })?;

    tuner_freq = source.frequency() as f64;
    info!("device tuned for {:.6} MHz", tuner_freq * 1e-6);
    match gain {
        Gain::Auto => info!("LNA gain: auto"),
        Gain::Manual(tenths) => info!("LNA gain: {:.1} dB", tenths as f64 * 0.1),
    }
    let ifrate = source.sample_rate() as f64;
    info!("IF sample rate: {ifrate:.0} Hz");
    info!(
        "RTL AGC mode: {}",
        if args.agc { "enabled" } else { "disabled" }
    );

    // The multiplex is empty above ~100 kHz, so the baseband can drop to
    // ~200 kS/s before demodulation.
    let downsample = ((ifrate / 215_000.0) as usize).max(1);
    info!("baseband downsampling factor {downsample}");

    // Prevent aliasing at very low output sample rates.
    let bandwidth_pcm = fm::DEFAULT_BANDWIDTH_PCM.min(0.45 * pcmrate as f64);
    info!("audio sample rate: {pcmrate} Hz");
    info!("audio bandwidth: {:.3} kHz", bandwidth_pcm * 1e-3);

    let mut pps_log = match &args.pps {
        Some(path) => Some(PpsLog::create(path)?),
        None => None,
    };

    let buffer_frames = match args.bufsecs {
        Some(b) if b > 0.0 => (b * pcmrate as f64) as usize,
        _ => pcmrate as usize,
    };
    let mut sink = if let Some(path) = &args.wav {
        info!("writing audio samples to '{path}'");
        AudioOutput::Wav(WavOutput::create(path, pcmrate, stereo)?)
    } else if let Some(path) = &args.raw {
        info!("writing raw 16-bit audio samples to '{path}'");
        AudioOutput::Raw(RawOutput::create(path)?)
    } else {
        if matches!(args.play.as_deref(), Some(dev) if dev != "default") {
            info!("named playback devices not supported; using the default");
        }
        info!("playing audio via the default playback device");
        AudioOutput::Playback(PlaybackOutput::create(
            pcmrate as usize,
            stereo,
            buffer_frames,
        )?)
    };

    let mut decoder = FmDecoder::new(&DecoderConfig {
        if_rate: ifrate,
        tuning_offset: freq - tuner_freq,
        pcm_rate: pcmrate as f64,
        stereo,
        deemphasis: fm::DEFAULT_DEEMPHASIS,
        bandwidth_if: fm::DEFAULT_BANDWIDTH_IF,
        freq_dev: fm::DEFAULT_FREQ_DEV,
        bandwidth_pcm,
        downsample,
    });

    // The one stop token: raised by Ctrl-C, polled by this thread between
    // blocks, and handed to the capture thread.
    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        let _ = ctrlc::set_handler(move || {
            eprintln!("\nstopping...");
            stop.store(true, Ordering::Relaxed);
        });
    }

    let block_length = source.block_length();
    let (writer, mut reader) = block_ring(RING_BLOCKS, block_length);
    let capture = source.start_async(writer, Arc::clone(&stop));

    let mut cpu = CpuMeter::new();
    let mut block_time = unix_time();
    let mut block: u64 = 0;
    let mut backlog_warned = false;

    loop {
        if stop.load(Ordering::Relaxed) {
            break;
        }
        if !backlog_warned && reader.backlog() + 1 >= RING_BLOCKS {
            eprintln!("\nWARNING: input buffer is growing (system too slow)");
            backlog_warned = true;
        }

        let audio = match reader.recv_with(|iq| decoder.process(iq)) {
            Some(audio) => audio,
            None => break,
        };
        let prev_time = block_time;
        block_time = unix_time();

        eprint!(
            "\rcpu={:5.1}  blk={:6}  freq={:8.4}MHz  IF={:+5.1}dB  BB={:+5.1}dB  audio={:+5.1}dB ",
            cpu.usage_percent(),
            block,
            (tuner_freq + decoder.tuning_offset()) * 1e-6,
            20.0 * decoder.if_level().log10(),
            20.0 * decoder.baseband_level().log10() + 3.01,
            20.0 * decoder.audio_level().log10() + 3.01,
        );
        if let Some(buffered) = sink.buffered_seconds() {
            eprint!(" buf={buffered:.1}s ");
        }
        if decoder.stereo_detected() {
            eprint!("stereo (level: {:.4})", decoder.pilot_level());
        } else {
            eprint!("                      ");
        }
        let _ = io::stderr().flush();

        if let Some(log) = &mut pps_log {
            log.append(decoder.pps_events(), prev_time, block_time)?;
        }

        // The first block is IF-filter warm-up noise.
        if block > 0 {
            sink.write(&audio)?;
        }
        block += 1;
    }
    eprintln!();

    stop.store(true, Ordering::Relaxed);
    let capture_result = capture.stop();

    let tail = decoder.finish();
    if !tail.is_empty() {
        sink.write(&tail)?;
    }
    sink.finish()?;

    if reader.dropped() > 0 {
        eprintln!("WARNING: {} capture blocks dropped", reader.dropped());
    }
    if sink.buffered_seconds().is_some() {
        info!("playback underruns: {}", sink.underruns());
    }
    capture_result
}

/// Parse a frequency with an optional `k`/`M`/`G` suffix.
fn parse_frequency(s: &str) -> Option<f64> {
    let s = s.trim();
    let (digits, mult) = if let Some(stripped) = s.strip_suffix('G') {
        (stripped, 1e9)
    } else if let Some(stripped) = s.strip_suffix('M') {
        (stripped, 1e6)
    } else if let Some(stripped) = s.strip_suffix('k') {
        (stripped, 1e3)
    } else {
        (s, 1.0)
    };
    digits.trim().parse::<f64>().ok().map(|v| v * mult)
}

/// Parse an integer rate with an optional `k` suffix.
fn parse_rate(s: &str) -> Option<u32> {
    if let Some(stripped) = s.strip_suffix('k') {
        stripped.trim().parse::<u32>().ok()?.checked_mul(1000)
    } else {
        s.trim().parse().ok()
    }
}

fn unix_time() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Pulse-per-second log: one line per marker, wall-clock interpolated
/// between block boundaries.
struct PpsLog {
    out: Box<dyn Write>,
}

impl PpsLog {
    fn create(path: &str) -> Result<Self> {
        let mut out: Box<dyn Write> = if path == "-" {
            info!("writing pulse-per-second markers to stdout");
            Box::new(io::stdout())
        } else {
            info!("writing pulse-per-second markers to '{path}'");
            Box::new(File::create(path).map_err(|e| Error::SinkOpen {
                path: path.to_string(),
                reason: e.to_string(),
            })?)
        };
        writeln!(out, "#pps_index sample_index   unix_time")?;
        out.flush()?;
        Ok(Self { out })
    }

    fn append(&mut self, events: &[PpsEvent], block_start: f64, block_end: f64) -> Result<()> {
        for ev in events {
            let ts = block_start + ev.block_position * (block_end - block_start);
            writeln!(
                self.out,
                "{:>8} {:>14} {:>18.6}",
                ev.pps_index, ev.sample_index, ts
            )?;
        }
        self.out.flush()?;
        Ok(())
    }
}

/// Process CPU usage between consecutive status lines.
struct CpuMeter {
    last_cpu: f64,
    last_wall: Instant,
}

impl CpuMeter {
    fn new() -> Self {
        Self {
            last_cpu: process_cpu_seconds(),
            last_wall: Instant::now(),
        }
    }

    fn usage_percent(&mut self) -> f64 {
        let cpu = process_cpu_seconds();
        let now = Instant::now();
        let wall = now.duration_since(self.last_wall).as_secs_f64();
        let used = if wall > 0.0 {
            (cpu - self.last_cpu) / wall * 100.0
        } else {
            0.0
        };
        self.last_cpu = cpu;
        self.last_wall = now;
        used
    }
}

fn process_cpu_seconds() -> f64 {
    // Safety: getrusage only writes the struct passed to it.
    unsafe {
        let mut usage: libc::rusage = std::mem::zeroed();
        libc::getrusage(libc::RUSAGE_SELF, &mut usage);
        timeval_seconds(usage.ru_utime) + timeval_seconds(usage.ru_stime)
    }
}

fn timeval_seconds(tv: libc::timeval) -> f64 {
    tv.tv_sec as f64 + tv.tv_usec as f64 * 1e-6
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_frequency_suffixes() {
        assert_eq!(parse_frequency("98500000"), Some(98_500_000.0));
        assert_eq!(parse_frequency("98500k"), Some(98_500_000.0));
        assert_eq!(parse_frequency("98.5M"), Some(98_500_000.0));
        assert_eq!(parse_frequency("0.0985G"), Some(98_500_000.0));
        assert_eq!(parse_frequency("junk"), None);
        assert_eq!(parse_frequency(""), None);
    }

    #[test]
    fn test_parse_rate() {
        assert_eq!(parse_rate("48000"), Some(48_000));
        assert_eq!(parse_rate("48k"), Some(48_000));
        assert_eq!(parse_rate("-1"), None);
        assert_eq!(parse_rate("48.5"), None);
    }

    #[test]
    fn test_ifrate_validation_rejects_gap() {
        // The RTL2832 cannot deliver 500 kS/s; the flag must be refused.
        assert!(!sample_rate_valid(500_000));
        assert!(sample_rate_valid(1_200_000));
    }
}
