//! Pilot PLL acquisition under noise and PPS timing laws.

mod helpers;

use std::f64::consts::PI;

use softfm::pll::PilotPhaseLock;

const RATE: f64 = 240_000.0;

fn noisy_pilot(amplitude: f64, noise_amplitude: f64, n: usize) -> Vec<f32> {
    let mut noise = helpers::Noise::new(0x5eed);
    (0..n)
        .map(|i| {
            let pilot = amplitude * (2.0 * PI * 19_000.0 * i as f64 / RATE).cos();
            (pilot + noise_amplitude * noise.next()) as f32
        })
        .collect()
}

#[test]
fn test_lock_acquired_through_noise() {
    // 19 kHz pilot at 0.1 amplitude buried in white noise at 0.05: the
    // loop must still acquire and hold.
    let mut pll = PilotPhaseLock::new(RATE);
    pll.process(&noisy_pilot(0.1, 0.05, (0.15 * RATE) as usize));
    assert!(pll.locked());
}

#[test]
fn test_pilot_level_accurate_under_noise() {
    let mut pll = PilotPhaseLock::new(RATE);
    pll.process(&noisy_pilot(0.1, 0.05, (0.4 * RATE) as usize));

    let expected = 0.1 / 2.0f64.sqrt();
    let db = 20.0 * (pll.pilot_level() / expected).log10();
    assert!(db.abs() < 0.5, "pilot level off by {db:.2} dB");
}

#[test]
fn test_noise_alone_never_locks() {
    let mut pll = PilotPhaseLock::new(RATE);
    pll.process(&noisy_pilot(0.0, 0.05, (0.5 * RATE) as usize));
    assert!(!pll.locked());
}

#[test]
fn test_pps_markers_survive_block_chopping() {
    // Markers must not depend on how the stream is blocked: feed the same
    // pilot in ragged blocks and compare against one big block.
    let rate = 228_000.0; // exact multiple of 19 kHz
    let signal: Vec<f32> = (0..(2.5 * rate) as usize)
        .map(|i| (0.1 * (2.0 * PI * 19_000.0 * i as f64 / rate).cos()) as f32)
        .collect();

    let mut whole = PilotPhaseLock::new(rate);
    let mut expected = Vec::new();
    whole.process(&signal);
    expected.extend_from_slice(whole.pps_events());
    // A single block: all markers in one batch.
    assert_eq!(expected.len(), 2);

    let sizes = [4096usize, 65_536, 10_000, 123_456];
    let mut chopped = PilotPhaseLock::new(rate);
    let mut got = Vec::new();
    let mut pos = 0usize;
    let mut turn = 0usize;
    while pos < signal.len() {
        let end = (pos + sizes[turn % sizes.len()]).min(signal.len());
        chopped.process(&signal[pos..end]);
        got.extend_from_slice(chopped.pps_events());
        pos = end;
        turn += 1;
    }

    assert_eq!(expected.len(), got.len());
    for (a, b) in expected.iter().zip(got.iter()) {
        assert_eq!(a.pps_index, b.pps_index);
        assert_eq!(a.sample_index, b.sample_index);
    }
}
