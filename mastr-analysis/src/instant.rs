//! Instantaneous meters for live playback
//!
//! Computed once per metering tick from the most recent post-chain samples.
//! The smoothed loudness produced here is a rolling energy average of short
//! windows, not a BS.1770 gated measurement; use [`crate::integrated_lufs`]
//! over the whole buffer when a standards-compliant value is needed.

use std::collections::VecDeque;

use crate::reading::{clamp_db, MeterReading, DB_FLOOR};
use crate::spectrum::BandSplitter;

/// Default number of ticks averaged for the smoothed loudness
pub const DEFAULT_WINDOW_TICKS: usize = 100;

/// Guard added before taking logarithms
const EPSILON: f64 = 1e-12;

/// RMS level in dBFS (unclamped)
pub fn rms_db(samples: &[f32]) -> f64 {
    if samples.is_empty() {
        return 20.0 * EPSILON.log10();
    }
    let sum_sq: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    let rms = (sum_sq / samples.len() as f64).sqrt();
    20.0 * (rms + EPSILON).log10()
}

/// Sample peak in dBFS (unclamped)
pub fn peak_db(samples: &[f32]) -> f64 {
    let peak = samples.iter().fold(0.0f32, |acc, &s| acc.max(s.abs())) as f64;
    20.0 * (peak + EPSILON).log10()
}

/// Phase correlation of two channels in `[-1, 1]`
///
/// +1 for identical channels, -1 for inverted, 0 when either side is silent.
pub fn stereo_correlation(left: &[f32], right: &[f32]) -> f64 {
    let mut lr = 0.0f64;
    let mut ll = 0.0f64;
    let mut rr = 0.0f64;
    for (&l, &r) in left.iter().zip(right) {
        let (l, r) = (l as f64, r as f64);
        lr += l * r;
        ll += l * l;
        rr += r * r;
    }
    let denom = (ll * rr).sqrt();
    if denom <= EPSILON {
        0.0
    } else {
        (lr / denom).clamp(-1.0, 1.0)
    }
}

#[inline]
fn mean_square(samples: &[f32]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().map(|&s| (s as f64) * (s as f64)).sum::<f64>() / samples.len() as f64
}

/// Stateful live meter: per-tick values plus a rolling loudness window
pub struct LiveMeter {
    window: VecDeque<f64>,
    window_ticks: usize,
    splitter: BandSplitter,
    mono: Vec<f32>,
    interleaved: Vec<f32>,
}

impl Default for LiveMeter {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_TICKS)
    }
}

impl LiveMeter {
    /// Create a meter averaging the last `window_ticks` ticks
    pub fn new(window_ticks: usize) -> Self {
        let window_ticks = window_ticks.max(1);
        Self {
            window: VecDeque::with_capacity(window_ticks),
            window_ticks,
            splitter: BandSplitter::new(),
            mono: Vec::new(),
            interleaved: Vec::new(),
        }
    }

    /// Number of ticks currently in the rolling window
    pub fn ticks_in_window(&self) -> usize {
        self.window.len()
    }

    /// Compute a reading from one tick of stereo samples
    pub fn measure(&mut self, left: &[f32], right: &[f32]) -> MeterReading {
        let frames = left.len().min(right.len());
        let (left, right) = (&left[..frames], &right[..frames]);

        self.interleaved.clear();
        self.interleaved
            .extend(left.iter().zip(right).flat_map(|(&l, &r)| [l, r]));
        self.mono.clear();
        self.mono
            .extend(left.iter().zip(right).map(|(&l, &r)| (l + r) * 0.5));

        // Channel-summed energy, same convention as the gated measurement
        let tick_energy = mean_square(left) + mean_square(right);
        if self.window.len() == self.window_ticks {
            self.window.pop_front();
        }
        self.window.push_back(tick_energy);

        MeterReading {
            rms_db: rms_db(&self.interleaved),
            peak_db: peak_db(&self.interleaved),
            integrated_lufs: self.smoothed_loudness(),
            stereo_correlation: stereo_correlation(left, right),
            frequency_bands: self.splitter.split(&self.mono),
        }
        .clamped()
    }

    /// Energy average of the window, ignoring ticks below the floor
    fn smoothed_loudness(&self) -> f64 {
        let floor_energy = 10f64.powf(DB_FLOOR / 10.0);
        let (sum, count) = self
            .window
            .iter()
            .filter(|&&e| e > floor_energy)
            .fold((0.0, 0usize), |(s, n), &e| (s + e, n + 1));
        if count == 0 {
            DB_FLOOR
        } else {
            clamp_db(10.0 * (sum / count as f64).log10())
        }
    }

    /// Forget the rolling window
    pub fn reset(&mut self) {
        self.window.clear();
    }
}
