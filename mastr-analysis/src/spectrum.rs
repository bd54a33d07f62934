//! FFT-based three-band energy split for the live meter

use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::f32::consts::PI;
use std::sync::Arc;

use crate::reading::FrequencyBands;

/// FFT length used for the band split
pub const FFT_SIZE: usize = 2048;

/// Fraction of bins assigned to the low band
const LOW_SHARE: f64 = 0.3;
/// Fraction of bins assigned to the mid band (the high band takes the rest)
const MID_SHARE: f64 = 0.4;

/// Splits a mono buffer's magnitude spectrum into bass / mid / high
/// energy percentages
pub struct BandSplitter {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    /// Pre-allocated FFT buffer to avoid allocation per tick
    fft_buffer: Vec<Complex<f32>>,
}

impl Default for BandSplitter {
    fn default() -> Self {
        Self::new()
    }
}

impl BandSplitter {
    pub fn new() -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(FFT_SIZE);

        // Hann window
        let window: Vec<f32> = (0..FFT_SIZE)
            .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / FFT_SIZE as f32).cos()))
            .collect();

        Self {
            fft,
            window,
            fft_buffer: vec![Complex::new(0.0, 0.0); FFT_SIZE],
        }
    }

    /// Energy share per band, each rounded to 0.1 %
    ///
    /// Uses the most recent `FFT_SIZE` samples; shorter input is zero padded.
    pub fn split(&mut self, samples: &[f32]) -> FrequencyBands {
        let start = samples.len().saturating_sub(FFT_SIZE);
        let recent = &samples[start..];

        for (i, slot) in self.fft_buffer.iter_mut().enumerate() {
            let sample = recent.get(i).copied().unwrap_or(0.0);
            *slot = Complex::new(sample * self.window[i], 0.0);
        }

        self.fft.process(&mut self.fft_buffer);

        let bins = FFT_SIZE / 2;
        let low_end = (bins as f64 * LOW_SHARE) as usize;
        let mid_end = (bins as f64 * (LOW_SHARE + MID_SHARE)) as usize;

        let energy = |range: std::ops::Range<usize>| -> f64 {
            self.fft_buffer[range]
                .iter()
                .map(|c| c.norm_sqr() as f64)
                .sum()
        };
        let bass = energy(0..low_end);
        let mid = energy(low_end..mid_end);
        let high = energy(mid_end..bins);
        let total = bass + mid + high;

        if total <= f64::EPSILON {
            return FrequencyBands::default();
        }

        let percent = |e: f64| (e / total * 1000.0).round() / 10.0;
        FrequencyBands {
            bass: percent(bass),
            mid: percent(mid),
            high: percent(high),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, frames: usize) -> Vec<f32> {
        (0..frames)
            .map(|i| (2.0 * PI * freq * i as f32 / 48000.0).sin() * 0.5)
            .collect()
    }

    #[test]
    fn test_silence_has_no_bands() {
        let mut splitter = BandSplitter::new();
        let bands = splitter.split(&vec![0.0; FFT_SIZE]);
        assert_eq!(bands, FrequencyBands::default());
    }

    #[test]
    fn test_tone_lands_in_its_band() {
        let mut splitter = BandSplitter::new();

        // Bins are linear: at 48kHz the low band covers 0-7.2kHz,
        // mid 7.2-16.8kHz, high above that
        let low = splitter.split(&sine(1000.0, FFT_SIZE));
        assert!(low.bass > 95.0, "{:?}", low);

        let mid = splitter.split(&sine(12000.0, FFT_SIZE));
        assert!(mid.mid > 95.0, "{:?}", mid);

        let high = splitter.split(&sine(20000.0, FFT_SIZE));
        assert!(high.high > 95.0, "{:?}", high);
    }

    #[test]
    fn test_short_input_zero_padded() {
        let mut splitter = BandSplitter::new();
        let bands = splitter.split(&sine(1000.0, 256));
        assert!(bands.total() <= 100.1);
        assert!(bands.bass > 50.0);
    }
}
