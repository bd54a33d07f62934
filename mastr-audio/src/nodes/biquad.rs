//! Shelving and peaking EQ bands
//!
//! RBJ Audio EQ Cookbook biquads. Coefficients are recomputed only when the
//! gain changes, which the graph does once per render quantum while a ramp
//! is running.

use std::f32::consts::PI;

use super::Node;

/// Biquad filter coefficients (normalized by a0)
#[derive(Clone, Copy, Debug, PartialEq)]
struct BiquadCoeffs {
    a0: f32,
    a1: f32,
    a2: f32,
    b1: f32,
    b2: f32,
}

impl BiquadCoeffs {
    const UNITY: Self = Self {
        a0: 1.0,
        a1: 0.0,
        a2: 0.0,
        b1: 0.0,
        b2: 0.0,
    };
}

/// Biquad filter state for a single channel
#[derive(Default, Clone)]
struct BiquadState {
    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
}

impl BiquadState {
    #[inline]
    fn process(&mut self, input: f32, c: &BiquadCoeffs) -> f32 {
        let output =
            c.a0 * input + c.a1 * self.x1 + c.a2 * self.x2 - c.b1 * self.y1 - c.b2 * self.y2;
        self.x2 = self.x1;
        self.x1 = input;
        self.y2 = self.y1;
        self.y1 = output;
        output
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Filter shape of an EQ band
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EqBandKind {
    LowShelf,
    Peaking,
    HighShelf,
}

/// One stereo EQ band with a variable gain
pub struct EqBand {
    kind: EqBandKind,
    sample_rate: f32,
    freq: f32,
    q: f32,
    gain_db: f32,
    coeffs: BiquadCoeffs,
    state_l: BiquadState,
    state_r: BiquadState,
}

impl EqBand {
    pub fn new(kind: EqBandKind, freq: f32, q: f32, sample_rate: f32) -> Self {
        Self {
            kind,
            sample_rate,
            freq,
            q,
            gain_db: 0.0,
            coeffs: BiquadCoeffs::UNITY,
            state_l: BiquadState::default(),
            state_r: BiquadState::default(),
        }
    }

    pub fn low_shelf(sample_rate: f32) -> Self {
        Self::new(EqBandKind::LowShelf, 250.0, 0.707, sample_rate)
    }

    pub fn mid_peak(sample_rate: f32) -> Self {
        Self::new(EqBandKind::Peaking, 1000.0, 1.0, sample_rate)
    }

    pub fn high_shelf(sample_rate: f32) -> Self {
        Self::new(EqBandKind::HighShelf, 4000.0, 0.707, sample_rate)
    }

    pub fn kind(&self) -> EqBandKind {
        self.kind
    }

    pub fn gain_db(&self) -> f32 {
        self.gain_db
    }

    /// Set the band gain, recomputing coefficients if it moved
    pub fn set_gain_db(&mut self, gain_db: f32) {
        if (gain_db - self.gain_db).abs() < 1e-4 {
            return;
        }
        self.gain_db = gain_db;
        self.coeffs = self.calc_coeffs();
    }

    fn calc_coeffs(&self) -> BiquadCoeffs {
        if self.gain_db.abs() < 0.01 {
            return BiquadCoeffs::UNITY;
        }

        let a = 10.0f32.powf(self.gain_db / 40.0);
        let omega = 2.0 * PI * self.freq / self.sample_rate;
        let sin_omega = omega.sin();
        let cos_omega = omega.cos();

        match self.kind {
            EqBandKind::LowShelf => {
                let alpha = sin_omega / (2.0 * self.q);
                let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;
                let a0 = (a + 1.0) + (a - 1.0) * cos_omega + two_sqrt_a_alpha;
                BiquadCoeffs {
                    a0: (a * ((a + 1.0) - (a - 1.0) * cos_omega + two_sqrt_a_alpha)) / a0,
                    a1: (2.0 * a * ((a - 1.0) - (a + 1.0) * cos_omega)) / a0,
                    a2: (a * ((a + 1.0) - (a - 1.0) * cos_omega - two_sqrt_a_alpha)) / a0,
                    b1: (-2.0 * ((a - 1.0) + (a + 1.0) * cos_omega)) / a0,
                    b2: ((a + 1.0) + (a - 1.0) * cos_omega - two_sqrt_a_alpha) / a0,
                }
            }
            EqBandKind::HighShelf => {
                let alpha = sin_omega / (2.0 * self.q);
                let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;
                let a0 = (a + 1.0) - (a - 1.0) * cos_omega + two_sqrt_a_alpha;
                BiquadCoeffs {
                    a0: (a * ((a + 1.0) + (a - 1.0) * cos_omega + two_sqrt_a_alpha)) / a0,
                    a1: (-2.0 * a * ((a - 1.0) + (a + 1.0) * cos_omega)) / a0,
                    a2: (a * ((a + 1.0) + (a - 1.0) * cos_omega - two_sqrt_a_alpha)) / a0,
                    b1: (2.0 * ((a - 1.0) - (a + 1.0) * cos_omega)) / a0,
                    b2: ((a + 1.0) - (a - 1.0) * cos_omega - two_sqrt_a_alpha) / a0,
                }
            }
            EqBandKind::Peaking => {
                let alpha = sin_omega / (2.0 * self.q);
                let a0 = 1.0 + alpha / a;
                BiquadCoeffs {
                    a0: (1.0 + alpha * a) / a0,
                    a1: (-2.0 * cos_omega) / a0,
                    a2: (1.0 - alpha * a) / a0,
                    b1: (-2.0 * cos_omega) / a0,
                    b2: (1.0 - alpha / a) / a0,
                }
            }
        }
    }
}

impl Node for EqBand {
    fn process(&mut self, samples: &mut [f32]) {
        if self.coeffs == BiquadCoeffs::UNITY {
            return;
        }
        for frame in samples.chunks_exact_mut(2) {
            frame[0] = self.state_l.process(frame[0], &self.coeffs);
            frame[1] = self.state_r.process(frame[1], &self.coeffs);
        }
    }

    fn reset(&mut self) {
        self.state_l.reset();
        self.state_r.reset();
    }

    fn name(&self) -> &'static str {
        match self.kind {
            EqBandKind::LowShelf => "EqLowShelf",
            EqBandKind::Peaking => "EqPeaking",
            EqBandKind::HighShelf => "EqHighShelf",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Steady-state gain of a band for a sine at `freq`
    fn measure_gain(band: &mut EqBand, freq: f32) -> f32 {
        let sr = 48000.0;
        let mut samples: Vec<f32> = (0..48000)
            .flat_map(|i| {
                let v = (2.0 * PI * freq * i as f32 / sr).sin() * 0.25;
                [v, v]
            })
            .collect();
        band.process(&mut samples);
        let tail = &samples[48000..];
        let peak = tail.iter().fold(0.0f32, |m, s| m.max(s.abs()));
        peak / 0.25
    }

    #[test]
    fn test_flat_band_is_passthrough() {
        let mut band = EqBand::mid_peak(48000.0);
        let mut samples = vec![0.5, 0.5, 0.3, 0.3];
        let original = samples.clone();
        band.process(&mut samples);
        assert_eq!(samples, original);
    }

    #[test]
    fn test_low_shelf_boosts_lows() {
        let mut band = EqBand::low_shelf(48000.0);
        band.set_gain_db(6.0);
        let low = measure_gain(&mut band, 40.0);
        band.reset();
        let high = measure_gain(&mut band, 10000.0);
        assert!((low - 2.0).abs() < 0.1, "low gain {}", low);
        assert!((high - 1.0).abs() < 0.05, "high gain {}", high);
    }

    #[test]
    fn test_high_shelf_cuts_highs() {
        let mut band = EqBand::high_shelf(48000.0);
        band.set_gain_db(-6.0);
        let high = measure_gain(&mut band, 15000.0);
        assert!((high - 0.5).abs() < 0.05, "high gain {}", high);
    }

    #[test]
    fn test_peaking_centre_gain() {
        let mut band = EqBand::mid_peak(48000.0);
        band.set_gain_db(3.0);
        let centre = measure_gain(&mut band, 1000.0);
        assert!((centre - 1.4125).abs() < 0.05, "centre gain {}", centre);
    }
}
