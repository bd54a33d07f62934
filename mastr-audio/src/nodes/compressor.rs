//! Dynamics compressor
//!
//! Feed-forward, linked-stereo peak compressor with a quadratic soft knee.
//! The same node serves as the limiter stage when configured with a high
//! ratio, hard knee and fast attack.

use super::{db_to_linear, linear_to_db, Node};

/// Stereo dynamics compressor
pub struct DynamicsCompressor {
    sample_rate: f32,

    // Parameters
    threshold: f32, // dB
    ratio: f32,
    knee: f32,    // dB
    attack: f32,  // seconds
    release: f32, // seconds

    // Computed coefficients
    attack_coeff: f32,
    release_coeff: f32,

    // Smoothed gain reduction in dB (<= 0)
    envelope_db: f32,

    name: &'static str,
}

impl DynamicsCompressor {
    /// Compressor with a 6 dB soft knee
    pub fn new(sample_rate: f32) -> Self {
        let mut comp = Self {
            sample_rate,
            threshold: 0.0,
            ratio: 1.0,
            knee: 6.0,
            attack: 0.003,
            release: 0.25,
            attack_coeff: 0.0,
            release_coeff: 0.0,
            envelope_db: 0.0,
            name: "Compressor",
        };
        comp.update_coefficients();
        comp
    }

    /// Brickwall-style limiter: ratio 20, hard knee, 1 ms attack, 50 ms release
    pub fn limiter(sample_rate: f32) -> Self {
        let mut limiter = Self::new(sample_rate);
        limiter.knee = 0.0;
        limiter.ratio = 20.0;
        limiter.attack = 0.001;
        limiter.release = 0.05;
        limiter.name = "Limiter";
        limiter.update_coefficients();
        limiter
    }

    /// Update all four settings at once; coefficients are only recomputed
    /// when the time constants actually change
    pub fn configure(&mut self, threshold_db: f32, ratio: f32, attack_s: f32, release_s: f32) {
        self.threshold = threshold_db.min(0.0);
        self.ratio = ratio.max(1.0);
        let attack_s = attack_s.max(0.0);
        let release_s = release_s.max(0.0);
        if attack_s != self.attack || release_s != self.release {
            self.attack = attack_s;
            self.release = release_s;
            self.update_coefficients();
        }
    }

    pub fn set_threshold(&mut self, threshold_db: f32) {
        self.threshold = threshold_db.min(0.0);
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn ratio(&self) -> f32 {
        self.ratio
    }

    /// Current gain reduction in dB (for metering)
    pub fn gain_reduction_db(&self) -> f32 {
        self.envelope_db
    }

    fn time_to_coeff(&self, seconds: f32) -> f32 {
        if seconds <= 0.0 {
            0.0
        } else {
            (-1.0 / (self.sample_rate * seconds)).exp()
        }
    }

    fn update_coefficients(&mut self) {
        self.attack_coeff = self.time_to_coeff(self.attack);
        self.release_coeff = self.time_to_coeff(self.release);
    }

    /// Static gain curve: reduction in dB for an input level
    #[inline]
    fn compute_gain_reduction(&self, input_db: f32) -> f32 {
        let threshold = self.threshold;
        let ratio = self.ratio;
        let knee = self.knee;

        if knee > 0.0 && (input_db - threshold).abs() <= knee / 2.0 {
            // Quadratic knee between threshold - knee/2 and threshold + knee/2
            let x = input_db - threshold + knee / 2.0;
            (1.0 / ratio - 1.0) * (x * x) / (2.0 * knee)
        } else if input_db > threshold {
            threshold + (input_db - threshold) / ratio - input_db
        } else {
            0.0
        }
    }

    #[inline]
    fn process_frame(&mut self, left: f32, right: f32) -> (f32, f32) {
        let peak_db = linear_to_db(left.abs().max(right.abs()));
        let target = self.compute_gain_reduction(peak_db);

        // More reduction wanted: attack, otherwise release
        let coeff = if target < self.envelope_db {
            self.attack_coeff
        } else {
            self.release_coeff
        };
        self.envelope_db = coeff * self.envelope_db + (1.0 - coeff) * target;

        let gain = db_to_linear(self.envelope_db);
        (left * gain, right * gain)
    }
}

impl Node for DynamicsCompressor {
    fn process(&mut self, samples: &mut [f32]) {
        if self.ratio <= 1.0 && self.envelope_db == 0.0 {
            return;
        }
        for frame in samples.chunks_exact_mut(2) {
            let (l, r) = self.process_frame(frame[0], frame[1]);
            frame[0] = l;
            frame[1] = r;
        }
    }

    fn reset(&mut self) {
        self.envelope_db = 0.0;
    }

    fn name(&self) -> &'static str {
        self.name
    }
}
