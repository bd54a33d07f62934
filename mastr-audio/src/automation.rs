//! Parameter automation
//!
//! Every chain parameter is an [`AudioParam`] that can hold a linear ramp
//! anchored on the graph clock (frames rendered). A new ramp always starts
//! from the value live at the instant it is scheduled, so rapid changes
//! never jump: the last write wins and nothing already rendered is undone.

use std::time::Duration;

/// Automatable parameters of the mastering chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamId {
    /// Linear output multiplier
    OutputGain,
    CompressorThreshold,
    CompressorRatio,
    /// Seconds
    CompressorAttack,
    /// Seconds
    CompressorRelease,
    /// Low shelf gain in dB
    EqLow,
    /// Mid peaking gain in dB
    EqMid,
    /// High shelf gain in dB
    EqHigh,
    /// Limiter threshold in dBFS
    LimiterThreshold,
}

impl ParamId {
    pub const ALL: [ParamId; 9] = [
        ParamId::OutputGain,
        ParamId::CompressorThreshold,
        ParamId::CompressorRatio,
        ParamId::CompressorAttack,
        ParamId::CompressorRelease,
        ParamId::EqLow,
        ParamId::EqMid,
        ParamId::EqHigh,
        ParamId::LimiterThreshold,
    ];

    #[inline]
    fn index(self) -> usize {
        self as usize
    }

    /// Value before any preset is applied (a transparent chain)
    pub fn default_value(self) -> f64 {
        match self {
            ParamId::OutputGain => 1.0,
            ParamId::CompressorThreshold => 0.0,
            ParamId::CompressorRatio => 1.0,
            ParamId::CompressorAttack => 0.003,
            ParamId::CompressorRelease => 0.25,
            ParamId::EqLow | ParamId::EqMid | ParamId::EqHigh => 0.0,
            ParamId::LimiterThreshold => 0.0,
        }
    }

    /// Allowed range; targets outside it are clamped
    pub fn range(self) -> (f64, f64) {
        match self {
            ParamId::OutputGain => (0.0, 10.0),
            ParamId::CompressorThreshold | ParamId::LimiterThreshold => (-100.0, 0.0),
            ParamId::CompressorRatio => (1.0, 20.0),
            ParamId::CompressorAttack | ParamId::CompressorRelease => (0.0, 1.0),
            ParamId::EqLow | ParamId::EqMid | ParamId::EqHigh => (-40.0, 40.0),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ParamId::OutputGain => "gain",
            ParamId::CompressorThreshold => "compressor.threshold",
            ParamId::CompressorRatio => "compressor.ratio",
            ParamId::CompressorAttack => "compressor.attack",
            ParamId::CompressorRelease => "compressor.release",
            ParamId::EqLow => "eq.low",
            ParamId::EqMid => "eq.mid",
            ParamId::EqHigh => "eq.high",
            ParamId::LimiterThreshold => "limiter.threshold",
        }
    }
}

/// Linear interpolation between two points on the graph clock
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearRamp {
    pub start_value: f64,
    pub target: f64,
    pub start_frame: u64,
    pub end_frame: u64,
}

impl LinearRamp {
    #[inline]
    fn value_at(&self, frame: u64) -> f64 {
        if frame >= self.end_frame {
            return self.target;
        }
        if frame <= self.start_frame {
            return self.start_value;
        }
        let t = (frame - self.start_frame) as f64 / (self.end_frame - self.start_frame) as f64;
        self.start_value + (self.target - self.start_value) * t
    }
}

/// A single automatable value
#[derive(Debug, Clone)]
pub struct AudioParam {
    /// Value when no ramp is active
    value: f64,
    ramp: Option<LinearRamp>,
    min: f64,
    max: f64,
}

impl AudioParam {
    pub fn new(value: f64, min: f64, max: f64) -> Self {
        Self {
            value: value.clamp(min, max),
            ramp: None,
            min,
            max,
        }
    }

    /// Value at a frame on the graph clock
    #[inline]
    pub fn value_at(&self, frame: u64) -> f64 {
        match &self.ramp {
            Some(ramp) => ramp.value_at(frame),
            None => self.value,
        }
    }

    /// Final value once all scheduled automation has completed
    pub fn target(&self) -> f64 {
        self.ramp.map(|r| r.target).unwrap_or(self.value)
    }

    pub fn is_ramping(&self, frame: u64) -> bool {
        self.ramp.is_some_and(|r| frame < r.end_frame)
    }

    /// Schedule a linear ramp from the live value at `now` to `target`
    pub fn linear_ramp_to(&mut self, target: f64, now: u64, duration_frames: u64) {
        let target = target.clamp(self.min, self.max);
        let start_value = self.value_at(now);
        if duration_frames == 0 {
            self.set_value(target);
            return;
        }
        self.ramp = Some(LinearRamp {
            start_value,
            target,
            start_frame: now,
            end_frame: now + duration_frames,
        });
    }

    /// Set immediately, cancelling any ramp. Only safe while not rendering.
    pub fn set_value(&mut self, value: f64) {
        self.value = value.clamp(self.min, self.max);
        self.ramp = None;
    }

    /// Collapse a finished ramp into a plain value
    pub fn settle(&mut self, frame: u64) {
        if let Some(ramp) = self.ramp {
            if frame >= ramp.end_frame {
                self.value = ramp.target;
                self.ramp = None;
            }
        }
    }
}

/// The full set of chain parameters
#[derive(Debug, Clone)]
pub struct ParamSet {
    params: [AudioParam; 9],
}

impl Default for ParamSet {
    fn default() -> Self {
        Self {
            params: ParamId::ALL.map(|id| {
                let (min, max) = id.range();
                AudioParam::new(id.default_value(), min, max)
            }),
        }
    }
}

impl ParamSet {
    pub fn get(&self, id: ParamId) -> &AudioParam {
        &self.params[id.index()]
    }

    pub fn get_mut(&mut self, id: ParamId) -> &mut AudioParam {
        &mut self.params[id.index()]
    }

    #[inline]
    pub fn value_at(&self, id: ParamId, frame: u64) -> f64 {
        self.params[id.index()].value_at(frame)
    }

    pub fn settle(&mut self, frame: u64) {
        for param in &mut self.params {
            param.settle(frame);
        }
    }

    pub fn any_ramping(&self, frame: u64) -> bool {
        self.params.iter().any(|p| p.is_ramping(frame))
    }
}

/// Capability to automate parameters on some clock
///
/// Implemented by the sample-accurate graph; a backend without a scheduler
/// can implement it by interpolating manually in its render callback.
pub trait Automate {
    /// Ramp `param` linearly to `target` over `duration`, starting now
    fn automate(&mut self, param: ParamId, target: f64, duration: Duration);

    /// Live value of `param` right now
    fn current(&self, param: ParamId) -> f64;
}

/// Convert a duration to frames at a sample rate
#[inline]
pub fn duration_to_frames(duration: Duration, sample_rate: u32) -> u64 {
    (duration.as_secs_f64() * sample_rate as f64).round() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ramp_interpolates_linearly() {
        let mut param = AudioParam::new(0.0, -10.0, 10.0);
        param.linear_ramp_to(4.0, 100, 400);

        assert_eq!(param.value_at(100), 0.0);
        assert!((param.value_at(300) - 2.0).abs() < 1e-12);
        assert_eq!(param.value_at(500), 4.0);
        assert_eq!(param.value_at(10_000), 4.0);
        assert!(param.is_ramping(499));
        assert!(!param.is_ramping(500));
    }

    #[test]
    fn test_new_ramp_starts_from_live_value() {
        let mut param = AudioParam::new(0.0, -10.0, 10.0);
        param.linear_ramp_to(10.0, 0, 100);

        // Interrupt halfway: the new ramp begins at 5.0, not at 0 or 10
        param.linear_ramp_to(-10.0, 50, 100);
        assert!((param.value_at(50) - 5.0).abs() < 1e-12);
        assert!((param.value_at(100) + 2.5).abs() < 1e-12);
        assert_eq!(param.target(), -10.0);
    }

    #[test]
    fn test_targets_are_clamped() {
        let mut param = AudioParam::new(1.0, 1.0, 20.0);
        param.linear_ramp_to(100.0, 0, 10);
        assert_eq!(param.target(), 20.0);
        param.set_value(0.0);
        assert_eq!(param.value_at(0), 1.0);
    }

    #[test]
    fn test_zero_duration_sets_immediately() {
        let mut param = AudioParam::new(0.0, -10.0, 10.0);
        param.linear_ramp_to(3.0, 42, 0);
        assert_eq!(param.value_at(42), 3.0);
        assert!(!param.is_ramping(42));
    }

    #[test]
    fn test_settle_collapses_finished_ramp() {
        let mut set = ParamSet::default();
        set.get_mut(ParamId::EqLow).linear_ramp_to(3.0, 0, 10);
        assert!(set.any_ramping(5));
        set.settle(5);
        assert!(set.any_ramping(5));
        set.settle(10);
        assert!(!set.any_ramping(10));
        assert_eq!(set.value_at(ParamId::EqLow, 0), 3.0);
    }

    #[test]
    fn test_defaults_are_transparent() {
        let set = ParamSet::default();
        assert_eq!(set.value_at(ParamId::OutputGain, 0), 1.0);
        assert_eq!(set.value_at(ParamId::CompressorRatio, 0), 1.0);
        assert_eq!(set.value_at(ParamId::EqMid, 0), 0.0);
    }

    #[test]
    fn test_duration_to_frames() {
        assert_eq!(duration_to_frames(Duration::from_millis(50), 48000), 2400);
        assert_eq!(duration_to_frames(Duration::ZERO, 48000), 0);
    }
}
