//! Processing graph
//!
//! Signal flow:
//! ```text
//! Source → EQ low shelf → EQ peaking → EQ high shelf → Compressor
//!        → Limiter → Output gain → Analysis tap → Device
//! ```
//!
//! The graph clock counts rendered frames. Output gain is evaluated per frame;
//! the remaining parameters are evaluated once per render quantum.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use crate::automation::{duration_to_frames, Automate, ParamId, ParamSet};
use crate::decode::DecodedAudio;
use crate::nodes::{DynamicsCompressor, EqBand, Node};
use crate::preset::GenrePreset;
use crate::tap::{TapRing, TapWriter, TAP_FRAMES};

/// Frames processed between k-rate parameter updates
pub const RENDER_QUANTUM: usize = 128;

/// Graph shared between the control side and the device callback
pub type SharedGraph = Arc<Mutex<ProcessingGraph>>;

/// Parameter targets for a preset
pub fn preset_targets(preset: &GenrePreset) -> [(ParamId, f64); 9] {
    let [low, mid, high] = preset.eq.gains_db();
    let c = &preset.compression;
    [
        (ParamId::OutputGain, preset.gain),
        (ParamId::CompressorThreshold, c.threshold_db),
        (ParamId::CompressorRatio, c.ratio),
        (ParamId::CompressorAttack, c.attack_s),
        (ParamId::CompressorRelease, c.release_s),
        (ParamId::EqLow, low),
        (ParamId::EqMid, mid),
        (ParamId::EqHigh, high),
        (ParamId::LimiterThreshold, preset.true_peak_db),
    ]
}

/// The mastering chain for one decoded source
pub struct ProcessingGraph {
    sample_rate: u32,
    source: Option<Arc<DecodedAudio>>,
    duration_frames: usize,
    /// Read position in source frames
    position: usize,
    /// Frames rendered since the graph was built
    clock: u64,
    params: ParamSet,

    // Nodes (in signal flow order)
    eq_low: EqBand,
    eq_mid: EqBand,
    eq_high: EqBand,
    compressor: DynamicsCompressor,
    limiter: DynamicsCompressor,

    tap: TapWriter,
    tap_ring: Arc<Mutex<TapRing>>,
    ended: bool,
    connected: bool,
}

impl ProcessingGraph {
    /// Build the chain around a decoded source
    pub fn new(source: Arc<DecodedAudio>) -> Self {
        let sample_rate = source.sample_rate;
        let sr = sample_rate as f32;
        let (tap, tap_ring) = TapWriter::new(TAP_FRAMES);
        Self {
            sample_rate,
            duration_frames: source.frames(),
            source: Some(source),
            position: 0,
            clock: 0,
            params: ParamSet::default(),
            eq_low: EqBand::low_shelf(sr),
            eq_mid: EqBand::mid_peak(sr),
            eq_high: EqBand::high_shelf(sr),
            compressor: DynamicsCompressor::new(sr),
            limiter: DynamicsCompressor::limiter(sr),
            tap,
            tap_ring,
            ended: false,
            connected: true,
        }
    }

    pub fn into_shared(self) -> SharedGraph {
        Arc::new(Mutex::new(self))
    }

    pub(crate) fn tap_ring(&self) -> Arc<Mutex<TapRing>> {
        self.tap_ring.clone()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Frames rendered so far: the graph's own clock
    pub fn clock_frames(&self) -> u64 {
        self.clock
    }

    pub fn position_frames(&self) -> usize {
        self.position
    }

    pub fn position_secs(&self) -> f64 {
        self.position as f64 / self.sample_rate as f64
    }

    pub fn duration_secs(&self) -> f64 {
        self.duration_frames as f64 / self.sample_rate as f64
    }

    /// Whether the source has been played to its end
    pub fn is_ended(&self) -> bool {
        self.ended
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Move the read position; clears the end-of-stream flag
    pub fn seek(&mut self, seconds: f64) {
        let frame = (seconds.max(0.0) * self.sample_rate as f64) as usize;
        self.position = frame.min(self.duration_frames);
        self.ended = self.position >= self.duration_frames;
    }

    pub fn rewind(&mut self) {
        self.seek(0.0);
    }

    /// Ramp every preset parameter from its live value over `ramp`
    pub fn ramp_to_preset(&mut self, preset: &GenrePreset, ramp: Duration) {
        for (param, target) in preset_targets(preset) {
            self.automate(param, target, ramp);
        }
        debug!(preset = preset.name, clock = self.clock, "preset ramp scheduled");
    }

    /// Apply a preset immediately, without ramps; only for graphs that are
    /// not yet rendering
    pub fn apply_static(&mut self, preset: &GenrePreset) {
        for (param, target) in preset_targets(preset) {
            self.params.get_mut(param).set_value(target);
        }
        self.update_nodes(self.clock);
    }

    /// Final value of a parameter once running automation completes
    pub fn param_target(&self, param: ParamId) -> f64 {
        self.params.get(param).target()
    }

    pub fn is_ramping(&self) -> bool {
        self.params.any_ramping(self.clock)
    }

    /// Compressor gain reduction in dB
    pub fn gain_reduction_db(&self) -> f32 {
        self.compressor.gain_reduction_db()
    }

    fn update_nodes(&mut self, frame: u64) {
        let p = &self.params;
        self.eq_low.set_gain_db(p.value_at(ParamId::EqLow, frame) as f32);
        self.eq_mid.set_gain_db(p.value_at(ParamId::EqMid, frame) as f32);
        self.eq_high.set_gain_db(p.value_at(ParamId::EqHigh, frame) as f32);
        self.compressor.configure(
            p.value_at(ParamId::CompressorThreshold, frame) as f32,
            p.value_at(ParamId::CompressorRatio, frame) as f32,
            p.value_at(ParamId::CompressorAttack, frame) as f32,
            p.value_at(ParamId::CompressorRelease, frame) as f32,
        );
        self.limiter
            .set_threshold(p.value_at(ParamId::LimiterThreshold, frame) as f32);
    }

    /// Render stereo interleaved output, advancing the clock
    pub fn render(&mut self, output: &mut [f32]) {
        if !self.connected {
            output.fill(0.0);
            return;
        }

        for block in output.chunks_mut(RENDER_QUANTUM * 2) {
            let frames = block.len() / 2;
            self.pull_source(block);
            self.update_nodes(self.clock);

            self.eq_low.process(block);
            self.eq_mid.process(block);
            self.eq_high.process(block);
            self.compressor.process(block);
            self.limiter.process(block);

            // Output gain is sample-accurate
            let gain = self.params.get(ParamId::OutputGain);
            for (i, frame) in block.chunks_exact_mut(2).enumerate() {
                let g = gain.value_at(self.clock + i as u64) as f32;
                frame[0] *= g;
                frame[1] *= g;
            }

            self.tap.write(block);
            self.clock += frames as u64;
        }

        self.params.settle(self.clock);
    }

    /// Copy source frames into `block`, padding with silence past the end
    fn pull_source(&mut self, block: &mut [f32]) {
        let frames = block.len() / 2;
        let Some(source) = &self.source else {
            block.fill(0.0);
            return;
        };

        let available = self.duration_frames.saturating_sub(self.position).min(frames);
        let start = self.position * 2;
        block[..available * 2].copy_from_slice(&source.samples[start..start + available * 2]);
        block[available * 2..].fill(0.0);
        self.position += available;

        if self.position >= self.duration_frames && !self.ended {
            self.ended = true;
            debug!(frames = self.duration_frames, "source reached end of stream");
        }
    }

    /// Disconnect every node and release the decoded buffer
    pub fn disconnect(&mut self) {
        if !self.connected {
            return;
        }
        self.connected = false;
        self.source = None;
        self.eq_low.reset();
        self.eq_mid.reset();
        self.eq_high.reset();
        self.compressor.reset();
        self.limiter.reset();
        self.tap.clear();
    }
}

impl Automate for ProcessingGraph {
    fn automate(&mut self, param: ParamId, target: f64, duration: Duration) {
        let frames = duration_to_frames(duration, self.sample_rate);
        self.params
            .get_mut(param)
            .linear_ramp_to(target, self.clock, frames);
    }

    fn current(&self, param: ParamId) -> f64 {
        self.params.value_at(param, self.clock)
    }
}
