//! ITU-R BS.1770 integrated loudness
//!
//! Offline measurement over a full decoded buffer:
//! K-weighting → 400ms blocks → absolute gate (-70) → relative gate (-10)
//! → energy average. Nothing surviving the gates yields the -70 floor.

use thiserror::Error;
use tracing::debug;

use crate::reading::{clamp_db, DB_FLOOR};

/// Gating block length in seconds
pub const BLOCK_SECONDS: f64 = 0.4;

/// Absolute gate in LUFS
const ABSOLUTE_GATE: f64 = -70.0;

/// Relative gate offset in LU below the first-pass average
const RELATIVE_GATE_OFFSET: f64 = -10.0;

/// K-weighting biquad coefficients `[b0, b1, b2, a1, a2]`
pub const K_WEIGHTING: [f64; 5] = [
    1.0,
    -1.69065929318241,
    0.73248077421585,
    -1.53512485958697,
    0.690093996360252,
];

/// Errors from loudness analysis
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalysisError {
    #[error("sample rate must be non-zero")]
    ZeroSampleRate,
    #[error("channel {channel} has {len} samples, expected {expected}")]
    ChannelLengthMismatch {
        channel: usize,
        len: usize,
        expected: usize,
    },
    #[error("interleaved buffer of {len} samples is not a multiple of {channels} channels")]
    RaggedInterleave { len: usize, channels: usize },
}

/// Direct form I biquad state
#[derive(Default, Clone)]
struct KWeighting {
    x1: f64,
    x2: f64,
    y1: f64,
    y2: f64,
}

impl KWeighting {
    #[inline]
    fn process(&mut self, input: f64) -> f64 {
        let [b0, b1, b2, a1, a2] = K_WEIGHTING;
        let output = b0 * input + b1 * self.x1 + b2 * self.x2 - a1 * self.y1 - a2 * self.y2;
        self.x2 = self.x1;
        self.x1 = input;
        self.y2 = self.y1;
        self.y1 = output;
        output
    }
}

/// Details of a gated loudness measurement
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoudnessReport {
    /// Integrated loudness in LUFS, floored at -70
    pub integrated_lufs: f64,
    /// Complete 400ms blocks in the buffer
    pub blocks_total: usize,
    /// Blocks above the absolute gate
    pub blocks_above_absolute: usize,
    /// Blocks that survived both gates
    pub blocks_gated: usize,
    /// Relative threshold used for the second pass, if one ran
    pub relative_threshold: Option<f64>,
}

impl LoudnessReport {
    fn silent(blocks_total: usize) -> Self {
        Self {
            integrated_lufs: DB_FLOOR,
            blocks_total,
            blocks_above_absolute: 0,
            blocks_gated: 0,
            relative_threshold: None,
        }
    }
}

#[inline]
fn energy_to_db(energy: f64) -> f64 {
    if energy > 0.0 {
        10.0 * energy.log10()
    } else {
        f64::NEG_INFINITY
    }
}

/// Measure gated loudness over planar channels of equal length
pub fn measure(channels: &[&[f32]], sample_rate: u32) -> Result<LoudnessReport, AnalysisError> {
    if sample_rate == 0 {
        return Err(AnalysisError::ZeroSampleRate);
    }
    let Some(first) = channels.first() else {
        return Ok(LoudnessReport::silent(0));
    };
    let frames = first.len();
    for (channel, data) in channels.iter().enumerate() {
        if data.len() != frames {
            return Err(AnalysisError::ChannelLengthMismatch {
                channel,
                len: data.len(),
                expected: frames,
            });
        }
    }

    let block_len = (sample_rate as f64 * BLOCK_SECONDS).round() as usize;
    let block_count = frames / block_len.max(1);
    if block_count == 0 {
        return Ok(LoudnessReport::silent(0));
    }

    // Per-block energy summed across channels
    let mut block_energy = vec![0.0f64; block_count];
    for data in channels {
        let mut filter = KWeighting::default();
        let mut sum = 0.0f64;
        for (i, &sample) in data.iter().take(block_count * block_len).enumerate() {
            let weighted = filter.process(sample as f64);
            sum += weighted * weighted;
            if (i + 1) % block_len == 0 {
                block_energy[i / block_len] += sum / block_len as f64;
                sum = 0.0;
            }
        }
    }

    let block_db: Vec<f64> = block_energy.iter().map(|&e| energy_to_db(e)).collect();

    // First pass: absolute gate
    let (abs_sum, abs_count) = block_energy
        .iter()
        .zip(&block_db)
        .filter(|&(_, &db)| db > ABSOLUTE_GATE)
        .fold((0.0, 0usize), |(s, n), (&e, _)| (s + e, n + 1));
    if abs_count == 0 {
        return Ok(LoudnessReport::silent(block_count));
    }
    let first_pass = abs_sum / abs_count as f64;
    let relative_threshold = energy_to_db(first_pass) + RELATIVE_GATE_OFFSET;

    // Second pass: both gates
    let (rel_sum, rel_count) = block_energy
        .iter()
        .zip(&block_db)
        .filter(|&(_, &db)| db > ABSOLUTE_GATE && db >= relative_threshold)
        .fold((0.0, 0usize), |(s, n), (&e, _)| (s + e, n + 1));

    let integrated = if rel_count == 0 {
        DB_FLOOR
    } else {
        energy_to_db(rel_sum / rel_count as f64).max(DB_FLOOR)
    };

    debug!(
        blocks = block_count,
        above_absolute = abs_count,
        gated = rel_count,
        integrated,
        "integrated loudness measured"
    );

    Ok(LoudnessReport {
        integrated_lufs: if integrated.is_finite() { integrated } else { DB_FLOOR },
        blocks_total: block_count,
        blocks_above_absolute: abs_count,
        blocks_gated: rel_count,
        relative_threshold: Some(relative_threshold),
    })
}

/// Integrated loudness in LUFS over planar channels
pub fn integrated_lufs(channels: &[&[f32]], sample_rate: u32) -> Result<f64, AnalysisError> {
    measure(channels, sample_rate).map(|r| r.integrated_lufs)
}

/// Whole-buffer loudness summary used in export reports
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoudnessMetrics {
    pub integrated_lufs: f64,
    pub peak_db: f64,
    pub rms_db: f64,
}

impl LoudnessMetrics {
    /// Measure an interleaved buffer
    pub fn from_interleaved(
        samples: &[f32],
        channels: usize,
        sample_rate: u32,
    ) -> Result<Self, AnalysisError> {
        if channels == 0 || samples.len() % channels != 0 {
            return Err(AnalysisError::RaggedInterleave {
                len: samples.len(),
                channels,
            });
        }
        let planar: Vec<Vec<f32>> = (0..channels)
            .map(|ch| samples.iter().skip(ch).step_by(channels).copied().collect())
            .collect();
        let refs: Vec<&[f32]> = planar.iter().map(|c| c.as_slice()).collect();

        Ok(Self {
            integrated_lufs: integrated_lufs(&refs, sample_rate)?,
            peak_db: clamp_db(crate::instant::peak_db(samples)),
            rms_db: clamp_db(crate::instant::rms_db(samples)),
        })
    }
}
