//! Processing nodes of the mastering chain

mod biquad;
mod compressor;

pub use biquad::{EqBand, EqBandKind};
pub use compressor::DynamicsCompressor;

/// A node in the processing chain
pub trait Node: Send {
    /// Process audio frames in place (stereo interleaved)
    fn process(&mut self, samples: &mut [f32]);

    /// Reset internal state (filter memory, envelopes)
    fn reset(&mut self);

    /// Node name for logs
    fn name(&self) -> &'static str;
}

/// Convert dB to linear
#[inline]
pub(crate) fn db_to_linear(db: f32) -> f32 {
    10.0f32.powf(db / 20.0)
}

/// Convert linear to dB
#[inline]
pub(crate) fn linear_to_db(linear: f32) -> f32 {
    if linear > 1e-10 {
        20.0 * linear.log10()
    } else {
        -200.0
    }
}
