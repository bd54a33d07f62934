//! Audio analysis for mastr
//!
//! Pure computation from sample buffers to loudness metrics:
//! - Integrated loudness with two-pass gating (ITU-R BS.1770)
//! - Instantaneous RMS / peak / stereo correlation for live meters
//! - Three-band spectral energy split
//! - Hold-and-decay display state for meters

mod hold;
mod instant;
mod loudness;
mod reading;
mod spectrum;

pub use hold::{MeterHoldState, DEFAULT_HOLD_MS};
pub use instant::{peak_db, rms_db, stereo_correlation, LiveMeter, DEFAULT_WINDOW_TICKS};
pub use loudness::{
    integrated_lufs, measure, AnalysisError, LoudnessMetrics, LoudnessReport, BLOCK_SECONDS,
    K_WEIGHTING,
};
pub use reading::{clamp_db, FrequencyBands, MeterReading, DB_CEILING, DB_FLOOR};
pub use spectrum::{BandSplitter, FFT_SIZE};
