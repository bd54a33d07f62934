//! Error taxonomy for the audio engine

use thiserror::Error;

use crate::preset::PresetError;

/// Errors surfaced by the graph manager and the capture exporter
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AudioError {
    /// Corrupt, truncated or unsupported input; retrying is futile
    #[error("decode error: {0}")]
    Decode(String),
    /// The device context could not be created or resumed yet.
    /// Retried on the next user-initiated play.
    #[error("audio device suspended: {0}")]
    DeviceSuspended(String),
    #[error(transparent)]
    Preset(#[from] PresetError),
    /// Operation needs an initialized, live session
    #[error("no audio session is ready")]
    NotReady,
    #[error("capture encoder unavailable: {0}")]
    EncoderUnavailable(String),
    #[error("playback failed to start: {0}")]
    PlaybackStartFailed(String),
    /// Safety timeout fired; partial output is still returned
    #[error("capture timed out after {elapsed_ms} ms")]
    Timeout { elapsed_ms: u64 },
    #[error("capture cancelled")]
    Cancelled,
}

impl AudioError {
    /// Whether the caller may retry the same action later
    pub fn is_retryable(&self) -> bool {
        matches!(self, AudioError::DeviceSuspended(_))
    }
}

pub type AudioResult<T> = Result<T, AudioError>;
