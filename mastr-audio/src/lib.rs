//! Audio engine for mastr - presets, processing graph, preview and export
//!
//! This module provides the mastering pipeline:
//! - Preset: Genre catalog of mastering targets
//! - Automation: Clock-anchored linear parameter ramps
//! - Graph: EQ, compressor, limiter and gain with an analysis tap
//! - Manager: The single live preview session and its device
//! - Metering: Tap reader thread with peak hold
//! - Capture: Real-time export into an encoded file

mod automation;
mod decode;
mod device;
mod error;
mod graph;
mod manager;
mod metering;
mod nodes;
mod preset;
mod session;
mod tap;
pub mod capture;

pub use automation::{duration_to_frames, Automate, AudioParam, LinearRamp, ParamId, ParamSet};
pub use decode::{decode, DecodedAudio};
pub use device::{
    CpalDeviceFactory, DeviceFactory, OfflineDeviceFactory, OfflineDriver, OutputDevice,
    FALLBACK_SAMPLE_RATE,
};
pub use error::{AudioError, AudioResult};
pub use graph::{preset_targets, ProcessingGraph, SharedGraph, RENDER_QUANTUM};
pub use manager::{AudioGraphManager, GraphConfig, DEFAULT_RAMP_MS};
pub use metering::{MeterConfig, MeterEvent, MeterLoop, MeterTicker, DEFAULT_METER_INTERVAL_MS};
pub use nodes::{DynamicsCompressor, EqBand, EqBandKind, Node};
pub use preset::{
    normalize_genre_id, CompressionSettings, EqMultipliers, GenrePreset, PresetCatalog,
    PresetError, DEFAULT_GENRE,
};
pub use session::{AudioSession, GraphState, SessionHandle, SourceFile, SourceId};
pub use tap::{AnalysisTap, TapFrame, TAP_FRAMES};
pub use capture::{
    CancelToken, CaptureConfig, CaptureExporter, CaptureOutcome, CaptureProgress, CaptureStage,
    CaptureStatus, CpalMonitorFactory, ExportHandle, ProcessingSummary, WavSinkFactory,
};
