//! Mastered export by real-time capture
//!
//! Each export builds its own graph, independent of the live preview, and
//! plays it from zero into two taps: a monitor output and a capture sink.
//! One poll loop drives rendering, timeslice encoding, progress and the
//! safety deadline.

mod clock;
mod job;
mod monitor;
mod sink;

pub use clock::{Clock, ManualClock, SystemClock};
pub use job::{CaptureJob, CaptureStatus};
pub use monitor::{CpalMonitorFactory, MonitorFactory, MonitorOutput, NullMonitorFactory};
pub use sink::{CaptureSink, SinkFactory, WavSinkFactory};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver};
use mastr_analysis::LoudnessMetrics;
use tracing::{debug, info, warn};

use crate::decode::decode;
use crate::device::FALLBACK_SAMPLE_RATE;
use crate::error::{AudioError, AudioResult};
use crate::graph::ProcessingGraph;
use crate::preset::GenrePreset;
use crate::session::SourceFile;

/// Export settings
#[derive(Debug, Clone, Copy)]
pub struct CaptureConfig {
    pub sample_rate: u32,
    /// Audio per encoded chunk
    pub timeslice: Duration,
    pub poll_interval: Duration,
    /// Added to the source duration to form the deadline
    pub safety_margin: Duration,
    /// Monitor volume; 0 mutes
    pub monitor_gain: f32,
    pub bits: u16,
    /// Audio seconds rendered per wall-clock second
    pub realtime_factor: f64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: FALLBACK_SAMPLE_RATE,
            timeslice: Duration::from_millis(250),
            poll_interval: Duration::from_millis(50),
            safety_margin: Duration::from_secs(10),
            monitor_gain: 0.0,
            bits: 16,
            realtime_factor: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureStage {
    Preparing,
    Recording,
    Finalizing,
    Done,
}

impl std::fmt::Display for CaptureStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CaptureStage::Preparing => "preparing",
            CaptureStage::Recording => "recording",
            CaptureStage::Finalizing => "finalizing",
            CaptureStage::Done => "done",
        };
        f.write_str(s)
    }
}

/// Progress report, sent per chunk and at stage changes
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureProgress {
    /// 0-100, from elapsed time against the expected capture time
    pub percent: f64,
    pub stage: CaptureStage,
    pub chunk_count: usize,
    pub total_bytes: usize,
}

/// Before/after measurements of an export
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessingSummary {
    pub original_metrics: LoudnessMetrics,
    pub mastered_metrics: LoudnessMetrics,
    pub gain_applied_db: f64,
    pub compression_ratio_applied: f64,
}

/// Result of a finished (or timed out) export
#[derive(Debug, Clone)]
pub struct CaptureOutcome {
    pub status: CaptureStatus,
    /// The encoded file, or the original bytes when nothing was captured
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub elapsed_ms: u64,
    pub chunk_count: usize,
    pub total_bytes: usize,
    pub summary: ProcessingSummary,
    /// Original bytes were returned because no chunk was produced
    pub fell_back: bool,
}

/// Shared cancellation flag
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Export running on a worker thread
pub struct ExportHandle {
    progress: Receiver<CaptureProgress>,
    cancel: CancelToken,
    handle: JoinHandle<AudioResult<CaptureOutcome>>,
}

impl ExportHandle {
    pub fn progress(&self) -> &Receiver<CaptureProgress> {
        &self.progress
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the outcome
    pub fn join(self) -> AudioResult<CaptureOutcome> {
        self.handle
            .join()
            .map_err(|_| AudioError::EncoderUnavailable("capture worker panicked".into()))?
    }
}

/// Renders a source through a preset into an encoded file
#[derive(Clone)]
pub struct CaptureExporter {
    config: CaptureConfig,
    sinks: Arc<dyn SinkFactory>,
    monitors: Arc<dyn MonitorFactory>,
    clock: Arc<dyn Clock>,
}

impl CaptureExporter {
    /// WAV sink, silent monitor, wall clock
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            sinks: Arc::new(WavSinkFactory { bits: config.bits }),
            monitors: Arc::new(NullMonitorFactory),
            clock: Arc::new(SystemClock::new()),
            config,
        }
    }

    pub fn with_sinks(mut self, sinks: impl SinkFactory + 'static) -> Self {
        self.sinks = Arc::new(sinks);
        self
    }

    pub fn with_monitor(mut self, monitors: impl MonitorFactory + 'static) -> Self {
        self.monitors = Arc::new(monitors);
        self
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Export on the calling thread
    pub fn export(
        &self,
        source: &SourceFile,
        preset: &GenrePreset,
        progress: impl FnMut(&CaptureProgress),
    ) -> AudioResult<CaptureOutcome> {
        self.export_with_cancel(source, preset, &CancelToken::new(), progress)
    }

    /// Export on a worker thread, streaming progress over a channel
    pub fn spawn_export(&self, source: SourceFile, preset: GenrePreset) -> ExportHandle {
        let (progress_tx, progress_rx) = unbounded();
        let cancel = CancelToken::new();
        let exporter = self.clone();
        let token = cancel.clone();

        let handle = thread::spawn(move || {
            exporter.export_with_cancel(&source, &preset, &token, |p| {
                let _ = progress_tx.send(*p);
            })
        });

        ExportHandle {
            progress: progress_rx,
            cancel,
            handle,
        }
    }

    pub fn export_with_cancel(
        &self,
        source: &SourceFile,
        preset: &GenrePreset,
        cancel: &CancelToken,
        mut progress: impl FnMut(&CaptureProgress),
    ) -> AudioResult<CaptureOutcome> {
        let cfg = &self.config;
        let sr = cfg.sample_rate;

        progress(&CaptureProgress {
            percent: 0.0,
            stage: CaptureStage::Preparing,
            chunk_count: 0,
            total_bytes: 0,
        });

        let audio = decode(source, sr)?;
        let original_metrics = measure(&audio.samples, sr)?;
        let duration = Duration::from_secs_f64(audio.duration_secs());
        let total_frames = audio.frames();

        let mut graph = ProcessingGraph::new(Arc::new(audio));
        graph.apply_static(preset);

        let mut sink = self.sinks.create(sr)?;
        let mut monitor = self.monitors.create(sr, cfg.monitor_gain)?;

        let mut job = CaptureJob::new();
        job.start(sink.start()?, duration + cfg.safety_margin);
        if let Err(e) = monitor.start() {
            return Err(abandon(&mut job, monitor.as_mut(), &mut graph, e));
        }

        info!(
            source = %source.name,
            preset = preset.name,
            duration_s = duration.as_secs_f64(),
            "capture started"
        );

        let slice_samples = ((cfg.timeslice.as_secs_f64() * sr as f64) as usize).max(1) * 2;
        let expected_secs = if cfg.realtime_factor > 0.0 {
            duration.as_secs_f64() / cfg.realtime_factor
        } else {
            f64::INFINITY
        };

        let mut block = vec![0.0f32; 1024];
        let mut pending: Vec<f32> = Vec::with_capacity(slice_samples);
        let mut mastered: Vec<f32> = Vec::with_capacity(total_frames * 2);
        let mut rendered = 0usize;
        let started = self.clock.now();

        let timed_out = loop {
            if cancel.is_cancelled() {
                warn!(source = %source.name, "capture cancelled");
                let e = AudioError::Cancelled;
                return Err(abandon(&mut job, monitor.as_mut(), &mut graph, e));
            }

            let elapsed = self.clock.now().saturating_sub(started);
            let due = ((elapsed.as_secs_f64() * sr as f64 * cfg.realtime_factor) as usize)
                .min(total_frames);

            while rendered < due {
                let frames = (due - rendered).min(block.len() / 2);
                let out = &mut block[..frames * 2];
                graph.render(out);
                monitor.push(out);
                mastered.extend_from_slice(out);
                pending.extend_from_slice(out);
                rendered += frames;

                while pending.len() >= slice_samples {
                    let chunk = match sink.encode(&pending[..slice_samples]) {
                        Ok(chunk) => chunk,
                        Err(e) => return Err(abandon(&mut job, monitor.as_mut(), &mut graph, e)),
                    };
                    pending.drain(..slice_samples);
                    if job.push_chunk(chunk) {
                        progress(&CaptureProgress {
                            percent: percent(elapsed, expected_secs),
                            stage: CaptureStage::Recording,
                            chunk_count: job.chunk_count(),
                            total_bytes: job.total_bytes(),
                        });
                    }
                }
            }

            if rendered >= total_frames {
                break false;
            }
            if job.is_past_deadline(elapsed) {
                warn!(
                    elapsed_ms = elapsed.as_millis() as u64,
                    rendered_s = rendered as f64 / sr as f64,
                    "capture deadline reached, stopping"
                );
                break true;
            }
            self.clock.sleep(cfg.poll_interval);
        };

        // Final partial timeslice
        if !pending.is_empty() {
            match sink.encode(&pending) {
                Ok(chunk) => job.push_chunk(chunk),
                Err(e) => return Err(abandon(&mut job, monitor.as_mut(), &mut graph, e)),
            };
        }

        job.begin_finalize(timed_out);
        progress(&CaptureProgress {
            percent: percent(self.clock.now().saturating_sub(started), expected_secs),
            stage: CaptureStage::Finalizing,
            chunk_count: job.chunk_count(),
            total_bytes: job.total_bytes(),
        });

        monitor.stop();
        graph.disconnect();
        drop(graph);

        let elapsed_ms = self.clock.now().saturating_sub(started).as_millis() as u64;
        let fell_back = job.chunk_count() == 0;
        let (bytes, mime_type) = if fell_back {
            warn!(source = %source.name, "nothing captured, returning original file");
            (
                source.bytes.to_vec(),
                source
                    .content_type
                    .clone()
                    .unwrap_or_else(|| "application/octet-stream".into()),
            )
        } else {
            let bytes = match sink.finalize(job.header(), job.chunks()) {
                Ok(bytes) => bytes,
                Err(e) => {
                    job.fail();
                    warn!(error = %e, "capture finalize failed");
                    return Err(e);
                }
            };
            (bytes, sink.mime_type().to_string())
        };

        let status = job.finish();
        let summary = ProcessingSummary {
            original_metrics,
            mastered_metrics: measure(&mastered, sr)?,
            gain_applied_db: preset.gain_db(),
            compression_ratio_applied: preset.compression.ratio,
        };

        progress(&CaptureProgress {
            percent: 100.0,
            stage: CaptureStage::Done,
            chunk_count: job.chunk_count(),
            total_bytes: job.total_bytes(),
        });

        info!(
            status = ?status,
            elapsed_ms,
            chunks = job.chunk_count(),
            bytes = bytes.len(),
            "capture finished"
        );
        debug!(
            original_lufs = summary.original_metrics.integrated_lufs,
            mastered_lufs = summary.mastered_metrics.integrated_lufs,
            "capture loudness"
        );

        Ok(CaptureOutcome {
            status,
            bytes,
            mime_type,
            elapsed_ms,
            chunk_count: job.chunk_count(),
            total_bytes: job.total_bytes(),
            summary,
            fell_back,
        })
    }
}

/// Release a capture that stopped early and hand back its error
fn abandon(
    job: &mut CaptureJob,
    monitor: &mut dyn MonitorOutput,
    graph: &mut ProcessingGraph,
    err: AudioError,
) -> AudioError {
    job.fail();
    monitor.stop();
    graph.disconnect();
    if err != AudioError::Cancelled {
        warn!(error = %err, "capture failed");
    }
    err
}

fn measure(samples: &[f32], sample_rate: u32) -> AudioResult<LoudnessMetrics> {
    LoudnessMetrics::from_interleaved(samples, 2, sample_rate)
        .map_err(|e| AudioError::Decode(e.to_string()))
}

fn percent(elapsed: Duration, expected_secs: f64) -> f64 {
    if !expected_secs.is_finite() || expected_secs <= 0.0 {
        return 0.0;
    }
    (elapsed.as_secs_f64() / expected_secs * 100.0).min(100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::tests::{wav_bytes, wav_source};
    use crate::preset::PresetCatalog;
    use std::io::Cursor;

    fn exporter(config: CaptureConfig) -> CaptureExporter {
        CaptureExporter::new(config).with_clock(ManualClock::new())
    }

    fn wav_duration_ms(bytes: &[u8]) -> u64 {
        let reader = hound::WavReader::new(Cursor::new(bytes)).unwrap();
        reader.duration() as u64 * 1000 / reader.spec().sample_rate as u64
    }

    #[test]
    fn test_five_second_export_completes() {
        let source = wav_source("five.wav", 5.0);
        let preset = PresetCatalog::builtin().resolve("pop").unwrap();
        let mut reports = Vec::new();

        let outcome = exporter(CaptureConfig::default())
            .export(&source, &preset, |p| reports.push(*p))
            .unwrap();

        assert_eq!(outcome.status, CaptureStatus::Complete);
        assert!(!outcome.fell_back);
        assert!((5000..=15000).contains(&outcome.elapsed_ms), "{}", outcome.elapsed_ms);
        assert!(wav_duration_ms(&outcome.bytes).abs_diff(5000) <= 100);
        assert_eq!(outcome.mime_type, "audio/wav");

        // 250 ms slices over 5 s
        assert_eq!(outcome.chunk_count, 20);
        assert_eq!(outcome.total_bytes, 5 * 48000 * 2 * 2);

        let recording: Vec<_> = reports
            .iter()
            .filter(|p| p.stage == CaptureStage::Recording)
            .collect();
        assert_eq!(recording.len(), 20);
        assert!(recording.windows(2).all(|w| w[0].total_bytes < w[1].total_bytes));
        assert_eq!(reports.last().map(|p| p.stage), Some(CaptureStage::Done));
    }

    #[test]
    fn test_summary_reflects_preset() {
        let source = wav_source("song.wav", 2.0);
        let preset = PresetCatalog::builtin().resolve("rock").unwrap();
        let outcome = exporter(CaptureConfig::default())
            .export(&source, &preset, |_| {})
            .unwrap();

        let s = outcome.summary;
        assert_eq!(s.compression_ratio_applied, preset.compression.ratio);
        assert!((s.gain_applied_db - preset.gain_db()).abs() < 1e-9);
        // 0.5 amplitude sine: about -6 dBFS peak before processing
        assert!((s.original_metrics.peak_db + 6.0).abs() < 0.2);
        assert!(s.mastered_metrics.peak_db <= 0.0);
    }

    #[test]
    fn test_slow_render_times_out_with_partial_output() {
        let source = wav_source("slow.wav", 5.0);
        let preset = PresetCatalog::builtin().default_preset();
        let config = CaptureConfig {
            realtime_factor: 0.25,
            ..CaptureConfig::default()
        };

        let outcome = exporter(config).export(&source, &preset, |_| {}).unwrap();
        assert_eq!(outcome.status, CaptureStatus::TimedOut);
        assert!(!outcome.fell_back);
        assert_eq!(outcome.elapsed_ms, 15000);
        // 15 s at quarter speed
        assert!(wav_duration_ms(&outcome.bytes).abs_diff(3750) <= 100);
    }

    #[test]
    fn test_nothing_captured_falls_back_to_original() {
        let source = wav_source("stuck.wav", 1.0);
        let preset = PresetCatalog::builtin().default_preset();
        let config = CaptureConfig {
            realtime_factor: 0.0,
            ..CaptureConfig::default()
        };

        let outcome = exporter(config).export(&source, &preset, |_| {}).unwrap();
        assert!(outcome.fell_back);
        assert_eq!(outcome.chunk_count, 0);
        assert_eq!(outcome.bytes, source.bytes.to_vec());
        assert_eq!(outcome.mime_type, "audio/wav");
    }

    #[test]
    fn test_encoder_unavailable() {
        let source = wav_source("song.wav", 1.0);
        let preset = PresetCatalog::builtin().default_preset();
        let config = CaptureConfig {
            bits: 12,
            ..CaptureConfig::default()
        };
        let result = exporter(config).export(&source, &preset, |_| {});
        assert!(matches!(result, Err(AudioError::EncoderUnavailable(_))));
    }

    struct BrokenMonitor;

    impl MonitorFactory for BrokenMonitor {
        fn create(&self, _sample_rate: u32, _gain: f32) -> AudioResult<Box<dyn MonitorOutput>> {
            Err(AudioError::PlaybackStartFailed("no device".into()))
        }
    }

    #[test]
    fn test_playback_start_failure_surfaces() {
        let source = wav_source("song.wav", 1.0);
        let preset = PresetCatalog::builtin().default_preset();
        let result = exporter(CaptureConfig::default())
            .with_monitor(BrokenMonitor)
            .export(&source, &preset, |_| {});
        assert_eq!(result.unwrap_err(), AudioError::PlaybackStartFailed("no device".into()));
    }

    struct FailingSink;

    impl CaptureSink for FailingSink {
        fn start(&mut self) -> AudioResult<Vec<u8>> {
            Ok(b"HDR".to_vec())
        }

        fn encode(&mut self, _samples: &[f32]) -> AudioResult<Vec<u8>> {
            Err(AudioError::EncoderUnavailable("encoder crashed".into()))
        }

        fn finalize(&mut self, _header: &[u8], _chunks: &[Vec<u8>]) -> AudioResult<Vec<u8>> {
            Ok(Vec::new())
        }

        fn mime_type(&self) -> &'static str {
            "audio/x-test"
        }
    }

    struct FailingSinks;

    impl SinkFactory for FailingSinks {
        fn create(&self, _sample_rate: u32) -> AudioResult<Box<dyn CaptureSink>> {
            Ok(Box::new(FailingSink))
        }
    }

    #[derive(Clone, Default)]
    struct TrackedMonitor {
        stopped: Arc<AtomicBool>,
    }

    impl MonitorOutput for TrackedMonitor {
        fn start(&mut self) -> AudioResult<()> {
            Ok(())
        }

        fn push(&mut self, _samples: &[f32]) {}

        fn stop(&mut self) {
            self.stopped.store(true, Ordering::SeqCst);
        }
    }

    impl MonitorFactory for TrackedMonitor {
        fn create(&self, _sample_rate: u32, _gain: f32) -> AudioResult<Box<dyn MonitorOutput>> {
            Ok(Box::new(self.clone()))
        }
    }

    #[test]
    fn test_encoder_failure_stops_monitor() {
        let source = wav_source("song.wav", 1.0);
        let preset = PresetCatalog::builtin().default_preset();
        let monitor = TrackedMonitor::default();
        let mut reports = Vec::new();

        let result = exporter(CaptureConfig::default())
            .with_sinks(FailingSinks)
            .with_monitor(monitor.clone())
            .export(&source, &preset, |p| reports.push(p.stage));

        assert_eq!(
            result.unwrap_err(),
            AudioError::EncoderUnavailable("encoder crashed".into())
        );
        assert!(monitor.stopped.load(Ordering::SeqCst));
        assert!(!reports.contains(&CaptureStage::Finalizing));
        assert!(!reports.contains(&CaptureStage::Done));
    }

    #[test]
    fn test_decode_failure_surfaces() {
        let source = SourceFile::new("broken.wav", wav_bytes(1.0, 48000, 2, 0.5)[..20].to_vec());
        let preset = PresetCatalog::builtin().default_preset();
        let result = exporter(CaptureConfig::default()).export(&source, &preset, |_| {});
        assert!(matches!(result, Err(AudioError::Decode(_))));
    }

    #[test]
    fn test_spawned_export_streams_progress() {
        let source = wav_source("song.wav", 1.0);
        let preset = PresetCatalog::builtin().resolve("jazz").unwrap();
        let handle = exporter(CaptureConfig::default()).spawn_export(source, preset);
        let progress = handle.progress().clone();

        let outcome = handle.join().unwrap();
        let reports: Vec<_> = progress.try_iter().collect();
        assert_eq!(outcome.status, CaptureStatus::Complete);
        assert_eq!(reports.first().map(|p| p.stage), Some(CaptureStage::Preparing));
        assert_eq!(reports.last().map(|p| p.percent), Some(100.0));
    }

    #[test]
    fn test_cancelled_export_fails() {
        let source = wav_source("song.wav", 1.0);
        let preset = PresetCatalog::builtin().default_preset();
        let token = CancelToken::new();
        token.cancel();
        let result =
            exporter(CaptureConfig::default()).export_with_cancel(&source, &preset, &token, |_| {});
        assert_eq!(result.unwrap_err(), AudioError::Cancelled);
    }
}
