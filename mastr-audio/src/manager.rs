//! Live preview graph manager
//!
//! Owns at most one session: the decoded source, its processing graph and the
//! device context feeding it. Sessions are torn down on every exit path:
//! replacing the file, `dispose`, or dropping the manager.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::automation::{Automate, ParamId};
use crate::decode::decode;
use crate::device::{DeviceFactory, OutputDevice};
use crate::error::{AudioError, AudioResult};
use crate::graph::{ProcessingGraph, SharedGraph};
use crate::preset::GenrePreset;
use crate::session::{AudioSession, GraphState, SessionHandle, SourceFile, SourceId};
use crate::tap::AnalysisTap;

/// Default parameter ramp window
pub const DEFAULT_RAMP_MS: u64 = 50;

/// Manager settings
#[derive(Debug, Clone, Copy)]
pub struct GraphConfig {
    /// Window for preset changes and explicit automation
    pub ramp: Duration,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            ramp: Duration::from_millis(DEFAULT_RAMP_MS),
        }
    }
}

struct ActiveSession {
    id: u64,
    source_id: SourceId,
    graph: SharedGraph,
    /// `None` while the device context is pending
    device: Option<Box<dyn OutputDevice>>,
    alive: Arc<AtomicBool>,
    state: GraphState,
    preset: Option<GenrePreset>,
}

impl ActiveSession {
    fn teardown(&mut self) {
        if self.state == GraphState::Disposed {
            return;
        }
        self.alive.store(false, Ordering::Release);
        if let Some(mut device) = self.device.take() {
            device.close();
        }
        self.graph.lock().disconnect();
        self.state = GraphState::Disposed;
        info!(source = %self.source_id.name, "session torn down");
    }

    fn open_device(
        &mut self,
        factory: &mut dyn DeviceFactory,
    ) -> AudioResult<&mut Box<dyn OutputDevice>> {
        if self.device.is_none() {
            let device = factory.open(self.graph.clone())?;
            debug!(sample_rate = device.sample_rate(), "device context created");
            self.device = Some(device);
        }
        self.device.as_mut().ok_or(AudioError::NotReady)
    }
}

impl Drop for ActiveSession {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Owns the single live preview graph
pub struct AudioGraphManager {
    factory: Box<dyn DeviceFactory>,
    session: Option<ActiveSession>,
    next_id: u64,
    config: GraphConfig,
}

impl AudioGraphManager {
    pub fn new(factory: impl DeviceFactory + 'static) -> Self {
        Self::with_config(factory, GraphConfig::default())
    }

    pub fn with_config(factory: impl DeviceFactory + 'static, config: GraphConfig) -> Self {
        Self {
            factory: Box::new(factory),
            session: None,
            next_id: 1,
            config,
        }
    }

    pub fn config(&self) -> GraphConfig {
        self.config
    }

    fn active(&self, handle: &SessionHandle) -> AudioResult<&ActiveSession> {
        match &self.session {
            Some(s) if s.id == handle.id && s.state != GraphState::Disposed => Ok(s),
            _ => Err(AudioError::NotReady),
        }
    }

    fn active_mut<'a>(
        session: &'a mut Option<ActiveSession>,
        handle: &SessionHandle,
    ) -> AudioResult<&'a mut ActiveSession> {
        match session {
            Some(s) if s.id == handle.id && s.state != GraphState::Disposed => Ok(s),
            _ => Err(AudioError::NotReady),
        }
    }

    /// Decode `source` and build its graph
    ///
    /// The same file (by name, size and mtime) returns the existing handle.
    /// A different file tears the old session down first. A device that
    /// cannot be created yet leaves the session `Ready` with the device
    /// pending; `play` retries it.
    pub fn initialize(&mut self, source: &SourceFile) -> AudioResult<SessionHandle> {
        let source_id = source.id();
        if let Some(s) = &self.session {
            if s.source_id == source_id && s.state != GraphState::Disposed {
                debug!(source = %source_id.name, "same source, keeping session");
                return Ok(SessionHandle::new(s.id, source_id));
            }
        }

        // Old graph, buffer and device go before anything new is built
        self.dispose();

        let audio = decode(source, self.factory.sample_rate())?;
        let duration = audio.duration_secs();
        let graph = ProcessingGraph::new(Arc::new(audio)).into_shared();

        let device = match self.factory.open(graph.clone()) {
            Ok(device) => Some(device),
            Err(e) => {
                warn!(error = %e, "device context pending");
                None
            }
        };

        let id = self.next_id;
        self.next_id += 1;
        self.session = Some(ActiveSession {
            id,
            source_id: source_id.clone(),
            graph,
            device,
            alive: Arc::new(AtomicBool::new(true)),
            state: GraphState::Ready,
            preset: None,
        });

        info!(source = %source_id.name, duration_s = duration, "session initialized");
        Ok(SessionHandle::new(id, source_id))
    }

    /// Ramp every preset parameter to its new value over the ramp window
    pub fn apply_preset(
        &mut self,
        handle: &SessionHandle,
        preset: &GenrePreset,
    ) -> AudioResult<()> {
        let ramp = self.config.ramp;
        let session = Self::active_mut(&mut self.session, handle)?;
        session.graph.lock().ramp_to_preset(preset, ramp);
        session.preset = Some(preset.clone());
        info!(preset = preset.name, "preset applied");
        Ok(())
    }

    /// Ramp a single parameter over the ramp window
    pub fn automate(
        &mut self,
        handle: &SessionHandle,
        param: ParamId,
        target: f64,
    ) -> AudioResult<()> {
        let ramp = self.config.ramp;
        let session = Self::active_mut(&mut self.session, handle)?;
        session.graph.lock().automate(param, target, ramp);
        Ok(())
    }

    /// Live value of a parameter at the graph clock
    pub fn param_value(&self, handle: &SessionHandle, param: ParamId) -> AudioResult<f64> {
        Ok(self.active(handle)?.graph.lock().current(param))
    }

    /// Start playback; a source that already ended starts over from zero
    pub fn play(&mut self, handle: &SessionHandle) -> AudioResult<()> {
        let session = Self::active_mut(&mut self.session, handle)?;

        {
            let mut graph = session.graph.lock();
            if graph.is_ended() {
                graph.rewind();
            }
        }

        if session.state == GraphState::Playing {
            return Ok(());
        }

        let device = session.open_device(self.factory.as_mut())?;
        device.resume()?;
        session.state = GraphState::Playing;
        debug!("playback started");
        Ok(())
    }

    pub fn pause(&mut self, handle: &SessionHandle) -> AudioResult<()> {
        let session = Self::active_mut(&mut self.session, handle)?;
        if session.state != GraphState::Playing {
            return Ok(());
        }
        if let Some(device) = session.device.as_mut() {
            device.suspend()?;
        }
        session.state = GraphState::Paused;
        debug!("playback paused");
        Ok(())
    }

    pub fn seek(&mut self, handle: &SessionHandle, seconds: f64) -> AudioResult<()> {
        let session = Self::active_mut(&mut self.session, handle)?;
        session.graph.lock().seek(seconds);
        Ok(())
    }

    /// Read-only view of the post-chain signal for metering
    pub fn tap(&self, handle: &SessionHandle) -> AudioResult<AnalysisTap> {
        let session = self.active(handle)?;
        let graph = session.graph.lock();
        Ok(AnalysisTap::new(
            graph.tap_ring(),
            session.alive.clone(),
            graph.sample_rate(),
        ))
    }

    /// Snapshot of the live session
    pub fn session(&self) -> Option<AudioSession> {
        let s = self.session.as_ref()?;
        let graph = s.graph.lock();
        Some(AudioSession {
            source_id: s.source_id.clone(),
            graph_state: s.state,
            current_preset: s.preset.clone(),
            position_s: graph.position_secs(),
            duration_s: graph.duration_secs(),
            device_pending: s.device.is_none(),
        })
    }

    /// Tear down the live session; safe to call at any time
    pub fn dispose(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.teardown();
        }
    }
}

impl Drop for AudioGraphManager {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::tests::wav_source;
    use crate::device::{OfflineDeviceFactory, OfflineDriver};
    use crate::preset::PresetCatalog;

    fn manager() -> (AudioGraphManager, OfflineDeviceFactory, OfflineDriver) {
        let factory = OfflineDeviceFactory::new(48000);
        let driver = factory.driver();
        (AudioGraphManager::new(factory.clone()), factory, driver)
    }

    #[test]
    fn test_same_source_is_noop() {
        let (mut mgr, _, driver) = manager();
        let source = wav_source("song.wav", 0.5);
        let a = mgr.initialize(&source).unwrap();
        let b = mgr.initialize(&source).unwrap();
        assert_eq!(a, b);
        assert_eq!(driver.opens(), 1);
    }

    #[test]
    fn test_new_source_replaces_session() {
        let (mut mgr, _, driver) = manager();
        let first = mgr.initialize(&wav_source("one.wav", 0.5)).unwrap();
        let tap = mgr.tap(&first).unwrap();
        assert!(tap.is_live());

        let second = mgr.initialize(&wav_source("two.wav", 0.5)).unwrap();
        assert_ne!(first, second);
        assert!(!tap.is_live());
        assert_eq!(mgr.play(&first), Err(AudioError::NotReady));
        assert!(mgr.play(&second).is_ok());
        assert_eq!(driver.opens(), 2);
        assert_eq!(mgr.session().unwrap().source_id.name, "two.wav");
    }

    #[test]
    fn test_decode_failure_leaves_no_session() {
        let (mut mgr, _, _) = manager();
        let err = mgr.initialize(&SourceFile::new("bad.mp3", vec![0x42; 2048]));
        assert!(matches!(err, Err(AudioError::Decode(_))));
        assert!(mgr.session().is_none());
    }

    #[test]
    fn test_preset_ramps_from_live_value() {
        let (mut mgr, _, mut driver) = manager();
        let handle = mgr.initialize(&wav_source("song.wav", 1.0)).unwrap();
        mgr.play(&handle).unwrap();

        let catalog = PresetCatalog::builtin();
        let pop = catalog.resolve("pop").unwrap();
        mgr.apply_preset(&handle, &pop).unwrap();

        // Nothing jumps at the moment of the call
        assert_eq!(mgr.param_value(&handle, ParamId::OutputGain).unwrap(), 1.0);

        driver.advance(Duration::from_millis(25));
        let mid = mgr.param_value(&handle, ParamId::OutputGain).unwrap();
        assert!((mid - (1.0 + pop.gain) / 2.0).abs() < 0.01, "{}", mid);

        driver.advance(Duration::from_millis(50));
        assert_eq!(mgr.param_value(&handle, ParamId::OutputGain).unwrap(), pop.gain);
        assert_eq!(mgr.session().unwrap().current_preset, Some(pop.clone()));
    }

    #[test]
    fn test_apply_preset_twice_matches_once() {
        let catalog = PresetCatalog::builtin();
        let rock = catalog.resolve("rock").unwrap();

        let run = |times: usize| {
            let (mut mgr, _, mut driver) = manager();
            let handle = mgr.initialize(&wav_source("song.wav", 1.0)).unwrap();
            mgr.play(&handle).unwrap();
            for _ in 0..times {
                mgr.apply_preset(&handle, &rock).unwrap();
            }
            driver.advance(Duration::from_millis(100));
            ParamId::ALL.map(|p| mgr.param_value(&handle, p).unwrap())
        };

        assert_eq!(run(1), run(2));
    }

    #[test]
    fn test_suspended_device_retries_on_play() {
        let (mut mgr, factory, driver) = manager();
        factory.fail_next_opens(2);

        let handle = mgr.initialize(&wav_source("song.wav", 0.5)).unwrap();
        let session = mgr.session().unwrap();
        assert_eq!(session.graph_state, GraphState::Ready);
        assert!(session.device_pending);

        let err = mgr.play(&handle).unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(mgr.session().unwrap().graph_state, GraphState::Ready);

        mgr.play(&handle).unwrap();
        assert_eq!(mgr.session().unwrap().graph_state, GraphState::Playing);
        assert!(driver.is_running());
    }

    #[test]
    fn test_play_pause_idempotent() {
        let (mut mgr, _, driver) = manager();
        let handle = mgr.initialize(&wav_source("song.wav", 0.5)).unwrap();
        mgr.play(&handle).unwrap();
        mgr.play(&handle).unwrap();
        assert!(driver.is_running());

        mgr.pause(&handle).unwrap();
        mgr.pause(&handle).unwrap();
        assert!(!driver.is_running());
        assert_eq!(mgr.session().unwrap().graph_state, GraphState::Paused);
    }

    #[test]
    fn test_play_after_end_rewinds() {
        let (mut mgr, _, mut driver) = manager();
        let handle = mgr.initialize(&wav_source("short.wav", 0.1)).unwrap();
        mgr.play(&handle).unwrap();
        driver.advance(Duration::from_millis(200));
        let s = mgr.session().unwrap();
        assert_eq!(s.position_s, s.duration_s);

        mgr.play(&handle).unwrap();
        assert_eq!(mgr.session().unwrap().position_s, 0.0);
    }

    #[test]
    fn test_dispose_is_idempotent_and_kills_tap() {
        let (mut mgr, _, driver) = manager();
        let handle = mgr.initialize(&wav_source("song.wav", 0.5)).unwrap();
        let tap = mgr.tap(&handle).unwrap();

        mgr.dispose();
        mgr.dispose();
        assert!(!tap.is_live());
        assert!(tap.snapshot().is_none());
        assert!(!driver.is_open());
        assert_eq!(mgr.play(&handle), Err(AudioError::NotReady));
        assert!(mgr.session().is_none());
    }

    #[test]
    fn test_drop_releases_device() {
        let (mut mgr, _, driver) = manager();
        let handle = mgr.initialize(&wav_source("song.wav", 0.5)).unwrap();
        let tap = mgr.tap(&handle).unwrap();
        drop(mgr);
        assert!(!tap.is_live());
        assert!(!driver.is_open());
    }

    #[test]
    fn test_tap_sees_processed_audio() {
        let (mut mgr, _, mut driver) = manager();
        let handle = mgr.initialize(&wav_source("song.wav", 1.0)).unwrap();
        let tap = mgr.tap(&handle).unwrap();
        mgr.play(&handle).unwrap();
        driver.advance(Duration::from_millis(100));

        let frame = tap.snapshot().unwrap();
        assert_eq!(frame.left.len(), crate::tap::TAP_FRAMES);
        assert!(frame.left.iter().any(|&s| s.abs() > 0.1));
    }
}
