//! Output device backends
//!
//! A device pulls rendered frames out of a [`SharedGraph`]. The cpal backend
//! does so from the driver's callback thread; the offline backend renders on
//! demand so tests can drive the graph clock deterministically.

use std::sync::Arc;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::error::{AudioError, AudioResult};
use crate::graph::SharedGraph;

/// Default rate when no device can be queried
pub const FALLBACK_SAMPLE_RATE: u32 = 48000;

/// An open device context bound to one graph
pub trait OutputDevice {
    fn sample_rate(&self) -> u32;

    /// Start or continue pulling audio
    fn resume(&mut self) -> AudioResult<()>;

    fn suspend(&mut self) -> AudioResult<()>;

    /// Release the context; safe to call more than once
    fn close(&mut self);
}

/// Creates device contexts
pub trait DeviceFactory {
    /// Rate sources are decoded to before a device is opened
    fn sample_rate(&self) -> u32;

    /// Open a suspended device for `graph`
    fn open(&mut self, graph: SharedGraph) -> AudioResult<Box<dyn OutputDevice>>;
}

// ─────────────────────────────────────────────────────────────
// cpal
// ─────────────────────────────────────────────────────────────

/// Default output device via cpal
pub struct CpalDeviceFactory {
    sample_rate: u32,
}

impl Default for CpalDeviceFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl CpalDeviceFactory {
    pub fn new() -> Self {
        let sample_rate = cpal::default_host()
            .default_output_device()
            .and_then(|d| d.default_output_config().ok())
            .map(|c| c.sample_rate().0)
            .unwrap_or(FALLBACK_SAMPLE_RATE);
        Self { sample_rate }
    }
}

impl DeviceFactory for CpalDeviceFactory {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn open(&mut self, graph: SharedGraph) -> AudioResult<Box<dyn OutputDevice>> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| AudioError::DeviceSuspended("no audio output device found".into()))?;
        let config = device
            .default_output_config()
            .map_err(|e| {
                AudioError::DeviceSuspended(format!("failed to get audio config: {}", e))
            })?;

        let sample_rate = config.sample_rate().0;
        if sample_rate != self.sample_rate {
            warn!(
                device_rate = sample_rate,
                decoded_rate = self.sample_rate,
                "device rate changed since decode"
            );
        }
        let channels = config.channels() as usize;

        // Pre-allocated stereo scratch for non-stereo devices
        let mut scratch = vec![0.0f32; 16384];

        let stream = device
            .build_output_stream(
                &config.into(),
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    // Never block the real-time thread; silence on contention
                    let Some(mut state) = graph.try_lock() else {
                        data.fill(0.0);
                        return;
                    };
                    if channels == 2 {
                        state.render(data);
                        return;
                    }
                    let max_frames = scratch.len() / 2;
                    for out in data.chunks_mut(max_frames * channels) {
                        let frames = out.len() / channels;
                        let stereo = &mut scratch[..frames * 2];
                        state.render(stereo);
                        let pairs = out.chunks_exact_mut(channels).zip(stereo.chunks_exact(2));
                        for (frame, src) in pairs {
                            if channels == 1 {
                                frame[0] = (src[0] + src[1]) * 0.5;
                            } else {
                                frame[0] = src[0];
                                frame[1] = src[1];
                                frame[2..].fill(0.0);
                            }
                        }
                    }
                },
                |err| {
                    error!("audio stream error: {}", err);
                },
                None,
            )
            .map_err(|e| {
                AudioError::DeviceSuspended(format!("failed to create audio stream: {}", e))
            })?;

        // Some hosts start streams immediately
        let _ = stream.pause();

        debug!(sample_rate, channels, "cpal output stream opened");
        Ok(Box::new(CpalDevice {
            stream: Some(stream),
            sample_rate,
        }))
    }
}

struct CpalDevice {
    stream: Option<cpal::Stream>,
    sample_rate: u32,
}

impl OutputDevice for CpalDevice {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn resume(&mut self) -> AudioResult<()> {
        let stream = self.stream.as_ref().ok_or(AudioError::NotReady)?;
        stream
            .play()
            .map_err(|e| AudioError::DeviceSuspended(format!("failed to start audio: {}", e)))
    }

    fn suspend(&mut self) -> AudioResult<()> {
        let stream = self.stream.as_ref().ok_or(AudioError::NotReady)?;
        stream
            .pause()
            .map_err(|e| AudioError::DeviceSuspended(format!("failed to pause audio: {}", e)))
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.pause();
            debug!("cpal output stream closed");
        }
    }
}

impl Drop for CpalDevice {
    fn drop(&mut self) {
        self.close();
    }
}

// ─────────────────────────────────────────────────────────────
// Offline
// ─────────────────────────────────────────────────────────────

#[derive(Default)]
struct OfflineShared {
    graph: Option<SharedGraph>,
    running: bool,
    failures_left: u32,
    opens: u32,
}

/// Headless backend; audio only advances when the driver says so
#[derive(Clone)]
pub struct OfflineDeviceFactory {
    sample_rate: u32,
    shared: Arc<Mutex<OfflineShared>>,
}

impl OfflineDeviceFactory {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            shared: Arc::new(Mutex::new(OfflineShared::default())),
        }
    }

    /// Handle that renders the currently open device
    pub fn driver(&self) -> OfflineDriver {
        OfflineDriver {
            shared: self.shared.clone(),
            sample_rate: self.sample_rate,
            buffer: Vec::new(),
        }
    }

    /// Make the next `n` opens fail with `DeviceSuspended`
    pub fn fail_next_opens(&self, n: u32) {
        self.shared.lock().failures_left = n;
    }
}

impl DeviceFactory for OfflineDeviceFactory {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn open(&mut self, graph: SharedGraph) -> AudioResult<Box<dyn OutputDevice>> {
        let mut shared = self.shared.lock();
        if shared.failures_left > 0 {
            shared.failures_left -= 1;
            return Err(AudioError::DeviceSuspended(
                "offline device not allowed to start yet".into(),
            ));
        }
        shared.graph = Some(graph);
        shared.running = false;
        shared.opens += 1;
        Ok(Box::new(OfflineDevice {
            shared: self.shared.clone(),
            sample_rate: self.sample_rate,
        }))
    }
}

struct OfflineDevice {
    shared: Arc<Mutex<OfflineShared>>,
    sample_rate: u32,
}

impl OutputDevice for OfflineDevice {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn resume(&mut self) -> AudioResult<()> {
        self.shared.lock().running = true;
        Ok(())
    }

    fn suspend(&mut self) -> AudioResult<()> {
        self.shared.lock().running = false;
        Ok(())
    }

    fn close(&mut self) {
        let mut shared = self.shared.lock();
        shared.graph = None;
        shared.running = false;
    }
}

/// Drives the offline device in place of a driver callback
pub struct OfflineDriver {
    shared: Arc<Mutex<OfflineShared>>,
    sample_rate: u32,
    buffer: Vec<f32>,
}

impl OfflineDriver {
    /// Block size of one simulated callback
    pub const BLOCK_FRAMES: usize = 512;

    /// Render `duration` of audio if the device is running; returns frames
    /// rendered
    pub fn advance(&mut self, duration: Duration) -> usize {
        let graph = {
            let shared = self.shared.lock();
            match (&shared.graph, shared.running) {
                (Some(graph), true) => graph.clone(),
                _ => return 0,
            }
        };

        let total = (duration.as_secs_f64() * self.sample_rate as f64).round() as usize;
        let mut done = 0;
        while done < total {
            let frames = (total - done).min(Self::BLOCK_FRAMES);
            self.buffer.resize(frames * 2, 0.0);
            graph.lock().render(&mut self.buffer);
            done += frames;
        }
        done
    }

    /// Last rendered block, stereo interleaved
    pub fn last_block(&self) -> &[f32] {
        &self.buffer
    }

    pub fn is_open(&self) -> bool {
        self.shared.lock().graph.is_some()
    }

    pub fn is_running(&self) -> bool {
        self.shared.lock().running
    }

    /// Successful opens so far
    pub fn opens(&self) -> u32 {
        self.shared.lock().opens
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::DecodedAudio;
    use crate::graph::ProcessingGraph;

    fn graph() -> SharedGraph {
        ProcessingGraph::new(Arc::new(DecodedAudio::new(vec![0.25; 96000], 48000))).into_shared()
    }

    #[test]
    fn test_offline_renders_only_while_running() {
        let mut factory = OfflineDeviceFactory::new(48000);
        let mut driver = factory.driver();
        let shared = graph();
        let mut device = factory.open(shared.clone()).unwrap();

        assert_eq!(driver.advance(Duration::from_millis(10)), 0);
        device.resume().unwrap();
        assert_eq!(driver.advance(Duration::from_millis(10)), 480);
        assert_eq!(shared.lock().clock_frames(), 480);

        device.suspend().unwrap();
        assert_eq!(driver.advance(Duration::from_millis(10)), 0);

        device.close();
        assert!(!driver.is_open());
    }

    #[test]
    fn test_scripted_open_failures() {
        let mut factory = OfflineDeviceFactory::new(48000);
        factory.fail_next_opens(1);
        assert!(matches!(
            factory.open(graph()),
            Err(AudioError::DeviceSuspended(_))
        ));
        assert!(factory.open(graph()).is_ok());
        assert_eq!(factory.driver().opens(), 1);
    }
}
