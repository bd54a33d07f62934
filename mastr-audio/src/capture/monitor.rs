//! Monitor outputs: let the user hear an export while it renders

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use tracing::{debug, error, warn};

use crate::error::{AudioError, AudioResult};

/// Playback side of the capture dual tap
pub trait MonitorOutput {
    fn start(&mut self) -> AudioResult<()>;

    /// Queue stereo interleaved frames; frames that do not fit are dropped
    fn push(&mut self, samples: &[f32]);

    fn stop(&mut self);
}

/// Creates a monitor per export
pub trait MonitorFactory: Send + Sync {
    fn create(&self, sample_rate: u32, gain: f32) -> AudioResult<Box<dyn MonitorOutput>>;
}

/// Discards everything; used for headless exports
#[derive(Debug, Clone, Copy, Default)]
pub struct NullMonitorFactory;

impl MonitorFactory for NullMonitorFactory {
    fn create(&self, _sample_rate: u32, _gain: f32) -> AudioResult<Box<dyn MonitorOutput>> {
        Ok(Box::new(NullMonitor))
    }
}

struct NullMonitor;

impl MonitorOutput for NullMonitor {
    fn start(&mut self) -> AudioResult<()> {
        Ok(())
    }

    fn push(&mut self, _samples: &[f32]) {}

    fn stop(&mut self) {}
}

/// Default output device via cpal, fed through a ring buffer
#[derive(Debug, Clone, Copy)]
pub struct CpalMonitorFactory {
    /// Ring capacity in seconds of stereo audio
    pub buffer_secs: f32,
}

impl Default for CpalMonitorFactory {
    fn default() -> Self {
        Self { buffer_secs: 1.0 }
    }
}

impl MonitorFactory for CpalMonitorFactory {
    fn create(&self, sample_rate: u32, gain: f32) -> AudioResult<Box<dyn MonitorOutput>> {
        let capacity = ((sample_rate as f32 * self.buffer_secs) as usize).max(1024) * 2;
        let (producer, mut consumer) = HeapRb::<f32>::new(capacity).split();

        let device = cpal::default_host()
            .default_output_device()
            .ok_or_else(|| AudioError::PlaybackStartFailed("no audio output device found".into()))?;
        let config = device
            .default_output_config()
            .map_err(|e| AudioError::PlaybackStartFailed(e.to_string()))?;
        if config.sample_rate().0 != sample_rate {
            warn!(
                device_rate = config.sample_rate().0,
                export_rate = sample_rate,
                "monitor plays at the device rate; pitch will differ"
            );
        }
        let channels = config.channels() as usize;

        let stream = device
            .build_output_stream(
                &config.into(),
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    fill_from_ring(&mut consumer, data, channels);
                },
                |err| {
                    error!("monitor stream error: {}", err);
                },
                None,
            )
            .map_err(|e| AudioError::PlaybackStartFailed(e.to_string()))?;

        Ok(Box::new(CpalMonitor {
            stream: Some(stream),
            producer,
            gain,
            scratch: Vec::new(),
        }))
    }
}

fn fill_from_ring(consumer: &mut HeapCons<f32>, data: &mut [f32], channels: usize) {
    if channels == 2 {
        let read = consumer.pop_slice(data);
        data[read..].fill(0.0);
        return;
    }
    for frame in data.chunks_exact_mut(channels) {
        let l = consumer.try_pop().unwrap_or(0.0);
        let r = consumer.try_pop().unwrap_or(0.0);
        if channels == 1 {
            frame[0] = (l + r) * 0.5;
        } else {
            frame[0] = l;
            frame[1] = r;
            frame[2..].fill(0.0);
        }
    }
}

struct CpalMonitor {
    stream: Option<cpal::Stream>,
    producer: HeapProd<f32>,
    gain: f32,
    scratch: Vec<f32>,
}

impl MonitorOutput for CpalMonitor {
    fn start(&mut self) -> AudioResult<()> {
        let stream = self
            .stream
            .as_ref()
            .ok_or_else(|| AudioError::PlaybackStartFailed("monitor already stopped".into()))?;
        stream
            .play()
            .map_err(|e| AudioError::PlaybackStartFailed(e.to_string()))?;
        debug!(gain = self.gain, "monitor started");
        Ok(())
    }

    fn push(&mut self, samples: &[f32]) {
        // Muted monitors leave the ring empty; the callback plays silence
        if self.gain <= 0.0 {
            return;
        }
        self.scratch.clear();
        self.scratch.extend(samples.iter().map(|s| s * self.gain));
        self.producer.push_slice(&self.scratch);
    }

    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.pause();
        }
    }
}

impl Drop for CpalMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_from_ring_pads_with_silence() {
        let (mut producer, mut consumer) = HeapRb::<f32>::new(16).split();
        producer.push_slice(&[0.5, -0.5]);

        let mut data = vec![1.0f32; 6];
        fill_from_ring(&mut consumer, &mut data, 2);
        assert_eq!(data, vec![0.5, -0.5, 0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_fill_from_ring_downmixes_mono() {
        let (mut producer, mut consumer) = HeapRb::<f32>::new(16).split();
        producer.push_slice(&[0.5, 0.25, 1.0, 0.0]);

        let mut data = vec![9.0f32; 3];
        fill_from_ring(&mut consumer, &mut data, 1);
        assert_eq!(data, vec![0.375, 0.5, 0.0]);
    }
}
