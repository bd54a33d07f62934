//! Live metering loop
//!
//! A dedicated thread reads the analysis tap at a fixed cadence, computes a
//! reading and runs it through the hold state. Ticks never overlap. The loop
//! ends when its handle is dropped or the tap goes dead.

use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, select, tick, Receiver, Sender, TrySendError};
use mastr_analysis::{
    LiveMeter, MeterHoldState, MeterReading, DEFAULT_HOLD_MS, DEFAULT_WINDOW_TICKS,
};
use tracing::{debug, trace};

use crate::tap::{AnalysisTap, TapFrame};

/// Default tick interval
pub const DEFAULT_METER_INTERVAL_MS: u64 = 100;

/// Event buffer; readings are dropped rather than queued behind a slow consumer
const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy)]
pub struct MeterConfig {
    pub interval: Duration,
    /// Ticks in the smoothed loudness window
    pub window_ticks: usize,
    pub hold_ms: u64,
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(DEFAULT_METER_INTERVAL_MS),
            window_ticks: DEFAULT_WINDOW_TICKS,
            hold_ms: DEFAULT_HOLD_MS,
        }
    }
}

/// Events from the metering thread
#[derive(Debug, Clone, PartialEq)]
pub enum MeterEvent {
    Reading {
        /// This tick's values
        live: MeterReading,
        /// Values after peak hold
        displayed: MeterReading,
        /// Milliseconds since the loop started
        at_ms: u64,
    },
    /// The tap went dead; no further events follow
    Stopped,
}

/// One meter tick, independent of any thread or timer
pub struct MeterTicker {
    meter: LiveMeter,
    hold: MeterHoldState,
    frame: TapFrame,
}

impl MeterTicker {
    pub fn new(config: &MeterConfig) -> Self {
        Self {
            meter: LiveMeter::new(config.window_ticks),
            hold: MeterHoldState::new(config.hold_ms),
            frame: TapFrame::default(),
        }
    }

    /// Read the tap and produce `(live, displayed)`; `None` once the tap is dead
    pub fn tick(&mut self, tap: &AnalysisTap, now_ms: u64) -> Option<(MeterReading, MeterReading)> {
        if !tap.snapshot_into(&mut self.frame) {
            return None;
        }
        let live = self.meter.measure(&self.frame.left, &self.frame.right);
        let displayed = self.hold.update(&live, now_ms);
        Some((live, displayed))
    }

    pub fn hold(&self) -> &MeterHoldState {
        &self.hold
    }
}

/// Handle to a running metering thread; stops the thread on drop
pub struct MeterLoop {
    events: Receiver<MeterEvent>,
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl MeterLoop {
    pub fn spawn(tap: AnalysisTap, config: MeterConfig) -> Self {
        let (event_tx, event_rx) = bounded(EVENT_CAPACITY);
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let handle = thread::spawn(move || run_meter_loop(tap, config, event_tx, stop_rx));

        Self {
            events: event_rx,
            stop: Some(stop_tx),
            handle: Some(handle),
        }
    }

    pub fn events(&self) -> &Receiver<MeterEvent> {
        &self.events
    }

    /// Stop the thread and wait for it
    pub fn stop(&mut self) {
        // Disconnecting the stop channel wakes the select
        self.stop.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for MeterLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_meter_loop(
    tap: AnalysisTap,
    config: MeterConfig,
    events: Sender<MeterEvent>,
    stop: Receiver<()>,
) {
    let ticker = tick(config.interval);
    let started = Instant::now();
    let mut meter = MeterTicker::new(&config);
    debug!(interval_ms = config.interval.as_millis() as u64, "metering started");

    loop {
        select! {
            recv(ticker) -> _ => {
                let now_ms = started.elapsed().as_millis() as u64;
                let Some((live, displayed)) = meter.tick(&tap, now_ms) else {
                    // Deliver the final event unless the handle goes away first
                    select! {
                        send(events, MeterEvent::Stopped) -> _ => {}
                        recv(stop) -> _ => {}
                    }
                    debug!("tap disposed, metering stopped");
                    return;
                };
                match events.try_send(MeterEvent::Reading { live, displayed, at_ms: now_ms }) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => trace!("meter consumer lagging, reading dropped"),
                    Err(TrySendError::Disconnected(_)) => return,
                }
            }
            recv(stop) -> _ => {
                debug!("metering stopped by handle");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::tests::wav_source;
    use crate::device::OfflineDeviceFactory;
    use crate::manager::AudioGraphManager;

    #[test]
    fn test_ticker_reads_playing_graph() {
        let factory = OfflineDeviceFactory::new(48000);
        let mut driver = factory.driver();
        let mut mgr = AudioGraphManager::new(factory);
        let handle = mgr.initialize(&wav_source("song.wav", 1.0)).unwrap();
        let tap = mgr.tap(&handle).unwrap();
        let mut ticker = MeterTicker::new(&MeterConfig::default());

        // Nothing rendered yet
        let (live, _) = ticker.tick(&tap, 0).unwrap();
        assert_eq!(live.peak_db, -70.0);

        mgr.play(&handle).unwrap();
        driver.advance(Duration::from_millis(100));
        let (live, displayed) = ticker.tick(&tap, 100).unwrap();
        // 0.5 amplitude sine, identical channels
        assert!((live.peak_db + 6.02).abs() < 0.2, "{}", live.peak_db);
        assert!((live.stereo_correlation - 1.0).abs() < 1e-6);
        assert_eq!(displayed.peak_db, live.peak_db);

        mgr.dispose();
        assert!(ticker.tick(&tap, 200).is_none());
    }

    #[test]
    fn test_loop_emits_readings_then_stops_on_dispose() {
        let factory = OfflineDeviceFactory::new(48000);
        let mut mgr = AudioGraphManager::new(factory);
        let handle = mgr.initialize(&wav_source("song.wav", 0.5)).unwrap();
        let tap = mgr.tap(&handle).unwrap();

        let config = MeterConfig {
            interval: Duration::from_millis(5),
            ..MeterConfig::default()
        };
        let meter = MeterLoop::spawn(tap, config);
        let first = meter.events().recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(matches!(first, MeterEvent::Reading { .. }));

        mgr.dispose();
        let stopped = meter
            .events()
            .iter()
            .find(|e| *e == MeterEvent::Stopped);
        assert_eq!(stopped, Some(MeterEvent::Stopped));
    }

    #[test]
    fn test_drop_joins_thread() {
        let factory = OfflineDeviceFactory::new(48000);
        let mut mgr = AudioGraphManager::new(factory);
        let handle = mgr.initialize(&wav_source("song.wav", 0.5)).unwrap();
        let meter = MeterLoop::spawn(mgr.tap(&handle).unwrap(), MeterConfig::default());
        drop(meter);
        // Session still live; only the loop went away
        assert!(mgr.tap(&handle).unwrap().is_live());
    }
}
