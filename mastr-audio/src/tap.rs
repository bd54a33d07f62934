//! Post-chain analysis tap
//!
//! The render path writes every output frame into a small ring; meters take
//! read-only snapshots of the most recent frames. Nothing on this side can
//! touch the graph.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Frames retained for analysis
pub const TAP_FRAMES: usize = 2048;

/// Planar copy of the most recent tap frames, oldest first
#[derive(Debug, Clone, Default)]
pub struct TapFrame {
    pub left: Vec<f32>,
    pub right: Vec<f32>,
    pub sample_rate: u32,
}

/// Stereo ring buffer written by the render path
pub(crate) struct TapRing {
    left: Vec<f32>,
    right: Vec<f32>,
    write_pos: usize,
    len: usize,
}

impl TapRing {
    fn new(capacity: usize) -> Self {
        Self {
            left: vec![0.0; capacity],
            right: vec![0.0; capacity],
            write_pos: 0,
            len: 0,
        }
    }

    fn push_interleaved(&mut self, samples: &[f32]) {
        let capacity = self.left.len();
        for frame in samples.chunks_exact(2) {
            self.left[self.write_pos] = frame[0];
            self.right[self.write_pos] = frame[1];
            self.write_pos = (self.write_pos + 1) % capacity;
            if self.len < capacity {
                self.len += 1;
            }
        }
    }

    fn copy_into(&self, frame: &mut TapFrame) {
        let capacity = self.left.len();
        let start = (self.write_pos + capacity - self.len) % capacity;
        frame.left.clear();
        frame.right.clear();
        for i in 0..self.len {
            let idx = (start + i) % capacity;
            frame.left.push(self.left[idx]);
            frame.right.push(self.right[idx]);
        }
    }

    fn clear(&mut self) {
        self.left.fill(0.0);
        self.right.fill(0.0);
        self.write_pos = 0;
        self.len = 0;
    }
}

/// Writer half, owned by the graph
pub(crate) struct TapWriter {
    ring: Arc<Mutex<TapRing>>,
}

impl TapWriter {
    pub(crate) fn new(capacity: usize) -> (Self, Arc<Mutex<TapRing>>) {
        let ring = Arc::new(Mutex::new(TapRing::new(capacity)));
        (Self { ring: ring.clone() }, ring)
    }

    /// Called from the render path; skips the write rather than block
    pub(crate) fn write(&self, samples: &[f32]) {
        if let Some(mut ring) = self.ring.try_lock() {
            ring.push_interleaved(samples);
        }
    }

    pub(crate) fn clear(&self) {
        self.ring.lock().clear();
    }
}

/// Read-only view of the post-chain signal
///
/// Becomes dead once the owning session is disposed; readers check
/// [`AnalysisTap::is_live`] before each read.
#[derive(Clone)]
pub struct AnalysisTap {
    ring: Arc<Mutex<TapRing>>,
    alive: Arc<AtomicBool>,
    sample_rate: u32,
}

impl AnalysisTap {
    pub(crate) fn new(ring: Arc<Mutex<TapRing>>, alive: Arc<AtomicBool>, sample_rate: u32) -> Self {
        Self {
            ring,
            alive,
            sample_rate,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn is_live(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Snapshot the most recent frames, or `None` once disposed
    pub fn snapshot(&self) -> Option<TapFrame> {
        let mut frame = TapFrame::default();
        self.snapshot_into(&mut frame).then_some(frame)
    }

    /// Snapshot into a reusable buffer; returns false once disposed
    pub fn snapshot_into(&self, frame: &mut TapFrame) -> bool {
        if !self.is_live() {
            return false;
        }
        frame.sample_rate = self.sample_rate;
        self.ring.lock().copy_into(frame);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tap_with(capacity: usize) -> (TapWriter, AnalysisTap, Arc<AtomicBool>) {
        let (writer, ring) = TapWriter::new(capacity);
        let alive = Arc::new(AtomicBool::new(true));
        let tap = AnalysisTap::new(ring, alive.clone(), 48000);
        (writer, tap, alive)
    }

    #[test]
    fn test_snapshot_is_oldest_first() {
        let (writer, tap, _) = tap_with(4);
        writer.write(&[1.0, -1.0, 2.0, -2.0, 3.0, -3.0]);
        let frame = tap.snapshot().unwrap();
        assert_eq!(frame.left, vec![1.0, 2.0, 3.0]);
        assert_eq!(frame.right, vec![-1.0, -2.0, -3.0]);

        writer.write(&[4.0, -4.0, 5.0, -5.0, 6.0, -6.0]);
        let frame = tap.snapshot().unwrap();
        assert_eq!(frame.left, vec![3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_dead_tap_yields_nothing() {
        let (writer, tap, alive) = tap_with(4);
        writer.write(&[1.0, 1.0]);
        alive.store(false, Ordering::Release);
        assert!(!tap.is_live());
        assert!(tap.snapshot().is_none());
    }

    #[test]
    fn test_clear_empties_ring() {
        let (writer, tap, _) = tap_with(4);
        writer.write(&[1.0, 1.0, 2.0, 2.0]);
        writer.clear();
        assert!(tap.snapshot().unwrap().left.is_empty());
    }
}
