//! Capture job state machine
//!
//! ```text
//! Idle → Recording → Finalizing → Complete
//!                              ↘ TimedOut
//! any non-terminal state → Failed
//! ```

use std::time::Duration;

use tracing::debug;

/// Lifecycle of one capture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureStatus {
    Idle,
    Recording,
    Finalizing,
    Complete,
    Failed,
    /// Safety deadline hit; output is partial
    TimedOut,
}

impl CaptureStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CaptureStatus::Complete | CaptureStatus::Failed | CaptureStatus::TimedOut
        )
    }
}

/// Header and chunks collected for one capture, plus its status
#[derive(Debug)]
pub struct CaptureJob {
    status: CaptureStatus,
    header: Vec<u8>,
    chunks: Vec<Vec<u8>>,
    total_bytes: usize,
    deadline: Duration,
    timed_out: bool,
}

impl Default for CaptureJob {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureJob {
    pub fn new() -> Self {
        Self {
            status: CaptureStatus::Idle,
            header: Vec::new(),
            chunks: Vec::new(),
            total_bytes: 0,
            deadline: Duration::ZERO,
            timed_out: false,
        }
    }

    pub fn status(&self) -> CaptureStatus {
        self.status
    }

    /// Encoded chunks so far; the header is not counted
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    pub fn header(&self) -> &[u8] {
        &self.header
    }

    pub fn chunks(&self) -> &[Vec<u8>] {
        &self.chunks
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Idle → Recording; `deadline` is measured from the capture start
    pub fn start(&mut self, header: Vec<u8>, deadline: Duration) -> bool {
        if self.status != CaptureStatus::Idle {
            return false;
        }
        self.header = header;
        self.deadline = deadline;
        self.status = CaptureStatus::Recording;
        true
    }

    /// Append a chunk while recording; empty chunks are ignored
    pub fn push_chunk(&mut self, chunk: Vec<u8>) -> bool {
        if self.status != CaptureStatus::Recording || chunk.is_empty() {
            return false;
        }
        self.total_bytes += chunk.len();
        self.chunks.push(chunk);
        true
    }

    pub fn is_past_deadline(&self, elapsed: Duration) -> bool {
        elapsed >= self.deadline
    }

    /// Recording → Finalizing
    pub fn begin_finalize(&mut self, timed_out: bool) -> bool {
        if self.status != CaptureStatus::Recording {
            return false;
        }
        self.timed_out = timed_out;
        self.status = CaptureStatus::Finalizing;
        true
    }

    /// Finalizing → Complete or TimedOut
    pub fn finish(&mut self) -> CaptureStatus {
        if self.status == CaptureStatus::Finalizing {
            self.status = if self.timed_out {
                CaptureStatus::TimedOut
            } else {
                CaptureStatus::Complete
            };
            debug!(status = ?self.status, chunks = self.chunks.len(), "capture finished");
        }
        self.status
    }

    pub fn fail(&mut self) {
        if !self.status.is_terminal() {
            self.status = CaptureStatus::Failed;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let mut job = CaptureJob::new();
        assert!(!job.push_chunk(vec![1]));
        assert!(job.start(vec![0; 44], Duration::from_secs(15)));
        assert!(job.push_chunk(vec![1, 2]));
        assert!(!job.push_chunk(Vec::new()));
        assert!(job.push_chunk(vec![3]));
        assert_eq!(job.chunk_count(), 2);
        assert_eq!(job.total_bytes(), 3);

        assert!(job.begin_finalize(false));
        assert!(!job.push_chunk(vec![4]));
        assert_eq!(job.finish(), CaptureStatus::Complete);
    }

    #[test]
    fn test_timeout_path() {
        let mut job = CaptureJob::new();
        job.start(Vec::new(), Duration::from_secs(1));
        assert!(!job.is_past_deadline(Duration::from_millis(999)));
        assert!(job.is_past_deadline(Duration::from_secs(1)));
        job.begin_finalize(true);
        assert_eq!(job.finish(), CaptureStatus::TimedOut);
    }

    #[test]
    fn test_fail_is_sticky_only_before_terminal() {
        let mut job = CaptureJob::new();
        job.start(Vec::new(), Duration::from_secs(1));
        job.fail();
        assert_eq!(job.status(), CaptureStatus::Failed);
        assert!(!job.begin_finalize(false));

        let mut done = CaptureJob::new();
        done.start(Vec::new(), Duration::from_secs(1));
        done.begin_finalize(false);
        done.finish();
        done.fail();
        assert_eq!(done.status(), CaptureStatus::Complete);
    }
}
