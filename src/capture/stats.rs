use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters updated by the capture thread and the consumer
#[derive(Debug, Default)]
pub struct CaptureStats {
    /// Frames transferred from the device and queued
    pub frames_captured: AtomicU64,
    /// Frames handed to the consumer
    pub frames_delivered: AtomicU64,
    /// Frames the device reported as dropped before transfer
    pub hardware_drops: AtomicU64,
    /// Frames evicted from a full queue
    pub overflow_drops: AtomicU64,
    /// Frames released because the queue was flushing
    pub flushed_frames: AtomicU64,
    pub transfer_failures: AtomicU64,
    pub signal_losses: AtomicU64,
    pub sessions_started: AtomicU64,
    /// Sessions ended by a fatal error
    pub fatal_errors: AtomicU64,
}

impl CaptureStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add(counter: &AtomicU64, value: u64) {
        counter.fetch_add(value, Ordering::Relaxed);
    }

    pub(crate) fn increment(counter: &AtomicU64) {
        Self::add(counter, 1);
    }

    /// Get current statistics as a snapshot
    pub fn snapshot(&self) -> CaptureStatsSnapshot {
        CaptureStatsSnapshot {
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            frames_delivered: self.frames_delivered.load(Ordering::Relaxed),
            hardware_drops: self.hardware_drops.load(Ordering::Relaxed),
            overflow_drops: self.overflow_drops.load(Ordering::Relaxed),
            flushed_frames: self.flushed_frames.load(Ordering::Relaxed),
            transfer_failures: self.transfer_failures.load(Ordering::Relaxed),
            signal_losses: self.signal_losses.load(Ordering::Relaxed),
            sessions_started: self.sessions_started.load(Ordering::Relaxed),
            fatal_errors: self.fatal_errors.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of capture statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureStatsSnapshot {
    pub frames_captured: u64,
    pub frames_delivered: u64,
    pub hardware_drops: u64,
    pub overflow_drops: u64,
    pub flushed_frames: u64,
    pub transfer_failures: u64,
    pub signal_losses: u64,
    pub sessions_started: u64,
    pub fatal_errors: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let stats = CaptureStats::new();
        CaptureStats::increment(&stats.frames_captured);
        CaptureStats::increment(&stats.frames_captured);
        CaptureStats::add(&stats.hardware_drops, 3);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.frames_captured, 2);
        assert_eq!(snapshot.hardware_drops, 3);
        assert_eq!(snapshot.overflow_drops, 0);

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["hardware_drops"], 3);
    }
}
