//! Hardware dropped-frame accounting and signal presence tracking.

use tracing::trace;

use crate::clock::ClockTime;
use crate::format::FormatInfo;

/// Run of frames the device dropped between two status polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DroppedRange {
    pub timestamp: ClockTime,
    pub duration: ClockTime,
    pub frames: u64,
}

/// Tracks the cumulative dropped-frame counter of the transfer engine.
#[derive(Debug, Default)]
pub struct DroppedFrameAccounting {
    last_dropped: Option<u64>,
}

impl DroppedFrameAccounting {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget the baseline; the next observation records a new one.
    pub fn reset(&mut self) {
        self.last_dropped = None;
    }

    pub fn baseline(&self) -> Option<u64> {
        self.last_dropped
    }

    /// Compare a status poll against the baseline.
    ///
    /// Returns the dropped span `[(processed + last) * dur, (processed + dropped) * dur)`
    /// when the counter increased.
    pub fn observe(&mut self, processed: u64, dropped: u64, info: &FormatInfo) -> Option<DroppedRange> {
        let last = match self.last_dropped {
            None => {
                trace!("Dropped frame baseline {}", dropped);
                self.last_dropped = Some(dropped);
                return None;
            }
            Some(last) => last,
        };

        self.last_dropped = Some(dropped);
        if dropped <= last {
            return None;
        }

        let start = info.frames_to_time(processed + last);
        let end = info.frames_to_time(processed + dropped);
        Some(DroppedRange {
            timestamp: start,
            duration: end - start,
            frames: dropped - last,
        })
    }
}

/// Found/lost state of the input signal, reporting edges only.
#[derive(Debug)]
pub struct SignalMonitor {
    have_signal: bool,
}

impl SignalMonitor {
    pub fn new() -> Self {
        Self { have_signal: true }
    }

    pub fn has_signal(&self) -> bool {
        self.have_signal
    }

    /// Record a missing or mismatched signal; true on the found → lost edge.
    pub fn lost(&mut self) -> bool {
        std::mem::replace(&mut self.have_signal, false)
    }

    /// Record a good signal; true on the lost → found edge.
    pub fn found(&mut self) -> bool {
        !std::mem::replace(&mut self.have_signal, true)
    }
}

impl Default for SignalMonitor {
    fn default() -> Self {
        Self::new()
    }
}
