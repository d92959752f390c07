//! Pipeline clock abstraction and capture timestamp computation.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Nanoseconds of clock or running time.
pub type ClockTime = u64;

pub const SECOND: ClockTime = 1_000_000_000;

/// `val * num / denom` without intermediate overflow, rounded down.
pub fn scale(val: u64, num: u64, denom: u64) -> u64 {
    if denom == 0 {
        return 0;
    }
    let result = (val as u128 * num as u128) / denom as u128;
    result.min(u64::MAX as u128) as u64
}

/// `val * num / denom` without intermediate overflow, rounded up.
pub fn scale_ceil(val: u64, num: u64, denom: u64) -> u64 {
    if denom == 0 {
        return 0;
    }
    let product = val as u128 * num as u128;
    let result = (product + denom as u128 - 1) / denom as u128;
    result.min(u64::MAX as u128) as u64
}

/// Source of the pipeline clock and the host wall clock.
pub trait ClockSource: Send + Sync {
    /// Current pipeline clock time in nanoseconds.
    fn pipeline_time(&self) -> ClockTime;

    /// Current host wall-clock time in microseconds since the Unix epoch.
    fn wall_time_us(&self) -> i64;
}

/// Monotonic pipeline clock started at construction, plus the system wall clock.
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockSource for SystemClock {
    fn pipeline_time(&self) -> ClockTime {
        self.origin.elapsed().as_nanos().min(u64::MAX as u128) as u64
    }

    fn wall_time_us(&self) -> i64 {
        wall_clock_us()
    }
}

/// Host wall-clock time in microseconds since the Unix epoch.
pub fn wall_clock_us() -> i64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(elapsed) => elapsed.as_micros() as i64,
        Err(_) => 0,
    }
}

/// Running-time timestamp of a captured frame.
///
/// `frame_time` is the hardware capture time of the frame in 100 ns ticks on
/// the wall-clock timeline, `wall_now_us` the wall clock read right after the
/// transfer and `pipeline_now` the pipeline clock read at the same moment.
/// When the frame lies in the past the age of the frame is subtracted from
/// the pipeline clock, then the result is made relative to `base_time`. All
/// subtractions saturate at zero.
pub fn compute_timestamp(
    pipeline_now: ClockTime,
    wall_now_us: i64,
    frame_time: i64,
    base_time: ClockTime,
) -> ClockTime {
    let mut now = pipeline_now;

    if wall_now_us.saturating_mul(10) > frame_time {
        let age = (wall_now_us as i128 * 1000 - frame_time as i128 * 100).max(0);
        let age = age.min(u64::MAX as i128) as u64;
        now = now.saturating_sub(age);
    }

    now.saturating_sub(base_time)
}
