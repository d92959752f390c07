//! Bounded drop-oldest frame queue shared by the capture thread, the control
//! thread and consumers.
//!
//! A single mutex protects the queue together with the `playing`,
//! `shutdown` and `flushing` flags; a single condition variable wakes every
//! waiter on any change, and every waiter re-checks its own predicate.

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::VecDeque;
use thiserror::Error;
use tracing::{debug, trace};

use crate::clock::ClockTime;
use crate::frame::FrameItem;

/// Frame evicted from a full queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DroppedFrame {
    pub timestamp: ClockTime,
    pub duration: ClockTime,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("queue is flushing")]
pub struct Flushing;

/// FIFO of captured frames with drop-oldest overflow.
#[derive(Debug)]
pub struct FrameQueue {
    items: VecDeque<FrameItem>,
    capacity: usize,
    frame_duration: ClockTime,
}

impl FrameQueue {
    pub fn new(capacity: usize, frame_duration: ClockTime) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
            frame_duration,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Append `item`, evicting and releasing the oldest item when full.
    pub fn push(&mut self, item: FrameItem) -> Option<DroppedFrame> {
        let dropped = if self.items.len() >= self.capacity {
            self.items.pop_front().map(|old| DroppedFrame {
                timestamp: old.capture_time,
                duration: self.frame_duration,
            })
        } else {
            None
        };

        self.items.push_back(item);
        dropped
    }

    pub fn pop(&mut self) -> Option<FrameItem> {
        self.items.pop_front()
    }

    /// Release every queued frame, returning how many there were.
    pub fn drain_and_release(&mut self) -> usize {
        let count = self.items.len();
        self.items.clear();
        count
    }

    /// Capture timestamps of the queued frames, oldest first.
    pub fn timestamps(&self) -> Vec<ClockTime> {
        self.items.iter().map(|item| item.capture_time).collect()
    }

    /// Change capacity and nominal frame duration; the queue must be empty.
    fn reconfigure(&mut self, capacity: usize, frame_duration: ClockTime) {
        debug_assert!(self.items.is_empty());
        self.capacity = capacity.max(1);
        self.frame_duration = frame_duration;
    }
}

/// Everything guarded by the queue mutex.
#[derive(Debug)]
pub struct ControlState {
    pub queue: FrameQueue,
    pub playing: bool,
    /// Bumped every time `playing` is set, so a pause/play pair is never missed
    pub play_generation: u64,
    pub shutdown: bool,
    pub flushing: bool,
    /// Pipeline clock time at which running time zero was reached
    pub base_time: ClockTime,
    /// Running time accumulated before the last pause
    pub paused_running_time: ClockTime,
}

/// [`ControlState`] behind its mutex and condition variable.
#[derive(Debug)]
pub struct SharedQueue {
    state: Mutex<ControlState>,
    cond: Condvar,
}

impl SharedQueue {
    pub fn new(capacity: usize, frame_duration: ClockTime) -> Self {
        Self {
            state: Mutex::new(ControlState {
                queue: FrameQueue::new(capacity, frame_duration),
                playing: false,
                play_generation: 0,
                shutdown: false,
                flushing: false,
                base_time: 0,
                paused_running_time: 0,
            }),
            cond: Condvar::new(),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, ControlState> {
        self.state.lock()
    }

    /// Wake every waiter.
    pub fn notify(&self) {
        self.cond.notify_all();
    }

    /// Block on the condition variable; callers re-check their predicate.
    pub fn wait(&self, guard: &mut MutexGuard<'_, ControlState>) {
        self.cond.wait(guard);
    }

    /// Push with drop-oldest and wake waiters.
    pub fn push(&self, item: FrameItem) -> Option<DroppedFrame> {
        let dropped = self.lock().queue.push(item);
        self.notify();
        dropped
    }

    /// Wait for the next frame unless the queue is flushing.
    pub fn pop_blocking(&self) -> Result<FrameItem, Flushing> {
        let mut state = self.lock();
        loop {
            if state.flushing {
                trace!("Flushing");
                return Err(Flushing);
            }
            if let Some(item) = state.queue.pop() {
                return Ok(item);
            }
            self.wait(&mut state);
        }
    }

    pub fn flush_begin(&self) {
        self.lock().flushing = true;
        self.notify();
    }

    pub fn flush_end(&self) {
        self.lock().flushing = false;
        self.notify();
    }

    pub fn drain_and_release(&self) -> usize {
        let released = self.lock().queue.drain_and_release();
        if released > 0 {
            debug!("Released {} queued frames", released);
        }
        released
    }

    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().queue.is_empty()
    }

    /// Prepare for a new capture session: empty queue, all flags cleared.
    pub fn reset_session(&self, capacity: usize, frame_duration: ClockTime) {
        let mut state = self.lock();
        state.queue.drain_and_release();
        state.queue.reconfigure(capacity, frame_duration);
        state.playing = false;
        state.shutdown = false;
        state.flushing = false;
        state.base_time = 0;
        state.paused_running_time = 0;
    }

    /// Flip `playing`, keeping running time continuous across pauses.
    pub fn set_playing(&self, playing: bool, clock_now: ClockTime) {
        let mut state = self.lock();
        if state.playing == playing {
            return;
        }
        if playing {
            state.base_time = clock_now.saturating_sub(state.paused_running_time);
            state.play_generation += 1;
        } else {
            state.paused_running_time = clock_now.saturating_sub(state.base_time);
        }
        state.playing = playing;
        drop(state);
        self.notify();
    }

    /// Ask the capture thread to leave: shutdown + flushing, not playing.
    pub fn request_shutdown(&self) {
        let mut state = self.lock();
        state.shutdown = true;
        state.flushing = true;
        state.playing = false;
        drop(state);
        self.notify();
    }
}
