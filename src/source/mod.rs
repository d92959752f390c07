//! Capture source: lifecycle control and the consumer side of the queue.

mod builder;
mod consumer;
mod lifecycle;
#[cfg(all(test, feature = "simulator"))]
mod tests;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use builder::Ntv2SourceBuilder;
pub use consumer::{FlowError, Latency};
pub use lifecycle::Ntv2Source;

/// Lifecycle of a capture source, lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LifecycleState {
    /// No device handle
    Closed,
    /// Device open, nothing configured
    Opened,
    /// Configuration applied and capture thread idle (paused)
    Configured,
    /// Capture thread producing frames
    Playing,
}

impl LifecycleState {
    /// The adjacent state one step closer to `target`.
    pub fn towards(self, target: LifecycleState) -> Option<LifecycleState> {
        use LifecycleState::*;

        if self == target {
            return None;
        }
        let next = if self < target {
            match self {
                Closed => Opened,
                Opened => Configured,
                Configured | Playing => Playing,
            }
        } else {
            match self {
                Playing => Configured,
                Configured => Opened,
                Opened | Closed => Closed,
            }
        };
        Some(next)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Closed => "closed",
            LifecycleState::Opened => "opened",
            LifecycleState::Configured => "configured",
            LifecycleState::Playing => "playing",
        };
        f.write_str(name)
    }
}
