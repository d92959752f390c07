//! Signal router connection table and the process-wide device setup lock.

use parking_lot::{Mutex, MutexGuard};
use std::collections::BTreeSet;
use std::fmt;

use super::types::{InputCrosspoint, OutputCrosspoint};

static SETUP_LOCK: Mutex<()> = Mutex::new(());

/// Serializes routing, reference and transfer-engine setup across every
/// source instance and channel of the process.
pub fn setup_lock() -> MutexGuard<'static, ()> {
    SETUP_LOCK.lock()
}

/// Set of crosspoint connections programmed into a device router.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignalRouter {
    connections: BTreeSet<(InputCrosspoint, OutputCrosspoint)>,
}

impl SignalRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connections(&self) -> impl Iterator<Item = &(InputCrosspoint, OutputCrosspoint)> {
        self.connections.iter()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn has_connection(&self, input: InputCrosspoint, output: OutputCrosspoint) -> bool {
        self.connections.contains(&(input, output))
    }

    pub fn add_connection(&mut self, input: InputCrosspoint, output: OutputCrosspoint) {
        self.connections.insert((input, output));
    }

    pub fn remove_connection(&mut self, input: InputCrosspoint, output: OutputCrosspoint) -> bool {
        self.connections.remove(&(input, output))
    }

    /// Connect `output` to `input` after removing every connection that
    /// already feeds `input` or already consumes `output`.
    pub fn connect_exclusive(&mut self, input: InputCrosspoint, output: OutputCrosspoint) -> usize {
        let before = self.connections.len();
        self.connections
            .retain(|(i, o)| *i != input && *o != output);
        let removed = before - self.connections.len();
        self.connections.insert((input, output));
        removed
    }
}

impl fmt::Display for SignalRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.connections.is_empty() {
            return write!(f, "(no connections)");
        }
        for (i, (input, output)) in self.connections.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{:?} <== {:?}", input, output)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_exclusive_removes_conflicts() {
        let mut router = SignalRouter::new();
        router.add_connection(InputCrosspoint::FrameBuffer(1), OutputCrosspoint::HdmiIn(1));
        router.add_connection(InputCrosspoint::FrameBuffer(2), OutputCrosspoint::SdiIn(1));
        router.add_connection(InputCrosspoint::FrameBuffer(3), OutputCrosspoint::SdiIn(3));

        let removed =
            router.connect_exclusive(InputCrosspoint::FrameBuffer(1), OutputCrosspoint::SdiIn(1));

        assert_eq!(removed, 2);
        assert_eq!(router.len(), 2);
        assert!(router.has_connection(InputCrosspoint::FrameBuffer(1), OutputCrosspoint::SdiIn(1)));
        assert!(router.has_connection(InputCrosspoint::FrameBuffer(3), OutputCrosspoint::SdiIn(3)));
    }

    #[test]
    fn test_connect_exclusive_is_idempotent() {
        let mut router = SignalRouter::new();
        router.connect_exclusive(InputCrosspoint::FrameBuffer(1), OutputCrosspoint::SdiIn(1));
        let first = router.clone();
        router.connect_exclusive(InputCrosspoint::FrameBuffer(1), OutputCrosspoint::SdiIn(1));
        assert_eq!(router, first);
        assert_eq!(router.len(), 1);
    }

    #[test]
    fn test_setup_lock_is_shared() {
        let _guard = setup_lock();
        assert!(SETUP_LOCK.try_lock().is_none());
    }
}
