use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, error, info, trace, warn};

use crate::clock::ClockTime;
use crate::source::LifecycleState;

/// What caused a run of frames to be lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QosOrigin {
    /// The device dropped frames before they reached the host
    HardwareDrop,
    /// The frame queue was full and its oldest frame was discarded
    QueueOverflow,
}

/// Why the capture loop considers the input signal lost.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalLossReason {
    NoSignal,
    DifferentFormat { detected: String },
}

/// Notifications emitted by a capture source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SrcEvent {
    /// Latency of the source is known or changed
    LatencyChanged { min: ClockTime, max: ClockTime },
    /// Frames covering `[timestamp, timestamp + duration)` were lost
    Qos {
        origin: QosOrigin,
        timestamp: ClockTime,
        duration: ClockTime,
    },
    SignalLost { reason: SignalLossReason },
    SignalRecovered,
    /// The capture loop hit an unrecoverable error and stopped capturing
    StreamError { message: String },
    StateChanged {
        from: LifecycleState,
        to: LifecycleState,
    },
}

impl SrcEvent {
    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            SrcEvent::LatencyChanged { min, max } => {
                format!("Latency changed: min {} ns, max {} ns", min, max)
            }
            SrcEvent::Qos {
                origin,
                timestamp,
                duration,
            } => {
                let what = match origin {
                    QosOrigin::HardwareDrop => "Dropped frames on the device",
                    QosOrigin::QueueOverflow => "Dropped frame on queue overrun",
                };
                format!("{} at {} ns for {} ns", what, timestamp, duration)
            }
            SrcEvent::SignalLost { reason } => match reason {
                SignalLossReason::NoSignal => "No signal".to_string(),
                SignalLossReason::DifferentFormat { detected } => {
                    format!("Different input format {} than configured", detected)
                }
            },
            SrcEvent::SignalRecovered => "Signal recovered".to_string(),
            SrcEvent::StreamError { message } => format!("Stream error: {}", message),
            SrcEvent::StateChanged { from, to } => {
                format!("State changed from {:?} to {:?}", from, to)
            }
        }
    }

    /// Get the event type as a string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            SrcEvent::LatencyChanged { .. } => "latency_changed",
            SrcEvent::Qos { .. } => "qos",
            SrcEvent::SignalLost { .. } => "signal_lost",
            SrcEvent::SignalRecovered => "signal_recovered",
            SrcEvent::StreamError { .. } => "stream_error",
            SrcEvent::StateChanged { .. } => "state_changed",
        }
    }
}

/// Broadcast bus for source notifications.
///
/// Publishing is synchronous so the capture thread can post without a
/// runtime; subscribers receive from async or sync contexts alike.
pub struct EventBus {
    sender: broadcast::Sender<SrcEvent>,
}

impl EventBus {
    /// Create a new event bus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to events and get a receiver
    pub fn subscribe(&self) -> broadcast::Receiver<SrcEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all subscribers, returning how many received it
    pub fn publish(&self, event: SrcEvent) -> usize {
        match &event {
            SrcEvent::Qos { .. } => warn!("{}", event.description()),
            SrcEvent::SignalLost { .. } => warn!("{}", event.description()),
            SrcEvent::SignalRecovered => info!("{}", event.description()),
            SrcEvent::StreamError { message } => error!("Stream error: {}", message),
            SrcEvent::LatencyChanged { .. } | SrcEvent::StateChanged { .. } => {
                debug!("{}", event.description())
            }
        }

        match self.sender.send(event) {
            Ok(receivers) => receivers,
            Err(_) => {
                trace!("Event published without subscribers");
                0
            }
        }
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
