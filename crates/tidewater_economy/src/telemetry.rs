//! # Telemetry Boundary
//!
//! Progress counters (achievements, statistics) are owned by another
//! subsystem. The ledger only hands them over after a commit, and never
//! waits on the consumer: a full channel drops the counter with a warning.

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel::{Receiver, Sender, TrySendError};
use tracing::{debug, warn};

use crate::ledger::EntityId;

/// One counter increment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Counter {
    /// Entity the counter belongs to.
    pub entity: EntityId,
    /// Counter key, e.g. `interactive_events_triggered`.
    pub key: String,
    /// Signed increment.
    pub delta: i64,
}

/// Receives counters after commits. Must not block.
pub trait TelemetrySink: Send + Sync {
    /// Hands over one counter.
    fn emit(&self, counter: Counter);
}

/// Discards every counter.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullTelemetry;

impl TelemetrySink for NullTelemetry {
    fn emit(&self, _counter: Counter) {}
}

/// Forwards counters into a bounded channel.
#[derive(Debug)]
pub struct ChannelTelemetry {
    tx: Sender<Counter>,
    dropped: AtomicU64,
}

impl ChannelTelemetry {
    /// Creates a sink and the receiver its consumer drains.
    #[must_use]
    pub fn bounded(capacity: usize) -> (Self, Receiver<Counter>) {
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        (Self { tx, dropped: AtomicU64::new(0) }, rx)
    }

    /// Counters dropped because the channel was full.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl TelemetrySink for ChannelTelemetry {
    fn emit(&self, counter: Counter) {
        match self.tx.try_send(counter) {
            Ok(()) => {}
            Err(TrySendError::Full(counter)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(entity = %counter.entity, key = %counter.key, "telemetry channel full; counter dropped");
            }
            Err(TrySendError::Disconnected(counter)) => {
                debug!(key = %counter.key, "telemetry consumer gone");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter(key: &str) -> Counter {
        Counter { entity: EntityId(1), key: key.to_string(), delta: 1 }
    }

    #[test]
    fn test_channel_delivers_in_order() {
        let (sink, rx) = ChannelTelemetry::bounded(4);
        sink.emit(counter("a"));
        sink.emit(counter("b"));
        let keys: Vec<_> = rx.try_iter().map(|c| c.key).collect();
        assert_eq!(keys, ["a", "b"]);
    }

    #[test]
    fn test_full_channel_drops_without_blocking() {
        let (sink, rx) = ChannelTelemetry::bounded(1);
        sink.emit(counter("kept"));
        sink.emit(counter("dropped"));
        assert_eq!(sink.dropped(), 1);
        assert_eq!(rx.len(), 1);
    }
}
