//! Thread boundary between the acquisition side and the presentation layer.
//!
//! Producers (the sampling loop and the external-sink worker) push
//! [`CoreEvent`]s through an [`EventBus`]; the presentation loop owns the
//! single [`EventReceiver`] and drains it once per tick. The channel is
//! unbounded so a producer never blocks on a slow consumer, and crossbeam
//! preserves FIFO order per sender, so a status announcing a connection is
//! always observed before the samples that follow it.
//!
//! The core never composes user-facing text: events carry a structured kind
//! plus a free-form detail string and the presentation layer decides how to
//! word them.

use crate::error::ErrorClass;
use crate::types::Sample;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use serde::Serialize;
use std::time::Duration;

/// Severity attached to a status change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

/// What a status event is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    /// Serial link open and CSV file created; detail names port and file
    Connected,
    /// Session stopped; detail carries the session statistics
    Stopped,
    /// Attached to an already running external application
    ExternalAttached,
    /// Launched a new instance of the external application
    ExternalLaunched,
    /// A fresh sheet was created for this session
    ExternalResourceCreated,
    /// External sink could not be initialized; acquisition continues without it
    ExternalUnavailable,
    /// Every write strategy failed for one sample
    ExternalWriteFailed,
    /// A row was given up after a failed write (skip-failed-row policy only)
    ExternalRowSkipped,
    /// External application handle released
    ExternalDisconnected,
}

/// Event delivered to the presentation layer
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CoreEvent {
    /// A new sample was acquired and fanned out to every sink
    SampleProduced(Sample),
    /// Lifecycle or integration status changed
    StatusChanged {
        kind: StatusKind,
        severity: Severity,
        detail: String,
    },
    /// A classified failure the user should see
    ErrorRaised { class: ErrorClass, detail: String },
}

impl CoreEvent {
    /// Returns the sample if this is a `SampleProduced` event
    pub fn as_sample(&self) -> Option<&Sample> {
        match self {
            CoreEvent::SampleProduced(sample) => Some(sample),
            _ => None,
        }
    }

    /// Returns the status kind if this is a `StatusChanged` event
    pub fn status_kind(&self) -> Option<StatusKind> {
        match self {
            CoreEvent::StatusChanged { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

/// Create a connected bus/receiver pair
pub fn event_bus() -> (EventBus, EventReceiver) {
    let (tx, rx) = unbounded();
    (EventBus { tx }, EventReceiver { rx })
}

/// Producer-side handle; cheap to clone into worker threads
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: Sender<CoreEvent>,
}

impl EventBus {
    /// Queue an event. Never blocks; events are dropped once the receiver is gone.
    pub fn emit(&self, event: CoreEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("Event receiver dropped, discarding event");
        }
    }

    pub fn sample(&self, sample: Sample) {
        self.emit(CoreEvent::SampleProduced(sample));
    }

    pub fn status(&self, kind: StatusKind, severity: Severity, detail: impl Into<String>) {
        self.emit(CoreEvent::StatusChanged {
            kind,
            severity,
            detail: detail.into(),
        });
    }

    pub fn error(&self, class: ErrorClass, detail: impl Into<String>) {
        self.emit(CoreEvent::ErrorRaised {
            class,
            detail: detail.into(),
        });
    }
}

/// Consumer-side handle owned by the presentation loop
#[derive(Debug)]
pub struct EventReceiver {
    rx: Receiver<CoreEvent>,
}

impl EventReceiver {
    /// Try to receive a single event without blocking
    pub fn try_recv(&self) -> Option<CoreEvent> {
        self.rx.try_recv().ok()
    }

    /// Drain all pending events in arrival order
    pub fn drain(&self) -> Vec<CoreEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }

    /// Wait up to `timeout` for the next event.
    ///
    /// Returns `None` on timeout or once every producer is gone.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<CoreEvent> {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Number of queued events
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_events_arrive_in_emission_order() {
        let (bus, rx) = event_bus();
        bus.status(StatusKind::Connected, Severity::Success, "COM3");
        bus.sample(Sample::new(0, 21.5, 0.0));
        bus.sample(Sample::new(1000, 21.6, 0.1));

        let events = rx.drain();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].status_kind(), Some(StatusKind::Connected));
        assert_eq!(events[1].as_sample().map(|s| s.elapsed_ms), Some(0));
        assert_eq!(events[2].as_sample().map(|s| s.elapsed_ms), Some(1000));
    }

    #[test]
    fn test_producer_does_not_block_without_consumer() {
        let (bus, rx) = event_bus();
        let producer = thread::spawn(move || {
            for i in 0..10_000u64 {
                bus.sample(Sample::new(i, 20.0, 0.0));
            }
        });
        producer.join().unwrap();
        assert_eq!(rx.len(), 10_000);
    }

    #[test]
    fn test_emit_after_receiver_dropped_is_silent() {
        let (bus, rx) = event_bus();
        drop(rx);
        bus.error(ErrorClass::FatalSession, "device unplugged");
    }

    #[test]
    fn test_recv_timeout_returns_none_when_idle() {
        let (_bus, rx) = event_bus();
        assert!(rx.recv_timeout(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn test_event_json_shape() {
        let event = CoreEvent::ErrorRaised {
            class: ErrorClass::Configuration,
            detail: "no device".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""event":"error_raised""#));
        assert!(json.contains(r#""class":"configuration""#));
    }
}
