//! Engine events
//!
//! Workers publish onto an `EventBus`; every subscriber gets its own
//! channel and sees every event in publish order.

use std::path::PathBuf;
use std::sync::Mutex;

use crossbeam::channel::{unbounded, Receiver, Sender};

use crate::error::{EngineError, ErrorKind};

/// Notifications emitted by generation jobs
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Peak columns finished so far; strictly increasing per file
    Progress {
        path: PathBuf,
        current: usize,
        total: usize,
    },
    /// Spectrogram frames finished so far, a separate stream from `Progress`
    SpectrogramProgress {
        path: PathBuf,
        current: usize,
        total: usize,
    },
    /// Peaks for `path` are available through the engine
    ///
    /// `cached` is set when they came from the directory index instead of
    /// being decoded.
    Ready { path: PathBuf, cached: bool },
    /// Spectrogram for `path` is available through the engine
    SpectrogramReady { path: PathBuf },
    /// Generation failed; the request may be retried
    Error {
        path: PathBuf,
        kind: ErrorKind,
        message: String,
    },
}

impl EngineEvent {
    pub fn error(path: PathBuf, err: &EngineError) -> Self {
        EngineEvent::Error {
            path,
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    /// File the event is about
    pub fn path(&self) -> &PathBuf {
        match self {
            EngineEvent::Progress { path, .. }
            | EngineEvent::SpectrogramProgress { path, .. }
            | EngineEvent::Ready { path, .. }
            | EngineEvent::SpectrogramReady { path }
            | EngineEvent::Error { path, .. } => path,
        }
    }
}

/// Fan-out event bus
///
/// Subscribers that drop their receiver are removed on the next publish.
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<EngineEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// New receiver that sees every event published from now on
    pub fn subscribe(&self) -> Receiver<EngineEvent> {
        let (sender, receiver) = unbounded();
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.push(sender);
        }
        receiver
    }

    /// Deliver `event` to every live subscriber
    pub fn publish(&self, event: EngineEvent) {
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.retain(|sender| sender.send(event.clone()).is_ok());
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_subscriber_sees_every_event() {
        let bus = EventBus::new();
        let a = bus.subscribe();
        let b = bus.subscribe();

        bus.publish(EngineEvent::Ready {
            path: PathBuf::from("x.wav"),
            cached: false,
        });

        for rx in [&a, &b] {
            match rx.try_recv().unwrap() {
                EngineEvent::Ready { path, .. } => assert_eq!(path, PathBuf::from("x.wav")),
                other => panic!("Wrong event type: {:?}", other),
            }
        }
    }

    #[test]
    fn test_dropped_subscriber_is_removed() {
        let bus = EventBus::new();
        let keep = bus.subscribe();
        drop(bus.subscribe());
        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(EngineEvent::SpectrogramReady {
            path: PathBuf::from("y.wav"),
        });

        assert_eq!(bus.subscriber_count(), 1);
        assert!(keep.try_recv().is_ok());
    }

    #[test]
    fn test_error_event_carries_kind() {
        let err = EngineError::DecodeFailed {
            path: PathBuf::from("z.wav"),
            reason: "bad header".into(),
        };
        let event = EngineEvent::error(PathBuf::from("z.wav"), &err);

        match &event {
            EngineEvent::Error { kind, message, .. } => {
                assert_eq!(*kind, ErrorKind::DecodeFailed);
                assert!(message.contains("bad header"));
            }
            other => panic!("Wrong event type: {:?}", other),
        }
        assert_eq!(event.path(), &PathBuf::from("z.wav"));
    }
}
