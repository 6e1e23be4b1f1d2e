//! Crossbeam-backed event channel.
//!
//! Rayon workers publish; a single renderer thread drains. Sending never
//! blocks a worker on an unbounded channel and never fails a run.

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};

use super::{Event, FileEvent};
use crate::core::pipeline::PipelineResult;

/// Sends events from the engine.
///
/// Cheap to clone; each worker can hold its own copy.
#[derive(Clone)]
pub struct EventSender {
    inner: Sender<Event>,
}

impl EventSender {
    /// Send an event.
    ///
    /// If the receiver is gone the event is discarded, so a run never
    /// depends on anyone listening.
    pub fn send(&self, event: Event) {
        let _ = self.inner.send(event);
    }
}

/// Receives events from the engine.
pub struct EventReceiver {
    inner: Receiver<Event>,
}

impl EventReceiver {
    /// Block until the next event is received
    pub fn recv(&self) -> Option<Event> {
        self.inner.recv().ok()
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&self) -> Option<Event> {
        self.inner.try_recv().ok()
    }

    /// Returns an iterator over received events
    pub fn iter(&self) -> impl Iterator<Item = Event> + '_ {
        self.inner.iter()
    }

    /// Only the terminal per-file results, in completion order
    pub fn results(&self) -> impl Iterator<Item = PipelineResult> + '_ {
        self.inner.iter().filter_map(|event| match event {
            Event::File(FileEvent::Finished(result)) => Some(result),
            _ => None,
        })
    }
}

/// Factory for sender/receiver pairs
pub struct EventChannel;

impl EventChannel {
    /// Create a new unbounded event channel.
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> (EventSender, EventReceiver) {
        let (sender, receiver) = unbounded();
        (
            EventSender { inner: sender },
            EventReceiver { inner: receiver },
        )
    }

    /// A bounded channel; workers block once `capacity` events are queued
    pub fn bounded(capacity: usize) -> (EventSender, EventReceiver) {
        let (sender, receiver) = bounded(capacity);
        (
            EventSender { inner: sender },
            EventReceiver { inner: receiver },
        )
    }
}

/// A sender whose receiver is already dropped.
pub fn null_sender() -> EventSender {
    let (sender, _receiver) = EventChannel::new();
    sender
}
