//! Call-order recording.
//!
//! Callbacks in kvflow run at points decided by the event loop, so tests
//! usually assert on the order in which they fired. A [`Recorder`] is a
//! shared log callbacks append to.

use std::cell::RefCell;
use std::rc::Rc;

/// A shared, append-only event log.
#[derive(Clone, Default, Debug)]
pub struct Recorder {
    events: Rc<RefCell<Vec<String>>>,
}

impl Recorder {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an event.
    pub fn record(&self, event: impl Into<String>) {
        self.events.borrow_mut().push(event.into());
    }

    /// Returns a closure that records `event` when called.
    pub fn hook(&self, event: impl Into<String>) -> impl FnOnce() + 'static {
        let recorder = self.clone();
        let event = event.into();
        move || recorder.record(event)
    }

    /// Returns a copy of the log.
    pub fn events(&self) -> Vec<String> {
        self.events.borrow().clone()
    }

    /// Returns true if `event` was recorded.
    pub fn contains(&self, event: &str) -> bool {
        self.events.borrow().iter().any(|e| e == event)
    }

    /// Returns the number of recorded events.
    pub fn len(&self) -> usize {
        self.events.borrow().len()
    }

    /// Returns true if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.events.borrow().is_empty()
    }

    /// Empties the log.
    pub fn clear(&self) {
        self.events.borrow_mut().clear();
    }
}
