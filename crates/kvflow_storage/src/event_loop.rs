//! Cooperative event loop for completion delivery.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;

/// A queued unit of work.
pub type Task = Box<dyn FnOnce()>;

/// Order in which queued completions are delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryOrder {
    /// Oldest task first.
    #[default]
    Fifo,
    /// Newest task first. Useful to exercise out-of-order completion.
    Lifo,
}

/// A single-threaded task queue.
///
/// Backends schedule completion callbacks here instead of invoking them from
/// the issuing call, so callers always observe requests as outstanding until
/// the loop is driven. Tasks may schedule further tasks.
pub struct EventLoop {
    queue: RefCell<VecDeque<Task>>,
    order: DeliveryOrder,
}

impl EventLoop {
    /// Creates an empty FIFO event loop.
    #[must_use]
    pub fn new() -> Self {
        Self::with_order(DeliveryOrder::Fifo)
    }

    /// Creates an empty event loop with the given delivery order.
    #[must_use]
    pub fn with_order(order: DeliveryOrder) -> Self {
        Self {
            queue: RefCell::new(VecDeque::new()),
            order,
        }
    }

    /// Returns the delivery order.
    #[must_use]
    pub fn order(&self) -> DeliveryOrder {
        self.order
    }

    /// Queues a task.
    pub fn schedule(&self, task: impl FnOnce() + 'static) {
        self.queue.borrow_mut().push_back(Box::new(task));
    }

    /// Returns the number of queued tasks.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.borrow().len()
    }

    /// Returns true if no task is queued.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.queue.borrow().is_empty()
    }

    /// Runs one task. Returns false if the queue was empty.
    pub fn run_one(&self) -> bool {
        let task = {
            let mut queue = self.queue.borrow_mut();
            match self.order {
                DeliveryOrder::Fifo => queue.pop_front(),
                DeliveryOrder::Lifo => queue.pop_back(),
            }
        };
        match task {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Runs tasks until the queue is empty. Returns the number of tasks run.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        while self.run_one() {
            ran += 1;
        }
        ran
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop")
            .field("pending", &self.pending())
            .field("order", &self.order)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    fn record(events: &EventLoop, log: &Rc<RefCell<Vec<u32>>>, tag: u32) {
        let log = Rc::clone(log);
        events.schedule(move || log.borrow_mut().push(tag));
    }

    #[test]
    fn fifo_runs_oldest_first() {
        let events = EventLoop::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        for tag in 1..=3 {
            record(&events, &log, tag);
        }
        assert_eq!(events.pending(), 3);
        assert_eq!(events.run_until_idle(), 3);
        assert_eq!(*log.borrow(), vec![1, 2, 3]);
        assert!(events.is_idle());
    }

    #[test]
    fn lifo_runs_newest_first() {
        let events = EventLoop::with_order(DeliveryOrder::Lifo);
        let log = Rc::new(RefCell::new(Vec::new()));
        for tag in 1..=3 {
            record(&events, &log, tag);
        }
        events.run_until_idle();
        assert_eq!(*log.borrow(), vec![3, 2, 1]);
    }

    #[test]
    fn tasks_can_schedule_tasks() {
        let events = Rc::new(EventLoop::new());
        let log = Rc::new(RefCell::new(Vec::new()));

        let inner_events = Rc::clone(&events);
        let inner_log = Rc::clone(&log);
        events.schedule(move || {
            inner_log.borrow_mut().push(1);
            record(&inner_events, &inner_log, 2);
        });

        assert_eq!(events.run_until_idle(), 2);
        assert_eq!(*log.borrow(), vec![1, 2]);
    }

    #[test]
    fn run_one_on_empty_queue() {
        let events = EventLoop::new();
        assert!(!events.run_one());
    }
}
