//! Completion tokens for asynchronous storage requests.
//!
//! A [`Request`] is what a backend hands out when an operation is issued.
//! The operation later completes through its [`Completer`], which fires the
//! registered success handlers or the registered error handlers, never both
//! and never more than once.

use crate::error::{StorageError, StorageResult};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

type SuccessHandler<T> = Box<dyn FnOnce(T)>;
type ErrorHandler = Box<dyn FnOnce(StorageError)>;

struct Slot<T> {
    outcome: Option<StorageResult<T>>,
    on_success: Vec<SuccessHandler<T>>,
    on_error: Vec<ErrorHandler>,
}

impl<T> Slot<T> {
    fn new(outcome: Option<StorageResult<T>>) -> Self {
        Self {
            outcome,
            on_success: Vec::new(),
            on_error: Vec::new(),
        }
    }
}

/// A completion token for an issued storage operation.
///
/// Handlers registered after completion are invoked immediately with the
/// stored outcome.
pub struct Request<T> {
    slot: Rc<RefCell<Slot<T>>>,
}

impl<T> Clone for Request<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Rc::clone(&self.slot),
        }
    }
}

impl<T: Clone + 'static> Request<T> {
    /// Creates an outstanding request and the completer that settles it.
    #[must_use]
    pub fn pending() -> (Self, Completer<T>) {
        let slot = Rc::new(RefCell::new(Slot::new(None)));
        (
            Self {
                slot: Rc::clone(&slot),
            },
            Completer { slot },
        )
    }

    /// Creates a request that has already completed.
    #[must_use]
    pub fn ready(outcome: StorageResult<T>) -> Self {
        Self {
            slot: Rc::new(RefCell::new(Slot::new(Some(outcome)))),
        }
    }

    /// Registers a handler for successful completion.
    pub fn on_success(&self, handler: impl FnOnce(T) + 'static) -> &Self {
        let value = {
            let mut slot = self.slot.borrow_mut();
            match &slot.outcome {
                None => {
                    slot.on_success.push(Box::new(handler));
                    return self;
                }
                Some(Ok(value)) => value.clone(),
                Some(Err(_)) => return self,
            }
        };
        handler(value);
        self
    }

    /// Registers a handler for failed completion.
    pub fn on_error(&self, handler: impl FnOnce(StorageError) + 'static) -> &Self {
        let error = {
            let mut slot = self.slot.borrow_mut();
            match &slot.outcome {
                None => {
                    slot.on_error.push(Box::new(handler));
                    return self;
                }
                Some(Err(error)) => error.clone(),
                Some(Ok(_)) => return self,
            }
        };
        handler(error);
        self
    }

    /// Returns true once the request has completed.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.slot.borrow().outcome.is_some()
    }

    /// Returns the outcome, if the request has completed.
    #[must_use]
    pub fn outcome(&self) -> Option<StorageResult<T>> {
        self.slot.borrow().outcome.clone()
    }
}

impl<T> fmt::Debug for Request<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.slot.borrow();
        let state = match &slot.outcome {
            None => "pending",
            Some(Ok(_)) => "succeeded",
            Some(Err(_)) => "failed",
        };
        f.debug_struct("Request").field("state", &state).finish()
    }
}

/// The settling side of a [`Request`].
///
/// Completing consumes the completer, so a request settles at most once.
pub struct Completer<T> {
    slot: Rc<RefCell<Slot<T>>>,
}

impl<T: Clone + 'static> Completer<T> {
    /// Completes the request with the given outcome.
    pub fn complete(self, outcome: StorageResult<T>) {
        let (on_success, on_error) = {
            let mut slot = self.slot.borrow_mut();
            if slot.outcome.is_some() {
                return;
            }
            slot.outcome = Some(outcome.clone());
            (
                std::mem::take(&mut slot.on_success),
                std::mem::take(&mut slot.on_error),
            )
        };

        match outcome {
            Ok(value) => {
                for handler in on_success {
                    handler(value.clone());
                }
            }
            Err(error) => {
                for handler in on_error {
                    handler(error.clone());
                }
            }
        }
    }

    /// Completes the request successfully.
    pub fn succeed(self, value: T) {
        self.complete(Ok(value));
    }

    /// Completes the request with an error.
    pub fn fail(self, error: StorageError) {
        self.complete(Err(error));
    }
}

impl<T> fmt::Debug for Completer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completer").finish_non_exhaustive()
    }
}
