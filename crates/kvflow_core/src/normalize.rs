//! Conversion of awaitable values into [`Deferred`]s.
//!
//! Code driven by the coroutine driver may suspend on either a native
//! [`Deferred`] or on an external completion resource, such as a storage
//! [`Request`], that reports its outcome through imperatively registered
//! success and error handlers. [`normalize`] turns both into a `Deferred`.

use crate::error::CoreError;
use crate::future::Deferred;
use kvflow_storage::Request;
use std::fmt;

/// An external resource reporting one success or one error through
/// registered handlers.
pub trait Completion<T> {
    /// Registers the success handler.
    fn on_success(&self, handler: Box<dyn FnOnce(T)>);

    /// Registers the error handler.
    fn on_error(&self, handler: Box<dyn FnOnce(CoreError)>);
}

impl<T: Clone + 'static> Completion<T> for Request<T> {
    fn on_success(&self, handler: Box<dyn FnOnce(T)>) {
        Request::on_success(self, handler);
    }

    fn on_error(&self, handler: Box<dyn FnOnce(CoreError)>) {
        Request::on_error(self, move |error| handler(CoreError::from(error)));
    }
}

/// A value a coroutine can suspend on.
pub enum Awaitable<T> {
    /// A native deferred value, used as is.
    Native(Deferred<T>),
    /// An external completion resource, wrapped on normalization.
    External(Box<dyn Completion<T>>),
}

impl<T> Awaitable<T> {
    /// Wraps an external completion resource.
    pub fn external(completion: impl Completion<T> + 'static) -> Self {
        Self::External(Box::new(completion))
    }
}

impl<T> From<Deferred<T>> for Awaitable<T> {
    fn from(deferred: Deferred<T>) -> Self {
        Self::Native(deferred)
    }
}

impl<T: Clone + 'static> From<Request<T>> for Awaitable<T> {
    fn from(request: Request<T>) -> Self {
        Self::external(request)
    }
}

impl<T> fmt::Debug for Awaitable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Native(deferred) => f.debug_tuple("Native").field(deferred).finish(),
            Self::External(_) => f.write_str("External(..)"),
        }
    }
}

/// Converts an awaitable into a [`Deferred`].
///
/// Native values pass through unchanged. External resources get a fresh
/// deferred value that resolves on success and rejects on error.
pub fn normalize<T: Clone + 'static>(awaitable: Awaitable<T>) -> Deferred<T> {
    match awaitable {
        Awaitable::Native(deferred) => deferred,
        Awaitable::External(completion) => {
            let (deferred, resolver) = Deferred::pending();
            let on_error = resolver.clone();
            completion.on_success(Box::new(move |value| {
                resolver.resolve(value);
            }));
            completion.on_error(Box::new(move |error| {
                on_error.reject(error);
            }));
            deferred
        }
    }
}
