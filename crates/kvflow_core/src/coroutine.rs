//! Coroutine driver.
//!
//! A coroutine is an explicit state machine. Each call to
//! [`Coroutine::resume`] runs it up to its next suspension point, where it
//! yields one awaitable or an ordered group of awaitables. The driver waits
//! for them and resumes the coroutine with the result, until it completes or
//! an awaited operation fails.
//!
//! # Example
//!
//! ```rust
//! use kvflow_core::coroutine::{self, Resume, Step, Suspend};
//! use kvflow_core::Deferred;
//!
//! let result = coroutine::run(|| {
//!     let mut total = 0;
//!     coroutine::from_fn(move |input: Resume<i64>| {
//!         Ok(match input {
//!             Resume::Start => Step::Yield(Suspend::one(Deferred::resolved(40))),
//!             Resume::One(n) => {
//!                 total += n;
//!                 Step::Yield(Suspend::all(vec![Deferred::resolved(1), Deferred::resolved(1)]))
//!             }
//!             Resume::All(ns) => Step::Complete(total + ns.iter().sum::<i64>()),
//!         })
//!     })
//! });
//! assert_eq!(result.value(), Some(42));
//! ```

use crate::error::{CoreError, CoreResult};
use crate::future::{Deferred, Resolver};
use crate::normalize::{normalize, Awaitable};
use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use tracing::{debug, trace};

/// What a coroutine waits on at a suspension point.
pub enum Suspend<T> {
    /// A single awaitable.
    One(Awaitable<T>),
    /// An ordered group of awaitables, all already issued.
    All(Vec<Awaitable<T>>),
}

impl<T> Suspend<T> {
    /// Suspends on a single awaitable.
    pub fn one(awaitable: impl Into<Awaitable<T>>) -> Self {
        Self::One(awaitable.into())
    }

    /// Suspends on a group of awaitables.
    pub fn all<I, A>(awaitables: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Awaitable<T>>,
    {
        Self::All(awaitables.into_iter().map(Into::into).collect())
    }
}

impl<T> fmt::Debug for Suspend<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::One(_) => f.write_str("One"),
            Self::All(items) => write!(f, "All({})", items.len()),
        }
    }
}

/// The value a coroutine is resumed with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resume<T> {
    /// First resumption.
    Start,
    /// Result of a [`Suspend::One`].
    One(T),
    /// Results of a [`Suspend::All`], in input order.
    All(Vec<T>),
}

impl<T> Resume<T> {
    /// Returns true for the first resumption.
    #[must_use]
    pub fn is_start(&self) -> bool {
        matches!(self, Self::Start)
    }

    /// Unwraps the result of a single suspension.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] for any other resumption.
    pub fn into_one(self) -> CoreResult<T> {
        match self {
            Self::One(value) => Ok(value),
            Self::Start => Err(CoreError::invalid_operation(
                "expected a single result, got the start signal",
            )),
            Self::All(_) => Err(CoreError::invalid_operation(
                "expected a single result, got a group",
            )),
        }
    }

    /// Unwraps the results of a group suspension.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] for any other resumption.
    pub fn into_all(self) -> CoreResult<Vec<T>> {
        match self {
            Self::All(values) => Ok(values),
            Self::Start => Err(CoreError::invalid_operation(
                "expected group results, got the start signal",
            )),
            Self::One(_) => Err(CoreError::invalid_operation(
                "expected group results, got a single result",
            )),
        }
    }
}

/// Outcome of one resumption.
pub enum Step<T, R> {
    /// The coroutine suspended.
    Yield(Suspend<T>),
    /// The coroutine finished with its return value.
    Complete(R),
}

impl<T, R> fmt::Debug for Step<T, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Yield(suspend) => f.debug_tuple("Yield").field(suspend).finish(),
            Self::Complete(_) => f.write_str("Complete(..)"),
        }
    }
}

/// A resumable computation.
pub trait Coroutine {
    /// Type of the values awaited at suspension points.
    type Item;
    /// Type of the final value.
    type Output;

    /// Runs the coroutine to its next suspension point or to completion.
    ///
    /// # Errors
    ///
    /// An error aborts the coroutine and rejects its driver future.
    fn resume(&mut self, input: Resume<Self::Item>) -> CoreResult<Step<Self::Item, Self::Output>>;
}

/// A [`Coroutine`] backed by a closure. See [`from_fn`].
pub struct FromFn<F, T, R> {
    f: F,
    _marker: PhantomData<fn(T) -> R>,
}

/// Adapts a closure into a [`Coroutine`].
pub fn from_fn<T, R, F>(f: F) -> FromFn<F, T, R>
where
    F: FnMut(Resume<T>) -> CoreResult<Step<T, R>>,
{
    FromFn {
        f,
        _marker: PhantomData,
    }
}

impl<F, T, R> Coroutine for FromFn<F, T, R>
where
    F: FnMut(Resume<T>) -> CoreResult<Step<T, R>>,
{
    type Item = T;
    type Output = R;

    fn resume(&mut self, input: Resume<T>) -> CoreResult<Step<T, R>> {
        (self.f)(input)
    }
}

impl<F, T, R> fmt::Debug for FromFn<F, T, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FromFn").finish_non_exhaustive()
    }
}

/// Runs a coroutine to completion.
///
/// The factory is called and the coroutine is resumed synchronously until
/// its first suspension on an unsettled value. The returned future resolves
/// with the coroutine's output, or rejects with the first error: a failed
/// awaitable, an error returned from `resume`, or a panic in the factory or
/// the body.
pub fn run<C, F>(factory: F) -> Deferred<C::Output>
where
    F: FnOnce() -> C,
    C: Coroutine + 'static,
    C::Item: Clone + 'static,
    C::Output: Clone + 'static,
{
    let (result, resolver) = Deferred::pending();
    let coroutine = match panic::catch_unwind(AssertUnwindSafe(factory)) {
        Ok(coroutine) => coroutine,
        Err(payload) => {
            let error = CoreError::panicked(panic_message(payload.as_ref()));
            debug!(%error, "coroutine factory panicked");
            resolver.reject(error);
            return result;
        }
    };

    let driver = Rc::new(Driver {
        coroutine: RefCell::new(coroutine),
        resolver,
        trampoline: RefCell::new(Trampoline {
            running: false,
            ready: None,
            steps: 0,
        }),
    });
    driver.advance(Resume::Start);
    result
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Resumptions that arrive while the driver is already running are parked
/// here and picked up by the running loop.
struct Trampoline<T> {
    running: bool,
    ready: Option<Resume<T>>,
    steps: usize,
}

struct Driver<C: Coroutine> {
    coroutine: RefCell<C>,
    resolver: Resolver<C::Output>,
    trampoline: RefCell<Trampoline<C::Item>>,
}

struct Gather<T> {
    values: Vec<Option<T>>,
    remaining: usize,
    failed: bool,
}

impl<C> Driver<C>
where
    C: Coroutine + 'static,
    C::Item: Clone + 'static,
    C::Output: Clone + 'static,
{
    fn advance(self: &Rc<Self>, input: Resume<C::Item>) {
        {
            let mut trampoline = self.trampoline.borrow_mut();
            if trampoline.running {
                trampoline.ready = Some(input);
                return;
            }
            trampoline.running = true;
        }

        let mut input = input;
        loop {
            if self.resolver.is_settled() {
                break;
            }
            let step = panic::catch_unwind(AssertUnwindSafe(|| {
                self.coroutine.borrow_mut().resume(input)
            }));
            let steps = {
                let mut trampoline = self.trampoline.borrow_mut();
                trampoline.steps += 1;
                trampoline.steps
            };

            match step {
                Ok(Ok(Step::Yield(suspend))) => {
                    trace!(steps, ?suspend, "coroutine suspended");
                    self.suspend(suspend);
                }
                Ok(Ok(Step::Complete(output))) => {
                    debug!(steps, "coroutine completed");
                    self.resolver.resolve(output);
                }
                Ok(Err(error)) => self.abort(error),
                Err(payload) => self.abort(CoreError::panicked(panic_message(payload.as_ref()))),
            }

            let next = {
                let mut trampoline = self.trampoline.borrow_mut();
                match trampoline.ready.take() {
                    Some(next) => next,
                    None => {
                        trampoline.running = false;
                        break;
                    }
                }
            };
            input = next;
        }
    }

    fn abort(&self, error: CoreError) {
        if !self.resolver.is_settled() {
            debug!(%error, "coroutine aborted");
            self.resolver.reject(error);
        }
    }

    fn suspend(self: &Rc<Self>, suspend: Suspend<C::Item>) {
        match suspend {
            Suspend::One(awaitable) => {
                let deferred = normalize(awaitable);
                let driver = Rc::clone(self);
                deferred.on_resolve(move |value| {
                    driver.advance(Resume::One(value.clone()));
                    value
                });
                let driver = Rc::clone(self);
                deferred.on_reject(move |error| driver.abort(error));
            }
            Suspend::All(awaitables) => {
                let deferreds: Vec<_> = awaitables.into_iter().map(normalize).collect();
                if deferreds.is_empty() {
                    self.advance(Resume::All(Vec::new()));
                    return;
                }

                let gather = Rc::new(RefCell::new(Gather {
                    values: (0..deferreds.len()).map(|_| None).collect(),
                    remaining: deferreds.len(),
                    failed: false,
                }));
                for (index, deferred) in deferreds.iter().enumerate() {
                    let driver = Rc::clone(self);
                    let slot = Rc::clone(&gather);
                    deferred.on_resolve(move |value| {
                        let complete = {
                            let mut gather = slot.borrow_mut();
                            if gather.failed {
                                None
                            } else {
                                gather.values[index] = Some(value.clone());
                                gather.remaining -= 1;
                                (gather.remaining == 0)
                                    .then(|| std::mem::take(&mut gather.values))
                            }
                        };
                        if let Some(values) = complete {
                            driver.advance(Resume::All(values.into_iter().flatten().collect()));
                        }
                        value
                    });

                    let driver = Rc::clone(self);
                    let slot = Rc::clone(&gather);
                    deferred.on_reject(move |error| {
                        let first = !std::mem::replace(&mut slot.borrow_mut().failed, true);
                        if first {
                            driver.abort(error);
                        }
                    });
                }
            }
        }
    }
}
