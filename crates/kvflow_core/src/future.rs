//! Deferred values.
//!
//! A [`Deferred`] is a single-assignment slot that is settled once, either
//! with a value or with an error. Callbacks registered before settlement
//! are queued; callbacks registered afterwards run immediately, including
//! while earlier callbacks are still being delivered.
//!
//! Resolve callbacks form a transform chain: each receives the current value
//! and returns the value seen by the next one. Reject callbacks all receive
//! the same error.

use crate::error::{CoreError, CoreResult};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

type ResolveCallback<T> = Box<dyn FnOnce(T) -> T>;
type RejectCallback = Box<dyn FnOnce(CoreError)>;

/// Observable state of a [`Deferred`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FutureState {
    /// Not settled yet.
    Pending,
    /// Settled with a value.
    Resolved,
    /// Settled with an error.
    Rejected,
}

enum Slot<T> {
    Pending,
    Resolved(T),
    Rejected(CoreError),
}

struct Inner<T> {
    slot: Slot<T>,
    on_resolve: Vec<ResolveCallback<T>>,
    on_reject: Vec<RejectCallback>,
}

/// A deferred value.
///
/// Handles are cheap to clone; all clones observe the same slot.
///
/// # Example
///
/// ```rust
/// use kvflow_core::Deferred;
///
/// let (deferred, resolver) = Deferred::pending();
/// deferred.on_resolve(|n: i64| n + 1).on_resolve(|n| n * 10);
/// resolver.resolve(1);
/// assert_eq!(deferred.value(), Some(20));
/// ```
pub struct Deferred<T> {
    inner: Rc<RefCell<Inner<T>>>,
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: 'static> Deferred<T> {
    fn with_slot(slot: Slot<T>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                slot,
                on_resolve: Vec::new(),
                on_reject: Vec::new(),
            })),
        }
    }

    /// Creates a deferred value and hands its resolver to `initializer`.
    pub fn new(initializer: impl FnOnce(Resolver<T>)) -> Self {
        let (deferred, resolver) = Self::pending();
        initializer(resolver);
        deferred
    }

    /// Creates an unsettled deferred value and its resolver.
    #[must_use]
    pub fn pending() -> (Self, Resolver<T>) {
        let deferred = Self::with_slot(Slot::Pending);
        let resolver = Resolver {
            inner: Rc::clone(&deferred.inner),
        };
        (deferred, resolver)
    }

    /// Creates a deferred value resolved with `value`.
    pub fn resolved(value: T) -> Self {
        Self::with_slot(Slot::Resolved(value))
    }

    /// Creates a deferred value rejected with `error`.
    pub fn rejected(error: CoreError) -> Self {
        Self::with_slot(Slot::Rejected(error))
    }

    /// Registers a reject callback. On an already rejected value the
    /// callback runs immediately.
    pub fn on_reject(&self, callback: impl FnOnce(CoreError) + 'static) -> &Self {
        let error = {
            let mut inner = self.inner.borrow_mut();
            match &inner.slot {
                Slot::Pending => {
                    inner.on_reject.push(Box::new(callback));
                    return self;
                }
                Slot::Rejected(error) => error.clone(),
                Slot::Resolved(_) => return self,
            }
        };
        callback(error);
        self
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> FutureState {
        match self.inner.borrow().slot {
            Slot::Pending => FutureState::Pending,
            Slot::Resolved(_) => FutureState::Resolved,
            Slot::Rejected(_) => FutureState::Rejected,
        }
    }

    /// Returns true until the value is settled.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.state() == FutureState::Pending
    }

    /// Returns the error if the value was rejected.
    #[must_use]
    pub fn error(&self) -> Option<CoreError> {
        match &self.inner.borrow().slot {
            Slot::Rejected(error) => Some(error.clone()),
            _ => None,
        }
    }

    /// Returns true if both handles refer to the same slot.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T: Clone + 'static> Deferred<T> {
    /// Registers a resolve callback.
    ///
    /// The callback's return value replaces the stored value. On a resolved
    /// value the callback runs immediately against the current value.
    pub fn on_resolve(&self, callback: impl FnOnce(T) -> T + 'static) -> &Self {
        let current = {
            let mut inner = self.inner.borrow_mut();
            match &inner.slot {
                Slot::Pending => {
                    inner.on_resolve.push(Box::new(callback));
                    return self;
                }
                Slot::Resolved(value) => value.clone(),
                Slot::Rejected(_) => return self,
            }
        };
        let next = callback(current);
        self.inner.borrow_mut().slot = Slot::Resolved(next);
        self
    }

    /// Observes the value without changing it.
    pub fn inspect(&self, observer: impl FnOnce(&T) + 'static) -> &Self {
        self.on_resolve(move |value| {
            observer(&value);
            value
        })
    }

    /// Returns a copy of the value once resolved.
    #[must_use]
    pub fn value(&self) -> Option<T> {
        match &self.inner.borrow().slot {
            Slot::Resolved(value) => Some(value.clone()),
            _ => None,
        }
    }

    /// Returns the outcome once settled.
    #[must_use]
    pub fn outcome(&self) -> Option<CoreResult<T>> {
        match &self.inner.borrow().slot {
            Slot::Resolved(value) => Some(Ok(value.clone())),
            Slot::Rejected(error) => Some(Err(error.clone())),
            Slot::Pending => None,
        }
    }

    /// Derives a new deferred value.
    ///
    /// This value is left unchanged; an `Err` from `f` rejects the derived
    /// value only.
    pub fn map<U: Clone + 'static>(
        &self,
        f: impl FnOnce(T) -> CoreResult<U> + 'static,
    ) -> Deferred<U> {
        let (derived, resolver) = Deferred::pending();
        let on_error = resolver.clone();
        self.on_resolve(move |value| {
            match f(value.clone()) {
                Ok(mapped) => resolver.resolve(mapped),
                Err(error) => resolver.reject(error),
            };
            value
        });
        self.on_reject(move |error| {
            on_error.reject(error);
        });
        derived
    }

    /// Chains another asynchronous step.
    pub fn and_then<U: Clone + 'static>(
        &self,
        f: impl FnOnce(T) -> Deferred<U> + 'static,
    ) -> Deferred<U> {
        let (derived, resolver) = Deferred::pending();
        let on_error = resolver.clone();
        self.on_resolve(move |value| {
            let next = f(value.clone());
            let on_next_error = resolver.clone();
            next.on_resolve(move |mapped| {
                resolver.resolve(mapped.clone());
                mapped
            });
            next.on_reject(move |error| {
                on_next_error.reject(error);
            });
            value
        });
        self.on_reject(move |error| {
            on_error.reject(error);
        });
        derived
    }
}

impl<T> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        let state = match &inner.slot {
            Slot::Pending => "pending",
            Slot::Resolved(_) => "resolved",
            Slot::Rejected(_) => "rejected",
        };
        f.debug_struct("Deferred")
            .field("state", &state)
            .field("queued", &(inner.on_resolve.len() + inner.on_reject.len()))
            .finish()
    }
}

/// The settling side of a [`Deferred`].
///
/// Only the first call to [`resolve`](Self::resolve) or
/// [`reject`](Self::reject) takes effect.
pub struct Resolver<T> {
    inner: Rc<RefCell<Inner<T>>>,
}

impl<T> Clone for Resolver<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Clone> Resolver<T> {
    /// Resolves with `value`. Returns false if already settled.
    ///
    /// Queued callbacks run in registration order, each against the value
    /// left by the previous one. The slot holds the current value between
    /// callbacks, so callbacks registered meanwhile run at registration. A
    /// panicking callback leaves the value it received in place and stops
    /// delivery to the callbacks queued after it.
    pub fn resolve(&self, value: T) -> bool {
        let callbacks = {
            let mut inner = self.inner.borrow_mut();
            if !matches!(inner.slot, Slot::Pending) {
                return false;
            }
            inner.slot = Slot::Resolved(value);
            inner.on_reject.clear();
            std::mem::take(&mut inner.on_resolve)
        };
        for callback in callbacks {
            let current = match &self.inner.borrow().slot {
                Slot::Resolved(value) => value.clone(),
                Slot::Pending | Slot::Rejected(_) => break,
            };
            let next = callback(current);
            self.inner.borrow_mut().slot = Slot::Resolved(next);
        }
        true
    }
}

impl<T> Resolver<T> {
    /// Rejects with `error`. Returns false if already settled.
    pub fn reject(&self, error: CoreError) -> bool {
        let callbacks = {
            let mut inner = self.inner.borrow_mut();
            if !matches!(inner.slot, Slot::Pending) {
                return false;
            }
            inner.slot = Slot::Rejected(error.clone());
            inner.on_resolve.clear();
            std::mem::take(&mut inner.on_reject)
        };
        for callback in callbacks {
            callback(error.clone());
        }
        true
    }

    /// Returns true once the value is settled.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        !matches!(self.inner.borrow().slot, Slot::Pending)
    }
}

impl<T> fmt::Debug for Resolver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("settled", &self.is_settled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn resolve_runs_callbacks_as_a_chain() {
        let (deferred, resolver) = Deferred::pending();
        let seen = Rc::new(RefCell::new(Vec::new()));

        let s = Rc::clone(&seen);
        deferred
            .on_resolve(move |n: i64| {
                s.borrow_mut().push(n);
                n + 1
            })
            .on_resolve(|n| n * 2);

        assert!(deferred.is_pending());
        assert!(resolver.resolve(4));
        assert_eq!(*seen.borrow(), vec![4]);
        assert_eq!(deferred.value(), Some(10));
        assert_eq!(deferred.state(), FutureState::Resolved);
    }

    #[test]
    fn late_resolve_callback_runs_immediately_and_updates_value() {
        let deferred = Deferred::resolved(3_i64);
        let ran = Rc::new(Cell::new(false));
        let r = Rc::clone(&ran);
        deferred.on_resolve(move |n| {
            r.set(true);
            n + 1
        });
        assert!(ran.get());
        assert_eq!(deferred.value(), Some(4));
    }

    #[test]
    fn settles_only_once() {
        let (deferred, resolver) = Deferred::pending();
        assert!(resolver.resolve(1_i64));
        assert!(!resolver.resolve(2));
        assert!(!resolver.reject(CoreError::rejected("late")));
        assert_eq!(deferred.value(), Some(1));
        assert_eq!(deferred.error(), None);
    }

    #[test]
    fn reject_passes_same_error_to_every_callback() {
        let (deferred, resolver) = Deferred::<i64>::pending();
        let errors = Rc::new(RefCell::new(Vec::new()));
        for _ in 0..2 {
            let e = Rc::clone(&errors);
            deferred.on_reject(move |err| e.borrow_mut().push(err));
        }
        deferred.on_resolve(|_| panic!("resolve callback must not run"));

        assert!(resolver.reject(CoreError::rejected("boom")));
        assert_eq!(
            *errors.borrow(),
            vec![CoreError::rejected("boom"), CoreError::rejected("boom")]
        );
        assert!(!resolver.resolve(1));
        assert_eq!(deferred.state(), FutureState::Rejected);
    }

    #[test]
    fn late_reject_callback_runs_immediately() {
        let deferred = Deferred::<i64>::rejected(CoreError::rejected("x"));
        let seen = Rc::new(Cell::new(false));
        let s = Rc::clone(&seen);
        deferred.on_reject(move |_| s.set(true));
        assert!(seen.get());
    }

    #[test]
    fn callbacks_for_the_other_outcome_are_ignored() {
        let resolved = Deferred::resolved(1_i64);
        resolved.on_reject(|_| panic!("reject callback must not run"));

        let rejected = Deferred::<i64>::rejected(CoreError::rejected("x"));
        rejected.on_resolve(|_| panic!("resolve callback must not run"));
        assert_eq!(rejected.value(), None);
    }

    #[test]
    fn callback_registered_during_delivery_runs_at_registration() {
        let (deferred, resolver) = Deferred::pending();
        let order = Rc::new(RefCell::new(Vec::new()));

        let handle = deferred.clone();
        let o = Rc::clone(&order);
        deferred.on_resolve(move |n: i64| {
            o.borrow_mut().push("first");
            assert_eq!(handle.state(), FutureState::Resolved);
            let nested = Rc::clone(&o);
            handle.on_resolve(move |n| {
                nested.borrow_mut().push("nested");
                n * 100
            });
            assert_eq!(o.borrow().last(), Some(&"nested"));
            n + 1
        });
        let o = Rc::clone(&order);
        deferred.on_resolve(move |n| {
            o.borrow_mut().push("second");
            n
        });

        resolver.resolve(1);
        assert_eq!(*order.borrow(), vec!["first", "nested", "second"]);
        assert_eq!(deferred.value(), Some(2));
    }

    #[test]
    fn panicking_callback_leaves_the_value_readable() {
        let (deferred, resolver) = Deferred::pending();
        deferred.on_resolve(|n: i64| n + 1);
        deferred.on_resolve(|_| panic!("callback failed"));

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            resolver.resolve(1);
        }));
        assert!(outcome.is_err());
        assert_eq!(deferred.state(), FutureState::Resolved);
        assert_eq!(deferred.value(), Some(2));

        let late = Rc::new(Cell::new(None));
        let l = Rc::clone(&late);
        deferred.on_resolve(move |n| {
            l.set(Some(n));
            n
        });
        assert_eq!(late.get(), Some(2));
        assert!(!resolver.resolve(5));
    }

    #[test]
    fn initializer_can_settle_synchronously() {
        let deferred = Deferred::new(|resolver| {
            resolver.resolve("ready".to_string());
        });
        assert_eq!(deferred.value().as_deref(), Some("ready"));
    }

    #[test]
    fn inspect_leaves_value_untouched() {
        let deferred = Deferred::resolved(vec![1, 2]);
        let len = Rc::new(Cell::new(0));
        let l = Rc::clone(&len);
        deferred.inspect(move |v| l.set(v.len()));
        assert_eq!(len.get(), 2);
        assert_eq!(deferred.value(), Some(vec![1, 2]));
    }

    #[test]
    fn map_derives_without_mutating_source() {
        let (source, resolver) = Deferred::pending();
        let doubled = source.map(|n: i64| Ok(n * 2));
        let failed = source.map(|_| -> CoreResult<i64> { Err(CoreError::rejected("no")) });

        resolver.resolve(21);
        assert_eq!(source.value(), Some(21));
        assert_eq!(doubled.value(), Some(42));
        assert_eq!(failed.error(), Some(CoreError::rejected("no")));
    }

    #[test]
    fn map_forwards_rejection() {
        let (source, resolver) = Deferred::<i64>::pending();
        let mapped = source.map(|n| Ok(n + 1));
        resolver.reject(CoreError::rejected("upstream"));
        assert_eq!(mapped.outcome(), Some(Err(CoreError::rejected("upstream"))));
    }

    #[test]
    fn and_then_waits_for_inner_value() {
        let (source, resolver) = Deferred::pending();
        let (inner, inner_resolver) = Deferred::pending();
        let chained = source.and_then(move |n: i64| {
            inner.map(move |m: i64| Ok(n + m))
        });

        resolver.resolve(1);
        assert!(chained.is_pending());
        inner_resolver.resolve(2);
        assert_eq!(chained.value(), Some(3));
    }
}
