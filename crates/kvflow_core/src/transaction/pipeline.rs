//! Round-by-round execution of a transaction pipeline.

use super::request::{parse, Parser, PendingRequest};
use crate::coroutine::panic_message;
use crate::error::{CoreError, CoreResult};
use crate::future::{Deferred, Resolver};
use crate::normalize::{normalize, Awaitable};
use kvflow_storage::{ScopeId, TransactionScope, Value};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use tracing::{debug, trace, warn};

type Continuation = Box<dyn FnOnce(&Transaction, Vec<Value>) -> CoreResult<()>>;
type ErrorHandler = Box<dyn FnOnce(CoreError)>;

/// Execution phase of a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No continuation has been registered yet.
    Idle,
    /// A continuation is executing.
    Running,
    /// A round is in flight.
    Waiting,
    /// The last continuation ran and its round completed.
    Exhausted,
    /// A request or continuation failed. Terminal.
    Errored,
}

struct Round {
    id: u64,
    raw: Vec<Option<Value>>,
    parsers: Vec<Option<Parser>>,
    remaining: usize,
}

struct PipelineState {
    phase: Phase,
    /// Requests of the round being accumulated.
    requests: Vec<PendingRequest>,
    /// Continuations not invoked yet.
    queued: VecDeque<Continuation>,
    /// Parsed results of the last completed round.
    results: Vec<Value>,
    round: Option<Round>,
    next_round: u64,
    /// Set while [`Transaction::drive`] runs.
    draining: bool,
    /// Results of a round that completed while draining.
    parked: Option<Vec<Value>>,
    rounds_completed: usize,
    error: Option<CoreError>,
    error_handlers: Vec<ErrorHandler>,
    watchers: Vec<Resolver<Vec<Value>>>,
}

/// Next unit of work for [`Transaction::drive`].
enum Drive {
    Invoke(Continuation, Vec<Value>),
    Dispatch,
    Complete(Vec<Value>),
}

type Exhausted = (Vec<Resolver<Vec<Value>>>, Vec<Value>);

struct Shared {
    scope: Rc<dyn TransactionScope>,
    state: RefCell<PipelineState>,
}

/// A batched request pipeline over one transaction scope.
///
/// Requests accumulate into a round. A round is dispatched once a
/// continuation exists to consume its results, and the next continuation
/// runs only after every request of the round has completed. The first
/// failure puts the pipeline in a permanent errored state.
///
/// Handles are cheap to clone; all clones drive the same pipeline.
///
/// # Example
///
/// ```rust
/// use kvflow_core::Transaction;
/// use kvflow_storage::{upgrade_fn, MemoryBackend, StorageBackend, TableSchema, TransactionMode, Value};
///
/// let backend = MemoryBackend::new();
/// let open = backend.open(
///     "app",
///     Some(1),
///     Some(upgrade_fn(|ctx| ctx.create_table(TableSchema::keyed("kv")))),
/// );
/// backend.run_until_idle();
/// let db = open.outcome().unwrap().unwrap();
///
/// let tx = Transaction::new(db.transaction(&["kv"], TransactionMode::ReadWrite).unwrap());
/// tx.put_keyed("kv", "count", 5)
///     .then(|tx, _| {
///         tx.get_keyed("kv", "count");
///         Ok(())
///     });
/// let done = tx.done();
/// backend.run_until_idle();
/// assert_eq!(done.value(), Some(vec![Value::Integer(5)]));
/// ```
#[derive(Clone)]
pub struct Transaction {
    shared: Rc<Shared>,
}

impl Transaction {
    /// Creates a pipeline over a transaction scope.
    pub fn new(scope: Rc<dyn TransactionScope>) -> Self {
        Self {
            shared: Rc::new(Shared {
                scope,
                state: RefCell::new(PipelineState {
                    phase: Phase::Idle,
                    requests: Vec::new(),
                    queued: VecDeque::new(),
                    results: Vec::new(),
                    round: None,
                    next_round: 0,
                    draining: false,
                    parked: None,
                    rounds_completed: 0,
                    error: None,
                    error_handlers: Vec::new(),
                    watchers: Vec::new(),
                }),
            }),
        }
    }

    /// Returns the underlying scope.
    #[must_use]
    pub fn scope(&self) -> Rc<dyn TransactionScope> {
        Rc::clone(&self.shared.scope)
    }

    /// Returns the scope ID.
    #[must_use]
    pub fn scope_id(&self) -> ScopeId {
        self.shared.scope.id()
    }

    /// Appends a put of `record`. Its result is the record key.
    pub fn put(&self, table: &str, record: impl Into<Value>) -> &Self {
        self.push(PendingRequest::put(table, record.into()))
    }

    /// Appends a get. Its result is the record, or `Null` if absent.
    pub fn get(&self, table: &str, key: impl Into<Value>) -> &Self {
        self.push(PendingRequest::get(table, key.into()))
    }

    /// Appends a put of the composite `{k, v}` record.
    pub fn put_keyed(&self, table: &str, key: impl Into<Value>, value: impl Into<Value>) -> &Self {
        self.push(PendingRequest::put_keyed(table, key.into(), value.into()))
    }

    /// Appends a get whose result is the stored `v` field, or `Null`.
    pub fn get_keyed(&self, table: &str, key: impl Into<Value>) -> &Self {
        self.push(PendingRequest::get_keyed(table, key.into()))
    }

    /// Appends a clear of the whole table.
    pub fn clear(&self, table: &str) -> &Self {
        self.push(PendingRequest::clear(table))
    }

    /// Appends an arbitrary request.
    pub fn push(&self, request: PendingRequest) -> &Self {
        let mut state = self.shared.state.borrow_mut();
        if state.phase == Phase::Errored {
            trace!(scope = %self.scope_id(), "request dropped, pipeline errored");
        } else {
            state.requests.push(request);
        }
        self
    }

    /// Issues `request` on the scope right away, outside the rounds.
    ///
    /// The returned future resolves with the parsed result of this request
    /// alone. The pipeline state is not touched, so a failure here does not
    /// error the pipeline.
    pub fn issue(&self, request: PendingRequest) -> Deferred<Value> {
        let parser = request.parser();
        let token = request.operation().issue(self.shared.scope.as_ref());
        trace!(scope = %self.scope_id(), table = request.operation().table(), "request issued directly");
        normalize(Awaitable::from(token)).map(move |raw| Ok(parse(parser, raw)))
    }

    /// Registers a continuation.
    ///
    /// While a continuation runs or a round is in flight, the continuation is
    /// queued behind its predecessors. Otherwise, accumulated requests are
    /// dispatched and the continuation consumes their results; with nothing
    /// accumulated it runs immediately with the last round's results (empty
    /// at first). Ignored once the pipeline has errored.
    pub fn then(
        &self,
        continuation: impl FnOnce(&Transaction, Vec<Value>) -> CoreResult<()> + 'static,
    ) -> &Self {
        let continuation: Continuation = Box::new(continuation);
        let start = {
            let mut state = self.shared.state.borrow_mut();
            let phase = state.phase;
            match phase {
                Phase::Errored => return self,
                Phase::Running | Phase::Waiting => {
                    state.queued.push_back(continuation);
                    return self;
                }
                Phase::Idle | Phase::Exhausted => {
                    if state.requests.is_empty() {
                        state.phase = Phase::Running;
                        Some((continuation, state.results.clone()))
                    } else {
                        state.queued.push_back(continuation);
                        None
                    }
                }
            }
        };
        match start {
            Some((continuation, results)) => self.drive(Drive::Invoke(continuation, results)),
            None => self.drive(Drive::Dispatch),
        }
        self
    }

    /// Registers an error handler.
    ///
    /// Runs immediately if the pipeline already errored. Each handler fires
    /// at most once.
    pub fn catch(&self, handler: impl FnOnce(CoreError) + 'static) -> &Self {
        let error = {
            let mut state = self.shared.state.borrow_mut();
            match state.error.clone() {
                Some(error) => error,
                None => {
                    state.error_handlers.push(Box::new(handler));
                    return self;
                }
            }
        };
        handler(error);
        self
    }

    /// Returns a future resolving with the final round's results once the
    /// chain is exhausted, or rejecting with the pipeline error.
    ///
    /// Requests accumulated on an idle pipeline are dispatched.
    pub fn done(&self) -> Deferred<Vec<Value>> {
        let (deferred, resolver) = Deferred::pending();
        let dispatch = {
            let mut state = self.shared.state.borrow_mut();
            let phase = state.phase;
            match phase {
                Phase::Errored => {
                    let error = state
                        .error
                        .clone()
                        .unwrap_or_else(|| CoreError::invalid_operation("errored without error"));
                    drop(state);
                    resolver.reject(error);
                    return deferred;
                }
                Phase::Running | Phase::Waiting => {
                    state.watchers.push(resolver);
                    return deferred;
                }
                Phase::Idle | Phase::Exhausted => {
                    if state.requests.is_empty() {
                        let results = state.results.clone();
                        drop(state);
                        resolver.resolve(results);
                        return deferred;
                    }
                    state.watchers.push(resolver);
                    true
                }
            }
        };
        if dispatch {
            self.drive(Drive::Dispatch);
        }
        deferred
    }

    /// Returns a future resolving once the underlying scope has completed.
    pub fn committed(&self) -> Deferred<()> {
        let (deferred, resolver) = Deferred::pending();
        self.shared.scope.on_complete(Box::new(move || {
            resolver.resolve(());
        }));
        deferred
    }

    /// Returns the current phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.shared.state.borrow().phase
    }

    /// Returns true once a request or continuation has failed.
    #[must_use]
    pub fn is_errored(&self) -> bool {
        self.phase() == Phase::Errored
    }

    /// Returns the pipeline error.
    #[must_use]
    pub fn error(&self) -> Option<CoreError> {
        self.shared.state.borrow().error.clone()
    }

    /// Returns the parsed results of the last completed round.
    #[must_use]
    pub fn results(&self) -> Vec<Value> {
        self.shared.state.borrow().results.clone()
    }

    /// Returns the number of requests accumulated for the next round.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.shared.state.borrow().requests.len()
    }

    /// Returns the number of requests of the in-flight round that have not
    /// completed yet.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.shared
            .state
            .borrow()
            .round
            .as_ref()
            .map_or(0, |round| round.remaining)
    }

    /// Returns the number of completed rounds that carried requests.
    #[must_use]
    pub fn rounds_completed(&self) -> usize {
        self.shared.state.borrow().rounds_completed
    }

    /// Runs continuations and dispatches rounds until a round is in flight,
    /// the chain is exhausted or the pipeline fails.
    ///
    /// Rounds without requests, and rounds whose requests complete while
    /// this loop is active, are picked up by the loop instead of recursing.
    fn drive(&self, first: Drive) {
        let outer = std::mem::replace(&mut self.shared.state.borrow_mut().draining, true);
        let mut step = first;
        let mut exhausted = Vec::new();
        loop {
            let next = match step {
                Drive::Invoke(continuation, results) => self.invoke(continuation, results),
                Drive::Dispatch => self.dispatch(),
                Drive::Complete(results) => match self.advance(results) {
                    Ok(next) => Some(next),
                    Err(finished) => {
                        exhausted.push(finished);
                        None
                    }
                },
            };
            step = match next {
                Some(next) => next,
                None => {
                    let mut state = self.shared.state.borrow_mut();
                    match state.parked.take() {
                        Some(results) => Drive::Complete(results),
                        None => {
                            state.draining = outer;
                            break;
                        }
                    }
                }
            };
        }

        for (watchers, results) in exhausted {
            for watcher in watchers {
                watcher.resolve(results.clone());
            }
        }
    }

    fn invoke(&self, continuation: Continuation, results: Vec<Value>) -> Option<Drive> {
        match panic::catch_unwind(AssertUnwindSafe(|| continuation(self, results))) {
            Ok(Ok(())) => Some(Drive::Dispatch),
            Ok(Err(error)) => {
                self.fail(error);
                None
            }
            Err(payload) => {
                self.fail(CoreError::panicked(panic_message(payload.as_ref())));
                None
            }
        }
    }

    /// Dispatches the accumulated requests as one round. An empty round is
    /// returned as already complete.
    fn dispatch(&self) -> Option<Drive> {
        let (id, requests) = {
            let mut state = self.shared.state.borrow_mut();
            if state.phase == Phase::Errored {
                return None;
            }
            let requests = std::mem::take(&mut state.requests);
            if requests.is_empty() {
                return Some(Drive::Complete(Vec::new()));
            }
            state.next_round += 1;
            let id = state.next_round;
            state.round = Some(Round {
                id,
                raw: vec![None; requests.len()],
                parsers: requests.iter().map(PendingRequest::parser).collect(),
                remaining: requests.len(),
            });
            state.phase = Phase::Waiting;
            (id, requests)
        };

        debug!(scope = %self.scope_id(), round = id, requests = requests.len(), "round dispatched");
        for (index, request) in requests.iter().enumerate() {
            if self.is_errored() {
                break;
            }
            let token = request.operation().issue(self.shared.scope.as_ref());
            let tx = self.clone();
            token.on_success(move |raw| tx.record(id, index, raw));
            let tx = self.clone();
            token.on_error(move |error| tx.fail(error.into()));
        }
        None
    }

    fn record(&self, id: u64, index: usize, raw: Value) {
        let round = {
            let mut state = self.shared.state.borrow_mut();
            if state.phase != Phase::Waiting {
                return;
            }
            let Some(round) = state.round.as_mut().filter(|round| round.id == id) else {
                return;
            };
            if round.raw[index].is_some() {
                return;
            }
            round.raw[index] = Some(raw);
            round.remaining -= 1;
            if round.remaining > 0 {
                return;
            }
            state.rounds_completed += 1;
            state.round.take()
        };
        let Some(round) = round else {
            return;
        };

        let results: Vec<Value> = round
            .parsers
            .into_iter()
            .zip(round.raw)
            .map(|(parser, raw)| parse(parser, raw.unwrap_or_default()))
            .collect();

        {
            let mut state = self.shared.state.borrow_mut();
            if state.draining {
                state.parked = Some(results);
                return;
            }
        }
        self.drive(Drive::Complete(results));
    }

    /// Stores a completed round's results and picks the next continuation,
    /// or hands back the watchers to notify once the chain is exhausted.
    fn advance(&self, results: Vec<Value>) -> Result<Drive, Exhausted> {
        let (next, completed) = {
            let mut state = self.shared.state.borrow_mut();
            if state.phase == Phase::Errored {
                return Err((Vec::new(), results));
            }
            state.results = results.clone();
            let completed = state.rounds_completed;
            match state.queued.pop_front() {
                Some(next) => {
                    state.phase = Phase::Running;
                    (Ok(next), completed)
                }
                None => {
                    state.phase = Phase::Exhausted;
                    (Err(std::mem::take(&mut state.watchers)), completed)
                }
            }
        };

        trace!(scope = %self.scope_id(), rounds = completed, results = results.len(), "round complete");
        match next {
            Ok(continuation) => Ok(Drive::Invoke(continuation, results)),
            Err(watchers) => {
                debug!(scope = %self.scope_id(), rounds = completed, "pipeline exhausted");
                Err((watchers, results))
            }
        }
    }

    fn fail(&self, error: CoreError) {
        let (handlers, watchers) = {
            let mut state = self.shared.state.borrow_mut();
            if state.phase == Phase::Errored {
                return;
            }
            state.phase = Phase::Errored;
            state.error = Some(error.clone());
            state.requests.clear();
            state.queued.clear();
            state.round = None;
            state.parked = None;
            (
                std::mem::take(&mut state.error_handlers),
                std::mem::take(&mut state.watchers),
            )
        };

        warn!(scope = %self.scope_id(), %error, "pipeline failed");
        for handler in handlers {
            handler(error.clone());
        }
        for watcher in watchers {
            watcher.reject(error.clone());
        }
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.borrow();
        f.debug_struct("Transaction")
            .field("scope", &self.shared.scope.id())
            .field("phase", &state.phase)
            .field("requests", &state.requests.len())
            .field("queued", &state.queued.len())
            .field("rounds_completed", &state.rounds_completed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kvflow_storage::{
        upgrade_fn, DatabaseHandle, MemoryBackend, StorageBackend, StorageError, TableSchema,
        TransactionMode,
    };
    use std::cell::Cell;

    fn setup() -> (MemoryBackend, Rc<dyn DatabaseHandle>) {
        let backend = MemoryBackend::new();
        let open = backend.open(
            "pipeline",
            Some(1),
            Some(upgrade_fn(|ctx| ctx.create_table(TableSchema::keyed("kv")))),
        );
        backend.run_until_idle();
        let db = open.outcome().unwrap().unwrap();
        (backend, db)
    }

    fn begin(db: &Rc<dyn DatabaseHandle>, mode: TransactionMode) -> Transaction {
        Transaction::new(db.transaction(&["kv"], mode).unwrap())
    }

    #[test]
    fn first_continuation_runs_immediately() {
        let (_backend, db) = setup();
        let tx = begin(&db, TransactionMode::ReadWrite);
        let seen = Rc::new(RefCell::new(None));

        let s = Rc::clone(&seen);
        tx.then(move |_, results| {
            *s.borrow_mut() = Some(results);
            Ok(())
        });
        assert_eq!(*seen.borrow(), Some(Vec::new()));
        assert_eq!(tx.phase(), Phase::Exhausted);
        assert_eq!(tx.rounds_completed(), 0);
    }

    #[test]
    fn accumulated_requests_feed_first_continuation() {
        let (backend, db) = setup();
        let tx = begin(&db, TransactionMode::ReadWrite);
        let seen = Rc::new(RefCell::new(Vec::new()));

        let s = Rc::clone(&seen);
        tx.put_keyed("kv", "a", 1).then(move |_, results| {
            s.borrow_mut().extend(results);
            Ok(())
        });
        assert_eq!(tx.phase(), Phase::Waiting);
        assert!(seen.borrow().is_empty());

        backend.run_until_idle();
        assert_eq!(*seen.borrow(), vec![Value::from("a")]);
        assert_eq!(tx.rounds_completed(), 1);
    }

    #[test]
    fn continuation_results_are_parsed_in_submission_order() {
        let (backend, db) = setup();
        let tx = begin(&db, TransactionMode::ReadWrite);
        tx.put_keyed("kv", "a", 1).put_keyed("kv", "b", 2);
        let done = tx
            .then(|tx, _| {
                tx.get_keyed("kv", "b")
                    .get("kv", "a")
                    .get_keyed("kv", "missing");
                Ok(())
            })
            .done();
        backend.run_until_idle();

        assert_eq!(
            done.value(),
            Some(vec![Value::Integer(2), Value::keyed("a", 1), Value::Null])
        );
    }

    #[test]
    fn failed_request_errors_pipeline() {
        let (backend, db) = setup();
        let tx = begin(&db, TransactionMode::ReadOnly);
        let errors = Rc::new(RefCell::new(Vec::new()));
        let ran = Rc::new(Cell::new(false));

        let e = Rc::clone(&errors);
        let r = Rc::clone(&ran);
        tx.put_keyed("kv", "a", 1)
            .then(move |_, _| {
                r.set(true);
                Ok(())
            })
            .catch(move |error| e.borrow_mut().push(error));
        backend.run_until_idle();

        assert!(!ran.get());
        assert!(tx.is_errored());
        assert_eq!(*errors.borrow(), vec![CoreError::Storage(StorageError::ReadOnly)]);

        // Late handlers replay the stored error.
        let e = Rc::clone(&errors);
        tx.catch(move |error| e.borrow_mut().push(error));
        assert_eq!(errors.borrow().len(), 2);
    }

    #[test]
    fn continuation_error_errors_pipeline() {
        let (_backend, db) = setup();
        let tx = begin(&db, TransactionMode::ReadWrite);
        tx.then(|_, _| Err(CoreError::rejected("bad state")));
        assert_eq!(tx.error(), Some(CoreError::rejected("bad state")));

        tx.put("kv", Value::keyed("a", 1));
        assert_eq!(tx.pending_requests(), 0);
        assert_eq!(tx.done().error(), Some(CoreError::rejected("bad state")));
    }

    #[test]
    fn continuation_panic_errors_pipeline() {
        let (_backend, db) = setup();
        let tx = begin(&db, TransactionMode::ReadWrite);
        tx.then(|_, _| panic!("broken continuation"));
        assert_eq!(tx.error(), Some(CoreError::panicked("broken continuation")));
    }

    #[test]
    fn done_on_idle_pipeline_dispatches() {
        let (backend, db) = setup();
        let tx = begin(&db, TransactionMode::ReadWrite);
        let done = tx.put_keyed("kv", "a", 1).done();
        assert!(done.is_pending());
        backend.run_until_idle();
        assert_eq!(done.value(), Some(vec![Value::from("a")]));

        let empty = begin(&db, TransactionMode::ReadOnly).done();
        assert_eq!(empty.value(), Some(Vec::new()));
    }

    #[test]
    fn committed_fires_after_last_round() {
        let (backend, db) = setup();
        let tx = begin(&db, TransactionMode::ReadWrite);
        tx.put_keyed("kv", "a", 1).then(|_, _| Ok(()));
        let committed = tx.committed();
        assert!(committed.is_pending());
        backend.run_until_idle();
        assert_eq!(committed.value(), Some(()));
        assert!(!tx.scope().is_active());
    }

    #[test]
    fn issued_requests_bypass_rounds() {
        let (backend, db) = setup();
        let tx = begin(&db, TransactionMode::ReadWrite);
        tx.put_keyed("kv", "a", 1);

        let stored = tx.issue(PendingRequest::put_keyed("kv", Value::from("b"), Value::from(2)));
        let read = tx.issue(PendingRequest::get_keyed("kv", Value::from("b")));
        assert_eq!(tx.pending_requests(), 1);
        assert_eq!(tx.phase(), Phase::Idle);

        backend.run_until_idle();
        assert_eq!(stored.value(), Some(Value::from("b")));
        assert_eq!(read.value(), Some(Value::Integer(2)));
        assert_eq!(tx.rounds_completed(), 0);
    }

    #[test]
    fn outstanding_tracks_the_in_flight_round() {
        let (backend, db) = setup();
        let tx = begin(&db, TransactionMode::ReadWrite);
        assert_eq!(tx.outstanding(), 0);
        let done = tx.put_keyed("kv", "a", 1).put_keyed("kv", "b", 2).done();
        assert_eq!(tx.outstanding(), 2);

        backend.run_until_idle();
        assert_eq!(tx.outstanding(), 0);
        assert_eq!(done.value().map(|results| results.len()), Some(2));
    }
}
