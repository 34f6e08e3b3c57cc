use std::{sync::Arc, time::Duration};

use futures::future::{select, BoxFuture, Either, FutureExt, Shared};
use futures_channel::oneshot;
use parking_lot::Mutex;

use crate::{
    query_observer::QueryObserver,
    util::{spawn_detached, time_until_stale},
    CancelSignal, Clock, QueryArg, QueryData, QueryError, QueryFailure, QueryState, QueryValue,
};

/// The boxed query function an endpoint captures.
pub(crate) type Fetcher<A, V, E> =
    Arc<dyn Fn(A, CancelSignal) -> BoxFuture<'static, Result<V, E>> + Send + Sync>;

/// The shared result of an attempt. Every awaiter of one attempt resolves
/// from the same execution.
pub(crate) type QueryFuture<V, E> = Shared<BoxFuture<'static, Result<V, QueryError<E>>>>;

/// The state machine for one argument of one endpoint.
///
/// Cheap to clone; clones share state. At most one attempt is in flight at a
/// time, identified by a token so that superseded completions are dropped.
pub(crate) struct Query<A, V, E> {
    arg: A,
    fetcher: Fetcher<A, V, E>,
    clock: Clock,
    core: Arc<Mutex<QueryCore<V, E>>>,
    // Insertion order is the callback order.
    observers: Arc<Mutex<Vec<QueryObserver<A, V, E>>>>,
}

struct QueryCore<V, E> {
    state: QueryState<V, E>,
    invalidated: bool,
    attempt: Option<AttemptHandle<V, E>>,
    next_attempt_id: u64,
}

struct AttemptHandle<V, E> {
    id: u64,
    cancel: Option<oneshot::Sender<()>>,
    future: QueryFuture<V, E>,
}

impl<A: Clone, V, E> Clone for Query<A, V, E> {
    fn clone(&self) -> Self {
        Self {
            arg: self.arg.clone(),
            fetcher: Arc::clone(&self.fetcher),
            clock: Arc::clone(&self.clock),
            core: Arc::clone(&self.core),
            observers: Arc::clone(&self.observers),
        }
    }
}

impl<A, V, E> PartialEq for Query<A, V, E> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.core, &other.core)
    }
}

impl<A, V, E> Eq for Query<A, V, E> {}

impl<A, V, E> Query<A, V, E>
where
    A: QueryArg,
    V: QueryValue,
    E: QueryFailure,
{
    pub fn new(arg: A, fetcher: Fetcher<A, V, E>, clock: Clock) -> Self {
        Query {
            arg,
            fetcher,
            clock,
            core: Arc::new(Mutex::new(QueryCore {
                state: QueryState::Idle,
                invalidated: false,
                attempt: None,
                next_attempt_id: 0,
            })),
            observers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn arg(&self) -> &A {
        &self.arg
    }

    /// Identity check; two handles are the same query iff they share state.
    pub fn same(&self, other: &Self) -> bool {
        self == other
    }

    pub fn get_state(&self) -> QueryState<V, E> {
        self.core.lock().state.clone()
    }

    // Useful to avoid clones.
    pub fn with_state<T>(&self, func: impl FnOnce(&QueryState<V, E>) -> T) -> T {
        let core = self.core.lock();
        func(&core.state)
    }

    pub fn is_fetching(&self) -> bool {
        self.core.lock().attempt.is_some()
    }

    pub fn is_invalidated(&self) -> bool {
        self.core.lock().invalidated
    }

    pub fn is_stale(&self, stale_time: Duration) -> bool {
        let now = (self.clock)();
        let core = self.core.lock();
        if core.invalidated {
            return true;
        }
        match core.state.updated_at() {
            Some(updated_at) => time_until_stale(updated_at, stale_time, now).is_zero(),
            None => true,
        }
    }

    pub fn subscribe(&self, observer: &QueryObserver<A, V, E>) {
        let mut observers = self.observers.lock();
        if observers.iter().all(|existing| existing.id() != observer.id()) {
            observers.push(observer.clone());
        }
    }

    pub fn unsubscribe(&self, observer: &QueryObserver<A, V, E>) {
        self.observers
            .lock()
            .retain(|existing| existing.id() != observer.id());
    }

    pub fn has_observers(&self) -> bool {
        !self.observers.lock().is_empty()
    }

    /**
     * Execution and cancellation.
     */

    /// Start an attempt, or join the one already in flight.
    pub fn refetch(&self) -> QueryFuture<V, E> {
        let mut core = self.core.lock();
        if let Some(attempt) = &core.attempt {
            return attempt.future.clone();
        }

        let id = core.next_attempt_id;
        core.next_attempt_id += 1;

        let (sender, receiver) = oneshot::channel();
        let signal = CancelSignal::armed(receiver);

        core.state = match std::mem::take(&mut core.state) {
            state @ QueryState::Success(_) => state,
            QueryState::Idle => QueryState::Loading(None),
            QueryState::Loading(prior) => QueryState::Loading(prior),
            QueryState::Error { prior, .. } => QueryState::Loading(prior),
        };

        let future = execute(self.clone(), id, signal).boxed().shared();
        core.attempt = Some(AttemptHandle {
            id,
            cancel: Some(sender),
            future: future.clone(),
        });
        drop(core);

        self.broadcast();
        spawn_detached(future.clone().map(|_| ()));
        future
    }

    /// Cancel the attempt in flight, resetting the query to idle.
    /// Returns false if nothing was in flight.
    pub fn cancel(&self) -> bool {
        let mut core = self.core.lock();
        let Some(mut attempt) = core.attempt.take() else {
            return false;
        };
        if let Some(cancel) = attempt.cancel.take() {
            if cancel.send(()).is_err() {
                tracing::warn!(arg = ?self.arg, "failed to deliver cancellation");
            }
        }
        core.state = QueryState::Idle;
        drop(core);

        self.broadcast();
        true
    }

    /// Mark the query stale. Refetches immediately when observed, otherwise
    /// the mark takes effect on the next subscription.
    pub fn invalidate(&self) {
        self.core.lock().invalidated = true;
        if self.has_observers() {
            let _ = self.refetch();
        }
    }

    /// Overwrite the data, as if an attempt had just succeeded.
    pub fn update_data(&self, value: V) {
        let mut core = self.core.lock();
        core.invalidated = false;
        core.state = QueryState::Success(QueryData::at(value, (self.clock)()));
        drop(core);

        self.broadcast();
    }

    /// Mutate the data in place if any is present. Keeps the update stamp.
    pub fn update_data_mut(&self, func: impl FnOnce(&mut V)) -> bool {
        let mut core = self.core.lock();
        let updated = match core.state.data_mut() {
            Some(data) => {
                func(data);
                true
            }
            None => false,
        };
        drop(core);

        if updated {
            self.broadcast();
        }
        updated
    }

    fn complete_success(&self, id: u64, value: V) -> bool {
        let mut core = self.core.lock();
        match &core.attempt {
            Some(attempt) if attempt.id == id => {}
            _ => return false,
        }
        core.attempt = None;
        core.invalidated = false;
        let data = QueryData::at(value, (self.clock)());
        core.state = QueryState::Success(data.clone());
        drop(core);

        for observer in self.observer_list() {
            observer.on_query_success(self, &data);
        }
        self.broadcast();
        true
    }

    fn complete_failure(&self, id: u64, error: Arc<E>) -> bool {
        let mut core = self.core.lock();
        match &core.attempt {
            Some(attempt) if attempt.id == id => {}
            _ => return false,
        }
        core.attempt = None;
        let prior = match std::mem::take(&mut core.state) {
            QueryState::Loading(prior) => prior,
            QueryState::Success(data) => Some(data),
            QueryState::Error { prior, .. } => prior,
            QueryState::Idle => None,
        };
        core.state = QueryState::Error {
            error: Arc::clone(&error),
            prior,
        };
        drop(core);

        for observer in self.observer_list() {
            observer.on_query_failure(self, &error);
        }
        self.broadcast();
        true
    }

    fn complete_cancelled(&self, id: u64) {
        let mut core = self.core.lock();
        match &core.attempt {
            Some(attempt) if attempt.id == id => {}
            _ => return,
        }
        core.attempt = None;
        core.state = QueryState::Idle;
        drop(core);

        self.broadcast();
    }

    fn broadcast(&self) {
        for observer in self.observer_list() {
            observer.on_state_changed();
        }
    }

    fn observer_list(&self) -> Vec<QueryObserver<A, V, E>> {
        self.observers.lock().clone()
    }
}

/// Drive one attempt to completion, racing it against its cancellation
/// signal. The token check on every exit keeps superseded completions from
/// overwriting newer state.
async fn execute<A, V, E>(query: Query<A, V, E>, id: u64, signal: CancelSignal) -> Result<V, QueryError<E>>
where
    A: QueryArg,
    V: QueryValue,
    E: QueryFailure,
{
    let fetch = (query.fetcher)(query.arg.clone(), signal.clone());
    let cancelled = std::pin::pin!(signal.cancelled());

    match select(fetch, cancelled).await {
        Either::Left((Ok(value), _)) => {
            if query.complete_success(id, value.clone()) {
                Ok(value)
            } else {
                Err(QueryError::Cancelled)
            }
        }
        Either::Left((Err(error), _)) => {
            let error = Arc::new(error);
            if query.complete_failure(id, Arc::clone(&error)) {
                Err(QueryError::Failed(error))
            } else {
                Err(QueryError::Cancelled)
            }
        }
        Either::Right(((), _)) => {
            query.complete_cancelled(id);
            Err(QueryError::Cancelled)
        }
    }
}
