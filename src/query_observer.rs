use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use std::time::Duration;

use parking_lot::Mutex;
use slotmap::{new_key_type, SlotMap};

use crate::query::{Query, QueryFuture};
use crate::query_cache::QueryCache;
use crate::{
    FailureCallback, FailureContext, QueryArg, QueryData, QueryError, QueryFailure, QueryOptions,
    QueryState, QueryValue, Status, SuccessCallback, SuccessContext,
};

new_key_type! {
    /// Handle for a registered state-changed listener.
    pub struct ListenerKey;
}

type Listener = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ObserverId(u64);

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn next_id() -> ObserverId {
    ObserverId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
}

/// A subscriber to one endpoint, mirroring the state of one query at a time.
///
/// Observers are cheap to clone and clones share state, so a clone can be
/// moved into a callback or task while the original keeps reading flags.
/// An observer starts with no argument; nothing runs until [`set_arg`] or
/// [`trigger`] binds one.
///
/// Detaching is explicit: call [`detach`] when the consuming site tears
/// down, otherwise the observed query keeps the observer alive.
///
/// [`set_arg`]: QueryObserver::set_arg
/// [`trigger`]: QueryObserver::trigger
/// [`detach`]: QueryObserver::detach
pub struct QueryObserver<A, V, E> {
    id: ObserverId,
    cache: QueryCache<A, V, E>,
    stale_time: Duration,
    on_success: Option<SuccessCallback<A, V>>,
    on_failure: Option<FailureCallback<A, E>>,
    current: Arc<Mutex<Option<Query<A, V, E>>>>,
    last_success: Arc<Mutex<Option<LastSuccess<A, V, E>>>>,
    listeners: Arc<Mutex<SlotMap<ListenerKey, Listener>>>,
}

/// The snapshot keeps previous-page data readable even if the recorded
/// query is later reset by a cancellation.
struct LastSuccess<A, V, E> {
    query: Query<A, V, E>,
    data: QueryData<V>,
}

impl<A: Clone, V, E> Clone for QueryObserver<A, V, E> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            cache: self.cache.clone(),
            stale_time: self.stale_time,
            on_success: self.on_success.clone(),
            on_failure: self.on_failure.clone(),
            current: Arc::clone(&self.current),
            last_success: Arc::clone(&self.last_success),
            listeners: Arc::clone(&self.listeners),
        }
    }
}

impl<A, V, E> std::fmt::Debug for QueryObserver<A, V, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryObserver")
            .field("id", &self.id)
            .field("stale_time", &self.stale_time)
            .field("has_arg", &self.current.lock().is_some())
            .field("listeners", &self.listeners.lock().len())
            .finish()
    }
}

impl<A, V, E> QueryObserver<A, V, E>
where
    A: QueryArg,
    V: QueryValue,
    E: QueryFailure,
{
    pub(crate) fn new(
        cache: QueryCache<A, V, E>,
        stale_time: Duration,
        options: QueryOptions<A, V, E>,
    ) -> Self {
        Self {
            id: next_id(),
            cache,
            stale_time,
            on_success: options.on_success,
            on_failure: options.on_failure,
            current: Arc::new(Mutex::new(None)),
            last_success: Arc::new(Mutex::new(None)),
            listeners: Arc::new(Mutex::new(SlotMap::with_key())),
        }
    }

    pub(crate) fn id(&self) -> ObserverId {
        self.id
    }

    /**
     * Argument management.
     */

    /// Point the observer at `arg`, joining the shared cache entry.
    ///
    /// Starts a refetch in the background when the entry is stale and not
    /// already fetching. Pointing at the current argument is a no-op.
    pub fn set_arg(&self, arg: A) {
        let _ = self.resolve_arg(arg);
    }

    /// Like [`set_arg`](Self::set_arg), but waits for the refetch it starts.
    ///
    /// Resolves immediately when no fetch is needed. Fetch failures and
    /// cancellations are returned to the caller.
    pub async fn set_arg_async(&self, arg: A) -> Result<(), QueryError<E>> {
        match self.resolve_arg(arg) {
            Some(future) => future.await.map(drop),
            None => Ok(()),
        }
    }

    fn resolve_arg(&self, arg: A) -> Option<QueryFuture<V, E>> {
        let query = self.cache.get_or_create(arg);
        if !self.adopt(query.clone()) {
            return None;
        }
        if !query.is_fetching() && query.is_stale(self.stale_time) {
            Some(query.refetch())
        } else {
            None
        }
    }

    /// Run the query function for `arg` outside the shared cache,
    /// unconditionally.
    ///
    /// This is the mutation pattern: the call always executes, even when a
    /// cached success for the same argument exists, and its entry is never
    /// visible to other observers.
    pub fn trigger(&self, arg: A) {
        let query = self.cache.detached(arg);
        self.adopt(query.clone());
        let _ = query.refetch();
    }

    /// Like [`trigger`](Self::trigger), but waits for the result.
    pub async fn trigger_async(&self, arg: A) -> Result<V, QueryError<E>> {
        let query = self.cache.detached(arg);
        self.adopt(query.clone());
        query.refetch().await
    }

    /// Switch to `query`, leaving the previous one. Returns false when
    /// `query` is already current.
    fn adopt(&self, query: Query<A, V, E>) -> bool {
        let previous = {
            let mut current = self.current.lock();
            if current.as_ref().is_some_and(|existing| existing.same(&query)) {
                return false;
            }
            current.replace(query.clone())
        };
        if let Some(previous) = previous {
            previous.unsubscribe(self);
        }
        query.subscribe(self);
        self.notify_listeners();
        true
    }

    /**
     * Imperative control.
     */

    /// Refetch the current query in the background. Deduplicates against an
    /// attempt already in flight.
    pub fn refetch(&self) {
        match self.current() {
            Some(query) => {
                let _ = query.refetch();
            }
            None => tracing::warn!("refetch called on an observer with no argument"),
        }
    }

    /// Refetch the current query and wait for its result.
    ///
    /// Fails with [`QueryError::Detached`] when no argument has been set.
    pub async fn refetch_async(&self) -> Result<V, QueryError<E>> {
        let query = self.current().ok_or(QueryError::Detached)?;
        query.refetch().await
    }

    /// Cancel the current query's in-flight attempt, if any.
    pub fn cancel(&self) -> bool {
        self.current().map(|query| query.cancel()).unwrap_or(false)
    }

    /// Leave the current query. Idempotent.
    pub fn detach(&self) {
        let previous = self.current.lock().take();
        if let Some(query) = previous {
            query.unsubscribe(self);
        }
        if !self.listeners.lock().is_empty() {
            tracing::debug!(id = ?self.id, "observer detached with listeners still registered");
        }
    }

    /**
     * Listeners.
     */

    /// Register a listener fired after every observable state change.
    ///
    /// The listener gets no payload; re-read the derived flags instead.
    pub fn add_listener(&self, listener: impl Fn() + Send + Sync + 'static) -> ListenerKey {
        self.listeners.lock().insert(Arc::new(listener))
    }

    /// Remove a listener. Returns false if it was not registered.
    pub fn remove_listener(&self, key: ListenerKey) -> bool {
        self.listeners.lock().remove(key).is_some()
    }

    /**
     * Derived state.
     */

    /// Snapshot of the current query's state. `Idle` without an argument.
    pub fn state(&self) -> QueryState<V, E> {
        self.current()
            .map(|query| query.get_state())
            .unwrap_or_default()
    }

    /// Coarse status of the current query.
    pub fn status(&self) -> Status {
        self.current()
            .map(|query| query.with_state(|state| state.status()))
            .unwrap_or(Status::Idle)
    }

    /// Data of the current query, including stale data kept across a
    /// refetch or failure.
    pub fn data(&self) -> Option<V> {
        self.current()
            .and_then(|query| query.with_state(|state| state.data().cloned()))
    }

    /// Current data if the query is successful, otherwise the data of the
    /// last query this observer saw succeed.
    ///
    /// Never reset once set, so previous-page data stays visible while the
    /// next page loads.
    pub fn last_data(&self) -> Option<V> {
        if let Some(query) = self.current() {
            let data = query.with_state(|state| match state {
                QueryState::Success(data) => Some(data.data.clone()),
                _ => None,
            });
            if data.is_some() {
                return data;
            }
        }
        let last = self.last_success.lock();
        last.as_ref().map(|record| {
            record
                .query
                .with_state(|state| state.data().cloned())
                .unwrap_or_else(|| record.data.data.clone())
        })
    }

    /// Error of the current query, if it is in the error state.
    pub fn error(&self) -> Option<Arc<E>> {
        self.current()
            .and_then(|query| query.with_state(|state| state.error().cloned()))
    }

    /// First fetch in flight, no data yet.
    pub fn is_loading(&self) -> bool {
        self.status() == Status::Loading
    }

    /// Any attempt in flight, including background refetches.
    pub fn is_fetching(&self) -> bool {
        self.current().map(|query| query.is_fetching()).unwrap_or(false)
    }

    /// Last completed attempt produced data.
    pub fn is_success(&self) -> bool {
        self.status() == Status::Success
    }

    /// Last completed attempt failed.
    pub fn is_error(&self) -> bool {
        self.status() == Status::Error
    }

    /// No attempt has run for the current argument.
    pub fn is_uninitialized(&self) -> bool {
        self.status() == Status::Idle
    }

    /// Whether the current query has been explicitly invalidated and not
    /// yet refreshed.
    pub fn is_invalidated(&self) -> bool {
        self.current()
            .map(|query| query.is_invalidated())
            .unwrap_or(false)
    }

    /// Whether any data is readable, stale or fresh.
    pub fn has_data(&self) -> bool {
        self.current()
            .map(|query| query.with_state(|state| state.data().is_some()))
            .unwrap_or(false)
    }

    /// The argument the observer currently points at.
    pub fn arg(&self) -> Option<A> {
        self.current().map(|query| query.arg().clone())
    }

    /// Whether an argument has been set.
    pub fn has_arg(&self) -> bool {
        self.current.lock().is_some()
    }

    /**
     * Notifications from the observed query.
     */

    pub(crate) fn on_query_success(&self, query: &Query<A, V, E>, data: &QueryData<V>) {
        let is_current = self
            .current
            .lock()
            .as_ref()
            .is_some_and(|current| current.same(query));
        if is_current {
            *self.last_success.lock() = Some(LastSuccess {
                query: query.clone(),
                data: data.clone(),
            });
        }
        if let Some(on_success) = &self.on_success {
            on_success(SuccessContext {
                arg: query.arg().clone(),
                result: data.data.clone(),
            });
        }
    }

    pub(crate) fn on_query_failure(&self, query: &Query<A, V, E>, error: &Arc<E>) {
        if let Some(on_failure) = &self.on_failure {
            on_failure(FailureContext {
                arg: query.arg().clone(),
                error: Arc::clone(error),
            });
        }
    }

    pub(crate) fn on_state_changed(&self) {
        self.notify_listeners();
    }

    fn notify_listeners(&self) {
        let listeners: Vec<Listener> = self.listeners.lock().values().cloned().collect();
        for listener in listeners {
            listener();
        }
    }

    fn current(&self) -> Option<Query<A, V, E>> {
        self.current.lock().clone()
    }
}
