use std::{future::Future, sync::Arc};

use futures::future::{select, Either, FutureExt};

use crate::query::{Fetcher, QueryFuture};
use crate::query_cache::QueryCache;
use crate::{
    CancelSignal, EndpointOptions, QueryArg, QueryError, QueryFailure, QueryObserver, QueryOptions,
    QueryState, QueryValue,
};

/// An async function together with the cache of its results.
///
/// An endpoint turns a function `(A, CancelSignal) -> Result<V, E>` into
/// observable, cache-backed, deduplicated query state. Observers created
/// with [`use_query`](Self::use_query) and pointed at the same argument
/// share one in-flight attempt and one cached result.
///
/// Queries can be:
/// - [Prefetched](Self::prefetch): populated before any observer needs them.
/// - [Invalidated](Self::invalidate): marked stale, refetching in the
///   background wherever observed.
/// - [Manually updated](Self::update_query_data): useful after a mutation
///   whose response already carries the fresh value.
/// - [Introspected](Self::query_state): read the cached state for an
///   argument without subscribing.
///
/// Cloning an endpoint is cheap and shares the cache.
pub struct Endpoint<A, V, E> {
    fetcher: Fetcher<A, V, E>,
    cache: QueryCache<A, V, E>,
    options: EndpointOptions<A>,
}

impl<A, V, E> Clone for Endpoint<A, V, E> {
    fn clone(&self) -> Self {
        Self {
            fetcher: Arc::clone(&self.fetcher),
            cache: self.cache.clone(),
            options: self.options.clone(),
        }
    }
}

impl<A, V, E> std::fmt::Debug for Endpoint<A, V, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("options", &self.options)
            .finish()
    }
}

impl<A, V, E> Endpoint<A, V, E>
where
    A: QueryArg,
    V: QueryValue,
    E: QueryFailure,
{
    /// Creates an endpoint with default options.
    pub fn new<F, Fu>(fetcher: F) -> Self
    where
        F: Fn(A, CancelSignal) -> Fu + Send + Sync + 'static,
        Fu: Future<Output = Result<V, E>> + Send + 'static,
    {
        Self::with_options(fetcher, EndpointOptions::default())
    }

    /// Creates an endpoint with custom options.
    ///
    /// Example:
    /// ```
    /// use std::time::Duration;
    /// use endpoint_query::{Endpoint, EndpointOptions};
    ///
    /// let endpoint: Endpoint<u32, String, std::io::Error> = Endpoint::with_options(
    ///     |id: u32, _signal| async move { Ok(id.to_string()) },
    ///     EndpointOptions::default().default_stale_time(Duration::from_secs(10)),
    /// );
    /// ```
    pub fn with_options<F, Fu>(fetcher: F, options: EndpointOptions<A>) -> Self
    where
        F: Fn(A, CancelSignal) -> Fu + Send + Sync + 'static,
        Fu: Future<Output = Result<V, E>> + Send + 'static,
    {
        let fetcher: Fetcher<A, V, E> =
            Arc::new(move |arg, signal| fetcher(arg, signal).boxed());
        let cache = QueryCache::new(
            Arc::clone(&fetcher),
            Arc::clone(&options.key_equality),
            Arc::clone(&options.clock),
        );
        Self {
            fetcher,
            cache,
            options,
        }
    }

    /// Creates an observer bound to this endpoint.
    ///
    /// The observer has no argument yet; supply one with
    /// [`QueryObserver::set_arg`] or run a one-off call with
    /// [`QueryObserver::trigger`].
    pub fn use_query(&self, options: QueryOptions<A, V, E>) -> QueryObserver<A, V, E> {
        let stale_time = options
            .stale_time
            .unwrap_or(self.options.default_stale_time);
        QueryObserver::new(self.cache.clone(), stale_time, options)
    }

    /// Calls the query function directly, bypassing the cache entirely.
    ///
    /// Nothing is stored and no observer sees the call. The `signal` is
    /// passed through to the function and raced against it, so cancelling
    /// resolves this future with [`QueryError::Cancelled`] even if the
    /// function ignores the signal.
    pub async fn invoke(&self, arg: A, signal: CancelSignal) -> Result<V, QueryError<E>> {
        let fetch = (self.fetcher)(arg, signal.clone());
        let cancelled = std::pin::pin!(signal.cancelled());
        match select(fetch, cancelled).await {
            Either::Left((Ok(value), _)) => Ok(value),
            Either::Left((Err(error), _)) => Err(QueryError::Failed(Arc::new(error))),
            Either::Right(((), _)) => Err(QueryError::Cancelled),
        }
    }

    /// Populate the cache for `arg` in the background.
    ///
    /// Fetches only when the entry has never loaded or last failed; a
    /// successful entry is left alone. The entry is retained, so a
    /// subscription following the prefetch picks it up.
    pub fn prefetch(&self, arg: A) {
        let _ = self.start_prefetch(arg);
    }

    /// Like [`prefetch`](Self::prefetch), but waits for the fetch it starts.
    pub async fn prefetch_async(&self, arg: A) -> Result<(), QueryError<E>> {
        match self.start_prefetch(arg) {
            Some(future) => future.await.map(drop),
            None => Ok(()),
        }
    }

    fn start_prefetch(&self, arg: A) -> Option<QueryFuture<V, E>> {
        let query = self.cache.get_or_create(arg);
        let needs_fetch = query.with_state(|state| {
            matches!(state, QueryState::Idle | QueryState::Error { .. })
        });
        if needs_fetch {
            Some(query.refetch())
        } else {
            None
        }
    }

    /// Mark the cached query for `arg` stale.
    ///
    /// An observed query refetches immediately in the background; an
    /// unobserved one refetches on its next subscription. Returns false
    /// when no entry exists.
    pub fn invalidate(&self, arg: &A) -> bool {
        self.cache.invalidate(arg)
    }

    /// Invalidate every cached query whose argument matches the predicate.
    /// Returns the number of matches.
    pub fn invalidate_where(&self, predicate: impl Fn(&A) -> bool) -> usize {
        self.cache.invalidate_where(predicate)
    }

    /// Invalidate every cached query of this endpoint.
    pub fn invalidate_all(&self) {
        self.cache.invalidate_all()
    }

    /// Immediately set the cached data for `arg`, as if a fetch had
    /// succeeded, without calling the query function.
    ///
    /// Returns false when no entry exists for `arg`.
    pub fn update_query_data(&self, arg: &A, value: V) -> bool {
        self.cache.update_query_data(arg, value)
    }

    /// Mutate the cached data for `arg` in place, if any is present.
    ///
    /// Observers are notified; the data's update stamp is kept.
    pub fn update_query_data_mut(&self, arg: &A, func: impl FnOnce(&mut V)) -> bool {
        self.cache.update_query_data_mut(arg, func)
    }

    /// Cancel the in-flight attempt for `arg`, if any.
    /// Returns whether an attempt was cancelled.
    pub fn cancel_query(&self, arg: &A) -> bool {
        self.cache.cancel(arg)
    }

    /// The cached state for `arg`, or `None` when no entry exists.
    pub fn query_state(&self, arg: &A) -> Option<QueryState<V, E>> {
        self.cache.query_state(arg)
    }

    /// The number of cached queries.
    pub fn size(&self) -> usize {
        self.cache.size()
    }
}
