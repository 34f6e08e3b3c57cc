use std::{sync::Arc, time::Duration};

use crate::{Instant, QueryArg};

/// Equality predicate used to match cached queries to an argument.
pub type KeyEquality<A> = Arc<dyn Fn(&A, &A) -> bool + Send + Sync>;

/// Source of "now" for staleness checks. Swap it out in tests to step time
/// manually.
pub type Clock = Arc<dyn Fn() -> Instant + Send + Sync>;

/// Callback invoked after a successful attempt of the observed query.
pub type SuccessCallback<A, V> = Arc<dyn Fn(SuccessContext<A, V>) + Send + Sync>;

/// Callback invoked after a failed attempt of the observed query.
pub type FailureCallback<A, E> = Arc<dyn Fn(FailureContext<A, E>) + Send + Sync>;

/// Options applying to every query of an [`Endpoint`](crate::Endpoint).
pub struct EndpointOptions<A> {
    /// The duration that should pass before a query is considered stale.
    /// Zero means always stale: every new subscription refetches.
    /// Observers can override this per query.
    pub default_stale_time: Duration,
    /// How cache keys are compared. Defaults to value equality.
    pub key_equality: KeyEquality<A>,
    /// Clock consulted when stamping and aging data.
    pub clock: Clock,
}

impl<A: QueryArg> EndpointOptions<A> {
    /// Replace the default stale time.
    pub fn default_stale_time(mut self, stale_time: Duration) -> Self {
        self.default_stale_time = stale_time;
        self
    }

    /// Replace the key-equality predicate.
    pub fn key_equality(mut self, eq: impl Fn(&A, &A) -> bool + Send + Sync + 'static) -> Self {
        self.key_equality = Arc::new(eq);
        self
    }

    /// Replace the clock.
    pub fn clock(mut self, clock: impl Fn() -> Instant + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }
}

impl<A: QueryArg> Default for EndpointOptions<A> {
    fn default() -> Self {
        Self {
            default_stale_time: Duration::ZERO,
            key_equality: Arc::new(|a: &A, b: &A| a == b),
            clock: Arc::new(Instant::now),
        }
    }
}

impl<A> Clone for EndpointOptions<A> {
    fn clone(&self) -> Self {
        Self {
            default_stale_time: self.default_stale_time,
            key_equality: Arc::clone(&self.key_equality),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<A> std::fmt::Debug for EndpointOptions<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointOptions")
            .field("default_stale_time", &self.default_stale_time)
            .finish()
    }
}

/// Per-observer options, overriding the endpoint-level defaults.
pub struct QueryOptions<A, V, E> {
    /// The duration that should pass before a query is considered stale.
    /// If `None`, the endpoint's default applies.
    pub stale_time: Option<Duration>,
    /// Invoked whenever the observed query completes successfully, before
    /// the state-changed notification.
    pub on_success: Option<SuccessCallback<A, V>>,
    /// Invoked whenever the observed query fails, before the state-changed
    /// notification.
    pub on_failure: Option<FailureCallback<A, E>>,
}

impl<A, V, E> QueryOptions<A, V, E> {
    /// Override the endpoint's stale time.
    pub fn stale_time(mut self, stale_time: Duration) -> Self {
        self.stale_time = Some(stale_time);
        self
    }

    /// Register a success callback.
    pub fn on_success(mut self, callback: impl Fn(SuccessContext<A, V>) + Send + Sync + 'static) -> Self {
        self.on_success = Some(Arc::new(callback));
        self
    }

    /// Register a failure callback.
    pub fn on_failure(mut self, callback: impl Fn(FailureContext<A, E>) + Send + Sync + 'static) -> Self {
        self.on_failure = Some(Arc::new(callback));
        self
    }
}

impl<A, V, E> Default for QueryOptions<A, V, E> {
    fn default() -> Self {
        Self {
            stale_time: None,
            on_success: None,
            on_failure: None,
        }
    }
}

impl<A, V, E> Clone for QueryOptions<A, V, E> {
    fn clone(&self) -> Self {
        Self {
            stale_time: self.stale_time,
            on_success: self.on_success.clone(),
            on_failure: self.on_failure.clone(),
        }
    }
}

impl<A, V, E> std::fmt::Debug for QueryOptions<A, V, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryOptions")
            .field("stale_time", &self.stale_time)
            .field("on_success", &self.on_success.is_some())
            .field("on_failure", &self.on_failure.is_some())
            .finish()
    }
}

/// Context handed to [`QueryOptions::on_success`] callbacks.
#[derive(Debug, Clone)]
pub struct SuccessContext<A, V> {
    /// The argument the query ran with.
    pub arg: A,
    /// The value the query function produced.
    pub result: V,
}

/// Context handed to [`QueryOptions::on_failure`] callbacks.
#[derive(Debug)]
pub struct FailureContext<A, E> {
    /// The argument the query ran with.
    pub arg: A,
    /// The error the query function produced.
    pub error: Arc<E>,
}

impl<A: Clone, E> Clone for FailureContext<A, E> {
    fn clone(&self) -> Self {
        Self {
            arg: self.arg.clone(),
            error: Arc::clone(&self.error),
        }
    }
}
