use std::sync::Arc;

use crate::Instant;

/// The lifecycle of a query.
///
/// Each variant corresponds to a particular state of a query in its lifecycle,
/// from creation through fetching and completion. Stale data survives across
/// transitions: a failed refetch keeps the previously loaded value around, and
/// a query refetching after an error carries that value through `Loading`.
pub enum QueryState<V, E> {
    /// No attempt has been started, or the last attempt was cancelled.
    ///
    /// A query returns to this state when its in-flight attempt is cancelled,
    /// discarding any previously loaded data.
    Idle,

    /// An attempt is in flight and no current success exists.
    ///
    /// The payload holds data retained from an earlier success when the query
    /// re-entered `Loading` from `Error`.
    Loading(Option<QueryData<V>>),

    /// The most recent completed attempt produced data.
    ///
    /// A query stays in this state during a background refetch; whether an
    /// attempt is in flight is tracked separately.
    Success(QueryData<V>),

    /// The most recent completed attempt failed.
    Error {
        /// The failure produced by the query function.
        error: Arc<E>,
        /// Data from an earlier success, if one occurred.
        prior: Option<QueryData<V>>,
    },
}

impl<V, E> QueryState<V, E> {
    /// The coarse status of this state.
    pub fn status(&self) -> Status {
        match self {
            QueryState::Idle => Status::Idle,
            QueryState::Loading(_) => Status::Loading,
            QueryState::Success(_) => Status::Success,
            QueryState::Error { .. } => Status::Error,
        }
    }

    /// Returns the QueryData for the current QueryState, if present.
    ///
    /// Stale data carried through `Loading` and `Error` counts.
    pub fn query_data(&self) -> Option<&QueryData<V>> {
        match self {
            QueryState::Idle => None,
            QueryState::Loading(prior) => prior.as_ref(),
            QueryState::Success(data) => Some(data),
            QueryState::Error { prior, .. } => prior.as_ref(),
        }
    }

    /// Returns the data contained within the QueryState, if present.
    pub fn data(&self) -> Option<&V> {
        self.query_data().map(|s| &s.data)
    }

    /// Returns the last updated timestamp for the QueryState, if present.
    pub fn updated_at(&self) -> Option<Instant> {
        self.query_data().map(|s| s.updated_at)
    }

    /// Returns the error for the current QueryState, if present.
    pub fn error(&self) -> Option<&Arc<E>> {
        match self {
            QueryState::Error { error, .. } => Some(error),
            _ => None,
        }
    }

    pub(crate) fn data_mut(&mut self) -> Option<&mut V> {
        match self {
            QueryState::Idle => None,
            QueryState::Loading(prior) => prior.as_mut().map(|d| &mut d.data),
            QueryState::Success(data) => Some(&mut data.data),
            QueryState::Error { prior, .. } => prior.as_mut().map(|d| &mut d.data),
        }
    }
}

impl<V, E> Default for QueryState<V, E> {
    fn default() -> Self {
        QueryState::Idle
    }
}

impl<V: Clone, E> Clone for QueryState<V, E> {
    fn clone(&self) -> Self {
        match self {
            Self::Idle => Self::Idle,
            Self::Loading(prior) => Self::Loading(prior.clone()),
            Self::Success(data) => Self::Success(data.clone()),
            Self::Error { error, prior } => Self::Error {
                error: Arc::clone(error),
                prior: prior.clone(),
            },
        }
    }
}

impl<V, E> std::fmt::Debug for QueryState<V, E>
where
    V: std::fmt::Debug,
    E: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Loading(prior) => f.debug_tuple("Loading").field(prior).finish(),
            Self::Success(data) => f.debug_tuple("Success").field(data).finish(),
            Self::Error { error, prior } => f
                .debug_struct("Error")
                .field("error", error)
                .field("prior", prior)
                .finish(),
        }
    }
}

/// Coarse lifecycle status, projected from [`QueryState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// No attempt started, or reset by cancellation.
    Idle,
    /// First fetch in flight.
    Loading,
    /// Last completed attempt produced data.
    Success,
    /// Last completed attempt failed.
    Error,
}

/// The latest data for a query.
#[derive(Clone, PartialEq, Eq)]
pub struct QueryData<V> {
    /// The Data.
    pub data: V,
    /// The instant this data was retrieved.
    pub updated_at: Instant,
}

impl<V> QueryData<V> {
    /// Creates a new QueryData stamped with the given instant.
    pub fn at(data: V, updated_at: Instant) -> Self {
        Self { data, updated_at }
    }
}

impl<V> std::fmt::Debug for QueryData<V>
where
    V: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryData")
            .field("data", &self.data)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn data(value: &str) -> QueryData<String> {
        QueryData::at(value.to_string(), Instant(Duration::from_millis(5)))
    }

    #[test]
    fn status_projection() {
        let idle = QueryState::<String, String>::Idle;
        assert_eq!(idle.status(), Status::Idle);
        assert!(idle.data().is_none());

        let loading = QueryState::<String, String>::Loading(None);
        assert_eq!(loading.status(), Status::Loading);

        let success = QueryState::<String, String>::Success(data("a"));
        assert_eq!(success.status(), Status::Success);
        assert_eq!(success.data(), Some(&"a".to_string()));
    }

    #[test]
    fn stale_data_survives_error_and_loading() {
        let failed = QueryState::<String, String>::Error {
            error: Arc::new("boom".to_string()),
            prior: Some(data("kept")),
        };
        assert_eq!(failed.status(), Status::Error);
        assert_eq!(failed.data(), Some(&"kept".to_string()));
        assert!(failed.error().is_some());

        let reloading = QueryState::<String, String>::Loading(Some(data("kept")));
        assert_eq!(reloading.data(), Some(&"kept".to_string()));
        assert!(reloading.updated_at().is_some());
    }
}
