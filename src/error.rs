use std::sync::Arc;

/// Engine-level outcome of an awaited query attempt.
///
/// Domain failures produced by the query function are carried in `Failed`;
/// the other variants are the engine's own.
#[derive(Debug, thiserror::Error)]
pub enum QueryError<E> {
    /// The attempt was cancelled, or superseded by a newer attempt.
    ///
    /// Cancellation resets the query to idle. It is never recorded as an
    /// error on the query itself.
    #[error("query was cancelled")]
    Cancelled,

    /// The query function returned an error.
    #[error("query function failed")]
    Failed(Arc<E>),

    /// The observer has no current query. Set an argument first.
    #[error("observer is not attached to a query")]
    Detached,
}

impl<E> QueryError<E> {
    /// True for the `Cancelled` variant.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, QueryError::Cancelled)
    }

    /// The underlying query-function error, if this is a `Failed`.
    pub fn failure(&self) -> Option<&Arc<E>> {
        match self {
            QueryError::Failed(error) => Some(error),
            _ => None,
        }
    }
}

impl<E> Clone for QueryError<E> {
    fn clone(&self) -> Self {
        match self {
            Self::Cancelled => Self::Cancelled,
            Self::Failed(error) => Self::Failed(Arc::clone(error)),
            Self::Detached => Self::Detached,
        }
    }
}
