#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! # About Endpoint Query
//!
//! Endpoint Query is an asynchronous query-state management library.
//!
//! It turns individual async call sites, typically remote fetches, into
//! observable, cache-backed, deduplicated state machines. Declare an
//! [`Endpoint`] around an async function and derive [`QueryObserver`]s from
//! it; observers pointed at the same argument share one in-flight request
//! and one cached result.
//!
//! An endpoint provides:
//! - caching
//! - de-duplication
//! - invalidation
//! - cancellation
//! - manual cache updates
//! - prefetching
//!
//! # A Simple Example
//!
//! Make a key type and an endpoint around a fetcher:
//!
//! ```
//! use endpoint_query::{Endpoint, QueryOptions, Status};
//!
//! // Argument identifying the fetched resource.
//! #[derive(Debug, Clone, PartialEq)]
//! struct TrackId(u32);
//!
//! # async fn demo() -> Result<(), endpoint_query::QueryError<String>> {
//! let endpoint: Endpoint<TrackId, String, String> =
//!     Endpoint::new(|id: TrackId, _signal| async move {
//!         // Fetch the track from your API here.
//!         Ok(format!("track-{}", id.0))
//!     });
//!
//! let tracks = endpoint.use_query(QueryOptions::default());
//! tracks.set_arg_async(TrackId(1)).await?;
//!
//! assert_eq!(tracks.status(), Status::Success);
//! assert_eq!(tracks.data(), Some("track-1".to_string()));
//! # Ok(())
//! # }
//! ```
//!
//! A rendering host subscribes with [`QueryObserver::add_listener`] and
//! re-reads the derived flags on every notification. Call
//! [`QueryObserver::detach`] when the consuming site tears down.
//!
//! Side-effecting calls that must always execute go through
//! [`QueryObserver::trigger`], which bypasses the shared cache.

mod cancellation;
mod endpoint;
mod error;
mod instant;
mod query;
mod query_cache;
mod query_observer;
mod query_options;
mod query_state;
mod util;

pub use cancellation::*;
pub use endpoint::*;
pub use error::*;
pub use instant::*;
pub use query_observer::{ListenerKey, QueryObserver};
pub use query_options::*;
pub use query_state::*;

/// Convenience trait for query argument requirements.
pub trait QueryArg: std::fmt::Debug + Clone + PartialEq + Send + Sync + 'static {}
impl<A> QueryArg for A where A: std::fmt::Debug + Clone + PartialEq + Send + Sync + 'static {}

/// Convenience trait for query value requirements.
pub trait QueryValue: std::fmt::Debug + Clone + Send + Sync + 'static {}
impl<V> QueryValue for V where V: std::fmt::Debug + Clone + Send + Sync + 'static {}

/// Convenience trait for query error requirements.
pub trait QueryFailure: std::fmt::Debug + Send + Sync + 'static {}
impl<E> QueryFailure for E where E: std::fmt::Debug + Send + Sync + 'static {}
