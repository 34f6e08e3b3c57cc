use std::sync::Arc;

use parking_lot::Mutex;

use crate::query::{Fetcher, Query};
use crate::{Clock, KeyEquality, QueryArg, QueryFailure, QueryState, QueryValue};

/// Keyed store of the queries of one endpoint.
///
/// Entries are retained once created; an entry created by prefetch is still
/// there for the subscription that follows. Key equality is the endpoint's
/// configured predicate, so lookups scan rather than hash.
pub(crate) struct QueryCache<A, V, E> {
    fetcher: Fetcher<A, V, E>,
    key_equality: KeyEquality<A>,
    clock: Clock,
    entries: Arc<Mutex<Vec<Query<A, V, E>>>>,
}

impl<A, V, E> Clone for QueryCache<A, V, E> {
    fn clone(&self) -> Self {
        Self {
            fetcher: Arc::clone(&self.fetcher),
            key_equality: Arc::clone(&self.key_equality),
            clock: Arc::clone(&self.clock),
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<A, V, E> QueryCache<A, V, E>
where
    A: QueryArg,
    V: QueryValue,
    E: QueryFailure,
{
    pub fn new(fetcher: Fetcher<A, V, E>, key_equality: KeyEquality<A>, clock: Clock) -> Self {
        Self {
            fetcher,
            key_equality,
            clock,
            entries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn get_or_create(&self, arg: A) -> Query<A, V, E> {
        let mut entries = self.entries.lock();
        if let Some(query) = entries
            .iter()
            .find(|query| (self.key_equality)(query.arg(), &arg))
        {
            return query.clone();
        }
        let query = Query::new(arg, Arc::clone(&self.fetcher), Arc::clone(&self.clock));
        entries.push(query.clone());
        query
    }

    /// A fresh query that is never inserted into the store. Backs the
    /// trigger path, so mutation-style calls cannot collide with cached
    /// entries.
    pub fn detached(&self, arg: A) -> Query<A, V, E> {
        Query::new(arg, Arc::clone(&self.fetcher), Arc::clone(&self.clock))
    }

    pub fn get(&self, arg: &A) -> Option<Query<A, V, E>> {
        self.entries
            .lock()
            .iter()
            .find(|query| (self.key_equality)(query.arg(), arg))
            .cloned()
    }

    pub fn invalidate(&self, arg: &A) -> bool {
        match self.get(arg) {
            Some(query) => {
                query.invalidate();
                true
            }
            None => false,
        }
    }

    pub fn invalidate_where(&self, predicate: impl Fn(&A) -> bool) -> usize {
        let matches: Vec<_> = self
            .entries
            .lock()
            .iter()
            .filter(|query| predicate(query.arg()))
            .cloned()
            .collect();
        for query in &matches {
            query.invalidate();
        }
        matches.len()
    }

    pub fn invalidate_all(&self) {
        let entries: Vec<_> = self.entries.lock().clone();
        for query in &entries {
            query.invalidate();
        }
    }

    pub fn update_query_data(&self, arg: &A, value: V) -> bool {
        match self.get(arg) {
            Some(query) => {
                query.update_data(value);
                true
            }
            None => false,
        }
    }

    pub fn update_query_data_mut(&self, arg: &A, func: impl FnOnce(&mut V)) -> bool {
        match self.get(arg) {
            Some(query) => query.update_data_mut(func),
            None => false,
        }
    }

    pub fn cancel(&self, arg: &A) -> bool {
        match self.get(arg) {
            Some(query) => query.cancel(),
            None => false,
        }
    }

    pub fn query_state(&self, arg: &A) -> Option<QueryState<V, E>> {
        self.get(arg).map(|query| query.get_state())
    }

    pub fn size(&self) -> usize {
        self.entries.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CancelSignal, Instant};
    use futures::FutureExt;
    use std::time::Duration;

    fn cache_with_default_keys() -> QueryCache<u32, String, String> {
        let fetcher: Fetcher<u32, String, String> =
            Arc::new(|arg, _signal: CancelSignal| async move { Ok(arg.to_string()) }.boxed());
        QueryCache::new(
            fetcher,
            Arc::new(|a: &u32, b: &u32| a == b),
            Arc::new(Instant::now),
        )
    }

    #[test]
    fn get_or_create_returns_the_same_query() {
        let cache = cache_with_default_keys();
        let first = cache.get_or_create(1);
        let second = cache.get_or_create(1);
        assert!(first.same(&second));
        assert_eq!(cache.size(), 1);

        let other = cache.get_or_create(2);
        assert!(!first.same(&other));
        assert_eq!(cache.size(), 2);
    }

    #[test]
    fn detached_queries_never_enter_the_store() {
        let cache = cache_with_default_keys();
        let cached = cache.get_or_create(1);
        let detached = cache.detached(1);
        assert!(!cached.same(&detached));
        assert_eq!(cache.size(), 1);
        assert!(cache.get(&1).unwrap().same(&cached));
    }

    #[test]
    fn custom_key_equality_drives_lookup() {
        let fetcher: Fetcher<String, String, String> =
            Arc::new(|arg, _signal: CancelSignal| async move { Ok(arg) }.boxed());
        let cache = QueryCache::new(
            fetcher,
            Arc::new(|a: &String, b: &String| a.eq_ignore_ascii_case(b)),
            Arc::new(Instant::now),
        );

        let lower = cache.get_or_create("page".to_string());
        let upper = cache.get_or_create("PAGE".to_string());
        assert!(lower.same(&upper));
        assert_eq!(cache.size(), 1);
    }

    #[test]
    fn invalidate_where_counts_matches() {
        let cache = cache_with_default_keys();
        cache.get_or_create(1);
        cache.get_or_create(2);
        cache.get_or_create(3);

        assert_eq!(cache.invalidate_where(|arg| *arg >= 2), 2);
        assert!(!cache.get(&1).unwrap().is_invalidated());
        assert!(cache.get(&2).unwrap().is_invalidated());
        assert!(cache.get(&3).unwrap().is_invalidated());
    }

    #[test]
    fn update_query_data_requires_an_entry() {
        let cache = cache_with_default_keys();
        assert!(!cache.update_query_data(&1, "manual".to_string()));

        cache.get_or_create(1);
        assert!(cache.update_query_data(&1, "manual".to_string()));
        assert_eq!(
            cache.query_state(&1).unwrap().data(),
            Some(&"manual".to_string())
        );
    }

    #[test]
    fn stale_time_zero_marks_fresh_entries_stale() {
        let cache = cache_with_default_keys();
        let query = cache.get_or_create(1);
        assert!(query.is_stale(Duration::from_secs(600)));

        query.update_data("cached".to_string());
        assert!(!query.is_stale(Duration::from_secs(600)));
        assert!(query.is_stale(Duration::ZERO));
    }
}
