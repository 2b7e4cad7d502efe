use std::sync::Mutex;

use dex_core::{EntityDetails, FetchResult, NameIndexEntry};
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::{lock, normalize_identifier, ListedEntity, RemoteSource};

/// Per-key response cache in front of another source. Only successes are kept.
pub struct Memoized<S> {
    inner: S,
    pages: Mutex<FxHashMap<(usize, usize), Vec<ListedEntity>>>,
    details: Mutex<FxHashMap<String, EntityDetails>>,
    names: Mutex<Option<Vec<NameIndexEntry>>>,
}

impl<S> Memoized<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            pages: Mutex::new(FxHashMap::default()),
            details: Mutex::new(FxHashMap::default()),
            names: Mutex::new(None),
        }
    }

    pub fn inner(&self) -> &S { &self.inner }

    /// Drop every cached response.
    pub fn invalidate(&self) {
        lock(&self.pages).clear();
        lock(&self.details).clear();
        *lock(&self.names) = None;
        debug!("remote cache: invalidated");
    }
}

fn hit(key: &str) {
    metrics::counter!("remote_cache_hits_total", 1);
    debug!(key, "remote cache: hit");
}

#[async_trait::async_trait]
impl<S: RemoteSource> RemoteSource for Memoized<S> {
    async fn fetch_page(&self, offset: usize, limit: usize) -> FetchResult<Vec<ListedEntity>> {
        let cached = lock(&self.pages).get(&(offset, limit)).cloned();
        if let Some(rows) = cached {
            hit(&format!("page:{}:{}", offset, limit));
            return Ok(rows);
        }
        let rows = self.inner.fetch_page(offset, limit).await?;
        lock(&self.pages).insert((offset, limit), rows.clone());
        Ok(rows)
    }

    async fn fetch_details(&self, identifier: &str) -> FetchResult<EntityDetails> {
        let key = normalize_identifier(identifier);
        let cached = lock(&self.details).get(&key).cloned();
        if let Some(d) = cached {
            hit(&key);
            return Ok(d);
        }
        let d = self.inner.fetch_details(&key).await?;
        lock(&self.details).insert(key, d.clone());
        Ok(d)
    }

    async fn fetch_all_names(&self) -> Vec<NameIndexEntry> {
        let cached = lock(&self.names).clone();
        if let Some(names) = cached {
            hit("names");
            return names;
        }
        let names = self.inner.fetch_all_names().await;
        // An empty list is the failure signal; keep it out of the cache.
        if !names.is_empty() {
            *lock(&self.names) = Some(names.clone());
        }
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{fixture, MockSource};

    fn source() -> Memoized<MockSource> {
        Memoized::new(MockSource::from_details(vec![
            fixture(1, "bulbasaur", &["grass", "poison"]),
            fixture(4, "charmander", &["fire"]),
        ]))
    }

    #[tokio::test]
    async fn repeated_requests_hit_the_cache() {
        let src = source();
        src.fetch_page(0, 2).await.expect("page");
        src.fetch_page(0, 2).await.expect("page");
        src.fetch_details("Bulbasaur").await.expect("details");
        src.fetch_details("bulbasaur").await.expect("details");
        assert_eq!(src.inner().page_calls(), 1);
        assert_eq!(src.inner().details_calls(), 1);
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let src = source();
        src.inner().fail_next_pages(1);
        assert!(src.fetch_page(0, 2).await.is_err());
        assert_eq!(src.fetch_page(0, 2).await.expect("retry").len(), 2);
        assert_eq!(src.inner().page_calls(), 2);
    }

    #[tokio::test]
    async fn invalidate_forces_refetch() {
        let src = source();
        assert_eq!(src.fetch_all_names().await.len(), 2);
        src.invalidate();
        assert_eq!(src.fetch_all_names().await.len(), 2);
        assert_eq!(src.inner().names_calls(), 2);
    }
}
