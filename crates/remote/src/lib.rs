//! Dex remote source: the read-only catalog API the client pulls from.
//!
//! The [`RemoteSource`] trait is the seam every other crate depends on. [`HttpSource`]
//! talks to the REST API, [`Memoized`] caches successful responses per key, and
//! [`MockSource`] is an in-memory double for tests.

#![forbid(unsafe_code)]

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dex_core::{EntityDetails, FetchResult, NameIndexEntry};
use serde::{Deserialize, Serialize};

mod http;
mod memo;
mod mock;

pub use http::HttpSource;
pub use memo::Memoized;
pub use mock::{fixture, MockSource};

/// One row of a listing page, before the catalog turns it into an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListedEntity {
    pub id: Option<String>,
    pub name: String,
}

/// Read-only remote catalog. No ordering or transactional guarantees across calls.
#[async_trait::async_trait]
pub trait RemoteSource: Send + Sync {
    /// One page of the listing, in remote order. `limit` must be positive.
    async fn fetch_page(&self, offset: usize, limit: usize) -> FetchResult<Vec<ListedEntity>>;

    /// Full record for a name or numeric id.
    async fn fetch_details(&self, identifier: &str) -> FetchResult<EntityDetails>;

    /// Every known `{name, id}` pair. Returns an empty list on failure instead of erroring.
    async fn fetch_all_names(&self) -> Vec<NameIndexEntry>;
}

#[async_trait::async_trait]
impl<S: RemoteSource + ?Sized> RemoteSource for Arc<S> {
    async fn fetch_page(&self, offset: usize, limit: usize) -> FetchResult<Vec<ListedEntity>> {
        (**self).fetch_page(offset, limit).await
    }

    async fn fetch_details(&self, identifier: &str) -> FetchResult<EntityDetails> {
        (**self).fetch_details(identifier).await
    }

    async fn fetch_all_names(&self) -> Vec<NameIndexEntry> {
        (**self).fetch_all_names().await
    }
}

/// Lowercased, trimmed form used both for requests and cache keys.
pub fn normalize_identifier(identifier: &str) -> String {
    identifier.trim().to_lowercase()
}

/// Last non-empty path segment of a resource url (`.../pokemon/25/` -> `25`).
pub fn id_from_url(url: &str) -> Option<String> {
    url.split('/').filter(|s| !s.is_empty()).last().map(|s| s.to_string())
}

pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
