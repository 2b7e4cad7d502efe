use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use dex_core::{EntityDetails, FetchError, FetchResult, NameIndexEntry, Sprites, Stat};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::{lock, normalize_identifier, ListedEntity, RemoteSource};

/// Detail record with the given identity and types; other fields get small fixed values.
pub fn fixture(id: u32, name: &str, types: &[&str]) -> EntityDetails {
    EntityDetails {
        id,
        name: name.to_string(),
        types: types.iter().map(|t| t.to_string()).collect(),
        abilities: vec![format!("{}-ability", name)],
        moves: vec![format!("{}-move", name)],
        sprites: Sprites::default(),
        stats: vec![Stat { name: "hp".into(), value: 50 }],
        height: 1,
        weight: 1,
    }
}

/// Simple in-memory source for tests. Failures and latency are scripted per call.
#[derive(Default)]
pub struct MockSource {
    listing: Vec<ListedEntity>,
    details: FxHashMap<String, EntityDetails>,
    names: Vec<NameIndexEntry>,
    page_failures: AtomicUsize,
    names_fail: bool,
    failing_details: Mutex<FxHashSet<String>>,
    details_delay: FxHashMap<String, Duration>,
    page_delay: Option<Duration>,
    page_calls: AtomicUsize,
    details_calls: AtomicUsize,
    names_calls: AtomicUsize,
    details_log: Mutex<Vec<String>>,
}

impl MockSource {
    /// Listing, details and name list all derived from the same records, in the given order.
    pub fn from_details(records: Vec<EntityDetails>) -> Self {
        let listing = records.iter().map(|d| ListedEntity { id: Some(d.id.to_string()), name: d.name.clone() }).collect();
        let names = records.iter().map(|d| NameIndexEntry { name: d.name.clone(), id: d.id.to_string() }).collect();
        let details = records.into_iter().map(|d| (d.name.to_lowercase(), d)).collect();
        Self { listing, details, names, ..Self::default() }
    }

    /// Replace the paginated listing, e.g. to inject duplicates across pages.
    pub fn with_listing(mut self, listing: Vec<ListedEntity>) -> Self {
        self.listing = listing;
        self
    }

    pub fn with_names(mut self, names: Vec<NameIndexEntry>) -> Self {
        self.names = names;
        self
    }

    /// Name list requests degrade to an empty list.
    pub fn with_failing_names(mut self) -> Self {
        self.names_fail = true;
        self
    }

    pub fn with_details_delay(mut self, name: &str, delay: Duration) -> Self {
        self.details_delay.insert(normalize_identifier(name), delay);
        self
    }

    pub fn with_page_delay(mut self, delay: Duration) -> Self {
        self.page_delay = Some(delay);
        self
    }

    /// The next `n` page requests fail with a remote error.
    pub fn fail_next_pages(&self, n: usize) {
        self.page_failures.store(n, Ordering::SeqCst);
    }

    /// Detail requests for `name` fail with a remote error until cleared.
    pub fn fail_details_for(&self, name: &str) {
        lock(&self.failing_details).insert(normalize_identifier(name));
    }

    pub fn page_calls(&self) -> usize { self.page_calls.load(Ordering::SeqCst) }
    pub fn details_calls(&self) -> usize { self.details_calls.load(Ordering::SeqCst) }
    pub fn names_calls(&self) -> usize { self.names_calls.load(Ordering::SeqCst) }

    /// Detail identifiers in request order.
    pub fn details_requested(&self) -> Vec<String> { lock(&self.details_log).clone() }

    fn take_page_failure(&self) -> bool {
        self.page_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait::async_trait]
impl RemoteSource for MockSource {
    async fn fetch_page(&self, offset: usize, limit: usize) -> FetchResult<Vec<ListedEntity>> {
        self.page_calls.fetch_add(1, Ordering::SeqCst);
        if limit == 0 {
            return Err(FetchError::InvalidArgument("limit must be greater than zero".into()));
        }
        if let Some(d) = self.page_delay {
            tokio::time::sleep(d).await;
        }
        if self.take_page_failure() {
            return Err(FetchError::Remote("simulated network error".into()));
        }
        Ok(self.listing.iter().skip(offset).take(limit).cloned().collect())
    }

    async fn fetch_details(&self, identifier: &str) -> FetchResult<EntityDetails> {
        self.details_calls.fetch_add(1, Ordering::SeqCst);
        let key = normalize_identifier(identifier);
        lock(&self.details_log).push(key.clone());
        if let Some(d) = self.details_delay.get(&key) {
            tokio::time::sleep(*d).await;
        }
        if lock(&self.failing_details).contains(&key) {
            return Err(FetchError::Remote(format!("simulated failure for {}", key)));
        }
        self.details
            .get(&key)
            .or_else(|| self.details.values().find(|d| d.id.to_string() == key))
            .cloned()
            .ok_or(FetchError::NotFound(key))
    }

    async fn fetch_all_names(&self) -> Vec<NameIndexEntry> {
        self.names_calls.fetch_add(1, Ordering::SeqCst);
        if self.names_fail {
            return Vec::new();
        }
        self.names.clone()
    }
}
