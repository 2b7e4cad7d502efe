//! Dex session façade (in-process).
//!
//! [`Dex`] wires one remote source, the catalog store, the pager, the enricher, the name
//! index and the search resolver together. Frontends (the CLI today) only talk to this type.

#![forbid(unsafe_code)]

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use dex_core::FetchError;
use dex_remote::{HttpSource, Memoized, RemoteSource};
use dex_search::{project, NameIndexCell, SearchResolver, SUGGESTION_LIMIT};
use dex_store::{spawn_enricher, CatalogStore, EnrichOpts, EnricherHandle, LoadError, Pager};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info};

pub use dex_search::{is_unknown, SearchPhase, SearchState, TypeFilter, ALL_TYPES};
pub use dex_core::{DexConfig, Entity, EntityDetails};
pub use dex_store::{CatalogSnapshot, PageOutcome};

/// API errors, serializable so frontends can print them as JSON.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum DexError {
    #[error("invalid_argument: {0}")]
    InvalidArgument(String),
    #[error("not_found: {0}")]
    NotFound(String),
    #[error("remote: {0}")]
    Remote(String),
    #[error("busy: {0}")]
    Busy(String),
}

impl From<FetchError> for DexError {
    fn from(e: FetchError) -> Self {
        match e {
            FetchError::InvalidArgument(m) => DexError::InvalidArgument(m),
            FetchError::NotFound(m) => DexError::NotFound(m),
            FetchError::Remote(m) => DexError::Remote(m),
        }
    }
}

impl From<LoadError> for DexError {
    fn from(e: LoadError) -> Self {
        match e {
            LoadError::Fetch(f) => f.into(),
            LoadError::InFlight => DexError::Busy(LoadError::InFlight.to_string()),
        }
    }
}

impl DexError {
    /// Transient failures; the same call may succeed if repeated.
    pub fn is_retryable(&self) -> bool { matches!(self, DexError::Remote(_)) }
}

pub type DexResult<T> = Result<T, DexError>;

/// Session counters exposed to clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Status {
    pub items: usize,
    pub epoch: u64,
    pub pages_loaded: Option<u64>,
    pub next_offset: Option<usize>,
    pub exhausted: bool,
    pub pending_enrichment: usize,
    pub name_index_entries: Option<usize>,
    pub type_filter: String,
    pub last_error: Option<String>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> { m.lock().unwrap_or_else(PoisonError::into_inner) }

/// One browsing session against a remote catalog.
pub struct Dex {
    cfg: DexConfig,
    memo: Arc<Memoized<Arc<dyn RemoteSource>>>,
    source: Arc<dyn RemoteSource>,
    catalog: Arc<CatalogStore>,
    enricher: EnricherHandle,
    pager: Pager,
    names: Arc<NameIndexCell>,
    resolver: SearchResolver,
    filter: Mutex<TypeFilter>,
    last_error: Mutex<Option<String>>,
}

impl Dex {
    /// Build a session over `remote`. Spawns the enrichment worker, so call it inside a runtime.
    pub fn new(remote: Arc<dyn RemoteSource>, cfg: DexConfig) -> Self {
        let memo = Arc::new(Memoized::new(remote));
        let source: Arc<dyn RemoteSource> = memo.clone();
        let catalog = Arc::new(CatalogStore::new());
        let enricher = spawn_enricher(
            source.clone(),
            catalog.clone(),
            EnrichOpts { batch_size: cfg.batch_size, delay: cfg.batch_delay },
        );
        let pager = Pager::new(source.clone(), catalog.clone(), enricher.clone(), cfg.page_limit);
        let names = Arc::new(NameIndexCell::new());
        let resolver = SearchResolver::new(catalog.clone(), names.clone(), source.clone());
        debug!(limit = cfg.page_limit, batch = cfg.batch_size, delay_ms = %cfg.batch_delay.as_millis(), "dex: session created");
        Self {
            cfg,
            memo,
            source,
            catalog,
            enricher,
            pager,
            names,
            resolver,
            filter: Mutex::new(TypeFilter::All),
            last_error: Mutex::new(None),
        }
    }

    /// Session over the HTTP source described by `cfg`.
    pub fn connect(cfg: DexConfig) -> DexResult<Self> {
        let http = HttpSource::new(&cfg)?;
        Ok(Self::new(Arc::new(http), cfg))
    }

    pub fn config(&self) -> &DexConfig { &self.cfg }

    /// Kick off the name index load in the background and load the first page.
    pub async fn start(&self) -> DexResult<PageOutcome> {
        let names = self.names.clone();
        let source = self.source.clone();
        tokio::spawn(async move {
            names.load(source.as_ref()).await;
        });
        self.load_next_page().await
    }

    /// Wait until the name index is loaded (loading it if `start` was skipped). Returns its size.
    pub async fn wait_name_index(&self) -> usize { self.names.load(self.source.as_ref()).await.len() }

    /// Load the page at the cursor. A failure is also kept as [`Dex::last_error`].
    pub async fn load_next_page(&self) -> DexResult<PageOutcome> {
        match self.pager.load_next_page().await {
            Ok(outcome) => {
                *lock(&self.last_error) = None;
                Ok(outcome)
            }
            Err(LoadError::Fetch(e)) => {
                let hint = if e.is_retryable() { "; try again" } else { "" };
                *lock(&self.last_error) = Some(format!("failed to load entities: {}{}", e, hint));
                Err(e.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Re-issue the page that failed last. The cursor did not move, so this is a plain load.
    pub async fn retry(&self) -> DexResult<PageOutcome> {
        info!(offset = ?self.pager.offset(), "dex: retry");
        self.load_next_page().await
    }

    /// Drop cached responses and the search, rewind and reload the first page.
    /// The name index is kept for the whole session.
    pub async fn refresh(&self) -> DexResult<PageOutcome> {
        let t0 = Instant::now();
        self.memo.invalidate();
        self.pager.reset().await;
        self.resolver.clear();
        let res = self.load_next_page().await;
        info!(ok = res.is_ok(), took_ms = %t0.elapsed().as_millis(), "dex: refresh");
        res
    }

    pub fn has_more(&self) -> bool { !self.pager.exhausted() }

    pub async fn search(&self, term: &str) -> SearchState { self.resolver.resolve(term).await }

    pub fn clear_search(&self) { self.resolver.clear() }

    pub fn search_state(&self) -> SearchState { self.resolver.state() }

    pub fn subscribe_search(&self) -> watch::Receiver<SearchState> { self.resolver.subscribe() }

    pub fn select_type(&self, filter: TypeFilter) {
        debug!(filter = %filter, "dex: type filter");
        *lock(&self.filter) = filter;
    }

    pub fn type_filter(&self) -> TypeFilter { lock(&self.filter).clone() }

    /// Type filter back to `all` and search cleared.
    pub fn clear_filters(&self) {
        *lock(&self.filter) = TypeFilter::All;
        self.resolver.clear();
    }

    pub fn catalog(&self) -> Arc<CatalogSnapshot> { self.catalog.current() }

    pub fn subscribe_catalog(&self) -> watch::Receiver<u64> { self.catalog.subscribe_epoch() }

    /// What the list should show right now.
    pub fn view(&self) -> Vec<Entity> {
        let filter = self.type_filter();
        project(&self.catalog.current(), &filter, &self.resolver.state())
    }

    pub fn type_options(&self) -> Vec<String> { dex_search::type_options(&self.catalog.current()) }

    pub fn suggestions(&self, term: &str) -> Vec<String> {
        dex_search::suggestions(&self.catalog.current(), term, SUGGESTION_LIMIT)
    }

    /// Full record for a detail screen. Served from cache when enrichment already fetched it.
    pub async fn details(&self, name: &str) -> DexResult<EntityDetails> {
        let t0 = Instant::now();
        let res = self.source.fetch_details(name).await.map_err(DexError::from);
        info!(name, ok = res.is_ok(), took_ms = %t0.elapsed().as_millis(), "dex: details");
        res
    }

    /// Resolve once every queued enrichment job has finished.
    pub async fn wait_enriched(&self) { self.enricher.wait_idle().await }

    /// User-facing message of the last failed page load; cleared by the next successful one.
    pub fn last_error(&self) -> Option<String> { lock(&self.last_error).clone() }

    pub fn status(&self) -> Status {
        let snap = self.catalog.current();
        Status {
            items: snap.len(),
            epoch: snap.epoch,
            pages_loaded: self.pager.pages_loaded(),
            next_offset: self.pager.offset(),
            exhausted: self.pager.exhausted(),
            pending_enrichment: self.enricher.pending(),
            name_index_entries: self.names.get().map(|idx| idx.len()),
            type_filter: self.type_filter().to_string(),
            last_error: self.last_error(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dex_remote::{fixture, MockSource};
    use std::time::Duration;

    fn cfg() -> DexConfig {
        DexConfig { page_limit: 10, batch_size: 5, batch_delay: Duration::from_millis(250), ..DexConfig::default() }
    }

    fn pokedex(n: u32) -> MockSource {
        let mut records: Vec<_> = (1..=n)
            .map(|i| match i {
                4 => fixture(i, "pikachu", &["electric"]),
                _ => fixture(i, &format!("mon-{}", i), &[if i % 2 == 0 { "water" } else { "fire" }]),
            })
            .collect();
        records.push(fixture(151, "mew", &["psychic"]));
        MockSource::from_details(records)
    }

    fn session(src: MockSource) -> (Arc<MockSource>, Dex) {
        let src = Arc::new(src);
        let dex = Dex::new(src.clone(), cfg());
        (src, dex)
    }

    #[tokio::test(start_paused = true)]
    async fn first_page_is_fully_enriched() {
        let src = pokedex(30);
        src.fail_details_for("mon-7");
        let (_src, dex) = session(src);
        let page = dex.start().await.expect("start");
        assert_eq!((page.received, page.accepted), (10, 10));
        assert!(dex.catalog().items.iter().all(|e| e.types.is_empty() && !e.details_loaded));

        dex.wait_enriched().await;
        let snap = dex.catalog();
        assert!(snap.items.iter().all(|e| e.details_loaded && !e.types.is_empty()));
        let failed = snap.items.iter().find(|e| e.name == "mon-7").expect("mon-7");
        assert_eq!(failed.types.to_vec(), vec!["unknown".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn search_examples() {
        let (src, dex) = session(pokedex(30));
        dex.start().await.expect("start");
        dex.wait_enriched().await;
        dex.wait_name_index().await;
        let base = src.details_calls();

        let st = dex.search("pikachu").await;
        assert_eq!(st.phase, SearchPhase::Resolved(None));
        assert_eq!(dex.view().iter().map(|e| e.name.as_str()).collect::<Vec<_>>(), vec!["pikachu"]);
        assert_eq!(src.details_calls(), base);

        let st = dex.search("mew").await;
        assert_eq!(st.result().map(|e| e.name.as_str()), Some("mew"));
        assert_eq!(src.details_calls(), base + 1);

        assert_eq!(dex.search("xyzzy").await.phase, SearchPhase::NotFound);
        assert_eq!(src.details_calls(), base + 1);
        assert_eq!(dex.view().len(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_page_sets_message_and_retry_clears_it() {
        let (src, dex) = session(pokedex(30));
        src.fail_next_pages(1);
        let err = dex.start().await.unwrap_err();
        assert!(matches!(err, DexError::Remote(_)));
        assert!(err.is_retryable());
        assert!(dex.last_error().is_some_and(|m| m.starts_with("failed to load entities") && m.ends_with("try again")));
        assert!(dex.catalog().is_empty());

        dex.retry().await.expect("retry");
        assert_eq!(dex.last_error(), None);
        assert_eq!(dex.status().next_offset, Some(10));
    }

    #[tokio::test(start_paused = true)]
    async fn paging_until_exhausted() {
        let (_src, dex) = session(pokedex(24));
        dex.start().await.expect("p1");
        while dex.has_more() {
            dex.load_next_page().await.expect("page");
        }
        dex.wait_enriched().await;
        let st = dex.status();
        assert_eq!(st.items, 25);
        assert_eq!(st.pages_loaded, Some(3));
        assert_eq!(st.pending_enrichment, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn filters_and_clear() {
        let (_src, dex) = session(pokedex(30));
        dex.start().await.expect("start");
        dex.wait_enriched().await;
        assert_eq!(dex.type_options(), vec!["all", "electric", "fire", "water"]);

        dex.select_type(TypeFilter::parse("water"));
        let view = dex.view();
        assert_eq!(view.len(), 4);
        assert!(view.iter().all(|e| e.has_type("water")));

        dex.search("mon-1").await;
        assert_eq!(dex.view().len(), 1, "mon-10 is the only water match");

        dex.clear_filters();
        assert_eq!(dex.type_filter(), TypeFilter::All);
        assert_eq!(dex.search_state().phase, SearchPhase::Idle);
        assert_eq!(dex.view().len(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_refetches_first_page() {
        let (src, dex) = session(pokedex(30));
        dex.start().await.expect("start");
        dex.load_next_page().await.expect("p2");
        assert_eq!(src.page_calls(), 2);
        dex.refresh().await.expect("refresh");
        assert_eq!(src.page_calls(), 3, "cache was invalidated");
        assert_eq!(dex.catalog().len(), 10);
        assert_eq!(dex.status().next_offset, Some(10));
    }

    #[tokio::test(start_paused = true)]
    async fn details_map_errors() {
        let (_src, dex) = session(pokedex(5));
        let d = dex.details("Mew").await.expect("details");
        assert_eq!(d.id, 151);
        let missing = dex.details("xyzzy").await.unwrap_err();
        assert!(matches!(missing, DexError::NotFound(_)));
        assert!(!missing.is_retryable());
        assert_eq!(dex.config().page_limit, 10);
        let err = serde_json::to_value(DexError::Busy("x".into())).expect("json");
        assert_eq!(err["Busy"], "x");
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_loads_report_busy() {
        let (_src, dex) = session(pokedex(30).with_page_delay(Duration::from_secs(1)));
        let dex = Arc::new(dex);
        let first = tokio::spawn({
            let dex = dex.clone();
            async move { dex.load_next_page().await }
        });
        tokio::task::yield_now().await;
        assert!(matches!(dex.load_next_page().await, Err(DexError::Busy(_))));
        assert!(first.await.expect("join").is_ok());
        assert_eq!(dex.last_error(), None);
    }
}
