use std::sync::Arc;
use std::time::Instant;

use dex_core::{Entity, FetchError};
use dex_remote::RemoteSource;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::{CatalogStore, EnricherHandle};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
    #[error("page fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("a page load is already in flight")]
    InFlight,
}

/// What one successful page load did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageOutcome {
    /// Offset the page was requested at.
    pub offset: usize,
    /// Rows returned by the remote.
    pub received: usize,
    /// Rows that were new to the catalog.
    pub accepted: usize,
}

#[derive(Debug, Default)]
struct Cursor {
    offset: usize,
    pages: u64,
    exhausted: bool,
}

/// Fetches the catalog page by page and hands new entities to the enricher.
pub struct Pager {
    source: Arc<dyn RemoteSource>,
    catalog: Arc<CatalogStore>,
    enricher: EnricherHandle,
    limit: usize,
    cursor: Mutex<Cursor>,
}

impl Pager {
    pub fn new(source: Arc<dyn RemoteSource>, catalog: Arc<CatalogStore>, enricher: EnricherHandle, limit: usize) -> Self {
        Self { source, catalog, enricher, limit, cursor: Mutex::new(Cursor::default()) }
    }

    pub fn limit(&self) -> usize { self.limit }

    /// Offset the next page will be requested at. `None` while a load is in flight.
    pub fn offset(&self) -> Option<usize> { self.cursor.try_lock().ok().map(|c| c.offset) }

    pub fn pages_loaded(&self) -> Option<u64> { self.cursor.try_lock().ok().map(|c| c.pages) }

    /// True once a page came back shorter than the limit.
    pub fn exhausted(&self) -> bool { self.cursor.try_lock().map(|c| c.exhausted).unwrap_or(false) }

    /// Load the page at the cursor. Offset 0 replaces the catalog, later offsets append.
    ///
    /// On failure neither the cursor nor the catalog changes, so calling again retries the
    /// same page. A call made while another is outstanding fails with [`LoadError::InFlight`].
    pub async fn load_next_page(&self) -> Result<PageOutcome, LoadError> {
        let mut cur = self.cursor.try_lock().map_err(|_| LoadError::InFlight)?;
        let offset = cur.offset;
        let started = Instant::now();
        let rows = match self.source.fetch_page(offset, self.limit).await {
            Ok(rows) => rows,
            Err(e) => {
                metrics::counter!("catalog_page_errors_total", 1);
                warn!(offset, limit = self.limit, retryable = e.is_retryable(), error = %e, "pager: page load failed");
                return Err(e.into());
            }
        };
        let received = rows.len();
        let bare: Vec<Entity> = rows.into_iter().map(|r| Entity::bare(r.id, r.name)).collect();
        let accepted = if offset == 0 { self.catalog.replace(bare) } else { self.catalog.append(bare) };
        cur.offset += self.limit;
        cur.pages += 1;
        cur.exhausted = received < self.limit;
        let outcome = PageOutcome { offset, received, accepted: accepted.len() };
        metrics::counter!("catalog_pages_total", 1);
        info!(
            offset,
            received,
            accepted = outcome.accepted,
            next_offset = cur.offset,
            took_ms = %started.elapsed().as_millis(),
            "pager: page loaded"
        );
        self.enricher.enrich(accepted);
        Ok(outcome)
    }

    /// Rewind to offset 0 so the next load replaces the catalog. Waits for an in-flight load.
    pub async fn reset(&self) {
        let mut cur = self.cursor.lock().await;
        *cur = Cursor::default();
        info!("pager: cursor reset");
    }
}
