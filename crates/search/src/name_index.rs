use std::time::Instant;

use dex_core::NameIndexEntry;
use dex_remote::RemoteSource;
use rustc_hash::FxHashMap;
use tokio::sync::OnceCell;
use tracing::{info, warn};

/// Immutable snapshot of every known `{name, id}`, keyed by lowercased name.
#[derive(Debug, Default, Clone)]
pub struct NameIndex {
    entries: Vec<NameIndexEntry>,
    by_name: FxHashMap<String, usize>,
}

impl NameIndex {
    pub fn from_entries(entries: Vec<NameIndexEntry>) -> Self {
        let mut by_name = FxHashMap::default();
        for (i, e) in entries.iter().enumerate() {
            by_name.entry(e.name.to_lowercase()).or_insert(i);
        }
        Self { entries, by_name }
    }

    /// Case-insensitive exact match on name.
    pub fn lookup(&self, name: &str) -> Option<&NameIndexEntry> {
        self.by_name.get(&name.to_lowercase()).and_then(|i| self.entries.get(*i))
    }

    pub fn contains(&self, name: &str) -> bool { self.lookup(name).is_some() }
    pub fn len(&self) -> usize { self.entries.len() }
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }
}

/// Holds the name index once it has been loaded. Loading happens at most once.
#[derive(Debug, Default)]
pub struct NameIndexCell {
    cell: OnceCell<NameIndex>,
}

impl NameIndexCell {
    pub fn new() -> Self { Self::default() }

    /// Fetch the full name list on first call; later calls return the same index.
    /// A failed fetch leaves the index empty for the rest of the session.
    pub async fn load(&self, source: &dyn RemoteSource) -> &NameIndex {
        self.cell
            .get_or_init(|| async {
                let started = Instant::now();
                let idx = NameIndex::from_entries(source.fetch_all_names().await);
                metrics::gauge!("name_index_entries", idx.len() as f64);
                if idx.is_empty() {
                    warn!("name index: empty; searches beyond the catalog will report not found");
                } else {
                    info!(entries = idx.len(), took_ms = %started.elapsed().as_millis(), "name index: loaded");
                }
                idx
            })
            .await
    }

    /// The index if loading has finished.
    pub fn get(&self) -> Option<&NameIndex> { self.cell.get() }
}
