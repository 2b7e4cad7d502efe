//! Dex store: the in-RAM catalog plus the two writers that feed it.
//!
//! [`CatalogStore`] is the only owner of catalog state. It exposes exactly two write
//! paths, `append`/`replace` for the [`Pager`] and `merge_details` for the enricher,
//! and publishes immutable snapshots so readers never see a half-applied update.

#![forbid(unsafe_code)]

use std::sync::Arc;

use arc_swap::ArcSwap;
use dex_core::{Entity, EntityKey, Types};
use rustc_hash::{FxHashMap, FxHashSet};
use tokio::sync::watch;
use tracing::debug;

mod enricher;
mod pager;

pub use enricher::{spawn_enricher, EnrichOpts, EnricherHandle};
pub use pager::{LoadError, PageOutcome, Pager};

/// Immutable view of the catalog at one epoch. Items keep arrival order.
#[derive(Debug, Clone, Default)]
pub struct CatalogSnapshot {
    pub epoch: u64,
    pub items: Vec<Entity>,
    index: FxHashMap<EntityKey, usize>,
}

impl CatalogSnapshot {
    pub fn len(&self) -> usize { self.items.len() }
    pub fn is_empty(&self) -> bool { self.items.is_empty() }

    pub fn get(&self, key: &EntityKey) -> Option<&Entity> {
        self.index.get(key).and_then(|i| self.items.get(*i))
    }

    pub fn contains(&self, key: &EntityKey) -> bool { self.index.contains_key(key) }

    /// Case-insensitive exact match on name.
    pub fn find_by_name(&self, name: &str) -> Option<&Entity> {
        self.items.iter().find(|e| e.name_eq_ignore_case(name))
    }

    fn with_items(epoch: u64, items: Vec<Entity>) -> Self {
        let index = items.iter().enumerate().map(|(i, e)| (e.key(), i)).collect();
        Self { epoch, items, index }
    }
}

/// Single owned catalog store. Writes are read-copy-update swaps; reads are lock-free.
pub struct CatalogStore {
    snap: ArcSwap<CatalogSnapshot>,
    epoch_tx: watch::Sender<u64>,
}

impl Default for CatalogStore {
    fn default() -> Self { Self::new() }
}

impl CatalogStore {
    pub fn new() -> Self {
        let (epoch_tx, _rx) = watch::channel(0u64);
        Self { snap: ArcSwap::from_pointee(CatalogSnapshot::default()), epoch_tx }
    }

    pub fn current(&self) -> Arc<CatalogSnapshot> { self.snap.load_full() }
    pub fn subscribe_epoch(&self) -> watch::Receiver<u64> { self.epoch_tx.subscribe() }

    /// Discard the catalog and start over from `entities`. Returns the accepted entities.
    pub fn replace(&self, entities: Vec<Entity>) -> Vec<Entity> {
        let mut accepted = Vec::new();
        let mut epoch = 0;
        self.snap.rcu(|cur| {
            accepted = dedup(&FxHashMap::default(), &entities);
            epoch = cur.epoch + 1;
            Arc::new(CatalogSnapshot::with_items(epoch, accepted.clone()))
        });
        self.after_write(epoch, "replace", entities.len(), accepted.len());
        accepted
    }

    /// Append entities whose identity is not yet present. Returns the accepted entities.
    pub fn append(&self, entities: Vec<Entity>) -> Vec<Entity> {
        let mut accepted = Vec::new();
        let mut epoch = 0;
        self.snap.rcu(|cur| {
            accepted = dedup(&cur.index, &entities);
            epoch = cur.epoch + 1;
            let mut items = Vec::with_capacity(cur.items.len() + accepted.len());
            items.extend(cur.items.iter().cloned());
            items.extend(accepted.iter().cloned());
            Arc::new(CatalogSnapshot::with_items(epoch, items))
        });
        self.after_write(epoch, "append", entities.len(), accepted.len());
        accepted
    }

    /// Attach types to entities still pending details. Loaded or unknown identities are
    /// left untouched. Returns how many entities changed.
    pub fn merge_details(&self, updates: Vec<(EntityKey, Types)>) -> usize {
        let mut merged = 0usize;
        let mut epoch = 0;
        self.snap.rcu(|cur| {
            let mut items = cur.items.clone();
            merged = 0;
            for (key, types) in updates.iter() {
                let Some(&i) = cur.index.get(key) else { continue };
                let e = &mut items[i];
                if e.details_loaded {
                    continue;
                }
                e.types = types.clone();
                e.details_loaded = true;
                merged += 1;
            }
            if merged == 0 {
                epoch = 0;
                return Arc::clone(cur);
            }
            epoch = cur.epoch + 1;
            Arc::new(CatalogSnapshot { epoch, items, index: cur.index.clone() })
        });
        let skipped = updates.len() - merged;
        if skipped > 0 {
            metrics::counter!("enrich_skipped_loaded_total", skipped as u64);
        }
        if merged > 0 {
            self.bump_epoch(epoch);
        }
        debug!(merged, skipped, "catalog: merge_details");
        merged
    }

    fn after_write(&self, epoch: u64, op: &'static str, offered: usize, accepted: usize) {
        let dropped = offered - accepted;
        if dropped > 0 {
            metrics::counter!("catalog_duplicates_dropped_total", dropped as u64);
        }
        metrics::gauge!("catalog_items", self.snap.load().items.len() as f64);
        self.bump_epoch(epoch);
        debug!(op, epoch, offered, accepted, dropped, "catalog: write");
    }

    fn bump_epoch(&self, epoch: u64) {
        self.epoch_tx.send_if_modified(|cur| {
            if epoch > *cur {
                *cur = epoch;
                true
            } else {
                false
            }
        });
    }
}

/// Entities from `incoming` whose identity is neither in `existing` nor earlier in `incoming`.
fn dedup(existing: &FxHashMap<EntityKey, usize>, incoming: &[Entity]) -> Vec<Entity> {
    let mut seen: FxHashSet<EntityKey> = FxHashSet::default();
    incoming
        .iter()
        .filter(|e| {
            let k = e.key();
            !existing.contains_key(&k) && seen.insert(k)
        })
        .cloned()
        .collect()
}
