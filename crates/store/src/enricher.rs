//! Background enrichment: fills in `types` for entities the pager just added.
//!
//! Jobs arrive over a channel, one job per page. Each job is split into batches of
//! `batch_size`; a batch issues its detail fetches concurrently, merges the results into
//! the catalog, then waits `delay` before the next batch. Batches of one job run in order.
//! Jobs of different pages are not serialized against each other.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dex_core::{Entity, EntityKey, Types, UNKNOWN_TYPE};
use dex_remote::RemoteSource;
use futures::future::join_all;
use smallvec::smallvec;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::CatalogStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnrichOpts {
    pub batch_size: usize,
    pub delay: Duration,
}

/// Cheap handle for submitting work to the enrichment worker.
#[derive(Clone)]
pub struct EnricherHandle {
    tx: mpsc::UnboundedSender<Vec<Entity>>,
    pending: Arc<watch::Sender<usize>>,
}

impl EnricherHandle {
    /// Queue entities for enrichment and return immediately.
    pub fn enrich(&self, entities: Vec<Entity>) {
        if entities.is_empty() {
            return;
        }
        self.pending.send_modify(|n| *n += 1);
        if self.tx.send(entities).is_err() {
            self.pending.send_modify(|n| *n = n.saturating_sub(1));
            warn!("enricher: worker stopped; dropping job");
        }
    }

    /// Jobs queued or running.
    pub fn pending(&self) -> usize { *self.pending.borrow() }

    /// Resolve once every submitted job has drained.
    pub async fn wait_idle(&self) {
        let mut rx = self.pending.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

/// Decrements the pending count when a job ends, including by panic.
struct JobGuard(Arc<watch::Sender<usize>>);

impl Drop for JobGuard {
    fn drop(&mut self) {
        self.0.send_modify(|n| *n = n.saturating_sub(1));
    }
}

/// Spawn the enrichment worker. Must be called inside a tokio runtime.
pub fn spawn_enricher(source: Arc<dyn RemoteSource>, catalog: Arc<CatalogStore>, opts: EnrichOpts) -> EnricherHandle {
    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<Entity>>();
    let (pending_tx, _pending_rx) = watch::channel(0usize);
    let pending = Arc::new(pending_tx);
    let opts = EnrichOpts { batch_size: opts.batch_size.max(1), ..opts };
    let worker_pending = Arc::clone(&pending);

    tokio::spawn(async move {
        let mut job_id = 0u64;
        while let Some(entities) = rx.recv().await {
            job_id += 1;
            let guard = JobGuard(Arc::clone(&worker_pending));
            let source = Arc::clone(&source);
            let catalog = Arc::clone(&catalog);
            tokio::spawn(async move {
                let _guard = guard;
                run_job(job_id, entities, source.as_ref(), &catalog, opts).await;
            });
        }
        debug!("enrich channel closed; worker exiting");
    });

    EnricherHandle { tx, pending }
}

async fn run_job(job: u64, entities: Vec<Entity>, source: &dyn RemoteSource, catalog: &CatalogStore, opts: EnrichOpts) {
    let started = Instant::now();
    let batches = entities.len().div_ceil(opts.batch_size);
    let mut merged_total = 0usize;
    for (i, batch) in entities.chunks(opts.batch_size).enumerate() {
        if i > 0 && !opts.delay.is_zero() {
            tokio::time::sleep(opts.delay).await;
        }
        let updates = join_all(batch.iter().map(|e| fetch_types(source, e))).await;
        let merged = catalog.merge_details(updates);
        merged_total += merged;
        metrics::counter!("enrich_batches_total", 1);
        metrics::counter!("enrich_merged_total", merged as u64);
        debug!(job, batch = i + 1, of = batches, size = batch.len(), merged, "enricher: batch merged");
    }
    info!(job, entities = entities.len(), batches, merged = merged_total, took_ms = %started.elapsed().as_millis(), "enricher: job done");
}

/// Types for one entity; a failed fetch degrades to the unknown sentinel.
async fn fetch_types(source: &dyn RemoteSource, e: &Entity) -> (EntityKey, Types) {
    let types = match source.fetch_details(&e.name).await {
        Ok(d) => d.types.into_iter().collect(),
        Err(err) => {
            metrics::counter!("enrich_item_failures_total", 1);
            warn!(name = %e.name, error = %err, "enricher: details unavailable; marking unknown");
            smallvec![UNKNOWN_TYPE.to_string()]
        }
    };
    (e.key(), types)
}
