use std::sync::Arc;

use dex_core::{Entity, FetchError, MIN_TERM_LEN};
use dex_remote::RemoteSource;
use dex_store::CatalogStore;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::NameIndexCell;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum SearchPhase {
    #[default]
    Idle,
    /// Tier-3 fetch in flight.
    Searching,
    /// `None` means the match is already in the catalog and the view filters by name.
    Resolved(Option<Entity>),
    NotFound,
    Errored(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SearchState {
    /// Bumped by every `resolve` and `clear`; writes from older generations are dropped.
    pub generation: u64,
    pub term: String,
    pub phase: SearchPhase,
}

impl SearchState {
    pub fn result(&self) -> Option<&Entity> {
        match &self.phase {
            SearchPhase::Resolved(Some(e)) => Some(e),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.phase {
            SearchPhase::Errored(m) => Some(m),
            _ => None,
        }
    }

    pub fn is_searching(&self) -> bool { matches!(self.phase, SearchPhase::Searching) }

    /// True for the tier-1 outcome: filter the catalog by name instead of substituting a result.
    pub fn matches_catalog(&self) -> bool {
        matches!(self.phase, SearchPhase::Resolved(None)) && self.term.chars().count() >= MIN_TERM_LEN
    }
}

/// Trimmed, lowercased search term.
pub fn normalize_term(term: &str) -> String { term.trim().to_lowercase() }

/// Tiered search state machine. State lives in a watch channel so frontends can follow it.
pub struct SearchResolver {
    catalog: Arc<CatalogStore>,
    names: Arc<NameIndexCell>,
    source: Arc<dyn RemoteSource>,
    state: watch::Sender<SearchState>,
}

impl SearchResolver {
    pub fn new(catalog: Arc<CatalogStore>, names: Arc<NameIndexCell>, source: Arc<dyn RemoteSource>) -> Self {
        let (state, _rx) = watch::channel(SearchState::default());
        Self { catalog, names, source, state }
    }

    pub fn state(&self) -> SearchState { self.state.borrow().clone() }
    pub fn subscribe(&self) -> watch::Receiver<SearchState> { self.state.subscribe() }

    /// Back to `Idle` unconditionally. Any in-flight resolution becomes stale.
    pub fn clear(&self) {
        let generation = self.begin("");
        debug!(generation, "search: cleared");
    }

    /// Resolve `term` through the tiers and return this call's outcome.
    ///
    /// The previous state is cleared before any await. The outcome is only published if no
    /// newer `resolve` or `clear` happened meanwhile; otherwise it is returned but dropped.
    pub async fn resolve(&self, term: &str) -> SearchState {
        let term = normalize_term(term);
        let generation = self.begin(&term);

        if term.chars().count() < MIN_TERM_LEN {
            return self.finish(generation, &term, SearchPhase::Idle, "short");
        }

        if self.catalog.current().find_by_name(&term).is_some() {
            return self.finish(generation, &term, SearchPhase::Resolved(None), "catalog");
        }

        let entry = self.names.get().and_then(|idx| idx.lookup(&term).cloned());
        let Some(entry) = entry else {
            return self.finish(generation, &term, SearchPhase::NotFound, "not_found");
        };

        self.publish(generation, SearchPhase::Searching);
        debug!(generation, term = %term, id = %entry.id, "search: fetching details");
        let (phase, outcome) = match self.source.fetch_details(&entry.name).await {
            Ok(d) => {
                let entity = Entity::from_details(&d);
                self.catalog.merge_details(vec![(entity.key(), entity.types.clone())]);
                (SearchPhase::Resolved(Some(entity)), "remote")
            }
            Err(FetchError::NotFound(_)) => (SearchPhase::NotFound, "not_found"),
            Err(e) => (SearchPhase::Errored(e.to_string()), "error"),
        };
        self.finish(generation, &term, phase, outcome)
    }

    fn begin(&self, term: &str) -> u64 {
        let mut generation = 0;
        self.state.send_modify(|s| {
            s.generation += 1;
            generation = s.generation;
            s.term = term.to_string();
            s.phase = SearchPhase::Idle;
        });
        generation
    }

    fn publish(&self, generation: u64, phase: SearchPhase) -> bool {
        let applied = self.state.send_if_modified(|s| {
            if s.generation != generation {
                return false;
            }
            s.phase = phase;
            true
        });
        if !applied {
            metrics::counter!("search_stale_writes_total", 1);
            debug!(generation, "search: dropped stale result");
        }
        applied
    }

    fn finish(&self, generation: u64, term: &str, phase: SearchPhase, outcome: &'static str) -> SearchState {
        let state = SearchState { generation, term: term.to_string(), phase };
        let applied = self.publish(generation, state.phase.clone());
        metrics::counter!("search_resolve_total", 1, "outcome" => outcome);
        info!(generation, term = %term, outcome, applied, "search: resolved");
        state
    }
}
