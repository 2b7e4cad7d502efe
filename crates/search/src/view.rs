use std::collections::BTreeSet;
use std::fmt;

use dex_core::{Entity, MIN_TERM_LEN, UNKNOWN_TYPE};
use dex_store::CatalogSnapshot;

use crate::{normalize_term, SearchPhase, SearchState};

/// Option label meaning "no type filter".
pub const ALL_TYPES: &str = "all";

/// Upper bound on name suggestions offered while typing.
pub const SUGGESTION_LIMIT: usize = 8;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TypeFilter {
    #[default]
    All,
    Type(String),
}

impl TypeFilter {
    /// `"all"` (any case) or blank means no filter.
    pub fn parse(s: &str) -> Self {
        let s = s.trim().to_lowercase();
        if s.is_empty() || s == ALL_TYPES {
            TypeFilter::All
        } else {
            TypeFilter::Type(s)
        }
    }

    pub fn matches(&self, e: &Entity) -> bool {
        match self {
            TypeFilter::All => true,
            TypeFilter::Type(t) => e.has_type(t),
        }
    }

    pub fn is_all(&self) -> bool { matches!(self, TypeFilter::All) }
}

impl fmt::Display for TypeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeFilter::All => f.write_str(ALL_TYPES),
            TypeFilter::Type(t) => f.write_str(t),
        }
    }
}

/// The list a frontend shows for the current catalog, type filter and search state.
///
/// A remotely resolved entity replaces the list. Otherwise the catalog is filtered by type
/// and, after a catalog hit, by case-insensitive name substring. Catalog order is kept.
pub fn project(snap: &CatalogSnapshot, filter: &TypeFilter, search: &SearchState) -> Vec<Entity> {
    if let SearchPhase::Resolved(Some(e)) = &search.phase {
        return vec![e.clone()];
    }
    let needle = search.matches_catalog().then(|| normalize_term(&search.term));
    if filter.is_all() && needle.is_none() {
        return snap.items.clone();
    }
    snap.items
        .iter()
        .filter(|e| filter.matches(e))
        .filter(|e| needle.as_deref().map_or(true, |n| e.name.to_lowercase().contains(n)))
        .cloned()
        .collect()
}

/// `"all"` followed by the sorted distinct types of enriched entities.
///
/// The unknown sentinel is only listed if some entity actually carries it.
pub fn type_options(snap: &CatalogSnapshot) -> Vec<String> {
    let types: BTreeSet<&str> = snap
        .items
        .iter()
        .filter(|e| e.details_loaded)
        .flat_map(|e| e.types.iter().map(String::as_str))
        .collect();
    std::iter::once(ALL_TYPES).chain(types).map(str::to_string).collect()
}

/// Catalog names containing `term`, in catalog order, at most `limit`. Short terms get none.
pub fn suggestions(snap: &CatalogSnapshot, term: &str, limit: usize) -> Vec<String> {
    let term = normalize_term(term);
    if term.chars().count() < MIN_TERM_LEN {
        return Vec::new();
    }
    snap.items
        .iter()
        .filter(|e| e.name.to_lowercase().contains(&term))
        .map(|e| e.name.clone())
        .take(limit)
        .collect()
}

/// Whether an entity is shown with the unknown sentinel.
pub fn is_unknown(e: &Entity) -> bool { e.details_loaded && e.has_type(UNKNOWN_TYPE) }
