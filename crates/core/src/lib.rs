//! Dex core types, errors and configuration.

#![forbid(unsafe_code)]

use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

pub mod config;

pub use config::DexConfig;

/// Type assigned to an entity whose detail fetch failed during enrichment.
pub const UNKNOWN_TYPE: &str = "unknown";

/// Shortest search term that triggers resolution.
pub const MIN_TERM_LEN: usize = 2;

/// Type tags of an entity. Almost every entity has one or two.
pub type Types = SmallVec<[String; 2]>;

/// Identity of an entity inside the catalog: the remote id, or the name when the id is absent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey(String);

impl EntityKey {
    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

/// One catalog item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub id: Option<String>,
    pub name: String,
    pub types: Types,
    pub details_loaded: bool,
}

impl Entity {
    /// Entity as produced by pagination: no types, details pending.
    pub fn bare(id: Option<String>, name: impl Into<String>) -> Self {
        Self { id, name: name.into(), types: Types::new(), details_loaded: false }
    }

    /// Entity built from a full detail fetch.
    pub fn from_details(d: &EntityDetails) -> Self {
        Self {
            id: Some(d.id.to_string()),
            name: d.name.clone(),
            types: d.types.iter().cloned().collect(),
            details_loaded: true,
        }
    }

    pub fn key(&self) -> EntityKey {
        match self.id.as_deref() {
            Some(id) if !id.is_empty() => EntityKey(id.to_string()),
            _ => EntityKey(self.name.clone()),
        }
    }

    pub fn has_type(&self, ty: &str) -> bool { self.types.iter().any(|t| t == ty) }

    /// Unicode-aware, so it folds case the same way as search terms and the name index.
    pub fn name_eq_ignore_case(&self, term: &str) -> bool { self.name.to_lowercase() == term.to_lowercase() }
}

/// One row of the full name list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameIndexEntry {
    pub name: String,
    pub id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sprites {
    pub front_default: Option<String>,
    pub front_shiny: Option<String>,
    pub back_default: Option<String>,
    pub back_shiny: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stat {
    pub name: String,
    pub value: u32,
}

/// Full detail record of a single entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDetails {
    pub id: u32,
    pub name: String,
    pub types: Vec<String>,
    pub abilities: Vec<String>,
    pub moves: Vec<String>,
    pub sprites: Sprites,
    pub stats: Vec<Stat>,
    pub height: u32,
    pub weight: u32,
}

/// Failure of a remote call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum FetchError {
    /// Caller misuse; never retried.
    #[error("invalid_argument: {0}")]
    InvalidArgument(String),
    /// The entity does not exist. A normal negative result.
    #[error("not_found: {0}")]
    NotFound(String),
    /// Transport or format failure; safe to retry.
    #[error("remote: {0}")]
    Remote(String),
}

impl FetchError {
    pub fn is_retryable(&self) -> bool { matches!(self, FetchError::Remote(_)) }
}

pub type FetchResult<T> = Result<T, FetchError>;
