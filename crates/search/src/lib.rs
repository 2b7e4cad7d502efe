//! Dex search: name index, tiered resolver and the projected view.
//!
//! Resolution tries three tiers in increasing cost: the loaded catalog, the full name
//! index, then a single remote detail fetch. The view projector combines the catalog,
//! the type filter and the resolver state into the list a frontend renders.

#![forbid(unsafe_code)]

mod name_index;
mod resolver;
mod view;

pub use name_index::{NameIndex, NameIndexCell};
pub use resolver::{normalize_term, SearchPhase, SearchResolver, SearchState};
pub use view::{is_unknown, project, suggestions, type_options, TypeFilter, ALL_TYPES, SUGGESTION_LIMIT};
