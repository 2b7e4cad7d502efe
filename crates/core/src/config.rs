//! Runtime configuration read from `DEX_*` environment variables.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

pub const DEFAULT_BASE_URL: &str = "https://pokeapi.co/api/v2/";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DexConfig {
    pub base_url: String,
    /// Entities requested per page (`LIMIT`).
    pub page_limit: usize,
    /// Concurrent detail fetches per enrichment batch (`BATCH_SIZE`).
    pub batch_size: usize,
    /// Pause between two enrichment batches of the same page.
    pub batch_delay: Duration,
    pub request_timeout: Duration,
    /// Size of the one-shot name list request.
    pub name_index_limit: usize,
}

impl Default for DexConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            page_limit: 10,
            batch_size: 5,
            batch_delay: Duration::from_millis(250),
            request_timeout: Duration::from_secs(10),
            name_index_limit: 1000,
        }
    }
}

impl DexConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Build from an arbitrary key lookup; unset, zero or malformed values keep the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        let base_url = lookup("DEX_BASE_URL").filter(|s| !s.trim().is_empty()).unwrap_or(d.base_url);
        Self {
            base_url,
            page_limit: positive(&lookup, "DEX_PAGE_LIMIT").unwrap_or(d.page_limit),
            batch_size: positive(&lookup, "DEX_BATCH_SIZE").unwrap_or(d.batch_size),
            // zero is a valid delay: batches run back to back
            batch_delay: lookup("DEX_BATCH_DELAY_MS")
                .and_then(|s| parse_or_warn::<u64>("DEX_BATCH_DELAY_MS", &s))
                .map(Duration::from_millis)
                .unwrap_or(d.batch_delay),
            request_timeout: positive(&lookup, "DEX_TIMEOUT_SECS")
                .map(|s| Duration::from_secs(s as u64))
                .unwrap_or(d.request_timeout),
            name_index_limit: positive(&lookup, "DEX_NAME_INDEX_LIMIT").unwrap_or(d.name_index_limit),
        }
    }
}

fn positive(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<usize> {
    let v = parse_or_warn::<usize>(key, &lookup(key)?)?;
    if v == 0 {
        warn!(key, "zero is not allowed; using default");
        return None;
    }
    Some(v)
}

fn parse_or_warn<T: std::str::FromStr>(key: &str, raw: &str) -> Option<T> {
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(key, value = %raw, "invalid value; using default");
            None
        }
    }
}
