//! Locally mirrored browsing-history index
//!
//! The host history API cannot answer "has the user ever visited this
//! domain?" cheaply per request, so the observer mirrors visited domains
//! into this set incrementally. The index is advisory: category E decisions
//! read it synchronously, and eviction on history deletion is handled by the
//! observer's cascade (which also downgrades affected ledger records).

use std::collections::HashSet;

use crate::domain::normalize_url;

/// Set of canonical domains the user has organically visited.
#[derive(Debug, Default)]
pub struct HistoryIndex {
    domains: HashSet<String>,
}

impl HistoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_domains(domains: impl IntoIterator<Item = String>) -> Self {
        HistoryIndex {
            domains: domains.into_iter().collect(),
        }
    }

    /// Record an organic visit.
    pub fn record_visit(&mut self, url: &str) {
        self.domains.insert(normalize_url(url));
    }

    #[inline]
    pub fn is_known(&self, domain: &str) -> bool {
        self.domains.contains(domain)
    }

    /// Evict a domain whose last history entry was deleted. Idempotent.
    pub fn evict(&mut self, domain: &str) -> bool {
        self.domains.remove(domain)
    }

    pub fn clear(&mut self) {
        self.domains.clear();
    }

    pub fn domains(&self) -> impl Iterator<Item = &str> {
        self.domains.iter().map(|s| s.as_str())
    }
}
