//! Blocking policy
//!
//! Three orthogonal controls: fully blocked domains, blocked categories, and
//! domains whose requests are forwarded with cookies stripped. A domain may
//! be both blocked and strip-listed; blocking wins. All domain operations
//! normalize away the `-referredby-` attribution suffix first.

use std::collections::BTreeSet;

use crate::ledger::TrackerLedger;
use crate::types::{Category, CategorySet, GateDecision, TrackerKey};

#[derive(Debug, Default)]
pub struct BlockPolicy {
    blocked_domains: BTreeSet<String>,
    strip_domains: BTreeSet<String>,
    blocked_categories: CategorySet,
}

impl BlockPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_parts(
        blocked_domains: impl IntoIterator<Item = String>,
        strip_domains: impl IntoIterator<Item = String>,
        blocked_categories: CategorySet,
    ) -> Self {
        BlockPolicy {
            blocked_domains: blocked_domains.into_iter().collect(),
            strip_domains: strip_domains.into_iter().collect(),
            blocked_categories,
        }
    }

    // =========================================================================
    // Per-domain controls
    // =========================================================================

    pub fn block_domain(&mut self, domain: &str) {
        let bare = TrackerKey::strip_suffix(domain);
        self.blocked_domains.insert(bare.to_string());
    }

    pub fn unblock_domain(&mut self, domain: &str) {
        let bare = TrackerKey::strip_suffix(domain);
        self.blocked_domains.remove(bare);
    }

    pub fn is_blocked(&self, domain: &str) -> bool {
        self.blocked_domains
            .contains(TrackerKey::strip_suffix(domain))
    }

    pub fn strip_cookies_for(&mut self, domain: &str) {
        let bare = TrackerKey::strip_suffix(domain);
        self.strip_domains.insert(bare.to_string());
    }

    pub fn stop_stripping_cookies_for(&mut self, domain: &str) {
        let bare = TrackerKey::strip_suffix(domain);
        self.strip_domains.remove(bare);
    }

    pub fn strips_cookies(&self, domain: &str) -> bool {
        self.strip_domains
            .contains(TrackerKey::strip_suffix(domain))
    }

    // =========================================================================
    // Category-wide controls
    // =========================================================================

    pub fn blocks_category(&self, category: Category) -> bool {
        self.blocked_categories.has(category)
    }

    /// Block every tracker domain already recorded under this category, then
    /// set the category flag so later classifications are covered too.
    pub fn block_category(&mut self, category: Category, ledger: &TrackerLedger) {
        for (_, record) in ledger.records() {
            if record.category == category {
                self.block_domain(record.key.bare_domain());
            }
        }
        self.blocked_categories |= category.into();
    }

    /// Unblock the category. A domain recorded under this category is only
    /// released if none of its other recorded categories is still blocked,
    /// so overlapping category blocks stay effective.
    pub fn unblock_category(&mut self, category: Category, ledger: &TrackerLedger) {
        self.blocked_categories &= !CategorySet::from(category);
        for (_, record) in ledger.records() {
            if record.category != category {
                continue;
            }
            let bare = record.key.bare_domain();
            let others = ledger.categories_for_domain(bare) & !CategorySet::from(category);
            if (others & self.blocked_categories).is_empty() {
                self.unblock_domain(bare);
            }
        }
    }

    // =========================================================================
    // Gate
    // =========================================================================

    /// The enforcement decision for a request, given the conservative
    /// "plausible tracking" verdict from the detectors.
    pub fn decide(&self, request_domain: &str, tracker: bool) -> GateDecision {
        if !tracker {
            return GateDecision::Allow;
        }
        if self.is_blocked(request_domain) {
            GateDecision::Cancel
        } else if self.strips_cookies(request_domain) {
            GateDecision::StripCookies
        } else {
            GateDecision::Allow
        }
    }

    // =========================================================================
    // Views / persistence shapes
    // =========================================================================

    pub fn blocked_domains(&self) -> Vec<String> {
        self.blocked_domains.iter().cloned().collect()
    }

    pub fn strip_domains(&self) -> Vec<String> {
        self.strip_domains.iter().cloned().collect()
    }

    pub fn blocked_categories(&self) -> CategorySet {
        self.blocked_categories
    }

    pub fn clear(&mut self) {
        self.blocked_domains.clear();
        self.strip_domains.clear();
        self.blocked_categories = CategorySet::empty();
    }
}
