//! Tracker ledger
//!
//! The durable record of which trackers were observed on which sites.
//! Storage is append-only and may hold duplicate observations across tabs
//! and time; deduplication and sorting happen in the aggregate views at
//! query time, never at storage time.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::session::TabTracker;
use crate::types::{Category, CategorySet, TrackerRecord};

/// Site domain -> ordered tracker observations.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackerLedger {
    sites: BTreeMap<String, Vec<TrackerRecord>>,
}

/// Aggregate view of a single tracker across all sites.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerSummary {
    pub domain: String,
    pub categories: Vec<Category>,
    pub tracked_sites: Vec<String>,
}

impl TrackerLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an observation under the originating site.
    ///
    /// Refuses records whose bare tracker domain equals the site key: a site
    /// is never its own tracker.
    pub fn append(&mut self, site_domain: &str, record: TrackerRecord) -> bool {
        if record.key.bare_domain() == site_domain {
            log::debug!(
                "dropping self-referential record for {site_domain} ({})",
                record.category
            );
            return false;
        }
        self.sites
            .entry(site_domain.to_string())
            .or_default()
            .push(record);
        true
    }

    /// Iterate every stored observation with its site key.
    pub fn records(&self) -> impl Iterator<Item = (&str, &TrackerRecord)> {
        self.sites
            .iter()
            .flat_map(|(site, list)| list.iter().map(move |r| (site.as_str(), r)))
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    /// Downgrade every E (personal) record for this tracker domain to B:
    /// the personal classification is only valid while corroborated by
    /// actual history. Returns the number of records changed; idempotent.
    pub fn downgrade_personal(&mut self, domain: &str) -> usize {
        let mut changed = 0;
        for list in self.sites.values_mut() {
            for record in list.iter_mut() {
                if record.category == Category::E && record.key.bare_domain() == domain {
                    record.category = Category::B;
                    changed += 1;
                }
            }
        }
        changed
    }

    /// Drop the ledger entry for a site the user has purged from history.
    pub fn remove_site(&mut self, site_domain: &str) -> bool {
        self.sites.remove(site_domain).is_some()
    }

    pub fn clear(&mut self) {
        self.sites.clear();
    }

    /// Every category ever recorded for a bare tracker domain, across all
    /// sites and attribution chains.
    pub fn categories_for_domain(&self, bare_domain: &str) -> CategorySet {
        self.records()
            .filter(|(_, r)| r.key.bare_domain() == bare_domain)
            .map(|(_, r)| r.category)
            .collect()
    }

    // =========================================================================
    // Aggregate views (query-time dedup and sort)
    // =========================================================================

    /// Site -> tracker key -> sorted, deduplicated category list.
    pub fn trackers_by_site(&self) -> BTreeMap<String, BTreeMap<String, Vec<Category>>> {
        let mut site_map = BTreeMap::new();
        for (site, list) in &self.sites {
            let mut tracker_map: BTreeMap<String, Vec<Category>> = BTreeMap::new();
            for record in list {
                let cats = tracker_map.entry(record.key.to_string()).or_default();
                if !cats.contains(&record.category) {
                    cats.push(record.category);
                    cats.sort();
                }
            }
            site_map.insert(site.clone(), tracker_map);
        }
        site_map
    }

    /// Tracker key -> summary of its categories and the sites it tracked.
    pub fn trackers(&self) -> BTreeMap<String, TrackerSummary> {
        let mut trackers: BTreeMap<String, TrackerSummary> = BTreeMap::new();
        for (site, record) in self.records() {
            let key = record.key.to_string();
            let summary = trackers.entry(key.clone()).or_insert_with(|| TrackerSummary {
                domain: key,
                categories: Vec::new(),
                tracked_sites: Vec::new(),
            });
            if !summary.categories.contains(&record.category) {
                summary.categories.push(record.category);
                summary.categories.sort();
            }
            if !summary.tracked_sites.iter().any(|s| s == site) {
                summary.tracked_sites.push(site.to_string());
                summary.tracked_sites.sort();
            }
        }
        trackers
    }
}

/// Deduplicate a tab's episode tracker list into key -> sorted categories.
/// Entries blocked before classification contribute a key with no categories.
pub fn dedup_tab_trackers(trackers: &[TabTracker]) -> BTreeMap<String, Vec<Category>> {
    let mut map: BTreeMap<String, Vec<Category>> = BTreeMap::new();
    for tracker in trackers {
        let cats = map.entry(tracker.key.to_string()).or_default();
        if let Some(cat) = tracker.category {
            if !cats.contains(&cat) {
                cats.push(cat);
                cats.sort();
            }
        }
    }
    map
}
