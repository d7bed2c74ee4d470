//! Per-tab session state
//!
//! Tracks, for each open tab, the current page URL and window, the pending
//! analytics candidates awaiting confirmation, and the trackers observed
//! since the tab last started loading. All of it is synchronously accessible
//! so the gate decision never waits on a tab lookup.

use std::collections::HashMap;

use crate::types::{Category, TabId, TrackerKey, WindowId};

/// A pending, unconfirmed observation that a third-party script set a cookie
/// on this tab. Later confirmed into category A or F by value-leak matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyticsCandidate {
    pub setter_domain: String,
    pub cookie_value: String,
}

/// A tracker observation scoped to a tab episode.
///
/// The category is absent when the request was cancelled by policy before
/// classification completed; the tab still remembers the attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabTracker {
    pub key: TrackerKey,
    pub category: Option<Category>,
}

/// State for one open tab.
#[derive(Debug, Clone)]
pub struct TabSession {
    pub tab_id: TabId,
    pub url: String,
    pub window_id: WindowId,
    /// Bumped every time the tab starts loading. Classification side-work
    /// carries the episode it was started in, so a result arriving after a
    /// reload cannot land in the new episode's tracker list.
    pub episode: u64,
    pub trackers: Vec<TabTracker>,
    pub candidates: Vec<AnalyticsCandidate>,
}

impl TabSession {
    fn new(tab_id: TabId, url: String, window_id: WindowId) -> Self {
        TabSession {
            tab_id,
            url,
            window_id,
            episode: 0,
            trackers: Vec::new(),
            candidates: Vec::new(),
        }
    }
}

/// All live tab sessions, keyed by tab id.
#[derive(Debug, Default)]
pub struct SessionStore {
    tabs: HashMap<TabId, TabSession>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, tab_id: TabId) -> Option<&TabSession> {
        self.tabs.get(&tab_id)
    }

    /// Apply a tab update event. When the tab transitions into a loading
    /// state its tracker list and candidate list are reset; the session
    /// itself survives navigation and is only dropped on tab close.
    pub fn tab_updated(&mut self, tab_id: TabId, url: &str, window_id: WindowId, loading: bool) {
        let session = self
            .tabs
            .entry(tab_id)
            .or_insert_with(|| TabSession::new(tab_id, url.to_string(), window_id));
        session.url = url.to_string();
        session.window_id = window_id;
        if loading {
            session.episode += 1;
            session.trackers.clear();
            session.candidates.clear();
        }
    }

    pub fn tab_removed(&mut self, tab_id: TabId) {
        self.tabs.remove(&tab_id);
    }

    /// Append an analytics candidate reported for this tab. Ignored when the
    /// tab is unknown (e.g., the report raced a tab close).
    pub fn push_candidate(&mut self, tab_id: TabId, candidate: AnalyticsCandidate) {
        if let Some(session) = self.tabs.get_mut(&tab_id) {
            session.candidates.push(candidate);
        }
    }

    /// Append a tracker observation to the tab's episode list. When an
    /// episode is given, the push is dropped if the tab has since started a
    /// new load; closed tabs drop the push either way. The site ledger keeps
    /// such observations independently.
    pub fn push_tracker(
        &mut self,
        tab_id: TabId,
        episode: Option<u64>,
        key: TrackerKey,
        category: Option<Category>,
    ) {
        if let Some(session) = self.tabs.get_mut(&tab_id) {
            if episode.is_some_and(|e| e != session.episode) {
                return;
            }
            session.trackers.push(TabTracker { key, category });
        }
    }

    pub fn clear(&mut self) {
        for session in self.tabs.values_mut() {
            session.trackers.clear();
            session.candidates.clear();
        }
    }
}
