//! The observer service
//!
//! [`Observer`] owns all process-wide state behind one mutex and splits every
//! request into the two paths the interception deadline forces:
//!
//! - [`Observer::gate`] - synchronous, lock-held, pure over durable state;
//!   returns the allow/cancel/strip verdict plus any deferred side-work.
//! - [`Observer::complete`] - asynchronous; runs the side-work against the
//!   host oracles and appends the resulting records. It never revisits a
//!   gate decision that has already been made.
//!
//! Persistence is fire-and-forget: mutations enqueue a full rewrite of the
//! owning blob on the runtime and the decision path never waits for it.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

use serde::Serialize;

use tw_core::domain::normalize_url;
use tw_core::engine::{
    self, classify, Classification, PendingLookup,
};
use tw_core::history::HistoryIndex;
use tw_core::ledger::{dedup_tab_trackers, TrackerLedger, TrackerSummary};
use tw_core::policy::BlockPolicy;
use tw_core::session::SessionStore;
use tw_core::types::{
    Category, GateDecision, RequestInfo, TabId, TrackerKey, TrackerRecord,
    TrackingNotification, WindowId,
};

use crate::error::StoreError;
use crate::oracles::{CookieStore, HistoryProvider, WindowOracle};
use crate::persist::{StateKey, StateStore};
use crate::subscribers::{AddonRegistry, NotificationSink};

/// Result of the synchronous gate: the verdict for the network layer, plus
/// the classification side-work still to be run.
#[derive(Debug)]
pub struct GateOutcome {
    pub decision: GateDecision,
    pub side_work: Vec<PendingLookup>,
}

/// A history removal event from the host.
#[derive(Debug, Clone)]
pub struct HistoryRemoval {
    pub all_history: bool,
    pub urls: Vec<String>,
}

struct State {
    sessions: SessionStore,
    history: HistoryIndex,
    ledger: TrackerLedger,
    policy: BlockPolicy,
    addons: AddonRegistry,
}

/// Mutations accumulated while the state lock is held; applied (delivery,
/// persistence) after it is released.
#[derive(Default)]
struct Effects {
    notifications: Vec<TrackingNotification>,
    dirty: Vec<StateKey>,
}

impl Effects {
    fn mark(&mut self, key: StateKey) {
        if !self.dirty.contains(&key) {
            self.dirty.push(key);
        }
    }
}

pub struct Observer {
    state: Mutex<State>,
    store: Arc<dyn StateStore>,
    cookies: Arc<dyn CookieStore>,
    windows: Arc<dyn WindowOracle>,
    history_provider: Arc<dyn HistoryProvider>,
    sink: Arc<dyn NotificationSink>,
}

impl Observer {
    /// Create an observer with empty state.
    pub fn new(
        store: Arc<dyn StateStore>,
        cookies: Arc<dyn CookieStore>,
        windows: Arc<dyn WindowOracle>,
        history_provider: Arc<dyn HistoryProvider>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Observer {
            state: Mutex::new(State {
                sessions: SessionStore::new(),
                history: HistoryIndex::new(),
                ledger: TrackerLedger::new(),
                policy: BlockPolicy::new(),
                addons: AddonRegistry::new(),
            }),
            store,
            cookies,
            windows,
            history_provider,
            sink,
        }
    }

    /// Create an observer, loading the six persisted blobs from the store.
    pub async fn load(
        store: Arc<dyn StateStore>,
        cookies: Arc<dyn CookieStore>,
        windows: Arc<dyn WindowOracle>,
        history_provider: Arc<dyn HistoryProvider>,
        sink: Arc<dyn NotificationSink>,
    ) -> Result<Self, StoreError> {
        let ledger: TrackerLedger = load_blob(&*store, StateKey::Sites).await?.unwrap_or_default();
        let domains: Vec<String> = load_blob(&*store, StateKey::HistoryMap)
            .await?
            .unwrap_or_default();
        let blocked: Vec<String> = load_blob(&*store, StateKey::BlockedDomains)
            .await?
            .unwrap_or_default();
        let strip: Vec<String> = load_blob(&*store, StateKey::RemoveCookies)
            .await?
            .unwrap_or_default();
        let categories: Vec<Category> = load_blob(&*store, StateKey::BlockedCategories)
            .await?
            .unwrap_or_default();
        let addons: AddonRegistry = load_blob(&*store, StateKey::Registered)
            .await?
            .unwrap_or_default();

        let observer = Observer::new(store, cookies, windows, history_provider, sink);
        {
            let mut state = observer.state.lock().unwrap();
            state.ledger = ledger;
            state.history = HistoryIndex::from_domains(domains);
            state.policy =
                BlockPolicy::from_parts(blocked, strip, categories.into_iter().collect());
            state.addons = addons;
        }
        Ok(observer)
    }

    // =========================================================================
    // Request path
    // =========================================================================

    /// The synchronous gate: classify the request against durable state and
    /// decide allow/cancel/strip before the interception deadline.
    pub fn gate(&self, request: &RequestInfo) -> GateOutcome {
        let mut effects = Effects::default();
        let (decision, side_work, addon_ids) = {
            let mut guard = self.state.lock().unwrap();
            let state = &mut *guard;

            let session = request.tab_id.and_then(|id| state.sessions.get(id));
            let site_domain = session.map(|s| normalize_url(&s.url)).unwrap_or_default();
            let classification: Classification = classify(request, session, &state.history);

            for record in &classification.records {
                record_locked(
                    state,
                    &site_domain,
                    request.tab_id,
                    None,
                    record.clone(),
                    &mut effects,
                );
            }

            let request_domain = normalize_url(&request.url);
            let decision = state
                .policy
                .decide(&request_domain, classification.is_tracking());
            match decision {
                GateDecision::Cancel => {
                    log::info!("canceling request to {}", request.url);
                    // The site ledger never learns the final category, but
                    // the tab remembers that tracking was attempted.
                    if let Some(tab_id) = request.tab_id {
                        state
                            .sessions
                            .push_tracker(tab_id, None, TrackerKey::Plain(request_domain), None);
                    }
                }
                GateDecision::StripCookies => {
                    log::info!("removing cookie from request to {}", request.url);
                }
                GateDecision::Allow => {}
            }

            (decision, classification.side_work, state.addons.ids())
        };

        self.apply_effects(effects, &addon_ids);
        GateOutcome {
            decision,
            side_work,
        }
    }

    /// Run deferred classification side-work against the host oracles and
    /// append whatever it confirms. Oracle failures drop that detector's
    /// contribution; the gate decision already made is unaffected.
    pub async fn complete(&self, side_work: Vec<PendingLookup>) {
        for work in side_work {
            match work {
                PendingLookup::WindowType(lookup) => {
                    let window_type = match self.windows.window_type(lookup.window_id).await {
                        Ok(window_type) => window_type,
                        Err(err) => {
                            log::debug!("window lookup failed: {err}");
                            continue;
                        }
                    };
                    let record = engine::resolve_window_lookup(&lookup, window_type);
                    self.record(
                        &lookup.site_domain,
                        Some(lookup.tab_id),
                        Some(lookup.episode),
                        vec![record],
                    );
                }
                PendingLookup::CookieScan(scan) => {
                    let cookies = match self.cookies.cookies_for_domain(&scan.leak_domain).await {
                        Ok(cookies) => cookies,
                        Err(err) => {
                            log::debug!("cookie enumeration failed: {err}");
                            continue;
                        }
                    };
                    let records = engine::resolve_cookie_scan(&scan, &cookies);
                    self.record(&scan.site_domain, Some(scan.tab_id), Some(scan.episode), records);
                }
            }
        }
    }

    /// Gate the request and spawn its side-work on the runtime.
    pub async fn handle_request(self: &Arc<Self>, request: RequestInfo) -> GateDecision {
        let GateOutcome {
            decision,
            side_work,
        } = self.gate(&request);
        if !side_work.is_empty() {
            let observer = Arc::clone(self);
            tokio::spawn(async move { observer.complete(side_work).await });
        }
        decision
    }

    fn record(
        &self,
        site_domain: &str,
        tab_id: Option<TabId>,
        episode: Option<u64>,
        records: Vec<TrackerRecord>,
    ) {
        if records.is_empty() {
            return;
        }
        let mut effects = Effects::default();
        let addon_ids = {
            let mut guard = self.state.lock().unwrap();
            let state = &mut *guard;
            for record in records {
                record_locked(state, site_domain, tab_id, episode, record, &mut effects);
            }
            state.addons.ids()
        };
        self.apply_effects(effects, &addon_ids);
    }

    // =========================================================================
    // Host events
    // =========================================================================

    pub fn tab_updated(&self, tab_id: TabId, url: &str, window_id: WindowId, loading: bool) {
        let mut state = self.state.lock().unwrap();
        state.sessions.tab_updated(tab_id, url, window_id, loading);
    }

    pub fn tab_removed(&self, tab_id: TabId) {
        let mut state = self.state.lock().unwrap();
        state.sessions.tab_removed(tab_id);
    }

    /// An in-page cookie set was intercepted; remember it as an analytics
    /// candidate if the call stack attributes it to a third-party script.
    pub fn cookie_set_reported(
        &self,
        tab_id: TabId,
        page_url: &str,
        call_stack: &[String],
        cookie_string: &str,
    ) {
        if let Some(candidate) =
            engine::candidate_from_cookie_set(page_url, call_stack, cookie_string)
        {
            log::debug!(
                "analytics candidate {} on {page_url} with value {}",
                candidate.setter_domain,
                candidate.cookie_value
            );
            let mut state = self.state.lock().unwrap();
            state.sessions.push_candidate(tab_id, candidate);
        }
    }

    pub fn history_visited(&self, url: &str) {
        let mut effects = Effects::default();
        {
            let mut state = self.state.lock().unwrap();
            state.history.record_visit(url);
        }
        effects.mark(StateKey::HistoryMap);
        self.apply_effects(effects, &[]);
    }

    /// History removal cascade. For every removed URL whose domain no longer
    /// appears anywhere in the remaining history, the domain is evicted from
    /// the index, its own site entry is dropped, and its E records are
    /// downgraded to B. Best-effort over a snapshot of the history.
    pub async fn history_removed(&self, removal: HistoryRemoval) {
        let mut effects = Effects::default();

        if removal.all_history {
            {
                let mut state = self.state.lock().unwrap();
                state.history.clear();
                state.ledger.clear();
            }
            effects.mark(StateKey::HistoryMap);
            effects.mark(StateKey::Sites);
            self.apply_effects(effects, &[]);
            return;
        }

        let remaining = match self.history_provider.all_urls().await {
            Ok(urls) => urls,
            Err(err) => {
                log::warn!("history search failed, skipping eviction: {err}");
                return;
            }
        };
        let remaining_domains: HashSet<String> =
            remaining.iter().map(|url| normalize_url(url)).collect();

        let removed_domains: HashSet<String> =
            removal.urls.iter().map(|url| normalize_url(url)).collect();

        let mut state = self.state.lock().unwrap();
        for domain in removed_domains {
            if remaining_domains.contains(&domain) {
                continue;
            }
            if state.history.evict(&domain) {
                effects.mark(StateKey::HistoryMap);
            }
            if state.ledger.remove_site(&domain) {
                effects.mark(StateKey::Sites);
            }
            let downgraded = state.ledger.downgrade_personal(&domain);
            if downgraded > 0 {
                log::debug!("downgraded {downgraded} personal records for {domain}");
                effects.mark(StateKey::Sites);
            }
        }
        drop(state);
        self.apply_effects(effects, &[]);
    }

    /// A registered add-on was uninstalled or disabled.
    pub fn subscriber_uninstalled(&self, id: &str) {
        let mut effects = Effects::default();
        let removed = {
            let mut state = self.state.lock().unwrap();
            state.addons.unregister(id)
        };
        if removed {
            effects.mark(StateKey::Registered);
            self.apply_effects(effects, &[]);
        }
    }

    // =========================================================================
    // Query / command surface
    // =========================================================================

    pub fn get_trackers(&self) -> BTreeMap<String, TrackerSummary> {
        self.state.lock().unwrap().ledger.trackers()
    }

    pub fn get_trackers_by_site(&self) -> BTreeMap<String, BTreeMap<String, Vec<Category>>> {
        self.state.lock().unwrap().ledger.trackers_by_site()
    }

    /// Deduplicated tracker domains and categories observed on a tab since
    /// it last started loading.
    pub fn get_trackers_on_tab(&self, tab_id: TabId) -> BTreeMap<String, Vec<Category>> {
        let state = self.state.lock().unwrap();
        match state.sessions.get(tab_id) {
            Some(session) => dedup_tab_trackers(&session.trackers),
            None => BTreeMap::new(),
        }
    }

    pub fn block_tracker_domain(&self, domain: &str) {
        self.with_policy(StateKey::BlockedDomains, |policy, _| {
            policy.block_domain(domain)
        });
    }

    pub fn unblock_tracker_domain(&self, domain: &str) {
        self.with_policy(StateKey::BlockedDomains, |policy, _| {
            policy.unblock_domain(domain)
        });
    }

    pub fn remove_cookies_for_tracker_domain(&self, domain: &str) {
        self.with_policy(StateKey::RemoveCookies, |policy, _| {
            policy.strip_cookies_for(domain)
        });
    }

    pub fn stop_remove_cookies_for_tracker_domain(&self, domain: &str) {
        self.with_policy(StateKey::RemoveCookies, |policy, _| {
            policy.stop_stripping_cookies_for(domain)
        });
    }

    pub fn is_tracker_domain_blocked(&self, domain: &str) -> bool {
        self.state.lock().unwrap().policy.is_blocked(domain)
    }

    pub fn block_category(&self, category: Category) {
        let mut effects = Effects::default();
        {
            let mut guard = self.state.lock().unwrap();
            let state = &mut *guard;
            state.policy.block_category(category, &state.ledger);
        }
        effects.mark(StateKey::BlockedDomains);
        effects.mark(StateKey::BlockedCategories);
        self.apply_effects(effects, &[]);
    }

    pub fn unblock_category(&self, category: Category) {
        let mut effects = Effects::default();
        {
            let mut guard = self.state.lock().unwrap();
            let state = &mut *guard;
            state.policy.unblock_category(category, &state.ledger);
        }
        effects.mark(StateKey::BlockedDomains);
        effects.mark(StateKey::BlockedCategories);
        self.apply_effects(effects, &[]);
    }

    pub fn get_blocked_domains(&self) -> Vec<String> {
        self.state.lock().unwrap().policy.blocked_domains()
    }

    pub fn get_blocked_categories(&self) -> Vec<Category> {
        self.state
            .lock()
            .unwrap()
            .policy
            .blocked_categories()
            .categories()
    }

    pub fn get_remove_cookie_domains(&self) -> Vec<String> {
        self.state.lock().unwrap().policy.strip_domains()
    }

    /// Register an external subscriber for tracking notifications.
    pub fn register_subscriber(&self, id: &str, name: &str, link: Option<String>) {
        let mut effects = Effects::default();
        {
            let mut state = self.state.lock().unwrap();
            state.addons.register(id, name, link);
        }
        effects.mark(StateKey::Registered);
        self.apply_effects(effects, &[]);
    }

    /// Reset every data structure except the subscriber registry.
    pub fn clear_all_data(&self) {
        let mut effects = Effects::default();
        {
            let mut state = self.state.lock().unwrap();
            state.ledger.clear();
            state.history.clear();
            state.sessions.clear();
            state.policy.clear();
        }
        for key in [
            StateKey::Sites,
            StateKey::HistoryMap,
            StateKey::BlockedDomains,
            StateKey::RemoveCookies,
            StateKey::BlockedCategories,
        ] {
            effects.mark(key);
        }
        self.apply_effects(effects, &[]);
    }

    /// Write all six blobs and wait for completion. The event path never
    /// calls this; it exists for orderly shutdown and the CLI.
    pub async fn flush(&self) -> Result<(), StoreError> {
        let blobs: Vec<(StateKey, Option<String>)> = {
            let state = self.state.lock().unwrap();
            StateKey::ALL
                .iter()
                .map(|&key| (key, blob_for(&state, key)))
                .collect()
        };
        for (key, blob) in blobs {
            if let Some(blob) = blob {
                self.store.save(key, blob).await?;
            }
        }
        Ok(())
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn with_policy(&self, key: StateKey, f: impl FnOnce(&mut BlockPolicy, &TrackerLedger)) {
        let mut effects = Effects::default();
        {
            let mut guard = self.state.lock().unwrap();
            let state = &mut *guard;
            f(&mut state.policy, &state.ledger);
        }
        effects.mark(key);
        self.apply_effects(effects, &[]);
    }

    /// Deliver notifications and enqueue blob rewrites, outside the lock.
    fn apply_effects(&self, effects: Effects, addon_ids: &[String]) {
        for notification in &effects.notifications {
            for id in addon_ids {
                self.sink.deliver(id, notification);
            }
        }
        if effects.dirty.is_empty() {
            return;
        }
        let blobs: Vec<(StateKey, Option<String>)> = {
            let state = self.state.lock().unwrap();
            effects
                .dirty
                .iter()
                .map(|&key| (key, blob_for(&state, key)))
                .collect()
        };
        for (key, blob) in blobs {
            if let Some(blob) = blob {
                self.persist_blob(key, blob);
            }
        }
    }

    fn persist_blob(&self, key: StateKey, blob: String) {
        let store = Arc::clone(&self.store);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(err) = store.save(key, blob).await {
                        log::warn!("failed to persist {} blob: {err}", key.name());
                    }
                });
            }
            Err(_) => {
                log::debug!("no async runtime, dropping {} blob write", key.name());
            }
        }
    }
}

/// Append one record: category-wide block check, ledger append, per-tab
/// bookkeeping, notification staging. Call with the state lock held.
fn record_locked(
    state: &mut State,
    site_domain: &str,
    tab_id: Option<TabId>,
    episode: Option<u64>,
    record: TrackerRecord,
    effects: &mut Effects,
) {
    if site_domain.is_empty() {
        return;
    }

    let bare = record.key.bare_domain().to_string();
    if state.policy.blocks_category(record.category) && !state.policy.is_blocked(&bare) {
        // Retroactive: the category is blocked wholesale, so the domain is
        // blocked from now on even though this request already ran.
        state.policy.block_domain(&bare);
        effects.mark(StateKey::BlockedDomains);
    }

    let key = record.key.clone();
    let category = record.category;
    if state.ledger.append(site_domain, record) {
        if let Some(tab_id) = tab_id {
            state.sessions.push_tracker(tab_id, episode, key, Some(category));
        }
        effects.mark(StateKey::Sites);
        effects.notifications.push(TrackingNotification {
            tab_id,
            domain: bare,
        });
    }
}

fn blob_for(state: &State, key: StateKey) -> Option<String> {
    match key {
        StateKey::Sites => to_blob(&state.ledger),
        StateKey::HistoryMap => {
            let domains: Vec<&str> = state.history.domains().collect();
            to_blob(&domains)
        }
        StateKey::BlockedDomains => to_blob(&state.policy.blocked_domains()),
        StateKey::RemoveCookies => to_blob(&state.policy.strip_domains()),
        StateKey::BlockedCategories => {
            to_blob(&state.policy.blocked_categories().categories())
        }
        StateKey::Registered => to_blob(&state.addons),
    }
}

fn to_blob<T: Serialize>(value: &T) -> Option<String> {
    match serde_json::to_string(value) {
        Ok(blob) => Some(blob),
        Err(err) => {
            log::warn!("failed to serialize state blob: {err}");
            None
        }
    }
}

async fn load_blob<T: serde::de::DeserializeOwned>(
    store: &dyn StateStore,
    key: StateKey,
) -> Result<Option<T>, StoreError> {
    match store.load(key).await? {
        Some(blob) => Ok(Some(serde_json::from_str(&blob)?)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracles::{CookieStore, HistoryProvider, WindowOracle};
    use crate::persist::MemoryStore;
    use crate::subscribers::NoopSink;
    use async_trait::async_trait;
    use tw_core::types::{Cookie, Header, WindowType};

    use crate::error::OracleError;

    struct FixedCookies(Vec<Cookie>);

    #[async_trait]
    impl CookieStore for FixedCookies {
        async fn cookies_for_domain(&self, _domain: &str) -> Result<Vec<Cookie>, OracleError> {
            Ok(self.0.clone())
        }
    }

    struct FixedWindows(WindowType);

    #[async_trait]
    impl WindowOracle for FixedWindows {
        async fn window_type(&self, _window_id: i64) -> Result<WindowType, OracleError> {
            Ok(self.0)
        }
    }

    struct FixedHistory(Vec<String>);

    #[async_trait]
    impl HistoryProvider for FixedHistory {
        async fn all_urls(&self) -> Result<Vec<String>, OracleError> {
            Ok(self.0.clone())
        }
    }

    fn observer_with(
        cookies: Vec<Cookie>,
        window_type: WindowType,
        remaining_history: Vec<String>,
    ) -> Observer {
        Observer::new(
            Arc::new(MemoryStore::new()),
            Arc::new(FixedCookies(cookies)),
            Arc::new(FixedWindows(window_type)),
            Arc::new(FixedHistory(remaining_history)),
            Arc::new(NoopSink),
        )
    }

    fn request(url: &str, tab_id: TabId, headers: &[(&str, &str)]) -> RequestInfo {
        RequestInfo {
            url: url.into(),
            tab_id: Some(tab_id),
            headers: headers
                .iter()
                .map(|(name, value)| Header {
                    name: (*name).into(),
                    value: (*value).into(),
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_gate_allows_without_session() {
        let observer = observer_with(vec![], WindowType::Normal, vec![]);
        let outcome = observer.gate(&request("http://t.com/", 1, &[("Cookie", "id=1")]));
        assert_eq!(outcome.decision, GateDecision::Allow);
        assert!(outcome.side_work.is_empty());
        assert!(observer.get_trackers().is_empty());
    }

    #[tokio::test]
    async fn test_vanilla_tracker_recorded_and_gated() {
        let observer = observer_with(vec![], WindowType::Normal, vec![]);
        observer.tab_updated(1, "http://a.com/", 10, true);

        let outcome = observer.gate(&request("http://t.com/px", 1, &[("Cookie", "id=1")]));
        assert_eq!(outcome.decision, GateDecision::Allow);
        observer.complete(outcome.side_work).await;

        let trackers = observer.get_trackers();
        assert_eq!(trackers["t.com"].categories, vec![Category::B]);
        assert_eq!(trackers["t.com"].tracked_sites, vec!["a.com".to_string()]);
        assert_eq!(
            observer.get_trackers_on_tab(1)["t.com"],
            vec![Category::B]
        );
    }

    #[tokio::test]
    async fn test_blocked_domain_cancels_and_tab_remembers() {
        let observer = observer_with(vec![], WindowType::Normal, vec![]);
        observer.tab_updated(1, "http://a.com/", 10, true);
        observer.block_tracker_domain("t.com");

        let outcome = observer.gate(&request("http://t.com/px", 1, &[("Cookie", "id=1")]));
        assert_eq!(outcome.decision, GateDecision::Cancel);

        let on_tab = observer.get_trackers_on_tab(1);
        assert!(on_tab.contains_key("t.com"));
        assert!(observer.is_tracker_domain_blocked("t.com"));
    }

    #[tokio::test]
    async fn test_strip_cookies_when_not_blocked() {
        let observer = observer_with(vec![], WindowType::Normal, vec![]);
        observer.tab_updated(1, "http://a.com/", 10, true);
        observer.remove_cookies_for_tracker_domain("t.com");

        let outcome = observer.gate(&request("http://t.com/px", 1, &[("Cookie", "id=1")]));
        assert_eq!(outcome.decision, GateDecision::StripCookies);

        // Block takes precedence over stripping.
        observer.block_tracker_domain("t.com");
        let outcome = observer.gate(&request("http://t.com/px", 1, &[("Cookie", "id=1")]));
        assert_eq!(outcome.decision, GateDecision::Cancel);
    }

    #[tokio::test]
    async fn test_popup_resolves_to_category_c() {
        let observer = observer_with(vec![], WindowType::Popup, vec![]);
        observer.tab_updated(1, "http://a.com/", 10, true);

        let outcome = observer.gate(&request(
            "http://t.com/px",
            1,
            &[("Cookie", "id=1"), ("Referer", "http://a.com/")],
        ));
        observer.complete(outcome.side_work).await;

        assert_eq!(
            observer.get_trackers()["t.com"].categories,
            vec![Category::C]
        );
    }

    #[tokio::test]
    async fn test_category_block_applies_to_later_classifications() {
        let observer = observer_with(vec![], WindowType::Normal, vec![]);
        observer.tab_updated(1, "http://a.com/", 10, true);
        observer.block_category(Category::B);

        // First request: not yet blocked (classification is what blocks it).
        let outcome = observer.gate(&request("http://t.com/px", 1, &[("Cookie", "id=1")]));
        assert_eq!(outcome.decision, GateDecision::Allow);
        observer.complete(outcome.side_work).await;
        assert!(observer.is_tracker_domain_blocked("t.com"));

        // Second request to the same tracker: now cancelled.
        let outcome = observer.gate(&request("http://t.com/px", 1, &[("Cookie", "id=1")]));
        assert_eq!(outcome.decision, GateDecision::Cancel);
    }

    #[tokio::test]
    async fn test_history_known_yields_personal_category() {
        let observer = observer_with(vec![], WindowType::Normal, vec![]);
        observer.tab_updated(1, "http://a.com/", 10, true);
        observer.history_visited("http://t.com/somewhere");

        let outcome = observer.gate(&request("http://t.com/px", 1, &[("Cookie", "id=1")]));
        observer.complete(outcome.side_work).await;
        assert_eq!(
            observer.get_trackers()["t.com"].categories,
            vec![Category::E]
        );
    }

    #[tokio::test]
    async fn test_history_removal_downgrades_personal_records() {
        let observer = observer_with(vec![], WindowType::Normal, vec![]);
        observer.tab_updated(1, "http://a.com/", 10, true);
        observer.history_visited("http://t.com/");

        let outcome = observer.gate(&request("http://t.com/px", 1, &[("Cookie", "id=1")]));
        observer.complete(outcome.side_work).await;

        observer
            .history_removed(HistoryRemoval {
                all_history: false,
                urls: vec!["http://t.com/".into()],
            })
            .await;

        assert_eq!(
            observer.get_trackers()["t.com"].categories,
            vec![Category::B]
        );

        // Idempotent: a second removal changes nothing.
        observer
            .history_removed(HistoryRemoval {
                all_history: false,
                urls: vec!["http://t.com/".into()],
            })
            .await;
        assert_eq!(
            observer.get_trackers()["t.com"].categories,
            vec![Category::B]
        );
    }

    #[tokio::test]
    async fn test_history_removal_spares_still_visited_domains() {
        let observer = observer_with(
            vec![],
            WindowType::Normal,
            vec!["http://t.com/still-here".into()],
        );
        observer.tab_updated(1, "http://a.com/", 10, true);
        observer.history_visited("http://t.com/");

        let outcome = observer.gate(&request("http://t.com/px", 1, &[("Cookie", "id=1")]));
        observer.complete(outcome.side_work).await;

        observer
            .history_removed(HistoryRemoval {
                all_history: false,
                urls: vec!["http://t.com/deleted-page".into()],
            })
            .await;

        // Another history entry for t.com remains: E survives.
        assert_eq!(
            observer.get_trackers()["t.com"].categories,
            vec![Category::E]
        );
    }

    #[tokio::test]
    async fn test_clear_all_data() {
        let observer = observer_with(vec![], WindowType::Normal, vec![]);
        observer.tab_updated(1, "http://a.com/", 10, true);
        observer.block_tracker_domain("t.com");
        let outcome = observer.gate(&request("http://u.com/px", 1, &[("Cookie", "id=1")]));
        observer.complete(outcome.side_work).await;

        observer.register_subscriber("ext-1", "Graph", None);
        observer.clear_all_data();

        assert!(observer.get_trackers().is_empty());
        assert!(observer.get_blocked_domains().is_empty());
        assert!(observer.get_blocked_categories().is_empty());
        assert!(!observer.is_tracker_domain_blocked("t.com"));
    }

    #[tokio::test]
    async fn test_state_roundtrips_through_store() {
        let store = Arc::new(MemoryStore::new());
        {
            let observer = Observer::new(
                store.clone(),
                Arc::new(FixedCookies(vec![])),
                Arc::new(FixedWindows(WindowType::Normal)),
                Arc::new(FixedHistory(vec![])),
                Arc::new(NoopSink),
            );
            observer.tab_updated(1, "http://a.com/", 10, true);
            observer.block_tracker_domain("blocked.com");
            observer.register_subscriber("ext-1", "Graph", Some("view.html".into()));
            let outcome = observer.gate(&request("http://t.com/px", 1, &[("Cookie", "id=1")]));
            observer.complete(outcome.side_work).await;
            observer.flush().await.unwrap();
        }

        let observer = Observer::load(
            store,
            Arc::new(FixedCookies(vec![])),
            Arc::new(FixedWindows(WindowType::Normal)),
            Arc::new(FixedHistory(vec![])),
            Arc::new(NoopSink),
        )
        .await
        .unwrap();
        assert!(observer.is_tracker_domain_blocked("blocked.com"));
        assert_eq!(
            observer.get_trackers()["t.com"].categories,
            vec![Category::B]
        );
    }
}
