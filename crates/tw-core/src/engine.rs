//! Classification engine
//!
//! Two independent detectors run over every intercepted request:
//!
//! - the **cookie-bearing detector** fires when the request carries a
//!   `Cookie` header and classifies cross-domain requests as E (personal),
//!   C (forced) or B (vanilla);
//! - the **leak detector** runs unconditionally and confirms identifier
//!   leaks into categories A, D and F by matching cookie values against the
//!   request URL.
//!
//! Each detector produces a synchronous boolean verdict ("plausible tracking
//! situation") that the gate uses to block or strip before the request
//! leaves. Classification detail that depends on asynchronous host lookups
//! (window type, cookie enumeration) is returned as [`PendingLookup`]
//! side-work; the matching `resolve_*` functions are pure over the payload
//! captured at decision time, so a racing navigation or tab close cannot
//! change what gets recorded.
//!
//! Category precedence for cookie-bearing requests is an ordered rule list:
//! same-domain wins (no tracker), then E (history-known), then the
//! referrer/popup rules, then plain B.

use crate::domain::{is_internal_url, normalize_url};
use crate::history::HistoryIndex;
use crate::session::{AnalyticsCandidate, TabSession};
use crate::types::{
    Category, Cookie, RequestInfo, TabId, TrackerRecord, WindowId, WindowType,
};

/// Cookie values too generic to count as leaked identifiers.
const TRIVIAL_VALUES: &[&str] = &[
    "www", "true", "false", "id", "ID", "us", "US", "en_US", "en_us", "all", "undefined",
];

/// Minimum length for a cookie value to be considered an identifier.
const MIN_LEAK_VALUE_LEN: usize = 4;

// =============================================================================
// Deferred side-work payloads
// =============================================================================

/// Pending popup check for a cookie-bearing request with a referrer.
/// Popup window => category C, normal window => category B.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowLookup {
    pub window_id: WindowId,
    pub tab_id: TabId,
    pub episode: u64,
    pub site_domain: String,
    pub request_domain: String,
}

/// Pending cookie enumeration for the leak detector. Carries everything the
/// resolution needs, including a snapshot of the tab's candidate list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieScan {
    pub leak_domain: String,
    pub tab_id: TabId,
    pub episode: u64,
    pub site_domain: String,
    pub request_domain: String,
    pub request_url: String,
    pub referrer_domain: Option<String>,
    pub candidates: Vec<AnalyticsCandidate>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingLookup {
    WindowType(WindowLookup),
    CookieScan(CookieScan),
}

/// Outcome of classifying one request.
#[derive(Debug, Clone, Default)]
pub struct Classification {
    /// Cookie detector's synchronous verdict: cross-domain with a cookie.
    pub cookie_gate: bool,
    /// Leak detector's synchronous verdict: cross-domain, attributable page.
    pub leak_gate: bool,
    /// Records decided without any host lookup (E, and B without referrer).
    pub records: Vec<TrackerRecord>,
    /// Lookups still needed to refine the classification.
    pub side_work: Vec<PendingLookup>,
}

impl Classification {
    /// The conservative gate verdict: either detector flagged the request.
    pub fn is_tracking(&self) -> bool {
        self.cookie_gate || self.leak_gate
    }
}

// =============================================================================
// Per-request classification
// =============================================================================

/// Classify one intercepted request against the current session and history
/// state. Pure and synchronous; the returned side-work captures everything
/// the asynchronous half needs.
pub fn classify(
    request: &RequestInfo,
    session: Option<&TabSession>,
    history: &HistoryIndex,
) -> Classification {
    let mut result = Classification::default();

    // Requests not attributable to an open tab are never trackers.
    let session = match session {
        Some(session) => session,
        None => return result,
    };

    if request.cookie().is_some() {
        check_cookie_request(request, session, history, &mut result);
    }
    check_leak_request(request, session, &mut result);

    result
}

/// Cookie-bearing detector: the request carries a `Cookie` header.
fn check_cookie_request(
    request: &RequestInfo,
    session: &TabSession,
    history: &HistoryIndex,
    out: &mut Classification,
) {
    if is_internal_url(&session.url) {
        return;
    }

    let site_domain = normalize_url(&session.url);
    let request_domain = normalize_url(&request.url);
    if site_domain.is_empty() || site_domain == request_domain {
        return;
    }

    // Cross-domain with a cookie: an active tracking situation whichever
    // category it resolves to.
    out.cookie_gate = true;

    // E takes precedence over everything referrer- or window-derived.
    if history.is_known(&request_domain) {
        log::debug!("category E tracker {request_domain} on {site_domain}");
        out.records
            .push(TrackerRecord::plain(request_domain, Category::E));
        return;
    }

    if request.referrer().is_some() {
        // B or C depending on the owning window; only knowable async.
        out.side_work.push(PendingLookup::WindowType(WindowLookup {
            window_id: session.window_id,
            tab_id: session.tab_id,
            episode: session.episode,
            site_domain,
            request_domain,
        }));
        return;
    }

    log::debug!("category B tracker {request_domain} on {site_domain}");
    out.records
        .push(TrackerRecord::plain(request_domain, Category::B));
}

/// Leak detector: runs regardless of cookie presence.
fn check_leak_request(request: &RequestInfo, session: &TabSession, out: &mut Classification) {
    if is_internal_url(&session.url) {
        return;
    }

    let site_domain = normalize_url(&session.url);
    let request_domain = normalize_url(&request.url);

    let referrer_domain = request.referrer().map(normalize_url);
    let leak_domain = referrer_domain
        .clone()
        .unwrap_or_else(|| site_domain.clone());

    out.leak_gate = request_domain != site_domain;

    out.side_work.push(PendingLookup::CookieScan(CookieScan {
        leak_domain,
        tab_id: session.tab_id,
        episode: session.episode,
        site_domain,
        request_domain,
        request_url: request.url.clone(),
        referrer_domain,
        candidates: session.candidates.clone(),
    }));
}

// =============================================================================
// Side-work resolution
// =============================================================================

/// Resolve a deferred popup check into its record.
pub fn resolve_window_lookup(lookup: &WindowLookup, window_type: WindowType) -> TrackerRecord {
    let category = match window_type {
        WindowType::Popup => Category::C,
        WindowType::Normal => Category::B,
    };
    log::debug!(
        "category {category} tracker {} on {}",
        lookup.request_domain,
        lookup.site_domain
    );
    TrackerRecord::plain(lookup.request_domain.clone(), category)
}

/// Resolve a deferred cookie scan: find cookie values of the possible leak
/// domain embedded in the request URL and classify each surviving match.
pub fn resolve_cookie_scan(scan: &CookieScan, cookies: &[Cookie]) -> Vec<TrackerRecord> {
    let mut records = Vec::new();

    for cookie in cookies {
        let value = cookie.value.as_str();
        if !scan.request_url.contains(value) || is_trivial_value(value) {
            continue;
        }

        let referred = scan
            .referrer_domain
            .as_deref()
            .is_some_and(|r| r != scan.site_domain);

        if referred {
            // The referrer's own cookie is leaking onward.
            if scan.leak_domain == scan.request_domain {
                continue; // tracker referring to itself
            }
            if scan.request_domain == scan.site_domain {
                continue; // a site is never its own tracker
            }
            let referrer = scan.leak_domain.clone();
            log::debug!(
                "category D tracker {} (referred by {referrer}) on {}",
                scan.request_domain,
                scan.site_domain
            );
            records.push(TrackerRecord::referred(
                scan.request_domain.clone(),
                referrer,
                Category::D,
            ));
        } else if scan.request_domain != scan.site_domain {
            let mut confirmed = false;
            for candidate in &scan.candidates {
                if !candidate.cookie_value.contains(value) {
                    continue;
                }
                if candidate.setter_domain == scan.request_domain {
                    // The tracker set this identifier and now receives it.
                    log::debug!(
                        "category A tracker {} on {}",
                        scan.request_domain,
                        scan.site_domain
                    );
                    records.push(TrackerRecord::plain(
                        scan.request_domain.clone(),
                        Category::A,
                    ));
                } else {
                    log::debug!(
                        "category F tracker {} (set by {}) on {}",
                        scan.request_domain,
                        candidate.setter_domain,
                        scan.site_domain
                    );
                    records.push(TrackerRecord::referred(
                        scan.request_domain.clone(),
                        candidate.setter_domain.clone(),
                        Category::F,
                    ));
                }
                confirmed = true;
            }
            if !confirmed {
                log::debug!(
                    "plain first-party cookie leak from {} to {}",
                    scan.site_domain,
                    scan.request_domain
                );
            }
        }
    }

    records
}

#[inline]
fn is_trivial_value(value: &str) -> bool {
    value.len() < MIN_LEAK_VALUE_LEN || TRIVIAL_VALUES.contains(&value)
}

// =============================================================================
// Analytics candidate population
// =============================================================================

/// Turn a reported in-page cookie set into an analytics candidate, if the
/// call stack attributes the set to a third-party script.
pub fn candidate_from_cookie_set(
    page_url: &str,
    call_stack: &[String],
    cookie_string: &str,
) -> Option<AnalyticsCandidate> {
    let setter_url = call_stack.last()?;
    let setter_domain = normalize_url(setter_url);
    let page_domain = normalize_url(page_url);
    if setter_domain == page_domain {
        return None;
    }

    let cookie_value = parse_cookie_value(cookie_string)?;
    Some(AnalyticsCandidate {
        setter_domain,
        cookie_value,
    })
}

/// Extract the value of the first `name=value` pair of a cookie string.
fn parse_cookie_value(cookie_string: &str) -> Option<String> {
    let first_pair = cookie_string.split(';').next()?;
    let (_, value) = first_pair.split_once('=')?;
    Some(value.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionStore;
    use crate::types::Header;

    fn request(url: &str, headers: &[(&str, &str)]) -> RequestInfo {
        RequestInfo {
            url: url.into(),
            tab_id: Some(1),
            headers: headers
                .iter()
                .map(|(name, value)| Header {
                    name: (*name).into(),
                    value: (*value).into(),
                })
                .collect(),
        }
    }

    fn session_on(url: &str) -> SessionStore {
        let mut store = SessionStore::new();
        store.tab_updated(1, url, 10, true);
        store
    }

    fn cookie(name: &str, value: &str) -> Cookie {
        Cookie {
            name: name.into(),
            value: value.into(),
            http_only: false,
            secure: false,
        }
    }

    #[test]
    fn test_no_session_means_no_tracker() {
        let history = HistoryIndex::new();
        let req = request("http://t.com/", &[("Cookie", "id=1")]);
        let result = classify(&req, None, &history);
        assert!(!result.is_tracking());
        assert!(result.records.is_empty());
        assert!(result.side_work.is_empty());
    }

    #[test]
    fn test_same_domain_cookie_is_not_tracking() {
        let history = HistoryIndex::new();
        let store = session_on("http://a.com/page");
        let req = request("http://cdn.a.com/img", &[("Cookie", "id=1")]);
        let result = classify(&req, store.get(1), &history);
        assert!(!result.cookie_gate);
        assert!(!result.leak_gate);
        assert!(result.records.is_empty());
    }

    #[test]
    fn test_internal_page_skipped() {
        let history = HistoryIndex::new();
        let store = session_on("chrome://newtab/");
        let req = request("http://t.com/", &[("Cookie", "id=1")]);
        let result = classify(&req, store.get(1), &history);
        assert!(!result.is_tracking());
        assert!(result.side_work.is_empty());
    }

    #[test]
    fn test_history_known_yields_e_over_popup_rules() {
        let mut history = HistoryIndex::new();
        history.record_visit("http://t.com/");
        let store = session_on("http://a.com/");
        // Referrer present: would be B/C, but E takes precedence.
        let req = request(
            "http://t.com/px",
            &[("Cookie", "id=1"), ("Referer", "http://a.com/")],
        );
        let result = classify(&req, store.get(1), &history);
        assert!(result.cookie_gate);
        assert_eq!(result.records, vec![TrackerRecord::plain("t.com", Category::E)]);
        // No window lookup was scheduled.
        assert!(!result
            .side_work
            .iter()
            .any(|w| matches!(w, PendingLookup::WindowType(_))));
    }

    #[test]
    fn test_referrer_defers_to_window_lookup() {
        let history = HistoryIndex::new();
        let store = session_on("http://a.com/");
        let req = request(
            "http://t.com/px",
            &[("Cookie", "id=1"), ("Referer", "http://a.com/")],
        );
        let result = classify(&req, store.get(1), &history);
        assert!(result.cookie_gate);
        assert!(result.records.is_empty());

        let lookup = result
            .side_work
            .iter()
            .find_map(|w| match w {
                PendingLookup::WindowType(lookup) => Some(lookup),
                _ => None,
            })
            .expect("window lookup scheduled");
        assert_eq!(lookup.request_domain, "t.com");

        assert_eq!(
            resolve_window_lookup(lookup, WindowType::Popup),
            TrackerRecord::plain("t.com", Category::C)
        );
        assert_eq!(
            resolve_window_lookup(lookup, WindowType::Normal),
            TrackerRecord::plain("t.com", Category::B)
        );
    }

    #[test]
    fn test_no_referrer_is_immediate_b() {
        let history = HistoryIndex::new();
        let store = session_on("http://a.com/");
        let req = request("http://t.com/px", &[("Cookie", "id=1")]);
        let result = classify(&req, store.get(1), &history);
        assert!(result.cookie_gate);
        assert_eq!(result.records, vec![TrackerRecord::plain("t.com", Category::B)]);
    }

    #[test]
    fn test_leak_gate_requires_cross_domain() {
        let history = HistoryIndex::new();
        let store = session_on("http://a.com/");
        let same = classify(&request("http://a.com/self", &[]), store.get(1), &history);
        assert!(!same.leak_gate);
        let cross = classify(&request("http://t.com/px", &[]), store.get(1), &history);
        assert!(cross.leak_gate);
        assert!(!cross.cookie_gate);
    }

    #[test]
    fn test_cookie_scan_confirms_category_a() {
        let history = HistoryIndex::new();
        let mut store = session_on("http://a.com/");
        store.push_candidate(
            1,
            AnalyticsCandidate {
                setter_domain: "t.com".into(),
                cookie_value: "XYZ123".into(),
            },
        );
        let req = request("http://t.com/collect?uid=XYZ123", &[]);
        let result = classify(&req, store.get(1), &history);

        let scan = result
            .side_work
            .iter()
            .find_map(|w| match w {
                PendingLookup::CookieScan(scan) => Some(scan),
                _ => None,
            })
            .expect("cookie scan scheduled");

        let records = resolve_cookie_scan(scan, &[cookie("id", "XYZ123")]);
        assert_eq!(records, vec![TrackerRecord::plain("t.com", Category::A)]);
    }

    #[test]
    fn test_cookie_scan_confirms_category_f_for_other_setter() {
        let history = HistoryIndex::new();
        let mut store = session_on("http://a.com/");
        store.push_candidate(
            1,
            AnalyticsCandidate {
                setter_domain: "analytics.com".into(),
                cookie_value: "prefix-XYZ123".into(),
            },
        );
        let req = request("http://t.com/collect?uid=XYZ123", &[]);
        let result = classify(&req, store.get(1), &history);
        let scan = match &result.side_work[0] {
            PendingLookup::CookieScan(scan) => scan,
            other => panic!("unexpected side work {other:?}"),
        };

        let records = resolve_cookie_scan(scan, &[cookie("id", "XYZ123")]);
        assert_eq!(
            records,
            vec![TrackerRecord::referred("t.com", "analytics.com", Category::F)]
        );
    }

    #[test]
    fn test_cookie_scan_referred_leak_is_category_d() {
        let history = HistoryIndex::new();
        let store = session_on("http://a.com/");
        let req = request(
            "http://tracker.com/sync?uid=XYZ123",
            &[("Referer", "http://ad.net/")],
        );
        let result = classify(&req, store.get(1), &history);
        let scan = match &result.side_work[0] {
            PendingLookup::CookieScan(scan) => scan,
            other => panic!("unexpected side work {other:?}"),
        };
        assert_eq!(scan.leak_domain, "ad.net");

        let records = resolve_cookie_scan(scan, &[cookie("uid", "XYZ123")]);
        assert_eq!(
            records,
            vec![TrackerRecord::referred("tracker.com", "ad.net", Category::D)]
        );
    }

    #[test]
    fn test_cookie_scan_skips_self_referral() {
        let history = HistoryIndex::new();
        let store = session_on("http://a.com/");
        // Referrer domain equals the request domain: tracker talking to itself.
        let req = request(
            "http://tracker.com/sync?uid=XYZ123",
            &[("Referer", "http://tracker.com/frame")],
        );
        let result = classify(&req, store.get(1), &history);
        let scan = match &result.side_work[0] {
            PendingLookup::CookieScan(scan) => scan,
            other => panic!("unexpected side work {other:?}"),
        };
        assert!(resolve_cookie_scan(scan, &[cookie("uid", "XYZ123")]).is_empty());
    }

    #[test]
    fn test_cookie_scan_rejects_trivial_values() {
        let history = HistoryIndex::new();
        let store = session_on("http://a.com/");
        let req = request(
            "http://t.com/px?v=true&l=en_US&x=abc&id=undefined",
            &[("Referer", "http://ad.net/")],
        );
        let result = classify(&req, store.get(1), &history);
        let scan = match &result.side_work[0] {
            PendingLookup::CookieScan(scan) => scan,
            other => panic!("unexpected side work {other:?}"),
        };
        let cookies = vec![
            cookie("a", "true"),
            cookie("b", "en_US"),
            cookie("c", "abc"),
            cookie("d", "undefined"),
        ];
        assert!(resolve_cookie_scan(scan, &cookies).is_empty());
    }

    #[test]
    fn test_unconfirmed_first_party_leak_not_recorded() {
        let history = HistoryIndex::new();
        let store = session_on("http://a.com/");
        let req = request("http://t.com/px?sess=ABCD9999", &[]);
        let result = classify(&req, store.get(1), &history);
        let scan = match &result.side_work[0] {
            PendingLookup::CookieScan(scan) => scan,
            other => panic!("unexpected side work {other:?}"),
        };
        // Value leaks, but no candidate corroborates it.
        assert!(resolve_cookie_scan(scan, &[cookie("sess", "ABCD9999")]).is_empty());
    }

    #[test]
    fn test_candidate_from_cookie_set() {
        let candidate = candidate_from_cookie_set(
            "http://a.com/page",
            &["http://a.com/page".into(), "http://t.com/lib.js".into()],
            "id=XYZ123; path=/; domain=.t.com",
        )
        .expect("third-party setter");
        assert_eq!(candidate.setter_domain, "t.com");
        assert_eq!(candidate.cookie_value, "XYZ123");

        // First-party setter: not a candidate.
        assert!(candidate_from_cookie_set(
            "http://a.com/page",
            &["http://a.com/app.js".into()],
            "id=1",
        )
        .is_none());

        // Unparseable cookie string: not a candidate.
        assert!(candidate_from_cookie_set(
            "http://a.com/page",
            &["http://t.com/lib.js".into()],
            "garbage",
        )
        .is_none());
    }
}
