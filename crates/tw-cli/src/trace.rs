//! Recorded browsing traces
//!
//! A trace file is a JSON document capturing everything the observer would
//! have seen live: the cookie jars per domain, the window types, and an
//! ordered event stream. Replaying one reproduces classification
//! deterministically without a browser.

use std::collections::HashMap;
use std::fs;

use async_trait::async_trait;
use serde::Deserialize;

use tw_core::types::{Cookie, Header, TabId, WindowId, WindowType};
use tw_observer::{CookieStore, HistoryProvider, OracleError, WindowOracle};

#[derive(Debug, Deserialize)]
pub struct Trace {
    /// Fixture cookie store: domain -> cookies visible for that domain.
    #[serde(default)]
    pub cookies: HashMap<String, Vec<Cookie>>,
    /// Fixture window oracle: window id -> "normal" | "popup".
    #[serde(default)]
    pub windows: HashMap<WindowId, WindowType>,
    pub events: Vec<Event>,
}

impl Trace {
    pub fn load(path: &str) -> Result<Trace, String> {
        let content =
            fs::read_to_string(path).map_err(|e| format!("Failed to read '{path}': {e}"))?;
        serde_json::from_str(&content).map_err(|e| format!("Invalid trace '{path}': {e}"))
    }
}

/// One recorded browser event, in observation order.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    TabUpdated {
        tab_id: TabId,
        url: String,
        window_id: WindowId,
        #[serde(default = "default_loading")]
        loading: bool,
    },
    TabRemoved {
        tab_id: TabId,
    },
    CookieSet {
        tab_id: TabId,
        page_url: String,
        call_stack: Vec<String>,
        cookie: String,
    },
    Request {
        url: String,
        tab_id: Option<TabId>,
        #[serde(default)]
        headers: Vec<Header>,
    },
    HistoryVisited {
        url: String,
    },
}

fn default_loading() -> bool {
    true
}

// =============================================================================
// Fixture oracles backed by the trace
// =============================================================================

pub struct TraceCookies(pub HashMap<String, Vec<Cookie>>);

#[async_trait]
impl CookieStore for TraceCookies {
    async fn cookies_for_domain(&self, domain: &str) -> Result<Vec<Cookie>, OracleError> {
        Ok(self.0.get(domain).cloned().unwrap_or_default())
    }
}

pub struct TraceWindows(pub HashMap<WindowId, WindowType>);

#[async_trait]
impl WindowOracle for TraceWindows {
    async fn window_type(&self, window_id: WindowId) -> Result<WindowType, OracleError> {
        Ok(self.0.get(&window_id).copied().unwrap_or(WindowType::Normal))
    }
}

/// Replays have no live history backend; removals see an empty remainder.
pub struct TraceHistory;

#[async_trait]
impl HistoryProvider for TraceHistory {
    async fn all_urls(&self) -> Result<Vec<String>, OracleError> {
        Ok(vec![])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_trace() {
        let json = r#"{
            "cookies": {"a.com": [{"name": "id", "value": "XYZ123"}]},
            "windows": {"10": "popup"},
            "events": [
                {"event": "tab_updated", "tab_id": 1, "url": "http://a.com/", "window_id": 10},
                {"event": "request", "url": "http://t.com/px", "tab_id": 1,
                 "headers": [{"name": "Cookie", "value": "id=1"}]},
                {"event": "tab_removed", "tab_id": 1}
            ]
        }"#;
        let trace: Trace = serde_json::from_str(json).unwrap();
        assert_eq!(trace.cookies["a.com"][0].value, "XYZ123");
        assert_eq!(trace.windows[&10], WindowType::Popup);
        assert_eq!(trace.events.len(), 3);
        match &trace.events[0] {
            Event::TabUpdated { loading, .. } => assert!(*loading),
            other => panic!("unexpected event {other:?}"),
        }
    }
}
