//! Core type definitions for trackwatch
//!
//! These types are shared between the engine, the ledger, and the host-facing
//! observer, and define the shapes persisted to storage.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Browser tab identifier.
pub type TabId = i64;

/// Browser window identifier.
pub type WindowId = i64;

// =============================================================================
// Tracking Categories
// =============================================================================

/// Behavioral tracking category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Category {
    /// Analytics - tracker receives an identifier it previously set itself
    A,
    /// Vanilla - plain cross-domain cookie-bearing request
    B,
    /// Forced - tracking from a popup window
    C,
    /// Referred - a known tracker's cookie leaked onward via the referrer
    D,
    /// Personal - tracker domain the user has organically visited
    E,
    /// Referred analytics - another setter's identifier leaked cross-domain
    F,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::A,
        Category::B,
        Category::C,
        Category::D,
        Category::E,
        Category::F,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::A => "A",
            Category::B => "B",
            Category::C => "C",
            Category::D => "D",
            Category::E => "E",
            Category::F => "F",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error parsing a category letter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown category '{0}' (expected A-F)")]
pub struct CategoryParseError(pub String);

impl FromStr for Category {
    type Err = CategoryParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "A" | "a" => Ok(Category::A),
            "B" | "b" => Ok(Category::B),
            "C" | "c" => Ok(Category::C),
            "D" | "d" => Ok(Category::D),
            "E" | "e" => Ok(Category::E),
            "F" | "f" => Ok(Category::F),
            _ => Err(CategoryParseError(s.to_string())),
        }
    }
}

impl Serialize for Category {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Category {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

bitflags::bitflags! {
    /// Set of tracking categories, used for category-wide blocking.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CategorySet: u8 {
        const A = 1 << 0;
        const B = 1 << 1;
        const C = 1 << 2;
        const D = 1 << 3;
        const E = 1 << 4;
        const F = 1 << 5;
    }
}

impl From<Category> for CategorySet {
    fn from(cat: Category) -> Self {
        match cat {
            Category::A => CategorySet::A,
            Category::B => CategorySet::B,
            Category::C => CategorySet::C,
            Category::D => CategorySet::D,
            Category::E => CategorySet::E,
            Category::F => CategorySet::F,
        }
    }
}

impl CategorySet {
    /// Check membership of a single category.
    pub fn has(self, cat: Category) -> bool {
        self.contains(cat.into())
    }

    /// The member categories, in letter order.
    pub fn categories(self) -> Vec<Category> {
        Category::ALL
            .iter()
            .copied()
            .filter(|&c| self.has(c))
            .collect()
    }
}

impl FromIterator<Category> for CategorySet {
    fn from_iter<I: IntoIterator<Item = Category>>(iter: I) -> Self {
        iter.into_iter()
            .fold(CategorySet::empty(), |set, c| set | c.into())
    }
}

// =============================================================================
// Tracker Keys and Records
// =============================================================================

/// Separator used in the external string form of a referred tracker key.
pub const REFERRED_BY_SEPARATOR: &str = "-referredby-";

/// Identity of an observed tracker.
///
/// Referred observations (categories D and F) are keyed by the attribution
/// chain, so `tracker.com` reached via `ad.net` is a distinct ledger entry
/// from `tracker.com` reached directly. Policy lookups always resolve against
/// the bare domain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TrackerKey {
    Plain(String),
    Referred { domain: String, referrer: String },
}

impl TrackerKey {
    /// The tracker domain with any attribution stripped.
    pub fn bare_domain(&self) -> &str {
        match self {
            TrackerKey::Plain(domain) => domain,
            TrackerKey::Referred { domain, .. } => domain,
        }
    }

    /// The attributed referrer domain, if any.
    pub fn referrer(&self) -> Option<&str> {
        match self {
            TrackerKey::Plain(_) => None,
            TrackerKey::Referred { referrer, .. } => Some(referrer),
        }
    }

    /// Parse the external string form (`domain` or
    /// `domain-referredby-referrer`).
    pub fn parse(s: &str) -> TrackerKey {
        match s.split_once(REFERRED_BY_SEPARATOR) {
            Some((domain, referrer)) => TrackerKey::Referred {
                domain: domain.to_string(),
                referrer: referrer.to_string(),
            },
            None => TrackerKey::Plain(s.to_string()),
        }
    }

    /// Strip the attribution suffix from an external key string, yielding the
    /// bare domain policy operations work on.
    pub fn strip_suffix(s: &str) -> &str {
        match s.split_once(REFERRED_BY_SEPARATOR) {
            Some((domain, _)) => domain,
            None => s,
        }
    }
}

impl fmt::Display for TrackerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackerKey::Plain(domain) => f.write_str(domain),
            TrackerKey::Referred { domain, referrer } => {
                write!(f, "{domain}{REFERRED_BY_SEPARATOR}{referrer}")
            }
        }
    }
}

impl Serialize for TrackerKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for TrackerKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(TrackerKey::parse(&s))
    }
}

/// One tracker observation, as stored in the site ledger.
///
/// The category is assigned exactly once; the only permitted mutation is the
/// E -> B downgrade when the corroborating history is deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerRecord {
    pub key: TrackerKey,
    pub category: Category,
}

impl TrackerRecord {
    pub fn plain(domain: impl Into<String>, category: Category) -> Self {
        TrackerRecord {
            key: TrackerKey::Plain(domain.into()),
            category,
        }
    }

    pub fn referred(
        domain: impl Into<String>,
        referrer: impl Into<String>,
        category: Category,
    ) -> Self {
        TrackerRecord {
            key: TrackerKey::Referred {
                domain: domain.into(),
                referrer: referrer.into(),
            },
            category,
        }
    }
}

// =============================================================================
// Requests and Headers
// =============================================================================

/// A single request header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

/// An intercepted outgoing request, as delivered by the network layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestInfo {
    pub url: String,
    /// Tab the request is attributed to; `None` for requests not belonging
    /// to any open tab (which are never classified).
    pub tab_id: Option<TabId>,
    #[serde(default)]
    pub headers: Vec<Header>,
}

impl RequestInfo {
    /// Look up a header value by name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    pub fn cookie(&self) -> Option<&str> {
        self.header("Cookie")
    }

    pub fn referrer(&self) -> Option<&str> {
        self.header("Referer")
    }
}

/// A cookie as reported by the host cookie store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
}

/// Type of the browser window owning a tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowType {
    Normal,
    Popup,
}

// =============================================================================
// Gate Decision
// =============================================================================

/// Verdict returned to the network layer before the request leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Forward the request unmodified.
    Allow,
    /// Cancel the request entirely.
    Cancel,
    /// Forward the request with the `Cookie` header removed.
    StripCookies,
}

/// Push payload delivered to registered subscribers when a tracker is
/// appended to the ledger. Carries the bare tracker domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingNotification {
    pub tab_id: Option<TabId>,
    pub domain: String,
}
