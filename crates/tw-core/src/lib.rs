//! Trackwatch Core Library
//!
//! This crate provides the classification engine for the trackwatch tracker
//! observer. It decides, per intercepted request, whether the request is
//! third-party tracking and which behavioral category (A-F) it falls into,
//! and maintains the per-site tracker ledger and blocking policy backing
//! those decisions.
//!
//! # Architecture
//!
//! Everything in this crate is synchronous and free of I/O. The inputs that
//! are only available asynchronously in a real host (cookie enumeration,
//! window type lookups) are modeled as deferred side-work payloads: the
//! engine returns them alongside its immediate verdict, and the host resolves
//! them later through pure `resolve_*` functions. The synchronous gate
//! verdict is therefore always available before the request deadline.
//!
//! # Modules
//!
//! - `domain`: URL to canonical tracking domain normalization
//! - `types`: categories, tracker keys/records, request types
//! - `history`: locally mirrored visited-domain index
//! - `session`: per-tab state (candidates, observed trackers)
//! - `engine`: the two per-request detectors and their resolution paths
//! - `ledger`: append-only site -> tracker record store and aggregate views
//! - `policy`: domain/category blocking and cookie stripping

pub mod domain;
pub mod engine;
pub mod history;
pub mod ledger;
pub mod policy;
pub mod session;
pub mod types;

// Re-export commonly used types
pub use domain::{is_internal_url, normalize_url};
pub use engine::{classify, Classification, PendingLookup};
pub use history::HistoryIndex;
pub use ledger::{TrackerLedger, TrackerSummary};
pub use policy::BlockPolicy;
pub use session::{AnalyticsCandidate, SessionStore, TabSession};
pub use types::{
    Category, CategoryParseError, CategorySet, Cookie, GateDecision, Header, RequestInfo,
    TrackerKey, TrackerRecord, WindowType,
};
