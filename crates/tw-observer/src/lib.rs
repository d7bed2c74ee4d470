//! Trackwatch Observer Service
//!
//! The host-facing half of trackwatch: owns the process-wide classification
//! state (ledger, policy, history index, tab sessions, subscriber registry),
//! performs the synchronous gate decision for every intercepted request, and
//! runs the asynchronous classification side-work against the host oracles.
//!
//! The host (browser glue, or the CLI's trace replayer) feeds events in and
//! receives gate verdicts out; everything else - persistence of the six state
//! blobs, subscriber notification, the history-removal cascade - happens
//! behind the [`Observer`] facade.

pub mod error;
pub mod oracles;
pub mod persist;
pub mod service;
pub mod subscribers;

pub use error::{OracleError, StoreError};
pub use oracles::{CookieStore, HistoryProvider, WindowOracle};
pub use persist::{JsonFileStore, MemoryStore, StateKey, StateStore};
pub use service::{GateOutcome, HistoryRemoval, Observer};
pub use subscribers::{AddonInfo, AddonRegistry, NoopSink, NotificationSink};
