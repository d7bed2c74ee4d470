//! Host oracle traits
//!
//! The collaborators whose answers are only available asynchronously. The
//! gate decision never waits on any of these; their results feed the
//! classification side-work only.

use async_trait::async_trait;

use tw_core::types::{Cookie, WindowId, WindowType};

use crate::error::OracleError;

/// Access to the browser cookie jar.
#[async_trait]
pub trait CookieStore: Send + Sync {
    /// All cookies scoped to the given domain.
    async fn cookies_for_domain(&self, domain: &str) -> Result<Vec<Cookie>, OracleError>;
}

/// Window metadata lookup, used to distinguish popup-originated tracking.
#[async_trait]
pub trait WindowOracle: Send + Sync {
    async fn window_type(&self, window_id: WindowId) -> Result<WindowType, OracleError>;
}

/// Bulk history search, used only by the removal cascade to check whether a
/// domain still has any remaining history entry.
#[async_trait]
pub trait HistoryProvider: Send + Sync {
    async fn all_urls(&self) -> Result<Vec<String>, OracleError>;
}
