//! Subscriber registry and notification delivery
//!
//! External add-ons register once (persisted) and receive a push whenever a
//! tracker is appended to the ledger. Delivery goes through a host-supplied
//! [`NotificationSink`]; the registry only remembers who to deliver to.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use tw_core::types::TrackingNotification;

/// A registered external subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddonInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

/// Persisted map of subscriber id -> info.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AddonRegistry {
    addons: BTreeMap<String, AddonInfo>,
}

impl AddonRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: &str, name: &str, link: Option<String>) {
        self.addons.insert(
            id.to_string(),
            AddonInfo {
                name: name.to_string(),
                link,
            },
        );
    }

    /// Remove a subscriber (uninstalled or disabled add-on).
    pub fn unregister(&mut self, id: &str) -> bool {
        self.addons.remove(id).is_some()
    }

    pub fn ids(&self) -> Vec<String> {
        self.addons.keys().cloned().collect()
    }

    pub fn get(&self, id: &str) -> Option<&AddonInfo> {
        self.addons.get(id)
    }

    pub fn is_empty(&self) -> bool {
        self.addons.is_empty()
    }
}

/// Transport delivering tracking notifications to a registered subscriber.
pub trait NotificationSink: Send + Sync {
    fn deliver(&self, addon_id: &str, notification: &TrackingNotification);
}

/// Sink that drops every notification; for hosts with no delivery channel.
pub struct NoopSink;

impl NotificationSink for NoopSink {
    fn deliver(&self, _addon_id: &str, _notification: &TrackingNotification) {}
}
