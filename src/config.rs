//! Graph configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::instance::MAX_INSTANCES;
use crate::model::{ObjectTypes, StealMode};
use crate::Result;

/// Tunables for a [`Graph`](crate::Graph). Every field has a default, so a
/// JSON document only needs the fields it overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// How long a Removed/Expired record stays visible after listeners saw it.
    pub grace_period_ms: u64,
    /// Devices silent for longer than this are expired. `0` disables expiry.
    pub device_timeout_secs: u32,
    /// Lease length requested for auto-renewing subscriptions.
    pub autorenew_interval_secs: u32,
    /// Renew this many seconds before a lease runs out.
    pub renew_margin_secs: u32,
    /// Hard cap on instances per signal.
    pub max_instances: usize,
    /// Pool size for signals that don't announce `@num_inst`.
    pub default_instances: usize,
    /// Steal mode for signals that don't announce `@steal`.
    pub default_steal: StealMode,
    /// Most source slots a map may have; larger maps are rejected.
    pub max_map_sources: usize,
    /// Object types to subscribe to on every device as it appears.
    pub autosubscribe: ObjectTypes,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: 1000,
            device_timeout_secs: 10,
            autorenew_interval_secs: 60,
            renew_margin_secs: 10,
            max_instances: MAX_INSTANCES,
            default_instances: 1,
            default_steal: StealMode::None,
            max_map_sources: 8,
            autosubscribe: ObjectTypes::NONE,
        }
    }
}

impl GraphConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period_ms = grace.as_millis() as u64;
        self
    }

    pub fn with_autosubscribe(mut self, types: ObjectTypes) -> Self {
        self.autosubscribe = types;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let cfg = GraphConfig::from_json(r#"{"grace_period_ms": 0, "default_steal": "oldest"}"#).unwrap();
        assert_eq!(cfg.grace_period_ms, 0);
        assert_eq!(cfg.default_steal, StealMode::Oldest);
        assert_eq!(cfg.max_instances, MAX_INSTANCES);
        assert_eq!(cfg.autorenew_interval_secs, 60);
    }

    #[test]
    fn test_autosubscribe_names() {
        let cfg = GraphConfig::from_json(r#"{"autosubscribe": ["device", "signal"]}"#).unwrap();
        assert!(cfg.autosubscribe.contains(ObjectTypes::DEVICE | ObjectTypes::SIGNAL));
    }

    #[test]
    fn test_max_map_sources() {
        assert_eq!(GraphConfig::default().max_map_sources, 8);
        let cfg = GraphConfig::from_json(r#"{"max_map_sources": 2}"#).unwrap();
        assert_eq!(cfg.max_map_sources, 2);
    }

    #[test]
    fn test_bad_json_is_serialization_error() {
        let err = GraphConfig::from_json(r#"{"max_instances": "many"}"#).unwrap_err();
        assert!(matches!(err, crate::Error::Serialization(_)));
    }
}
