//! Typed configuration data for the detector and management service.
//!
//! This crate defines the schema only. Discovering config files on disk,
//! merging CLI arguments, and watching for changes are all out of scope —
//! callers construct a [`WardenConfig`] however they see fit and hand it to
//! [`warden_detect::Detector::reload_config`] or
//! [`warden_manage::ManagementService`].

use serde::{Deserialize, Serialize};
use warden_detect::DetectionConfig;
use warden_manage::GateConfig;

fn default_cache_ttl_hours() -> i64 {
    24
}

fn default_repo_guess_ttl_hours() -> i64 {
    6
}

/// The full set of runtime-tunable knobs this workspace's components
/// accept. Everything here has a sensible default; nothing here is loaded
/// from a file by this crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WardenConfig {
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub gates: GateConfig,
    #[serde(default = "default_cache_ttl_hours")]
    pub cache_ttl_hours: i64,
    #[serde(default = "default_repo_guess_ttl_hours")]
    pub repo_guess_ttl_hours: i64,
}

impl Default for WardenConfig {
    fn default() -> Self {
        Self {
            detection: DetectionConfig::default(),
            gates: GateConfig::default(),
            cache_ttl_hours: default_cache_ttl_hours(),
            repo_guess_ttl_hours: default_repo_guess_ttl_hours(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_json() {
        let config = WardenConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let reloaded: WardenConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(reloaded.cache_ttl_hours, config.cache_ttl_hours);
        assert_eq!(reloaded.gates.disable_management, config.gates.disable_management);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let json = r#"{"detection": {"enabled": false, "scan_requests": true, "scan_responses": true, "max_payload_size": 1000, "entropy_threshold": 4.5, "enabled_categories": []}}"#;
        let config: WardenConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.cache_ttl_hours, default_cache_ttl_hours());
        assert!(!config.detection.enabled);
    }
}
