//! Shared data model for the warden DLP proxy.
//!
//! These types cross every component boundary in the workspace: the
//! detector produces [`Detection`]/[`ScanResult`], the record cache
//! produces/consumes [`Record`]/[`CacheStats`], the registry aggregator
//! produces [`ServerEntry`]/[`RegistryEntry`], the guesser produces
//! [`GuessResult`], and the management service produces
//! [`BulkOperationResult`].

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity tag, fixed by pattern declaration. Ordered `critical > high >
/// medium > low` for [`ScanResult::max_severity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a detection was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Location {
    Arguments,
    Response,
}

/// One finding produced by a scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub pattern_name: String,
    pub category: String,
    pub severity: Severity,
    pub location: Location,
    #[serde(default)]
    pub is_likely_example: bool,
}

/// The outcome of scanning one request/response pair.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanResult {
    pub detected: bool,
    pub detections: Vec<Detection>,
    pub scan_duration_ms: u64,
    pub truncated: bool,
}

impl ScanResult {
    /// The highest severity among detections, if any.
    pub fn max_severity(&self) -> Option<Severity> {
        self.detections.iter().map(|d| d.severity).max()
    }
}

/// A single descent step in a `record_path`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PathSegment {
    Object { key: String },
    Array { index: usize },
    Parsed,
}

/// A durable record-cache entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    pub key: String,
    pub tool_name: String,
    pub args: BTreeMap<String, serde_json::Value>,
    pub timestamp: DateTime<Utc>,
    pub full_content: String,
    pub record_path: String,
    pub total_records: usize,
    pub total_size: usize,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub access_count: u64,
}

/// Process-wide cache counters, updated under the cache's own lock.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub total_entries: u64,
    pub total_size_bytes: u64,
    pub hit_count: u64,
    pub miss_count: u64,
    pub evicted_count: u64,
    pub cleanup_count: u64,
}

/// Metadata accompanying a windowed `GetRecords` read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadMeta {
    pub key: String,
    pub total_records: usize,
    pub limit: usize,
    pub offset: usize,
    pub total_size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_path: Option<String>,
}

/// The response shape for a windowed cache read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadCacheResponse {
    pub records: Vec<serde_json::Value>,
    pub meta: ReadMeta,
}

/// A repository derived from a GitHub URL, as reported by the guesser.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryInfo {
    #[serde(rename = "type")]
    pub kind: String,
    pub package_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub install_cmd: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of probing every registry known to the guesser for one GitHub URL.
/// Only `npm` is implemented today; the schema allows future registries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuessResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub npm: Option<RepositoryInfo>,
}

/// One entry in the uniform catalog the registry aggregator produces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerEntry {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_cmd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    pub registry: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_code_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository_info: Option<GuessResult>,
}

/// A federated catalog descriptor (not an individual tool server).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub url: String,
    pub servers_url: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub protocol: String,
}

/// Aggregate outcome of a fleet-level bulk operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BulkOperationResult {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    pub errors: BTreeMap<String, String>,
}

impl BulkOperationResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful entity. Increments `total` and `successful`.
    pub fn record_success(&mut self) {
        self.total += 1;
        self.successful += 1;
    }

    /// Record a failed entity with its error string.
    pub fn record_failure(&mut self, name: impl Into<String>, err: impl Into<String>) {
        self.total += 1;
        self.failed += 1;
        self.errors.insert(name.into(), err.into());
    }

    /// `successful + failed == total` as documented in the invariant.
    pub fn is_consistent(&self) -> bool {
        self.successful + self.failed == self.total
    }
}

/// A user-supplied detection category event, appended to the proxy's
/// activity log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
}

/// Wire-tagged fleet/cache event kinds emitted by the management service and
/// the record cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventType {
    ServersChanged {
        reason: String,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        extra: BTreeMap<String, String>,
    },
    OAuthLoggedOut {
        server: String,
    },
    CacheCleanup {
        evicted: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_orders_critical_highest() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
    }

    #[test]
    fn scan_result_max_severity_is_empty_for_no_detections() {
        let r = ScanResult::default();
        assert_eq!(r.max_severity(), None);
    }

    #[test]
    fn scan_result_max_severity_picks_highest() {
        let mut r = ScanResult::default();
        r.detections.push(Detection {
            pattern_name: "a".into(),
            category: "token".into(),
            severity: Severity::Medium,
            location: Location::Arguments,
            is_likely_example: false,
        });
        r.detections.push(Detection {
            pattern_name: "b".into(),
            category: "private_key".into(),
            severity: Severity::Critical,
            location: Location::Response,
            is_likely_example: false,
        });
        assert_eq!(r.max_severity(), Some(Severity::Critical));
    }

    #[test]
    fn bulk_operation_result_tracks_invariant() {
        let mut result = BulkOperationResult::new();
        result.record_success();
        result.record_failure("srv-1", "context canceled");
        assert!(result.is_consistent());
        assert_eq!(result.total, 2);
        assert_eq!(result.errors.get("srv-1").unwrap(), "context canceled");
    }

    #[test]
    fn event_type_servers_changed_round_trips() {
        let event = EventType::ServersChanged {
            reason: "restart_all".into(),
            extra: BTreeMap::new(),
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: EventType = serde_json::from_str(&json).unwrap();
        match back {
            EventType::ServersChanged { reason, .. } => assert_eq!(reason, "restart_all"),
            _ => panic!("wrong variant"),
        }
    }
}
