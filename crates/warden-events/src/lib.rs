//! Append-only JSONL activity log.
//!
//! Fleet-change events (`ServersChanged`, `OAuthLoggedOut`) and cache
//! cleanup events (`CacheCleanup`) are recorded here as the single source of
//! emission documented by the management service: a transition is recorded
//! once, by whichever component owns it, never twice.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use warden_types::{ActivityEvent, EventType};

/// Default events file name.
pub const EVENTS_FILE: &str = "events.jsonl";

/// The events file path for a given state directory.
pub fn events_path(state_dir: &Path) -> PathBuf {
    state_dir.join(EVENTS_FILE)
}

/// In-memory append-only event log, flushed to a JSONL file on demand.
#[derive(Debug, Default)]
pub struct EventLog {
    events: Vec<ActivityEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    /// Record an event with the current timestamp.
    pub fn record(&mut self, event_type: EventType) {
        self.events.push(ActivityEvent {
            timestamp: Utc::now(),
            event_type,
        });
    }

    /// Append all recorded events to `path` in JSONL format, creating the
    /// file (and parent directories) if it does not yet exist.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create events dir {}", parent.display()))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open events file {}", path.display()))?;

        let mut writer = std::io::BufWriter::new(file);
        for event in &self.events {
            let line = serde_json::to_string(event).context("failed to serialize event to JSON")?;
            writeln!(writer, "{line}").context("failed to write event line")?;
        }
        writer.flush().context("failed to flush events file")?;
        Ok(())
    }

    /// Read all events from a JSONL file; an empty log if the file does not
    /// exist.
    pub fn read_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let file = File::open(path)
            .with_context(|| format!("failed to open events file {}", path.display()))?;
        let reader = BufReader::new(file);

        let mut events = Vec::new();
        for line in reader.lines() {
            let line = line.with_context(|| {
                format!("failed to read line from events file {}", path.display())
            })?;
            let event: ActivityEvent = serde_json::from_str(&line)
                .with_context(|| format!("failed to parse event JSON from line: {line}"))?;
            events.push(event);
        }
        Ok(Self { events })
    }

    pub fn all_events(&self) -> &[ActivityEvent] {
        &self.events
    }

    /// Events matching `server`, for `ServersChanged`/`OAuthLoggedOut`
    /// variants that carry a server name in `extra`/`server`.
    pub fn events_for_server(&self, server: &str) -> Vec<&ActivityEvent> {
        self.events
            .iter()
            .filter(|e| match &e.event_type {
                EventType::OAuthLoggedOut { server: s } => s == server,
                EventType::ServersChanged { extra, .. } => {
                    extra.get("server").map(|s| s == server).unwrap_or(false)
                }
                EventType::CacheCleanup { .. } => false,
            })
            .collect()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    #[test]
    fn new_event_log_is_empty() {
        let log = EventLog::new();
        assert!(log.is_empty());
    }

    #[test]
    fn record_adds_event_to_log() {
        let mut log = EventLog::new();
        log.record(EventType::ServersChanged {
            reason: "enable_all".to_string(),
            extra: BTreeMap::new(),
        });
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn events_for_server_filters_oauth_logout() {
        let mut log = EventLog::new();
        log.record(EventType::OAuthLoggedOut { server: "srv-1".to_string() });
        log.record(EventType::OAuthLoggedOut { server: "srv-2".to_string() });
        assert_eq!(log.events_for_server("srv-1").len(), 1);
    }

    #[test]
    fn write_then_read_round_trips_jsonl() {
        let td = tempdir().unwrap();
        let path = events_path(td.path());

        let mut log = EventLog::new();
        log.record(EventType::CacheCleanup { evicted: 3 });
        log.write_to_file(&path).unwrap();

        let loaded = EventLog::read_from_file(&path).unwrap();
        assert_eq!(loaded.len(), 1);
    }

    #[test]
    fn write_to_file_appends_across_calls() {
        let td = tempdir().unwrap();
        let path = td.path().join("events.jsonl");

        let mut log1 = EventLog::new();
        log1.record(EventType::CacheCleanup { evicted: 1 });
        log1.write_to_file(&path).unwrap();

        let mut log2 = EventLog::new();
        log2.record(EventType::CacheCleanup { evicted: 2 });
        log2.write_to_file(&path).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[test]
    fn read_from_file_returns_empty_log_when_missing() {
        let td = tempdir().unwrap();
        let loaded = EventLog::read_from_file(&td.path().join("nope.jsonl")).unwrap();
        assert!(loaded.is_empty());
    }
}
