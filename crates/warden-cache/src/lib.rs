//! Durable key-to-record pagination cache.
//!
//! Stores one [`Record`](warden_types::Record) per key in a single `redb`
//! table, keyed by a SHA-256 digest of its canonical inputs, and serves
//! bounded windows of an array nested inside the record's JSON content
//! through the `record_path` grammar (`foo`, `[n]`, `(parsed)`).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use redb::{Database, ReadableTable, TableDefinition};
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;
use warden_types::{CacheStats, PathSegment, ReadCacheResponse, ReadMeta, Record};

const RECORDS_TABLE: TableDefinition<&str, &str> = TableDefinition::new("records");
const STATS_KEY: &str = "__stats__";
const STATS_TABLE: TableDefinition<&str, &str> = TableDefinition::new("stats");

/// Page size used when `limit <= 0` is requested.
pub const DEFAULT_PAGE_LIMIT: usize = 10;
/// Hard ceiling a caller's `limit` is clamped to.
pub const MAX_PAGE_LIMIT: usize = 50;
/// Lifetime of a freshly stored record absent any other policy.
pub const DEFAULT_TTL: Duration = Duration::hours(24);
/// Interval the background sweep runs at.
pub const CLEANUP_INTERVAL: StdDuration = StdDuration::from_secs(3600);
/// Bound on `(parsed)` re-entries per `record_path`, preventing a
/// pathological path from exhausting the stack.
pub const MAX_PARSE_DEPTH: usize = 64;

/// The cache's error taxonomy. Only [`CacheError::Io`] is meaningfully
/// retryable; every other variant is a definitive outcome for the call that
/// produced it.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("record not found")]
    NotFound,
    #[error("record expired")]
    Expired,
    #[error("bad record path: {0}")]
    BadPath(String),
    #[error("bad JSON at record path: {0}")]
    BadJson(String),
    #[error("cache I/O error: {0}")]
    Io(String),
}

impl From<redb::DatabaseError> for CacheError {
    fn from(e: redb::DatabaseError) -> Self {
        CacheError::Io(e.to_string())
    }
}
impl From<redb::TransactionError> for CacheError {
    fn from(e: redb::TransactionError) -> Self {
        CacheError::Io(e.to_string())
    }
}
impl From<redb::TableError> for CacheError {
    fn from(e: redb::TableError) -> Self {
        CacheError::Io(e.to_string())
    }
}
impl From<redb::StorageError> for CacheError {
    fn from(e: redb::StorageError) -> Self {
        CacheError::Io(e.to_string())
    }
}
impl From<redb::CommitError> for CacheError {
    fn from(e: redb::CommitError) -> Self {
        CacheError::Io(e.to_string())
    }
}

/// `generate_key(tool_name, args, timestamp)` = SHA-256 hex of
/// `tool_name || canonical_json(args) || rfc3339(timestamp)`, where
/// `canonical_json` orders keys lexicographically (guaranteed by
/// `BTreeMap`'s iteration order) and emits stable numeric forms (delegated
/// to `serde_json`, which renders JSON numbers losslessly from the input
/// `Value`). Same inputs always produce the same 64-hex-char key.
pub fn generate_key(
    tool_name: &str,
    args: &BTreeMap<String, Value>,
    timestamp: DateTime<Utc>,
) -> String {
    let canonical = serde_json::to_string(args).expect("BTreeMap<String, Value> always serializes");
    let mut hasher = Sha256::new();
    hasher.update(tool_name.as_bytes());
    hasher.update(canonical.as_bytes());
    hasher.update(timestamp.to_rfc3339().as_bytes());
    hex::encode(hasher.finalize())
}

/// Tokenize a `record_path` into its grammar: `foo` (object descent),
/// `[n]` (array index), `(parsed)` (reinterpret the current string as
/// JSON). Segments are joined by `.`, except `[n]`/`(parsed)` may abut the
/// preceding segment directly.
pub fn parse_record_path(path: &str) -> Result<Vec<PathSegment>, CacheError> {
    let mut segments = Vec::new();
    let bytes = path.as_bytes();
    let n = bytes.len();
    let mut i = 0;
    while i < n {
        match bytes[i] {
            b'.' => {
                i += 1;
            }
            b'[' => {
                let close = path[i..]
                    .find(']')
                    .map(|p| p + i)
                    .ok_or_else(|| CacheError::BadPath(path.to_string()))?;
                let idx: usize = path[i + 1..close]
                    .parse()
                    .map_err(|_| CacheError::BadPath(path.to_string()))?;
                segments.push(PathSegment::Array { index: idx });
                i = close + 1;
            }
            b'(' => {
                if path[i..].starts_with("(parsed)") {
                    segments.push(PathSegment::Parsed);
                    i += "(parsed)".len();
                } else {
                    return Err(CacheError::BadPath(path.to_string()));
                }
            }
            _ => {
                let start = i;
                while i < n && !matches!(bytes[i], b'.' | b'[' | b'(') {
                    i += 1;
                }
                if i == start {
                    return Err(CacheError::BadPath(path.to_string()));
                }
                segments.push(PathSegment::Object {
                    key: path[start..i].to_string(),
                });
            }
        }
    }
    Ok(segments)
}

/// Walk `value` along `segments`, bounding `(parsed)` re-entry depth.
/// An empty segment list returns the root value unchanged.
pub fn resolve_path(value: &Value, segments: &[PathSegment]) -> Result<Value, CacheError> {
    let mut current = value.clone();
    let mut parsed_depth = 0usize;
    for segment in segments {
        current = match segment {
            PathSegment::Object { key } => current
                .get(key)
                .cloned()
                .ok_or_else(|| CacheError::BadPath(format!("no key `{key}`")))?,
            PathSegment::Array { index } => current
                .get(*index)
                .cloned()
                .ok_or_else(|| CacheError::BadPath(format!("no index [{index}]")))?,
            PathSegment::Parsed => {
                parsed_depth += 1;
                if parsed_depth > MAX_PARSE_DEPTH {
                    return Err(CacheError::BadPath("(parsed) recursion too deep".into()));
                }
                let s = current
                    .as_str()
                    .ok_or_else(|| CacheError::BadPath("(parsed) on a non-string value".into()))?;
                serde_json::from_str(s).map_err(|e| CacheError::BadJson(e.to_string()))?
            }
        };
    }
    Ok(current)
}

/// Durable key-to-record pagination cache, backed by an embedded `redb`
/// table. One write transaction at a time; reads run concurrently with
/// other reads.
pub struct Cache {
    db: Database,
    stats: Mutex<CacheStats>,
    default_ttl: Duration,
}

impl Cache {
    /// Open (creating if absent) a cache database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CacheError> {
        Self::open_with_ttl(path, DEFAULT_TTL)
    }

    pub fn open_with_ttl(path: impl AsRef<Path>, default_ttl: Duration) -> Result<Self, CacheError> {
        let db = Database::create(path.as_ref())?;
        let write_txn = db.begin_write()?;
        {
            write_txn.open_table(RECORDS_TABLE)?;
            write_txn.open_table(STATS_TABLE)?;
        }
        write_txn.commit()?;

        let stats = Self::load_stats(&db).unwrap_or_default();

        Ok(Self {
            db,
            stats: Mutex::new(stats),
            default_ttl,
        })
    }

    fn load_stats(db: &Database) -> Option<CacheStats> {
        let read_txn = db.begin_read().ok()?;
        let table = read_txn.open_table(STATS_TABLE).ok()?;
        let value = table.get(STATS_KEY).ok()??;
        serde_json::from_str(value.value()).ok()
    }

    fn persist_stats_locked(&self, stats: &CacheStats) -> Result<(), CacheError> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(STATS_TABLE)?;
            let json = serde_json::to_string(stats).expect("CacheStats always serializes");
            table.insert(STATS_KEY, json.as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Store a new record, or overwrite an existing one at the same key.
    /// Overwrite does not increment `evicted_count` (only the sweep does).
    pub fn store(
        &self,
        key: &str,
        tool_name: &str,
        args: BTreeMap<String, Value>,
        content: String,
        record_path: String,
        total_records: usize,
    ) -> Result<(), CacheError> {
        let now = Utc::now();
        let record = Record {
            key: key.to_string(),
            tool_name: tool_name.to_string(),
            args,
            timestamp: now,
            total_size: content.len(),
            full_content: content,
            record_path,
            total_records,
            expires_at: now + self.default_ttl,
            created_at: now,
            last_accessed: now,
            access_count: 0,
        };

        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(RECORDS_TABLE)?;
            let json = serde_json::to_string(&record).expect("Record always serializes");
            table.insert(key, json.as_str())?;
        }
        write_txn.commit()?;

        let mut stats = self.stats.lock().expect("cache stats lock poisoned");
        stats.total_entries += 1;
        stats.total_size_bytes += record.total_size as u64;
        tracing::debug!(key, tool_name, "stored record");
        Ok(())
    }

    /// Fetch a record by key, bumping its access accounting on success.
    /// `ErrNotFound` when absent, `ErrExpired` when past `expires_at`.
    pub fn get(&self, key: &str) -> Result<Record, CacheError> {
        let mut record = self.read_record(key)?;

        let now = Utc::now();
        if record.expires_at <= now {
            let mut stats = self.stats.lock().expect("cache stats lock poisoned");
            stats.miss_count += 1;
            return Err(CacheError::Expired);
        }

        record.access_count += 1;
        record.last_accessed = now;
        self.write_record(key, &record)?;

        let mut stats = self.stats.lock().expect("cache stats lock poisoned");
        stats.hit_count += 1;
        Ok(record)
    }

    fn read_record(&self, key: &str) -> Result<Record, CacheError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(RECORDS_TABLE)?;
        match table.get(key)? {
            Some(value) => serde_json::from_str(value.value())
                .map_err(|e| CacheError::Io(format!("corrupt record: {e}"))),
            None => {
                let mut stats = self.stats.lock().expect("cache stats lock poisoned");
                stats.miss_count += 1;
                Err(CacheError::NotFound)
            }
        }
    }

    fn write_record(&self, key: &str, record: &Record) -> Result<(), CacheError> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(RECORDS_TABLE)?;
            let json = serde_json::to_string(record).expect("Record always serializes");
            table.insert(key, json.as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Windowed read through the `record_path` grammar. Does not mutate
    /// access counters — `GetRecords` is a read-only operation by design;
    /// `Get` remains the accounting entry point for hits.
    pub fn get_records(
        &self,
        key: &str,
        offset: usize,
        limit: usize,
    ) -> Result<ReadCacheResponse, CacheError> {
        let record = self.read_record(key)?;
        if record.expires_at <= Utc::now() {
            return Err(CacheError::Expired);
        }

        let root: Value = serde_json::from_str(&record.full_content)
            .map_err(|e| CacheError::BadJson(e.to_string()))?;
        let segments = parse_record_path(&record.record_path)?;
        let target = resolve_path(&root, &segments)?;

        let array = target
            .as_array()
            .ok_or_else(|| CacheError::BadPath("record_path does not resolve to an array".into()))?;

        let total_records = array.len();
        let limit = if limit == 0 || limit > MAX_PAGE_LIMIT {
            if limit == 0 { DEFAULT_PAGE_LIMIT } else { MAX_PAGE_LIMIT }
        } else {
            limit
        };

        let window = if offset >= total_records {
            Vec::new()
        } else {
            let end = (offset + limit).min(total_records);
            array[offset..end].to_vec()
        };

        Ok(ReadCacheResponse {
            records: window,
            meta: ReadMeta {
                key: key.to_string(),
                total_records,
                limit,
                offset,
                total_size: record.total_size,
                record_path: if record.record_path.is_empty() {
                    None
                } else {
                    Some(record.record_path.clone())
                },
            },
        })
    }

    /// Walk every key, unmarshal, and delete entries past `expires_at`.
    /// Returns the number of entries evicted.
    pub fn cleanup(&self) -> Result<u64, CacheError> {
        let now = Utc::now();
        let mut expired_keys = Vec::new();

        {
            let read_txn = self.db.begin_read()?;
            let table = read_txn.open_table(RECORDS_TABLE)?;
            for item in table.iter()? {
                let (k, v) = item?;
                if let Ok(record) = serde_json::from_str::<Record>(v.value()) {
                    if record.expires_at <= now {
                        expired_keys.push(k.value().to_string());
                    }
                }
            }
        }

        if !expired_keys.is_empty() {
            let write_txn = self.db.begin_write()?;
            {
                let mut table = write_txn.open_table(RECORDS_TABLE)?;
                for key in &expired_keys {
                    table.remove(key.as_str())?;
                }
            }
            write_txn.commit()?;
        }

        let evicted = expired_keys.len() as u64;
        let mut stats = self.stats.lock().expect("cache stats lock poisoned");
        stats.evicted_count += evicted;
        stats.cleanup_count += 1;
        stats.total_entries = stats.total_entries.saturating_sub(evicted);
        let snapshot = *stats;
        drop(stats);
        if let Err(e) = self.persist_stats_locked(&snapshot) {
            tracing::warn!(error = %e, "failed to persist cache stats after cleanup");
        }
        tracing::info!(evicted, "cache cleanup swept expired records");
        Ok(evicted)
    }

    /// Current process-wide counters.
    pub fn stats_snapshot(&self) -> CacheStats {
        *self.stats.lock().expect("cache stats lock poisoned")
    }
}

impl Drop for Cache {
    fn drop(&mut self) {
        let snapshot = self.stats_snapshot();
        if let Err(e) = self.persist_stats_locked(&snapshot) {
            tracing::warn!(error = %e, "failed to flush cache stats on drop");
        }
    }
}

/// Spawn the background cleanup task on the given runtime handle. The
/// returned handle can be awaited; cancellation is checked at each tick via
/// `cancel`.
pub fn spawn_cleanup_task(
    cache: std::sync::Arc<Cache>,
    interval: StdDuration,
    cancel: std::sync::Arc<tokio::sync::Notify>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = cache.cleanup() {
                        tracing::warn!(error = %e, "cache cleanup tick failed");
                    }
                }
                _ = cancel.notified() => {
                    tracing::info!("cache cleanup task cancelled");
                    break;
                }
            }
        }
    })
}

/// Location a cache database file would live at, given a base directory.
pub fn default_db_path(base_dir: &Path) -> PathBuf {
    base_dir.join("records.redb")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn fresh_cache() -> Cache {
        let dir = tempdir().unwrap();
        Cache::open(dir.path().join("test.redb")).unwrap()
    }

    #[test]
    fn generate_key_is_deterministic_and_64_hex_chars() {
        let mut args = BTreeMap::new();
        args.insert("a".to_string(), Value::from(1));
        let ts = Utc::now();
        let k1 = generate_key("tool", &args, ts);
        let k2 = generate_key("tool", &args, ts);
        assert_eq!(k1, k2);
        assert_eq!(k1.len(), 64);
        assert!(k1.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn generate_key_differs_on_different_args() {
        let ts = Utc::now();
        let mut a1 = BTreeMap::new();
        a1.insert("a".to_string(), Value::from(1));
        let mut a2 = BTreeMap::new();
        a2.insert("a".to_string(), Value::from(2));
        assert_ne!(generate_key("tool", &a1, ts), generate_key("tool", &a2, ts));
    }

    #[test]
    fn store_then_get_round_trips_and_bumps_access_count() {
        let cache = fresh_cache();
        let content = r#"["a","b","c"]"#.to_string();
        let key = generate_key("tool", &BTreeMap::new(), Utc::now());
        cache
            .store(&key, "tool", BTreeMap::new(), content.clone(), String::new(), 3)
            .unwrap();

        let record = cache.get(&key).unwrap();
        assert_eq!(record.full_content, content);
        assert_eq!(record.total_size, content.len());
        assert_eq!(record.access_count, 1);
    }

    #[test]
    fn get_records_offset_beyond_length_yields_empty_not_error() {
        let cache = fresh_cache();
        let content = r#"[1,2,3]"#.to_string();
        let key = "k".to_string();
        cache
            .store(&key, "tool", BTreeMap::new(), content, String::new(), 3)
            .unwrap();

        let page = cache.get_records(&key, 10, 2).unwrap();
        assert!(page.records.is_empty());
        assert_eq!(page.meta.total_records, 3);
    }

    #[test]
    fn pagination_through_a_parsed_nested_path() {
        let cache = fresh_cache();
        let content = r#"[{"type":"text","text":"{\"totalDataChart\":[[1633132800,3],[1633219200,5],[1633305600,10],[1633392000,100]]}"}]"#.to_string();
        let key = "k1".to_string();
        cache
            .store(
                &key,
                "tool",
                BTreeMap::new(),
                content,
                "[0].text(parsed).totalDataChart".to_string(),
                4,
            )
            .unwrap();

        let page1 = cache.get_records(&key, 0, 2).unwrap();
        assert_eq!(page1.meta.total_records, 4);
        assert_eq!(page1.meta.offset, 0);
        assert_eq!(page1.meta.limit, 2);
        assert_eq!(page1.records, vec![
            serde_json::json!([1633132800, 3]),
            serde_json::json!([1633219200, 5]),
        ]);

        let page2 = cache.get_records(&key, 2, 2).unwrap();
        assert_eq!(page2.records, vec![
            serde_json::json!([1633305600, 10]),
            serde_json::json!([1633392000, 100]),
        ]);

        let page3 = cache.get_records(&key, 10, 2).unwrap();
        assert!(page3.records.is_empty());
    }

    #[test]
    fn cleanup_sweeps_expired_records_and_updates_stats() {
        let cache = fresh_cache();
        for i in 0..3 {
            let key = format!("k{i}");
            cache
                .store(&key, "tool", BTreeMap::new(), "[1]".to_string(), String::new(), 1)
                .unwrap();
        }

        // Force two of the three records to already be expired.
        for i in 0..2 {
            let key = format!("k{i}");
            let mut record = cache.read_record(&key).unwrap();
            record.expires_at = Utc::now() - Duration::hours(1);
            cache.write_record(&key, &record).unwrap();
        }

        let evicted = cache.cleanup().unwrap();
        assert_eq!(evicted, 2);
        let stats = cache.stats_snapshot();
        assert_eq!(stats.evicted_count, 2);
        assert_eq!(stats.cleanup_count, 1);

        assert!(matches!(cache.get("k0"), Err(CacheError::Expired)));
        assert!(cache.get("k2").is_ok());
        assert_eq!(cache.stats_snapshot().miss_count, 1);
    }

    #[test]
    fn parse_record_path_handles_abutted_segments() {
        let segments = parse_record_path("[0].text(parsed).totalDataChart").unwrap();
        assert_eq!(
            segments,
            vec![
                PathSegment::Array { index: 0 },
                PathSegment::Object { key: "text".to_string() },
                PathSegment::Parsed,
                PathSegment::Object { key: "totalDataChart".to_string() },
            ]
        );
    }

    #[test]
    fn parse_record_path_rejects_unclosed_bracket() {
        assert!(parse_record_path("[0").is_err());
    }

    #[test]
    fn resolve_path_on_non_string_parsed_is_bad_path() {
        let value = serde_json::json!({"n": 5});
        let segments = vec![
            PathSegment::Object { key: "n".to_string() },
            PathSegment::Parsed,
        ];
        assert!(matches!(resolve_path(&value, &segments), Err(CacheError::BadPath(_))));
    }
}
