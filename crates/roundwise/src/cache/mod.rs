//! Durable round cache with versioned migration and corruption tolerance.
//!
//! Each round owns one entry, keyed `round-NNN`, holding the hash it was
//! computed under and the result it produced. [`RoundCache::get`] returns a
//! hit only when the entry's schema version is current and its hash equals
//! the expected one; everything else is a miss.
//!
//! # Keys
//!
//! [`round_hash`] derives a round's cache key from its id, the model, the
//! project [`Fingerprint`] and the [`result_hash`] of each direct
//! dependency. Because dependency result hashes feed into the key, a change
//! anywhere upstream invalidates every downstream round.
//!
//! # Failure semantics
//!
//! | Condition | Outcome |
//! |-----------|---------|
//! | No entry, hash mismatch | miss |
//! | Unreadable or unparseable entry | miss, `warn!`, corruption counter |
//! | Stale schema version | miss, one whole-cache wipe per instance |
//! | Write failure | [`Error::CacheWrite`], fatal to the run |

pub mod store;

pub use store::{CacheStore, FsStore, MemoryStore, StoreFuture};

use crate::error::{Error, Result};
use crate::fingerprint::Fingerprint;
use crate::rounds::{RoundId, RoundResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, info, warn};

/// Version of the persisted entry layout and of the prompts and schemas that
/// produced the stored results. Bump when either changes.
pub const SCHEMA_VERSION: u32 = 1;

/// Store key for a round's entry.
pub fn entry_key(round: RoundId) -> String {
    format!("round-{round:03}")
}

fn parse_entry_key(key: &str) -> Option<RoundId> {
    key.strip_prefix("round-")?.parse().ok()
}

/// One persisted round result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundCacheEntry {
    pub schema_version: u32,
    pub hash: String,
    pub round_id: RoundId,
    pub model: String,
    pub result: RoundResult,
    pub created_at: DateTime<Utc>,
}

/// Just enough of an entry to decide whether it belongs to this version.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EntryHeader {
    schema_version: u32,
}

/// Snapshot of cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Entries that could not be read or parsed. Each one also counts as a
    /// miss.
    pub corrupt: u64,
    /// Whole-cache wipes caused by a schema version change.
    pub migrations: u64,
}

impl CacheStats {
    /// Fraction of lookups that hit, in `[0.0, 1.0]`.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Round result cache over a [`CacheStore`].
///
/// The migration flag lives on the instance, so independent caches (for
/// example one per test) never affect each other.
#[derive(Debug)]
pub struct RoundCache<S> {
    store: S,
    schema_version: u32,
    migration_checked: AtomicBool,
    hits: AtomicU64,
    misses: AtomicU64,
    corrupt: AtomicU64,
    migrations: AtomicU64,
}

impl<S: CacheStore> RoundCache<S> {
    pub fn new(store: S) -> Self {
        Self::with_schema_version(store, SCHEMA_VERSION)
    }

    /// Create a cache that treats `version` as current.
    pub fn with_schema_version(store: S, version: u32) -> Self {
        Self {
            store,
            schema_version: version,
            migration_checked: AtomicBool::new(false),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            corrupt: AtomicU64::new(0),
            migrations: AtomicU64::new(0),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    /// Look up `round`, returning its result only if the stored entry is
    /// current and was computed under `expected_hash`.
    pub async fn get(&self, round: RoundId, expected_hash: &str) -> Option<RoundResult> {
        let found = self.lookup(round, expected_hash).await;
        let counter = if found.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    async fn lookup(&self, round: RoundId, expected_hash: &str) -> Option<RoundResult> {
        let key = entry_key(round);
        let bytes = match self.store.read(&key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                debug!("Round {round}: no cache entry");
                return None;
            }
            Err(e) => {
                self.record_corrupt(&key, &e.to_string());
                return None;
            }
        };

        let header: EntryHeader = match serde_json::from_slice(&bytes) {
            Ok(header) => header,
            Err(e) => {
                self.record_corrupt(&key, &e.to_string());
                return None;
            }
        };
        if header.schema_version != self.schema_version {
            self.migrate(header.schema_version).await;
            return None;
        }

        let entry: RoundCacheEntry = match serde_json::from_slice(&bytes) {
            Ok(entry) => entry,
            Err(e) => {
                self.record_corrupt(&key, &e.to_string());
                return None;
            }
        };
        if entry.round_id != round {
            self.record_corrupt(&key, &format!("entry belongs to round {}", entry.round_id));
            return None;
        }
        if entry.hash != expected_hash {
            debug!("Round {round}: inputs changed, cached entry is stale");
            return None;
        }

        debug!("Round {round}: cache hit");
        Some(entry.result)
    }

    /// Wipe the whole cache, at most once per instance.
    async fn migrate(&self, found: u32) {
        if self.migration_checked.swap(true, Ordering::SeqCst) {
            debug!("Ignoring entry with schema version {found}; migration already handled");
            return;
        }
        info!(
            "Round cache schema changed (v{found} -> v{}); clearing cached results",
            self.schema_version
        );
        self.migrations.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = self.store.clear().await {
            warn!("Failed to clear round cache during migration: {e}");
        }
    }

    fn record_corrupt(&self, key: &str, detail: &str) {
        self.corrupt.fetch_add(1, Ordering::Relaxed);
        warn!("Ignoring unreadable cache entry {key}: {detail}");
    }

    /// Scan every stored entry and run the migration wipe up front if any
    /// entry is from another schema version.
    ///
    /// Shares the one-time flag with [`get`](Self::get): after this call,
    /// lookups never wipe, so results written later in the run are safe.
    pub async fn ensure_schema_current(&self) {
        if self.migration_checked.load(Ordering::SeqCst) {
            return;
        }
        let keys = match self.store.list().await {
            Ok(keys) => keys,
            Err(e) => {
                warn!("Could not list round cache: {e}");
                return;
            }
        };

        for key in keys {
            let Ok(Some(bytes)) = self.store.read(&key).await else {
                continue;
            };
            if let Ok(header) = serde_json::from_slice::<EntryHeader>(&bytes)
                && header.schema_version != self.schema_version
            {
                self.migrate(header.schema_version).await;
                return;
            }
        }
        self.migration_checked.store(true, Ordering::SeqCst);
    }

    /// Persist a freshly computed result.
    ///
    /// Failures are returned, never swallowed.
    pub async fn set(
        &self,
        round: RoundId,
        hash: &str,
        result: &RoundResult,
        model: &str,
    ) -> Result<()> {
        let entry = RoundCacheEntry {
            schema_version: self.schema_version,
            hash: hash.to_string(),
            round_id: round,
            model: model.to_string(),
            result: result.clone(),
            created_at: Utc::now(),
        };
        let bytes = serde_json::to_vec_pretty(&entry)
            .map_err(|source| Error::CacheSerialize { round, source })?;
        self.store
            .write(&entry_key(round), bytes)
            .await
            .map_err(|source| Error::CacheWrite { round, source })?;
        debug!("Round {round}: cached under {}", short_hash(hash));
        Ok(())
    }

    /// Delete every persisted entry.
    pub async fn clear(&self) -> Result<()> {
        self.store.clear().await.map_err(Error::CacheClear)
    }

    /// Ids of rounds with an entry on storage, sorted. Payloads are not read.
    pub async fn list_completed(&self) -> Result<Vec<RoundId>> {
        let keys = self.store.list().await.map_err(Error::CacheList)?;
        let mut ids: Vec<RoundId> = keys.iter().filter_map(|k| parse_entry_key(k)).collect();
        ids.sort_unstable();
        ids.dedup();
        Ok(ids)
    }

    /// Read a round's full entry without touching counters or migration
    /// state. `None` if absent or unreadable.
    pub async fn peek(&self, round: RoundId) -> Option<RoundCacheEntry> {
        let bytes = self.store.read(&entry_key(round)).await.ok()??;
        serde_json::from_slice(&bytes).ok()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            corrupt: self.corrupt.load(Ordering::Relaxed),
            migrations: self.migrations.load(Ordering::Relaxed),
        }
    }

    pub fn hit_rate(&self) -> f64 {
        self.stats().hit_rate()
    }
}

// ── Key derivation ─────────────────────────────────────────────────

/// Cache key for one round.
///
/// Pure over its inputs. `dependency_hashes` are sorted before digesting, so
/// declaration order never matters.
pub fn round_hash(
    round: RoundId,
    model: &str,
    fingerprint: &Fingerprint,
    dependency_hashes: &[String],
) -> String {
    let mut deps: Vec<&str> = dependency_hashes.iter().map(String::as_str).collect();
    deps.sort_unstable();

    let mut hasher = Sha256::new();
    hasher.update(format!("round:{round}\n"));
    hasher.update(format!("model:{model}\n"));
    hasher.update(format!("fingerprint:{fingerprint}\n"));
    for dep in deps {
        hasher.update(format!("dep:{dep}\n"));
    }
    hex::encode(hasher.finalize())
}

/// Digest of a result's payload. Usage and timing are excluded so an
/// identical payload always yields the same hash.
pub fn result_hash(result: &RoundResult) -> String {
    let mut hasher = Sha256::new();
    hasher.update(result.data.to_string());
    hex::encode(hasher.finalize())
}

fn short_hash(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::{FileRecord, fingerprint};
    use crate::rounds::TokenUsage;
    use serde_json::json;
    use std::sync::Arc;

    fn result(data: serde_json::Value) -> RoundResult {
        RoundResult {
            data,
            usage: TokenUsage::new(100, 20),
            model: "model-x".into(),
            duration_ms: 1200,
        }
    }

    fn fp(hash: &str) -> Fingerprint {
        fingerprint(&[FileRecord::new("src/lib.rs", hash, 1)])
    }

    #[tokio::test]
    async fn set_then_get_hits() {
        let cache = RoundCache::new(MemoryStore::new());
        let r = result(json!({"summary": "ok"}));
        cache.set(1, "abc", &r, "model-x").await.unwrap();

        assert_eq!(cache.get(1, "abc").await, Some(r));
        assert_eq!(cache.stats().hits, 1);
    }

    #[tokio::test]
    async fn hash_mismatch_is_a_miss() {
        let cache = RoundCache::new(MemoryStore::new());
        cache.set(1, "abc", &result(json!(1)), "m").await.unwrap();

        assert!(cache.get(1, "def").await.is_none());
        assert!(cache.get(2, "abc").await.is_none());
        let stats = cache.stats();
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.corrupt, 0);
    }

    #[tokio::test]
    async fn corrupt_entry_is_a_counted_miss() {
        let store = MemoryStore::new();
        store.write("round-001", b"{not json".to_vec()).await.unwrap();
        let cache = RoundCache::new(store);

        assert!(cache.get(1, "abc").await.is_none());
        let stats = cache.stats();
        assert_eq!(stats.corrupt, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.migrations, 0);
    }

    #[tokio::test]
    async fn truncated_entry_is_a_miss() {
        let cache = RoundCache::new(MemoryStore::new());
        cache.set(1, "abc", &result(json!({"a": 1})), "m").await.unwrap();
        let bytes = cache.store().read("round-001").await.unwrap().unwrap();
        let half = bytes[..bytes.len() / 2].to_vec();
        cache.store().write("round-001", half).await.unwrap();

        assert!(cache.get(1, "abc").await.is_none());
        assert_eq!(cache.stats().corrupt, 1);
    }

    #[tokio::test]
    async fn entry_under_wrong_key_is_corrupt() {
        let cache = RoundCache::new(MemoryStore::new());
        cache.set(2, "abc", &result(json!(1)), "m").await.unwrap();
        let bytes = cache.store().read("round-002").await.unwrap().unwrap();
        cache.store().write("round-001", bytes).await.unwrap();

        assert!(cache.get(1, "abc").await.is_none());
        assert_eq!(cache.stats().corrupt, 1);
    }

    #[tokio::test]
    async fn version_change_wipes_exactly_once() {
        let store = Arc::new(MemoryStore::new());
        let old = RoundCache::with_schema_version(Arc::clone(&store), 1);
        old.set(1, "a", &result(json!(1)), "m").await.unwrap();
        old.set(2, "b", &result(json!(2)), "m").await.unwrap();

        let cache = RoundCache::with_schema_version(Arc::clone(&store), 2);
        assert!(cache.get(1, "a").await.is_none());
        assert_eq!(cache.stats().migrations, 1);
        assert!(store.is_empty());

        // A stale entry appearing later (another writer) is ignored, not wiped.
        old.set(3, "c", &result(json!(3)), "m").await.unwrap();
        assert!(cache.get(3, "c").await.is_none());
        assert_eq!(cache.stats().migrations, 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn separate_instances_migrate_independently() {
        let store = Arc::new(MemoryStore::new());
        let old = RoundCache::with_schema_version(Arc::clone(&store), 1);
        let first = RoundCache::with_schema_version(Arc::clone(&store), 2);
        let second = RoundCache::with_schema_version(Arc::clone(&store), 2);

        old.set(1, "a", &result(json!(1)), "m").await.unwrap();
        first.get(1, "a").await;
        old.set(1, "a", &result(json!(1)), "m").await.unwrap();
        second.get(1, "a").await;

        assert_eq!(first.stats().migrations, 1);
        assert_eq!(second.stats().migrations, 1);
    }

    #[tokio::test]
    async fn ensure_schema_current_migrates_before_lookups() {
        let store = Arc::new(MemoryStore::new());
        RoundCache::with_schema_version(Arc::clone(&store), 1)
            .set(4, "a", &result(json!(1)), "m")
            .await
            .unwrap();

        let cache = RoundCache::with_schema_version(Arc::clone(&store), 2);
        cache.ensure_schema_current().await;
        assert!(store.is_empty());
        assert_eq!(cache.stats().migrations, 1);

        cache.ensure_schema_current().await;
        assert_eq!(cache.stats().migrations, 1);
    }

    #[tokio::test]
    async fn ensure_schema_current_keeps_current_entries() {
        let cache = RoundCache::new(MemoryStore::new());
        cache.set(1, "a", &result(json!(1)), "m").await.unwrap();
        cache.ensure_schema_current().await;

        assert_eq!(cache.stats().migrations, 0);
        assert!(cache.get(1, "a").await.is_some());
    }

    #[tokio::test]
    async fn list_completed_is_sorted() {
        let cache = RoundCache::new(MemoryStore::new());
        for id in [6, 1, 4] {
            cache.set(id, "h", &result(json!(id)), "m").await.unwrap();
        }
        cache.store().write("notes", b"x".to_vec()).await.unwrap();
        assert_eq!(cache.list_completed().await.unwrap(), vec![1, 4, 6]);
    }

    #[tokio::test]
    async fn clear_removes_everything() {
        let cache = RoundCache::new(MemoryStore::new());
        cache.set(1, "h", &result(json!(1)), "m").await.unwrap();
        cache.clear().await.unwrap();
        assert!(cache.list_completed().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn persisted_entry_layout() {
        let cache = RoundCache::new(MemoryStore::new());
        cache.set(3, "h3", &result(json!({"k": "v"})), "model-x").await.unwrap();

        let bytes = cache.store().read("round-003").await.unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["schemaVersion"], SCHEMA_VERSION);
        assert_eq!(value["hash"], "h3");
        assert_eq!(value["roundId"], 3);
        assert_eq!(value["model"], "model-x");
        assert_eq!(value["result"]["data"]["k"], "v");
        let created = value["createdAt"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(created).is_ok());

        let entry = cache.peek(3).await.unwrap();
        assert_eq!(entry.round_id, 3);
        assert_eq!(cache.stats(), CacheStats::default());
    }

    #[tokio::test]
    async fn fs_backed_cache_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = RoundCache::new(FsStore::new(dir.path()));
        let r = result(json!({"summary": "disk"}));
        cache.set(1, "abc", &r, "m").await.unwrap();

        let reopened = RoundCache::new(FsStore::new(dir.path()));
        assert_eq!(reopened.get(1, "abc").await, Some(r));
        assert_eq!(reopened.list_completed().await.unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn write_failure_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "file, not a directory").unwrap();
        let cache = RoundCache::new(FsStore::new(blocker.join("rounds")));

        let err = cache.set(1, "h", &result(json!(1)), "m").await.unwrap_err();
        assert!(matches!(err, Error::CacheWrite { round: 1, .. }));
    }

    #[test]
    fn round_hash_ignores_dependency_order() {
        let f = fp("h1");
        let a = round_hash(4, "m", &f, &["x".into(), "y".into()]);
        let b = round_hash(4, "m", &f, &["y".into(), "x".into()]);
        assert_eq!(a, b);
    }

    #[test]
    fn round_hash_covers_every_input() {
        let f = fp("h1");
        let base = round_hash(2, "m", &f, &["x".into()]);
        assert_eq!(base, round_hash(2, "m", &f, &["x".into()]));
        assert_ne!(base, round_hash(3, "m", &f, &["x".into()]));
        assert_ne!(base, round_hash(2, "other", &f, &["x".into()]));
        assert_ne!(base, round_hash(2, "m", &fp("h2"), &["x".into()]));
        assert_ne!(base, round_hash(2, "m", &f, &["z".into()]));
        assert_ne!(base, round_hash(2, "m", &f, &[]));
    }

    #[test]
    fn result_hash_ignores_usage_and_timing() {
        let a = result(json!({"a": 1, "b": [1, 2]}));
        let mut b = a.clone();
        b.usage = TokenUsage::new(1, 1);
        b.duration_ms = 5;
        assert_eq!(result_hash(&a), result_hash(&b));

        let c = result(json!({"a": 2, "b": [1, 2]}));
        assert_ne!(result_hash(&a), result_hash(&c));
    }

    #[test]
    fn hit_rate_handles_zero_lookups() {
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
        let stats = CacheStats {
            hits: 3,
            misses: 1,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.75).abs() < f64::EPSILON);
    }
}
