//! Key-value backing stores for the [`RoundCache`](super::RoundCache).
//!
//! [`CacheStore`] is the narrow interface the cache needs: read, write,
//! clear and list opaque byte blobs by key. [`FsStore`] keeps one JSON file
//! per key on disk for production use; [`MemoryStore`] keeps everything in a
//! map for tests.
//!
//! Filesystem layout:
//! ```text
//! <project>/.roundwise/rounds/
//!   round-001.json
//!   round-004.json
//! ```

use std::collections::BTreeMap;
use std::future::Future;
use std::io;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, trace};

/// Boxed future returned by [`CacheStore`] operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = io::Result<T>> + Send + 'a>>;

/// Durable key-value storage for serialized cache entries.
///
/// Implementations must make [`write`](CacheStore::write) all-or-nothing: an
/// interrupted write leaves either the previous value or no value, never a
/// partial one.
pub trait CacheStore: Send + Sync {
    /// Read the value stored under `key`, or `None` if absent.
    fn read(&self, key: &str) -> StoreFuture<'_, Option<Vec<u8>>>;

    /// Store `bytes` under `key`, replacing any previous value.
    fn write(&self, key: &str, bytes: Vec<u8>) -> StoreFuture<'_, ()>;

    /// Remove every stored value.
    fn clear(&self) -> StoreFuture<'_, ()>;

    /// All keys currently stored, sorted.
    fn list(&self) -> StoreFuture<'_, Vec<String>>;
}

impl<T: CacheStore + ?Sized> CacheStore for std::sync::Arc<T> {
    fn read(&self, key: &str) -> StoreFuture<'_, Option<Vec<u8>>> {
        (**self).read(key)
    }

    fn write(&self, key: &str, bytes: Vec<u8>) -> StoreFuture<'_, ()> {
        (**self).write(key, bytes)
    }

    fn clear(&self) -> StoreFuture<'_, ()> {
        (**self).clear()
    }

    fn list(&self) -> StoreFuture<'_, Vec<String>> {
        (**self).list()
    }
}

// ── FsStore ────────────────────────────────────────────────────────

/// Name of the per-project working-state directory.
pub const STATE_DIR: &str = ".roundwise";

const ENTRY_SUFFIX: &str = ".json";

/// A rule to append to a `.gitignore` file.
#[derive(Debug, Clone)]
struct IgnoreRule {
    file: PathBuf,
    pattern: String,
}

/// One JSON file per key inside a directory.
///
/// Writes go to a temp file that is renamed into place. When created with
/// [`FsStore::for_project`], the first write also makes sure the state
/// directory is listed in the project's `.gitignore`. That check runs at
/// most once per store instance and its failures are only logged.
#[derive(Debug)]
pub struct FsStore {
    dir: PathBuf,
    ignore: Option<IgnoreRule>,
    ignore_checked: AtomicBool,
}

impl FsStore {
    /// Store entries directly in `dir`, without touching any `.gitignore`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ignore: None,
            ignore_checked: AtomicBool::new(false),
        }
    }

    /// Store entries in `<project_root>/.roundwise/rounds` and keep
    /// `.roundwise/` out of version control.
    pub fn for_project(project_root: &Path) -> Self {
        Self {
            dir: project_root.join(STATE_DIR).join("rounds"),
            ignore: Some(IgnoreRule {
                file: project_root.join(".gitignore"),
                pattern: format!("{STATE_DIR}/"),
            }),
            ignore_checked: AtomicBool::new(false),
        }
    }

    /// Override the entry directory while keeping the ignore rule.
    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = dir.into();
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}{ENTRY_SUFFIX}"))
    }

    fn temp_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!(".{key}{ENTRY_SUFFIX}.tmp"))
    }

    /// Best-effort, once per instance. The blocking read and append run on
    /// the blocking pool.
    async fn ensure_ignored(&self) {
        let Some(rule) = &self.ignore else { return };
        if self.ignore_checked.swap(true, Ordering::SeqCst) {
            return;
        }
        let IgnoreRule { file, pattern } = rule.clone();
        let result = tokio::task::spawn_blocking(move || append_ignore_rule(&file, &pattern))
            .await
            .unwrap_or_else(|e| Err(io::Error::other(e)));
        match result {
            Ok(true) => debug!("Added '{}' to {}", rule.pattern, rule.file.display()),
            Ok(false) => trace!("'{}' already ignored", rule.pattern),
            Err(e) => debug!(
                "Could not update {} (continuing): {e}",
                rule.file.display()
            ),
        }
    }
}

impl CacheStore for FsStore {
    fn read(&self, key: &str) -> StoreFuture<'_, Option<Vec<u8>>> {
        let path = self.entry_path(key);
        Box::pin(async move {
            match tokio::fs::read(&path).await {
                Ok(bytes) => Ok(Some(bytes)),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(e),
            }
        })
    }

    fn write(&self, key: &str, bytes: Vec<u8>) -> StoreFuture<'_, ()> {
        let final_path = self.entry_path(key);
        let tmp_path = self.temp_path(key);
        Box::pin(async move {
            tokio::fs::create_dir_all(&self.dir).await?;
            self.ensure_ignored().await;

            if let Err(e) = tokio::fs::write(&tmp_path, &bytes).await {
                let _ = tokio::fs::remove_file(&tmp_path).await;
                return Err(e);
            }
            if let Err(e) = tokio::fs::rename(&tmp_path, &final_path).await {
                let _ = tokio::fs::remove_file(&tmp_path).await;
                return Err(e);
            }
            Ok(())
        })
    }

    fn clear(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut entries = match tokio::fs::read_dir(&self.dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
                Err(e) => return Err(e),
            };
            let mut removed = 0usize;
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name().to_string_lossy().to_string();
                if name.ends_with(ENTRY_SUFFIX) || name.ends_with(".tmp") {
                    tokio::fs::remove_file(entry.path()).await?;
                    removed += 1;
                }
            }
            debug!("Removed {removed} files from {}", self.dir.display());
            Ok(())
        })
    }

    fn list(&self) -> StoreFuture<'_, Vec<String>> {
        Box::pin(async move {
            let mut entries = match tokio::fs::read_dir(&self.dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
                Err(e) => return Err(e),
            };
            let mut keys = Vec::new();
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name().to_string_lossy().to_string();
                if name.starts_with('.') {
                    continue;
                }
                if let Some(key) = name.strip_suffix(ENTRY_SUFFIX) {
                    keys.push(key.to_string());
                }
            }
            keys.sort();
            Ok(keys)
        })
    }
}

/// Append `pattern` to the ignore file unless an equivalent line exists.
///
/// Only touches projects that already use git (a `.gitignore` or `.git`
/// next to it). Returns whether the file was modified.
fn append_ignore_rule(file: &Path, pattern: &str) -> io::Result<bool> {
    let existing = match std::fs::read_to_string(file) {
        Ok(s) => s,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            let is_repo = file.parent().is_some_and(|p| p.join(".git").exists());
            if !is_repo {
                return Ok(false);
            }
            String::new()
        }
        Err(e) => return Err(e),
    };

    let bare = pattern.trim_end_matches('/');
    let already = existing.lines().map(str::trim).any(|line| {
        let line = line.trim_start_matches('/');
        line == pattern || line == bare
    });
    if already {
        return Ok(false);
    }

    let mut out = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(file)?;
    if !existing.is_empty() && !existing.ends_with('\n') {
        writeln!(out)?;
    }
    writeln!(out, "{pattern}")?;
    Ok(true)
}

// ── MemoryStore ────────────────────────────────────────────────────

/// In-memory store for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl CacheStore for MemoryStore {
    fn read(&self, key: &str) -> StoreFuture<'_, Option<Vec<u8>>> {
        let value = self.lock().get(key).cloned();
        Box::pin(async move { Ok(value) })
    }

    fn write(&self, key: &str, bytes: Vec<u8>) -> StoreFuture<'_, ()> {
        self.lock().insert(key.to_string(), bytes);
        Box::pin(async move { Ok(()) })
    }

    fn clear(&self) -> StoreFuture<'_, ()> {
        self.lock().clear();
        Box::pin(async move { Ok(()) })
    }

    fn list(&self) -> StoreFuture<'_, Vec<String>> {
        let keys = self.lock().keys().cloned().collect();
        Box::pin(async move { Ok(keys) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fs_store_write_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path().join("rounds"));

        assert!(store.read("round-001").await.unwrap().is_none());
        store.write("round-001", b"{}".to_vec()).await.unwrap();
        assert_eq!(store.read("round-001").await.unwrap(), Some(b"{}".to_vec()));
    }

    #[tokio::test]
    async fn fs_store_write_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());
        store.write("round-002", b"data".to_vec()).await.unwrap();

        assert!(!dir.path().join(".round-002.json.tmp").exists());
        assert!(dir.path().join("round-002.json").exists());
    }

    #[tokio::test]
    async fn fs_store_list_is_sorted_and_skips_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());
        store.write("round-003", b"c".to_vec()).await.unwrap();
        store.write("round-001", b"a".to_vec()).await.unwrap();
        std::fs::write(dir.path().join(".round-009.json.tmp"), "partial").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();

        assert_eq!(store.list().await.unwrap(), vec!["round-001", "round-003"]);
    }

    #[tokio::test]
    async fn fs_store_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path().join("never-created"));
        assert!(store.list().await.unwrap().is_empty());
        store.clear().await.unwrap();
    }

    #[tokio::test]
    async fn fs_store_clear_removes_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());
        store.write("round-001", b"a".to_vec()).await.unwrap();
        store.write("round-002", b"b".to_vec()).await.unwrap();

        store.clear().await.unwrap();
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn project_store_appends_ignore_rule_once() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".gitignore"), "target/").unwrap();
        let store = FsStore::for_project(dir.path());

        store.write("round-001", b"a".to_vec()).await.unwrap();
        store.write("round-002", b"b".to_vec()).await.unwrap();

        let gitignore = std::fs::read_to_string(dir.path().join(".gitignore")).unwrap();
        assert_eq!(gitignore, "target/\n.roundwise/\n");
        assert!(dir.path().join(".roundwise/rounds/round-001.json").exists());

        // A second instance sees the rule and leaves the file alone.
        let again = FsStore::for_project(dir.path());
        again.write("round-003", b"c".to_vec()).await.unwrap();
        let gitignore = std::fs::read_to_string(dir.path().join(".gitignore")).unwrap();
        assert_eq!(gitignore.matches(".roundwise").count(), 1);
    }

    #[tokio::test]
    async fn project_store_skips_non_git_directories() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::for_project(dir.path());
        store.write("round-001", b"a".to_vec()).await.unwrap();
        assert!(!dir.path().join(".gitignore").exists());
    }

    #[tokio::test]
    async fn project_store_creates_gitignore_in_repo() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join(".git")).unwrap();
        let store = FsStore::for_project(dir.path());
        store.write("round-001", b"a".to_vec()).await.unwrap();

        let gitignore = std::fs::read_to_string(dir.path().join(".gitignore")).unwrap();
        assert_eq!(gitignore, ".roundwise/\n");
    }

    #[tokio::test]
    async fn concurrent_project_writes_add_ignore_rule_once() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join(".git")).unwrap();
        let store = FsStore::for_project(dir.path());

        let writes = (1..=4).map(|n| store.write(&format!("round-00{n}"), b"x".to_vec()));
        for result in futures::future::join_all(writes).await {
            result.unwrap();
        }

        let gitignore = std::fs::read_to_string(dir.path().join(".gitignore")).unwrap();
        assert_eq!(gitignore, ".roundwise/\n");
        assert_eq!(store.list().await.unwrap().len(), 4);
    }

    #[test]
    fn ignore_rule_matches_equivalent_lines() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join(".gitignore");
        std::fs::write(&file, "/.roundwise\n").unwrap();
        assert!(!append_ignore_rule(&file, ".roundwise/").unwrap());
    }

    #[tokio::test]
    async fn memory_store_roundtrip() {
        let store = MemoryStore::new();
        store.write("k", b"v".to_vec()).await.unwrap();
        assert_eq!(store.read("k").await.unwrap(), Some(b"v".to_vec()));
        assert_eq!(store.list().await.unwrap(), vec!["k"]);
        store.clear().await.unwrap();
        assert!(store.is_empty());
    }
}
