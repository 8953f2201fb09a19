//! Content fingerprints: the root of every round's cache key.
//!
//! [`fingerprint`] digests the discovered file set as sorted
//! `path:contentHash` lines, so the same files in any order always produce
//! the same [`Fingerprint`]. [`discover`] is a reference file-discovery
//! walker producing the [`FileRecord`]s it consumes.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};
use walkdir::WalkDir;

/// One analyzed file, as supplied by file discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    /// Project-relative path with `/` separators.
    pub path: String,
    /// Hex SHA-256 of the file contents.
    pub content_hash: String,
    pub size: u64,
}

impl FileRecord {
    pub fn new(path: impl Into<String>, content_hash: impl Into<String>, size: u64) -> Self {
        Self {
            path: path.into(),
            content_hash: content_hash.into(),
            size,
        }
    }

    /// Build a record by hashing `bytes`.
    pub fn from_bytes(path: impl Into<String>, bytes: &[u8]) -> Self {
        Self::new(path, hash_bytes_sha256(bytes), bytes.len() as u64)
    }
}

/// Deterministic digest over a set of files.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for log lines.
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Digest the file set. Records are sorted by path (then hash) and
/// deduplicated first, so input order never matters.
pub fn fingerprint(files: &[FileRecord]) -> Fingerprint {
    let mut pairs: Vec<(&str, &str)> = files
        .iter()
        .map(|f| (f.path.as_str(), f.content_hash.as_str()))
        .collect();
    pairs.sort_unstable();
    pairs.dedup();

    let mut hasher = Sha256::new();
    for (path, hash) in pairs {
        hasher.update(path.as_bytes());
        hasher.update(b":");
        hasher.update(hash.as_bytes());
        hasher.update(b"\n");
    }
    Fingerprint(hex::encode(hasher.finalize()))
}

/// Hex SHA-256 of `bytes`.
pub fn hash_bytes_sha256(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

// ── Discovery ──────────────────────────────────────────────────────

/// Directories never descended into.
pub const DEFAULT_SKIP_DIRS: &[&str] = &["target", "node_modules", "dist", "build", "vendor"];

/// Files larger than this are skipped by default (1 MiB).
pub const DEFAULT_MAX_FILE_BYTES: u64 = 1024 * 1024;

/// Options for [`discover`].
#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    pub max_file_bytes: u64,
    /// Directory names skipped in addition to hidden directories.
    pub skip_dirs: Vec<String>,
    /// Paths skipped along with everything beneath them, such as a cache
    /// directory that lives inside the project.
    pub exclude: Vec<PathBuf>,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
            skip_dirs: DEFAULT_SKIP_DIRS.iter().map(|s| (*s).to_string()).collect(),
            exclude: Vec::new(),
        }
    }
}

/// A discovered file: its record plus the text, when it is valid UTF-8.
#[derive(Debug, Clone)]
pub struct DiscoveredFile {
    pub record: FileRecord,
    pub text: Option<String>,
}

/// Walk `root` and hash every regular file.
///
/// Hidden entries (including `.git` and the `.roundwise` cache directory),
/// the configured skip directories and the excluded paths are not visited.
/// Files that cannot be read are logged and left out. Results are sorted by
/// path.
pub fn discover(root: &Path, options: &DiscoveryOptions) -> Result<Vec<DiscoveredFile>> {
    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            if entry.depth() == 0 {
                return true;
            }
            let name = entry.file_name().to_string_lossy();
            if name.starts_with('.') {
                return false;
            }
            if options.exclude.iter().any(|p| entry.path().starts_with(p)) {
                trace!("Skipping excluded {}", entry.path().display());
                return false;
            }
            !(entry.file_type().is_dir() && options.skip_dirs.iter().any(|d| d == name.as_ref()))
        });

    let mut files = Vec::new();
    for entry in walker {
        let entry = entry.map_err(|e| Error::Discovery {
            root: root.to_path_buf(),
            message: e.to_string(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }

        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        if size > options.max_file_bytes {
            trace!("Skipping {} ({size} bytes)", entry.path().display());
            continue;
        }

        let bytes = match std::fs::read(entry.path()) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Skipping unreadable {}: {e}", entry.path().display());
                continue;
            }
        };
        let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
        let path = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        let record = FileRecord::from_bytes(path, &bytes);
        let text = String::from_utf8(bytes).ok();
        files.push(DiscoveredFile { record, text });
    }

    files.sort_by(|a, b| a.record.path.cmp(&b.record.path));
    debug!("Discovered {} files under {}", files.len(), root.display());
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records() -> Vec<FileRecord> {
        vec![
            FileRecord::new("src/a.rs", "h1", 10),
            FileRecord::new("src/b.rs", "h2", 20),
            FileRecord::new("README.md", "h3", 30),
        ]
    }

    #[test]
    fn fingerprint_is_order_invariant() {
        let base = fingerprint(&records());
        let r = records();
        let permutations = [
            vec![r[0].clone(), r[1].clone(), r[2].clone()],
            vec![r[0].clone(), r[2].clone(), r[1].clone()],
            vec![r[1].clone(), r[0].clone(), r[2].clone()],
            vec![r[1].clone(), r[2].clone(), r[0].clone()],
            vec![r[2].clone(), r[0].clone(), r[1].clone()],
            vec![r[2].clone(), r[1].clone(), r[0].clone()],
        ];
        for perm in permutations {
            assert_eq!(fingerprint(&perm), base);
        }
    }

    #[test]
    fn fingerprint_changes_with_content() {
        let mut changed = records();
        changed[1].content_hash = "h2-prime".into();
        assert_ne!(fingerprint(&changed), fingerprint(&records()));
    }

    #[test]
    fn fingerprint_changes_with_path() {
        let mut renamed = records();
        renamed[0].path = "src/c.rs".into();
        assert_ne!(fingerprint(&renamed), fingerprint(&records()));
    }

    #[test]
    fn duplicates_are_ignored() {
        let mut dup = records();
        dup.push(records()[0].clone());
        assert_eq!(fingerprint(&dup), fingerprint(&records()));
    }

    #[test]
    fn size_does_not_affect_fingerprint() {
        let mut resized = records();
        resized[0].size = 999;
        assert_eq!(fingerprint(&resized), fingerprint(&records()));
    }

    #[test]
    fn fingerprint_is_sha256_hex() {
        let fp = fingerprint(&[]);
        assert_eq!(fp.as_str().len(), 64);
        assert_eq!(fp.short().len(), 12);
        // SHA-256 of the empty string.
        assert_eq!(
            fp.as_str(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn discover_hashes_files_and_skips_hidden() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        std::fs::create_dir_all(dir.path().join("target")).unwrap();
        std::fs::write(dir.path().join("src/main.rs"), "fn main() {}").unwrap();
        std::fs::write(dir.path().join("Cargo.toml"), "[package]").unwrap();
        std::fs::write(dir.path().join(".git/HEAD"), "ref").unwrap();
        std::fs::write(dir.path().join("target/out.bin"), "bin").unwrap();

        let files = discover(dir.path(), &DiscoveryOptions::default()).unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.record.path.as_str()).collect();
        assert_eq!(paths, vec!["Cargo.toml", "src/main.rs"]);
        assert_eq!(
            files[1].record.content_hash,
            hash_bytes_sha256(b"fn main() {}")
        );
        assert_eq!(files[1].text.as_deref(), Some("fn main() {}"));
    }

    #[test]
    fn discover_skips_large_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("big.txt"), "x".repeat(100)).unwrap();
        std::fs::write(dir.path().join("small.txt"), "x").unwrap();

        let options = DiscoveryOptions {
            max_file_bytes: 10,
            ..Default::default()
        };
        let files = discover(dir.path(), &options).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].record.path, "small.txt");
    }

    #[test]
    fn discover_skips_excluded_paths() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("analysis-cache")).unwrap();
        std::fs::write(dir.path().join("analysis-cache/round-001.json"), "{}").unwrap();
        std::fs::write(dir.path().join("lib.rs"), "pub fn f() {}").unwrap();

        let options = DiscoveryOptions {
            exclude: vec![dir.path().join("analysis-cache")],
            ..Default::default()
        };
        let files = discover(dir.path(), &options).unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.record.path.as_str()).collect();
        assert_eq!(paths, vec!["lib.rs"]);
    }

    #[cfg(unix)]
    #[test]
    fn discover_skips_unreadable_files() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let locked = dir.path().join("locked.txt");
        std::fs::write(&locked, "secret").unwrap();
        std::fs::write(dir.path().join("open.txt"), "hello").unwrap();
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o000)).unwrap();
        let unreadable = std::fs::read(&locked).is_err();

        let files = discover(dir.path(), &DiscoveryOptions::default()).unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.record.path.as_str()).collect();
        // Privileged users can still read the file.
        if unreadable {
            assert_eq!(paths, vec!["open.txt"]);
        } else {
            assert_eq!(paths, vec!["locked.txt", "open.txt"]);
        }

        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o644)).unwrap();
    }
}
