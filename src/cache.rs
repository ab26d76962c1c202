//! Skip-unchanged write cache for incremental generation.
//!
//! Rewriting every artifact on every cycle would be correct but wasteful —
//! and in watch mode it would also retrigger every downstream watcher on
//! every keystroke. This module tracks, per output path, the fingerprint of
//! the last successful write so the pipeline can skip artifacts whose
//! content is already on disk.
//!
//! # Design
//!
//! The cache is **invocation-scoped**: a [`WriteCache`] is created per
//! one-shot run, or once per streaming session (so skip-writes work across
//! watch cycles), and never persisted. A fresh process always starts cold —
//! the first cycle writes everything, which also repairs any stale files a
//! previously failed cycle left behind.
//!
//! Fingerprints are opaque strings supplied by the artifact synthesizer
//! (document hashes from the fetch stage, or concatenations of them). An
//! artifact without a fingerprint is unconditionally written every cycle.
//!
//! ## `rm_before_write`
//!
//! Some consumers (editors, build watchers) only detect changes on
//! delete+recreate, not on in-place overwrite. Artifacts that must be seen
//! by such consumers request removal first; removal of a missing file is
//! not an error. `rm_before_write` also bypasses the fingerprint check, so
//! the two flags are never combined on the same artifact in practice.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tracing::trace;

#[derive(Error, Debug)]
pub enum WriteError {
    #[error("failed to remove {path}: {source}")]
    Remove {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// What [`WriteCache::write`] did for one artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Content was written to disk.
    Written,
    /// The stored fingerprint matched — no filesystem operation occurred.
    Skipped,
}

/// Map from output path to last-written fingerprint, plus the write logic
/// that consults it.
///
/// Interior mutability (a `Mutex` around the map) lets a whole artifact
/// batch fan out concurrently over `&WriteCache`; the lock is only held for
/// the map lookup/insert, never across I/O. Concurrent writes to the *same*
/// path would race, but the artifact synthesizer never emits two artifacts
/// with the same path in one cycle.
#[derive(Debug, Default)]
pub struct WriteCache {
    written: Mutex<HashMap<PathBuf, String>>,
}

impl WriteCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write `content` to `path`, unless the stored fingerprint says the
    /// file is already up to date.
    ///
    /// The fingerprint is recorded only after a successful write, so a
    /// failed write leaves the cache untouched and a retry will attempt the
    /// write again.
    pub async fn write(
        &self,
        path: &Path,
        content: &str,
        fingerprint: Option<&str>,
        rm_before_write: bool,
    ) -> Result<WriteOutcome, WriteError> {
        if let Some(fp) = fingerprint
            && !rm_before_write
            && self.is_current(path, fp)
        {
            trace!(path = %path.display(), "write skipped, fingerprint unchanged");
            return Ok(WriteOutcome::Skipped);
        }

        if rm_before_write {
            match tokio::fs::remove_file(path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(source) => {
                    return Err(WriteError::Remove {
                        path: path.to_path_buf(),
                        source,
                    });
                }
            }
        }

        tokio::fs::write(path, content)
            .await
            .map_err(|source| WriteError::Write {
                path: path.to_path_buf(),
                source,
            })?;

        if let Some(fp) = fingerprint {
            let mut written = self.written.lock().unwrap_or_else(|e| e.into_inner());
            written.insert(path.to_path_buf(), fp.to_string());
        }
        trace!(path = %path.display(), "written");
        Ok(WriteOutcome::Written)
    }

    fn is_current(&self, path: &Path, fingerprint: &str) -> bool {
        let written = self.written.lock().unwrap_or_else(|e| e.into_inner());
        written.get(path).is_some_and(|fp| fp == fingerprint)
    }
}

/// Summary of write activity for one generation cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WriteStats {
    pub written: u32,
    pub skipped: u32,
}

impl WriteStats {
    pub fn record(&mut self, outcome: WriteOutcome) {
        match outcome {
            WriteOutcome::Written => self.written += 1,
            WriteOutcome::Skipped => self.skipped += 1,
        }
    }

    pub fn total(&self) -> u32 {
        self.written + self.skipped
    }
}

impl fmt::Display for WriteStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.skipped > 0 {
            write!(
                f,
                "{} written, {} up to date ({} total)",
                self.written,
                self.skipped,
                self.total()
            )
        } else {
            write!(f, "{} written", self.written)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[tokio::test]
    async fn writes_new_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("out.json");
        let cache = WriteCache::new();

        let outcome = cache.write(&path, "content", Some("fp1"), false).await.unwrap();
        assert_eq!(outcome, WriteOutcome::Written);
        assert_eq!(fs::read_to_string(&path).unwrap(), "content");
    }

    #[tokio::test]
    async fn second_write_with_same_fingerprint_is_noop() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("out.json");
        let cache = WriteCache::new();

        let first = cache.write(&path, "content", Some("fp1"), false).await.unwrap();
        let second = cache.write(&path, "content", Some("fp1"), false).await.unwrap();
        assert_eq!(first, WriteOutcome::Written);
        assert_eq!(second, WriteOutcome::Skipped);
    }

    #[tokio::test]
    async fn changed_fingerprint_rewrites() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("out.json");
        let cache = WriteCache::new();

        cache.write(&path, "v1", Some("fp1"), false).await.unwrap();
        let outcome = cache.write(&path, "v2", Some("fp2"), false).await.unwrap();
        assert_eq!(outcome, WriteOutcome::Written);
        assert_eq!(fs::read_to_string(&path).unwrap(), "v2");
    }

    #[tokio::test]
    async fn no_fingerprint_always_writes() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("out.json");
        let cache = WriteCache::new();

        let first = cache.write(&path, "v1", None, false).await.unwrap();
        let second = cache.write(&path, "v1", None, false).await.unwrap();
        assert_eq!(first, WriteOutcome::Written);
        assert_eq!(second, WriteOutcome::Written);
    }

    #[tokio::test]
    async fn rm_before_write_bypasses_fingerprint_check() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("out.d.ts");
        let cache = WriteCache::new();

        cache.write(&path, "v1", Some("fp1"), true).await.unwrap();
        let second = cache.write(&path, "v1", Some("fp1"), true).await.unwrap();
        assert_eq!(second, WriteOutcome::Written);
    }

    #[tokio::test]
    async fn rm_before_write_tolerates_missing_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("never-existed.mjs");
        let cache = WriteCache::new();

        let outcome = cache.write(&path, "content", None, true).await.unwrap();
        assert_eq!(outcome, WriteOutcome::Written);
    }

    #[tokio::test]
    async fn failed_write_does_not_update_cache() {
        let tmp = TempDir::new().unwrap();
        // Parent directory does not exist, so the write fails.
        let path = tmp.path().join("missing-dir").join("out.json");
        let cache = WriteCache::new();

        let err = cache.write(&path, "content", Some("fp1"), false).await;
        assert!(matches!(err, Err(WriteError::Write { .. })));

        // A retry after creating the directory must attempt the write again.
        fs::create_dir_all(tmp.path().join("missing-dir")).unwrap();
        let outcome = cache.write(&path, "content", Some("fp1"), false).await.unwrap();
        assert_eq!(outcome, WriteOutcome::Written);
    }

    #[tokio::test]
    async fn distinct_paths_tracked_independently() {
        let tmp = TempDir::new().unwrap();
        let a = tmp.path().join("a.json");
        let b = tmp.path().join("b.json");
        let cache = WriteCache::new();

        cache.write(&a, "x", Some("fp"), false).await.unwrap();
        let outcome = cache.write(&b, "x", Some("fp"), false).await.unwrap();
        assert_eq!(outcome, WriteOutcome::Written);
    }

    #[test]
    fn stats_display_with_skips() {
        let stats = WriteStats {
            written: 6,
            skipped: 5,
        };
        assert_eq!(format!("{stats}"), "6 written, 5 up to date (11 total)");
    }

    #[test]
    fn stats_display_without_skips() {
        let stats = WriteStats {
            written: 11,
            skipped: 0,
        };
        assert_eq!(format!("{stats}"), "11 written");
    }

    #[test]
    fn stats_record_counts_outcomes() {
        let mut stats = WriteStats::default();
        stats.record(WriteOutcome::Written);
        stats.record(WriteOutcome::Skipped);
        stats.record(WriteOutcome::Skipped);
        assert_eq!(stats.written, 1);
        assert_eq!(stats.skipped, 2);
        assert_eq!(stats.total(), 3);
    }
}
