//! Cache accounting and eviction
//!
//! [`CacheLedger`] is an index over the files under the cache root. The
//! filesystem is the source of truth for existence; the ledger adds
//! provenance and access times, persists them to `.index.json` and can be
//! rebuilt from a directory scan when that file is missing or corrupt.
//!
//! All state sits behind one mutex, so `record`, `touch` and `evict` are
//! safe to call from every worker at once.

pub mod layout;

pub use layout::CacheLayout;

use crate::error::{CliError, Result};
use chrono::{DateTime, Utc};
use mediaq_common::{CacheOrigin, Stage};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Version of the index file format
const INDEX_VERSION: u32 = 1;

/// Identity of a cache entry: the input (`stage == None`) or one stage's
/// output for a remote object
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub remote_id: String,
    pub stage: Option<Stage>,
}

impl CacheKey {
    pub fn input(remote_id: impl Into<String>) -> Self {
        Self {
            remote_id: remote_id.into(),
            stage: None,
        }
    }

    pub fn artifact(remote_id: impl Into<String>, stage: Stage) -> Self {
        Self {
            remote_id: remote_id.into(),
            stage: Some(stage),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.stage {
            Some(stage) => write!(f, "{}#{}", self.remote_id, stage),
            None => f.write_str(&self.remote_id),
        }
    }
}

/// A locally materialized file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub remote_id: String,
    /// Producing stage; `None` for pipeline inputs
    pub stage: Option<Stage>,
    pub local_path: PathBuf,
    pub origin: CacheOrigin,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    /// Set once the artifact has been uploaded by the publisher
    #[serde(default)]
    pub published: bool,
}

impl CacheEntry {
    /// Entry for a freshly resolved input
    pub fn input(
        remote_id: impl Into<String>,
        local_path: PathBuf,
        origin: CacheOrigin,
        size_bytes: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            remote_id: remote_id.into(),
            stage: None,
            local_path,
            origin,
            size_bytes,
            created_at: now,
            last_accessed_at: now,
            published: false,
        }
    }

    /// Entry for a stage output
    pub fn artifact(
        remote_id: impl Into<String>,
        stage: Stage,
        local_path: PathBuf,
        size_bytes: u64,
    ) -> Self {
        let mut entry = Self::input(remote_id, local_path, CacheOrigin::LocalDownload, size_bytes);
        entry.stage = Some(stage);
        entry
    }

    pub fn key(&self) -> CacheKey {
        CacheKey {
            remote_id: self.remote_id.clone(),
            stage: self.stage,
        }
    }

    pub fn is_derived_artifact(&self) -> bool {
        self.stage.is_some()
    }

    /// Whether the file (or, for mirror links, the link target) is present
    pub fn file_exists(&self) -> bool {
        self.local_path.exists()
    }
}

/// A whole number of days as a duration, `None` when it does not fit
pub fn days_to_duration(days: u64) -> Option<chrono::Duration> {
    i64::try_from(days).ok().and_then(chrono::Duration::try_days)
}

/// Which entries an eviction sweep may remove
#[derive(Debug, Clone, Copy)]
pub struct EvictionPolicy {
    /// Entries untouched for longer than this are candidates
    pub older_than: chrono::Duration,
    /// Also remove unprocessed downloads and unpublished artifacts
    pub force: bool,
}

impl EvictionPolicy {
    /// Published artifacts and mirror links past the retention window
    pub fn standard(retention: chrono::Duration) -> Self {
        Self {
            older_than: retention,
            force: false,
        }
    }

    /// Everything past the window, including downloads never processed
    pub fn force(older_than_days: u64) -> Result<Self> {
        let older_than = days_to_duration(older_than_days).ok_or_else(|| {
            CliError::invalid_input(format!(
                "--older-than-days {} is out of range",
                older_than_days
            ))
        })?;
        Ok(Self {
            older_than,
            force: true,
        })
    }

    pub fn is_stale(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        now - entry.last_accessed_at > self.older_than
    }

    /// Mirror links are cheap to recreate and published artifacts exist
    /// remotely; unprocessed downloads only go under `force`.
    pub fn allows(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        if !self.is_stale(entry, now) {
            return false;
        }
        self.force
            || entry.origin == CacheOrigin::MirrorReference
            || (entry.is_derived_artifact() && entry.published)
    }
}

/// Aggregate view of the ledger
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub total_bytes: u64,
    /// Entries untouched for longer than the retention window
    pub stale_entries: usize,
    pub stale_bytes: u64,
    /// Derived artifacts already published
    pub published_entries: usize,
    pub published_bytes: u64,
    /// What a standard sweep would remove right now
    pub reclaimable_entries: usize,
    pub reclaimable_bytes: u64,
    pub mirror_references: usize,
    pub retention_days: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexFile {
    version: u32,
    entries: Vec<CacheEntry>,
}

#[derive(Default)]
struct LedgerState {
    entries: HashMap<CacheKey, CacheEntry>,
    /// Changes not yet written to the index
    dirty: bool,
    closed: bool,
}

/// Mutex-guarded index of everything materialized in the cache
pub struct CacheLedger {
    layout: CacheLayout,
    retention: chrono::Duration,
    state: Mutex<LedgerState>,
}

impl CacheLedger {
    /// Open the ledger, loading the index or rebuilding it by scan
    pub async fn open(layout: CacheLayout, retention: chrono::Duration) -> Result<Self> {
        layout.ensure()?;

        let entries = match load_index(&layout.index_path()) {
            Ok(Some(entries)) => entries,
            Ok(None) => {
                debug!(root = %layout.root().display(), "No cache index, scanning cache root");
                scan_layout(&layout)
            },
            Err(e) => {
                warn!(error = %e, "Cache index unreadable, rebuilding from directory scan");
                scan_layout(&layout)
            },
        };

        let ledger = Self {
            layout,
            retention,
            state: Mutex::new(LedgerState {
                entries: entries.into_iter().map(|e| (e.key(), e)).collect(),
                dirty: true,
                closed: false,
            }),
        };

        {
            let mut state = ledger.state.lock().await;
            info!(entries = state.entries.len(), "Cache ledger opened");
            ledger.flush(&mut state).await?;
        }

        Ok(ledger)
    }

    pub fn layout(&self) -> &CacheLayout {
        &self.layout
    }

    pub fn retention(&self) -> chrono::Duration {
        self.retention
    }

    /// Insert or replace the entry for `entry.key()`
    pub async fn record(&self, entry: CacheEntry) -> Result<()> {
        let mut state = self.open_state().await?;
        debug!(key = %entry.key(), path = %entry.local_path.display(), "Recording cache entry");
        self.layout.remember_key(&entry.remote_id)?;
        state.entries.insert(entry.key(), entry);
        self.flush(&mut state).await
    }

    /// Refresh `last_accessed_at`; returns the updated entry.
    ///
    /// Access times reach the index with the next structural change or on
    /// `close`, not on every hit.
    pub async fn touch(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let mut state = self.open_state().await?;
        let updated = state.entries.get_mut(key).map(|entry| {
            entry.last_accessed_at = Utc::now();
            entry.clone()
        });
        if updated.is_some() {
            state.dirty = true;
        }
        Ok(updated)
    }

    pub async fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.state.lock().await.entries.get(key).cloned()
    }

    /// Flag a derived artifact as published so eviction may reclaim it
    pub async fn mark_published(&self, key: &CacheKey) -> Result<bool> {
        let mut state = self.open_state().await?;
        let found = match state.entries.get_mut(key) {
            Some(entry) => {
                entry.published = true;
                true
            },
            None => false,
        };
        if found {
            self.flush(&mut state).await?;
        }
        Ok(found)
    }

    /// Drop an entry without touching the filesystem
    pub async fn forget(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let mut state = self.open_state().await?;
        let removed = state.entries.remove(key);
        if removed.is_some() {
            self.flush(&mut state).await?;
        }
        Ok(removed)
    }

    /// Snapshot of every entry, most recently used first
    pub async fn entries(&self) -> Vec<CacheEntry> {
        let state = self.state.lock().await;
        let mut entries: Vec<CacheEntry> = state.entries.values().cloned().collect();
        entries.sort_by(|a, b| b.last_accessed_at.cmp(&a.last_accessed_at));
        entries
    }

    pub async fn stats(&self) -> CacheStats {
        let state = self.state.lock().await;
        let now = Utc::now();
        let standard = EvictionPolicy::standard(self.retention);

        let mut stats = CacheStats {
            retention_days: self.retention.num_days(),
            ..CacheStats::default()
        };

        for entry in state.entries.values() {
            stats.total_entries += 1;
            stats.total_bytes += entry.size_bytes;
            if standard.is_stale(entry, now) {
                stats.stale_entries += 1;
                stats.stale_bytes += entry.size_bytes;
            }
            if entry.is_derived_artifact() && entry.published {
                stats.published_entries += 1;
                stats.published_bytes += entry.size_bytes;
            }
            if standard.allows(entry, now) {
                stats.reclaimable_entries += 1;
                stats.reclaimable_bytes += entry.size_bytes;
            }
            if entry.origin == CacheOrigin::MirrorReference {
                stats.mirror_references += 1;
            }
        }

        stats
    }

    /// Remove every entry the policy allows.
    ///
    /// Mirror references are unlinked, never followed. An entry whose file
    /// cannot be removed is logged and kept; the sweep continues.
    pub async fn evict(&self, policy: EvictionPolicy) -> Result<Vec<CacheEntry>> {
        let mut state = self.open_state().await?;
        let now = Utc::now();

        let candidates: Vec<CacheKey> = state
            .entries
            .values()
            .filter(|entry| policy.allows(entry, now))
            .map(CacheEntry::key)
            .collect();

        let mut removed = Vec::with_capacity(candidates.len());
        for key in candidates {
            let Some(entry) = state.entries.get(&key) else {
                continue;
            };

            match remove_cached_file(&entry.local_path) {
                Ok(()) => {
                    debug!(key = %key, origin = %entry.origin, "Evicted cache entry");
                    if let Some(entry) = state.entries.remove(&key) {
                        removed.push(entry);
                    }
                },
                Err(e) => {
                    warn!(
                        key = %key,
                        path = %entry.local_path.display(),
                        error = %e,
                        "Failed to evict cache entry, skipping"
                    );
                },
            }
        }

        if !removed.is_empty() {
            self.flush(&mut state).await?;
        }

        info!(
            removed = removed.len(),
            force = policy.force,
            older_than_days = policy.older_than.num_days(),
            "Cache eviction sweep finished"
        );
        Ok(removed)
    }

    /// Standard sweep using the configured retention window
    pub async fn sweep(&self) -> Result<Vec<CacheEntry>> {
        self.evict(EvictionPolicy::standard(self.retention)).await
    }

    /// Discard the index and rebuild it from the directory tree
    pub async fn rebuild(&self) -> Result<usize> {
        let mut state = self.open_state().await?;
        let scanned = scan_layout(&self.layout);
        let count = scanned.len();
        state.entries = scanned.into_iter().map(|e| (e.key(), e)).collect();
        self.flush(&mut state).await?;
        info!(entries = count, "Cache index rebuilt from directory scan");
        Ok(count)
    }

    /// Persist the index and refuse further mutations
    pub async fn close(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Ok(());
        }
        if state.dirty {
            self.flush(&mut state).await?;
        }
        state.closed = true;
        debug!("Cache ledger closed");
        Ok(())
    }

    async fn open_state(&self) -> Result<tokio::sync::MutexGuard<'_, LedgerState>> {
        let state = self.state.lock().await;
        if state.closed {
            return Err(CliError::cache("ledger is closed"));
        }
        Ok(state)
    }

    /// Write the index off the async runtime; the caller holds the lock, so
    /// writes land in mutation order
    async fn flush(&self, state: &mut LedgerState) -> Result<()> {
        let mut entries: Vec<CacheEntry> = state.entries.values().cloned().collect();
        entries.sort_by(|a, b| a.key().to_string().cmp(&b.key().to_string()));
        let index = IndexFile {
            version: INDEX_VERSION,
            entries,
        };
        let bytes = serde_json::to_vec_pretty(&index)?;

        let layout = self.layout.clone();
        tokio::task::spawn_blocking(move || layout.write_atomic(&layout.index_path(), &bytes))
            .await
            .map_err(|e| CliError::Io(std::io::Error::other(e)))??;
        state.dirty = false;
        Ok(())
    }
}

fn load_index(path: &Path) -> Result<Option<Vec<CacheEntry>>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read(path)?;
    let index: IndexFile = serde_json::from_slice(&raw)?;
    if index.version != INDEX_VERSION {
        return Err(CliError::cache(format!(
            "unsupported index version {}",
            index.version
        )));
    }
    Ok(Some(index.entries))
}

/// Rebuild entries from the files present under the layout.
///
/// Access times come from file metadata; publish state is unknown and
/// left unset.
fn scan_layout(layout: &CacheLayout) -> Vec<CacheEntry> {
    let mut entries = Vec::new();

    for dir_entry in WalkDir::new(layout.root())
        .min_depth(2)
        .max_depth(2)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = dir_entry.path();
        let Some((remote_id, stage)) = layout.classify(path) else {
            continue;
        };

        let is_link = dir_entry.path_is_symlink();
        let origin = if is_link && stage.is_none() {
            CacheOrigin::MirrorReference
        } else {
            CacheOrigin::LocalDownload
        };

        let Ok(meta) = std::fs::metadata(path) else {
            debug!(path = %path.display(), "Skipping dangling cache file during scan");
            continue;
        };
        let modified: DateTime<Utc> = meta
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        entries.push(CacheEntry {
            remote_id,
            stage,
            local_path: path.to_path_buf(),
            origin,
            size_bytes: meta.len(),
            created_at: modified,
            last_accessed_at: modified,
            published: false,
        });
    }

    entries
}

/// Unlink a cached file; a file that is already gone counts as removed
fn remove_cached_file(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use mediaq_common::RemoteObjectRef;
    use tempfile::TempDir;

    async fn create_test_ledger() -> (CacheLedger, TempDir) {
        let temp = TempDir::new().unwrap();
        let layout = CacheLayout::new(temp.path().join("cache"));
        let ledger = CacheLedger::open(layout, chrono::Duration::days(7))
            .await
            .unwrap();
        (ledger, temp)
    }

    fn write_input(ledger: &CacheLedger, remote_id: &str, bytes: &[u8]) -> CacheEntry {
        let object = RemoteObjectRef::new(remote_id, format!("{}.mp4", remote_id));
        let path = ledger.layout().input_path(&object);
        ledger.layout().write_atomic(&path, bytes).unwrap();
        CacheEntry::input(remote_id, path, CacheOrigin::LocalDownload, bytes.len() as u64)
    }

    fn age(mut entry: CacheEntry, days: i64) -> CacheEntry {
        entry.last_accessed_at = Utc::now() - chrono::Duration::days(days);
        entry
    }

    #[tokio::test]
    async fn test_record_upserts_single_entry() {
        let (ledger, _temp) = create_test_ledger().await;
        let entry = write_input(&ledger, "a1", b"one");
        ledger.record(entry.clone()).await.unwrap();
        ledger.record(entry).await.unwrap();

        assert_eq!(ledger.entries().await.len(), 1);
        assert_eq!(ledger.stats().await.total_bytes, 3);
    }

    #[tokio::test]
    async fn test_touch_updates_access_time() {
        let (ledger, _temp) = create_test_ledger().await;
        let entry = age(write_input(&ledger, "a1", b"one"), 30);
        let before = entry.last_accessed_at;
        ledger.record(entry).await.unwrap();

        let touched = ledger.touch(&CacheKey::input("a1")).await.unwrap().unwrap();
        assert!(touched.last_accessed_at > before);
        assert!(ledger.touch(&CacheKey::input("missing")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_touch_is_written_by_close() {
        let (ledger, temp) = create_test_ledger().await;
        ledger.record(age(write_input(&ledger, "a1", b"one"), 30)).await.unwrap();
        let index_before = std::fs::read(ledger.layout().index_path()).unwrap();

        let touched = ledger.touch(&CacheKey::input("a1")).await.unwrap().unwrap();
        assert_eq!(std::fs::read(ledger.layout().index_path()).unwrap(), index_before);
        ledger.close().await.unwrap();

        let reopened = CacheLedger::open(
            CacheLayout::new(temp.path().join("cache")),
            chrono::Duration::days(7),
        )
        .await
        .unwrap();
        let entry = reopened.get(&CacheKey::input("a1")).await.unwrap();
        assert_eq!(entry.last_accessed_at, touched.last_accessed_at);
    }

    #[tokio::test]
    async fn test_standard_eviction_keeps_unprocessed_downloads() {
        let (ledger, _temp) = create_test_ledger().await;
        let download = age(write_input(&ledger, "raw", b"video"), 30);
        ledger.record(download.clone()).await.unwrap();

        let removed = ledger.sweep().await.unwrap();
        assert!(removed.is_empty());
        assert!(download.local_path.exists());

        let forced = ledger.evict(EvictionPolicy::force(10).unwrap()).await.unwrap();
        assert_eq!(forced.len(), 1);
        assert!(!download.local_path.exists());
        assert_eq!(ledger.stats().await.total_entries, 0);
    }

    #[tokio::test]
    async fn test_published_artifacts_become_reclaimable() {
        let (ledger, _temp) = create_test_ledger().await;
        let path = ledger
            .layout()
            .artifact_path(Stage::Transcribe, "talk")
            .unwrap();
        ledger.layout().write_atomic(&path, b"transcript").unwrap();
        let artifact = age(CacheEntry::artifact("talk", Stage::Transcribe, path.clone(), 10), 30);
        ledger.record(artifact).await.unwrap();

        assert_eq!(ledger.stats().await.reclaimable_entries, 0);
        assert!(ledger
            .mark_published(&CacheKey::artifact("talk", Stage::Transcribe))
            .await
            .unwrap());

        let stats = ledger.stats().await;
        assert_eq!(stats.published_entries, 1);
        assert_eq!(stats.reclaimable_bytes, 10);

        let removed = ledger.sweep().await.unwrap();
        assert_eq!(removed.len(), 1);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_recent_entries_are_never_evicted() {
        let (ledger, _temp) = create_test_ledger().await;
        let entry = write_input(&ledger, "fresh", b"x");
        ledger.record(entry).await.unwrap();

        let removed = ledger.evict(EvictionPolicy::force(1).unwrap()).await.unwrap();
        assert!(removed.is_empty());
    }

    #[tokio::test]
    async fn test_index_survives_reopen() {
        let temp = TempDir::new().unwrap();
        let layout = CacheLayout::new(temp.path().join("cache"));
        {
            let ledger = CacheLedger::open(layout.clone(), chrono::Duration::days(7))
                .await
                .unwrap();
            let entry = write_input(&ledger, "keep", b"abc");
            ledger.record(entry).await.unwrap();
            ledger
                .mark_published(&CacheKey::input("keep"))
                .await
                .unwrap();
            ledger.close().await.unwrap();
            assert!(ledger.record(write_input(&ledger, "late", b"z")).await.is_err());
        }

        let reopened = CacheLedger::open(layout, chrono::Duration::days(7))
            .await
            .unwrap();
        let entry = reopened.get(&CacheKey::input("keep")).await.unwrap();
        assert!(entry.published);
    }

    #[tokio::test]
    async fn test_corrupt_index_falls_back_to_scan() {
        let temp = TempDir::new().unwrap();
        let layout = CacheLayout::new(temp.path().join("cache"));
        layout.ensure().unwrap();

        let object = RemoteObjectRef::new("lecture-7", "lecture-7.mp4");
        layout.write_atomic(&layout.input_path(&object), b"12345").unwrap();
        let summary = layout.artifact_path(Stage::Summarize, "lecture-7").unwrap();
        layout.write_atomic(&summary, b"# notes").unwrap();
        std::fs::write(layout.index_path(), b"{ not json").unwrap();

        let ledger = CacheLedger::open(layout, chrono::Duration::days(7))
            .await
            .unwrap();
        let input = ledger.get(&CacheKey::input("lecture-7")).await.unwrap();
        assert_eq!(input.size_bytes, 5);
        assert_eq!(input.origin, CacheOrigin::LocalDownload);
        let derived = ledger
            .get(&CacheKey::artifact("lecture-7", Stage::Summarize))
            .await
            .unwrap();
        assert!(derived.is_derived_artifact());
        assert!(!derived.published);
    }

    #[test]
    fn test_force_policy_rejects_unrepresentable_age() {
        assert!(matches!(
            EvictionPolicy::force(u64::MAX / 2),
            Err(CliError::InvalidInput(_))
        ));
        assert!(EvictionPolicy::force(u64::MAX).is_err());
        assert_eq!(
            EvictionPolicy::force(3).unwrap().older_than,
            chrono::Duration::days(3)
        );
    }

    #[test]
    fn test_cache_key_display() {
        assert_eq!(CacheKey::input("abc").to_string(), "abc");
        assert_eq!(
            CacheKey::artifact("abc", Stage::Convert).to_string(),
            "abc#convert"
        );
    }
}
