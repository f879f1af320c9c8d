//! Tiered lookup from a remote id to local bytes
//!
//! Order, first match wins:
//!
//! 1. the cache ledger, if the file is still on disk
//! 2. the synchronized mirror, linked into the cache rather than copied
//! 3. a download from the remote store
//!
//! Every successful resolution upserts the input's ledger entry.

use crate::cache::{CacheEntry, CacheKey, CacheLedger};
use crate::error::{CliError, Result};
use crate::mirror::Mirror;
use crate::remote::RemoteStore;
use mediaq_common::{CacheOrigin, RemoteObjectRef};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Where resolution found the bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub path: PathBuf,
    pub origin: CacheOrigin,
    /// Served from an existing ledger entry
    pub cache_hit: bool,
}

pub struct PathResolver {
    ledger: Arc<CacheLedger>,
    remote: Arc<dyn RemoteStore>,
    mirror: Option<Mirror>,
}

impl PathResolver {
    pub fn new(
        ledger: Arc<CacheLedger>,
        remote: Arc<dyn RemoteStore>,
        mirror: Option<Mirror>,
    ) -> Self {
        Self {
            ledger,
            remote,
            mirror,
        }
    }

    pub fn ledger(&self) -> &Arc<CacheLedger> {
        &self.ledger
    }

    /// Resolve `object` to a local path.
    ///
    /// Fails with `ObjectNotFound` when no tier has the object. Disk and
    /// network errors propagate unchanged; retrying is the queue's job.
    #[instrument(skip(self, object), fields(remote_id = %object.remote_id))]
    pub async fn resolve(&self, object: &RemoteObjectRef) -> Result<Resolved> {
        if let Some(hit) = self.from_cache(object).await? {
            return Ok(hit);
        }
        if let Some(linked) = self.from_mirror(object).await? {
            return Ok(linked);
        }
        self.from_remote(object).await
    }

    async fn from_cache(&self, object: &RemoteObjectRef) -> Result<Option<Resolved>> {
        let key = CacheKey::input(&object.remote_id);
        let Some(entry) = self.ledger.get(&key).await else {
            return Ok(None);
        };

        if !entry.file_exists() {
            debug!(path = %entry.local_path.display(), "Cached file vanished, dropping entry");
            self.ledger.forget(&key).await?;
            return Ok(None);
        }

        let entry = self.ledger.touch(&key).await?.unwrap_or(entry);
        debug!(origin = %entry.origin, "Cache hit");
        Ok(Some(Resolved {
            path: entry.local_path,
            origin: entry.origin,
            cache_hit: true,
        }))
    }

    async fn from_mirror(&self, object: &RemoteObjectRef) -> Result<Option<Resolved>> {
        let Some(mirror) = self.mirror.clone() else {
            return Ok(None);
        };

        let layout = self.ledger.layout().clone();
        let dest = layout.input_path(object);
        let lookup = object.clone();
        let link_dest = dest.clone();

        let linked = tokio::task::spawn_blocking(move || -> Result<Option<u64>> {
            let Some(target) = mirror.locate(&lookup) else {
                return Ok(None);
            };
            let size = std::fs::metadata(&target)?.len();
            layout.link_atomic(&target, &link_dest)?;
            Ok(Some(size))
        })
        .await
        .map_err(|e| CliError::Io(std::io::Error::other(e)))??;

        let Some(size) = linked else {
            return Ok(None);
        };

        self.ledger
            .record(CacheEntry::input(
                &object.remote_id,
                dest.clone(),
                CacheOrigin::MirrorReference,
                size,
            ))
            .await?;
        info!(path = %dest.display(), "Linked mirror copy into cache");

        Ok(Some(Resolved {
            path: dest,
            origin: CacheOrigin::MirrorReference,
            cache_hit: false,
        }))
    }

    async fn from_remote(&self, object: &RemoteObjectRef) -> Result<Resolved> {
        let bytes = self.remote.get(&object.remote_id).await?;
        let size = bytes.len() as u64;

        let layout = self.ledger.layout().clone();
        let dest = layout.input_path(object);
        let write_dest = dest.clone();
        tokio::task::spawn_blocking(move || layout.write_atomic(&write_dest, &bytes))
            .await
            .map_err(|e| CliError::Io(std::io::Error::other(e)))??;

        self.ledger
            .record(CacheEntry::input(
                &object.remote_id,
                dest.clone(),
                CacheOrigin::LocalDownload,
                size,
            ))
            .await?;
        info!(bytes = size, path = %dest.display(), "Downloaded object into cache");

        Ok(Resolved {
            path: dest,
            origin: CacheOrigin::LocalDownload,
            cache_hit: false,
        })
    }
}
