//! Remote object store abstraction
//!
//! The cloud drive is reached through [`RemoteStore`]. Remote ids are
//! slash-separated keys; the folder of an object is everything before the
//! last slash.

pub mod fs;
pub mod s3;

pub use fs::FsRemoteStore;
pub use s3::S3RemoteStore;

use crate::config::RemoteConfig;
use crate::error::Result;
use async_trait::async_trait;
use mediaq_common::RemoteObjectRef;
use std::path::Path;
use std::sync::Arc;

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Fetch the object's bytes; `ObjectNotFound` when it does not exist
    async fn get(&self, remote_id: &str) -> Result<Vec<u8>>;

    /// Upload a local file as `<folder>/<file_name>` and return its remote id
    async fn put(&self, local_path: &Path, folder: &str, file_name: &str) -> Result<String>;

    async fn exists(&self, remote_id: &str) -> Result<bool>;

    /// Display name and size of an object, if it exists
    async fn describe(&self, remote_id: &str) -> Result<Option<RemoteObjectRef>>;
}

/// Build the configured backend
pub fn from_config(config: &RemoteConfig) -> Result<Arc<dyn RemoteStore>> {
    match config {
        RemoteConfig::Fs { root } => Ok(Arc::new(FsRemoteStore::new(root.clone()))),
        RemoteConfig::S3 { .. } => Ok(Arc::new(S3RemoteStore::from_config(config)?)),
    }
}

/// Folder part of a remote id (`"a/b/c.mp4"` -> `"a/b"`)
pub fn parent_folder(remote_id: &str) -> &str {
    match remote_id.rfind('/') {
        Some(idx) => &remote_id[..idx],
        None => "",
    }
}

/// Last segment of a remote id (`"a/b/c.mp4"` -> `"c.mp4"`)
pub fn file_name(remote_id: &str) -> &str {
    match remote_id.rfind('/') {
        Some(idx) => &remote_id[idx + 1..],
        None => remote_id,
    }
}

/// Join a folder and a file name into a remote id
pub fn join_key(folder: &str, file_name: &str) -> String {
    let folder = folder.trim_matches('/');
    if folder.is_empty() {
        file_name.to_string()
    } else {
        format!("{}/{}", folder, file_name)
    }
}
