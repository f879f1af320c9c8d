//! Directory-backed remote store
//!
//! Stands in for the cloud drive during local runs and tests. Remote ids
//! are paths relative to the root.

use super::{join_key, RemoteStore};
use crate::error::{CliError, Result};
use async_trait::async_trait;
use mediaq_common::RemoteObjectRef;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, instrument};

pub struct FsRemoteStore {
    root: PathBuf,
}

impl FsRemoteStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, remote_id: &str) -> Result<PathBuf> {
        let relative = Path::new(remote_id);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if remote_id.is_empty() || escapes {
            return Err(CliError::invalid_input(format!(
                "remote id '{}' is not a relative path",
                remote_id
            )));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl RemoteStore for FsRemoteStore {
    #[instrument(skip(self))]
    async fn get(&self, remote_id: &str) -> Result<Vec<u8>> {
        let path = self.object_path(remote_id)?;
        match tokio::fs::read(&path).await {
            Ok(data) => {
                debug!(bytes = data.len(), "Read object from directory store");
                Ok(data)
            },
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(CliError::ObjectNotFound(remote_id.to_string()))
            },
            Err(e) => Err(CliError::remote(format!("reading '{}': {}", remote_id, e))),
        }
    }

    #[instrument(skip(self))]
    async fn put(&self, local_path: &Path, folder: &str, file_name: &str) -> Result<String> {
        let key = join_key(folder, file_name);
        let dest = self.object_path(&key)?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CliError::upload(format!("creating folder for '{}': {}", key, e)))?;
        }

        let partial = dest.with_file_name(format!(".{}.partial", file_name));
        tokio::fs::copy(local_path, &partial)
            .await
            .map_err(|e| CliError::upload(format!("copying to '{}': {}", key, e)))?;
        tokio::fs::rename(&partial, &dest)
            .await
            .map_err(|e| CliError::upload(format!("finalizing '{}': {}", key, e)))?;

        info!(key = %key, "Uploaded object to directory store");
        Ok(key)
    }

    async fn exists(&self, remote_id: &str) -> Result<bool> {
        let path = self.object_path(remote_id)?;
        Ok(tokio::fs::metadata(&path).await.map(|m| m.is_file()).unwrap_or(false))
    }

    async fn describe(&self, remote_id: &str) -> Result<Option<RemoteObjectRef>> {
        let path = self.object_path(remote_id)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(Some(
                RemoteObjectRef::new(remote_id, super::file_name(remote_id))
                    .with_expected_size(meta.len()),
            )),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CliError::remote(format!("probing '{}': {}", remote_id, e))),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let temp = TempDir::new().unwrap();
        let store = FsRemoteStore::new(temp.path());
        let err = store.get("nope.mp4").await.unwrap_err();
        assert!(matches!(err, CliError::ObjectNotFound(_)));
    }

    #[tokio::test]
    async fn test_put_then_describe() {
        let temp = TempDir::new().unwrap();
        let store = FsRemoteStore::new(temp.path().join("drive"));
        let local = temp.path().join("t.txt");
        std::fs::write(&local, b"hello").unwrap();

        let key = store.put(&local, "talks/2024", "keynote.txt").await.unwrap();
        assert_eq!(key, "talks/2024/keynote.txt");
        assert!(store.exists(&key).await.unwrap());
        assert_eq!(store.get(&key).await.unwrap(), b"hello");

        let described = store.describe(&key).await.unwrap().unwrap();
        assert_eq!(described.display_name, "keynote.txt");
        assert_eq!(described.expected_size_bytes, Some(5));
    }

    #[tokio::test]
    async fn test_rejects_escaping_ids() {
        let temp = TempDir::new().unwrap();
        let store = FsRemoteStore::new(temp.path());
        assert!(matches!(
            store.get("../etc/passwd").await.unwrap_err(),
            CliError::InvalidInput(_)
        ));
    }
}
