//! Upload of derived artifacts back to the remote store
//!
//! Publishing is idempotent on `(source_remote_id, stage, content_hash)`:
//! identical content is uploaded once and later calls return the first
//! record.

use crate::cache::{CacheKey, CacheLedger};
use crate::error::{CliError, Result};
use crate::remote::{self, RemoteStore};
use crate::status::StatusStore;
use chrono::{DateTime, Utc};
use mediaq_common::checksum::compute_file_checksum;
use mediaq_common::Stage;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedArtifact {
    pub source_remote_id: String,
    pub stage: Stage,
    /// SHA-256 of the uploaded bytes
    pub content_hash: String,
    pub published_remote_id: String,
    pub published_at: DateTime<Utc>,
}

pub struct ArtifactPublisher {
    remote: Arc<dyn RemoteStore>,
    status: Arc<dyn StatusStore>,
    ledger: Arc<CacheLedger>,
    // Serializes check-then-upload so concurrent calls cannot double publish
    publish_lock: Mutex<()>,
}

impl ArtifactPublisher {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        status: Arc<dyn StatusStore>,
        ledger: Arc<CacheLedger>,
    ) -> Self {
        Self {
            remote,
            status,
            ledger,
            publish_lock: Mutex::new(()),
        }
    }

    /// Publish the artifact `stage` produced for `source_remote_id`.
    ///
    /// Upload failures surface as `CliError::Upload`, which the publish
    /// stage treats as retriable.
    #[instrument(skip(self, path), fields(path = %path.display()))]
    pub async fn publish(
        &self,
        path: &Path,
        source_remote_id: &str,
        stage: Stage,
    ) -> Result<PublishedArtifact> {
        if !stage.produces_artifact() {
            return Err(CliError::invalid_input(format!(
                "stage '{}' produces nothing to publish",
                stage
            )));
        }

        let owned: PathBuf = path.to_path_buf();
        let content_hash = tokio::task::spawn_blocking(move || compute_file_checksum(owned))
            .await
            .map_err(|e| CliError::Io(std::io::Error::other(e)))??;

        let _guard = self.publish_lock.lock().await;
        let key = CacheKey::artifact(source_remote_id, stage);

        if let Some(existing) = self
            .status
            .find_published(source_remote_id, stage, &content_hash)
            .await?
        {
            debug!(published = %existing.published_remote_id, "Identical content already published");
            self.ledger.mark_published(&key).await?;
            return Ok(existing);
        }

        let folder = remote::parent_folder(source_remote_id);
        let name = published_name(source_remote_id, stage);
        if remote::join_key(folder, &name) == source_remote_id {
            return Err(CliError::invalid_input(format!(
                "publishing {} for '{}' would overwrite the source",
                stage, source_remote_id
            )));
        }
        let published_remote_id = self.remote.put(path, folder, &name).await?;

        let artifact = PublishedArtifact {
            source_remote_id: source_remote_id.to_string(),
            stage,
            content_hash,
            published_remote_id,
            published_at: Utc::now(),
        };
        self.status.record_published(&artifact).await?;
        self.ledger.mark_published(&key).await?;

        info!(
            published = %artifact.published_remote_id,
            hash = %artifact.content_hash,
            "Artifact published"
        );
        Ok(artifact)
    }
}

/// Remote file name of a derived artifact: the full source file name with
/// the stage's extension appended (`talks/keynote.mp4` + Transcribe ->
/// `keynote.mp4.txt`). Keeping the source extension means neither the
/// source itself nor a sibling sharing its stem can be addressed.
pub fn published_name(source_remote_id: &str, stage: Stage) -> String {
    let source_name = remote::file_name(source_remote_id);
    match stage.artifact_extension() {
        Some(ext) => format!("{}.{}", source_name, ext),
        None => format!("{}.{}", source_name, stage),
    }
}
