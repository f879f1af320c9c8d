//! Stage functions for the fixed media pipeline
//!
//! The first planned stage consumes the resolved source. Each later
//! derived stage consumes the output of the nearest earlier planned
//! derived stage. `Publish` uploads every derived artifact of the group.

use crate::cache::{CacheEntry, CacheKey, CacheLedger};
use crate::publisher::ArtifactPublisher;
use crate::queue::{ProcessingTask, StageRunner, TaskGroup};
use crate::resolver::PathResolver;
use crate::transform::{StageError, StageResult, Transformers};
use async_trait::async_trait;
use mediaq_common::Stage;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

pub struct Pipeline {
    resolver: Arc<PathResolver>,
    transformers: Transformers,
    publisher: Arc<ArtifactPublisher>,
}

impl Pipeline {
    pub fn new(
        resolver: Arc<PathResolver>,
        transformers: Transformers,
        publisher: Arc<ArtifactPublisher>,
    ) -> Self {
        Self {
            resolver,
            transformers,
            publisher,
        }
    }

    fn ledger(&self) -> &CacheLedger {
        self.resolver.ledger()
    }

    /// Local output of `stage` for the group's object, if it exists on disk
    async fn existing_artifact(&self, group: &TaskGroup, stage: Stage) -> StageResult<PathBuf> {
        let remote_id = &group.object.remote_id;
        let path = self
            .ledger()
            .layout()
            .artifact_path(stage, remote_id)
            .ok_or_else(|| StageError::fatal(format!("stage {} has no artifact", stage)))?;

        if !path.exists() {
            return Err(StageError::fatal(format!(
                "{} output for '{}' is missing from the cache; resubmit the group",
                stage, remote_id
            )));
        }
        self.ledger()
            .touch(&CacheKey::artifact(remote_id.as_str(), stage))
            .await?;
        Ok(path)
    }

    async fn input_for(&self, group: &TaskGroup, stage: Stage) -> StageResult<PathBuf> {
        match group.input_stage_for(stage) {
            Some(previous) => self.existing_artifact(group, previous).await,
            None => {
                let resolved = self.resolver.resolve(&group.object).await?;
                debug!(origin = %resolved.origin, cache_hit = resolved.cache_hit, "Input resolved");
                Ok(resolved.path)
            },
        }
    }

    async fn transform(&self, group: &TaskGroup, stage: Stage) -> StageResult {
        let remote_id = &group.object.remote_id;
        let transformer = self
            .transformers
            .for_stage(stage)
            .ok_or_else(|| StageError::fatal(format!("no transformer for stage {}", stage)))?;

        let input = self.input_for(group, stage).await?;

        let layout = self.ledger().layout();
        let dest = layout
            .artifact_path(stage, remote_id)
            .ok_or_else(|| StageError::fatal(format!("stage {} has no artifact", stage)))?;
        let staging = layout.staging_path(stage.artifact_extension());

        if let Err(e) = transformer.transform(&input, &staging).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(e);
        }

        layout.commit(&staging, &dest)?;
        let size = tokio::fs::metadata(&dest).await?.len();
        self.ledger()
            .record(CacheEntry::artifact(remote_id.as_str(), stage, dest.clone(), size))
            .await?;

        info!(remote_id = %remote_id, stage = %stage, bytes = size, "Artifact written");
        Ok(())
    }

    async fn publish_all(&self, group: &TaskGroup) -> StageResult {
        let stages: Vec<Stage> = group.derived_stages().collect();
        if stages.is_empty() {
            return Err(StageError::fatal(
                "publish requested without a convert, transcribe or summarize stage",
            ));
        }

        for stage in stages {
            let path = self.existing_artifact(group, stage).await?;
            let artifact = self
                .publisher
                .publish(&path, &group.object.remote_id, stage)
                .await?;
            debug!(stage = %stage, published = %artifact.published_remote_id, "Published");
        }
        Ok(())
    }
}

#[async_trait]
impl StageRunner for Pipeline {
    async fn run(&self, group: &TaskGroup, task: &ProcessingTask) -> StageResult {
        match task.stage {
            Stage::Publish => self.publish_all(group).await,
            stage => self.transform(group, stage).await,
        }
    }
}
