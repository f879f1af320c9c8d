//! Status persistence
//!
//! Every task transition is upserted here, keyed by task id, so external
//! observers see attempts and errors live. The queue reads it back only
//! on restart.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStatusStore;
pub use sqlite::SqliteStatusStore;

use crate::error::Result;
use crate::publisher::PublishedArtifact;
use crate::queue::{GroupStatus, ProcessingTask, TaskGroup};
use async_trait::async_trait;
use mediaq_common::Stage;
use uuid::Uuid;

#[async_trait]
pub trait StatusStore: Send + Sync {
    async fn upsert_group(&self, group: &TaskGroup) -> Result<()>;

    /// Insert or replace the row for `task.id`
    async fn upsert_task(&self, task: &ProcessingTask) -> Result<()>;

    async fn group_status(&self, group_id: Uuid) -> Result<Option<GroupStatus>>;

    /// Most recently created groups first
    async fn recent_groups(&self, limit: usize) -> Result<Vec<GroupStatus>>;

    /// Groups without `finished_at`, oldest first
    async fn load_unfinished_groups(&self) -> Result<Vec<GroupStatus>>;

    async fn find_published(
        &self,
        source_remote_id: &str,
        stage: Stage,
        content_hash: &str,
    ) -> Result<Option<PublishedArtifact>>;

    async fn record_published(&self, artifact: &PublishedArtifact) -> Result<()>;
}
