//! In-process status store
//!
//! Keeps the latest row per task plus the full upsert history, which tests
//! use to observe every transition.

use super::StatusStore;
use crate::error::Result;
use crate::publisher::PublishedArtifact;
use crate::queue::{GroupStatus, ProcessingTask, TaskGroup};
use async_trait::async_trait;
use mediaq_common::Stage;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    groups: HashMap<Uuid, TaskGroup>,
    tasks: HashMap<Uuid, ProcessingTask>,
    history: Vec<ProcessingTask>,
    published: Vec<PublishedArtifact>,
}

#[derive(Default)]
pub struct MemoryStatusStore {
    inner: Mutex<Inner>,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every task upsert in arrival order
    pub fn history(&self) -> Vec<ProcessingTask> {
        self.lock().history.clone()
    }

    /// Upserts for one task in arrival order
    pub fn history_for(&self, task_id: Uuid) -> Vec<ProcessingTask> {
        self.lock()
            .history
            .iter()
            .filter(|t| t.id == task_id)
            .cloned()
            .collect()
    }

    pub fn published(&self) -> Vec<PublishedArtifact> {
        self.lock().published.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned lock only means a panicking test thread; the data is intact
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn status_of(inner: &Inner, group: &TaskGroup) -> GroupStatus {
        let mut tasks: Vec<ProcessingTask> = inner
            .tasks
            .values()
            .filter(|t| t.group_id == group.id)
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.stage);
        GroupStatus {
            group: group.clone(),
            tasks,
        }
    }
}

#[async_trait]
impl StatusStore for MemoryStatusStore {
    async fn upsert_group(&self, group: &TaskGroup) -> Result<()> {
        self.lock().groups.insert(group.id, group.clone());
        Ok(())
    }

    async fn upsert_task(&self, task: &ProcessingTask) -> Result<()> {
        let mut inner = self.lock();
        inner.tasks.insert(task.id, task.clone());
        inner.history.push(task.clone());
        Ok(())
    }

    async fn group_status(&self, group_id: Uuid) -> Result<Option<GroupStatus>> {
        let inner = self.lock();
        Ok(inner.groups.get(&group_id).map(|g| Self::status_of(&inner, g)))
    }

    async fn recent_groups(&self, limit: usize) -> Result<Vec<GroupStatus>> {
        let inner = self.lock();
        let mut groups: Vec<&TaskGroup> = inner.groups.values().collect();
        groups.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(groups
            .into_iter()
            .take(limit)
            .map(|g| Self::status_of(&inner, g))
            .collect())
    }

    async fn load_unfinished_groups(&self) -> Result<Vec<GroupStatus>> {
        let inner = self.lock();
        let mut groups: Vec<&TaskGroup> = inner.groups.values().filter(|g| !g.is_finished()).collect();
        groups.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(groups.into_iter().map(|g| Self::status_of(&inner, g)).collect())
    }

    async fn find_published(
        &self,
        source_remote_id: &str,
        stage: Stage,
        content_hash: &str,
    ) -> Result<Option<PublishedArtifact>> {
        Ok(self
            .lock()
            .published
            .iter()
            .find(|p| {
                p.source_remote_id == source_remote_id
                    && p.stage == stage
                    && p.content_hash == content_hash
            })
            .cloned())
    }

    async fn record_published(&self, artifact: &PublishedArtifact) -> Result<()> {
        self.lock().published.push(artifact.clone());
        Ok(())
    }
}
