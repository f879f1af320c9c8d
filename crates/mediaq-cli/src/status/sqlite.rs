//! SQLite status store
//!
//! One row per task keyed by task id, one per group, and one per published
//! artifact. The schema is created on open.

use super::StatusStore;
use crate::error::Result;
use crate::publisher::PublishedArtifact;
use crate::queue::{GroupStatus, ProcessingTask, TaskGroup};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mediaq_common::{RemoteObjectRef, Stage, TaskStatus};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, instrument};
use uuid::Uuid;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS task_groups (
        id TEXT PRIMARY KEY,
        remote_id TEXT NOT NULL,
        display_name TEXT NOT NULL,
        expected_size INTEGER,
        path_hint TEXT,
        stages TEXT NOT NULL,
        description TEXT,
        priority INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        finished_at TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS tasks (
        id TEXT PRIMARY KEY,
        group_id TEXT NOT NULL REFERENCES task_groups(id),
        remote_id TEXT NOT NULL,
        stage TEXT NOT NULL,
        status TEXT NOT NULL,
        attempt_count INTEGER NOT NULL,
        last_error TEXT,
        next_retry_at TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_tasks_group ON tasks(group_id)",
    r#"
    CREATE TABLE IF NOT EXISTS published_artifacts (
        source_remote_id TEXT NOT NULL,
        stage TEXT NOT NULL,
        content_hash TEXT NOT NULL,
        published_remote_id TEXT NOT NULL,
        published_at TEXT NOT NULL,
        PRIMARY KEY (source_remote_id, stage, content_hash)
    )
    "#,
];

pub struct SqliteStatusStore {
    pool: SqlitePool,
}

impl SqliteStatusStore {
    /// Open (creating if needed) the database at `path`
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        debug!(path = %path.display(), "Status database opened");
        Ok(store)
    }

    /// Private in-memory database
    pub async fn in_memory() -> Result<Self> {
        // Each in-memory connection is its own database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn tasks_for(&self, group_id: Uuid) -> Result<Vec<ProcessingTask>> {
        let rows = sqlx::query(
            r#"
            SELECT id, group_id, remote_id, stage, status, attempt_count,
                   last_error, next_retry_at, created_at, updated_at
            FROM tasks WHERE group_id = ?1
            "#,
        )
        .bind(group_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut tasks = rows.iter().map(task_from_row).collect::<Result<Vec<_>>>()?;
        tasks.sort_by_key(|t| t.stage);
        Ok(tasks)
    }

    async fn with_tasks(&self, groups: Vec<TaskGroup>) -> Result<Vec<GroupStatus>> {
        let mut statuses = Vec::with_capacity(groups.len());
        for group in groups {
            let tasks = self.tasks_for(group.id).await?;
            statuses.push(GroupStatus { group, tasks });
        }
        Ok(statuses)
    }
}

#[async_trait]
impl StatusStore for SqliteStatusStore {
    #[instrument(skip(self, group), fields(group_id = %group.id))]
    async fn upsert_group(&self, group: &TaskGroup) -> Result<()> {
        let stages = group
            .stages
            .iter()
            .map(Stage::as_str)
            .collect::<Vec<_>>()
            .join(",");

        sqlx::query(
            r#"
            INSERT INTO task_groups (id, remote_id, display_name, expected_size, path_hint,
                                     stages, description, priority, created_at, finished_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(id) DO UPDATE SET
                stages = excluded.stages,
                description = excluded.description,
                priority = excluded.priority,
                finished_at = excluded.finished_at
            "#,
        )
        .bind(group.id.to_string())
        .bind(&group.object.remote_id)
        .bind(&group.object.display_name)
        .bind(group.object.expected_size_bytes.map(|s| s as i64))
        .bind(&group.object.path_hint)
        .bind(stages)
        .bind(&group.description)
        .bind(group.priority as i64)
        .bind(group.created_at)
        .bind(group.finished_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self, task), fields(task_id = %task.id, status = %task.status))]
    async fn upsert_task(&self, task: &ProcessingTask) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tasks (id, group_id, remote_id, stage, status, attempt_count,
                               last_error, next_retry_at, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                attempt_count = excluded.attempt_count,
                last_error = excluded.last_error,
                next_retry_at = excluded.next_retry_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(task.id.to_string())
        .bind(task.group_id.to_string())
        .bind(&task.remote_id)
        .bind(task.stage.as_str())
        .bind(task.status.as_str())
        .bind(task.attempt_count as i64)
        .bind(&task.last_error)
        .bind(task.next_retry_at)
        .bind(task.created_at)
        .bind(task.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn group_status(&self, group_id: Uuid) -> Result<Option<GroupStatus>> {
        let row = sqlx::query("SELECT * FROM task_groups WHERE id = ?1")
            .bind(group_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let group = group_from_row(&row)?;
                let tasks = self.tasks_for(group.id).await?;
                Ok(Some(GroupStatus { group, tasks }))
            },
            None => Ok(None),
        }
    }

    async fn recent_groups(&self, limit: usize) -> Result<Vec<GroupStatus>> {
        let rows = sqlx::query("SELECT * FROM task_groups ORDER BY created_at DESC LIMIT ?1")
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        let groups = rows.iter().map(group_from_row).collect::<Result<Vec<_>>>()?;
        self.with_tasks(groups).await
    }

    async fn load_unfinished_groups(&self) -> Result<Vec<GroupStatus>> {
        let rows = sqlx::query(
            "SELECT * FROM task_groups WHERE finished_at IS NULL ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        let groups = rows.iter().map(group_from_row).collect::<Result<Vec<_>>>()?;
        self.with_tasks(groups).await
    }

    async fn find_published(
        &self,
        source_remote_id: &str,
        stage: Stage,
        content_hash: &str,
    ) -> Result<Option<PublishedArtifact>> {
        let row = sqlx::query(
            r#"
            SELECT source_remote_id, stage, content_hash, published_remote_id, published_at
            FROM published_artifacts
            WHERE source_remote_id = ?1 AND stage = ?2 AND content_hash = ?3
            "#,
        )
        .bind(source_remote_id)
        .bind(stage.as_str())
        .bind(content_hash)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(published_from_row).transpose()
    }

    async fn record_published(&self, artifact: &PublishedArtifact) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO published_artifacts
                (source_remote_id, stage, content_hash, published_remote_id, published_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(&artifact.source_remote_id)
        .bind(artifact.stage.as_str())
        .bind(&artifact.content_hash)
        .bind(&artifact.published_remote_id)
        .bind(artifact.published_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn decode_err<E>(err: E) -> sqlx::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    sqlx::Error::Decode(Box::new(err))
}

fn parse_uuid(raw: &str) -> Result<Uuid> {
    Ok(Uuid::parse_str(raw).map_err(decode_err)?)
}

fn group_from_row(row: &SqliteRow) -> Result<TaskGroup> {
    let stages = row
        .try_get::<String, _>("stages")?
        .split(',')
        .filter(|s| !s.is_empty())
        .map(Stage::from_str)
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut object = RemoteObjectRef::new(
        row.try_get::<String, _>("remote_id")?,
        row.try_get::<String, _>("display_name")?,
    );
    object.expected_size_bytes = row
        .try_get::<Option<i64>, _>("expected_size")?
        .map(|s| s as u64);
    object.path_hint = row.try_get("path_hint")?;

    Ok(TaskGroup {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        object,
        stages,
        description: row.try_get("description")?,
        priority: row.try_get::<i64, _>("priority")? as i32,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        finished_at: row.try_get::<Option<DateTime<Utc>>, _>("finished_at")?,
    })
}

fn task_from_row(row: &SqliteRow) -> Result<ProcessingTask> {
    Ok(ProcessingTask {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        group_id: parse_uuid(&row.try_get::<String, _>("group_id")?)?,
        remote_id: row.try_get("remote_id")?,
        stage: Stage::from_str(&row.try_get::<String, _>("stage")?)?,
        status: TaskStatus::from_str(&row.try_get::<String, _>("status")?)?,
        attempt_count: row.try_get::<i64, _>("attempt_count")? as u32,
        last_error: row.try_get("last_error")?,
        next_retry_at: row.try_get::<Option<DateTime<Utc>>, _>("next_retry_at")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
    })
}

fn published_from_row(row: &SqliteRow) -> Result<PublishedArtifact> {
    Ok(PublishedArtifact {
        source_remote_id: row.try_get("source_remote_id")?,
        stage: Stage::from_str(&row.try_get::<String, _>("stage")?)?,
        content_hash: row.try_get("content_hash")?,
        published_remote_id: row.try_get("published_remote_id")?,
        published_at: row.try_get::<DateTime<Utc>, _>("published_at")?,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_task_upsert_replaces_row() {
        let store = SqliteStatusStore::in_memory().await.unwrap();
        let group = TaskGroup::new(
            RemoteObjectRef::new("talks/a.mp4", "a.mp4").with_expected_size(42),
            &[Stage::Convert, Stage::Transcribe],
        )
        .with_priority(5);
        store.upsert_group(&group).await.unwrap();

        let mut task = ProcessingTask::new(group.id, "talks/a.mp4", Stage::Convert);
        store.upsert_task(&task).await.unwrap();
        task.start();
        store.upsert_task(&task).await.unwrap();
        task.fail_fatal("unsupported codec");
        store.upsert_task(&task).await.unwrap();

        let status = store.group_status(group.id).await.unwrap().unwrap();
        assert_eq!(status.group.stages, vec![Stage::Convert, Stage::Transcribe]);
        assert_eq!(status.group.priority, 5);
        assert_eq!(status.group.object.expected_size_bytes, Some(42));
        assert_eq!(status.tasks.len(), 1);
        assert_eq!(status.tasks[0].status, TaskStatus::Failed);
        assert_eq!(status.tasks[0].last_error.as_deref(), Some("unsupported codec"));
    }

    #[tokio::test]
    async fn test_unfinished_groups() {
        let store = SqliteStatusStore::in_memory().await.unwrap();
        let open = TaskGroup::new(RemoteObjectRef::new("a", "a.mp4"), &[Stage::Convert]);
        let mut done = TaskGroup::new(RemoteObjectRef::new("b", "b.mp4"), &[Stage::Convert]);
        done.finished_at = Some(Utc::now());
        store.upsert_group(&open).await.unwrap();
        store.upsert_group(&done).await.unwrap();

        let unfinished = store.load_unfinished_groups().await.unwrap();
        assert_eq!(unfinished.len(), 1);
        assert_eq!(unfinished[0].group.id, open.id);
        assert_eq!(store.recent_groups(10).await.unwrap().len(), 2);
        assert!(store.group_status(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_published_lookup_by_hash() {
        let store = SqliteStatusStore::in_memory().await.unwrap();
        let artifact = PublishedArtifact {
            source_remote_id: "talks/a.mp4".to_string(),
            stage: Stage::Transcribe,
            content_hash: "abc".to_string(),
            published_remote_id: "talks/a.txt".to_string(),
            published_at: Utc::now(),
        };
        store.record_published(&artifact).await.unwrap();
        store.record_published(&artifact).await.unwrap();

        let found = store
            .find_published("talks/a.mp4", Stage::Transcribe, "abc")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.published_remote_id, "talks/a.txt");
        assert!(store
            .find_published("talks/a.mp4", Stage::Transcribe, "other")
            .await
            .unwrap()
            .is_none());
    }
}
