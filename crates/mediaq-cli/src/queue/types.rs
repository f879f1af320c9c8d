//! Task, group and policy types for the processing queue

use crate::transform::StageResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mediaq_common::{RemoteObjectRef, Stage, TaskStatus};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

// ============================================================================
// Retry policy
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Backoff before retry number `attempt` (1-based):
    /// `base_delay * 2^(attempt-1)`, capped at `max_delay`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: crate::config::DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_secs(crate::config::DEFAULT_BASE_DELAY_SECS),
            max_delay: Duration::from_secs(crate::config::DEFAULT_MAX_DELAY_SECS),
        }
    }
}

/// Worker pool settings
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub max_concurrency: usize,
    pub retry: RetryPolicy,
    /// Deadline for one stage execution; overrunning counts as a retriable failure
    pub stage_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrency: crate::config::DEFAULT_MAX_CONCURRENCY,
            retry: RetryPolicy::default(),
            stage_timeout: Duration::from_secs(crate::config::DEFAULT_STAGE_TIMEOUT_SECS),
        }
    }
}

// ============================================================================
// Tasks
// ============================================================================

/// One `(remote_id, stage)` unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingTask {
    pub id: Uuid,
    pub group_id: Uuid,
    pub remote_id: String,
    pub stage: Stage,
    pub status: TaskStatus,
    pub attempt_count: u32,
    pub last_error: Option<String>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProcessingTask {
    pub fn new(group_id: Uuid, remote_id: impl Into<String>, stage: Stage) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            group_id,
            remote_id: remote_id.into(),
            stage,
            status: TaskStatus::Pending,
            attempt_count: 0,
            last_error: None,
            next_retry_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn start(&mut self) {
        self.status = TaskStatus::Running;
        self.updated_at = Utc::now();
    }

    pub fn succeed(&mut self) {
        self.status = TaskStatus::Succeeded;
        self.next_retry_at = None;
        self.updated_at = Utc::now();
    }

    /// Record a retriable failure.
    ///
    /// Returns the backoff delay when the task goes back to `Pending`, or
    /// `None` once the retry budget is spent and the task is `Exhausted`.
    pub fn fail_retriable(&mut self, error: impl Into<String>, policy: &RetryPolicy) -> Option<Duration> {
        let now = Utc::now();
        self.attempt_count += 1;
        self.last_error = Some(error.into());
        self.updated_at = now;

        if self.attempt_count <= policy.max_retries {
            let delay = policy.delay_for(self.attempt_count);
            self.status = TaskStatus::Pending;
            self.next_retry_at = chrono::Duration::from_std(delay).ok().map(|d| now + d);
            Some(delay)
        } else {
            self.status = TaskStatus::Exhausted;
            self.next_retry_at = None;
            None
        }
    }

    /// Record a fatal failure; the retry budget is untouched
    pub fn fail_fatal(&mut self, error: impl Into<String>) {
        self.status = TaskStatus::Failed;
        self.last_error = Some(error.into());
        self.next_retry_at = None;
        self.updated_at = Utc::now();
    }

    /// Reset a task interrupted by a restart
    pub fn requeue_interrupted(&mut self) {
        if self.status == TaskStatus::Running {
            self.status = TaskStatus::Pending;
            self.updated_at = Utc::now();
        }
    }
}

// ============================================================================
// Groups
// ============================================================================

/// All stages requested for one remote object by a single `submit`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskGroup {
    pub id: Uuid,
    pub object: RemoteObjectRef,
    /// Planned stages, deduplicated and in pipeline order
    pub stages: Vec<Stage>,
    pub description: Option<String>,
    /// Higher runs first
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TaskGroup {
    pub fn new(object: RemoteObjectRef, stages: &[Stage]) -> Self {
        Self {
            id: Uuid::new_v4(),
            object,
            stages: Stage::normalize(stages),
            description: None,
            priority: 0,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn first_stage(&self) -> Option<Stage> {
        self.stages.first().copied()
    }

    /// The planned stage after `stage`, if any
    pub fn next_stage(&self, stage: Stage) -> Option<Stage> {
        self.stages.iter().copied().find(|s| *s > stage)
    }

    /// The nearest planned stage before `stage` that produces an artifact
    pub fn input_stage_for(&self, stage: Stage) -> Option<Stage> {
        self.stages
            .iter()
            .copied()
            .filter(|s| *s < stage && s.produces_artifact())
            .last()
    }

    /// Planned stages whose outputs get published
    pub fn derived_stages(&self) -> impl Iterator<Item = Stage> + '_ {
        self.stages.iter().copied().filter(Stage::produces_artifact)
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }
}

/// A group with the latest state of each task
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupStatus {
    pub group: TaskGroup,
    /// At most one task per stage, in pipeline order
    pub tasks: Vec<ProcessingTask>,
}

impl GroupStatus {
    /// Status of every planned stage; `None` when not yet enqueued
    pub fn stage_statuses(&self) -> Vec<(Stage, Option<&ProcessingTask>)> {
        self.group
            .stages
            .iter()
            .map(|stage| (*stage, self.tasks.iter().find(|t| t.stage == *stage)))
            .collect()
    }

    /// Roll-up used in listings
    pub fn overall(&self) -> TaskStatus {
        if let Some(failed) = self
            .tasks
            .iter()
            .find(|t| matches!(t.status, TaskStatus::Failed | TaskStatus::Exhausted))
        {
            return failed.status;
        }
        if self.tasks.iter().any(|t| t.status == TaskStatus::Running) {
            return TaskStatus::Running;
        }
        let all_done = self
            .stage_statuses()
            .iter()
            .all(|(_, task)| task.is_some_and(|t| t.status == TaskStatus::Succeeded));
        if all_done {
            TaskStatus::Succeeded
        } else {
            TaskStatus::Pending
        }
    }
}

// ============================================================================
// Stats and the stage contract
// ============================================================================

/// Counts over every task the queue has seen this run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub succeeded: usize,
    /// `Failed` plus `Exhausted`
    pub failed: usize,
}

/// Executes one stage for one task
#[async_trait]
pub trait StageRunner: Send + Sync {
    async fn run(&self, group: &TaskGroup, task: &ProcessingTask) -> StageResult;
}
