//! In-process processing queue
//!
//! A fixed pool of `max_concurrency` workers claims ready `Pending` tasks
//! (highest group priority first, FIFO within a priority) and runs one
//! stage per claim. Outcomes come back as a typed [`StageResult`]: success
//! enqueues the group's next planned stage, a retriable failure re-queues
//! the task behind an exponential backoff gate, and a fatal failure or
//! exhausted retry budget ends the group.
//!
//! Every transition is upserted to the [`StatusStore`] while the queue
//! lock is held, so the store never sees transitions out of order.

pub mod types;
mod worker;

pub use types::{
    GroupStatus, ProcessingTask, QueueConfig, QueueStats, RetryPolicy, StageRunner, TaskGroup,
};

use crate::error::{CliError, Result};
use crate::status::StatusStore;
use crate::transform::{StageError, StageResult};
use chrono::Utc;
use mediaq_common::{RemoteObjectRef, Stage, TaskStatus};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// A live task plus its scheduling keys
struct QueuedTask {
    task: ProcessingTask,
    priority: i32,
    seq: u64,
    ready_at: Instant,
}

#[derive(Default)]
struct QueueState {
    groups: HashMap<Uuid, TaskGroup>,
    /// Pending and running tasks only; terminal tasks live in the status store
    tasks: HashMap<Uuid, QueuedTask>,
    next_seq: u64,
    succeeded: usize,
    failed: usize,
}

/// What a worker got from [`QueueInner::claim`]
enum Claim {
    Task(ProcessingTask, TaskGroup),
    /// Nothing ready; the earliest backoff gate, if any task is waiting on one
    Wait(Option<Instant>),
}

struct QueueInner {
    config: QueueConfig,
    runner: Arc<dyn StageRunner>,
    status: Arc<dyn StatusStore>,
    state: Mutex<QueueState>,
    wake: Notify,
    shutdown: CancellationToken,
    active: watch::Sender<usize>,
}

pub struct TaskQueue {
    inner: Arc<QueueInner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskQueue {
    pub fn new(
        config: QueueConfig,
        runner: Arc<dyn StageRunner>,
        status: Arc<dyn StatusStore>,
    ) -> Self {
        let (active, _) = watch::channel(0);
        Self {
            inner: Arc::new(QueueInner {
                config,
                runner,
                status,
                state: Mutex::new(QueueState::default()),
                wake: Notify::new(),
                shutdown: CancellationToken::new(),
                active,
            }),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the worker pool; a second call is a no-op
    pub async fn start(&self) {
        let mut workers = self.workers.lock().await;
        if !workers.is_empty() || self.inner.shutdown.is_cancelled() {
            return;
        }
        let size = self.inner.config.max_concurrency.max(1);
        for worker_id in 0..size {
            let inner = Arc::clone(&self.inner);
            workers.push(tokio::spawn(worker::run(inner, worker_id)));
        }
        info!(workers = size, "Task queue started");
    }

    /// Plan `stages` for `object` and enqueue the first one
    pub async fn enqueue(&self, object: RemoteObjectRef, stages: &[Stage]) -> Result<Uuid> {
        self.enqueue_group(TaskGroup::new(object, stages)).await
    }

    /// Enqueue a prepared group
    pub async fn enqueue_group(&self, group: TaskGroup) -> Result<Uuid> {
        let Some(first) = group.first_stage() else {
            return Err(CliError::invalid_input("at least one stage must be requested"));
        };
        if self.inner.shutdown.is_cancelled() {
            return Err(CliError::invalid_input("task queue is shut down"));
        }

        let mut state = self.inner.state.lock().await;
        self.inner.persist_group(&group).await;

        let task = ProcessingTask::new(group.id, &group.object.remote_id, first);
        let group_id = group.id;
        info!(
            group_id = %group_id,
            remote_id = %group.object.remote_id,
            stages = ?group.stages,
            priority = group.priority,
            "Task group enqueued"
        );
        state.groups.insert(group_id, group);
        self.inner.insert_task(&mut state, task, Instant::now()).await;
        self.inner.publish_active(&state);
        drop(state);

        self.inner.wake.notify_waiters();
        Ok(group_id)
    }

    /// Reload unfinished groups from the status store.
    ///
    /// `Running` tasks are reset to `Pending`; a group whose last task
    /// succeeded gets its next stage enqueued. Returns the number of groups
    /// put back to work.
    pub async fn restore(&self) -> Result<usize> {
        let unfinished = self.inner.status.load_unfinished_groups().await?;
        let mut state = self.inner.state.lock().await;
        let mut restored = 0;

        for GroupStatus { mut group, tasks } in unfinished {
            if state.groups.contains_key(&group.id) {
                continue;
            }

            if tasks.iter().any(|t| matches!(t.status, TaskStatus::Failed | TaskStatus::Exhausted)) {
                group.finished_at = Some(Utc::now());
                self.inner.persist_group(&group).await;
                continue;
            }

            let resume = match tasks.iter().find(|t| !t.status.is_terminal()) {
                Some(live) => {
                    let mut task = live.clone();
                    task.requeue_interrupted();
                    Some(task)
                },
                None => {
                    let next = match tasks.iter().map(|t| t.stage).max() {
                        Some(last) => group.next_stage(last),
                        None => group.first_stage(),
                    };
                    next.map(|stage| ProcessingTask::new(group.id, &group.object.remote_id, stage))
                },
            };

            let Some(task) = resume else {
                group.finished_at = Some(Utc::now());
                self.inner.persist_group(&group).await;
                continue;
            };

            let ready_at = task
                .next_retry_at
                .and_then(|at| (at - Utc::now()).to_std().ok())
                .map_or_else(Instant::now, |wait| Instant::now() + wait);

            debug!(group_id = %group.id, stage = %task.stage, attempt = task.attempt_count, "Restoring task");
            state.groups.insert(group.id, group);
            self.inner.insert_task(&mut state, task, ready_at).await;
            restored += 1;
        }

        self.inner.publish_active(&state);
        drop(state);

        if restored > 0 {
            info!(groups = restored, "Restored unfinished task groups");
            self.inner.wake.notify_waiters();
        }
        Ok(restored)
    }

    pub async fn stats(&self) -> QueueStats {
        let state = self.inner.state.lock().await;
        let running = state
            .tasks
            .values()
            .filter(|q| q.task.status == TaskStatus::Running)
            .count();
        let pending = state.tasks.len() - running;
        QueueStats {
            total: pending + running + state.succeeded + state.failed,
            pending,
            running,
            succeeded: state.succeeded,
            failed: state.failed,
        }
    }

    /// Latest persisted state of every stage of a group
    pub async fn query_status(&self, group_id: Uuid) -> Result<GroupStatus> {
        self.inner
            .status
            .group_status(group_id)
            .await?
            .ok_or_else(|| CliError::GroupNotFound(group_id.to_string()))
    }

    /// Resolve once no task is pending or running
    pub async fn wait_idle(&self) {
        let mut active = self.inner.active.subscribe();
        // The sender lives in `inner`, which outlives this borrow
        let _ = active.wait_for(|n| *n == 0).await;
    }

    /// Stop claiming new tasks, let in-flight stages finish, join workers
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        self.inner.wake.notify_waiters();

        let handles: Vec<JoinHandle<()>> = self.workers.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Queue worker panicked");
            }
        }
        info!("Task queue stopped");
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }
}

impl QueueInner {
    async fn persist_task(&self, task: &ProcessingTask) {
        if let Err(e) = self.status.upsert_task(task).await {
            warn!(task_id = %task.id, error = %e, "Failed to persist task status");
        }
    }

    async fn persist_group(&self, group: &TaskGroup) {
        if let Err(e) = self.status.upsert_group(group).await {
            warn!(group_id = %group.id, error = %e, "Failed to persist task group");
        }
    }

    async fn insert_task(&self, state: &mut QueueState, task: ProcessingTask, ready_at: Instant) {
        self.persist_task(&task).await;
        let priority = state.groups.get(&task.group_id).map_or(0, |g| g.priority);
        let seq = state.next_seq;
        state.next_seq += 1;
        state.tasks.insert(
            task.id,
            QueuedTask {
                task,
                priority,
                seq,
                ready_at,
            },
        );
    }

    fn publish_active(&self, state: &QueueState) {
        self.active.send_replace(state.tasks.len());
    }

    /// Claim the best ready task and mark it `Running`.
    ///
    /// At most one stage per remote id runs at a time, across groups, since
    /// every group for that id reads and writes the same cache files. Tasks
    /// held back that way are woken by the completion of the running one.
    async fn claim(&self) -> Claim {
        let mut state = self.state.lock().await;
        let now = Instant::now();

        let busy: HashSet<&str> = state
            .tasks
            .values()
            .filter(|q| q.task.status == TaskStatus::Running)
            .map(|q| q.task.remote_id.as_str())
            .collect();
        let claimable = |q: &&QueuedTask| {
            q.task.status == TaskStatus::Pending && !busy.contains(q.task.remote_id.as_str())
        };

        let best = state
            .tasks
            .values()
            .filter(claimable)
            .filter(|q| q.ready_at <= now)
            .max_by(|a, b| a.priority.cmp(&b.priority).then(b.seq.cmp(&a.seq)))
            .map(|q| q.task.id);

        let Some(task_id) = best else {
            let gate = state
                .tasks
                .values()
                .filter(claimable)
                .map(|q| q.ready_at)
                .min();
            return Claim::Wait(gate);
        };

        let Some(queued) = state.tasks.get_mut(&task_id) else {
            return Claim::Wait(None);
        };
        queued.task.start();
        let task = queued.task.clone();
        self.persist_task(&task).await;

        let group = state.groups.get(&task.group_id).cloned();
        match group {
            Some(group) => Claim::Task(task, group),
            None => {
                error!(task_id = %task.id, "Task has no group, dropping");
                state.tasks.remove(&task.id);
                self.publish_active(&state);
                Claim::Wait(None)
            },
        }
    }

    /// Run one claimed stage under its deadline
    async fn execute(&self, task: ProcessingTask, group: TaskGroup) {
        debug!(
            task_id = %task.id,
            remote_id = %task.remote_id,
            stage = %task.stage,
            attempt = task.attempt_count,
            "Running stage"
        );

        let timeout = self.config.stage_timeout;
        let outcome = match tokio::time::timeout(timeout, self.runner.run(&group, &task)).await {
            Ok(result) => result,
            Err(_) => Err(StageError::retriable(format!(
                "stage {} exceeded its {}s deadline",
                task.stage,
                timeout.as_secs()
            ))),
        };

        self.complete(task.id, outcome).await;
    }

    /// Apply a stage outcome to the task and its group
    async fn complete(&self, task_id: Uuid, outcome: StageResult) {
        let mut state = self.state.lock().await;
        let Some(mut queued) = state.tasks.remove(&task_id) else {
            warn!(task_id = %task_id, "Completed task is no longer queued");
            return;
        };
        let group_id = queued.task.group_id;
        let mut group_done = false;

        match outcome {
            Ok(()) => {
                queued.task.succeed();
                self.persist_task(&queued.task).await;
                state.succeeded += 1;
                info!(task_id = %task_id, stage = %queued.task.stage, "Stage succeeded");

                let next = state
                    .groups
                    .get(&group_id)
                    .and_then(|g| g.next_stage(queued.task.stage));
                match next {
                    Some(stage) => {
                        let task = ProcessingTask::new(group_id, &queued.task.remote_id, stage);
                        self.insert_task(&mut state, task, Instant::now()).await;
                    },
                    None => group_done = true,
                }
            },
            Err(StageError::Retriable(msg)) => {
                match queued.task.fail_retriable(msg, &self.config.retry) {
                    Some(delay) => {
                        warn!(
                            task_id = %task_id,
                            stage = %queued.task.stage,
                            attempt = queued.task.attempt_count,
                            delay_secs = delay.as_secs_f64(),
                            error = queued.task.last_error.as_deref().unwrap_or_default(),
                            "Stage failed, retrying after backoff"
                        );
                        self.persist_task(&queued.task).await;
                        queued.ready_at = Instant::now() + delay;
                        state.tasks.insert(task_id, queued);
                    },
                    None => {
                        error!(
                            task_id = %task_id,
                            stage = %queued.task.stage,
                            attempts = queued.task.attempt_count,
                            error = queued.task.last_error.as_deref().unwrap_or_default(),
                            "Stage exhausted its retries"
                        );
                        self.persist_task(&queued.task).await;
                        state.failed += 1;
                        group_done = true;
                    },
                }
            },
            Err(StageError::Fatal(msg)) => {
                error!(task_id = %task_id, stage = %queued.task.stage, error = %msg, "Stage failed permanently");
                queued.task.fail_fatal(msg);
                self.persist_task(&queued.task).await;
                state.failed += 1;
                group_done = true;
            },
        }

        if group_done {
            if let Some(mut group) = state.groups.remove(&group_id) {
                group.finished_at = Some(Utc::now());
                self.persist_group(&group).await;
            }
        }

        self.publish_active(&state);
        drop(state);
        self.wake.notify_waiters();
    }
}
