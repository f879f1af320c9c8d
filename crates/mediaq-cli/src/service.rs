//! Wiring of resolver, ledger, queue and publisher behind the
//! caller-facing operations

use crate::cache::{CacheEntry, CacheLayout, CacheLedger, CacheStats, EvictionPolicy};
use crate::config::Config;
use crate::error::Result;
use crate::mirror::Mirror;
use crate::pipeline::Pipeline;
use crate::publisher::ArtifactPublisher;
use crate::queue::{GroupStatus, QueueConfig, QueueStats, TaskGroup, TaskQueue};
use crate::remote::{self, RemoteStore};
use crate::resolver::{PathResolver, Resolved};
use crate::status::{SqliteStatusStore, StatusStore};
use crate::transform::Transformers;
use mediaq_common::{RemoteObjectRef, Stage};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Options for a new task group
#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    pub description: Option<String>,
    pub priority: i32,
}

pub struct MediaService {
    ledger: Arc<CacheLedger>,
    resolver: Arc<PathResolver>,
    remote: Arc<dyn RemoteStore>,
    status: Arc<dyn StatusStore>,
    queue: TaskQueue,
}

impl MediaService {
    /// Build everything from configuration, with the SQLite status store
    pub async fn open(config: &Config) -> Result<Self> {
        let remote = remote::from_config(&config.remote)?;
        let status: Arc<dyn StatusStore> =
            Arc::new(SqliteStatusStore::open(&config.status_db_path()).await?);
        let transformers = Transformers::from_settings(&config.transform)?;
        Self::with_parts(config, remote, status, transformers).await
    }

    /// Build with explicit collaborators
    pub async fn with_parts(
        config: &Config,
        remote: Arc<dyn RemoteStore>,
        status: Arc<dyn StatusStore>,
        transformers: Transformers,
    ) -> Result<Self> {
        let layout = CacheLayout::new(config.cache.root.clone());
        let ledger = Arc::new(CacheLedger::open(layout, config.cache.retention()?).await?);

        let mirror = Mirror::from_config(&config.mirror);
        if let Some(mirror) = &mirror {
            debug!(root = %mirror.root().display(), available = mirror.is_available(), "Mirror configured");
        }

        let resolver = Arc::new(PathResolver::new(
            Arc::clone(&ledger),
            Arc::clone(&remote),
            mirror,
        ));
        let publisher = Arc::new(ArtifactPublisher::new(
            Arc::clone(&remote),
            Arc::clone(&status),
            Arc::clone(&ledger),
        ));
        let pipeline = Arc::new(Pipeline::new(Arc::clone(&resolver), transformers, publisher));

        let queue_config = QueueConfig {
            max_concurrency: config.queue.max_concurrency,
            retry: config.queue.retry_policy(),
            stage_timeout: config.queue.stage_timeout(),
        };
        let queue = TaskQueue::new(queue_config, pipeline, Arc::clone(&status));

        Ok(Self {
            ledger,
            resolver,
            remote,
            status,
            queue,
        })
    }

    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    pub fn ledger(&self) -> &Arc<CacheLedger> {
        &self.ledger
    }

    /// Fill in display name and size from the remote store where not given
    pub async fn object_ref(
        &self,
        remote_id: &str,
        display_name: Option<String>,
        path_hint: Option<String>,
        expected_size: Option<u64>,
    ) -> Result<RemoteObjectRef> {
        let described = match (&display_name, expected_size) {
            (Some(_), Some(_)) => None,
            _ => self.remote.describe(remote_id).await.unwrap_or_else(|e| {
                debug!(remote_id, error = %e, "Remote describe failed, using given details");
                None
            }),
        };

        let name = display_name
            .or_else(|| described.as_ref().map(|d| d.display_name.clone()))
            .unwrap_or_else(|| remote::file_name(remote_id).to_string());
        let mut object = RemoteObjectRef::new(remote_id, name);
        object.expected_size_bytes =
            expected_size.or_else(|| described.and_then(|d| d.expected_size_bytes));
        object.path_hint = path_hint;
        Ok(object)
    }

    fn group_for(object: RemoteObjectRef, stages: &[Stage], options: SubmitOptions) -> TaskGroup {
        TaskGroup::new(object, stages)
            .with_description(options.description)
            .with_priority(options.priority)
    }

    /// Enqueue a group on the live queue
    pub async fn submit(
        &self,
        object: RemoteObjectRef,
        stages: &[Stage],
        options: SubmitOptions,
    ) -> Result<Uuid> {
        self.queue
            .enqueue_group(Self::group_for(object, stages, options))
            .await
    }

    /// Persist a group as pending for a later `run`, without processing it
    pub async fn plan(
        &self,
        object: RemoteObjectRef,
        stages: &[Stage],
        options: SubmitOptions,
    ) -> Result<Uuid> {
        let group = Self::group_for(object, stages, options);
        if group.stages.is_empty() {
            return Err(crate::error::CliError::invalid_input(
                "at least one stage must be requested",
            ));
        }
        self.status.upsert_group(&group).await?;
        info!(group_id = %group.id, "Task group saved for a later run");
        Ok(group.id)
    }

    pub async fn query_status(&self, group_id: Uuid) -> Result<GroupStatus> {
        self.queue.query_status(group_id).await
    }

    pub async fn recent_groups(&self, limit: usize) -> Result<Vec<GroupStatus>> {
        self.status.recent_groups(limit).await
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.ledger.stats().await
    }

    pub async fn queue_stats(&self) -> QueueStats {
        self.queue.stats().await
    }

    /// Standard retention sweep
    pub async fn sweep(&self) -> Result<Vec<CacheEntry>> {
        self.ledger.sweep().await
    }

    /// Remove everything idle for more than `older_than_days`, including
    /// downloads that were never processed
    pub async fn force_cleanup(&self, older_than_days: u64) -> Result<Vec<CacheEntry>> {
        self.ledger.evict(EvictionPolicy::force(older_than_days)?).await
    }

    pub async fn resolve(&self, object: &RemoteObjectRef) -> Result<Resolved> {
        self.resolver.resolve(object).await
    }

    /// Start workers and wait until nothing is pending or running
    pub async fn run_until_idle(&self) -> Result<QueueStats> {
        self.queue.restore().await?;
        self.queue.start().await;
        self.queue.wait_idle().await;
        Ok(self.queue.stats().await)
    }

    /// Stop the queue and persist the cache index
    pub async fn close(&self) -> Result<()> {
        self.queue.shutdown().await;
        self.ledger.close().await
    }
}
