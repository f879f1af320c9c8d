//! Shared fakes for integration tests
#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use mediaq_cli::error::{CliError, Result};
use mediaq_cli::queue::{ProcessingTask, StageRunner, TaskGroup};
use mediaq_cli::remote::{FsRemoteStore, RemoteStore};
use mediaq_cli::transform::{StageResult, Transformer};
use mediaq_common::{RemoteObjectRef, Stage};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

/// Stage runner that replays scripted outcomes and records every call
#[derive(Default)]
pub struct ScriptedRunner {
    scripts: Mutex<HashMap<(String, Stage), VecDeque<StageResult>>>,
    calls: Mutex<Vec<(String, Stage)>>,
    group_calls: Mutex<Vec<(Uuid, Stage)>>,
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    /// Per remote id: (running now, most ever running together)
    in_flight_by_id: Mutex<HashMap<String, (usize, usize)>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Each call takes `delay` of (tokio) time
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    /// Outcomes for successive runs of `(remote_id, stage)`; `Ok` afterwards
    pub fn script(&self, remote_id: &str, stage: Stage, outcomes: Vec<StageResult>) {
        self.scripts
            .lock()
            .unwrap()
            .insert((remote_id.to_string(), stage), outcomes.into());
    }

    pub fn calls(&self) -> Vec<(String, Stage)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, remote_id: &str, stage: Stage) -> usize {
        self.calls()
            .iter()
            .filter(|(id, s)| id == remote_id && *s == stage)
            .count()
    }

    pub fn stages_run_for(&self, remote_id: &str) -> Vec<Stage> {
        self.calls()
            .into_iter()
            .filter(|(id, _)| id == remote_id)
            .map(|(_, s)| s)
            .collect()
    }

    pub fn stages_run_in(&self, group_id: Uuid) -> Vec<Stage> {
        self.group_calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| *id == group_id)
            .map(|(_, s)| *s)
            .collect()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn max_in_flight_for(&self, remote_id: &str) -> usize {
        self.in_flight_by_id
            .lock()
            .unwrap()
            .get(remote_id)
            .map_or(0, |(_, max)| *max)
    }
}

#[async_trait]
impl StageRunner for ScriptedRunner {
    async fn run(&self, _group: &TaskGroup, task: &ProcessingTask) -> StageResult {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        {
            let mut by_id = self.in_flight_by_id.lock().unwrap();
            let (running, max) = by_id.entry(task.remote_id.clone()).or_default();
            *running += 1;
            *max = (*max).max(*running);
        }
        self.calls
            .lock()
            .unwrap()
            .push((task.remote_id.clone(), task.stage));
        self.group_calls
            .lock()
            .unwrap()
            .push((task.group_id, task.stage));

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let outcome = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&(task.remote_id.clone(), task.stage))
            .and_then(VecDeque::pop_front)
            .unwrap_or(Ok(()));

        if let Some((running, _)) = self.in_flight_by_id.lock().unwrap().get_mut(&task.remote_id) {
            *running -= 1;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}

/// Directory remote store that counts calls and can refuse uploads
pub struct CountingRemote {
    inner: FsRemoteStore,
    pub gets: AtomicUsize,
    pub puts: AtomicUsize,
    pub fail_puts: AtomicBool,
}

impl CountingRemote {
    pub fn new(root: &Path) -> Self {
        Self {
            inner: FsRemoteStore::new(root),
            gets: AtomicUsize::new(0),
            puts: AtomicUsize::new(0),
            fail_puts: AtomicBool::new(false),
        }
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteStore for CountingRemote {
    async fn get(&self, remote_id: &str) -> Result<Vec<u8>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get(remote_id).await
    }

    async fn put(&self, local_path: &Path, folder: &str, file_name: &str) -> Result<String> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(CliError::upload("503 Service Unavailable"));
        }
        self.inner.put(local_path, folder, file_name).await
    }

    async fn exists(&self, remote_id: &str) -> Result<bool> {
        self.inner.exists(remote_id).await
    }

    async fn describe(&self, remote_id: &str) -> Result<Option<RemoteObjectRef>> {
        self.inner.describe(remote_id).await
    }
}

/// Transformer that copies its input and appends `|<tag>`
pub struct TagTransformer {
    tag: &'static str,
}

impl TagTransformer {
    pub fn new(tag: &'static str) -> Self {
        Self { tag }
    }
}

#[async_trait]
impl Transformer for TagTransformer {
    async fn transform(&self, input: &Path, output: &Path) -> StageResult {
        let mut bytes = tokio::fs::read(input).await?;
        bytes.extend_from_slice(format!("|{}", self.tag).as_bytes());
        tokio::fs::write(output, bytes).await?;
        Ok(())
    }
}

/// Write `bytes` at `root/rel`, creating parents
pub fn put_file(root: &Path, rel: &str, bytes: &[u8]) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, bytes).unwrap();
}
