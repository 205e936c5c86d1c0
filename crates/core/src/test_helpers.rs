//! In-memory collaborators for dispatcher tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::command::CommandComposer;
use crate::error::CoreError;
use crate::process::{ProcessError, ProcessOutput, ProcessRunner};
use crate::run::{DispatchTask, RunRequest};
use crate::run_status::RunStatus;
use crate::store::{DelayScheduler, EnvironmentLock, RunStore};
use crate::types::DbId;

// ---------------------------------------------------------------------------
// Run store
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemoryRuns {
    next_id: DbId,
    requests: HashMap<DbId, RunRequest>,
    history: HashMap<DbId, Vec<RunStatus>>,
}

/// Run store that mirrors the SQL terminal-status guard.
#[derive(Default)]
pub struct MemoryRunStore {
    inner: Mutex<MemoryRuns>,
}

impl MemoryRunStore {
    pub fn insert(&self, environment: &str, paths: &[&str]) -> DbId {
        let mut inner = self.inner.lock().unwrap();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.requests.insert(
            id,
            RunRequest {
                id,
                requested_by: "tester".to_string(),
                environment_name: environment.to_string(),
                paths: paths.iter().map(|p| p.to_string()).collect(),
                status: RunStatus::Created,
                logs: String::new(),
                created_at: Utc::now(),
            },
        );
        id
    }

    pub fn status(&self, id: DbId) -> RunStatus {
        self.inner.lock().unwrap().requests[&id].status
    }

    pub fn logs(&self, id: DbId) -> String {
        self.inner.lock().unwrap().requests[&id].logs.clone()
    }

    /// Statuses written by the dispatcher, in order.
    pub fn history(&self, id: DbId) -> Vec<RunStatus> {
        self.inner
            .lock()
            .unwrap()
            .history
            .get(&id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn force_status(&self, id: DbId, status: RunStatus) {
        if let Some(req) = self.inner.lock().unwrap().requests.get_mut(&id) {
            req.status = status;
        }
    }
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn load(&self, id: DbId) -> Result<RunRequest, CoreError> {
        self.inner
            .lock()
            .unwrap()
            .requests
            .get(&id)
            .cloned()
            .ok_or(CoreError::NotFound {
                entity: "RunRequest",
                id,
            })
    }

    async fn set_status(&self, id: DbId, status: RunStatus) -> Result<(), CoreError> {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        let req = inner.requests.get_mut(&id).ok_or(CoreError::NotFound {
            entity: "RunRequest",
            id,
        })?;
        if req.status.is_terminal() {
            return Ok(());
        }
        req.status = status;
        inner.history.entry(id).or_default().push(status);
        Ok(())
    }

    async fn set_logs(&self, id: DbId, logs: &str) -> Result<(), CoreError> {
        let mut inner = self.inner.lock().unwrap();
        let req = inner.requests.get_mut(&id).ok_or(CoreError::NotFound {
            entity: "RunRequest",
            id,
        })?;
        req.logs = logs.to_string();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Locks
// ---------------------------------------------------------------------------

#[derive(Default, Clone, Copy)]
struct LockState {
    busy: bool,
    acquires: usize,
    releases: usize,
}

/// Test-and-set busy flags under one mutex.
#[derive(Default)]
pub struct MemoryLocks {
    inner: Mutex<HashMap<String, LockState>>,
}

impl MemoryLocks {
    /// Mark an environment busy on behalf of some other holder.
    pub fn hold(&self, environment: &str) {
        self.inner
            .lock()
            .unwrap()
            .entry(environment.to_string())
            .or_default()
            .busy = true;
    }

    pub fn is_busy(&self, environment: &str) -> bool {
        self.state(environment).busy
    }

    pub fn acquire_count(&self, environment: &str) -> usize {
        self.state(environment).acquires
    }

    pub fn release_count(&self, environment: &str) -> usize {
        self.state(environment).releases
    }

    fn state(&self, environment: &str) -> LockState {
        self.inner
            .lock()
            .unwrap()
            .get(environment)
            .copied()
            .unwrap_or_default()
    }
}

#[async_trait]
impl EnvironmentLock for MemoryLocks {
    async fn try_acquire(&self, environment: &str) -> Result<bool, CoreError> {
        let mut inner = self.inner.lock().unwrap();
        let state = inner.entry(environment.to_string()).or_default();
        if state.busy {
            return Ok(false);
        }
        state.busy = true;
        state.acquires += 1;
        Ok(true)
    }

    async fn release(&self, environment: &str) -> Result<(), CoreError> {
        let mut inner = self.inner.lock().unwrap();
        let state = inner.entry(environment.to_string()).or_default();
        state.busy = false;
        state.releases += 1;
        Ok(())
    }
}

/// Lock store whose backend is unreachable.
pub struct FailingLocks;

#[async_trait]
impl EnvironmentLock for FailingLocks {
    async fn try_acquire(&self, _environment: &str) -> Result<bool, CoreError> {
        Err(CoreError::Internal("connection refused".to_string()))
    }

    async fn release(&self, _environment: &str) -> Result<(), CoreError> {
        Err(CoreError::Internal("connection refused".to_string()))
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Records scheduled retries instead of delaying them.
#[derive(Default)]
pub struct RecordingScheduler {
    scheduled: Mutex<Vec<(Duration, DispatchTask)>>,
    fail_next: AtomicBool,
}

impl RecordingScheduler {
    /// Drain everything scheduled so far.
    pub fn take(&self) -> Vec<(Duration, DispatchTask)> {
        std::mem::take(&mut *self.scheduled.lock().unwrap())
    }

    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl DelayScheduler for RecordingScheduler {
    async fn schedule(&self, delay: Duration, task: DispatchTask) -> Result<(), CoreError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(CoreError::Internal("queue unavailable".to_string()));
        }
        self.scheduled.lock().unwrap().push((delay, task));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Runner / composer
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub enum FakeBehavior {
    Exit(i32, String),
    Sleep(Duration),
    SpawnError,
    Panic,
}

/// Process runner with scripted results and a concurrency high-water mark.
pub struct FakeRunner {
    behavior: FakeBehavior,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl FakeRunner {
    pub fn new(behavior: FakeBehavior) -> Self {
        Self {
            behavior,
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProcessRunner for FakeRunner {
    async fn run(
        &self,
        command: &[String],
        _timeout: Duration,
    ) -> Result<ProcessOutput, ProcessError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);

        let result = match &self.behavior {
            FakeBehavior::Exit(code, output) => Ok(ProcessOutput {
                exit_code: *code,
                output: output.clone(),
                duration_ms: 1,
            }),
            FakeBehavior::Sleep(d) => {
                tokio::time::sleep(*d).await;
                Ok(ProcessOutput {
                    exit_code: 0,
                    output: "ok".to_string(),
                    duration_ms: d.as_millis() as u64,
                })
            }
            FakeBehavior::SpawnError => Err(ProcessError::Spawn {
                program: command.first().cloned().unwrap_or_default(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
            }),
            FakeBehavior::Panic => panic!("runner blew up"),
        };

        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Runs a fixed `sh -c` script regardless of the request.
pub struct ShellComposer(pub String);

impl CommandComposer for ShellComposer {
    fn compose(&self, _request: &RunRequest) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), self.0.clone()]
    }
}
