//! Dispatch attempt orchestration.
//!
//! One call to [`Dispatcher::dispatch`] is one attempt for one run request:
//! acquire the environment, run the tests, record the outcome, release the
//! environment. A busy environment is never waited on; the attempt asks the
//! [`DelayScheduler`] to re-submit it with exponential backoff and returns.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;

use crate::backoff::{self, RetryDecision, MAX_RETRY};
use crate::command::CommandComposer;
use crate::error::DispatchError;
use crate::outcome::RunOutcome;
use crate::process::ProcessRunner;
use crate::run::{DispatchTask, RunRequest};
use crate::run_status::RunStatus;
use crate::store::{DelayScheduler, EnvironmentLock, RunStore};
use crate::types::DbId;

/// Default wall-clock limit for one test run.
pub const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(300);

/// Attempts made to release an environment before giving up.
const RELEASE_ATTEMPTS: u32 = 3;

/// Delay before the first release retry; doubles per attempt.
const RELEASE_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Fault message recorded when the interrupt token stops a running test.
pub const INTERRUPTED_MESSAGE: &str = "test run interrupted";

/// Fault message recorded when an attempt is dropped while holding the lock.
pub const ABANDONED_MESSAGE: &str = "dispatch attempt abandoned";

/// What a dispatch attempt did. Failures are already persisted on the
/// run request by the time this is returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchReport {
    /// Nothing was done: the request could not be loaded or is no longer
    /// dispatchable (already running or terminal).
    Skipped { reason: String },
    /// Environment busy; attempt `next_retry` is scheduled after `delay`.
    Retrying { delay: Duration, next_retry: u32 },
    /// Terminal `FAILED_TO_START`. The lock was never held.
    FailedToStart { error: DispatchError },
    /// The tests ran (or tried to) under the lock, which has been released.
    Finished {
        status: RunStatus,
        error: Option<DispatchError>,
    },
}

/// Orchestrates dispatch attempts against its collaborators.
pub struct Dispatcher {
    runs: Arc<dyn RunStore>,
    locks: Arc<dyn EnvironmentLock>,
    scheduler: Arc<dyn DelayScheduler>,
    runner: Arc<dyn ProcessRunner>,
    composer: Arc<dyn CommandComposer>,
    run_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        runs: Arc<dyn RunStore>,
        locks: Arc<dyn EnvironmentLock>,
        scheduler: Arc<dyn DelayScheduler>,
        runner: Arc<dyn ProcessRunner>,
        composer: Arc<dyn CommandComposer>,
    ) -> Self {
        Self {
            runs,
            locks,
            scheduler,
            runner,
            composer,
            run_timeout: DEFAULT_RUN_TIMEOUT,
        }
    }

    /// Override the process timeout.
    pub fn with_run_timeout(mut self, run_timeout: Duration) -> Self {
        self.run_timeout = run_timeout;
        self
    }

    pub fn run_timeout(&self) -> Duration {
        self.run_timeout
    }

    /// Run one dispatch attempt. Never fails; see [`DispatchReport`].
    pub async fn dispatch(&self, run_request_id: DbId, retry_count: u32) -> DispatchReport {
        self.dispatch_interruptible(run_request_id, retry_count, &CancellationToken::new())
            .await
    }

    /// Like [`dispatch`](Self::dispatch), but a test process still running
    /// when `interrupt` fires is killed and the run is recorded as `FAILED`
    /// with [`INTERRUPTED_MESSAGE`]. The environment is released as usual.
    pub async fn dispatch_interruptible(
        &self,
        run_request_id: DbId,
        retry_count: u32,
        interrupt: &CancellationToken,
    ) -> DispatchReport {
        let request = match self.runs.load(run_request_id).await {
            Ok(request) => request,
            Err(e) => {
                tracing::error!(run_request_id, error = %e, "Failed to load run request");
                return DispatchReport::Skipped {
                    reason: format!("Failed to load run request: {e}"),
                };
            }
        };

        if !request.status.can_transition(RunStatus::Running) {
            tracing::warn!(
                run_request_id,
                status = %request.status,
                retry_count,
                "Run request is not dispatchable, dropping attempt",
            );
            return DispatchReport::Skipped {
                reason: format!("Run request is {}", request.status),
            };
        }

        let acquired = match self.locks.try_acquire(&request.environment_name).await {
            Ok(acquired) => acquired,
            Err(e) => {
                // Treated like a busy observation: the attempt is retried.
                tracing::error!(
                    run_request_id,
                    environment = %request.environment_name,
                    error = %e,
                    "Failed to acquire environment lock",
                );
                false
            }
        };

        if acquired {
            self.run_locked(&request, interrupt).await
        } else {
            self.handle_busy(&request, retry_count).await
        }
    }

    /// Schedule a retry or give up, without ever touching the lock.
    async fn handle_busy(&self, request: &RunRequest, retry_count: u32) -> DispatchReport {
        let id = request.id;
        let env = request.environment_name.as_str();

        match backoff::decide(retry_count) {
            RetryDecision::Retry { delay, next_retry } => {
                tracing::warn!(
                    run_request_id = id,
                    environment = env,
                    retry_count,
                    delay_secs = delay.as_secs(),
                    "Test environment is busy, retrying",
                );
                self.write_logs(
                    id,
                    &format!(
                        "Failed to run tests on env {env} retrying in {} seconds.",
                        delay.as_secs()
                    ),
                )
                .await;
                let current = self.transition(id, request.status, RunStatus::Retrying).await;

                let task = DispatchTask {
                    run_request_id: id,
                    retry_count: next_retry,
                };
                match self.scheduler.schedule(delay, task).await {
                    Ok(()) => DispatchReport::Retrying { delay, next_retry },
                    Err(e) => {
                        tracing::error!(
                            run_request_id = id,
                            environment = env,
                            error = %e,
                            "Failed to schedule retry",
                        );
                        self.write_logs(
                            id,
                            &format!("Failed to schedule retry of tests on env {env}: {e}"),
                        )
                        .await;
                        self.transition(id, current, RunStatus::FailedToStart).await;
                        DispatchReport::FailedToStart {
                            error: DispatchError::UnexpectedFault(e.to_string()),
                        }
                    }
                }
            }
            RetryDecision::Exhausted => {
                tracing::error!(
                    run_request_id = id,
                    environment = env,
                    "Failed to run tests after retrying {MAX_RETRY} times",
                );
                self.write_logs(
                    id,
                    &format!(
                        "Failed to run tests on env {env} after retrying {MAX_RETRY} times."
                    ),
                )
                .await;
                self.transition(id, request.status, RunStatus::FailedToStart)
                    .await;
                DispatchReport::FailedToStart {
                    error: DispatchError::RetriesExhausted {
                        environment: env.to_string(),
                        attempts: retry_count + 1,
                    },
                }
            }
        }
    }

    /// Everything that happens while the environment lock is held.
    ///
    /// The release at the end runs on every path: process errors become
    /// [`RunOutcome::Fault`], panics in execution or in recording the
    /// outcome are caught before they can unwind past it, and if this
    /// future is dropped mid-way a [`HeldLock`] guard finishes the job.
    async fn run_locked(
        &self,
        request: &RunRequest,
        interrupt: &CancellationToken,
    ) -> DispatchReport {
        let id = request.id;
        let env = request.environment_name.as_str();
        let held = HeldLock::new(self, id, env);

        let current = self.transition(id, request.status, RunStatus::Running).await;

        let outcome = AssertUnwindSafe(self.execute(request, interrupt))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| RunOutcome::Fault {
                message: format!("test execution panicked: {}", panic_message(panic.as_ref())),
            });

        let report = match AssertUnwindSafe(self.finish(id, env, current, &outcome))
            .catch_unwind()
            .await
        {
            Ok(report) => report,
            Err(panic) => {
                let fault = RunOutcome::Fault {
                    message: format!(
                        "recording the outcome panicked: {}",
                        panic_message(panic.as_ref())
                    ),
                };
                tracing::error!(
                    run_request_id = id,
                    environment = env,
                    "Outcome recording panicked",
                );
                self.write_logs(id, &fault.log_text(env)).await;
                self.write_status(id, RunStatus::Failed).await;
                DispatchReport::Finished {
                    status: RunStatus::Failed,
                    error: fault.error(env),
                }
            }
        };

        release_with_retry(self.locks.as_ref(), env).await;
        held.disarm();
        report
    }

    /// Compose the command and run it under the timeout, unless interrupted.
    async fn execute(&self, request: &RunRequest, interrupt: &CancellationToken) -> RunOutcome {
        let id = request.id;
        let cmd = self.composer.compose(request);
        tracing::info!(
            run_request_id = id,
            environment = %request.environment_name,
            command = %cmd.join(" "),
            timeout_secs = self.run_timeout.as_secs(),
            "Running tests",
        );

        // Losing the race drops the runner future, which kills the child.
        let result = tokio::select! {
            result = self.runner.run(&cmd, self.run_timeout) => result,
            _ = interrupt.cancelled() => {
                tracing::warn!(
                    run_request_id = id,
                    environment = %request.environment_name,
                    "Test run interrupted, process killed",
                );
                return RunOutcome::Fault {
                    message: INTERRUPTED_MESSAGE.to_string(),
                };
            }
        };

        if let Ok(out) = &result {
            tracing::debug!(
                run_request_id = id,
                exit_code = out.exit_code,
                duration_ms = out.duration_ms,
                "Test process exited",
            );
        }
        RunOutcome::from_process(result)
    }

    /// Persist the outcome's log text and terminal status.
    async fn finish(
        &self,
        id: DbId,
        env: &str,
        current: RunStatus,
        outcome: &RunOutcome,
    ) -> DispatchReport {
        let status = outcome.status();
        let error = outcome.error(env);

        match &error {
            None => tracing::info!(
                run_request_id = id,
                environment = env,
                "Tests completed successfully",
            ),
            Some(e) => tracing::error!(
                run_request_id = id,
                environment = env,
                error = %e,
                "Test run failed",
            ),
        }

        self.write_logs(id, &outcome.log_text(env)).await;
        self.transition(id, current, status).await;
        DispatchReport::Finished { status, error }
    }

    /// Validate and persist a status transition, returning the new status.
    ///
    /// Store failures are logged; the in-memory view still advances so the
    /// remaining steps of the attempt (notably the lock release) proceed.
    async fn transition(&self, id: DbId, from: RunStatus, to: RunStatus) -> RunStatus {
        if let Err(msg) = from.validate_transition(to) {
            tracing::error!(run_request_id = id, "{msg}");
            return from;
        }
        self.write_status(id, to).await;
        to
    }

    async fn write_status(&self, id: DbId, status: RunStatus) {
        if let Err(e) = self.runs.set_status(id, status).await {
            tracing::error!(
                run_request_id = id,
                status = %status,
                error = %e,
                "Failed to persist status",
            );
        }
    }

    async fn write_logs(&self, id: DbId, logs: &str) {
        if let Err(e) = self.runs.set_logs(id, logs).await {
            tracing::error!(run_request_id = id, error = %e, "Failed to persist logs");
        }
    }
}

/// Release the environment, retrying briefly on store errors.
async fn release_with_retry(locks: &dyn EnvironmentLock, env: &str) {
    let mut delay = RELEASE_RETRY_DELAY;
    for attempt in 1..=RELEASE_ATTEMPTS {
        match locks.release(env).await {
            Ok(()) => {
                tracing::debug!(environment = env, "Environment released");
                return;
            }
            Err(e) if attempt < RELEASE_ATTEMPTS => {
                tracing::warn!(
                    environment = env,
                    attempt,
                    error = %e,
                    "Environment release failed, retrying",
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(e) => {
                tracing::error!(
                    environment = env,
                    error = %e,
                    "Environment release failed, environment left busy",
                );
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Drop guard
// ---------------------------------------------------------------------------

/// Armed while an attempt holds the environment lock.
///
/// If the attempt future is dropped before [`HeldLock::disarm`] (task
/// aborted, runtime shutting down), `Drop` spawns [`abandon`] on the current
/// runtime to record the failure and release the environment.
struct HeldLock {
    runs: Arc<dyn RunStore>,
    locks: Arc<dyn EnvironmentLock>,
    run_request_id: DbId,
    environment: String,
    armed: bool,
}

impl HeldLock {
    fn new(dispatcher: &Dispatcher, run_request_id: DbId, environment: &str) -> Self {
        Self {
            runs: Arc::clone(&dispatcher.runs),
            locks: Arc::clone(&dispatcher.locks),
            run_request_id,
            environment: environment.to_string(),
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for HeldLock {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let id = self.run_request_id;
        let env = std::mem::take(&mut self.environment);
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::error!(
                run_request_id = id,
                environment = %env,
                "Dispatch attempt dropped outside a runtime, environment left busy",
            );
            return;
        };
        tracing::warn!(
            run_request_id = id,
            environment = %env,
            "Dispatch attempt dropped while holding the environment, cleaning up",
        );
        let runs = Arc::clone(&self.runs);
        let locks = Arc::clone(&self.locks);
        handle.spawn(async move {
            abandon(runs.as_ref(), locks.as_ref(), id, &env).await;
        });
    }
}

/// Close out an attempt that lost its task: fail the request if it is
/// still open, then release the environment.
async fn abandon(runs: &dyn RunStore, locks: &dyn EnvironmentLock, id: DbId, env: &str) {
    match runs.load(id).await {
        Ok(request) => {
            let target = [RunStatus::Failed, RunStatus::FailedToStart]
                .into_iter()
                .find(|s| request.status.can_transition(*s));
            if let Some(status) = target {
                let fault = RunOutcome::Fault {
                    message: ABANDONED_MESSAGE.to_string(),
                };
                if let Err(e) = runs.set_logs(id, &fault.log_text(env)).await {
                    tracing::error!(run_request_id = id, error = %e, "Failed to persist logs");
                }
                if let Err(e) = runs.set_status(id, status).await {
                    tracing::error!(run_request_id = id, error = %e, "Failed to persist status");
                }
            }
        }
        Err(e) => {
            tracing::error!(
                run_request_id = id,
                error = %e,
                "Failed to load abandoned run request",
            );
        }
    }
    release_with_retry(locks, env).await;
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
