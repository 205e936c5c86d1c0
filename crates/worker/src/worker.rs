//! Queue worker.
//!
//! Polls `dispatch_jobs` every `poll_interval`, claims at most as many due
//! jobs as there are free concurrency slots, and runs each as its own
//! dispatch attempt. Claiming uses `FOR UPDATE SKIP LOCKED` via
//! [`DispatchJobRepo::claim_due`], so any number of worker processes can
//! share one queue.

use std::sync::Arc;
use std::time::Duration;

use runbench_core::dispatcher::{DispatchReport, Dispatcher};
use runbench_core::run::DispatchTask;
use runbench_db::repositories::DispatchJobRepo;
use sqlx::PgPool;
use tokio::sync::{AcquireError, Semaphore};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Default polling interval for the queue loop.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default number of concurrent dispatch attempts.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Default drain window on shutdown.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// How long interrupted attempts get to record their failure and release
/// their environment before being aborted.
const INTERRUPT_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Failed to claim dispatch jobs: {0}")]
    Claim(#[from] sqlx::Error),

    #[error("Concurrency limiter closed")]
    LimiterClosed(#[from] AcquireError),
}

/// Long-lived loop that feeds claimed queue jobs to a [`Dispatcher`].
pub struct QueueWorker {
    pool: PgPool,
    dispatcher: Arc<Dispatcher>,
    poll_interval: Duration,
    concurrency: usize,
    shutdown_timeout: Duration,
}

impl QueueWorker {
    pub fn new(pool: PgPool, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            pool,
            dispatcher,
            poll_interval: DEFAULT_POLL_INTERVAL,
            concurrency: DEFAULT_CONCURRENCY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Cap on in-flight attempts. Values below 1 are raised to 1.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_shutdown_timeout(mut self, shutdown_timeout: Duration) -> Self {
        self.shutdown_timeout = shutdown_timeout;
        self
    }

    /// Run the poll loop until the cancellation token is triggered, then
    /// wait (up to the shutdown timeout) for in-flight attempts.
    ///
    /// Attempts still running at the deadline are interrupted: their test
    /// process is killed, the run is recorded as `FAILED` and the
    /// environment is released.
    pub async fn run(&self, cancel: CancellationToken) {
        let slots = Arc::new(Semaphore::new(self.concurrency));
        let interrupt = CancellationToken::new();
        let mut in_flight = JoinSet::new();
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            concurrency = self.concurrency,
            run_timeout_secs = self.dispatcher.run_timeout().as_secs(),
            "Queue worker started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Queue worker shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    reap(&mut in_flight);
                    if let Err(e) = self.poll(&slots, &interrupt, &mut in_flight).await {
                        tracing::error!(error = %e, "Poll cycle failed");
                    }
                }
            }
        }

        self.drain(in_flight, interrupt).await;
    }

    /// One poll cycle: claim up to the free slot count and spawn attempts.
    ///
    /// Returns the number of attempts started.
    async fn poll(
        &self,
        slots: &Arc<Semaphore>,
        interrupt: &CancellationToken,
        in_flight: &mut JoinSet<()>,
    ) -> Result<usize, WorkerError> {
        let free = slots.available_permits();
        if free == 0 {
            return Ok(0);
        }

        let jobs = DispatchJobRepo::claim_due(&self.pool, free as i64).await?;
        let started = jobs.len();

        for job in jobs {
            // Never blocks: only this loop takes permits and `free` bounded the claim.
            let permit = Arc::clone(slots).acquire_owned().await?;
            let dispatcher = Arc::clone(&self.dispatcher);
            let interrupt = interrupt.clone();
            let task = job.task();

            tracing::debug!(
                job_id = job.id,
                run_request_id = task.run_request_id,
                retry_count = task.retry_count,
                "Dispatch job claimed",
            );

            in_flight.spawn(async move {
                let _permit = permit;
                let report = dispatcher
                    .dispatch_interruptible(task.run_request_id, task.retry_count, &interrupt)
                    .await;
                log_report(task, &report);
            });
        }

        Ok(started)
    }

    async fn drain(&self, mut in_flight: JoinSet<()>, interrupt: CancellationToken) {
        if in_flight.is_empty() {
            return;
        }

        tracing::info!(
            in_flight = in_flight.len(),
            timeout_secs = self.shutdown_timeout.as_secs(),
            "Waiting for in-flight dispatch attempts",
        );
        if join_within(&mut in_flight, self.shutdown_timeout).await {
            return;
        }

        tracing::warn!(
            remaining = in_flight.len(),
            "Shutdown timeout elapsed, interrupting in-flight dispatch attempts",
        );
        interrupt.cancel();
        if join_within(&mut in_flight, INTERRUPT_GRACE).await {
            return;
        }

        // Each aborted attempt's lock guard still records the failure and
        // releases its environment.
        tracing::error!(
            remaining = in_flight.len(),
            "Interrupted dispatch attempts did not stop, aborting",
        );
        in_flight.shutdown().await;
    }
}

/// Wait up to `limit` for every task in the set. Returns `true` if the set
/// emptied in time.
async fn join_within(in_flight: &mut JoinSet<()>, limit: Duration) -> bool {
    let all_done = async {
        while let Some(result) = in_flight.join_next().await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Dispatch task failed");
            }
        }
    };
    tokio::time::timeout(limit, all_done).await.is_ok()
}

/// Collect finished attempts without waiting.
fn reap(in_flight: &mut JoinSet<()>) {
    while let Some(result) = in_flight.try_join_next() {
        if let Err(e) = result {
            tracing::error!(error = %e, "Dispatch task failed");
        }
    }
}

fn log_report(task: DispatchTask, report: &DispatchReport) {
    let run_request_id = task.run_request_id;
    let retry_count = task.retry_count;
    match report {
        DispatchReport::Skipped { reason } => {
            tracing::debug!(
                run_request_id,
                retry_count,
                reason = %reason,
                "Dispatch attempt skipped",
            );
        }
        DispatchReport::Retrying { delay, next_retry } => {
            tracing::info!(
                run_request_id,
                retry_count,
                next_retry,
                delay_secs = delay.as_secs(),
                "Dispatch attempt requeued",
            );
        }
        DispatchReport::FailedToStart { error } => {
            tracing::warn!(
                run_request_id,
                retry_count,
                error = %error,
                "Run request failed to start",
            );
        }
        DispatchReport::Finished { status, error: None } => {
            tracing::info!(run_request_id, status = %status, "Dispatch attempt finished");
        }
        DispatchReport::Finished {
            status,
            error: Some(error),
        } => {
            tracing::info!(
                run_request_id,
                status = %status,
                error = %error,
                "Dispatch attempt finished",
            );
        }
    }
}
