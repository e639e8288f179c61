//! Periodic jobs guarded by distributed locks.
//!
//! Every job is driven by its own ticker. On each tick the job's lock is attempted; an instance
//! which fails to take the lock skips that tick, so across all instances at most one run of a
//! job is active at a time. Jobs which wait for completion never overlap their own runs locally;
//! other jobs fire on every tick regardless of earlier runs.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::StreamExt;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_stream::wrappers::BroadcastStream;

use crate::coordination::DistributedLock;
use crate::metrics::{METRIC_JOB_RUNS, METRIC_JOB_SKIPS};
use crate::reporter::ErrorReporter;

const REPORT_SOURCE: &str = "scheduler";

/// A unit of periodic work.
#[async_trait]
pub trait Job: Send + Sync {
    async fn run(&self) -> Result<()>;
}

/// A job along with its schedule.
pub struct JobConfig {
    /// The job's name, which also names its lock.
    pub name: String,
    pub period: Duration,
    /// Wait for the previous local run to finish before starting the next one.
    pub wait_for_completion: bool,
    pub job: Arc<dyn Job>,
}

impl JobConfig {
    pub fn new(name: impl Into<String>, period: Duration, wait_for_completion: bool, job: Arc<dyn Job>) -> Self {
        Self {
            name: name.into(),
            period,
            wait_for_completion,
            job,
        }
    }
}

/// The result of a single tick of a job.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    /// The lock was held elsewhere, or could not be taken.
    Skipped,
    Completed,
    Failed,
}

/// Drives a set of periodic jobs until shutdown.
pub struct Scheduler {
    jobs: Vec<JobConfig>,
    lock: Arc<DistributedLock>,
    reporter: ErrorReporter,
    shutdown_tx: broadcast::Sender<()>,
}

impl Scheduler {
    /// Create a new instance.
    pub fn new(jobs: Vec<JobConfig>, lock: Arc<DistributedLock>, reporter: ErrorReporter, shutdown_tx: broadcast::Sender<()>) -> Self {
        Self {
            jobs,
            lock,
            reporter,
            shutdown_tx,
        }
    }

    pub fn spawn(self) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run())
    }

    async fn run(self) -> Result<()> {
        tracing::debug!(jobs = self.jobs.len(), "scheduler started");
        let drivers: Vec<_> = self
            .jobs
            .into_iter()
            .map(|job| {
                let shutdown = BroadcastStream::new(self.shutdown_tx.subscribe());
                tokio::spawn(Self::drive(job, self.lock.clone(), self.reporter.clone(), shutdown))
            })
            .collect();
        for driver in drivers {
            if let Err(err) = driver.await {
                tracing::error!(error = ?err, "error joining job driver");
            }
        }
        tracing::debug!("scheduler stopped");
        Ok(())
    }

    /// Tick the given job until shutdown, then let any in-flight runs finish.
    async fn drive(config: JobConfig, lock: Arc<DistributedLock>, reporter: ErrorReporter, mut shutdown: BroadcastStream<()>) {
        let mut ticker = interval_at(Instant::now() + config.period, config.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut in_flight: Vec<JoinHandle<RunOutcome>> = vec![];
        loop {
            tokio::select! {
                _ = ticker.tick() => (),
                _ = shutdown.next() => break,
            }
            if config.wait_for_completion {
                for run in in_flight.drain(..) {
                    if let Err(err) = run.await {
                        tracing::error!(error = ?err, job = %config.name, "error joining job run");
                    }
                }
            } else {
                in_flight.retain(|run| !run.is_finished());
            }
            let (name, job, lock, reporter) = (config.name.clone(), config.job.clone(), lock.clone(), reporter.clone());
            in_flight.push(tokio::spawn(async move { run_locked(&name, &*job, &lock, &reporter).await }));
        }
        for run in in_flight {
            if let Err(err) = run.await {
                tracing::error!(error = ?err, job = %config.name, "error joining job run");
            }
        }
        tracing::debug!(job = %config.name, "job driver stopped");
    }
}

/// Run the given job once, provided its lock can be taken.
///
/// Job failures are reported, and the lock is released either way.
#[tracing::instrument(level = "debug", skip(job, lock, reporter))]
pub async fn run_locked(name: &str, job: &dyn Job, lock: &DistributedLock, reporter: &ErrorReporter) -> RunOutcome {
    let guard = match lock.try_acquire(name).await {
        Ok(Some(guard)) => guard,
        Ok(None) => {
            metrics::counter!(METRIC_JOB_SKIPS, "job" => name.to_string()).increment(1);
            tracing::debug!("job lock held by another instance, skipping run");
            return RunOutcome::Skipped;
        }
        Err(err) => {
            reporter.report(REPORT_SOURCE, name, &err);
            return RunOutcome::Skipped;
        }
    };

    metrics::counter!(METRIC_JOB_RUNS, "job" => name.to_string()).increment(1);
    let outcome = match job.run().await {
        Ok(()) => RunOutcome::Completed,
        Err(err) => {
            reporter.report(REPORT_SOURCE, name, &err);
            RunOutcome::Failed
        }
    };
    if let Err(err) = guard.release().await {
        reporter.report(REPORT_SOURCE, name, &err);
    }
    outcome
}
