use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::stream::StreamExt;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;

use crate::coordination::CoordinationStore;
use crate::metrics::METRIC_TASKS_PROCESSED;
use crate::queue::HandlerTable;
use crate::reporter::ErrorReporter;

const REPORT_SOURCE: &str = "worker";
/// The delay after a failed pop, before popping again.
const POP_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// A fixed-size pool of queue workers.
pub struct WorkerPool {
    coordination: Arc<dyn CoordinationStore>,
    queue: Arc<String>,
    handlers: HandlerTable,
    reporter: ErrorReporter,
    count: usize,
    shutdown_tx: broadcast::Sender<()>,
}

impl WorkerPool {
    /// Create a new instance.
    pub fn new(
        coordination: Arc<dyn CoordinationStore>, queue: String, handlers: HandlerTable, reporter: ErrorReporter, count: usize,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Self {
        Self {
            coordination,
            queue: Arc::new(queue),
            handlers,
            reporter,
            count,
            shutdown_tx,
        }
    }

    pub fn spawn(self) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run())
    }

    async fn run(self) -> Result<()> {
        tracing::debug!(workers = self.count, queue = %self.queue, "worker pool started");
        let workers: Vec<_> = (0..self.count)
            .map(|id| {
                let worker = Worker {
                    id,
                    coordination: self.coordination.clone(),
                    queue: self.queue.clone(),
                    handlers: self.handlers.clone(),
                    reporter: self.reporter.clone(),
                    shutdown: BroadcastStream::new(self.shutdown_tx.subscribe()),
                };
                tokio::spawn(worker.run())
            })
            .collect();
        for worker in workers {
            if let Err(err) = worker.await {
                tracing::error!(error = ?err, "error joining queue worker");
            }
        }
        tracing::debug!("worker pool stopped");
        Ok(())
    }
}

/// A single queue consumer.
struct Worker {
    id: usize,
    coordination: Arc<dyn CoordinationStore>,
    queue: Arc<String>,
    handlers: HandlerTable,
    reporter: ErrorReporter,
    shutdown: BroadcastStream<()>,
}

impl Worker {
    async fn run(mut self) {
        loop {
            // Only the pop races shutdown, a popped task is always handled to completion.
            let popped = tokio::select! {
                popped = self.coordination.blpop(&self.queue) => popped,
                _ = self.shutdown.next() => break,
            };
            let raw = match popped {
                Ok(raw) => raw,
                Err(err) => {
                    self.reporter.report(REPORT_SOURCE, self.queue.as_str(), &err);
                    tokio::select! {
                        _ = tokio::time::sleep(POP_ERROR_BACKOFF) => continue,
                        _ = self.shutdown.next() => break,
                    }
                }
            };
            match self.handlers.dispatch(&raw).await {
                Ok(()) => metrics::counter!(METRIC_TASKS_PROCESSED, "outcome" => "ok").increment(1),
                Err(err) => {
                    metrics::counter!(METRIC_TASKS_PROCESSED, "outcome" => "error").increment(1);
                    self.reporter.report(REPORT_SOURCE, raw, &err);
                }
            }
        }
        tracing::debug!(worker = self.id, "queue worker stopped");
    }
}
