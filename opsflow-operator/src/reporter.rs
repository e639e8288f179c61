//! Error reporting for failures which are logged and otherwise tolerated.
//!
//! Fleet sync failures, failed queue tasks and failed job runs do not stop the operator. All of
//! them are routed through a single channel which is drained into the log by one task.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::metrics::METRIC_REPORTED_ERRORS;

/// A tolerated error.
#[derive(Clone, Debug)]
pub struct ReportedError {
    /// The component which observed the error.
    pub source: &'static str,
    /// The node, task or job which the error concerns.
    pub subject: String,
    /// The rendered error chain.
    pub message: String,
}

/// A handle used for reporting tolerated errors.
#[derive(Clone, Debug)]
pub struct ErrorReporter {
    tx: Option<mpsc::UnboundedSender<ReportedError>>,
}

impl ErrorReporter {
    /// Create a new instance along with the receiving side of its channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ReportedError>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// Create an instance which logs errors directly.
    #[cfg(test)]
    pub fn log_only() -> Self {
        Self { tx: None }
    }

    /// Report the given error.
    pub fn report(&self, source: &'static str, subject: impl Into<String>, err: &anyhow::Error) {
        metrics::counter!(METRIC_REPORTED_ERRORS, "source" => source).increment(1);
        let reported = ReportedError {
            source,
            subject: subject.into(),
            message: format!("{:#}", err),
        };
        match &self.tx {
            Some(tx) => {
                if let Err(err) = tx.send(reported) {
                    log_reported(&err.0);
                }
            }
            None => log_reported(&reported),
        }
    }
}

/// Spawn a task which logs every reported error.
///
/// The task completes once all reporter handles have been dropped.
pub fn spawn_error_logger(mut rx: mpsc::UnboundedReceiver<ReportedError>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(reported) = rx.recv().await {
            log_reported(&reported);
        }
        tracing::debug!("error logger stopped");
    })
}

fn log_reported(reported: &ReportedError) {
    tracing::error!(source = reported.source, subject = %reported.subject, error = %reported.message, "operation failed");
}
