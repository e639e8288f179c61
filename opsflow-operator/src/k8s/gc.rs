//! Garbage collection of records whose node no longer exists.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::error::{AppError, JoinedError};
use crate::fleet::Fleet;
use crate::k8s::store::list_all_names;
use crate::k8s::{batch_check_nodes_not_exist, ClusterView, RecordStore};
use crate::metrics::METRIC_RECORDS_DELETED;
use crate::reporter::ErrorReporter;
use crate::scheduler::Job;
use crate::utils::run_bounded;

const REPORT_SOURCE: &str = "gc";

/// Deletes the records of nodes which are no longer part of the cluster.
pub struct GarbageCollector {
    store: Arc<dyn RecordStore>,
    cluster: Arc<dyn ClusterView>,
    fleet: Fleet,
    reporter: ErrorReporter,
    page_size: u32,
    parallelism: i64,
}

impl GarbageCollector {
    /// Create a new instance.
    pub fn new(store: Arc<dyn RecordStore>, cluster: Arc<dyn ClusterView>, fleet: Fleet, reporter: ErrorReporter, page_size: u32, parallelism: i64) -> Self {
        Self {
            store,
            cluster,
            fleet,
            reporter,
            page_size,
            parallelism,
        }
    }

    /// Delete every stored record which has no live node.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn sweep(&self) -> Result<()> {
        let names = list_all_names(&*self.store, self.page_size).await?;
        if names.is_empty() {
            return Ok(());
        }
        let orphans = batch_check_nodes_not_exist(&*self.cluster, &names).await.map_err(AppError::Query)?;
        tracing::debug!(records = names.len(), orphans = orphans.len(), "garbage collection scan complete");
        self.delete_orphans(&orphans).await
    }

    /// Delete the records of the given nodes & remove the nodes from the fleet service.
    ///
    /// Records which are already gone count as deleted. All deletions are attempted; failures are
    /// joined into the returned error.
    pub async fn delete_orphans(&self, names: &[String]) -> Result<()> {
        let tasks = names.iter().cloned().map(|name| {
            let (store, fleet, reporter) = (self.store.clone(), self.fleet.clone(), self.reporter.clone());
            async move {
                match store.delete(&name).await {
                    Ok(()) => {
                        metrics::counter!(METRIC_RECORDS_DELETED).increment(1);
                        tracing::info!(node = %name, "deleted NodeResourceInfo of removed node");
                    }
                    Err(err) if AppError::is_not_found(&err) => tracing::debug!(node = %name, "NodeResourceInfo already deleted"),
                    Err(err) => return Err(err).with_context(|| format!("error deleting NodeResourceInfo {}", name)),
                }
                if let Err(err) = fleet.delete_node(&name).await {
                    reporter.report(REPORT_SOURCE, &name, &err);
                }
                Ok(())
            }
        });
        JoinedError::from_results(run_bounded(self.parallelism, tasks).await)
    }
}

#[async_trait]
impl Job for GarbageCollector {
    async fn run(&self) -> Result<()> {
        self.sweep().await
    }
}
