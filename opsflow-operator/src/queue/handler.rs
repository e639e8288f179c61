use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use kube::ResourceExt;

use crate::error::{AppError, JoinedError};
use crate::k8s::{missing_names, ClusterView, GarbageCollector, Reconciler, SnapshotBuilder};
use crate::queue::{Task, TaskHandler};
use crate::utils::run_bounded;

/// Reconciles a batch of nodes named by a `node_batch` task.
///
/// Names which resolve to no live node have their records garbage collected.
pub struct NodeBatchHandler {
    cluster: Arc<dyn ClusterView>,
    snapshots: SnapshotBuilder,
    reconciler: Arc<Reconciler>,
    gc: Arc<GarbageCollector>,
    parallelism: i64,
}

impl NodeBatchHandler {
    /// Create a new instance.
    pub fn new(cluster: Arc<dyn ClusterView>, snapshots: SnapshotBuilder, reconciler: Arc<Reconciler>, gc: Arc<GarbageCollector>, parallelism: i64) -> Self {
        Self {
            cluster,
            snapshots,
            reconciler,
            gc,
            parallelism,
        }
    }

    #[tracing::instrument(level = "debug", skip(self, names), fields(count = names.len()))]
    async fn reconcile_batch(&self, names: Vec<String>) -> Result<()> {
        let nodes = self.cluster.nodes_by_name(&names).await.map_err(AppError::Query)?;
        let orphans = missing_names(&names, &nodes);

        let tasks = nodes.into_iter().map(|node| {
            let (snapshots, reconciler) = (self.snapshots.clone(), self.reconciler.clone());
            async move {
                let name = node.name_any();
                let snapshot = snapshots.build(&node).await.with_context(|| format!("error building snapshot of node {}", name))?;
                reconciler.reconcile(snapshot).await.map(|_| ())
            }
        });
        let mut results = run_bounded(self.parallelism, tasks).await;
        if !orphans.is_empty() {
            tracing::debug!(orphans = orphans.len(), "batch names no longer match live nodes");
            results.push(self.gc.delete_orphans(&orphans).await);
        }
        JoinedError::from_results(results)
    }
}

#[async_trait]
impl TaskHandler for NodeBatchHandler {
    async fn handle(&self, task: Task) -> Result<()> {
        match task {
            Task::NodeBatch(names) => self.reconcile_batch(names).await,
        }
    }
}
