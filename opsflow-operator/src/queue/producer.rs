use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use kube::ResourceExt;

use crate::coordination::CoordinationStore;
use crate::error::{AppError, JoinedError};
use crate::k8s::ClusterView;
use crate::metrics::METRIC_TASKS_ENQUEUED;
use crate::queue::Task;
use crate::scheduler::Job;

/// Enumerates the cluster's nodes page by page, queuing one `node_batch` task per page.
pub struct NodeEnumerator {
    cluster: Arc<dyn ClusterView>,
    coordination: Arc<dyn CoordinationStore>,
    queue: String,
    page_size: u32,
}

impl NodeEnumerator {
    /// Create a new instance.
    pub fn new(cluster: Arc<dyn ClusterView>, coordination: Arc<dyn CoordinationStore>, queue: String, page_size: u32) -> Self {
        Self {
            cluster,
            coordination,
            queue,
            page_size,
        }
    }

    /// Queue a task for every page of nodes.
    ///
    /// A failed push does not stop enumeration; push failures are joined into the returned error.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn enqueue_all(&self) -> Result<()> {
        let (mut token, mut results) = (None, vec![]);
        loop {
            let page = self.cluster.list_nodes(token, self.page_size).await.map_err(AppError::Query)?;
            if !page.items.is_empty() {
                let names: Vec<String> = page.items.iter().map(|node| node.name_any()).collect();
                results.push(self.push(Task::NodeBatch(names)).await);
            }
            token = match page.continue_token {
                Some(next) => Some(next),
                None => break,
            };
        }
        tracing::debug!(batches = results.len(), "node enumeration complete");
        JoinedError::from_results(results)
    }

    async fn push(&self, task: Task) -> Result<()> {
        let raw = task.encode()?;
        self.coordination.rpush(&self.queue, &raw).await.context("error queuing node batch")?;
        metrics::counter!(METRIC_TASKS_ENQUEUED).increment(1);
        Ok(())
    }
}

#[async_trait]
impl Job for NodeEnumerator {
    async fn run(&self) -> Result<()> {
        self.enqueue_all().await
    }
}
