//! Kubernetes integration.
//!
//! The live cluster is observed through `ClusterView`, and NodeResourceInfo records are persisted
//! through `RecordStore`. Both are traits so that the reconciliation logic can be driven against
//! in-memory fakes.

mod gc;
mod heartbeat;
mod reconciler;
#[cfg(test)]
mod reconciler_test;
mod snapshot;
mod store;

use std::collections::HashSet;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, Node, Pod};
use kube::api::{Api, ListParams};
use kube::client::Client;
use kube::ResourceExt;
use tokio::time::timeout;

use opsflow_core::LABEL_K8S_HOSTNAME;

pub use gc::GarbageCollector;
pub use heartbeat::HeartbeatSynchronizer;
pub use reconciler::{Outcome, Reconciler, RetryPolicy};
pub use snapshot::SnapshotBuilder;
pub use store::{KubeRecordStore, RecordStore};

/// The default timeout to use for API calls.
const API_TIMEOUT: Duration = Duration::from_secs(10);
/// The maximum number of names placed in a single hostname label selector.
const SELECTOR_CHUNK_SIZE: usize = 50;
/// The maximum length of a K8s label value.
const LABEL_VALUE_MAX_LEN: usize = 63;
/// The namespace whose UID identifies the cluster.
const CLUSTER_ID_NAMESPACE: &str = "kube-system";

/// A page of objects from a paginated list call.
#[derive(Clone, Debug)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// The token for the next page, `None` once the listing is complete.
    pub continue_token: Option<String>,
}

/// A read-only view of the live cluster.
#[async_trait]
pub trait ClusterView: Send + Sync {
    /// List a page of nodes.
    async fn list_nodes(&self, continue_token: Option<String>, limit: u32) -> Result<Page<Node>>;

    /// Fetch the live nodes matching the given names; unknown names are absent from the output.
    async fn nodes_by_name(&self, names: &[String]) -> Result<Vec<Node>>;

    /// List the pods bound to the given node.
    async fn pods_on_node(&self, node_name: &str) -> Result<Vec<Pod>>;
}

/// A `ClusterView` backed by the K8s API.
pub struct KubeCluster {
    nodes: Api<Node>,
    pods: Api<Pod>,
    namespaces: Api<Namespace>,
}

impl KubeCluster {
    /// Create a new instance.
    pub fn new(client: Client) -> Self {
        Self {
            nodes: Api::all(client.clone()),
            pods: Api::all(client.clone()),
            namespaces: Api::all(client),
        }
    }

    /// Fetch the UID of the `kube-system` namespace, which serves as the cluster's identity.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn cluster_uid(&self) -> Result<String> {
        let ns = timeout(API_TIMEOUT, self.namespaces.get(CLUSTER_ID_NAMESPACE))
            .await
            .context("timeout fetching kube-system namespace")?
            .context("error fetching kube-system namespace")?;
        ns.uid().context("kube-system namespace has no UID")
    }
}

#[async_trait]
impl ClusterView for KubeCluster {
    #[tracing::instrument(level = "debug", skip(self))]
    async fn list_nodes(&self, continue_token: Option<String>, limit: u32) -> Result<Page<Node>> {
        let mut params = ListParams::default().limit(limit);
        params.continue_token = continue_token;
        let list = timeout(API_TIMEOUT, self.nodes.list(&params))
            .await
            .context("timeout listing nodes")?
            .context("error listing nodes")?;
        Ok(Page {
            continue_token: list.metadata.continue_.filter(|token| !token.is_empty()),
            items: list.items,
        })
    }

    #[tracing::instrument(level = "debug", skip(self, names), fields(count = names.len()))]
    async fn nodes_by_name(&self, names: &[String]) -> Result<Vec<Node>> {
        let (selectable, unselectable) = partition_label_values(names);
        let mut nodes = vec![];
        for chunk in selectable.chunks(SELECTOR_CHUNK_SIZE) {
            let params = ListParams::default().labels(&format!("{} in ({})", LABEL_K8S_HOSTNAME, chunk.join(",")));
            let list = timeout(API_TIMEOUT, self.nodes.list(&params))
                .await
                .context("timeout listing nodes by name")?
                .context("error listing nodes by name")?;
            nodes.extend(list.items);
        }
        // Names which can not appear in a label selector are fetched one by one.
        for name in unselectable {
            let node = timeout(API_TIMEOUT, self.nodes.get_opt(name))
                .await
                .context("timeout fetching node")?
                .with_context(|| format!("error fetching node {}", name))?;
            nodes.extend(node);
        }
        Ok(nodes)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn pods_on_node(&self, node_name: &str) -> Result<Vec<Pod>> {
        let params = ListParams::default().fields(&format!("spec.nodeName={}", node_name));
        let list = timeout(API_TIMEOUT, self.pods.list(&params))
            .await
            .context("timeout listing pods of node")?
            .context("error listing pods of node")?;
        Ok(list.items)
    }
}

/// Find which of the given node names have no live node.
///
/// A single list query is issued for the whole set.
pub async fn batch_check_nodes_not_exist(cluster: &dyn ClusterView, names: &[String]) -> Result<Vec<String>> {
    let live = cluster.nodes_by_name(names).await.context("error checking for live nodes")?;
    Ok(missing_names(names, &live))
}

/// The given names which match none of the given nodes, by name or by hostname label.
pub fn missing_names(names: &[String], live: &[Node]) -> Vec<String> {
    let live: HashSet<String> = live
        .iter()
        .flat_map(|node| [Some(node.name_any()), node.labels().get(LABEL_K8S_HOSTNAME).cloned()])
        .flatten()
        .collect();
    names.iter().filter(|name| !live.contains(*name)).cloned().collect()
}

/// Split the given names into those usable as label values & those which are not.
///
/// A label value is at most 63 characters of alphanumerics, `-`, `_` and `.`, beginning & ending
/// with an alphanumeric.
pub fn partition_label_values(names: &[String]) -> (Vec<&str>, Vec<&str>) {
    names.iter().map(String::as_str).partition(|name| is_label_value(name))
}

fn is_label_value(val: &str) -> bool {
    let bytes = val.as_bytes();
    match (bytes.first(), bytes.last()) {
        (Some(first), Some(last)) => {
            bytes.len() <= LABEL_VALUE_MAX_LEN
                && first.is_ascii_alphanumeric()
                && last.is_ascii_alphanumeric()
                && bytes.iter().all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
        }
        _ => false,
    }
}
