//! Computation of a node's resource snapshot.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::ResourceExt;

use crate::error::AppError;
use crate::k8s::ClusterView;
use opsflow_core::crd::{NodeResourceInfoSpec, ResourceInfo};
use opsflow_core::quantity::Quantity;
use opsflow_core::LABEL_K8S_NODE_ROLE_PREFIX;

const RESOURCE_CPU: &str = "cpu";
const RESOURCE_MEMORY: &str = "memory";
const STATUS_SCHEDULING_DISABLED: &str = "SchedulingDisabled";
const STATUS_UNKNOWN: &str = "Unknown";
const ADDRESS_INTERNAL_IP: &str = "InternalIP";

/// Builds snapshots for live nodes, querying the cluster for the pods bound to each node.
#[derive(Clone)]
pub struct SnapshotBuilder {
    cluster: Arc<dyn ClusterView>,
    tracked: Arc<Vec<String>>,
}

impl SnapshotBuilder {
    /// Create a new instance tracking the given resource names.
    pub fn new(cluster: Arc<dyn ClusterView>, tracked: Vec<String>) -> Self {
        Self { cluster, tracked: Arc::new(tracked) }
    }

    /// Build the snapshot of the given node.
    ///
    /// Fails with `AppError::Query` when the pods of the node can not be listed.
    #[tracing::instrument(level = "debug", skip(self, node), fields(node = %node.name_any()))]
    pub async fn build(&self, node: &Node) -> Result<NodeResourceInfoSpec> {
        let name = node.name_any();
        let pods = self.cluster.pods_on_node(&name).await.map_err(AppError::Query)?;
        build_snapshot(node, &pods, &self.tracked)
    }
}

/// Build the snapshot of a node from the node & the pods bound to it.
///
/// Only tracked resource names present in the node's capacity are accounted for. Usage is the sum
/// of container requests of every pod bound to the node, regardless of pod phase.
pub fn build_snapshot(node: &Node, pods: &[Pod], tracked: &[String]) -> Result<NodeResourceInfoSpec> {
    let name = node.name_any();
    let status = node.status.as_ref();
    let capacity = status.and_then(|status| status.capacity.as_ref());
    let allocatable = status.and_then(|status| status.allocatable.as_ref());

    let mut resources = BTreeMap::new();
    for resource in tracked {
        let total = match capacity.and_then(|capacity| capacity.get(resource)) {
            Some(total) => Quantity::from_raw(total).with_context(|| format!("invalid {} capacity on node {}", resource, name))?,
            None => continue,
        };
        let allocatable = match allocatable.and_then(|allocatable| allocatable.get(resource)) {
            Some(val) => Quantity::from_raw(val).with_context(|| format!("invalid {} allocatable on node {}", resource, name))?,
            None => Quantity::default(),
        };
        let used = requested(pods, &name, resource)?;
        resources.insert(
            resource.clone(),
            ResourceInfo {
                total: format_quantity(resource, &total),
                allocatable: format_quantity(resource, &allocatable),
                used: format_quantity(resource, &used),
            },
        );
    }

    let info = status.and_then(|status| status.node_info.as_ref());
    Ok(NodeResourceInfoSpec {
        node_name: name,
        resources,
        status: node_status(node),
        roles: node_roles(node),
        schedule_version: info.map(|info| info.kubelet_version.clone()).unwrap_or_default(),
        internal_ip: internal_ip(node),
        os: info.map(|info| info.os_image.clone()).unwrap_or_default(),
        kernel_version: info.map(|info| info.kernel_version.clone()).unwrap_or_default(),
        container_runtime: info.map(|info| info.container_runtime_version.clone()).unwrap_or_default(),
    })
}

/// Sum the container requests for the given resource across the pods bound to the given node.
fn requested(pods: &[Pod], node_name: &str, resource: &str) -> Result<Quantity> {
    let mut sum = Quantity::default();
    let bound = pods
        .iter()
        .filter_map(|pod| pod.spec.as_ref())
        .filter(|spec| spec.node_name.as_deref() == Some(node_name));
    for spec in bound {
        let requests = spec
            .containers
            .iter()
            .filter_map(|container| container.resources.as_ref())
            .filter_map(|resources| resources.requests.as_ref())
            .filter_map(|requests| requests.get(resource));
        for request in requests {
            let request = Quantity::from_raw(request).with_context(|| format!("invalid {} request on node {}", resource, node_name))?;
            sum.add(&request)?;
        }
    }
    Ok(sum)
}

/// Format a quantity in the unit used for the given resource name.
pub fn format_quantity(resource: &str, quantity: &Quantity) -> String {
    match resource {
        RESOURCE_CPU => format!("{}m", quantity.milli_value()),
        RESOURCE_MEMORY => format!("{}Mi", quantity.value() / (1 << 20)),
        _ => quantity.to_string(),
    }
}

/// The comma-joined true conditions of the node, `SchedulingDisabled` when cordoned.
pub fn node_status(node: &Node) -> String {
    let mut statuses: Vec<&str> = node
        .status
        .iter()
        .flat_map(|status| status.conditions.iter().flatten())
        .filter(|cond| cond.status == "True")
        .map(|cond| cond.type_.as_str())
        .collect();
    if node.spec.as_ref().and_then(|spec| spec.unschedulable).unwrap_or(false) {
        statuses.push(STATUS_SCHEDULING_DISABLED);
    }
    if statuses.is_empty() {
        return STATUS_UNKNOWN.into();
    }
    statuses.join(",")
}

/// The comma-joined roles of the node, in label order.
pub fn node_roles(node: &Node) -> String {
    node.labels()
        .keys()
        .filter_map(|label| label.strip_prefix(LABEL_K8S_NODE_ROLE_PREFIX))
        .map(|role| role.trim_end_matches('='))
        .collect::<Vec<_>>()
        .join(",")
}

fn internal_ip(node: &Node) -> String {
    node.status
        .iter()
        .flat_map(|status| status.addresses.iter().flatten())
        .find(|addr| addr.type_ == ADDRESS_INTERNAL_IP)
        .map(|addr| addr.address.clone())
        .unwrap_or_default()
}
