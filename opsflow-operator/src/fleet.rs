//! Fleet service client.
//!
//! The fleet service keeps its own registry of the nodes of each cluster. It is kept in sync on a
//! best-effort basis; the NodeResourceInfo records are the source of truth.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::time::timeout;
use tonic::transport::{Channel, Endpoint};

use crate::error::AppError;
use crate::grpc::{AddNodeRequest, DeleteNodeRequest, GenericResponse, NodeHeartbeatRequest, NodeManagerClient, NodeResource, UpdateNodeRequest};
use crate::metrics::METRIC_FLEET_CALL_ERRORS;
use opsflow_core::crd::NodeResourceInfoSpec;

/// The response code returned by the fleet service for unknown nodes.
pub const CODE_NOT_FOUND: i32 = 404;

/// The raw calls of the fleet service's node registry.
#[async_trait]
pub trait FleetClient: Send + Sync {
    async fn add_node(&self, req: AddNodeRequest) -> Result<GenericResponse>;
    async fn update_node(&self, req: UpdateNodeRequest) -> Result<GenericResponse>;
    async fn delete_node(&self, req: DeleteNodeRequest) -> Result<GenericResponse>;
    async fn heartbeat(&self, req: NodeHeartbeatRequest) -> Result<GenericResponse>;
}

/// A `FleetClient` speaking gRPC.
pub struct GrpcFleetClient {
    client: NodeManagerClient<Channel>,
    timeout: Duration,
}

impl GrpcFleetClient {
    /// Create a new instance for the given endpoint.
    ///
    /// The connection is established lazily, so an unavailable fleet service does not prevent
    /// startup.
    pub fn new(endpoint: &str, call_timeout: Duration) -> Result<Self> {
        let channel = Endpoint::from_shared(endpoint.to_string())
            .with_context(|| format!("invalid fleet endpoint {}", endpoint))?
            .connect_lazy();
        Ok(Self {
            client: NodeManagerClient::new(channel),
            timeout: call_timeout,
        })
    }
}

#[async_trait]
impl FleetClient for GrpcFleetClient {
    async fn add_node(&self, req: AddNodeRequest) -> Result<GenericResponse> {
        let mut client = self.client.clone();
        let res = timeout(self.timeout, client.add_node(req))
            .await
            .context("timeout calling fleet AddNode")?
            .context("error calling fleet AddNode")?;
        Ok(res.into_inner())
    }

    async fn update_node(&self, req: UpdateNodeRequest) -> Result<GenericResponse> {
        let mut client = self.client.clone();
        let res = timeout(self.timeout, client.update_node(req))
            .await
            .context("timeout calling fleet UpdateNode")?
            .context("error calling fleet UpdateNode")?;
        Ok(res.into_inner())
    }

    async fn delete_node(&self, req: DeleteNodeRequest) -> Result<GenericResponse> {
        let mut client = self.client.clone();
        let res = timeout(self.timeout, client.delete_node(req))
            .await
            .context("timeout calling fleet DeleteNode")?
            .context("error calling fleet DeleteNode")?;
        Ok(res.into_inner())
    }

    async fn heartbeat(&self, req: NodeHeartbeatRequest) -> Result<GenericResponse> {
        let mut client = self.client.clone();
        let res = timeout(self.timeout, client.heartbeat(req))
            .await
            .context("timeout calling fleet Heartbeat")?
            .context("error calling fleet Heartbeat")?;
        Ok(res.into_inner())
    }
}

/// The fleet registry of this cluster.
///
/// All errors returned from here are `AppError::Rpc`.
#[derive(Clone)]
pub struct Fleet {
    client: Arc<dyn FleetClient>,
    cluster_id: Arc<String>,
}

impl Fleet {
    /// Create a new instance.
    pub fn new(client: Arc<dyn FleetClient>, cluster_id: String) -> Self {
        Self {
            client,
            cluster_id: Arc::new(cluster_id),
        }
    }

    /// Register the node described by the given record.
    pub async fn add_node(&self, spec: &NodeResourceInfoSpec) -> Result<()> {
        let req = AddNodeRequest {
            node_name: spec.node_name.clone(),
            cluster_id: self.cluster_id.to_string(),
            node_status: spec.status.clone(),
            resources: resources_from_spec(spec),
        };
        rpc_result(self.client.add_node(req).await.and_then(check_code))
    }

    /// Update the node described by the given record.
    pub async fn update_node(&self, spec: &NodeResourceInfoSpec) -> Result<()> {
        let req = UpdateNodeRequest {
            node_name: spec.node_name.clone(),
            cluster_id: self.cluster_id.to_string(),
            node_status: spec.status.clone(),
            resources: resources_from_spec(spec),
        };
        rpc_result(self.client.update_node(req).await.and_then(check_code))
    }

    /// Remove the named node.
    pub async fn delete_node(&self, node_name: &str) -> Result<()> {
        let req = DeleteNodeRequest {
            node_name: node_name.into(),
            cluster_id: self.cluster_id.to_string(),
        };
        rpc_result(self.client.delete_node(req).await.and_then(check_code))
    }

    /// Send a heartbeat for the named node, returning the response code.
    pub async fn heartbeat(&self, node_name: &str) -> Result<i32> {
        let req = NodeHeartbeatRequest {
            node_name: node_name.into(),
            cluster_id: self.cluster_id.to_string(),
        };
        rpc_result(self.client.heartbeat(req).await.map(|res| res.code))
    }
}

/// Translate a record's resources into the fleet's shape, with unit suffixes split out.
pub fn resources_from_spec(spec: &NodeResourceInfoSpec) -> Vec<NodeResource> {
    spec.resources
        .iter()
        .map(|(name, info)| {
            let unit = match name.as_str() {
                "cpu" => "m",
                "memory" => "Mi",
                _ => "",
            };
            NodeResource {
                resource_name: name.clone(),
                capacity: info.total.strip_suffix(unit).unwrap_or(&info.total).into(),
                allocatable: info.allocatable.strip_suffix(unit).unwrap_or(&info.allocatable).into(),
                unit: unit.into(),
                is_removed: false,
            }
        })
        .collect()
}

/// Treat error status codes in an otherwise successful response as failures.
fn check_code(res: GenericResponse) -> Result<()> {
    if res.code >= 400 {
        bail!("fleet responded with code {}: {}", res.code, res.message);
    }
    Ok(())
}

fn rpc_result<T>(res: Result<T>) -> Result<T> {
    res.map_err(|err| {
        metrics::counter!(METRIC_FLEET_CALL_ERRORS).increment(1);
        AppError::Rpc(err).into()
    })
}
