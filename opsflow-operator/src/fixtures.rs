//! In-memory fakes of the operator's external collaborators.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Container, Node, NodeCondition, NodeSpec, NodeStatus, Pod, PodSpec, ResourceRequirements};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity as RawQuantity;
use kube::api::ObjectMeta;
use kube::ResourceExt;
use maplit::btreemap;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::coordination::CoordinationStore;
use crate::error::AppError;
use crate::fleet::FleetClient;
use crate::grpc::{AddNodeRequest, DeleteNodeRequest, GenericResponse, NodeHeartbeatRequest, UpdateNodeRequest};
use crate::k8s::{ClusterView, Page, RecordStore};
use opsflow_core::crd::{NodeResourceInfo, NodeResourceInfoSpec, RequiredMetadata};
use opsflow_core::LABEL_K8S_HOSTNAME;

/// Paginate the values of the given map, using the last returned key as the continue token.
fn paginate<T: Clone>(items: &BTreeMap<String, T>, continue_token: Option<String>, limit: u32) -> Page<T> {
    let mut remaining = items.iter().filter(|(key, _)| continue_token.as_ref().map(|token| *key > token).unwrap_or(true));
    let page: Vec<(&String, &T)> = remaining.by_ref().take(limit.max(1) as usize).collect();
    let has_more = remaining.next().is_some();
    Page {
        continue_token: page.last().filter(|_| has_more).map(|(key, _)| key.to_string()),
        items: page.into_iter().map(|(_, val)| val.clone()).collect(),
    }
}

/// Build a ready node with the given capacity, allocatable being equal to capacity.
pub fn test_node(name: &str, capacity: &[(&str, &str)]) -> Node {
    let capacity: BTreeMap<String, RawQuantity> = capacity.iter().map(|(key, val)| (key.to_string(), RawQuantity(val.to_string()))).collect();
    Node {
        metadata: ObjectMeta {
            name: Some(name.into()),
            labels: Some(btreemap! {
                LABEL_K8S_HOSTNAME.to_string() => name.to_string(),
                "node-role.kubernetes.io/worker".to_string() => "".to_string(),
            }),
            ..Default::default()
        },
        spec: Some(NodeSpec::default()),
        status: Some(NodeStatus {
            allocatable: Some(capacity.clone()),
            capacity: Some(capacity),
            conditions: Some(vec![NodeCondition {
                type_: "Ready".into(),
                status: "True".into(),
                ..Default::default()
            }]),
            ..Default::default()
        }),
    }
}

/// Build a pod bound to the given node, with one container per request set.
pub fn test_pod(name: &str, node_name: &str, containers: &[&[(&str, &str)]]) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.into()),
            namespace: Some("default".into()),
            ..Default::default()
        },
        spec: Some(PodSpec {
            node_name: Some(node_name.into()),
            containers: containers
                .iter()
                .enumerate()
                .map(|(idx, requests)| Container {
                    name: format!("c{}", idx),
                    resources: Some(ResourceRequirements {
                        requests: Some(requests.iter().map(|(key, val)| (key.to_string(), RawQuantity(val.to_string()))).collect()),
                        ..Default::default()
                    }),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }),
        status: None,
    }
}

/// Build a record spec for the given node with one cpu entry.
pub fn test_spec(name: &str, cpu_used: &str) -> NodeResourceInfoSpec {
    NodeResourceInfoSpec {
        node_name: name.into(),
        status: "Ready".into(),
        resources: btreemap! {
            "cpu".to_string() => opsflow_core::crd::ResourceInfo {
                total: "4000m".into(),
                allocatable: "3900m".into(),
                used: cpu_used.into(),
            },
        },
        ..Default::default()
    }
}

/// An in-memory `RecordStore` enforcing resource versions.
#[derive(Default)]
pub struct MemoryRecordStore {
    records: Mutex<BTreeMap<String, NodeResourceInfo>>,
    version: AtomicU64,
    pub creates: AtomicUsize,
    pub updates: AtomicUsize,
    pub deletes: AtomicUsize,
    /// Reject every update with a conflict.
    pub always_conflict: AtomicBool,
}

impl MemoryRecordStore {
    /// Create a store holding records with the given specs.
    pub fn with_records(specs: impl IntoIterator<Item = NodeResourceInfoSpec>) -> Self {
        let store = Self::default();
        for spec in specs {
            store.insert(spec);
        }
        store
    }

    /// Insert a record directly, bypassing the counters.
    pub fn insert(&self, spec: NodeResourceInfoSpec) {
        self.insert_record(NodeResourceInfo::from_spec(spec));
    }

    /// Insert the given record directly, assigning it a fresh resource version.
    pub fn insert_record(&self, mut record: NodeResourceInfo) {
        record.metadata.resource_version = Some(self.next_version());
        self.records.lock().unwrap().insert(record.name().to_string(), record);
    }

    /// The names of all stored records.
    pub fn names(&self) -> Vec<String> {
        self.records.lock().unwrap().keys().cloned().collect()
    }

    /// The named record, if stored.
    pub fn record(&self, name: &str) -> Option<NodeResourceInfo> {
        self.records.lock().unwrap().get(name).cloned()
    }

    fn next_version(&self) -> String {
        (self.version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn get(&self, name: &str) -> Result<Option<NodeResourceInfo>> {
        Ok(self.record(name))
    }

    async fn list(&self, continue_token: Option<String>, limit: u32) -> Result<Page<NodeResourceInfo>> {
        Ok(paginate(&self.records.lock().unwrap(), continue_token, limit))
    }

    async fn create(&self, record: &NodeResourceInfo) -> Result<NodeResourceInfo> {
        let mut records = self.records.lock().unwrap();
        if records.contains_key(record.name()) {
            return Err(AppError::AlreadyExists(record.name().into()).into());
        }
        self.creates.fetch_add(1, Ordering::SeqCst);
        let mut record = record.clone();
        record.metadata.resource_version = Some(self.next_version());
        records.insert(record.name().to_string(), record.clone());
        Ok(record)
    }

    async fn update(&self, record: &NodeResourceInfo, resource_version: &str) -> Result<NodeResourceInfo> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        if self.always_conflict.load(Ordering::SeqCst) {
            return Err(AppError::Conflict(record.name().into()).into());
        }
        let mut records = self.records.lock().unwrap();
        match records.get(record.name()) {
            None => return Err(AppError::NotFound(record.name().into()).into()),
            Some(stored) if stored.metadata.resource_version.as_deref() != Some(resource_version) => return Err(AppError::Conflict(record.name().into()).into()),
            Some(_) => (),
        }
        let mut record = record.clone();
        record.metadata.resource_version = Some(self.next_version());
        records.insert(record.name().to_string(), record.clone());
        Ok(record)
    }

    async fn delete(&self, name: &str) -> Result<()> {
        match self.records.lock().unwrap().remove(name) {
            Some(_) => {
                self.deletes.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            None => Err(AppError::NotFound(name.into()).into()),
        }
    }
}

/// An in-memory `ClusterView`.
#[derive(Default)]
pub struct MemoryCluster {
    nodes: Mutex<BTreeMap<String, Node>>,
    pods: Mutex<Vec<Pod>>,
    /// The node names passed to `pods_on_node`, in call order.
    pub pod_queries: Mutex<Vec<String>>,
    /// Fail every pod listing.
    pub fail_pod_queries: AtomicBool,
}

impl MemoryCluster {
    /// Create a cluster with the given nodes & pods.
    pub fn new(nodes: impl IntoIterator<Item = Node>, pods: Vec<Pod>) -> Self {
        Self {
            nodes: Mutex::new(nodes.into_iter().map(|node| (node.name_any(), node)).collect()),
            pods: Mutex::new(pods),
            ..Default::default()
        }
    }

    /// Create a cluster of bare nodes with the given names.
    pub fn with_node_names(names: &[&str]) -> Self {
        Self::new(names.iter().map(|name| test_node(name, &[("cpu", "4")])), vec![])
    }

    pub fn pod_queries(&self) -> Vec<String> {
        self.pod_queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl ClusterView for MemoryCluster {
    async fn list_nodes(&self, continue_token: Option<String>, limit: u32) -> Result<Page<Node>> {
        Ok(paginate(&self.nodes.lock().unwrap(), continue_token, limit))
    }

    async fn nodes_by_name(&self, names: &[String]) -> Result<Vec<Node>> {
        let nodes = self.nodes.lock().unwrap();
        Ok(names.iter().filter_map(|name| nodes.get(name).cloned()).collect())
    }

    async fn pods_on_node(&self, node_name: &str) -> Result<Vec<Pod>> {
        self.pod_queries.lock().unwrap().push(node_name.into());
        if self.fail_pod_queries.load(Ordering::SeqCst) {
            bail!("pod listing unavailable");
        }
        Ok(self
            .pods
            .lock()
            .unwrap()
            .iter()
            .filter(|pod| pod.spec.as_ref().and_then(|spec| spec.node_name.as_deref()) == Some(node_name))
            .cloned()
            .collect())
    }
}

/// A call made against the `MemoryFleet`.
#[derive(Clone, Debug, PartialEq)]
pub enum FleetCall {
    Add(AddNodeRequest),
    Update(UpdateNodeRequest),
    Delete(String),
    Heartbeat(String),
}

/// An in-memory `FleetClient` which records every call.
#[derive(Default)]
pub struct MemoryFleet {
    calls: Mutex<Vec<FleetCall>>,
    /// The response code returned for heartbeats, 200 when zero.
    pub heartbeat_code: AtomicI32,
    /// The response code returned for all other calls, 200 when zero.
    pub response_code: AtomicI32,
    /// Fail every call.
    pub fail: AtomicBool,
}

impl MemoryFleet {
    pub fn calls(&self) -> Vec<FleetCall> {
        self.calls.lock().unwrap().clone()
    }

    /// The node names of all AddNode calls.
    pub fn added(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                FleetCall::Add(req) => Some(req.node_name),
                _ => None,
            })
            .collect()
    }

    /// The node names of all UpdateNode calls.
    pub fn updated(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                FleetCall::Update(req) => Some(req.node_name),
                _ => None,
            })
            .collect()
    }

    /// The node names of all DeleteNode calls.
    pub fn deleted(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                FleetCall::Delete(name) => Some(name),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: FleetCall) -> Result<GenericResponse> {
        self.calls.lock().unwrap().push(call);
        if self.fail.load(Ordering::SeqCst) {
            bail!("fleet unavailable");
        }
        let code = match self.response_code.load(Ordering::SeqCst) {
            0 => 200,
            code => code,
        };
        Ok(GenericResponse {
            code,
            ..Default::default()
        })
    }
}

#[async_trait]
impl FleetClient for MemoryFleet {
    async fn add_node(&self, req: AddNodeRequest) -> Result<GenericResponse> {
        self.record(FleetCall::Add(req))
    }

    async fn update_node(&self, req: UpdateNodeRequest) -> Result<GenericResponse> {
        self.record(FleetCall::Update(req))
    }

    async fn delete_node(&self, req: DeleteNodeRequest) -> Result<GenericResponse> {
        self.record(FleetCall::Delete(req.node_name))
    }

    async fn heartbeat(&self, req: NodeHeartbeatRequest) -> Result<GenericResponse> {
        let mut res = self.record(FleetCall::Heartbeat(req.node_name))?;
        res.code = match self.heartbeat_code.load(Ordering::SeqCst) {
            0 => 200,
            code => code,
        };
        Ok(res)
    }
}

/// An in-memory `CoordinationStore` with key expiry.
#[derive(Default)]
pub struct MemoryCoordinator {
    keys: Mutex<HashMap<String, (String, Instant)>>,
    lists: Mutex<HashMap<String, VecDeque<String>>>,
    pushed: Notify,
    /// The number of successful TTL renewals.
    pub renewals: AtomicUsize,
    /// The number of `set_nx` calls, successful or not.
    pub set_attempts: AtomicUsize,
}

impl MemoryCoordinator {
    /// The value of the given key, if set & not expired.
    pub fn get(&self, key: &str) -> Option<String> {
        let keys = self.keys.lock().unwrap();
        keys.get(key).filter(|(_, expiry)| *expiry > Instant::now()).map(|(val, _)| val.clone())
    }

    /// The number of values in the given list.
    pub fn len(&self, list: &str) -> usize {
        self.lists.lock().unwrap().get(list).map(|items| items.len()).unwrap_or(0)
    }

    /// The values in the given list, head first.
    pub fn items(&self, list: &str) -> Vec<String> {
        self.lists.lock().unwrap().get(list).map(|items| items.iter().cloned().collect()).unwrap_or_default()
    }
}

#[async_trait]
impl CoordinationStore for MemoryCoordinator {
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        self.set_attempts.fetch_add(1, Ordering::SeqCst);
        let mut keys = self.keys.lock().unwrap();
        let now = Instant::now();
        if keys.get(key).map(|(_, expiry)| *expiry > now).unwrap_or(false) {
            return Ok(false);
        }
        keys.insert(key.into(), (value.into(), now + ttl));
        Ok(true)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut keys = self.keys.lock().unwrap();
        let now = Instant::now();
        match keys.get_mut(key) {
            Some((_, expiry)) if *expiry > now => {
                *expiry = now + ttl;
                self.renewals.fetch_add(1, Ordering::SeqCst);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.keys.lock().unwrap().remove(key);
        Ok(())
    }

    async fn rpush(&self, list: &str, value: &str) -> Result<()> {
        self.lists.lock().unwrap().entry(list.into()).or_default().push_back(value.into());
        self.pushed.notify_waiters();
        Ok(())
    }

    async fn blpop(&self, list: &str) -> Result<String> {
        loop {
            let notified = self.pushed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            let popped = self.lists.lock().unwrap().get_mut(list).and_then(|items| items.pop_front());
            if let Some(value) = popped {
                return Ok(value);
            }
            notified.await;
        }
    }
}
