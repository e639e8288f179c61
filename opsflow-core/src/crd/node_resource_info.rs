//! NodeResourceInfo CRD.
//!
//! The code here is used to generate the actual CRD used in K8s. See examples/crd.rs.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// CRD spec for the NodeResourceInfo resource.
///
/// One object exists per live cluster node, named after the node.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, CustomResource, JsonSchema)]
#[kube(
    group = "opsflow.io",
    version = "v1alpha1",
    kind = "NodeResourceInfo",
    plural = "noderesourceinfos",
    derive = "PartialEq",
    shortname = "nri",
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".spec.status"}"#,
    printcolumn = r#"{"name":"Roles","type":"string","jsonPath":".spec.roles"}"#,
    printcolumn = r#"{"name":"Internal IP","type":"string","jsonPath":".spec.internalIp"}"#,
    printcolumn = r#"{"name":"Version","type":"string","jsonPath":".spec.scheduleVersion"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct NodeResourceInfoSpec {
    /// The name of the node described by this object.
    pub node_name: String,
    /// Per resource name accounting, only for tracked resource names.
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceInfo>,
    /// Comma-joined true node conditions, `SchedulingDisabled` when cordoned.
    #[serde(default)]
    pub status: String,
    /// Comma-joined node roles.
    #[serde(default)]
    pub roles: String,
    /// The node's kubelet version.
    #[serde(default)]
    pub schedule_version: String,
    /// The node's internal IP address.
    #[serde(default)]
    pub internal_ip: String,
    /// The node's OS image.
    #[serde(default)]
    pub os: String,
    #[serde(default)]
    pub kernel_version: String,
    #[serde(default)]
    pub container_runtime: String,
}

/// Formatted resource accounting for a single resource name.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceInfo {
    /// The node's capacity.
    pub total: String,
    /// The node's allocatable amount.
    pub allocatable: String,
    /// The sum of container requests of the pods bound to the node.
    pub used: String,
}

impl NodeResourceInfo {
    /// Build a new object for the given spec, named after its node.
    pub fn from_spec(spec: NodeResourceInfoSpec) -> Self {
        let name = spec.node_name.clone();
        Self::new(&name, spec)
    }
}
