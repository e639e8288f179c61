//! OpsFlow CRDs.
//!
//! References:
//! - https://kubernetes.io/docs/tasks/extend-kubernetes/custom-resources/custom-resource-definitions/
//! - https://kubernetes.io/docs/tasks/extend-kubernetes/custom-resources/custom-resource-definitions/#additional-printer-columns

mod node_resource_info;

use kube::Resource;

pub use node_resource_info::{NodeResourceInfo, NodeResourceInfoSpec, ResourceInfo};

/// A convenience trait built around the fact that all implementors
/// must have the following attributes.
pub trait RequiredMetadata {
    /// The name of this object.
    fn name(&self) -> &str;
}

impl RequiredMetadata for NodeResourceInfo {
    fn name(&self) -> &str {
        self.meta().name.as_deref().unwrap_or_default()
    }
}
