pub mod crd;
pub mod error;
pub mod quantity;

pub use error::AppError;

/// The canonical K8s label holding a node's hostname.
///
/// For the node providers supported by OpsFlow this matches the node's name. Label values are
/// limited to 63 characters, so longer node names can not be selected through this label.
pub const LABEL_K8S_HOSTNAME: &str = "kubernetes.io/hostname";

/// The canonical K8s label prefix used to declare node roles.
pub const LABEL_K8S_NODE_ROLE_PREFIX: &str = "node-role.kubernetes.io/";
