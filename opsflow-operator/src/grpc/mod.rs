#![allow(clippy::all)]

mod node;

pub use node::node_manager_client::NodeManagerClient;
pub use node::*;
