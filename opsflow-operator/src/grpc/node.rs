///////////////////////////////////////////////////////////////////////////////
// Components /////////////////////////////////////////////////////////////////

/// The accounting of a single resource of a node.
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NodeResource {
    /// The resource name, eg `cpu`.
    #[prost(string, tag = "1")]
    pub resource_name: ::prost::alloc::string::String,
    /// The node's capacity, without unit suffix.
    #[prost(string, tag = "2")]
    pub capacity: ::prost::alloc::string::String,
    /// The node's allocatable amount, without unit suffix.
    #[prost(string, tag = "3")]
    pub allocatable: ::prost::alloc::string::String,
    /// The unit of the capacity & allocatable values, eg `m` or `Mi`.
    #[prost(string, tag = "4")]
    pub unit: ::prost::alloc::string::String,
    /// Whether this resource has been removed from the node.
    #[prost(bool, tag = "5")]
    pub is_removed: bool,
}
/// The response shared by all registry calls.
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GenericResponse {
    /// An HTTP style status code.
    #[prost(int32, tag = "1")]
    pub code: i32,
    /// A human readable status message.
    #[prost(string, tag = "2")]
    pub message: ::prost::alloc::string::String,
    /// Call specific response data.
    #[prost(bytes = "vec", tag = "3")]
    pub data: ::prost::alloc::vec::Vec<u8>,
}
/// A request to register a node.
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AddNodeRequest {
    #[prost(string, tag = "1")]
    pub node_name: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub cluster_id: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub node_status: ::prost::alloc::string::String,
    #[prost(message, repeated, tag = "4")]
    pub resources: ::prost::alloc::vec::Vec<NodeResource>,
}
/// A request to update a registered node.
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UpdateNodeRequest {
    #[prost(string, tag = "1")]
    pub node_name: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub cluster_id: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub node_status: ::prost::alloc::string::String,
    #[prost(message, repeated, tag = "4")]
    pub resources: ::prost::alloc::vec::Vec<NodeResource>,
}
/// A request to remove a node.
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeleteNodeRequest {
    #[prost(string, tag = "1")]
    pub node_name: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub cluster_id: ::prost::alloc::string::String,
}
/// A heartbeat for a node.
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NodeHeartbeatRequest {
    #[prost(string, tag = "1")]
    pub node_name: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub cluster_id: ::prost::alloc::string::String,
}
/// Generated client implementations.
pub mod node_manager_client {
    #![allow(unused_variables, dead_code, missing_docs, clippy::let_unit_value)]
    use tonic::codegen::http::Uri;
    use tonic::codegen::*;
    /// The fleet management node registry.
    #[derive(Debug, Clone)]
    pub struct NodeManagerClient<T> {
        inner: tonic::client::Grpc<T>,
    }
    impl NodeManagerClient<tonic::transport::Channel> {
        /// Attempt to create a new client by connecting to a given endpoint.
        pub async fn connect<D>(dst: D) -> Result<Self, tonic::transport::Error>
        where
            D: TryInto<tonic::transport::Endpoint>,
            D::Error: Into<StdError>,
        {
            let conn = tonic::transport::Endpoint::new(dst)?.connect().await?;
            Ok(Self::new(conn))
        }
    }
    impl<T> NodeManagerClient<T>
    where
        T: tonic::client::GrpcService<tonic::body::BoxBody>,
        T::Error: Into<StdError>,
        T::ResponseBody: Body<Data = Bytes> + Send + 'static,
        <T::ResponseBody as Body>::Error: Into<StdError> + Send,
    {
        pub fn new(inner: T) -> Self {
            let inner = tonic::client::Grpc::new(inner);
            Self { inner }
        }
        pub fn with_origin(inner: T, origin: Uri) -> Self {
            let inner = tonic::client::Grpc::with_origin(inner, origin);
            Self { inner }
        }
        /// Register a node of a cluster.
        pub async fn add_node(&mut self, request: impl tonic::IntoRequest<super::AddNodeRequest>) -> std::result::Result<tonic::Response<super::GenericResponse>, tonic::Status> {
            self.inner
                .ready()
                .await
                .map_err(|e| tonic::Status::new(tonic::Code::Unknown, format!("Service was not ready: {}", e.into())))?;
            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static("/node.NodeManager/AddNode");
            let mut req = request.into_request();
            req.extensions_mut().insert(GrpcMethod::new("node.NodeManager", "AddNode"));
            self.inner.unary(req, path, codec).await
        }
        /// Update the status & resources of a registered node.
        pub async fn update_node(&mut self, request: impl tonic::IntoRequest<super::UpdateNodeRequest>) -> std::result::Result<tonic::Response<super::GenericResponse>, tonic::Status> {
            self.inner
                .ready()
                .await
                .map_err(|e| tonic::Status::new(tonic::Code::Unknown, format!("Service was not ready: {}", e.into())))?;
            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static("/node.NodeManager/UpdateNode");
            let mut req = request.into_request();
            req.extensions_mut().insert(GrpcMethod::new("node.NodeManager", "UpdateNode"));
            self.inner.unary(req, path, codec).await
        }
        /// Remove a node of a cluster.
        pub async fn delete_node(&mut self, request: impl tonic::IntoRequest<super::DeleteNodeRequest>) -> std::result::Result<tonic::Response<super::GenericResponse>, tonic::Status> {
            self.inner
                .ready()
                .await
                .map_err(|e| tonic::Status::new(tonic::Code::Unknown, format!("Service was not ready: {}", e.into())))?;
            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static("/node.NodeManager/DeleteNode");
            let mut req = request.into_request();
            req.extensions_mut().insert(GrpcMethod::new("node.NodeManager", "DeleteNode"));
            self.inner.unary(req, path, codec).await
        }
        /// Check that a node is known to the registry.
        ///
        /// A response code of 404 indicates that the node is unknown.
        pub async fn heartbeat(&mut self, request: impl tonic::IntoRequest<super::NodeHeartbeatRequest>) -> std::result::Result<tonic::Response<super::GenericResponse>, tonic::Status> {
            self.inner
                .ready()
                .await
                .map_err(|e| tonic::Status::new(tonic::Code::Unknown, format!("Service was not ready: {}", e.into())))?;
            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static("/node.NodeManager/Heartbeat");
            let mut req = request.into_request();
            req.extensions_mut().insert(GrpcMethod::new("node.NodeManager", "Heartbeat"));
            self.inner.unary(req, path, codec).await
        }
    }
}
