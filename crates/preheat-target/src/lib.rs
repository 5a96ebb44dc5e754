//! preheat-target — transports for reaching the service being warmed up.
//!
//! The engine only needs "send request spec R, learn whether it reached
//! the target". [`Transport`] is that seam; [`TargetTransport`] is the
//! real implementation routing HTTP specs to a pooled hyper client and RPC
//! specs to a tonic channel.
//!
//! ```text
//! TargetTransport
//!   ├── HttpClient  (hyper-util legacy client, shared pool)
//!   └── GrpcClient  (tonic Channel, raw codec, lazy connect)
//! ```

pub mod error;
pub mod grpc;
pub mod http_client;

use std::future::Future;
use std::pin::Pin;

use preheat_core::{Protocol, RequestSpec, TargetConfig};

pub use error::{ClientError, SendError};
pub use grpc::{GrpcClient, ServingStatus, HEALTH_CHECK_METHOD};
pub use http_client::HttpClient;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The target's answer to one warmup request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// 2xx / gRPC OK.
    Success { body_len: usize },
    /// The target answered with an error status.
    Rejected { detail: String },
}

/// Sends warmup requests to the target.
///
/// Implementations are shared read-only across all workers.
pub trait Transport: Send + Sync {
    fn send<'a>(&'a self, request: &'a RequestSpec) -> BoxFuture<'a, Result<Delivery, SendError>>;
}

/// HTTP and/or gRPC clients for one target.
#[derive(Clone, Default)]
pub struct TargetTransport {
    http: Option<HttpClient>,
    grpc: Option<GrpcClient>,
}

impl TargetTransport {
    pub fn new(http: Option<HttpClient>, grpc: Option<GrpcClient>) -> Self {
        Self { http, grpc }
    }

    /// Build the clients the configured traffic needs.
    pub fn from_config(
        target: &TargetConfig,
        with_http: bool,
        with_grpc: bool,
    ) -> Result<Self, ClientError> {
        let http = with_http
            .then(|| {
                HttpClient::new(
                    &target.http_authority(),
                    target.request_timeout,
                    &target.http_headers,
                )
            })
            .transpose()?;
        let grpc = with_grpc
            .then(|| {
                GrpcClient::new(
                    &target.grpc_authority(),
                    target.insecure,
                    target.request_timeout,
                    &target.grpc_metadata,
                )
            })
            .transpose()?;
        Ok(Self { http, grpc })
    }
}

impl Transport for TargetTransport {
    fn send<'a>(&'a self, request: &'a RequestSpec) -> BoxFuture<'a, Result<Delivery, SendError>> {
        Box::pin(async move {
            match request {
                RequestSpec::Http(spec) => match &self.http {
                    Some(client) => client.send(spec).await,
                    None => Err(SendError::NoClient(Protocol::Http)),
                },
                RequestSpec::Rpc(spec) => match &self.grpc {
                    Some(client) => {
                        client
                            .invoke(&spec.service_method, spec.payload.as_deref())
                            .await
                    }
                    None => Err(SendError::NoClient(Protocol::Grpc)),
                },
            }
        })
    }
}
