//! gRPC client for warmup traffic and readiness checks.
//!
//! Calls are issued against arbitrary `service/Method` paths without
//! generated stubs: request and response bodies travel as raw bytes
//! through [`RawCodec`]. A call without a payload sends the empty message,
//! which every protobuf message type accepts. A call with a JSON payload
//! is sent with the `application/grpc+json` content subtype for servers
//! that register a JSON codec.
//!
//! The standard health service (`grpc.health.v1.Health/Check`) is the one
//! method whose messages are known, so its response is decoded.

use std::time::Duration;

use bytes::{Buf, BufMut};
use http::uri::PathAndQuery;
use tonic::body::BoxBody;
use tonic::codec::{Codec, DecodeBuf, Decoder, EncodeBuf, Encoder, ProstCodec};
use tonic::codegen::{Body, Bytes, StdError};
use tonic::metadata::{AsciiMetadataKey, AsciiMetadataValue};
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};
use tonic::{Code, Request, Status};
use tower::util::MapRequest;
use tracing::trace;

use preheat_core::{Header, ServiceMethod};

use crate::error::{ClientError, SendError};
use crate::Delivery;

pub const HEALTH_CHECK_METHOD: &str = "grpc.health.v1.Health/Check";

const JSON_CONTENT_TYPE: &str = "application/grpc+json";

type JsonChannel = MapRequest<Channel, fn(http::Request<BoxBody>) -> http::Request<BoxBody>>;

/// `grpc.health.v1.HealthCheckRequest`.
#[derive(Clone, PartialEq, prost::Message)]
pub struct HealthCheckRequest {
    #[prost(string, tag = "1")]
    pub service: String,
}

/// `grpc.health.v1.HealthCheckResponse`.
#[derive(Clone, PartialEq, prost::Message)]
pub struct HealthCheckResponse {
    #[prost(int32, tag = "1")]
    pub status: i32,
}

/// `grpc.health.v1.HealthCheckResponse.ServingStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServingStatus {
    Unknown,
    Serving,
    NotServing,
    ServiceUnknown,
}

impl From<i32> for ServingStatus {
    fn from(value: i32) -> Self {
        match value {
            1 => ServingStatus::Serving,
            2 => ServingStatus::NotServing,
            3 => ServingStatus::ServiceUnknown,
            _ => ServingStatus::Unknown,
        }
    }
}

/// Shared gRPC client. Clones share one lazily-connected channel.
#[derive(Clone)]
pub struct GrpcClient {
    channel: Channel,
    json_channel: JsonChannel,
    metadata: Vec<(AsciiMetadataKey, AsciiMetadataValue)>,
    timeout: Duration,
}

impl GrpcClient {
    /// Build a client for `authority` (`host:port`).
    ///
    /// The connection is established on first use, so an unreachable
    /// target is reported per call rather than here.
    pub fn new(
        authority: &str,
        insecure: bool,
        timeout: Duration,
        metadata: &[Header],
    ) -> Result<Self, ClientError> {
        let scheme = if insecure { "http" } else { "https" };
        let uri = format!("{scheme}://{authority}");

        let mut endpoint = Endpoint::from_shared(uri.clone())
            .map_err(|e| ClientError::InvalidEndpoint {
                endpoint: uri.clone(),
                reason: e.to_string(),
            })?
            .connect_timeout(timeout)
            .timeout(timeout);

        if !insecure {
            endpoint = endpoint
                .tls_config(ClientTlsConfig::new().with_webpki_roots())
                .map_err(|e| ClientError::Tls(e.to_string()))?;
        }

        let metadata = metadata
            .iter()
            .map(|h| {
                let key = h
                    .name
                    .to_ascii_lowercase()
                    .parse::<AsciiMetadataKey>()
                    .map_err(|_| ClientError::InvalidHeader(h.name.clone()))?;
                let value = h
                    .value
                    .parse::<AsciiMetadataValue>()
                    .map_err(|_| ClientError::InvalidHeader(h.name.clone()))?;
                Ok((key, value))
            })
            .collect::<Result<Vec<_>, ClientError>>()?;

        let channel = endpoint.connect_lazy();
        let json_channel = MapRequest::new(
            channel.clone(),
            json_content_type as fn(http::Request<BoxBody>) -> http::Request<BoxBody>,
        );

        Ok(Self {
            channel,
            json_channel,
            metadata,
            timeout,
        })
    }

    /// Invoke `method` with an optional JSON payload.
    ///
    /// A non-OK status answered by the target is a [`Delivery::Rejected`];
    /// `UNAVAILABLE` means the call never reached a server and is an error.
    pub async fn invoke(
        &self,
        method: &ServiceMethod,
        payload: Option<&str>,
    ) -> Result<Delivery, SendError> {
        let path = method_path(method).map_err(SendError::InvalidRequest)?;

        let result = match payload {
            None => {
                let req = self.request(Bytes::new());
                self.with_timeout(unary_raw(self.channel.clone(), path, req)).await?
            }
            Some(payload) => {
                let value: serde_json::Value =
                    serde_json::from_str(payload).map_err(|e| SendError::InvalidPayload {
                        method: method.to_string(),
                        reason: e.to_string(),
                    })?;
                let body = serde_json::to_vec(&value).map_err(|e| SendError::InvalidPayload {
                    method: method.to_string(),
                    reason: e.to_string(),
                })?;
                let req = self.request(Bytes::from(body));
                self.with_timeout(unary_raw(self.json_channel.clone(), path, req))
                    .await?
            }
        };

        match result {
            Ok(body) => {
                trace!(%method, bytes = body.len(), "grpc warmup response");
                Ok(Delivery::Success { body_len: body.len() })
            }
            Err(status) => classify_status(status).map(|detail| Delivery::Rejected { detail }),
        }
    }

    /// Call `method` with an empty message, returning the raw status.
    ///
    /// Used for readiness checks against methods other than the health
    /// service.
    pub async fn call_empty(&self, method: &ServiceMethod) -> Result<(), Status> {
        let path = method_path(method).map_err(Status::invalid_argument)?;
        let req = self.request(Bytes::new());
        match self.with_timeout(unary_raw(self.channel.clone(), path, req)).await {
            Ok(result) => result.map(|_| ()),
            Err(e) => Err(Status::deadline_exceeded(e.to_string())),
        }
    }

    /// Run the standard health check for `service` ("" = whole server).
    pub async fn health_check(
        &self,
        method: &ServiceMethod,
        service: &str,
    ) -> Result<ServingStatus, Status> {
        let path = method_path(method).map_err(Status::invalid_argument)?;
        let req = self.request(HealthCheckRequest {
            service: service.to_string(),
        });

        let call = async {
            let mut grpc = tonic::client::Grpc::new(self.channel.clone());
            grpc.ready()
                .await
                .map_err(|e| Status::unavailable(format!("service was not ready: {e}")))?;
            let codec: ProstCodec<HealthCheckRequest, HealthCheckResponse> = ProstCodec::default();
            let resp = grpc.unary(req, path, codec).await?;
            Ok::<_, Status>(ServingStatus::from(resp.into_inner().status))
        };

        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| Status::deadline_exceeded(format!("no answer within {:?}", self.timeout)))?
    }

    fn request<T>(&self, message: T) -> Request<T> {
        let mut req = Request::new(message);
        for (key, value) in &self.metadata {
            req.metadata_mut().insert(key.clone(), value.clone());
        }
        req
    }

    async fn with_timeout<F, T>(&self, fut: F) -> Result<T, SendError>
    where
        F: std::future::Future<Output = T>,
    {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| SendError::Timeout(self.timeout))
    }
}

/// Map a status from a warmup call to either a rejection detail (the
/// target answered) or a transport error (it did not).
fn classify_status(status: Status) -> Result<String, SendError> {
    match status.code() {
        Code::Unavailable => Err(SendError::Unavailable(status.message().to_string())),
        Code::DeadlineExceeded | Code::Cancelled => {
            Err(SendError::Request(status.message().to_string()))
        }
        // Locally generated from a transport error rather than sent by a server.
        Code::Unknown if std::error::Error::source(&status).is_some() => {
            Err(SendError::Request(status.message().to_string()))
        }
        code => Ok(format!("gRPC {code:?}: {}", status.message())),
    }
}

fn method_path(method: &ServiceMethod) -> Result<PathAndQuery, String> {
    PathAndQuery::try_from(method.path()).map_err(|e| format!("invalid method path {method}: {e}"))
}

fn json_content_type(mut req: http::Request<BoxBody>) -> http::Request<BoxBody> {
    req.headers_mut().insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static(JSON_CONTENT_TYPE),
    );
    req
}

async fn unary_raw<T>(inner: T, path: PathAndQuery, req: Request<Bytes>) -> Result<Bytes, Status>
where
    T: tonic::client::GrpcService<BoxBody>,
    T::Error: Into<StdError>,
    T::ResponseBody: Body<Data = Bytes> + Send + 'static,
    <T::ResponseBody as Body>::Error: Into<StdError> + Send,
{
    let mut grpc = tonic::client::Grpc::new(inner);
    grpc.ready().await.map_err(|e| {
        let e: StdError = e.into();
        Status::unavailable(format!("service was not ready: {e}"))
    })?;
    let resp = grpc.unary(req, path, RawCodec).await?;
    Ok(resp.into_inner())
}

/// Pass-through codec: messages are already-encoded bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawCodec;

#[derive(Debug, Clone, Copy, Default)]
pub struct RawEncoder;

#[derive(Debug, Clone, Copy, Default)]
pub struct RawDecoder;

impl Codec for RawCodec {
    type Encode = Bytes;
    type Decode = Bytes;
    type Encoder = RawEncoder;
    type Decoder = RawDecoder;

    fn encoder(&mut self) -> Self::Encoder {
        RawEncoder
    }

    fn decoder(&mut self) -> Self::Decoder {
        RawDecoder
    }
}

impl Encoder for RawEncoder {
    type Item = Bytes;
    type Error = Status;

    fn encode(&mut self, item: Self::Item, dst: &mut EncodeBuf<'_>) -> Result<(), Self::Error> {
        dst.put(item);
        Ok(())
    }
}

impl Decoder for RawDecoder {
    type Item = Bytes;
    type Error = Status;

    fn decode(&mut self, src: &mut DecodeBuf<'_>) -> Result<Option<Self::Item>, Self::Error> {
        Ok(Some(src.copy_to_bytes(src.remaining())))
    }
}
