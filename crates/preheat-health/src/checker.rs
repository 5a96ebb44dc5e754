//! Readiness check logic.
//!
//! A single check asks the target once whether it is ready. HTTP checks
//! open a fresh connection to the readiness port and expect a 2xx; gRPC
//! checks call the configured method and expect `OK` (or `SERVING` for
//! the standard health service).

use std::time::Duration;

use tonic::Code;
use tracing::debug;

use preheat_core::{Protocol, ReadinessConfig, ServiceMethod, TargetConfig};
use preheat_target::{BoxFuture, ClientError, GrpcClient, ServingStatus, HEALTH_CHECK_METHOD};

const USER_AGENT: &str = concat!("preheat/", env!("CARGO_PKG_VERSION"));

/// Result of a single readiness check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckResult {
    /// The target reported ready.
    Ready,
    /// The target answered but is not ready yet.
    NotReady,
    /// The check could not be executed (connection error, timeout).
    Failed,
    /// The check can never succeed as configured, e.g. the readiness
    /// method does not exist on the target. Not retried.
    Fault(String),
}

/// One readiness check against the target.
pub trait ReadinessCheck: Send + Sync {
    fn check(&self) -> BoxFuture<'_, CheckResult>;

    /// Human-readable description for logs.
    fn describe(&self) -> String;
}

/// HTTP GET on the readiness path, expecting 2xx.
#[derive(Debug, Clone)]
pub struct HttpCheck {
    address: String,
    path: String,
    timeout: Duration,
}

impl HttpCheck {
    pub fn new(address: impl Into<String>, path: impl Into<String>, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            path: path.into(),
            timeout,
        }
    }
}

impl ReadinessCheck for HttpCheck {
    fn check(&self) -> BoxFuture<'_, CheckResult> {
        Box::pin(http_probe(&self.address, &self.path, self.timeout))
    }

    fn describe(&self) -> String {
        format!("GET http://{}{}", self.address, self.path)
    }
}

/// gRPC call on the readiness method, expecting OK.
#[derive(Clone)]
pub struct GrpcCheck {
    client: GrpcClient,
    method: ServiceMethod,
}

impl GrpcCheck {
    pub fn new(client: GrpcClient, method: ServiceMethod) -> Self {
        Self { client, method }
    }
}

impl ReadinessCheck for GrpcCheck {
    fn check(&self) -> BoxFuture<'_, CheckResult> {
        Box::pin(async move {
            let outcome = if self.method.to_string() == HEALTH_CHECK_METHOD {
                self.client
                    .health_check(&self.method, "")
                    .await
                    .map(|status| status == ServingStatus::Serving)
            } else {
                self.client.call_empty(&self.method).await.map(|()| true)
            };

            match outcome {
                Ok(true) => CheckResult::Ready,
                Ok(false) => {
                    debug!(method = %self.method, "grpc readiness: not serving");
                    CheckResult::NotReady
                }
                Err(status) => classify_grpc_failure(&self.method, status),
            }
        })
    }

    fn describe(&self) -> String {
        format!("gRPC {}", self.method)
    }
}

fn classify_grpc_failure(method: &ServiceMethod, status: tonic::Status) -> CheckResult {
    match status.code() {
        Code::Unimplemented => CheckResult::Fault(format!(
            "readiness method {method} is not implemented by the target: {}",
            status.message()
        )),
        Code::Unavailable | Code::DeadlineExceeded | Code::Cancelled | Code::Unknown => {
            debug!(%method, code = ?status.code(), error = %status.message(), "grpc readiness check failed");
            CheckResult::Failed
        }
        code => {
            debug!(%method, ?code, error = %status.message(), "grpc readiness: not ready");
            CheckResult::NotReady
        }
    }
}

/// Build the readiness check the config asks for.
pub fn check_from_config(
    target: &TargetConfig,
    readiness: &ReadinessConfig,
) -> Result<Box<dyn ReadinessCheck>, ClientError> {
    let address = format!("{}:{}", target.host, readiness.port);
    match readiness.protocol {
        Protocol::Http => Ok(Box::new(HttpCheck::new(
            address,
            readiness.http_path.clone(),
            target.request_timeout,
        ))),
        Protocol::Grpc => {
            let client = GrpcClient::new(
                &address,
                target.insecure,
                target.request_timeout,
                &target.grpc_metadata,
            )?;
            Ok(Box::new(GrpcCheck::new(client, readiness.grpc_method.clone())))
        }
    }
}

/// Perform an HTTP readiness probe against an endpoint.
///
/// Returns `Ready` if the response is 2xx, `NotReady` for non-2xx,
/// or `Failed` if the connection fails or times out.
pub async fn http_probe(address: &str, path: &str, timeout: Duration) -> CheckResult {
    let uri = format!("http://{address}{path}");

    let result = tokio::time::timeout(timeout, async {
        let stream = match tokio::net::TcpStream::connect(address).await {
            Ok(s) => s,
            Err(e) => {
                debug!(error = %e, %uri, "readiness probe connection failed");
                return CheckResult::Failed;
            }
        };

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = match hyper::client::conn::http1::handshake(io).await {
            Ok(pair) => pair,
            Err(e) => {
                debug!(error = %e, %uri, "readiness probe handshake failed");
                return CheckResult::Failed;
            }
        };

        tokio::spawn(async move {
            let _ = conn.await;
        });

        let req = match http::Request::builder()
            .method("GET")
            .uri(&uri)
            .header("host", address)
            .header("user-agent", USER_AGENT)
            .body(http_body_util::Empty::<bytes::Bytes>::new())
        {
            Ok(req) => req,
            Err(e) => {
                debug!(error = %e, %uri, "readiness probe request invalid");
                return CheckResult::Failed;
            }
        };

        match sender.send_request(req).await {
            Ok(resp) if resp.status().is_success() => CheckResult::Ready,
            Ok(resp) => {
                debug!(status = %resp.status(), %uri, "readiness probe non-2xx");
                CheckResult::NotReady
            }
            Err(e) => {
                debug!(error = %e, %uri, "readiness probe request failed");
                CheckResult::Failed
            }
        }
    })
    .await;

    match result {
        Ok(probe) => probe,
        Err(_) => {
            debug!(%uri, "readiness probe timed out");
            CheckResult::Failed
        }
    }
}
