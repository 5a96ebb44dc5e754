//! Pooled HTTP/1.1 client for warmup traffic.

use std::time::Duration;

use bytes::Bytes;
use http::{HeaderName, HeaderValue};
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use tracing::trace;

use preheat_core::{Header, HttpRequestSpec};

use crate::error::{ClientError, SendError};
use crate::Delivery;

const USER_AGENT: &str = concat!("preheat/", env!("CARGO_PKG_VERSION"));

/// Shared HTTP client. Clones share one connection pool.
#[derive(Clone)]
pub struct HttpClient {
    client: Client<HttpConnector, Full<Bytes>>,
    authority: String,
    headers: Vec<(HeaderName, HeaderValue)>,
    timeout: Duration,
}

impl HttpClient {
    /// Build a client for `authority` (`host:port`).
    pub fn new(authority: &str, timeout: Duration, headers: &[Header]) -> Result<Self, ClientError> {
        let headers = headers
            .iter()
            .map(|h| {
                let name = HeaderName::from_bytes(h.name.as_bytes())
                    .map_err(|_| ClientError::InvalidHeader(h.name.clone()))?;
                let value = HeaderValue::from_str(&h.value)
                    .map_err(|_| ClientError::InvalidHeader(h.name.clone()))?;
                Ok((name, value))
            })
            .collect::<Result<Vec<_>, ClientError>>()?;

        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(timeout));
        connector.set_nodelay(true);

        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(30))
            .build(connector);

        Ok(Self {
            client,
            authority: authority.to_string(),
            headers,
            timeout,
        })
    }

    pub fn authority(&self) -> &str {
        &self.authority
    }

    /// Send one request and drain its body.
    pub async fn send(&self, spec: &HttpRequestSpec) -> Result<Delivery, SendError> {
        let uri = format!("http://{}{}", self.authority, spec.path);

        let mut builder = http::Request::builder()
            .method(spec.method.as_str())
            .uri(&uri)
            .header(http::header::USER_AGENT, USER_AGENT);
        for (name, value) in &self.headers {
            builder = builder.header(name, value);
        }
        let body = spec.body.clone().map(Bytes::from).unwrap_or_default();
        let req = builder
            .body(Full::new(body))
            .map_err(|e| SendError::InvalidRequest(e.to_string()))?;

        let exchange = async {
            let resp = self.client.request(req).await.map_err(|e| {
                if e.is_connect() {
                    SendError::Connect(e.to_string())
                } else {
                    SendError::Request(e.to_string())
                }
            })?;

            let status = resp.status();
            // Drain so the connection goes back to the pool.
            let body = resp
                .into_body()
                .collect()
                .await
                .map_err(|e| SendError::Request(e.to_string()))?
                .to_bytes();

            trace!(%uri, %status, bytes = body.len(), "http warmup response");

            if status.is_success() {
                Ok::<_, SendError>(Delivery::Success { body_len: body.len() })
            } else {
                Ok(Delivery::Rejected {
                    detail: format!("HTTP {status}"),
                })
            }
        };

        tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| SendError::Timeout(self.timeout))?
    }
}
