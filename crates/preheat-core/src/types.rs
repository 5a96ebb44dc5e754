//! Request specifications shared across preheat crates.
//!
//! Warmup requests arrive in a compact string form at the edge
//! (`get:/delay`, `pkg.Service/Method:{"k":1}`) and are parsed once into
//! [`RequestSpec`] when the run config is built. Nothing past config
//! construction sees the string form again.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// HTTP verbs accepted in warmup request specs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HttpMethod {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Options,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Head => "HEAD",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Options => "OPTIONS",
        }
    }
}

impl FromStr for HttpMethod {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "get" => Ok(HttpMethod::Get),
            "head" => Ok(HttpMethod::Head),
            "post" => Ok(HttpMethod::Post),
            "put" => Ok(HttpMethod::Put),
            "patch" => Ok(HttpMethod::Patch),
            "delete" => Ok(HttpMethod::Delete),
            "options" => Ok(HttpMethod::Options),
            other => Err(ConfigError::InvalidRequest {
                spec: s.to_string(),
                reason: format!("unsupported HTTP method `{other}`"),
            }),
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully-qualified RPC method: `package.Service/Method`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceMethod {
    pub service: String,
    pub method: String,
}

impl ServiceMethod {
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidServiceMethod {
            value: s.to_string(),
            reason: reason.to_string(),
        };

        let (service, method) = s
            .trim()
            .trim_start_matches('/')
            .rsplit_once('/')
            .ok_or_else(|| invalid("expected `service/Method`"))?;

        if service.is_empty() {
            return Err(invalid("service name is empty"));
        }
        if method.is_empty() {
            return Err(invalid("method name is empty"));
        }
        if method.contains(char::is_whitespace) || service.contains(char::is_whitespace) {
            return Err(invalid("names must not contain whitespace"));
        }

        Ok(ServiceMethod {
            service: service.to_string(),
            method: method.to_string(),
        })
    }

    /// The HTTP/2 path used on the wire: `/package.Service/Method`.
    pub fn path(&self) -> String {
        format!("/{}/{}", self.service, self.method)
    }
}

impl fmt::Display for ServiceMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.service, self.method)
    }
}

/// A single HTTP warmup request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpRequestSpec {
    pub method: HttpMethod,
    pub path: String,
    /// Sent verbatim when present.
    pub body: Option<String>,
}

/// A single RPC warmup request.
///
/// The payload is kept as text and only checked when the request is sent,
/// so one malformed payload cannot abort the whole run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcRequestSpec {
    pub service_method: ServiceMethod,
    pub payload: Option<String>,
}

/// A warmup request against the target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestSpec {
    Http(HttpRequestSpec),
    Rpc(RpcRequestSpec),
}

impl RequestSpec {
    /// Parse `method:path` or `method:path:body`.
    pub fn parse_http(s: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidRequest {
            spec: s.to_string(),
            reason: reason.to_string(),
        };

        let mut parts = s.splitn(3, ':');
        let method = parts.next().unwrap_or_default();
        let path = parts
            .next()
            .ok_or_else(|| invalid("expected `method:path`"))?
            .trim();
        let body = parts.next().map(str::to_string);

        if method.trim().is_empty() {
            return Err(invalid("method is empty"));
        }
        let method = method.parse::<HttpMethod>()?;

        if !path.starts_with('/') {
            return Err(invalid("path must start with `/`"));
        }

        Ok(RequestSpec::Http(HttpRequestSpec {
            method,
            path: path.to_string(),
            body,
        }))
    }

    /// Parse `service/Method` or `service/Method:{json}`.
    pub fn parse_rpc(s: &str) -> Result<Self, ConfigError> {
        let (method, payload) = match s.split_once(':') {
            Some((method, payload)) => (method, Some(payload.to_string())),
            None => (s, None),
        };

        let service_method =
            ServiceMethod::parse(method).map_err(|e| ConfigError::InvalidRequest {
                spec: s.to_string(),
                reason: e.to_string(),
            })?;

        Ok(RequestSpec::Rpc(RpcRequestSpec {
            service_method,
            payload: payload.filter(|p| !p.trim().is_empty()),
        }))
    }

    pub fn protocol(&self) -> Protocol {
        match self {
            RequestSpec::Http(_) => Protocol::Http,
            RequestSpec::Rpc(_) => Protocol::Grpc,
        }
    }
}

impl fmt::Display for RequestSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestSpec::Http(h) => write!(f, "{} {}", h.method, h.path),
            RequestSpec::Rpc(r) => write!(f, "rpc {}", r.service_method),
        }
    }
}

/// Wire protocol used to reach the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Grpc,
}

impl FromStr for Protocol {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(Protocol::Http),
            "grpc" => Ok(Protocol::Grpc),
            other => Err(ConfigError::Invalid(format!(
                "unknown readiness protocol `{other}` (expected http or grpc)"
            ))),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Http => f.write_str("http"),
            Protocol::Grpc => f.write_str("grpc"),
        }
    }
}
