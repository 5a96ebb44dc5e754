//! preheat.toml configuration and run config construction.
//!
//! [`ConfigFile`] mirrors the on-disk TOML with every field optional so
//! that CLI flags can be layered on top of it with [`ConfigFile::merge`].
//! [`ConfigFile::into_run_config`] applies defaults and validation and is
//! the only way to obtain a [`RunConfig`].

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::types::{Protocol, RequestSpec, ServiceMethod};

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_HTTP_PORT: u16 = 8080;
pub const DEFAULT_GRPC_PORT: u16 = 50051;
pub const DEFAULT_READINESS_HTTP_PATH: &str = "/ready";
pub const DEFAULT_READINESS_GRPC_METHOD: &str = "grpc.health.v1.Health/Check";
pub const DEFAULT_CONCURRENCY: usize = 2;
pub const DEFAULT_LIVENESS_FILE: &str = "alive";
pub const DEFAULT_READINESS_FILE: &str = "ready";

const DEFAULT_MAX_DURATION: Duration = Duration::from_secs(60);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound for every configured duration.
pub const MAX_CONFIGURED_DURATION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// How the warmup deadline relates to time already spent waiting for
/// readiness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarmupBudget {
    /// Readiness and warmup share one `max_duration` budget measured from
    /// run start.
    #[default]
    Remaining,
    /// Warmup gets a full `max_duration` measured from warmup start.
    Full,
}

impl FromStr for WarmupBudget {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "remaining" => Ok(WarmupBudget::Remaining),
            "full" => Ok(WarmupBudget::Full),
            other => Err(ConfigError::Invalid(format!(
                "unknown warmup budget `{other}` (expected remaining or full)"
            ))),
        }
    }
}

impl fmt::Display for WarmupBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WarmupBudget::Remaining => f.write_str("remaining"),
            WarmupBudget::Full => f.write_str("full"),
        }
    }
}

// ── On-disk / CLI layer ───────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub target: Option<TargetSection>,
    pub readiness: Option<ReadinessSection>,
    pub http: Option<RequestsSection>,
    pub grpc: Option<RequestsSection>,
    pub file_probe: Option<FileProbeSection>,
    pub concurrency: Option<usize>,
    pub max_duration: Option<String>,
    pub max_readiness_wait: Option<String>,
    pub warmup_budget: Option<WarmupBudget>,
    pub request_delay: Option<String>,
    pub exit_after_warmup: Option<bool>,
    pub fail_readiness: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetSection {
    pub host: Option<String>,
    pub http_port: Option<u16>,
    pub grpc_port: Option<u16>,
    pub readiness_port: Option<u16>,
    pub insecure: Option<bool>,
    pub request_timeout: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReadinessSection {
    pub protocol: Option<Protocol>,
    pub http_path: Option<String>,
    pub grpc_method: Option<String>,
    pub poll_interval: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RequestsSection {
    pub requests: Option<Vec<String>>,
    pub headers: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileProbeSection {
    pub enabled: Option<bool>,
    pub liveness_path: Option<PathBuf>,
    pub readiness_path: Option<PathBuf>,
}

// ── Validated run config ──────────────────────────────────────────

/// A static header attached to every warmup request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn parse(s: &str) -> ConfigResult<Self> {
        let (name, value) = s
            .split_once(':')
            .ok_or_else(|| ConfigError::InvalidHeader(s.to_string()))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(ConfigError::InvalidHeader(s.to_string()));
        }
        Ok(Header {
            name: name.to_string(),
            value: value.trim().to_string(),
        })
    }
}

/// Where and how to reach the target.
#[derive(Debug, Clone)]
pub struct TargetConfig {
    pub host: String,
    pub http_port: u16,
    pub grpc_port: u16,
    /// Plaintext gRPC when true, TLS otherwise.
    pub insecure: bool,
    /// Upper bound for a single request, readiness checks included.
    pub request_timeout: Duration,
    pub http_headers: Vec<Header>,
    pub grpc_metadata: Vec<Header>,
}

impl TargetConfig {
    pub fn http_authority(&self) -> String {
        format!("{}:{}", self.host, self.http_port)
    }

    pub fn grpc_authority(&self) -> String {
        format!("{}:{}", self.host, self.grpc_port)
    }
}

/// How to decide that the target is ready.
#[derive(Debug, Clone)]
pub struct ReadinessConfig {
    pub protocol: Protocol,
    /// Resolved port the readiness check connects to.
    pub port: u16,
    pub http_path: String,
    pub grpc_method: ServiceMethod,
    pub poll_interval: Duration,
    pub max_wait: Duration,
}

#[derive(Debug, Clone)]
pub struct FileProbeConfig {
    pub enabled: bool,
    pub liveness_path: PathBuf,
    pub readiness_path: PathBuf,
}

/// Everything one run needs. Built once and never mutated.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub target: TargetConfig,
    pub readiness: ReadinessConfig,
    /// Warmup requests in the order workers issue them.
    pub requests: Vec<RequestSpec>,
    pub concurrency: usize,
    pub max_duration: Duration,
    pub warmup_budget: WarmupBudget,
    pub request_delay: Duration,
    pub exit_after_warmup: bool,
    pub fail_readiness: bool,
    pub file_probe: FileProbeConfig,
}

impl RunConfig {
    /// Whether any part of the run talks gRPC to the target.
    pub fn uses_grpc(&self) -> bool {
        self.readiness.protocol == Protocol::Grpc
            || self.requests.iter().any(|r| r.protocol() == Protocol::Grpc)
    }

    pub fn uses_http(&self) -> bool {
        self.requests.iter().any(|r| r.protocol() == Protocol::Http)
    }
}

impl ConfigFile {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(s: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Layer `overrides` on top of `self`; set fields in `overrides` win.
    pub fn merge(self, overrides: ConfigFile) -> ConfigFile {
        ConfigFile {
            target: merge_section(self.target, overrides.target, |base, over| TargetSection {
                host: over.host.or(base.host),
                http_port: over.http_port.or(base.http_port),
                grpc_port: over.grpc_port.or(base.grpc_port),
                readiness_port: over.readiness_port.or(base.readiness_port),
                insecure: over.insecure.or(base.insecure),
                request_timeout: over.request_timeout.or(base.request_timeout),
            }),
            readiness: merge_section(self.readiness, overrides.readiness, |base, over| {
                ReadinessSection {
                    protocol: over.protocol.or(base.protocol),
                    http_path: over.http_path.or(base.http_path),
                    grpc_method: over.grpc_method.or(base.grpc_method),
                    poll_interval: over.poll_interval.or(base.poll_interval),
                }
            }),
            http: merge_section(self.http, overrides.http, merge_requests),
            grpc: merge_section(self.grpc, overrides.grpc, merge_requests),
            file_probe: merge_section(self.file_probe, overrides.file_probe, |base, over| {
                FileProbeSection {
                    enabled: over.enabled.or(base.enabled),
                    liveness_path: over.liveness_path.or(base.liveness_path),
                    readiness_path: over.readiness_path.or(base.readiness_path),
                }
            }),
            concurrency: overrides.concurrency.or(self.concurrency),
            max_duration: overrides.max_duration.or(self.max_duration),
            max_readiness_wait: overrides.max_readiness_wait.or(self.max_readiness_wait),
            warmup_budget: overrides.warmup_budget.or(self.warmup_budget),
            request_delay: overrides.request_delay.or(self.request_delay),
            exit_after_warmup: overrides.exit_after_warmup.or(self.exit_after_warmup),
            fail_readiness: overrides.fail_readiness.or(self.fail_readiness),
        }
    }

    /// Apply defaults, parse request specs, and validate.
    pub fn into_run_config(self) -> ConfigResult<RunConfig> {
        let target = self.target.unwrap_or_default();
        let readiness = self.readiness.unwrap_or_default();
        let http = self.http.unwrap_or_default();
        let grpc = self.grpc.unwrap_or_default();
        let file_probe = self.file_probe.unwrap_or_default();

        let max_duration = optional_duration(self.max_duration.as_deref())?
            .unwrap_or(DEFAULT_MAX_DURATION);
        if max_duration.is_zero() {
            return Err(ConfigError::Invalid("max duration must be positive".to_string()));
        }
        let max_wait =
            optional_duration(self.max_readiness_wait.as_deref())?.unwrap_or(max_duration);

        let concurrency = self.concurrency.unwrap_or(DEFAULT_CONCURRENCY);
        if concurrency == 0 {
            return Err(ConfigError::Invalid("concurrency must be at least 1".to_string()));
        }

        let mut requests = Vec::new();
        for raw in http.requests.unwrap_or_default() {
            requests.push(RequestSpec::parse_http(&raw)?);
        }
        for raw in grpc.requests.unwrap_or_default() {
            requests.push(RequestSpec::parse_rpc(&raw)?);
        }

        let http_headers = parse_headers(http.headers.unwrap_or_default())?;
        let grpc_metadata = parse_headers(grpc.headers.unwrap_or_default())?;

        let http_port = target.http_port.unwrap_or(DEFAULT_HTTP_PORT);
        let grpc_port = target.grpc_port.unwrap_or(DEFAULT_GRPC_PORT);

        let protocol = readiness.protocol.unwrap_or(Protocol::Http);
        let http_path = readiness
            .http_path
            .unwrap_or_else(|| DEFAULT_READINESS_HTTP_PATH.to_string());
        if !http_path.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "readiness HTTP path `{http_path}` must start with `/`"
            )));
        }
        let grpc_method = ServiceMethod::parse(
            readiness
                .grpc_method
                .as_deref()
                .unwrap_or(DEFAULT_READINESS_GRPC_METHOD),
        )?;
        let readiness_port = target.readiness_port.unwrap_or(match protocol {
            Protocol::Http => http_port,
            Protocol::Grpc => grpc_port,
        });

        Ok(RunConfig {
            target: TargetConfig {
                host: target.host.unwrap_or_else(|| DEFAULT_HOST.to_string()),
                http_port,
                grpc_port,
                insecure: target.insecure.unwrap_or(false),
                request_timeout: optional_duration(target.request_timeout.as_deref())?
                    .unwrap_or(DEFAULT_REQUEST_TIMEOUT),
                http_headers,
                grpc_metadata,
            },
            readiness: ReadinessConfig {
                protocol,
                port: readiness_port,
                http_path,
                grpc_method,
                poll_interval: optional_duration(readiness.poll_interval.as_deref())?
                    .unwrap_or(DEFAULT_POLL_INTERVAL),
                max_wait,
            },
            requests,
            concurrency,
            max_duration,
            warmup_budget: self.warmup_budget.unwrap_or_default(),
            request_delay: optional_duration(self.request_delay.as_deref())?
                .unwrap_or(Duration::ZERO),
            exit_after_warmup: self.exit_after_warmup.unwrap_or(false),
            fail_readiness: self.fail_readiness.unwrap_or(false),
            file_probe: FileProbeConfig {
                enabled: file_probe.enabled.unwrap_or(true),
                liveness_path: file_probe
                    .liveness_path
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_LIVENESS_FILE)),
                readiness_path: file_probe
                    .readiness_path
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_READINESS_FILE)),
            },
        })
    }
}

fn merge_section<T>(base: Option<T>, over: Option<T>, merge: impl FnOnce(T, T) -> T) -> Option<T> {
    match (base, over) {
        (Some(base), Some(over)) => Some(merge(base, over)),
        (base, over) => over.or(base),
    }
}

fn merge_requests(base: RequestsSection, over: RequestsSection) -> RequestsSection {
    RequestsSection {
        requests: over.requests.or(base.requests),
        headers: over.headers.or(base.headers),
    }
}

fn parse_headers(raw: Vec<String>) -> ConfigResult<Vec<Header>> {
    raw.iter().map(|h| Header::parse(h)).collect()
}

fn optional_duration(s: Option<&str>) -> ConfigResult<Option<Duration>> {
    let Some(raw) = s else { return Ok(None) };
    let duration = parse_duration(raw)?;
    if duration > MAX_CONFIGURED_DURATION {
        return Err(ConfigError::Invalid(format!(
            "duration `{}` exceeds the maximum of {}s",
            raw.trim(),
            MAX_CONFIGURED_DURATION.as_secs()
        )));
    }
    Ok(Some(duration))
}

/// Parse a duration string like "5s", "500ms", "2m", or bare seconds.
pub fn parse_duration(s: &str) -> ConfigResult<Duration> {
    let s = s.trim();
    let invalid = || ConfigError::InvalidDuration(s.to_string());

    if let Some(ms) = s.strip_suffix("ms") {
        ms.trim().parse::<u64>().map(Duration::from_millis).map_err(|_| invalid())
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.trim().parse::<u64>().map(Duration::from_secs).map_err(|_| invalid())
    } else if let Some(mins) = s.strip_suffix('m') {
        let mins = mins.trim().parse::<u64>().map_err(|_| invalid())?;
        mins.checked_mul(60).map(Duration::from_secs).ok_or_else(invalid)
    } else {
        s.parse::<u64>().map(Duration::from_secs).map_err(|_| invalid())
    }
}
