//! Command-line flags.
//!
//! Every flag is optional and overrides the matching field of the config
//! file; defaults live in `preheat_core::config`, not here.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use preheat_core::config::{
    FileProbeSection, ReadinessSection, RequestsSection, TargetSection,
};
use preheat_core::{ConfigFile, Protocol, WarmupBudget};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "preheat",
    version,
    about = "Wait for a service to become ready, warm it up, and publish readiness"
)]
pub struct Cli {
    /// TOML config file; flags override its values.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[arg(long)]
    pub target_host: Option<String>,

    #[arg(long)]
    pub target_http_port: Option<u16>,

    #[arg(long)]
    pub target_grpc_port: Option<u16>,

    /// Port for readiness checks (default: the port of the readiness protocol).
    #[arg(long)]
    pub target_readiness_port: Option<u16>,

    /// `http` or `grpc`.
    #[arg(long)]
    pub target_readiness_protocol: Option<Protocol>,

    #[arg(long)]
    pub target_readiness_http_path: Option<String>,

    /// `package.Service/Method`.
    #[arg(long)]
    pub target_readiness_grpc_method: Option<String>,

    /// Plaintext gRPC instead of TLS.
    #[arg(long, num_args = 0..=1, default_missing_value = "true", require_equals = true)]
    pub target_insecure: Option<bool>,

    /// Warmup HTTP request as `method:path[:body]`. Repeatable.
    #[arg(long = "http-requests", value_name = "SPEC")]
    pub http_requests: Vec<String>,

    /// Header sent with every HTTP warmup request, `Name: value`. Repeatable.
    #[arg(long = "http-headers", value_name = "HEADER")]
    pub http_headers: Vec<String>,

    /// Warmup RPC as `package.Service/Method[:json]`. Repeatable.
    #[arg(long = "grpc-requests", value_name = "SPEC")]
    pub grpc_requests: Vec<String>,

    /// Metadata sent with every RPC, `name: value`. Repeatable.
    #[arg(long = "grpc-headers", value_name = "HEADER")]
    pub grpc_headers: Vec<String>,

    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Overall time budget, e.g. `60s`.
    #[arg(long)]
    pub max_duration: Option<String>,

    #[arg(long)]
    pub max_readiness_wait: Option<String>,

    #[arg(long)]
    pub warmup_budget: Option<WarmupBudget>,

    #[arg(long)]
    pub readiness_poll_interval: Option<String>,

    #[arg(long)]
    pub request_timeout: Option<String>,

    #[arg(long)]
    pub request_delay: Option<String>,

    #[arg(long, num_args = 0..=1, default_missing_value = "true", require_equals = true)]
    pub exit_after_warmup: Option<bool>,

    /// Leave the ready sentinel unset when readiness or warmup fails.
    #[arg(long, num_args = 0..=1, default_missing_value = "true", require_equals = true)]
    pub fail_readiness: Option<bool>,

    #[arg(long, num_args = 0..=1, default_missing_value = "true", require_equals = true)]
    pub file_probe_enabled: Option<bool>,

    #[arg(long)]
    pub file_probe_liveness_path: Option<PathBuf>,

    #[arg(long)]
    pub file_probe_readiness_path: Option<PathBuf>,
}

impl Cli {
    /// The flags as a config layer to merge over the file.
    pub fn overrides(&self) -> ConfigFile {
        ConfigFile {
            target: Some(TargetSection {
                host: self.target_host.clone(),
                http_port: self.target_http_port,
                grpc_port: self.target_grpc_port,
                readiness_port: self.target_readiness_port,
                insecure: self.target_insecure,
                request_timeout: self.request_timeout.clone(),
            }),
            readiness: Some(ReadinessSection {
                protocol: self.target_readiness_protocol,
                http_path: self.target_readiness_http_path.clone(),
                grpc_method: self.target_readiness_grpc_method.clone(),
                poll_interval: self.readiness_poll_interval.clone(),
            }),
            http: Some(RequestsSection {
                requests: non_empty(&self.http_requests),
                headers: non_empty(&self.http_headers),
            }),
            grpc: Some(RequestsSection {
                requests: non_empty(&self.grpc_requests),
                headers: non_empty(&self.grpc_headers),
            }),
            file_probe: Some(FileProbeSection {
                enabled: self.file_probe_enabled,
                liveness_path: self.file_probe_liveness_path.clone(),
                readiness_path: self.file_probe_readiness_path.clone(),
            }),
            concurrency: self.concurrency,
            max_duration: self.max_duration.clone(),
            max_readiness_wait: self.max_readiness_wait.clone(),
            warmup_budget: self.warmup_budget,
            request_delay: self.request_delay.clone(),
            exit_after_warmup: self.exit_after_warmup,
            fail_readiness: self.fail_readiness,
        }
    }
}

fn non_empty(values: &[String]) -> Option<Vec<String>> {
    (!values.is_empty()).then(|| values.to_vec())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("preheat").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn no_flags_gives_defaults() {
        let cli = parse(&[]);
        assert_eq!(cli.log_format, LogFormat::Text);
        let config = cli.overrides().into_run_config().unwrap();
        assert_eq!(config.target.host, "localhost");
        assert!(config.requests.is_empty());
        assert!(!config.exit_after_warmup);
    }

    #[test]
    fn repeatable_requests_and_bool_flags() {
        let cli = parse(&[
            "--http-requests",
            "get:/delay",
            "--http-requests",
            "post:/db:{\"k\":1}",
            "--grpc-requests",
            "grpc.testing.TestService/EmptyCall",
            "--exit-after-warmup",
            "--fail-readiness=false",
            "--target-readiness-protocol",
            "grpc",
            "--warmup-budget",
            "full",
            "--max-duration",
            "5s",
        ]);
        let config = cli.overrides().into_run_config().unwrap();
        assert_eq!(config.requests.len(), 3);
        assert!(config.exit_after_warmup);
        assert!(!config.fail_readiness);
        assert_eq!(config.readiness.protocol, Protocol::Grpc);
        assert_eq!(config.warmup_budget, WarmupBudget::Full);
        assert_eq!(config.max_duration, Duration::from_secs(5));
    }

    #[test]
    fn flags_override_file() {
        let file = ConfigFile::from_toml_str(
            r#"
concurrency = 8
fail_readiness = true
[http]
requests = ["get:/a", "get:/b"]
"#,
        )
        .unwrap();
        let cli = parse(&["--concurrency", "3", "--target-host", "api"]);

        let config = file.merge(cli.overrides()).into_run_config().unwrap();
        assert_eq!(config.concurrency, 3);
        assert_eq!(config.target.host, "api");
        assert!(config.fail_readiness);
        assert_eq!(config.requests.len(), 2);
    }

    #[test]
    fn bad_protocol_is_rejected() {
        let result = Cli::try_parse_from(["preheat", "--target-readiness-protocol", "ftp"]);
        assert!(result.is_err());
    }
}
