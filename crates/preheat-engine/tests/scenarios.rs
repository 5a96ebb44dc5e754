//! End-to-end runs against local targets.

mod common;

use std::path::Path;
use std::time::{Duration, Instant};

use preheat_core::ConfigFile;
use preheat_engine::{Orchestrator, Phase};

/// One-second budget, fail closed, exit after warmup, sentinels under
/// `dir`. `tables` holds the `[target]`, `[readiness]`, `[http]` and
/// `[grpc]` sections of the scenario.
fn orchestrator(dir: &Path, fail_readiness: bool, tables: &str) -> Orchestrator {
    let toml = format!(
        r#"
concurrency = 2
max_duration = "1s"
exit_after_warmup = true
fail_readiness = {fail_readiness}

[file_probe]
liveness_path = "{alive}"
readiness_path = "{ready}"

{tables}
"#,
        alive = dir.join("alive").display(),
        ready = dir.join("ready").display(),
    );
    let config = ConfigFile::from_toml_str(&toml)
        .unwrap()
        .into_run_config()
        .unwrap();
    Orchestrator::from_config(config).unwrap()
}

fn ready_written(dir: &Path) -> bool {
    dir.join("ready").exists()
}

#[tokio::test]
async fn healthy_http_target_is_warmed_then_marked_ready() {
    let target = common::http_target().await;
    let dir = tempfile::tempdir().unwrap();
    let tables = format!(
        r#"
[target]
host = "127.0.0.1"
http_port = {port}

[readiness]
http_path = "/health"
poll_interval = "50ms"

[http]
requests = ["get:/delay"]
"#,
        port = target.port(),
    );

    let mut orch = orchestrator(dir.path(), true, &tables);
    let started = Instant::now();
    let report = orch.run().await.unwrap();

    assert_eq!(report.phase, Phase::Exited);
    assert!(report.result.ready);
    assert!(!report.result.panicked);
    assert!(report.result.sent_count > 0);
    assert_eq!(report.result.sent_count, target.hits());
    assert!(report.marked_ready);
    assert!(ready_written(dir.path()));
    assert!(dir.path().join("alive").exists());
    // The deadline holds; only in-flight requests may overrun it.
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn readiness_timeout_fails_closed_without_traffic() {
    let target = common::http_target().await;
    let dir = tempfile::tempdir().unwrap();
    let tables = format!(
        r#"
[target]
host = "127.0.0.1"
http_port = {port}

[readiness]
http_path = "/not-there"
poll_interval = "50ms"

[http]
requests = ["get:/delay"]
"#,
        port = target.port(),
    );

    let mut orch = orchestrator(dir.path(), true, &tables);
    let report = orch.run().await.unwrap();

    assert!(report.readiness_fault);
    assert!(!report.result.ready);
    assert_eq!(report.result.sent_count, 0);
    assert!(!report.marked_ready);
    assert!(!ready_written(dir.path()));
    // Only readiness polls reached the target, never /delay.
    assert!(target.hits() > 0);
    assert_eq!(report.phase, Phase::Exited);
}

#[tokio::test]
async fn readiness_timeout_fails_open() {
    let target = common::http_target().await;
    let dir = tempfile::tempdir().unwrap();
    let tables = format!(
        r#"
[target]
host = "127.0.0.1"
http_port = {port}

[readiness]
http_path = "/not-there"
poll_interval = "50ms"
"#,
        port = target.port(),
    );

    let mut orch = orchestrator(dir.path(), false, &tables);
    let report = orch.run().await.unwrap();

    assert!(report.readiness_fault);
    assert!(report.marked_ready);
    assert!(ready_written(dir.path()));
}

#[tokio::test]
async fn unimplemented_readiness_method_is_a_fault() {
    let target = common::grpc_target().await;
    let dir = tempfile::tempdir().unwrap();
    let tables = format!(
        r#"
[target]
host = "127.0.0.1"
grpc_port = {port}
insecure = true

[readiness]
protocol = "grpc"
grpc_method = "non.existent/NonExistent"
poll_interval = "50ms"

[grpc]
requests = ["grpc.testing.TestService/EmptyCall"]
"#,
        port = target.port(),
    );

    let mut orch = orchestrator(dir.path(), true, &tables);
    let started = Instant::now();
    let report = orch.run().await.unwrap();

    assert!(report.result.panicked);
    assert!(report.readiness_fault);
    assert_eq!(target.hits(), 0);
    assert!(!ready_written(dir.path()));
    assert_eq!(orch.phase(), Phase::Exited);
    // Faults are not retried until the deadline.
    assert!(started.elapsed() < Duration::from_millis(900));
}

#[tokio::test]
async fn unreachable_traffic_port_fails_closed() {
    let readiness = common::http_target().await;
    let traffic_port = common::closed_port().await;
    let dir = tempfile::tempdir().unwrap();
    let tables = format!(
        r#"
[target]
host = "127.0.0.1"
http_port = {traffic_port}
readiness_port = {readiness_port}

[readiness]
http_path = "/health"
poll_interval = "50ms"

[http]
requests = ["get:/delay"]
"#,
        readiness_port = readiness.port(),
    );

    let mut orch = orchestrator(dir.path(), true, &tables);
    let report = orch.run().await.unwrap();

    assert!(report.result.ready);
    assert!(report.dispatch_fault);
    assert_eq!(report.result.sent_count, 0);
    assert!(report.failed_count > 0);
    assert!(!report.marked_ready);
    assert!(!ready_written(dir.path()));
}

#[tokio::test]
async fn grpc_health_gates_grpc_and_http_warmup() {
    let grpc = common::grpc_target().await;
    let http = common::http_target().await;
    let dir = tempfile::tempdir().unwrap();
    let tables = format!(
        r#"
[target]
host = "127.0.0.1"
http_port = {http_port}
grpc_port = {grpc_port}
insecure = true

[readiness]
protocol = "grpc"
poll_interval = "50ms"

[http]
requests = ["get:/delay"]
headers = ["X-Warmup: true"]

[grpc]
requests = [
    "grpc.testing.TestService/EmptyCall",
    'grpc.testing.TestService/UnaryCall:{{"response_size":1}}',
]
"#,
        http_port = http.port(),
        grpc_port = grpc.port(),
    );

    let mut orch = orchestrator(dir.path(), true, &tables);
    let report = orch.run().await.unwrap();

    assert!(report.result.ready);
    assert!(!report.dispatch_fault);
    assert!(grpc.hits() > 0);
    assert!(http.hits() > 0);
    assert_eq!(report.result.sent_count, grpc.hits() + http.hits());
    assert!(ready_written(dir.path()));
}

#[tokio::test]
async fn rerun_reevaluates_ready() {
    let target = common::http_target().await;
    let dir = tempfile::tempdir().unwrap();
    let tables = format!(
        r#"
[target]
host = "127.0.0.1"
http_port = {port}

[readiness]
http_path = "/health"
poll_interval = "50ms"
"#,
        port = target.port(),
    );

    let mut orch = orchestrator(dir.path(), true, &tables);
    let first = orch.run().await.unwrap();
    assert!(first.marked_ready);

    drop(target);
    // Give the listener task a moment to stop accepting.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let second = orch.run().await.unwrap();
    assert!(second.readiness_fault);
    assert!(!second.marked_ready);
    assert!(!ready_written(dir.path()));
    assert!(dir.path().join("alive").exists());
}

#[tokio::test]
async fn unimplemented_readiness_method_fails_open() {
    let target = common::grpc_target().await;
    let dir = tempfile::tempdir().unwrap();
    let tables = format!(
        r#"
[target]
host = "127.0.0.1"
grpc_port = {port}
insecure = true

[readiness]
protocol = "grpc"
grpc_method = "non.existent/NonExistent"
"#,
        port = target.port(),
    );

    let mut orch = orchestrator(dir.path(), false, &tables);
    let report = orch.run().await.unwrap();

    assert!(report.result.panicked);
    assert!(report.marked_ready);
    assert!(ready_written(dir.path()));
}
