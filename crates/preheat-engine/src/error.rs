use thiserror::Error;

use preheat_health::SentinelError;
use preheat_target::ClientError;

/// Failures that stop the orchestrator outright.
///
/// Readiness and warmup problems never show up here; they are folded into
/// the [`RunReport`](crate::RunReport) instead.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Sentinel(#[from] SentinelError),

    #[error("cannot build target client: {0}")]
    Client(#[from] ClientError),
}
