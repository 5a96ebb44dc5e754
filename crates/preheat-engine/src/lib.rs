//! preheat-engine — warmup orchestration.
//!
//! Gates warmup traffic on target readiness, replays the configured
//! requests from a fixed worker pool until a deadline, and turns the
//! outcome into the ready sentinel according to the fail-open policy.
//!
//! # Architecture
//!
//! ```text
//! Orchestrator
//!   ├── run_safely(ReadinessProber::probe)   → ready / fault / panic
//!   ├── run_safely(Dispatcher::run)          → DispatchStats
//!   │     └── N workers → Transport::send
//!   └── should_mark_ready(Verdict)           → SentinelFiles
//! ```
//!
//! Nothing the target does can make [`Orchestrator::run`] fail; only
//! local sentinel I/O errors are returned.

pub mod dispatcher;
pub mod error;
pub mod orchestrator;
pub mod policy;
pub mod safe;

pub use dispatcher::{DispatchStats, Dispatcher};
pub use error::EngineError;
pub use orchestrator::{Orchestrator, Phase, RunReport, RunResult};
pub use policy::{should_mark_ready, Verdict};
pub use safe::{run_safely, Guarded};
