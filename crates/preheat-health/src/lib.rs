//! preheat-health — readiness gating and health signalling.
//!
//! Two halves: the readiness side polls the target until it reports
//! ready, and the file probe side publishes this process's own health to
//! an external orchestrator through sentinel files.
//!
//! ```text
//! ReadinessProber
//!   └── ReadinessCheck (HttpCheck | GrpcCheck) → CheckResult
//!
//! SentinelFiles
//!   ├── alive  (process is up)
//!   └── ready  (warmup policy says admit traffic)
//! ```

pub mod checker;
pub mod prober;
pub mod sentinel;

pub use checker::{check_from_config, CheckResult, GrpcCheck, HttpCheck, ReadinessCheck};
pub use prober::{deadline_after, ProbeFault, ReadinessProber};
pub use sentinel::{SentinelError, SentinelFiles};
