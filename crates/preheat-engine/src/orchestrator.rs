//! Orchestrator: drives one warmup run through its phases.
//!
//! ```text
//! Idle → ProbingReadiness → WarmingUp ──────────┐
//!                         └→ ReadinessFailed ←──┤ (nothing reached the target)
//!                                  │            │
//!                                  └──→ Finalizing ←┘ → Exited | Idling
//! ```
//!
//! Every stage that talks to the target runs under [`run_safely`], so
//! `Finalizing` is reached exactly once per run whatever the target does.

use std::convert::Infallible;
use std::sync::Arc;

use tokio::time::Instant;
use tracing::{error, info, warn};

use preheat_core::{RunConfig, WarmupBudget};
use preheat_health::{
    check_from_config, deadline_after, ReadinessCheck, ReadinessProber, SentinelFiles,
};
use preheat_target::{TargetTransport, Transport};

use crate::dispatcher::{DispatchStats, Dispatcher};
use crate::error::EngineError;
use crate::policy::{should_mark_ready, Verdict};
use crate::safe::run_safely;

/// Phase of the orchestrator state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Not started, or reset for a new run.
    Idle,
    /// Polling the target's readiness endpoint.
    ProbingReadiness,
    /// Replaying warmup traffic until the deadline.
    WarmingUp,
    /// Readiness could not be confirmed or no warmup traffic got through.
    ReadinessFailed,
    /// Applying the ready policy to the sentinel files.
    Finalizing,
    /// Run finished and the process should exit.
    Exited,
    /// Run finished and the process stays up holding its sentinel state.
    Idling,
}

impl Phase {
    pub fn can_transition_to(self, next: Phase) -> bool {
        use Phase::*;
        matches!(
            (self, next),
            // Finalizing → Idle only after a sentinel write error aborted the run.
            (Idle | Exited | Idling | Finalizing, Idle)
                | (Idle, ProbingReadiness)
                | (ProbingReadiness, WarmingUp | ReadinessFailed)
                | (WarmingUp, Finalizing | ReadinessFailed)
                | (ReadinessFailed, Finalizing)
                | (Finalizing, Exited | Idling)
        )
    }

    /// Whether a run has completed in this phase.
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Exited | Phase::Idling)
    }
}

/// What the orchestrator learned from one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunResult {
    pub ready: bool,
    pub sent_count: u64,
    pub panicked: bool,
}

/// Summary of a finished run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// `Exited` or `Idling`.
    pub phase: Phase,
    pub result: RunResult,
    pub readiness_fault: bool,
    pub dispatch_fault: bool,
    /// Warmup requests that never reached the target.
    pub failed_count: u64,
    /// Readiness took the whole budget, so no warmup was attempted.
    pub budget_exhausted: bool,
    /// Whether the ready sentinel was written.
    pub marked_ready: bool,
}

pub struct Orchestrator {
    config: Arc<RunConfig>,
    transport: Arc<dyn Transport>,
    readiness: Arc<dyn ReadinessCheck>,
    sentinels: SentinelFiles,
    phase: Phase,
}

impl Orchestrator {
    pub fn new(
        config: RunConfig,
        transport: Arc<dyn Transport>,
        readiness: Arc<dyn ReadinessCheck>,
    ) -> Self {
        let sentinels = SentinelFiles::from_config(&config.file_probe);
        Self {
            config: Arc::new(config),
            transport,
            readiness,
            sentinels,
            phase: Phase::Idle,
        }
    }

    /// Build the real transports and readiness check for `config`.
    ///
    /// Must be called from within a tokio runtime; gRPC channels are
    /// created lazily and connect on first use.
    pub fn from_config(config: RunConfig) -> Result<Self, EngineError> {
        let transport =
            TargetTransport::from_config(&config.target, config.uses_http(), config.uses_grpc())?;
        let readiness = check_from_config(&config.target, &config.readiness)?;
        Ok(Self::new(config, Arc::new(transport), Arc::from(readiness)))
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn sentinels(&self) -> &SentinelFiles {
        &self.sentinels
    }

    /// Run readiness, warmup, and finalization once.
    ///
    /// Only sentinel I/O errors are returned; everything the target does
    /// ends up in the report. May be called again after a previous run
    /// finished, re-evaluating the ready sentinel from scratch.
    pub async fn run(&mut self) -> Result<RunReport, EngineError> {
        if self.phase != Phase::Idle {
            self.transition(Phase::Idle);
        }
        let started = Instant::now();

        self.reset_sentinels()?;
        self.transition(Phase::ProbingReadiness);

        let readiness = &self.config.readiness;
        let prober = ReadinessProber::new(
            self.readiness.as_ref(),
            readiness.poll_interval,
            readiness.max_wait,
        );
        let probed = run_safely("readiness", prober.probe()).await;
        let ready = probed.value.unwrap_or(false);

        let mut verdict = Verdict {
            readiness_fault: !ready,
            dispatch_fault: false,
            panicked: probed.panicked,
        };
        let mut stats = DispatchStats::default();
        let mut budget_exhausted = false;

        if ready {
            self.transition(Phase::WarmingUp);
            let deadline = self.warmup_deadline(started);
            let has_requests = !self.config.requests.is_empty();

            if has_requests && deadline <= Instant::now() {
                warn!(
                    budget = ?self.config.max_duration,
                    "warmup budget used up by readiness wait, no warmup sent"
                );
                budget_exhausted = true;
                verdict.dispatch_fault = true;
                self.transition(Phase::ReadinessFailed);
            } else {
                let dispatcher = Dispatcher::new(
                    self.transport.clone(),
                    self.config.requests.clone(),
                    self.config.concurrency,
                )
                .with_request_delay(self.config.request_delay);

                let warmed = run_safely("warmup", async {
                    Ok::<_, Infallible>(dispatcher.run(deadline).await)
                })
                .await;
                verdict.panicked |= warmed.panicked;
                // Counts made before a worker panic are kept.
                stats = dispatcher.stats();

                if !warmed.panicked && has_requests && stats.sent == 0 {
                    warn!(
                        failed = stats.failed,
                        "no warmup request reached the target"
                    );
                    verdict.dispatch_fault = true;
                    self.transition(Phase::ReadinessFailed);
                }
            }
        } else {
            self.transition(Phase::ReadinessFailed);
        }

        self.transition(Phase::Finalizing);
        let marked_ready = should_mark_ready(&verdict, self.config.fail_readiness);
        if marked_ready {
            self.sentinels.mark_ready()?;
        }
        if !verdict.is_clean() {
            if marked_ready {
                warn!(?verdict, "run did not complete cleanly, marking ready anyway (fail-open)");
            } else {
                error!(?verdict, "run did not complete cleanly, leaving ready unset");
            }
        }

        let next = if self.config.exit_after_warmup {
            Phase::Exited
        } else {
            Phase::Idling
        };
        self.transition(next);

        Ok(RunReport {
            phase: next,
            result: RunResult {
                ready,
                sent_count: stats.sent,
                panicked: verdict.panicked,
            },
            readiness_fault: verdict.readiness_fault,
            dispatch_fault: verdict.dispatch_fault,
            failed_count: stats.failed,
            budget_exhausted,
            marked_ready,
        })
    }

    fn reset_sentinels(&self) -> Result<(), EngineError> {
        self.sentinels.clear_ready()?;
        if self.config.file_probe.enabled {
            self.sentinels.clear_alive()?;
            self.sentinels.mark_alive()?;
        }
        Ok(())
    }

    fn warmup_deadline(&self, run_started: Instant) -> Instant {
        match self.config.warmup_budget {
            WarmupBudget::Remaining => deadline_after(run_started, self.config.max_duration),
            WarmupBudget::Full => deadline_after(Instant::now(), self.config.max_duration),
        }
    }

    fn transition(&mut self, next: Phase) {
        debug_assert!(
            self.phase.can_transition_to(next),
            "invalid phase transition {:?} -> {next:?}",
            self.phase
        );
        info!(from = ?self.phase, to = ?next, "phase transition");
        self.phase = next;
    }
}
