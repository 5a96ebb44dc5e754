//! Readiness prober: polls a readiness check on a fixed interval until
//! the target is ready, the check faults, or the wait budget runs out.

use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::checker::{CheckResult, ReadinessCheck};

/// Roughly thirty years; stands in for "no deadline".
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `start + budget`, saturating to a far-future instant instead of
/// overflowing.
pub fn deadline_after(start: Instant, budget: Duration) -> Instant {
    start
        .checked_add(budget)
        .or_else(|| start.checked_add(FAR_FUTURE))
        .unwrap_or(start)
}

/// The readiness check can never succeed as configured.
#[derive(Debug, Error)]
#[error("readiness fault: {0}")]
pub struct ProbeFault(pub String);

/// Polls one [`ReadinessCheck`] until it passes or `max_wait` elapses.
pub struct ReadinessProber<'a> {
    check: &'a dyn ReadinessCheck,
    interval: Duration,
    max_wait: Duration,
}

impl<'a> ReadinessProber<'a> {
    pub fn new(check: &'a dyn ReadinessCheck, interval: Duration, max_wait: Duration) -> Self {
        Self {
            check,
            interval,
            max_wait,
        }
    }

    /// Returns `Ok(true)` on the first passing check, `Ok(false)` once
    /// `max_wait` has elapsed without one, and `Err` on a fault.
    ///
    /// Connection failures and non-ready answers are retried. A check
    /// still in flight at the deadline is abandoned.
    pub async fn probe(&self) -> Result<bool, ProbeFault> {
        let started = Instant::now();
        let deadline = deadline_after(started, self.max_wait);
        let target = self.check.describe();
        let mut attempts: u32 = 0;

        info!(%target, max_wait = ?self.max_wait, interval = ?self.interval, "waiting for target readiness");

        loop {
            attempts += 1;

            let result = match tokio::time::timeout_at(deadline, self.check.check()).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(%target, attempts, "readiness check still pending at deadline");
                    return Ok(false);
                }
            };

            match result {
                CheckResult::Ready => {
                    info!(%target, attempts, elapsed = ?started.elapsed(), "target is ready");
                    return Ok(true);
                }
                CheckResult::NotReady | CheckResult::Failed => {
                    debug!(%target, attempts, ?result, "target not ready yet");
                }
                CheckResult::Fault(reason) => {
                    error!(%target, attempts, %reason, "readiness check faulted");
                    return Err(ProbeFault(reason));
                }
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(%target, attempts, max_wait = ?self.max_wait, "target did not become ready in time");
                return Ok(false);
            }
            tokio::time::sleep_until(deadline_after(now, self.interval).min(deadline)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use preheat_target::BoxFuture;

    use super::*;

    /// Replays scripted results, then repeats the last one.
    struct ScriptedCheck {
        script: Mutex<Vec<CheckResult>>,
        calls: AtomicU32,
        latency: Duration,
    }

    impl ScriptedCheck {
        fn new(mut script: Vec<CheckResult>, latency: Duration) -> Self {
            script.reverse();
            Self {
                script: Mutex::new(script),
                calls: AtomicU32::new(0),
                latency,
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl ReadinessCheck for ScriptedCheck {
        fn check(&self) -> BoxFuture<'_, CheckResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = {
                let mut script = self.script.lock().unwrap();
                if script.len() > 1 {
                    script.pop().unwrap()
                } else {
                    script[0].clone()
                }
            };
            let latency = self.latency;
            Box::pin(async move {
                tokio::time::sleep(latency).await;
                next
            })
        }

        fn describe(&self) -> String {
            "scripted".to_string()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ready_after_retries() {
        let check = ScriptedCheck::new(
            vec![CheckResult::Failed, CheckResult::NotReady, CheckResult::Ready],
            Duration::from_millis(5),
        );
        let prober = ReadinessProber::new(&check, Duration::from_millis(100), Duration::from_secs(5));

        assert!(prober.probe().await.unwrap());
        assert_eq!(check.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn never_ready_times_out() {
        let check = ScriptedCheck::new(vec![CheckResult::NotReady], Duration::ZERO);
        let prober = ReadinessProber::new(&check, Duration::from_millis(100), Duration::from_secs(1));

        let started = Instant::now();
        assert!(!prober.probe().await.unwrap());
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(1));
        assert!(elapsed < Duration::from_millis(1200));
        assert!(check.calls() >= 10);
    }

    #[tokio::test(start_paused = true)]
    async fn fault_is_not_retried() {
        let check = ScriptedCheck::new(
            vec![CheckResult::Fault("no such method".to_string())],
            Duration::ZERO,
        );
        let prober = ReadinessProber::new(&check, Duration::from_millis(100), Duration::from_secs(5));

        let err = prober.probe().await.unwrap_err();
        assert_eq!(err.0, "no such method");
        assert_eq!(check.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unbounded_wait_does_not_overflow() {
        let check = ScriptedCheck::new(
            vec![CheckResult::NotReady, CheckResult::Ready],
            Duration::ZERO,
        );
        let prober = ReadinessProber::new(&check, Duration::from_millis(100), Duration::MAX);

        assert!(prober.probe().await.unwrap());
        assert_eq!(check.calls(), 2);
    }

    #[test]
    fn deadline_after_saturates() {
        let now = Instant::now();
        assert_eq!(deadline_after(now, Duration::from_secs(5)), now + Duration::from_secs(5));
        assert!(deadline_after(now, Duration::MAX) > now + Duration::from_secs(86_400 * 365));
    }

    #[tokio::test(start_paused = true)]
    async fn hung_check_is_bounded_by_deadline() {
        let check = ScriptedCheck::new(vec![CheckResult::Ready], Duration::from_secs(60));
        let prober = ReadinessProber::new(&check, Duration::from_millis(100), Duration::from_secs(2));

        let started = Instant::now();
        assert!(!prober.probe().await.unwrap());
        assert!(started.elapsed() < Duration::from_secs(3));
    }
}
