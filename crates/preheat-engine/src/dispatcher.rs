//! Warmup dispatcher: a fixed pool of workers replaying the request list
//! against the target until a shared deadline.
//!
//! Each worker walks the request list in order, wraps around at the end,
//! and checks the deadline before every request. In-flight requests are
//! never interrupted; the transport's own timeout bounds the overrun.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use preheat_core::RequestSpec;
use preheat_health::deadline_after;
use preheat_target::{Delivery, Transport};

/// Totals for one warmup window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Requests the target answered, whatever the status.
    pub sent: u64,
    /// Requests that never reached the target.
    pub failed: u64,
}

#[derive(Default)]
struct Counters {
    sent: AtomicU64,
    failed: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> DispatchStats {
        DispatchStats {
            sent: self.sent.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        self.sent.store(0, Ordering::Relaxed);
        self.failed.store(0, Ordering::Relaxed);
    }
}

pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    requests: Arc<[RequestSpec]>,
    concurrency: usize,
    request_delay: Duration,
    counters: Arc<Counters>,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn Transport>, requests: Vec<RequestSpec>, concurrency: usize) -> Self {
        Self {
            transport,
            requests: requests.into(),
            concurrency: concurrency.max(1),
            request_delay: Duration::ZERO,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Pause between consecutive requests of one worker.
    pub fn with_request_delay(mut self, delay: Duration) -> Self {
        self.request_delay = delay;
        self
    }

    /// Totals of the current or most recent [`run`](Self::run), also
    /// after that run panicked.
    pub fn stats(&self) -> DispatchStats {
        self.counters.snapshot()
    }

    /// Run all workers until `deadline` and return the totals.
    ///
    /// A panicking worker is re-raised once the remaining workers have
    /// stopped, so the caller's guard sees it.
    pub async fn run(&self, deadline: Instant) -> DispatchStats {
        self.counters.reset();
        if self.requests.is_empty() {
            info!("no warmup requests configured, skipping dispatch");
            return DispatchStats::default();
        }

        info!(
            workers = self.concurrency,
            requests = self.requests.len(),
            window = ?deadline.saturating_duration_since(Instant::now()),
            "warmup started"
        );

        let mut workers = JoinSet::new();
        for id in 0..self.concurrency {
            workers.spawn(worker_loop(
                id,
                self.transport.clone(),
                self.requests.clone(),
                deadline,
                self.request_delay,
                self.counters.clone(),
            ));
        }

        let mut panic = None;
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(()) => {}
                Err(e) if e.is_panic() => {
                    warn!("warmup worker panicked");
                    panic.get_or_insert(e.into_panic());
                }
                Err(e) => warn!(error = %e, "warmup worker did not finish"),
            }
        }
        if let Some(payload) = panic {
            std::panic::resume_unwind(payload);
        }

        let stats = self.stats();
        info!(sent = stats.sent, failed = stats.failed, "warmup finished");
        stats
    }
}

async fn worker_loop(
    id: usize,
    transport: Arc<dyn Transport>,
    requests: Arc<[RequestSpec]>,
    deadline: Instant,
    delay: Duration,
    counters: Arc<Counters>,
) {
    let mut issued: u64 = 0;

    'outer: loop {
        for spec in requests.iter() {
            if Instant::now() >= deadline {
                break 'outer;
            }

            match transport.send(spec).await {
                Ok(Delivery::Success { body_len }) => {
                    counters.sent.fetch_add(1, Ordering::Relaxed);
                    trace!(worker = id, request = %spec, body_len, "warmup request ok");
                }
                Ok(Delivery::Rejected { detail }) => {
                    counters.sent.fetch_add(1, Ordering::Relaxed);
                    debug!(worker = id, request = %spec, %detail, "warmup request rejected by target");
                }
                Err(e) => {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    debug!(worker = id, request = %spec, error = %e, "warmup request failed");
                    // A failing transport can resolve without suspending.
                    tokio::task::yield_now().await;
                }
            }
            issued += 1;

            if !delay.is_zero() {
                tokio::time::sleep_until(deadline_after(Instant::now(), delay).min(deadline)).await;
            }
        }
    }

    debug!(worker = id, issued, "warmup worker stopped");
}
