//! Fail-open / fail-closed policy for the ready sentinel.
//!
//! The three ways a run can fall short stay separate until this point and
//! are collapsed into one decision here.

/// What went wrong during a run, if anything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Verdict {
    /// Readiness was never confirmed (timeout, fault, or unreachable).
    pub readiness_fault: bool,
    /// Warmup requests were configured but none reached the target.
    pub dispatch_fault: bool,
    /// A stage panicked or raised an unrecoverable fault.
    pub panicked: bool,
}

impl Verdict {
    pub fn is_clean(&self) -> bool {
        !(self.readiness_fault || self.dispatch_fault || self.panicked)
    }
}

/// Whether the ready sentinel should be written.
///
/// With `fail_readiness` off the sidecar fails open and always reports
/// ready; with it on, any fault keeps the sentinel absent.
pub fn should_mark_ready(verdict: &Verdict, fail_readiness: bool) -> bool {
    !fail_readiness || verdict.is_clean()
}
