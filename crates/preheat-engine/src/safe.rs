//! Panic-safe runner.
//!
//! Wraps one stage of a run so that neither a panic nor an unrecoverable
//! fault can stop the orchestrator from reaching finalization. The
//! outcome is returned as a value; there is no process-wide flag.

use std::any::Any;
use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;
use tracing::error;

/// Outcome of a guarded stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Guarded<T> {
    /// `None` when the stage panicked or faulted.
    pub value: Option<T>,
    /// The stage panicked or reported an unrecoverable fault.
    pub panicked: bool,
}

impl<T> Guarded<T> {
    fn completed(value: T) -> Self {
        Self {
            value: Some(value),
            panicked: false,
        }
    }

    fn aborted() -> Self {
        Self {
            value: None,
            panicked: true,
        }
    }
}

/// Run `work` to completion, converting panics and `Err` faults into a
/// `Guarded` with `panicked` set. The work is not retried.
pub async fn run_safely<F, T, E>(stage: &str, work: F) -> Guarded<T>
where
    F: Future<Output = Result<T, E>>,
    E: Display,
{
    match AssertUnwindSafe(work).catch_unwind().await {
        Ok(Ok(value)) => Guarded::completed(value),
        Ok(Err(fault)) => {
            error!(stage, error = %fault, "stage raised an unrecoverable fault");
            Guarded::aborted()
        }
        Err(payload) => {
            error!(stage, panic = %panic_message(payload.as_ref()), "stage panicked, continuing to finalize");
            Guarded::aborted()
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
