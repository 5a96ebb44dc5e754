//! File probe: the "alive" and "ready" sentinel files.
//!
//! Existence is the only signal. Files are created empty and removed to
//! retract the signal. An external orchestrator reads them; this process
//! never reads them back except to clear stale state.

use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use preheat_core::FileProbeConfig;

#[derive(Debug, Error)]
#[error("sentinel file {path}: {source}")]
pub struct SentinelError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

/// The two sentinel files of one sidecar.
#[derive(Debug, Clone)]
pub struct SentinelFiles {
    liveness: PathBuf,
    readiness: PathBuf,
}

impl SentinelFiles {
    pub fn new(liveness: impl Into<PathBuf>, readiness: impl Into<PathBuf>) -> Self {
        Self {
            liveness: liveness.into(),
            readiness: readiness.into(),
        }
    }

    pub fn from_config(config: &FileProbeConfig) -> Self {
        Self::new(&config.liveness_path, &config.readiness_path)
    }

    pub fn liveness_path(&self) -> &Path {
        &self.liveness
    }

    pub fn readiness_path(&self) -> &Path {
        &self.readiness
    }

    pub fn mark_alive(&self) -> Result<(), SentinelError> {
        touch(&self.liveness)
    }

    pub fn clear_alive(&self) -> Result<(), SentinelError> {
        remove(&self.liveness)
    }

    pub fn mark_ready(&self) -> Result<(), SentinelError> {
        touch(&self.readiness)
    }

    pub fn clear_ready(&self) -> Result<(), SentinelError> {
        remove(&self.readiness)
    }

    pub fn is_alive(&self) -> Result<bool, SentinelError> {
        exists(&self.liveness)
    }

    pub fn is_ready(&self) -> Result<bool, SentinelError> {
        exists(&self.readiness)
    }
}

/// Create `path` if missing. Existing content is left alone.
pub fn touch(path: &Path) -> Result<(), SentinelError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map(|_| ())
        .map_err(|source| SentinelError {
            path: path.to_path_buf(),
            source,
        })?;
    debug!(path = %path.display(), "sentinel written");
    Ok(())
}

/// Remove `path`. Removing a missing file is not an error.
pub fn remove(path: &Path) -> Result<(), SentinelError> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            debug!(path = %path.display(), "sentinel removed");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(SentinelError {
            path: path.to_path_buf(),
            source,
        }),
    }
}

pub fn exists(path: &Path) -> Result<bool, SentinelError> {
    path.try_exists().map_err(|source| SentinelError {
        path: path.to_path_buf(),
        source,
    })
}
