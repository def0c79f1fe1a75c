//! Error types for the execution engine and snapshot collector
//!
//! These are infrastructure failures: the test could not be run at all.
//! A script that runs and fails is a `RunResult`, not an error.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecError {
    #[error("Node binary not found: {0}. Install Node.js and run `npx playwright install`")]
    NodeNotFound(PathBuf),

    #[error("Failed to spawn {binary}: {source}")]
    Spawn {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Script file missing: {0}")]
    ScriptMissing(PathBuf),

    #[error("Snapshot collection failed for {url}: {reason}")]
    Collector { url: String, reason: String },

    #[error("Snapshot collection timed out after {0}s")]
    CollectorTimeout(u64),

    #[error("Invalid snapshot document: {0}")]
    InvalidSnapshot(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ExecError {
    /// Whether retrying the same call could succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, ExecError::Spawn { .. } | ExecError::Io(_))
    }
}

pub type ExecResult<T> = Result<T, ExecError>;
