//! Error types for generation and orchestration

use thiserror::Error;
use uiheal_e2e::ExecError;

/// Failure of a single call to the AI backend
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Backend rejected the credential")]
    Unauthorized,

    #[error("No API key: set {0}")]
    MissingCredential(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Backend call timed out")]
    Timeout,

    #[error("Backend returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Malformed backend response: {0}")]
    Malformed(String),

    #[error("Backend returned an empty completion")]
    Empty,
}

impl BackendError {
    /// The backend cannot be reached or used at all
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            BackendError::Network(_)
                | BackendError::Timeout
                | BackendError::Unauthorized
                | BackendError::MissingCredential(_)
        )
    }

    /// Retrying cannot help
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            BackendError::Unauthorized | BackendError::MissingCredential(_)
        )
    }
}

/// GenerationFailure: synthesis or repair produced nothing usable
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Snapshot {0} has no elements")]
    EmptySnapshot(String),

    #[error("Requirements document is empty")]
    EmptyDocument,

    #[error("Backend failed after {attempts} attempt(s): {source}")]
    Backend {
        attempts: u32,
        #[source]
        source: BackendError,
    },

    #[error("Output rejected after {attempts} attempt(s): {reason}")]
    Rejected {
        attempts: u32,
        reason: String,
        output: String,
    },

    #[error("Generation cancelled")]
    Cancelled,
}

impl GenerationError {
    pub fn is_transport(&self) -> bool {
        matches!(self, GenerationError::Backend { source, .. } if source.is_transport())
    }
}

/// Stage-level errors. Per-testcase failures are ledger outcomes, not these.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Storage error: {0}")]
    Storage(#[from] uiheal_common::Error),

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Execution engine unavailable: {0}")]
    EngineUnavailable(#[from] ExecError),

    #[error("Unknown test case: {0}")]
    UnknownTestcase(String),

    #[error("Pipeline cancelled")]
    Cancelled,

    #[error("Worker task failed: {0}")]
    Worker(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
