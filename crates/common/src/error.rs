//! Error types for uiheal storage and lifecycle bookkeeping

use thiserror::Error;

/// Result type alias using the common Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the data model, artifact store and run ledger
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config write error: {0}")]
    ConfigWrite(#[from] toml::ser::Error),

    #[error("Resource not found: {kind} with id {id}")]
    NotFound { kind: String, id: String },

    #[error("Artifact already exists with different content: {0}")]
    ArtifactConflict(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Invalid lineage for {testcase_id}: {reason}")]
    InvalidLineage { testcase_id: String, reason: String },

    #[error("Run ledger is sealed; no further appends are accepted")]
    LedgerSealed,

    #[error("{} lineage(s) have not reached a terminal state: {}", pending.len(), pending.join(", "))]
    LedgerNotTerminal { pending: Vec<String> },
}

impl Error {
    pub(crate) fn not_found(kind: &str, id: impl Into<String>) -> Self {
        Error::NotFound {
            kind: kind.to_string(),
            id: id.into(),
        }
    }
}
