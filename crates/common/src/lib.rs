//! uiheal Common Library
//!
//! Data model, configuration, artifact layout and run ledger shared by the
//! execution engine, the healing pipeline and the CLI.

pub mod artifact;
pub mod config;
pub mod error;
pub mod ledger;
pub mod queue;
pub mod report;
pub mod types;
pub mod workspace;

// Re-export commonly used types
pub use artifact::ArtifactStore;
pub use config::PipelineConfig;
pub use error::{Error, Result};
pub use ledger::{
    AbandonReason, LedgerEntry, LedgerSink, LineagePhase, LineageRecord, MemorySink, RunLedger,
};
pub use queue::{FailureQueue, FailureRecord};
pub use report::RunReport;
pub use types::*;
pub use workspace::Workspace;

/// uiheal version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default config file name, looked up in the current directory
pub const DEFAULT_CONFIG_FILE: &str = "uiheal.toml";
