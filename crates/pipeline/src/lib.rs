//! uiheal self-healing pipeline
//!
//! Generation, classification, repair and orchestration on top of
//! `uiheal-common` (data model, ledger, storage) and `uiheal-e2e`
//! (script execution).
//!
//! ```text
//! Snapshot ──TestCaseSynthesizer──> TestCaseSpec ──ScriptSynthesizer──> Script
//!                                                                         │
//!            ┌─────────────── LineageDriver (one per testcase) ───────────┘
//!            │   ExecutionEngine ──> RunResult ──FailureAnalyzer──> FailureClass
//!            │        ▲                                                │
//!            │        └──────────── AutoHealer (bounded) <─────────────┘
//!            ▼
//!        RunLedger ──aggregate──> RunReport
//! ```
//!
//! [`Pipeline`] fans lineages out over a bounded worker pool.
//! [`RequirementExtractor`] optionally turns a requirements document into
//! coverage targets for case synthesis.

pub mod analyzer;
pub mod backend;
pub mod client;
pub mod driver;
pub mod error;
pub mod healer;
pub mod pipeline;
pub mod prompts;
pub mod requirements;
pub mod scripts;
pub mod selectors;
pub mod testcases;
pub mod text;

pub use analyzer::FailureAnalyzer;
pub use backend::{ChatCompletionsBackend, CompletionBackend, Prompt};
pub use client::{BackendStats, GenerationClient, RetryPolicy};
pub use driver::LineageDriver;
pub use error::{BackendError, GenerationError, PipelineError, Result};
pub use healer::{AutoHealer, HealContext, HealOutcome};
pub use pipeline::{CaseFailure, CaseSynthesis, Pipeline, PipelineSummary};
pub use prompts::RepairRequest;
pub use requirements::RequirementExtractor;
pub use scripts::ScriptSynthesizer;
pub use testcases::TestCaseSynthesizer;
