//! uiheal browser-side plumbing
//!
//! Everything that touches Node and Playwright:
//! - running generated scripts and classifying the process outcome
//! - collecting page snapshots and checking script locators against a page
//! - static checks and skeletons for generated scripts
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  ExecutionEngine (trait)                                     │
//! │    └── PlaywrightEngine                                      │
//! │          node --require harness.js <script>                  │
//! │            ├── exit status + JSON result line                │
//! │            └── diagnostic::build_diagnostic -> Diagnostic    │
//! ├──────────────────────────────────────────────────────────────┤
//! │  SnapshotCollector   node collect.js  ->  Snapshot           │
//! │                      node check.js    ->  [LocatorCheck]     │
//! ├──────────────────────────────────────────────────────────────┤
//! │  lint::lint / lint::ensure_imports / scaffold::render_scaffold│
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod collector;
pub mod diagnostic;
pub mod engine;
pub mod error;
pub mod lint;
pub mod locators;
pub mod process;
pub mod scaffold;

pub use collector::{parse_snapshot_document, SnapshotCollector};
pub use engine::{EngineConfig, ExecutionEngine, PlaywrightEngine};
pub use error::{ExecError, ExecResult};
pub use lint::{ensure_imports, lint, LintIssue};
pub use locators::{
    check_against_snapshot, extract_locators, LocatorCheck, LocatorKind, LocatorStatus, ScriptLocator,
};
pub use scaffold::render_scaffold;
