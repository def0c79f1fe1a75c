//! uiheal CLI
//!
//! Stage-by-stage and end-to-end commands for the self-healing UI test
//! pipeline.

pub mod cli;
pub mod commands;
pub mod context;
pub mod output;
