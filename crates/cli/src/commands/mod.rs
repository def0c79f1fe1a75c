//! CLI Commands

pub mod cases;
pub mod config;
pub mod pipeline;
pub mod report;
pub mod selectors;
pub mod snapshot;
pub mod stages;

use anyhow::Result;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;

use crate::cli::{Cli, Commands};
use crate::context::Context;
use crate::output::print_error;

/// How a command ended, beyond plain errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Stage finished; abandoned test cases are a reported result, not a failure
    Done,
    /// Backend unreachable, engine missing or similar
    Systemic(String),
    /// Aborted by the operator
    Cancelled,
}

impl Outcome {
    pub fn exit_code(&self) -> u8 {
        match self {
            Outcome::Done => 0,
            Outcome::Systemic(_) => 1,
            Outcome::Cancelled => 130,
        }
    }
}

/// Run the selected command
pub async fn execute(cli: Cli, cancel: CancellationToken) -> Result<Outcome> {
    match &cli.command {
        Commands::Config(cmd) => return config::execute(cmd, &cli.config, cli.format),
        Commands::Version => {
            println!("uiheal v{}", uiheal_common::VERSION);
            println!("Self-healing UI test pipeline (Node + Playwright)");
            return Ok(Outcome::Done);
        }
        _ => {}
    }

    let ctx = Context::load(&cli)?;
    match &cli.command {
        Commands::Snapshot { source, list } => snapshot::execute(&ctx, source, *list, &cancel).await,
        Commands::GenerateCases {
            snapshots,
            requirements,
        } => cases::execute(&ctx, snapshots, requirements.as_deref(), &cancel).await,
        Commands::GenerateScripts(filter) => stages::generate_scripts(&ctx, filter, &cancel).await,
        Commands::Run(filter) => stages::run(&ctx, filter, &cancel).await,
        Commands::CheckSelectors { filter, offline } => {
            selectors::check(&ctx, filter, *offline, &cancel).await
        }
        Commands::Heal(filter) => stages::heal(&ctx, filter, &cancel).await,
        Commands::RerunHealed(filter) => stages::rerun_healed(&ctx, filter, &cancel).await,
        Commands::Report => report::report(&ctx).await,
        Commands::Status => report::status(&ctx).await,
        Commands::Pipeline { source } => pipeline::execute(&ctx, source, &cancel).await,
        Commands::Config(_) | Commands::Version => Ok(Outcome::Done),
    }
}

/// Map a command result to the process exit code
pub fn exit_code(result: Result<Outcome>) -> ExitCode {
    let code = match result {
        Ok(Outcome::Systemic(reason)) => {
            print_error(&reason);
            1
        }
        Ok(outcome) => outcome.exit_code(),
        Err(e) => {
            print_error(&format!("{:#}", e));
            1
        }
    };
    ExitCode::from(code)
}
