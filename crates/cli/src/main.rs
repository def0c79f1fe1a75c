//! uiheal CLI - Main Entry Point

use clap::Parser;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use uiheal_cli::cli::{init_logging, Cli};
use uiheal_cli::commands;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_format);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, aborting in-flight work");
            trigger.cancel();
        }
    });

    commands::exit_code(commands::execute(cli, cancel).await)
}
