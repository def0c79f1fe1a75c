//! Config Commands

use anyhow::{bail, Result};
use clap::Subcommand;
use std::path::Path;
use uiheal_common::PipelineConfig;

use super::Outcome;
use crate::output::{print_success, OutputFormat};

#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the effective configuration
    Show,
}

pub fn execute(cmd: &ConfigCommands, path: &Path, format: OutputFormat) -> Result<Outcome> {
    match cmd {
        ConfigCommands::Init { force } => {
            if path.exists() && !force {
                bail!("{} already exists (use --force to overwrite)", path.display());
            }
            PipelineConfig::default().save(path)?;
            print_success(&format!("Wrote {}", path.display()));
        }
        ConfigCommands::Show => {
            let config = PipelineConfig::load(path)?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&config)?),
                OutputFormat::Yaml => print!("{}", serde_yaml::to_string(&config)?),
                OutputFormat::Table | OutputFormat::Plain => print!("{}", config.to_toml()?),
            }
        }
    }
    Ok(Outcome::Done)
}
