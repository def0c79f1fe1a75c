//! Command-line arguments

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::commands::config::ConfigCommands;
use crate::output::OutputFormat;

/// uiheal - self-healing UI test pipeline
#[derive(Debug, Parser)]
#[command(name = "uiheal")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file
    #[arg(long, env = "UIHEAL_CONFIG", default_value = uiheal_common::DEFAULT_CONFIG_FILE, global = true)]
    pub config: PathBuf,

    /// Working directory for snapshots, scripts and the ledger
    #[arg(long, env = "UIHEAL_WORKDIR", global = true)]
    pub workdir: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    pub format: OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log line format
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Concurrent lineages (overrides pipeline.workers)
    #[arg(long, env = "UIHEAL_WORKERS", global = true)]
    pub workers: Option<usize>,

    /// Heal budget per test case (overrides heal.max_heals)
    #[arg(long, env = "UIHEAL_MAX_HEALS", global = true)]
    pub max_heals: Option<u32>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Where snapshots come from
#[derive(Debug, Clone, Default, Args)]
pub struct SnapshotSource {
    /// Page to capture (repeatable)
    #[arg(long = "url")]
    pub urls: Vec<String>,

    /// Import snapshots from a JSON document instead of a browser
    #[arg(long, conflicts_with = "urls")]
    pub import: Option<PathBuf>,
}

impl SnapshotSource {
    pub fn is_empty(&self) -> bool {
        self.urls.is_empty() && self.import.is_none()
    }
}

/// Restrict a stage to some test cases
#[derive(Debug, Clone, Default, Args)]
pub struct CaseFilter {
    /// Test case id (repeatable; default: all)
    #[arg(long = "case")]
    pub cases: Vec<String>,
}

impl CaseFilter {
    pub fn matches(&self, testcase_id: &str) -> bool {
        self.cases.is_empty() || self.cases.iter().any(|c| c == testcase_id)
    }
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Capture or import page snapshots
    Snapshot {
        #[command(flatten)]
        source: SnapshotSource,

        /// List stored snapshots instead of capturing
        #[arg(long, conflicts_with_all = ["urls", "import"])]
        list: bool,
    },

    /// Synthesize test cases from stored snapshots
    GenerateCases {
        /// Snapshot id (repeatable; default: all)
        #[arg(long = "snapshot")]
        snapshots: Vec<String>,

        /// Requirements document (PRD) whose requirements the cases should cover
        #[arg(long)]
        requirements: Option<PathBuf>,
    },

    /// Synthesize a script for every test case awaiting one
    GenerateScripts(CaseFilter),

    /// Run freshly generated scripts
    Run(CaseFilter),

    /// Check every locator in the current scripts against the page
    CheckSelectors {
        #[command(flatten)]
        filter: CaseFilter,

        /// Use the stored snapshot instead of loading the live page
        #[arg(long)]
        offline: bool,
    },

    /// Heal failed runs from the failure queue
    Heal(CaseFilter),

    /// Re-run healed scripts
    RerunHealed(CaseFilter),

    /// Aggregate the ledger into a report
    Report,

    /// Show the phase of every lineage
    Status,

    /// Run every stage in-process until each test case has a verdict
    Pipeline {
        #[command(flatten)]
        source: SnapshotSource,
    },

    /// Manage the configuration file
    #[command(subcommand)]
    Config(ConfigCommands),

    /// Show version information
    Version,
}

/// Install the global subscriber; `RUST_LOG` wins over `--verbose`
pub fn init_logging(verbose: bool, format: LogFormat) {
    let log_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_command_with_overrides() {
        let cli = Cli::try_parse_from([
            "uiheal", "--workers", "2", "--max-heals", "1", "run", "--case", "a", "--case", "b",
        ])
        .unwrap();
        assert_eq!(cli.workers, Some(2));
        assert_eq!(cli.max_heals, Some(1));
        match cli.command {
            Commands::Run(filter) => {
                assert!(filter.matches("a"));
                assert!(filter.matches("b"));
                assert!(!filter.matches("c"));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["uiheal", "report", "--format", "json", "--log-format", "json"])
            .unwrap();
        assert_eq!(cli.format, OutputFormat::Json);
        assert_eq!(cli.log_format, LogFormat::Json);
        assert!(matches!(cli.command, Commands::Report));
    }

    #[test]
    fn test_url_and_import_conflict() {
        let result = Cli::try_parse_from([
            "uiheal", "pipeline", "--url", "http://localhost:3000", "--import", "snap.json",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_stage_names() {
        for stage in [
            "generate-cases",
            "generate-scripts",
            "check-selectors",
            "heal",
            "rerun-healed",
            "status",
        ] {
            assert!(Cli::try_parse_from(["uiheal", stage]).is_ok(), "{}", stage);
        }
    }

    #[test]
    fn test_check_selectors_and_requirements_flags() {
        let cli = Cli::try_parse_from(["uiheal", "check-selectors", "--offline", "--case", "a"]).unwrap();
        match cli.command {
            Commands::CheckSelectors { filter, offline } => {
                assert!(offline);
                assert!(filter.matches("a"));
                assert!(!filter.matches("b"));
            }
            other => panic!("unexpected command {:?}", other),
        }

        let cli = Cli::try_parse_from(["uiheal", "generate-cases", "--requirements", "prd.md"]).unwrap();
        match cli.command {
            Commands::GenerateCases { requirements, snapshots } => {
                assert_eq!(requirements, Some(PathBuf::from("prd.md")));
                assert!(snapshots.is_empty());
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        assert!(CaseFilter::default().matches("anything"));
        assert!(SnapshotSource::default().is_empty());
    }
}
