//! Output formatting for CLI

use clap::ValueEnum;
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use uiheal_common::report::RunReport;
use uiheal_common::{LineagePhase, LineageRecord, Snapshot, TestCaseSpec};
use uiheal_e2e::{LocatorCheck, LocatorStatus};

/// Output format
#[derive(Debug, Clone, Copy, ValueEnum, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable table format
    #[default]
    Table,
    /// JSON format
    Json,
    /// YAML format
    Yaml,
    /// Plain text format
    Plain,
}

/// Trait for items that can be displayed in a table
pub trait TableDisplay {
    fn headers() -> Vec<&'static str>;
    fn row(&self) -> Vec<String>;
}

fn table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

/// Print a list of items
pub fn print_list<T: Serialize + TableDisplay>(items: &[T], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(items).unwrap_or_default());
            return;
        }
        OutputFormat::Yaml => {
            print!("{}", serde_yaml::to_string(items).unwrap_or_default());
            return;
        }
        _ => {}
    }

    if items.is_empty() {
        println!("No items found.");
        return;
    }

    match format {
        OutputFormat::Table => {
            let mut table = table();
            table.set_header(T::headers());
            for item in items {
                table.add_row(item.row());
            }
            println!("{table}");
        }
        _ => {
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    println!("---");
                }
                let row = item.row();
                for (header, value) in T::headers().iter().zip(row.iter()) {
                    println!("{}: {}", header, value);
                }
            }
        }
    }
}

/// Print success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green(), message);
}

/// Print error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red(), message);
}

/// Print warning message
pub fn print_warning(message: &str) {
    eprintln!("{} {}", "!".yellow(), message);
}

// ============================================================================
// Rows
// ============================================================================

#[derive(Serialize)]
pub struct SnapshotRow {
    pub id: String,
    pub url: String,
    pub elements: usize,
    pub captured_at: String,
}

impl From<&Snapshot> for SnapshotRow {
    fn from(snapshot: &Snapshot) -> Self {
        Self {
            id: snapshot.id.clone(),
            url: snapshot.source_url.clone(),
            elements: snapshot.element_index.len(),
            captured_at: snapshot.captured_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

impl TableDisplay for SnapshotRow {
    fn headers() -> Vec<&'static str> {
        vec!["ID", "URL", "Elements", "Captured"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.id.clone(),
            self.url.clone(),
            self.elements.to_string(),
            self.captured_at.clone(),
        ]
    }
}

#[derive(Serialize)]
pub struct CaseRow {
    pub id: String,
    pub title: String,
    pub steps: usize,
    pub snapshot_id: String,
}

impl From<&TestCaseSpec> for CaseRow {
    fn from(spec: &TestCaseSpec) -> Self {
        Self {
            id: spec.id.clone(),
            title: spec.title.clone(),
            steps: spec.steps.len(),
            snapshot_id: spec.snapshot_id.clone(),
        }
    }
}

impl TableDisplay for CaseRow {
    fn headers() -> Vec<&'static str> {
        vec!["ID", "Title", "Steps", "Snapshot"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.id.clone(),
            self.title.clone(),
            self.steps.to_string(),
            self.snapshot_id.clone(),
        ]
    }
}

#[derive(Serialize)]
pub struct LineageRow {
    pub testcase_id: String,
    pub phase: LineagePhase,
    pub generation: Option<u32>,
    pub runs: usize,
    pub heals: u32,
    pub note: String,
}

impl From<&LineageRecord> for LineageRow {
    fn from(record: &LineageRecord) -> Self {
        let note = match (&record.abandon_reason, record.last_entry()) {
            (Some(reason), _) => reason.to_string(),
            (None, Some(entry)) => entry
                .failure
                .as_ref()
                .map(|f| f.category.to_string())
                .unwrap_or_default(),
            (None, None) => String::new(),
        };
        Self {
            testcase_id: record.testcase_id.clone(),
            phase: record.phase,
            generation: record.final_generation(),
            runs: record.entries.len(),
            heals: record.heal_count,
            note,
        }
    }
}

fn colored_phase(phase: LineagePhase) -> String {
    match phase {
        LineagePhase::Passed => phase.to_string().green().to_string(),
        LineagePhase::Abandoned => phase.to_string().red().to_string(),
        LineagePhase::Failed => phase.to_string().yellow().to_string(),
        _ => phase.to_string(),
    }
}

impl TableDisplay for LineageRow {
    fn headers() -> Vec<&'static str> {
        vec!["Test case", "Phase", "Gen", "Runs", "Heals", "Note"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.testcase_id.clone(),
            colored_phase(self.phase),
            self.generation.map(|g| g.to_string()).unwrap_or_else(|| "-".into()),
            self.runs.to_string(),
            self.heals.to_string(),
            self.note.clone(),
        ]
    }
}

#[derive(Serialize)]
pub struct LocatorRow {
    pub testcase_id: String,
    pub generation: u32,
    pub kind: String,
    pub selector: String,
    pub status: LocatorStatus,
}

impl LocatorRow {
    pub fn new(testcase_id: &str, generation: u32, check: &LocatorCheck) -> Self {
        Self {
            testcase_id: testcase_id.to_string(),
            generation,
            kind: check.locator.kind.to_string(),
            selector: check.locator.value.clone(),
            status: check.status.clone(),
        }
    }
}

impl TableDisplay for LocatorRow {
    fn headers() -> Vec<&'static str> {
        vec!["Test case", "Gen", "Kind", "Selector", "Status"]
    }

    fn row(&self) -> Vec<String> {
        let status = self.status.to_string();
        let status = match self.status {
            LocatorStatus::Found { .. } => status.green().to_string(),
            LocatorStatus::NotFound => status.red().to_string(),
            LocatorStatus::Error { .. } => status.yellow().to_string(),
        };
        vec![
            self.testcase_id.clone(),
            self.generation.to_string(),
            self.kind.clone(),
            self.selector.clone(),
            status,
        ]
    }
}

/// Print the aggregated run report
pub fn print_report(report: &RunReport, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(report).unwrap_or_default());
            return;
        }
        OutputFormat::Yaml => {
            print!("{}", serde_yaml::to_string(report).unwrap_or_default());
            return;
        }
        _ => {}
    }

    println!("{}", "━".repeat(60).dimmed());
    println!("{}", " Run Report".bold());
    println!("{}", "━".repeat(60).dimmed());
    println!();
    println!("  Test cases:  {}", report.total_testcases);
    println!("  Passed:      {}", report.passed.to_string().green());
    println!("  Abandoned:   {}", report.abandoned.to_string().red());
    println!(
        "  Runs:        {} ({} pass, {} fail, {} error)",
        report.runs.total(),
        report.runs.pass,
        report.runs.fail,
        report.runs.error
    );
    println!();

    if !report.failure_categories.is_empty() {
        println!("{}", "Failure categories:".bold());
        for (category, count) in &report.failure_categories {
            println!("  {:<22} {}", category.to_string(), count);
        }
        println!();
    }

    println!("{}", "Healing:".bold());
    println!(
        "  Attempts:    {} ({} applied, {} reruns, {} no-op, {} unavailable)",
        report.heal.attempts,
        report.heal.applied,
        report.heal.reruns,
        report.heal.no_ops,
        report.heal.unavailable
    );
    println!(
        "  Healed:      {}/{} test cases passed after healing ({:.0}%)",
        report.heal.healed_to_pass,
        report.heal.healed_testcases,
        report.heal.success_rate * 100.0
    );
    println!();

    let rows: Vec<LineageRow> = report
        .testcases
        .iter()
        .map(|t| LineageRow {
            testcase_id: t.testcase_id.clone(),
            phase: t.verdict,
            generation: t.final_generation,
            runs: t.trail.len(),
            heals: t.heal_count,
            note: t
                .abandon_reason
                .map(|r| r.to_string())
                .unwrap_or_default(),
        })
        .collect();
    print_list(&rows, OutputFormat::Table);
}
