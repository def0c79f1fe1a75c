//! Report and status commands

use anyhow::Result;
use uiheal_common::Error as StorageError;

use super::Outcome;
use crate::context::Context;
use crate::output::{print_list, print_report, print_success, LineageRow};

/// Aggregate the sealed ledger into `report.json`.
///
/// Refuses while any lineage is still in flight; the report stage only runs
/// once every test case has a verdict.
pub async fn report(ctx: &Context) -> Result<Outcome> {
    let workspace = ctx.workspace().await?;
    let ledger = workspace.load_ledger().await?;
    if ledger.is_empty() {
        return Ok(Outcome::Systemic("ledger is empty; nothing to report".into()));
    }

    let report = match ledger.aggregate() {
        Ok(report) => report,
        Err(StorageError::LedgerNotTerminal { pending }) => {
            return Ok(Outcome::Systemic(format!(
                "{} test case(s) have no verdict yet: {}",
                pending.len(),
                pending.join(", ")
            )));
        }
        Err(e) => return Err(e.into()),
    };

    let path = workspace.write_report(&report).await?;
    print_report(&report, ctx.format);
    print_success(&format!("Report written to {}", path.display()));
    Ok(Outcome::Done)
}

pub async fn status(ctx: &Context) -> Result<Outcome> {
    let workspace = ctx.workspace().await?;
    let ledger = workspace.load_ledger().await?;
    let rows: Vec<LineageRow> = ledger.records().iter().map(LineageRow::from).collect();
    print_list(&rows, ctx.format);

    let queued = workspace.failure_queue().len()?;
    if queued > 0 {
        println!("{} failure(s) waiting for `uiheal heal`", queued);
    }
    Ok(Outcome::Done)
}
