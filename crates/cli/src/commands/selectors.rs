//! Selector check for the current script of each lineage
//!
//! Finds stale locators before a full run. Nothing here touches the ledger.

use anyhow::Result;
use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uiheal_common::{LineageRecord, Workspace};
use uiheal_e2e::{
    check_against_snapshot, extract_locators, ExecError, LocatorCheck, LocatorStatus, ScriptLocator,
    SnapshotCollector,
};

use super::Outcome;
use crate::cli::CaseFilter;
use crate::context::Context;
use crate::output::{print_list, print_success, print_warning, LocatorRow};

/// One script to check
struct Target {
    testcase_id: String,
    generation: u32,
    snapshot_id: String,
    url: String,
    locators: Vec<ScriptLocator>,
}

fn failed_checks(locators: &[ScriptLocator], reason: &str) -> Vec<LocatorCheck> {
    locators
        .iter()
        .map(|locator| LocatorCheck {
            locator: locator.clone(),
            status: LocatorStatus::Error {
                reason: reason.to_string(),
            },
        })
        .collect()
}

async fn targets(
    workspace: &Workspace,
    records: Vec<LineageRecord>,
    filter: &CaseFilter,
) -> Result<Vec<Target>> {
    let mut targets = Vec::new();
    for record in records {
        if !filter.matches(&record.testcase_id) {
            continue;
        }
        let Some(script) = record.active_script() else {
            debug!(testcase = %record.testcase_id, "No script yet");
            continue;
        };
        let locators = extract_locators(&script.source_text);
        if locators.is_empty() {
            print_warning(&format!(
                "{}: no selectors in generation {}",
                record.testcase_id, script.generation
            ));
            continue;
        }
        let spec = workspace.load_testcase(&record.testcase_id).await?;
        targets.push(Target {
            testcase_id: record.testcase_id.clone(),
            generation: script.generation,
            snapshot_id: spec.snapshot_id,
            url: spec.target_url,
            locators,
        });
    }
    Ok(targets)
}

async fn check_offline(workspace: &Workspace, target: &Target) -> Vec<LocatorCheck> {
    match workspace.load_snapshot(&target.snapshot_id).await {
        Ok(snapshot) => check_against_snapshot(&target.locators, &snapshot),
        Err(e) => {
            warn!(testcase = %target.testcase_id, "Snapshot unavailable: {}", e);
            failed_checks(&target.locators, &format!("snapshot unavailable: {}", e))
        }
    }
}

async fn check_live(collector: &SnapshotCollector, target: &Target) -> Result<Vec<LocatorCheck>, ExecError> {
    match collector.check_locators(&target.url, &target.locators).await {
        Ok(checks) => Ok(checks),
        Err(e @ ExecError::NodeNotFound(_)) => Err(e),
        Err(e) => {
            warn!(testcase = %target.testcase_id, "Locator check failed: {}", e);
            Ok(failed_checks(&target.locators, &e.to_string()))
        }
    }
}

/// Resolve the selectors of every selected script, offline or on the live page
pub async fn check(
    ctx: &Context,
    filter: &CaseFilter,
    offline: bool,
    cancel: &CancellationToken,
) -> Result<Outcome> {
    let workspace = ctx.workspace().await?;
    let ledger = workspace.load_ledger().await?;
    let targets = targets(&workspace, ledger.records(), filter).await?;
    if targets.is_empty() {
        print_warning("No scripts to check; run `uiheal generate-scripts` first");
        return Ok(Outcome::Done);
    }

    let collector = if offline { None } else { Some(ctx.collector()?) };
    let (workspace_ref, collector_ref) = (&workspace, collector.as_ref());
    let checks = stream::iter(&targets)
        .map(|target| async move {
            match collector_ref {
                Some(collector) => check_live(collector, target).await,
                None => Ok(check_offline(workspace_ref, target).await),
            }
        })
        .buffered(ctx.workers())
        .collect::<Vec<_>>();

    let results = tokio::select! {
        _ = cancel.cancelled() => return Ok(Outcome::Cancelled),
        results = checks => results,
    };

    let mut rows = Vec::new();
    for (target, result) in targets.iter().zip(results) {
        let checks = match result {
            Ok(checks) => checks,
            Err(e) => return Ok(Outcome::Systemic(format!("execution engine unavailable: {}", e))),
        };
        rows.extend(
            checks
                .iter()
                .map(|check| LocatorRow::new(&target.testcase_id, target.generation, check)),
        );
    }
    print_list(&rows, ctx.format);

    let missing = rows
        .iter()
        .filter(|row| row.status == LocatorStatus::NotFound)
        .count();
    print_success(&format!(
        "Checked {} selector(s) in {} script(s): {} not found",
        rows.len(),
        targets.len(),
        missing
    ));
    Ok(Outcome::Done)
}
