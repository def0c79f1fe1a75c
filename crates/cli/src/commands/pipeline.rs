//! Pipeline Command - every stage in-process
//!
//! snapshot -> test cases -> scripts -> run -> heal -> rerun -> report,
//! with lineages fanned out over the configured worker pool. Failures move
//! to the healer through an in-memory queue instead of `errors.jsonl`.

use anyhow::Result;
use colored::Colorize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{cases, snapshot, Outcome};
use crate::cli::SnapshotSource;
use crate::context::Context;
use crate::output::{print_report, OutputFormat};

pub async fn execute(
    ctx: &Context,
    source: &SnapshotSource,
    cancel: &CancellationToken,
) -> Result<Outcome> {
    let workspace = ctx.workspace().await?;

    let snapshots = if source.is_empty() {
        workspace.list_snapshots().await?
    } else {
        snapshot::acquire(ctx, &workspace, source, cancel).await?
    };
    if cancel.is_cancelled() {
        return Ok(Outcome::Cancelled);
    }
    if snapshots.is_empty() {
        return Ok(Outcome::Systemic(
            "no snapshots: pass --url or --import, or run `uiheal snapshot` first".into(),
        ));
    }

    if ctx.format == OutputFormat::Table {
        println!("{}", "━".repeat(60).dimmed());
        println!(
            "{} {} snapshot(s), {} worker(s), heal budget {}",
            "Pipeline:".cyan().bold(),
            snapshots.len(),
            ctx.workers(),
            ctx.config.heal.max_heals
        );
        println!("{}", "━".repeat(60).dimmed());
    }

    let pipeline = ctx.pipeline(&workspace)?;
    let synthesis = cases::synthesize(&pipeline, &workspace, &snapshots, cancel).await?;
    if synthesis.cancelled || cancel.is_cancelled() {
        return Ok(Outcome::Cancelled);
    }
    if synthesis.cases.is_empty() {
        let reason = if pipeline.backend_unreachable() {
            "AI backend unreachable"
        } else {
            "no test cases could be synthesized"
        };
        return Ok(Outcome::Systemic(reason.into()));
    }

    let cases = synthesis
        .cases
        .into_iter()
        .map(|(spec, snapshot)| (spec, Some(snapshot)))
        .collect();
    let mut summary = pipeline.run(cases, cancel).await?;
    summary.case_failures = synthesis.failures;

    // every lineage is terminal once run() returns, aborted ones included
    let report = pipeline.report()?;
    let path = workspace.write_report(&report).await?;
    print_report(&report, ctx.format);
    info!("Report written to {}", path.display());

    if summary.cancelled {
        return Ok(Outcome::Cancelled);
    }
    if let Some(reason) = summary.engine_unavailable {
        return Ok(Outcome::Systemic(format!("execution engine unavailable: {}", reason)));
    }
    if summary.backend_unreachable {
        return Ok(Outcome::Systemic("AI backend unreachable".into()));
    }
    Ok(Outcome::Done)
}
