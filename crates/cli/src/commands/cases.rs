//! Test case synthesis stage

use anyhow::{Context as _, Result};
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uiheal_common::{Snapshot, TestCaseSpec, Workspace};
use uiheal_pipeline::{CaseSynthesis, GenerationError, Pipeline, RequirementExtractor};

use super::Outcome;
use crate::context::Context;
use crate::output::{print_list, print_success, print_warning, CaseRow};

/// Synthesize and store cases; returns the synthesis for further stages
pub async fn synthesize(
    pipeline: &Pipeline,
    workspace: &Workspace,
    snapshots: &[Snapshot],
    cancel: &CancellationToken,
) -> Result<CaseSynthesis> {
    let synthesis = pipeline.synthesize_cases(snapshots, cancel).await;
    for (spec, _) in &synthesis.cases {
        workspace.save_testcase(spec).await?;
    }
    info!(
        cases = synthesis.cases.len(),
        failed_snapshots = synthesis.failures.len(),
        "Test case synthesis finished"
    );
    for failure in &synthesis.failures {
        print_warning(&format!("{}: {}", failure.source_url, failure.reason));
    }
    Ok(synthesis)
}

/// Requirements extracted from a product document, or the outcome that ends the stage
async fn extract_requirements(
    ctx: &Context,
    workspace: &Workspace,
    path: &Path,
    cancel: &CancellationToken,
) -> Result<std::result::Result<Vec<String>, Outcome>> {
    let document = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let extractor = RequirementExtractor::new(ctx.client()?);
    let requirements = match extractor.extract(&document, cancel).await {
        Ok(requirements) => requirements,
        Err(GenerationError::Cancelled) => return Ok(Err(Outcome::Cancelled)),
        Err(e) if e.is_transport() => {
            return Ok(Err(Outcome::Systemic(format!("AI backend unreachable: {}", e))))
        }
        Err(e) => {
            return Err(anyhow::Error::new(e)
                .context(format!("extracting requirements from {}", path.display())))
        }
    };
    let saved = workspace.save_requirements(&requirements).await?;
    print_success(&format!(
        "Extracted {} requirement(s) to {}",
        requirements.len(),
        saved.display()
    ));
    Ok(Ok(requirements))
}

pub async fn execute(
    ctx: &Context,
    snapshot_ids: &[String],
    requirements: Option<&Path>,
    cancel: &CancellationToken,
) -> Result<Outcome> {
    let workspace = ctx.workspace().await?;
    let snapshots = if snapshot_ids.is_empty() {
        workspace.list_snapshots().await?
    } else {
        let mut snapshots = Vec::with_capacity(snapshot_ids.len());
        for id in snapshot_ids {
            snapshots.push(workspace.load_snapshot(id).await?);
        }
        snapshots
    };
    if snapshots.is_empty() {
        return Ok(Outcome::Systemic(
            "no snapshots in the workspace; run `uiheal snapshot` first".into(),
        ));
    }

    let mut pipeline = ctx.pipeline(&workspace)?;
    if let Some(path) = requirements {
        match extract_requirements(ctx, &workspace, path, cancel).await? {
            Ok(requirements) => pipeline = pipeline.with_requirements(requirements),
            Err(outcome) => return Ok(outcome),
        }
    }
    let synthesis = synthesize(&pipeline, &workspace, &snapshots, cancel).await?;
    if synthesis.cancelled || cancel.is_cancelled() {
        return Ok(Outcome::Cancelled);
    }
    if pipeline.backend_unreachable() {
        return Ok(Outcome::Systemic("AI backend unreachable".into()));
    }

    let specs: Vec<&TestCaseSpec> = synthesis.cases.iter().map(|(spec, _)| spec).collect();
    let rows: Vec<CaseRow> = specs.iter().map(|spec| CaseRow::from(*spec)).collect();
    print_list(&rows, ctx.format);
    print_success(&format!(
        "Synthesized {} test case(s) from {} snapshot(s)",
        rows.len(),
        snapshots.len()
    ));
    Ok(Outcome::Done)
}
