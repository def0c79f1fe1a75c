//! Snapshot Commands

use anyhow::{Context as _, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uiheal_common::{Snapshot, Workspace};
use uiheal_e2e::parse_snapshot_document;

use super::Outcome;
use crate::cli::SnapshotSource;
use crate::context::Context;
use crate::output::{print_list, print_success, print_warning, SnapshotRow};

/// Capture or import snapshots and store them in the workspace.
///
/// A URL that cannot be captured is skipped with a warning; the stage only
/// fails when nothing at all could be stored.
pub async fn acquire(
    ctx: &Context,
    workspace: &Workspace,
    source: &SnapshotSource,
    cancel: &CancellationToken,
) -> Result<Vec<Snapshot>> {
    let snapshots = if let Some(path) = &source.import {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        parse_snapshot_document(&text)?
    } else {
        let collector = ctx.collector()?;
        let mut snapshots = Vec::with_capacity(source.urls.len());
        for url in &source.urls {
            let collected = tokio::select! {
                _ = cancel.cancelled() => break,
                r = collector.collect(url) => r,
            };
            match collected {
                Ok(snapshot) if snapshot.is_empty() => {
                    warn!("No interactive elements on {}", url);
                    snapshots.push(snapshot);
                }
                Ok(snapshot) => snapshots.push(snapshot),
                Err(e) => warn!("Skipping {}: {}", url, e),
            }
        }
        snapshots
    };

    for snapshot in &snapshots {
        let path = workspace.save_snapshot(snapshot).await?;
        info!(snapshot = %snapshot.id, elements = snapshot.element_index.len(), "Stored {}", path.display());
    }
    Ok(snapshots)
}

pub async fn execute(
    ctx: &Context,
    source: &SnapshotSource,
    list: bool,
    cancel: &CancellationToken,
) -> Result<Outcome> {
    let workspace = ctx.workspace().await?;

    if list || source.is_empty() {
        let snapshots = workspace.list_snapshots().await?;
        let rows: Vec<SnapshotRow> = snapshots.iter().map(SnapshotRow::from).collect();
        print_list(&rows, ctx.format);
        return Ok(Outcome::Done);
    }

    let snapshots = acquire(ctx, &workspace, source, cancel).await?;
    if cancel.is_cancelled() {
        return Ok(Outcome::Cancelled);
    }
    if snapshots.is_empty() {
        return Ok(Outcome::Systemic("no snapshot could be captured".into()));
    }

    let rows: Vec<SnapshotRow> = snapshots.iter().map(SnapshotRow::from).collect();
    print_list(&rows, ctx.format);
    let empty = snapshots.iter().filter(|s| s.is_empty()).count();
    if empty > 0 {
        print_warning(&format!("{} snapshot(s) have no interactive elements", empty));
    }
    print_success(&format!("Stored {} snapshot(s)", snapshots.len()));
    Ok(Outcome::Done)
}
