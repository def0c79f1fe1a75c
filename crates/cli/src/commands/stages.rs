//! Stage commands over the on-disk ledger
//!
//! Each stage loads the ledger partitions from the workspace, advances the
//! lineages that sit in its input phase and commits every transition back
//! to disk, so stages can be run one at a time from a CI job. Failed runs
//! travel to the `heal` stage through `errors.jsonl`.

use anyhow::Result;
use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uiheal_common::{
    AbandonReason, FailureRecord, LineagePhase, LineageRecord, Snapshot, TestCaseSpec, Workspace,
};
use uiheal_pipeline::{LineageDriver, PipelineError};

use super::Outcome;
use crate::cli::CaseFilter;
use crate::context::Context;
use crate::output::{print_list, print_success, LineageRow};

const ABORTED: &str = "pipeline cancelled";

struct Stage {
    workspace: Workspace,
    driver: LineageDriver,
    workers: usize,
}

impl Stage {
    async fn open(ctx: &Context) -> Result<Self> {
        let workspace = ctx.workspace().await?;
        let ledger = Arc::new(workspace.load_ledger().await?);
        debug!(lineages = ledger.len(), "Ledger loaded");
        let driver = ctx.driver(&workspace, ledger)?;
        Ok(Self {
            workspace,
            driver,
            workers: ctx.workers(),
        })
    }

    /// Spec plus its snapshot; the snapshot is a weak reference and may be gone
    async fn load_case(&self, testcase_id: &str) -> Result<(TestCaseSpec, Option<Snapshot>)> {
        let spec = self.workspace.load_testcase(testcase_id).await?;
        let snapshot = match self.workspace.load_snapshot(&spec.snapshot_id).await {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                debug!(testcase = testcase_id, "Snapshot unavailable: {}", e);
                None
            }
        };
        Ok((spec, snapshot))
    }

    fn backend_unreachable(&self) -> bool {
        self.driver.scripts().client().stats().unreachable()
    }

    fn records(&self, ids: &[String]) -> Vec<LineageRecord> {
        ids.iter().filter_map(|id| self.driver.ledger().get(id)).collect()
    }
}

/// Tally of one stage's per-lineage results
#[derive(Default)]
struct StageResult {
    touched: Vec<String>,
    cancelled: bool,
    engine_unavailable: Option<String>,
}

impl StageResult {
    /// Fold one lineage result; storage errors abort the stage
    async fn absorb<T>(
        &mut self,
        stage: &Stage,
        testcase_id: String,
        result: std::result::Result<T, PipelineError>,
    ) -> Result<()> {
        match result {
            Ok(_) => {}
            Err(PipelineError::Cancelled) => {
                // the in-flight attempt is discarded, never half-recorded
                stage
                    .driver
                    .abandon(&testcase_id, AbandonReason::Aborted, ABORTED)
                    .await?;
                self.cancelled = true;
            }
            Err(PipelineError::EngineUnavailable(e)) => {
                self.engine_unavailable.get_or_insert_with(|| e.to_string());
            }
            Err(e) => return Err(e.into()),
        }
        self.touched.push(testcase_id);
        Ok(())
    }

    fn finish(self, stage: &Stage, ctx: &Context, verb: &str) -> Outcome {
        let records = stage.records(&self.touched);
        let rows: Vec<LineageRow> = records.iter().map(LineageRow::from).collect();
        print_list(&rows, ctx.format);

        if self.cancelled {
            return Outcome::Cancelled;
        }
        if let Some(reason) = self.engine_unavailable {
            return Outcome::Systemic(format!("execution engine unavailable: {}", reason));
        }
        if stage.backend_unreachable() {
            return Outcome::Systemic("AI backend unreachable".into());
        }

        let mut phases: BTreeMap<String, usize> = BTreeMap::new();
        for record in &records {
            *phases.entry(record.phase.to_string()).or_insert(0) += 1;
        }
        let breakdown: Vec<String> = phases.iter().map(|(p, n)| format!("{} {}", n, p)).collect();
        print_success(&format!(
            "{} {} test case(s){}",
            verb,
            records.len(),
            if breakdown.is_empty() {
                String::new()
            } else {
                format!(" ({})", breakdown.join(", "))
            }
        ));
        Outcome::Done
    }
}

/// AwaitingScript -> AwaitingRun for every selected test case
pub async fn generate_scripts(
    ctx: &Context,
    filter: &CaseFilter,
    cancel: &CancellationToken,
) -> Result<Outcome> {
    let stage = Stage::open(ctx).await?;
    let specs: Vec<TestCaseSpec> = stage
        .workspace
        .list_testcases()
        .await?
        .into_iter()
        .filter(|spec| filter.matches(&spec.id))
        .collect();

    let mut pending = Vec::new();
    for spec in specs {
        let record = stage.driver.open(&spec).await?;
        if record.phase == LineagePhase::AwaitingScript {
            pending.push(spec);
        }
    }
    info!("Generating scripts for {} test case(s)", pending.len());

    let stage_ref = &stage;
    let results: Vec<_> = stream::iter(pending)
        .map(|spec| async move {
            let snapshot = match stage_ref.workspace.load_snapshot(&spec.snapshot_id).await {
                Ok(snapshot) => Some(snapshot),
                Err(e) => {
                    warn!(testcase = %spec.id, "Generating without snapshot: {}", e);
                    None
                }
            };
            let result = stage_ref
                .driver
                .generate_script(&spec, snapshot.as_ref(), cancel)
                .await;
            (spec.id, result)
        })
        .buffer_unordered(stage.workers)
        .collect()
        .await;

    let mut tally = StageResult::default();
    for (id, result) in results {
        tally.absorb(&stage, id, result).await?;
    }
    Ok(tally.finish(&stage, ctx, "Generated scripts for"))
}

async fn run_phase(
    ctx: &Context,
    filter: &CaseFilter,
    phase: LineagePhase,
    cancel: &CancellationToken,
) -> Result<Outcome> {
    let stage = Stage::open(ctx).await?;
    let ids: Vec<String> = stage
        .driver
        .ledger()
        .in_phase(phase)
        .into_iter()
        .filter(|id| filter.matches(id))
        .collect();
    info!("Running {} test case(s) in phase {}", ids.len(), phase);

    let driver = &stage.driver;
    let results: Vec<_> = stream::iter(ids)
        .map(|id| async move {
            let result = driver.run_active(&id, cancel).await;
            (id, result)
        })
        .buffer_unordered(stage.workers)
        .collect()
        .await;

    let mut tally = StageResult::default();
    let mut queued = 0;
    for (id, result) in results {
        if matches!(result, Ok(Some(_))) {
            queued += 1;
        }
        tally.absorb(&stage, id, result).await?;
    }
    if queued > 0 {
        info!("{} failure(s) queued for healing", queued);
    }
    Ok(tally.finish(&stage, ctx, "Ran"))
}

/// Run generation 0 of every lineage awaiting its first run
pub async fn run(ctx: &Context, filter: &CaseFilter, cancel: &CancellationToken) -> Result<Outcome> {
    run_phase(ctx, filter, LineagePhase::AwaitingRun, cancel).await
}

/// Run the newest generation of every healed lineage
pub async fn rerun_healed(
    ctx: &Context,
    filter: &CaseFilter,
    cancel: &CancellationToken,
) -> Result<Outcome> {
    run_phase(ctx, filter, LineagePhase::AwaitingRerun, cancel).await
}

/// Newest failure record per test case: the drained queue first, then any
/// Failed lineage whose record was lost
fn collect_failures(
    drained: Vec<FailureRecord>,
    records: &[LineageRecord],
) -> BTreeMap<String, FailureRecord> {
    let mut latest: BTreeMap<String, FailureRecord> = BTreeMap::new();
    for failure in drained {
        let newer = latest
            .get(&failure.testcase_id)
            .map(|f| failure.generation >= f.generation)
            .unwrap_or(true);
        if newer {
            latest.insert(failure.testcase_id.clone(), failure);
        }
    }
    for record in records {
        if let Some(failure) = LineageDriver::pending_failure(record) {
            latest.entry(record.testcase_id.clone()).or_insert(failure);
        }
    }
    latest
}

/// Failed -> AwaitingRerun | Abandoned for every queued failure
pub async fn heal(ctx: &Context, filter: &CaseFilter, cancel: &CancellationToken) -> Result<Outcome> {
    let stage = Stage::open(ctx).await?;
    let queue = stage.driver.queue().clone();

    let (selected, kept): (Vec<_>, Vec<_>) = queue
        .drain()?
        .into_iter()
        .partition(|f| filter.matches(&f.testcase_id));
    for failure in kept {
        queue.append(failure)?;
    }

    let failed: Vec<LineageRecord> = stage
        .driver
        .ledger()
        .records()
        .into_iter()
        .filter(|r| filter.matches(&r.testcase_id))
        .collect();
    let failures = collect_failures(selected, &failed);
    info!("Healing {} failed test case(s)", failures.len());

    let stage_ref = &stage;
    let results: Vec<_> = stream::iter(failures.into_values())
        .map(|failure| async move {
            let id = failure.testcase_id.clone();
            let result = match stage_ref.load_case(&id).await {
                Ok((spec, snapshot)) => {
                    stage_ref
                        .driver
                        .heal(&failure, &spec, snapshot.as_ref(), cancel)
                        .await
                }
                Err(e) => {
                    stage_ref
                        .driver
                        .abandon(&id, AbandonReason::HealUnavailable, format!("test case unavailable: {:#}", e))
                        .await
                }
            };
            (id, result)
        })
        .buffer_unordered(stage.workers)
        .collect()
        .await;

    let mut tally = StageResult::default();
    for (id, result) in results {
        tally.absorb(&stage, id, result).await?;
    }
    Ok(tally.finish(&stage, ctx, "Healed"))
}
