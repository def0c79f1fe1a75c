//! Per-testcase lineage driver
//!
//! Moves one testcase through its lifecycle:
//!
//! ```text
//! AwaitingScript ──synthesize──> AwaitingRun ──run──> Passed
//!       │                            │
//!       │                            └──> Failed ──heal──> AwaitingRerun ──run──> Passed | Failed
//!       │                                    │
//!       └───────────── Abandoned <───────────┘   (generation/execution failure, budget, abort)
//! ```
//!
//! Every transition is committed to the [`RunLedger`] first and then handed
//! to the [`LedgerSink`], so a crash leaves the last committed phase on disk.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uiheal_common::config::HealConfig;
use uiheal_common::{
    AbandonReason, ArtifactStore, FailureQueue, FailureRecord, LedgerSink, LineagePhase,
    LineageRecord, RunLedger, RunResult, Snapshot, TestCaseSpec,
};
use uiheal_e2e::{ExecError, ExecutionEngine};

use crate::analyzer::FailureAnalyzer;
use crate::client::RetryPolicy;
use crate::error::{GenerationError, PipelineError, Result};
use crate::healer::{AutoHealer, HealContext, HealOutcome};
use crate::scripts::ScriptSynthesizer;

/// Drives lineages; shared by every worker
pub struct LineageDriver {
    ledger: Arc<RunLedger>,
    sink: Arc<dyn LedgerSink>,
    artifacts: ArtifactStore,
    scripts: ScriptSynthesizer,
    engine: Arc<dyn ExecutionEngine>,
    analyzer: FailureAnalyzer,
    healer: AutoHealer,
    queue: Arc<FailureQueue>,
    exec_retry: RetryPolicy,
}

impl LineageDriver {
    pub fn new(
        ledger: Arc<RunLedger>,
        sink: Arc<dyn LedgerSink>,
        artifacts: ArtifactStore,
        scripts: ScriptSynthesizer,
        engine: Arc<dyn ExecutionEngine>,
        heal: &HealConfig,
    ) -> Self {
        let healer = AutoHealer::new(scripts.clone(), heal);
        Self {
            ledger,
            sink,
            artifacts,
            scripts,
            engine,
            analyzer: FailureAnalyzer::new(),
            healer,
            queue: Arc::new(FailureQueue::in_memory()),
            exec_retry: RetryPolicy::none(),
        }
    }

    /// Failure records go to `queue` instead of a private in-memory one
    pub fn with_queue(mut self, queue: Arc<FailureQueue>) -> Self {
        self.queue = queue;
        self
    }

    /// Retries for engine failures (not for failing tests)
    pub fn with_exec_retry(mut self, policy: RetryPolicy) -> Self {
        self.exec_retry = policy;
        self
    }

    pub fn ledger(&self) -> &Arc<RunLedger> {
        &self.ledger
    }

    pub fn queue(&self) -> &Arc<FailureQueue> {
        &self.queue
    }

    pub fn scripts(&self) -> &ScriptSynthesizer {
        &self.scripts
    }

    fn record(&self, testcase_id: &str) -> Result<LineageRecord> {
        self.ledger
            .get(testcase_id)
            .ok_or_else(|| PipelineError::UnknownTestcase(testcase_id.to_string()))
    }

    /// Apply `f` to the partition, then persist the committed record
    async fn commit<F>(&self, testcase_id: &str, f: F) -> Result<LineageRecord>
    where
        F: FnOnce(&mut LineageRecord) -> uiheal_common::Result<()>,
    {
        let record = self.ledger.update(testcase_id, f)?;
        self.sink.persist(&record).await?;
        Ok(record)
    }

    /// Open (or reuse) the partition for `spec` and persist it
    pub async fn open(&self, spec: &TestCaseSpec) -> Result<LineageRecord> {
        let record = self.ledger.open(&spec.id, &spec.title)?;
        self.sink.persist(&record).await?;
        Ok(record)
    }

    /// Close a lineage that has not reached a verdict
    pub async fn abandon(
        &self,
        testcase_id: &str,
        reason: AbandonReason,
        detail: impl Into<String>,
    ) -> Result<LineageRecord> {
        let detail = detail.into();
        let record = self.record(testcase_id)?;
        if record.phase.is_terminal() {
            return Ok(record);
        }
        warn!(testcase = testcase_id, %reason, "Abandoning lineage: {}", detail);
        self.commit(testcase_id, |r| r.abandon(reason, detail)).await
    }

    /// AwaitingScript -> AwaitingRun, or Abandoned on generation failure
    pub async fn generate_script(
        &self,
        spec: &TestCaseSpec,
        snapshot: Option<&Snapshot>,
        cancel: &CancellationToken,
    ) -> Result<LineageRecord> {
        let record = self.record(&spec.id)?;
        if record.phase != LineagePhase::AwaitingScript {
            debug!(testcase = %spec.id, phase = %record.phase, "Script already generated");
            return Ok(record);
        }

        match self.scripts.synthesize(spec, snapshot, cancel).await {
            Ok(mut script) => {
                self.artifacts.persist_original(&mut script).await?;
                self.commit(&spec.id, |r| {
                    r.push_script(script)?;
                    r.transition(LineagePhase::AwaitingRun)
                })
                .await
            }
            Err(GenerationError::Cancelled) => Err(PipelineError::Cancelled),
            Err(e) => {
                self.abandon(&spec.id, AbandonReason::GenerationFailure, e.to_string())
                    .await
            }
        }
    }

    async fn execute_with_retry(
        &self,
        record: &LineageRecord,
        cancel: &CancellationToken,
    ) -> Result<std::result::Result<RunResult, ExecError>> {
        let script = record.active_script().ok_or_else(|| {
            PipelineError::Storage(uiheal_common::Error::InvalidLineage {
                testcase_id: record.testcase_id.clone(),
                reason: "no script to run".into(),
            })
        })?;
        let path = script
            .path
            .clone()
            .unwrap_or_else(|| self.artifacts.script_path(script));

        let attempts = self.exec_retry.attempts();
        let mut attempt = 1;
        loop {
            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                r = self.engine.execute(script, &path) => r,
            };
            match result {
                Err(e) if e.is_transient() && attempt < attempts => {
                    warn!(testcase = %record.testcase_id, attempt, "Engine failure, retrying: {}", e);
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                        _ = tokio::time::sleep(self.exec_retry.backoff(attempt)) => {}
                    }
                    attempt += 1;
                }
                other => return Ok(other),
            }
        }
    }

    /// Run the active generation and record the outcome.
    ///
    /// Returns the failure record handed to the healer, or `None` when the
    /// run passed or the lineage was closed.
    pub async fn run_active(
        &self,
        testcase_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<FailureRecord>> {
        let record = self.record(testcase_id)?;
        if !matches!(
            record.phase,
            LineagePhase::AwaitingRun | LineagePhase::AwaitingRerun
        ) {
            debug!(testcase = testcase_id, phase = %record.phase, "Nothing to run");
            return Ok(None);
        }

        let run = match self.execute_with_retry(&record, cancel).await? {
            Ok(run) => run,
            Err(e) => {
                let systemic = matches!(e, ExecError::NodeNotFound(_));
                self.abandon(testcase_id, AbandonReason::ExecutionFailure, e.to_string())
                    .await?;
                if systemic {
                    return Err(PipelineError::EngineUnavailable(e));
                }
                return Ok(None);
            }
        };

        let failure = self.analyzer.classify(&run);
        let passed = run.passed();
        let diagnostic = run.diagnostic.clone().unwrap_or_default();
        let script_id = run.script_id.clone();

        let record = self
            .commit(testcase_id, |r| {
                r.record_run(run, failure.clone())?;
                r.transition(if passed {
                    LineagePhase::Passed
                } else {
                    LineagePhase::Failed
                })
            })
            .await?;

        let Some(failure) = failure else {
            info!(testcase = testcase_id, generation = ?record.final_generation(), "Passed");
            return Ok(None);
        };

        info!(
            testcase = testcase_id,
            category = %failure.category,
            "Run failed: {}",
            diagnostic.message
        );
        let generation = record.final_generation().unwrap_or_default();
        let failure_record =
            FailureRecord::new(testcase_id, script_id, generation, failure, diagnostic);
        self.queue.append(failure_record.clone())?;
        Ok(Some(failure_record))
    }

    /// Failure record for a lineage sitting in `Failed`, rebuilt from the ledger
    pub fn pending_failure(record: &LineageRecord) -> Option<FailureRecord> {
        if record.phase != LineagePhase::Failed {
            return None;
        }
        let entry = record.last_entry()?;
        let failure = entry.failure.clone()?;
        Some(FailureRecord::new(
            &record.testcase_id,
            &entry.script_id,
            entry.generation,
            failure,
            entry.run.diagnostic.clone().unwrap_or_default(),
        ))
    }

    /// Act on a failure record: Failed -> AwaitingRerun, or Abandoned.
    ///
    /// Records that no longer describe the lineage's newest failure are
    /// skipped, so replaying a queue is harmless.
    pub async fn heal(
        &self,
        failure: &FailureRecord,
        spec: &TestCaseSpec,
        snapshot: Option<&Snapshot>,
        cancel: &CancellationToken,
    ) -> Result<LineageRecord> {
        let record = self.record(&failure.testcase_id)?;
        let active = record.active_script();
        let entry = record.last_entry();
        let current = record.phase == LineagePhase::Failed
            && active.map(|s| s.id.as_str()) == Some(failure.script_id.as_str())
            && entry.map(|e| e.heal.is_none()).unwrap_or(false);
        let (Some(script), Some(entry), true) = (active, entry, current) else {
            debug!(testcase = %failure.testcase_id, phase = %record.phase, "Stale failure record skipped");
            return Ok(record);
        };

        let ctx = HealContext {
            spec,
            snapshot,
            script,
            run: &entry.run,
            failure: &failure.failure_class,
            heal_count: record.heal_count,
        };

        match self.healer.heal(ctx, cancel).await? {
            HealOutcome::Healed {
                attempt,
                script: mut healed,
            } => {
                self.artifacts.persist_healed(script, &mut healed).await?;
                self.commit(&failure.testcase_id, |r| {
                    r.record_heal(attempt)?;
                    r.push_script(healed)?;
                    r.transition(LineagePhase::AwaitingRerun)
                })
                .await
            }
            HealOutcome::Rerun { attempt } => {
                self.commit(&failure.testcase_id, |r| {
                    r.record_heal(attempt)?;
                    r.transition(LineagePhase::AwaitingRerun)
                })
                .await
            }
            HealOutcome::Abandon { attempt, reason } => {
                let detail = attempt
                    .detail
                    .clone()
                    .unwrap_or_else(|| attempt.disposition.to_string());
                warn!(testcase = %failure.testcase_id, %reason, "Abandoning lineage: {}", detail);
                self.commit(&failure.testcase_id, |r| {
                    r.record_heal(attempt)?;
                    r.abandon(reason, detail)
                })
                .await
            }
        }
    }

    async fn step(
        &self,
        spec: &TestCaseSpec,
        snapshot: Option<&Snapshot>,
        cancel: &CancellationToken,
    ) -> Result<LineageRecord> {
        let record = self.record(&spec.id)?;
        match record.phase {
            LineagePhase::AwaitingScript => self.generate_script(spec, snapshot, cancel).await,
            LineagePhase::AwaitingRun | LineagePhase::AwaitingRerun => {
                if let Some(failure) = self.run_active(&spec.id, cancel).await? {
                    return self.heal(&failure, spec, snapshot, cancel).await;
                }
                self.record(&spec.id)
            }
            LineagePhase::Failed => match Self::pending_failure(&record) {
                Some(failure) => self.heal(&failure, spec, snapshot, cancel).await,
                None => {
                    self.abandon(&spec.id, AbandonReason::HealUnavailable, "failed run has no classification")
                        .await
                }
            },
            LineagePhase::Passed | LineagePhase::Abandoned => Ok(record),
        }
    }

    /// Drive the lineage of `spec` to Passed or Abandoned
    pub async fn drive(
        &self,
        spec: &TestCaseSpec,
        snapshot: Option<&Snapshot>,
        cancel: &CancellationToken,
    ) -> Result<LineageRecord> {
        loop {
            if cancel.is_cancelled() {
                return self.abandon(&spec.id, AbandonReason::Aborted, "pipeline cancelled").await;
            }
            match self.step(spec, snapshot, cancel).await {
                Ok(record) if record.phase.is_terminal() => {
                    info!(testcase = %spec.id, verdict = %record.phase, heals = record.heal_count, "Lineage closed");
                    return Ok(record);
                }
                Ok(_) => {}
                Err(PipelineError::Cancelled) => {
                    return self.abandon(&spec.id, AbandonReason::Aborted, "pipeline cancelled").await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
