//! Pipeline orchestration
//!
//! Fans testcases out to a bounded pool of workers. Lineages are independent:
//! one testcase failing, healing or being abandoned never stalls another.
//! Systemic problems (backend unreachable, engine missing, storage errors)
//! are surfaced in the [`PipelineSummary`] instead.

use futures::future::join_all;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uiheal_common::{AbandonReason, LineageRecord, RunReport, Snapshot, TestCaseSpec};

use crate::client::BackendStats;
use crate::driver::LineageDriver;
use crate::error::{GenerationError, PipelineError, Result};
use crate::testcases::TestCaseSynthesizer;

/// A snapshot that yielded no test cases
#[derive(Debug, Clone, Serialize)]
pub struct CaseFailure {
    pub snapshot_id: String,
    pub source_url: String,
    pub reason: String,
}

/// Result of the case-synthesis stage
#[derive(Debug, Default)]
pub struct CaseSynthesis {
    pub cases: Vec<(TestCaseSpec, Snapshot)>,
    pub failures: Vec<CaseFailure>,
    pub cancelled: bool,
}

/// Outcome of a pipeline run
#[derive(Debug, Default)]
pub struct PipelineSummary {
    pub records: Vec<LineageRecord>,
    pub case_failures: Vec<CaseFailure>,
    pub cancelled: bool,
    /// Every backend call failed at the transport level
    pub backend_unreachable: bool,
    pub engine_unavailable: Option<String>,
}

impl PipelineSummary {
    pub fn passed(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.phase == uiheal_common::LineagePhase::Passed)
            .count()
    }

    pub fn abandoned(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.phase == uiheal_common::LineagePhase::Abandoned)
            .count()
    }

    /// A failure of the pipeline itself rather than of individual tests
    pub fn is_systemic_failure(&self) -> bool {
        self.backend_unreachable || self.engine_unavailable.is_some()
    }
}

/// Snapshot -> cases -> scripts -> run -> heal, with bounded concurrency
pub struct Pipeline {
    driver: Arc<LineageDriver>,
    cases: TestCaseSynthesizer,
    backend_stats: Arc<BackendStats>,
    workers: usize,
}

impl Pipeline {
    pub fn new(driver: LineageDriver, cases: TestCaseSynthesizer, workers: usize) -> Self {
        let backend_stats = driver.scripts().client().stats();
        Self {
            driver: Arc::new(driver),
            cases,
            backend_stats,
            workers: workers.max(1),
        }
    }

    /// Steer case synthesis towards extracted requirements
    pub fn with_requirements(mut self, requirements: Vec<String>) -> Self {
        self.cases = self.cases.with_requirements(requirements);
        self
    }

    pub fn driver(&self) -> &Arc<LineageDriver> {
        &self.driver
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Every backend call so far failed at the transport level
    pub fn backend_unreachable(&self) -> bool {
        self.backend_stats.unreachable()
    }

    /// Synthesize test cases for each snapshot, `workers` at a time
    ///
    /// Cases come back in snapshot order, each snapshot's cases in the order
    /// the backend listed them.
    pub async fn synthesize_cases(
        &self,
        snapshots: &[Snapshot],
        cancel: &CancellationToken,
    ) -> CaseSynthesis {
        let results: Vec<(&Snapshot, std::result::Result<Vec<TestCaseSpec>, GenerationError>)> =
            stream::iter(snapshots)
                .map(|snapshot| async move { (snapshot, self.cases.synthesize(snapshot, cancel).await) })
                .buffered(self.workers)
                .collect()
                .await;

        let mut synthesis = CaseSynthesis::default();
        for (snapshot, result) in results {
            match result {
                Ok(specs) => synthesis
                    .cases
                    .extend(specs.into_iter().map(|spec| (spec, snapshot.clone()))),
                Err(GenerationError::Cancelled) => synthesis.cancelled = true,
                Err(e) => {
                    warn!(snapshot = %snapshot.id, "No test cases for {}: {}", snapshot.source_url, e);
                    synthesis.failures.push(CaseFailure {
                        snapshot_id: snapshot.id.clone(),
                        source_url: snapshot.source_url.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        synthesis
    }

    /// Drive every case to a verdict
    pub async fn run(
        &self,
        cases: Vec<(TestCaseSpec, Option<Snapshot>)>,
        cancel: &CancellationToken,
    ) -> Result<PipelineSummary> {
        // Partitions exist before any worker starts, so an abort can close them all.
        for (spec, _) in &cases {
            self.driver.open(spec).await?;
        }
        info!("Running {} test case(s) with {} worker(s)", cases.len(), self.workers);

        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut handles = Vec::with_capacity(cases.len());
        for (spec, snapshot) in cases {
            let driver = self.driver.clone();
            let semaphore = semaphore.clone();
            let cancel = cancel.clone();

            handles.push(tokio::spawn(async move {
                let permit = tokio::select! {
                    _ = cancel.cancelled() => None,
                    p = semaphore.acquire_owned() => p.ok(),
                };
                if permit.is_none() {
                    return driver
                        .abandon(&spec.id, AbandonReason::Aborted, "pipeline cancelled")
                        .await;
                }
                let result = driver.drive(&spec, snapshot.as_ref(), &cancel).await;
                drop(permit);
                result
            }));
        }

        let mut summary = PipelineSummary::default();
        let mut storage_error: Option<PipelineError> = None;
        for joined in join_all(handles).await {
            match joined {
                Ok(Ok(_)) => {}
                Ok(Err(PipelineError::EngineUnavailable(e))) => {
                    error!("Execution engine unavailable: {}", e);
                    summary.engine_unavailable.get_or_insert_with(|| e.to_string());
                }
                Ok(Err(PipelineError::Cancelled)) => summary.cancelled = true,
                Ok(Err(e)) => {
                    error!("Lineage failed: {}", e);
                    storage_error.get_or_insert(e);
                }
                Err(e) => {
                    storage_error.get_or_insert(PipelineError::Worker(e.to_string()));
                }
            }
        }
        if let Some(e) = storage_error {
            return Err(e);
        }

        summary.records = self.driver.ledger().records();
        summary.cancelled |= cancel.is_cancelled();
        summary.backend_unreachable = self.backend_stats.unreachable();
        info!(
            passed = summary.passed(),
            abandoned = summary.abandoned(),
            cancelled = summary.cancelled,
            "Pipeline finished"
        );
        Ok(summary)
    }

    /// Synthesize cases for `snapshots`, then run them
    pub async fn execute(
        &self,
        snapshots: &[Snapshot],
        cancel: &CancellationToken,
    ) -> Result<PipelineSummary> {
        let synthesis = self.synthesize_cases(snapshots, cancel).await;
        let cases = synthesis
            .cases
            .into_iter()
            .map(|(spec, snapshot)| (spec, Some(snapshot)))
            .collect();

        let mut summary = self.run(cases, cancel).await?;
        summary.case_failures = synthesis.failures;
        summary.cancelled |= synthesis.cancelled;
        summary.backend_unreachable = self.backend_stats.unreachable();
        Ok(summary)
    }

    /// Seal the ledger and summarize it
    pub fn report(&self) -> Result<RunReport> {
        Ok(self.driver.ledger().aggregate()?)
    }
}
