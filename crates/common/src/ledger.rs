//! Run ledger
//!
//! One partition per testcase. Each partition is a [`LineageRecord`]: the
//! arena of script generations, the ordered run entries and the lineage
//! phase. Partitions are updated copy-on-write so a failed update leaves
//! nothing half-recorded; aggregation happens only after [`RunLedger::seal`].

use crate::report::RunReport;
use crate::types::{FailureClass, HealAttempt, RunResult, Script, ScriptStatus};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// Where a testcase lineage stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineagePhase {
    AwaitingScript,
    AwaitingRun,
    Failed,
    AwaitingRerun,
    Passed,
    Abandoned,
}

impl LineagePhase {
    pub fn can_transition_to(&self, next: LineagePhase) -> bool {
        use LineagePhase::*;
        match (self, next) {
            (AwaitingScript, AwaitingRun) => true,
            (AwaitingRun, Passed) | (AwaitingRun, Failed) => true,
            (Failed, AwaitingRerun) => true,
            (AwaitingRerun, Passed) | (AwaitingRerun, Failed) => true,
            // any open lineage can be closed by abort or exhausted retries
            (from, Abandoned) => !from.is_terminal(),
            _ => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, LineagePhase::Passed | LineagePhase::Abandoned)
    }
}

impl std::fmt::Display for LineagePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LineagePhase::AwaitingScript => write!(f, "awaiting-script"),
            LineagePhase::AwaitingRun => write!(f, "awaiting-run"),
            LineagePhase::Failed => write!(f, "failed"),
            LineagePhase::AwaitingRerun => write!(f, "awaiting-rerun"),
            LineagePhase::Passed => write!(f, "passed"),
            LineagePhase::Abandoned => write!(f, "abandoned"),
        }
    }
}

/// Why a lineage was closed without passing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbandonReason {
    GenerationFailure,
    ExecutionFailure,
    HealUnavailable,
    HealBudgetExhausted,
    Aborted,
}

impl std::fmt::Display for AbandonReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AbandonReason::GenerationFailure => write!(f, "generation_failure"),
            AbandonReason::ExecutionFailure => write!(f, "execution_failure"),
            AbandonReason::HealUnavailable => write!(f, "heal_unavailable"),
            AbandonReason::HealBudgetExhausted => write!(f, "heal_budget_exhausted"),
            AbandonReason::Aborted => write!(f, "aborted"),
        }
    }
}

/// One execution attempt and what followed it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub script_id: String,
    pub generation: u32,
    pub run: RunResult,
    #[serde(default)]
    pub failure: Option<FailureClass>,
    #[serde(default)]
    pub heal: Option<HealAttempt>,
}

/// Ledger partition for a single testcase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineageRecord {
    pub testcase_id: String,
    pub title: String,
    pub phase: LineagePhase,
    /// Every generation, oldest first; never pruned
    pub scripts: Vec<Script>,
    pub entries: Vec<LedgerEntry>,
    pub heal_count: u32,
    #[serde(default)]
    pub abandon_reason: Option<AbandonReason>,
    #[serde(default)]
    pub abandon_detail: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl LineageRecord {
    pub fn new(testcase_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            testcase_id: testcase_id.into(),
            title: title.into(),
            phase: LineagePhase::AwaitingScript,
            scripts: Vec::new(),
            entries: Vec::new(),
            heal_count: 0,
            abandon_reason: None,
            abandon_detail: None,
            updated_at: Utc::now(),
        }
    }

    fn lineage_error(&self, reason: impl Into<String>) -> Error {
        Error::InvalidLineage {
            testcase_id: self.testcase_id.clone(),
            reason: reason.into(),
        }
    }

    /// Move the lineage to `next`, rejecting moves the state machine forbids
    pub fn transition(&mut self, next: LineagePhase) -> Result<()> {
        if !self.phase.can_transition_to(next) {
            return Err(Error::InvalidStateTransition {
                from: self.phase.to_string(),
                to: next.to_string(),
            });
        }
        debug!(testcase = %self.testcase_id, "{} -> {}", self.phase, next);
        self.phase = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// The newest generation
    pub fn active_script(&self) -> Option<&Script> {
        self.scripts.last()
    }

    pub fn script(&self, id: &str) -> Option<&Script> {
        self.scripts.iter().find(|s| s.id == id)
    }

    pub fn final_generation(&self) -> Option<u32> {
        self.active_script().map(|s| s.generation)
    }

    pub fn last_entry(&self) -> Option<&LedgerEntry> {
        self.entries.last()
    }

    fn set_active_status(&mut self, next: ScriptStatus) -> Result<()> {
        let testcase_id = self.testcase_id.clone();
        let script = self.scripts.last_mut().ok_or_else(|| Error::InvalidLineage {
            testcase_id,
            reason: "lineage has no script".into(),
        })?;
        if !script.status.can_transition_to(next) {
            return Err(Error::InvalidStateTransition {
                from: format!("script {}", script.status),
                to: format!("script {}", next),
            });
        }
        script.status = next;
        Ok(())
    }

    /// Add a script generation, enforcing strictly increasing generations
    pub fn push_script(&mut self, script: Script) -> Result<()> {
        if script.testcase_id != self.testcase_id {
            return Err(self.lineage_error(format!(
                "script belongs to testcase {}",
                script.testcase_id
            )));
        }
        match self.scripts.last() {
            None if script.generation != 0 => {
                return Err(self.lineage_error("first script must be generation 0"));
            }
            Some(parent) => {
                if script.generation != parent.generation + 1
                    || script.parent_id.as_deref() != Some(parent.id.as_str())
                {
                    return Err(self.lineage_error(format!(
                        "generation {} does not follow generation {}",
                        script.generation, parent.generation
                    )));
                }
                if parent.status == ScriptStatus::Passed {
                    return Err(self.lineage_error("a passed script is never healed"));
                }
                self.set_active_status(ScriptStatus::Healed)?;
            }
            None => {}
        }
        self.scripts.push(script);
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Append the result of running the active script
    pub fn record_run(&mut self, run: RunResult, failure: Option<FailureClass>) -> Result<()> {
        let script = self
            .active_script()
            .ok_or_else(|| self.lineage_error("run recorded before any script"))?;
        if run.script_id != script.id {
            return Err(self.lineage_error(format!(
                "run {} is for script {}, active script is {}",
                run.id, run.script_id, script.id
            )));
        }
        let generation = script.generation;
        let script_id = script.id.clone();

        let status = if run.passed() {
            ScriptStatus::Passed
        } else {
            ScriptStatus::Failed
        };
        self.set_active_status(status)?;

        self.entries.push(LedgerEntry {
            script_id,
            generation,
            run,
            failure,
            heal: None,
        });
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Attach a heal attempt to the run it answers
    pub fn record_heal(&mut self, attempt: HealAttempt) -> Result<()> {
        let testcase_id = self.testcase_id.clone();
        let entry = self
            .entries
            .last_mut()
            .ok_or_else(|| Error::InvalidLineage {
                testcase_id: testcase_id.clone(),
                reason: "heal recorded before any run".into(),
            })?;
        if entry.run.passed() {
            return Err(Error::InvalidLineage {
                testcase_id,
                reason: "a passed run is never healed".into(),
            });
        }
        if entry.heal.is_some() {
            return Err(Error::InvalidLineage {
                testcase_id,
                reason: "run already has a heal attempt".into(),
            });
        }
        if attempt.disposition.counts_against_budget() {
            self.heal_count += 1;
        }
        entry.heal = Some(attempt);
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Close the lineage without a pass
    pub fn abandon(&mut self, reason: AbandonReason, detail: impl Into<String>) -> Result<()> {
        self.transition(LineagePhase::Abandoned)?;
        if let Some(script) = self.scripts.last_mut() {
            if script.status.can_transition_to(ScriptStatus::Abandoned) {
                script.status = ScriptStatus::Abandoned;
            }
        }
        self.abandon_reason = Some(reason);
        self.abandon_detail = Some(detail.into());
        Ok(())
    }
}

/// Persistence hook called after every committed transition
#[async_trait]
pub trait LedgerSink: Send + Sync {
    async fn persist(&self, record: &LineageRecord) -> Result<()>;
}

/// Sink for in-process runs that keep the ledger in memory only
#[derive(Debug, Default, Clone, Copy)]
pub struct MemorySink;

#[async_trait]
impl LedgerSink for MemorySink {
    async fn persist(&self, _record: &LineageRecord) -> Result<()> {
        Ok(())
    }
}

/// Concurrent, partitioned run ledger
#[derive(Debug, Default)]
pub struct RunLedger {
    partitions: DashMap<String, LineageRecord>,
    sealed: AtomicBool,
}

impl RunLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: impl IntoIterator<Item = LineageRecord>) -> Self {
        let ledger = Self::new();
        for record in records {
            ledger.partitions.insert(record.testcase_id.clone(), record);
        }
        ledger
    }

    fn ensure_open(&self) -> Result<()> {
        if self.sealed.load(Ordering::SeqCst) {
            return Err(Error::LedgerSealed);
        }
        Ok(())
    }

    /// Open a partition for a testcase; existing partitions are kept
    pub fn open(&self, testcase_id: &str, title: &str) -> Result<LineageRecord> {
        self.ensure_open()?;
        let record = self
            .partitions
            .entry(testcase_id.to_string())
            .or_insert_with(|| LineageRecord::new(testcase_id, title));
        Ok(record.clone())
    }

    /// Apply `f` to a partition and return the committed record.
    ///
    /// `f` works on a copy; the partition is replaced only if it succeeds.
    pub fn update<F>(&self, testcase_id: &str, f: F) -> Result<LineageRecord>
    where
        F: FnOnce(&mut LineageRecord) -> Result<()>,
    {
        self.ensure_open()?;
        let mut slot = self
            .partitions
            .get_mut(testcase_id)
            .ok_or_else(|| Error::not_found("lineage", testcase_id))?;
        let mut draft = slot.clone();
        f(&mut draft)?;
        *slot = draft.clone();
        Ok(draft)
    }

    pub fn get(&self, testcase_id: &str) -> Option<LineageRecord> {
        self.partitions.get(testcase_id).map(|r| r.clone())
    }

    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    /// All partitions ordered by testcase id
    pub fn records(&self) -> Vec<LineageRecord> {
        let mut records: Vec<LineageRecord> =
            self.partitions.iter().map(|r| r.value().clone()).collect();
        records.sort_by(|a, b| a.testcase_id.cmp(&b.testcase_id));
        records
    }

    /// Testcases whose lineage is in the given phase
    pub fn in_phase(&self, phase: LineagePhase) -> Vec<String> {
        let mut ids: Vec<String> = self
            .partitions
            .iter()
            .filter(|r| r.phase == phase)
            .map(|r| r.key().clone())
            .collect();
        ids.sort();
        ids
    }

    /// Testcases that have not reached Passed or Abandoned
    pub fn pending(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .partitions
            .iter()
            .filter(|r| !r.phase.is_terminal())
            .map(|r| r.key().clone())
            .collect();
        ids.sort();
        ids
    }

    /// Stop accepting updates
    pub fn seal(&self) {
        self.sealed.store(true, Ordering::SeqCst);
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::SeqCst)
    }

    /// Seal the ledger and summarize it; every lineage must be terminal
    pub fn aggregate(&self) -> Result<RunReport> {
        let pending = self.pending();
        if !pending.is_empty() {
            return Err(Error::LedgerNotTerminal { pending });
        }
        self.seal();
        Ok(RunReport::from_records(&self.records()))
    }
}
