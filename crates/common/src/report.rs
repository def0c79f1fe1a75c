//! Run report
//!
//! Pure summary of a sealed ledger: outcome counts, failure categories,
//! heal effectiveness and the audit trail of every testcase.

use crate::ledger::{AbandonReason, LineagePhase, LineageRecord};
use crate::types::{FailureCategory, HealDisposition, RunOutcome};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Count of runs per outcome
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutcomeCounts {
    pub pass: usize,
    pub fail: usize,
    pub error: usize,
}

impl OutcomeCounts {
    fn add(&mut self, outcome: RunOutcome) {
        match outcome {
            RunOutcome::Pass => self.pass += 1,
            RunOutcome::Fail => self.fail += 1,
            RunOutcome::Error => self.error += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.pass + self.fail + self.error
    }
}

/// Heal effectiveness
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealStats {
    /// Attempts counted against the budget
    pub attempts: usize,
    pub accepted: usize,
    pub applied: usize,
    pub reruns: usize,
    pub no_ops: usize,
    pub unavailable: usize,
    pub budget_exhausted: usize,
    /// Testcases that needed at least one heal
    pub healed_testcases: usize,
    /// Of those, how many ended Passed
    pub healed_to_pass: usize,
    pub success_rate: f64,
}

/// One row of a testcase's audit trail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrailEntry {
    pub generation: u32,
    pub script_id: String,
    pub outcome: RunOutcome,
    pub duration_ms: u64,
    #[serde(default)]
    pub failure_category: Option<FailureCategory>,
    #[serde(default)]
    pub diagnostic: Option<String>,
    #[serde(default)]
    pub heal: Option<HealDisposition>,
    #[serde(default)]
    pub heal_detail: Option<String>,
}

/// Final verdict and history of one testcase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestcaseSummary {
    pub testcase_id: String,
    pub title: String,
    pub verdict: LineagePhase,
    #[serde(default)]
    pub final_generation: Option<u32>,
    pub heal_count: u32,
    #[serde(default)]
    pub abandon_reason: Option<AbandonReason>,
    #[serde(default)]
    pub abandon_detail: Option<String>,
    pub trail: Vec<TrailEntry>,
}

/// Aggregated pipeline report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub generated_at: DateTime<Utc>,
    pub total_testcases: usize,
    pub passed: usize,
    pub abandoned: usize,
    pub runs: OutcomeCounts,
    pub failure_categories: BTreeMap<FailureCategory, usize>,
    pub abandon_reasons: BTreeMap<AbandonReason, usize>,
    pub heal: HealStats,
    pub testcases: Vec<TestcaseSummary>,
}

impl RunReport {
    pub fn from_records(records: &[LineageRecord]) -> Self {
        let mut runs = OutcomeCounts::default();
        let mut failure_categories = BTreeMap::new();
        let mut abandon_reasons = BTreeMap::new();
        let mut heal = HealStats::default();
        let mut testcases = Vec::with_capacity(records.len());
        let mut passed = 0;
        let mut abandoned = 0;

        for record in records {
            match record.phase {
                LineagePhase::Passed => passed += 1,
                LineagePhase::Abandoned => abandoned += 1,
                _ => {}
            }
            if let Some(reason) = record.abandon_reason {
                *abandon_reasons.entry(reason).or_insert(0) += 1;
            }
            if record.heal_count > 0 {
                heal.healed_testcases += 1;
                if record.phase == LineagePhase::Passed {
                    heal.healed_to_pass += 1;
                }
            }

            let mut trail = Vec::with_capacity(record.entries.len());
            for entry in &record.entries {
                runs.add(entry.run.outcome);
                if let Some(failure) = &entry.failure {
                    *failure_categories.entry(failure.category).or_insert(0) += 1;
                }
                if let Some(attempt) = &entry.heal {
                    if attempt.disposition.counts_against_budget() {
                        heal.attempts += 1;
                    }
                    if attempt.accepted {
                        heal.accepted += 1;
                    }
                    match attempt.disposition {
                        HealDisposition::Applied => heal.applied += 1,
                        HealDisposition::Rerun => heal.reruns += 1,
                        HealDisposition::NoOp => heal.no_ops += 1,
                        HealDisposition::Unavailable => heal.unavailable += 1,
                        HealDisposition::BudgetExhausted => heal.budget_exhausted += 1,
                    }
                }
                trail.push(TrailEntry {
                    generation: entry.generation,
                    script_id: entry.script_id.clone(),
                    outcome: entry.run.outcome,
                    duration_ms: entry.run.duration_ms,
                    failure_category: entry.failure.as_ref().map(|f| f.category),
                    diagnostic: entry.run.diagnostic.as_ref().map(|d| d.message.clone()),
                    heal: entry.heal.as_ref().map(|h| h.disposition),
                    heal_detail: entry.heal.as_ref().and_then(|h| h.detail.clone()),
                });
            }

            testcases.push(TestcaseSummary {
                testcase_id: record.testcase_id.clone(),
                title: record.title.clone(),
                verdict: record.phase,
                final_generation: record.final_generation(),
                heal_count: record.heal_count,
                abandon_reason: record.abandon_reason,
                abandon_detail: record.abandon_detail.clone(),
                trail,
            });
        }

        if heal.healed_testcases > 0 {
            heal.success_rate = heal.healed_to_pass as f64 / heal.healed_testcases as f64;
        }

        Self {
            generated_at: Utc::now(),
            total_testcases: records.len(),
            passed,
            abandoned,
            runs,
            failure_categories,
            abandon_reasons,
            heal,
            testcases,
        }
    }
}
