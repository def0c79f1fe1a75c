//! Auto-healing decisions
//!
//! The healer decides what happens to a failed run: rerun it unchanged,
//! ask the backend for a repaired generation, or give up. It produces the
//! audit record for every decision but never touches the ledger itself.

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uiheal_common::config::HealConfig;
use uiheal_common::{
    AbandonReason, FailureCategory, FailureClass, HealAttempt, HealDisposition, HealStrategy,
    RunResult, Script, ScriptStatus, Snapshot, TestCaseSpec,
};

use crate::error::{GenerationError, PipelineError, Result};
use crate::prompts::RepairRequest;
use crate::scripts::ScriptSynthesizer;
use crate::selectors::rank_alternatives;

/// Inputs for one heal decision
#[derive(Debug, Clone, Copy)]
pub struct HealContext<'a> {
    pub spec: &'a TestCaseSpec,
    pub snapshot: Option<&'a Snapshot>,
    pub script: &'a Script,
    pub run: &'a RunResult,
    pub failure: &'a FailureClass,
    /// Heals already spent on this lineage
    pub heal_count: u32,
}

/// What the lineage should do next
#[derive(Debug, Clone)]
pub enum HealOutcome {
    /// Run the same script again
    Rerun { attempt: HealAttempt },
    /// Run the new generation
    Healed { attempt: HealAttempt, script: Script },
    /// Close the lineage
    Abandon {
        attempt: HealAttempt,
        reason: AbandonReason,
    },
}

impl HealOutcome {
    pub fn attempt(&self) -> &HealAttempt {
        match self {
            HealOutcome::Rerun { attempt }
            | HealOutcome::Healed { attempt, .. }
            | HealOutcome::Abandon { attempt, .. } => attempt,
        }
    }
}

/// Transient failures are rerun as-is; code defects are regenerated
fn strategy_for(category: FailureCategory) -> HealStrategy {
    match category {
        FailureCategory::Timeout | FailureCategory::NetworkError => HealStrategy::Rerun,
        FailureCategory::SelectorNotFound
        | FailureCategory::AssertionMismatch
        | FailureCategory::Unknown => HealStrategy::Regenerate,
    }
}

/// Bounded repair of failing scripts
#[derive(Clone)]
pub struct AutoHealer {
    scripts: ScriptSynthesizer,
    max_heals: u32,
    max_candidates: usize,
}

impl AutoHealer {
    pub fn new(scripts: ScriptSynthesizer, config: &HealConfig) -> Self {
        Self {
            scripts,
            max_heals: config.max_heals,
            max_candidates: config.max_candidate_selectors,
        }
    }

    pub fn max_heals(&self) -> u32 {
        self.max_heals
    }

    fn candidates(&self, ctx: &HealContext<'_>) -> Vec<String> {
        let Some(snapshot) = ctx.snapshot else {
            return Vec::new();
        };
        if ctx.failure.category != FailureCategory::SelectorNotFound {
            return Vec::new();
        }
        match ctx.failure.selector.as_deref() {
            Some(sel) => rank_alternatives(snapshot, &[sel], &[sel], self.max_candidates),
            // unknown culprit: look for neighbours of everything the case touches
            None => rank_alternatives(snapshot, &ctx.spec.selectors(), &[], self.max_candidates),
        }
    }

    /// Decide and, for code defects, attempt a repair
    pub async fn heal(&self, ctx: HealContext<'_>, cancel: &CancellationToken) -> Result<HealOutcome> {
        if ctx.run.passed() || ctx.script.status == ScriptStatus::Passed {
            return Err(PipelineError::Storage(uiheal_common::Error::InvalidLineage {
                testcase_id: ctx.script.testcase_id.clone(),
                reason: "a passed script is never healed".into(),
            }));
        }
        let failure = ctx.failure.clone();

        let strategy = strategy_for(failure.category);

        if ctx.heal_count >= self.max_heals {
            info!(
                testcase = %ctx.script.testcase_id,
                heals = ctx.heal_count,
                ?strategy,
                "Heal budget exhausted"
            );
            let attempt = HealAttempt::new(ctx.script, failure, strategy, HealDisposition::BudgetExhausted)
                .with_detail(format!("{} heal(s) already spent", ctx.heal_count));
            return Ok(HealOutcome::Abandon {
                attempt,
                reason: AbandonReason::HealBudgetExhausted,
            });
        }

        if strategy == HealStrategy::Rerun {
            info!(testcase = %ctx.script.testcase_id, category = %failure.category, "Scheduling rerun");
            let attempt = HealAttempt::new(ctx.script, failure, HealStrategy::Rerun, HealDisposition::Rerun);
            return Ok(HealOutcome::Rerun { attempt });
        }

        let request = RepairRequest {
            testcase: ctx.spec.clone(),
            script: ctx.script.clone(),
            diagnostic: ctx.run.diagnostic.clone().unwrap_or_default(),
            failure: failure.clone(),
            candidate_selectors: self.candidates(&ctx),
        };

        let source = match self.scripts.repair(&request, cancel).await {
            Ok(source) => source,
            Err(GenerationError::Cancelled) => return Err(PipelineError::Cancelled),
            Err(e) => {
                warn!(testcase = %ctx.script.testcase_id, "Repair unavailable: {}", e);
                let attempt = HealAttempt::new(
                    ctx.script,
                    failure,
                    HealStrategy::Regenerate,
                    HealDisposition::Unavailable,
                )
                .with_detail(e.to_string());
                return Ok(HealOutcome::Abandon {
                    attempt,
                    reason: AbandonReason::HealUnavailable,
                });
            }
        };

        if ctx.script.is_identical_to(&source) {
            warn!(testcase = %ctx.script.testcase_id, "Repair returned the failing script unchanged");
            let attempt = HealAttempt::new(ctx.script, failure, HealStrategy::Regenerate, HealDisposition::NoOp)
                .with_detail("repair identical to the failing generation");
            return Ok(HealOutcome::Abandon {
                attempt,
                reason: AbandonReason::HealUnavailable,
            });
        }

        let healed = ctx.script.derive_healed(source);
        info!(
            testcase = %healed.testcase_id,
            generation = healed.generation,
            "Repair produced a new generation"
        );
        let attempt = HealAttempt::new(ctx.script, failure, HealStrategy::Regenerate, HealDisposition::Applied)
            .with_healed(&healed);
        Ok(HealOutcome::Healed {
            attempt,
            script: healed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{CompletionBackend, Prompt};
    use crate::client::{GenerationClient, RetryPolicy};
    use crate::error::BackendError;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::time::Duration;
    use uiheal_common::{Diagnostic, ElementInfo, RunOutcome, StepAction, TestStep};

    struct Reply(std::result::Result<String, BackendError>);

    #[async_trait]
    impl CompletionBackend for Reply {
        fn name(&self) -> &str {
            "reply"
        }

        async fn complete(&self, _prompt: &Prompt) -> std::result::Result<String, BackendError> {
            match &self.0 {
                Ok(text) => Ok(text.clone()),
                Err(_) => Err(BackendError::Empty),
            }
        }
    }

    fn healer(reply: std::result::Result<String, BackendError>, max_heals: u32) -> AutoHealer {
        let client = GenerationClient::new(Arc::new(Reply(reply)), RetryPolicy::none(), Duration::from_secs(5));
        AutoHealer::new(
            ScriptSynthesizer::new(client),
            &HealConfig {
                max_heals,
                max_candidate_selectors: 5,
            },
        )
    }

    struct Fixture {
        spec: TestCaseSpec,
        snapshot: Snapshot,
        script: Script,
        run: RunResult,
    }

    const ORIGINAL: &str = "const { chromium, firefox, webkit } = require('playwright');\nawait page.click('#submit');";

    fn fixture() -> Fixture {
        let snapshot = Snapshot::new(
            "http://localhost",
            vec![ElementInfo::new("#submit-btn").with_role("button")],
        );
        let spec = TestCaseSpec::new(
            &snapshot,
            "Submit",
            vec![TestStep {
                action: StepAction::Click,
                target_selector: Some("#submit-btn".into()),
                value: None,
                expected_outcome: String::new(),
            }],
        );
        let mut script = Script::original(&spec.id, ORIGINAL);
        script.status = ScriptStatus::Failed;
        let run = RunResult::failed(
            &script.id,
            RunOutcome::Fail,
            Diagnostic::new("element not found: #submit"),
            10,
        );
        Fixture {
            spec,
            snapshot,
            script,
            run,
        }
    }

    fn class(category: FailureCategory) -> FailureClass {
        FailureClass {
            category,
            confidence: 0.9,
            suggested_fix_hint: String::new(),
            selector: Some("#submit".into()),
        }
    }

    fn ctx<'a>(f: &'a Fixture, failure: &'a FailureClass, heal_count: u32) -> HealContext<'a> {
        HealContext {
            spec: &f.spec,
            snapshot: Some(&f.snapshot),
            script: &f.script,
            run: &f.run,
            failure,
            heal_count,
        }
    }

    #[tokio::test]
    async fn test_selector_failure_is_regenerated() {
        let f = fixture();
        let failure = class(FailureCategory::SelectorNotFound);
        let outcome = healer(Ok("```js\nawait page.click('#submit-btn');\n```".into()), 3)
            .heal(ctx(&f, &failure, 0), &CancellationToken::new())
            .await
            .unwrap();

        match outcome {
            HealOutcome::Healed { attempt, script } => {
                assert_eq!(script.generation, 1);
                assert_eq!(script.parent_id.as_deref(), Some(f.script.id.as_str()));
                assert!(attempt.accepted);
                assert_eq!(attempt.healed_script_id.as_deref(), Some(script.id.as_str()));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_timeout_is_rerun() {
        let f = fixture();
        let failure = class(FailureCategory::Timeout);
        let outcome = healer(Err(BackendError::Empty), 3)
            .heal(ctx(&f, &failure, 1), &CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(outcome, HealOutcome::Rerun { .. }));
        assert_eq!(outcome.attempt().strategy, HealStrategy::Rerun);
    }

    #[tokio::test]
    async fn test_budget_exhausted() {
        let f = fixture();
        let failure = class(FailureCategory::SelectorNotFound);
        let outcome = healer(Ok(ORIGINAL.into()), 3)
            .heal(ctx(&f, &failure, 3), &CancellationToken::new())
            .await
            .unwrap();
        match outcome {
            HealOutcome::Abandon { attempt, reason } => {
                assert_eq!(reason, AbandonReason::HealBudgetExhausted);
                assert_eq!(attempt.disposition, HealDisposition::BudgetExhausted);
                assert_eq!(attempt.strategy, HealStrategy::Regenerate);
                assert!(!attempt.accepted);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_budget_exhausted_keeps_category_strategy() {
        let f = fixture();
        let failure = class(FailureCategory::NetworkError);
        let outcome = healer(Err(BackendError::Empty), 2)
            .heal(ctx(&f, &failure, 2), &CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            HealOutcome::Abandon {
                reason: AbandonReason::HealBudgetExhausted,
                ..
            }
        ));
        assert_eq!(outcome.attempt().disposition, HealDisposition::BudgetExhausted);
        assert_eq!(outcome.attempt().strategy, HealStrategy::Rerun);
    }

    #[tokio::test]
    async fn test_identical_repair_is_no_op() {
        let f = fixture();
        let failure = class(FailureCategory::AssertionMismatch);
        let outcome = healer(Ok(ORIGINAL.into()), 3)
            .heal(ctx(&f, &failure, 0), &CancellationToken::new())
            .await
            .unwrap();
        match outcome {
            HealOutcome::Abandon { attempt, reason } => {
                assert_eq!(reason, AbandonReason::HealUnavailable);
                assert_eq!(attempt.disposition, HealDisposition::NoOp);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_backend_failure_is_unavailable() {
        let f = fixture();
        let failure = class(FailureCategory::Unknown);
        let outcome = healer(Err(BackendError::Empty), 3)
            .heal(ctx(&f, &failure, 0), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.attempt().disposition, HealDisposition::Unavailable);
        assert!(!outcome.attempt().accepted);
    }

    #[tokio::test]
    async fn test_passed_run_is_rejected() {
        let f = fixture();
        let failure = class(FailureCategory::Unknown);
        let passed = RunResult::pass(&f.script.id, 5);
        let mut context = ctx(&f, &failure, 0);
        context.run = &passed;
        let err = healer(Ok(ORIGINAL.into()), 3)
            .heal(context, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Storage(_)));
    }
}
