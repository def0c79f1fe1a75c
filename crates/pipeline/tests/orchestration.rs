//! Worker pool, synthesis stage, cancellation and systemic failures

mod common;

use common::*;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uiheal_common::{AbandonReason, Diagnostic, LineagePhase, RunOutcome, RunResult, Snapshot};
use uiheal_pipeline::BackendError;

const CASES_YAML: &str = r##"```yaml
- title: Sign in
  steps:
    - action: fill
      target_selector: "#username"
      value: alice
    - action: click
      target_selector: "#submit-btn"
      expected_outcome: dashboard is shown
- title: Ghost button
  steps:
    - action: click
      target_selector: "#ghost"
```"##;

#[tokio::test]
async fn test_synthesized_cases_only_use_snapshot_selectors() {
    let backend = ScriptedBackend::new(|kind, _| match kind {
        Kind::Testcases => Ok(CASES_YAML.to_string()),
        Kind::Script => Ok(fenced("await page.click('#submit-btn');")),
        Kind::Repair => Err(BackendError::Empty),
    });
    let h = harness(backend, selector_engine(), 3, 2).await;
    let snapshots = vec![login_snapshot(), Snapshot::new("http://localhost:3000/blank", vec![])];

    let synthesis = h
        .pipeline
        .synthesize_cases(&snapshots, &CancellationToken::new())
        .await;
    assert_eq!(synthesis.cases.len(), 1);
    assert_eq!(synthesis.failures.len(), 1);
    assert_eq!(synthesis.failures[0].source_url, "http://localhost:3000/blank");

    let (spec, snapshot) = &synthesis.cases[0];
    assert_eq!(spec.title, "Sign in");
    assert_eq!(spec.snapshot_id, snapshot.id);
    for selector in spec.selectors() {
        assert!(snapshot.contains_selector(selector), "{} not in snapshot", selector);
    }
    // the empty snapshot never reached the backend
    assert_eq!(h.backend.count(Kind::Testcases), 1);
}

const UNSORTED_YAML: &str = r##"```yaml
- title: Zeta submit
  steps:
    - action: click
      target_selector: "#submit-btn"
- title: Alpha username
  steps:
    - action: fill
      target_selector: "#username"
      value: alice
- title: Mid password
  steps:
    - action: fill
      target_selector: "#password"
      value: secret
```"##;

#[tokio::test]
async fn test_synthesized_cases_keep_backend_order() {
    let backend = ScriptedBackend::new(|kind, _| match kind {
        Kind::Testcases => Ok(UNSORTED_YAML.to_string()),
        _ => Err(BackendError::Empty),
    });
    let h = harness(backend, selector_engine(), 3, 4).await;
    let first = login_snapshot();
    let second = Snapshot::new("http://localhost:3000/signup", first.element_index.clone());
    let snapshots = vec![first.clone(), second.clone()];

    let synthesis = h
        .pipeline
        .synthesize_cases(&snapshots, &CancellationToken::new())
        .await;
    let order: Vec<(&str, &str)> = synthesis
        .cases
        .iter()
        .map(|(spec, snapshot)| (snapshot.source_url.as_str(), spec.title.as_str()))
        .collect();
    assert_eq!(
        order,
        vec![
            (first.source_url.as_str(), "Zeta submit"),
            (first.source_url.as_str(), "Alpha username"),
            (first.source_url.as_str(), "Mid password"),
            (second.source_url.as_str(), "Zeta submit"),
            (second.source_url.as_str(), "Alpha username"),
            (second.source_url.as_str(), "Mid password"),
        ]
    );
}

#[tokio::test]
async fn test_requirements_reach_the_case_prompt() {
    let backend = ScriptedBackend::new(|kind, _| match kind {
        Kind::Testcases => Ok(CASES_YAML.to_string()),
        _ => Err(BackendError::Empty),
    });
    let h = harness(backend, selector_engine(), 3, 1).await;
    let pipeline = h
        .pipeline
        .with_requirements(vec!["Users can sign in".to_string()]);

    let synthesis = pipeline
        .synthesize_cases(&[login_snapshot()], &CancellationToken::new())
        .await;
    assert_eq!(synthesis.cases.len(), 1);
    let prompts = h.backend.prompts(Kind::Testcases);
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].user.contains("1. Users can sign in"));
}

#[tokio::test]
async fn test_execute_runs_end_to_end() {
    let backend = ScriptedBackend::new(|kind, _| match kind {
        Kind::Testcases => Ok(CASES_YAML.to_string()),
        Kind::Script => Ok(fenced("await page.click('#submit-btn');")),
        Kind::Repair => Err(BackendError::Empty),
    });
    let h = harness(backend, selector_engine(), 3, 2).await;

    let summary = h
        .pipeline
        .execute(&[login_snapshot()], &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.records.len(), 1);
    assert_eq!(summary.passed(), 1);
    assert!(!summary.cancelled);
    assert!(!summary.is_systemic_failure());

    let report = h.pipeline.report().unwrap();
    assert_eq!(report.total_testcases, 1);
    assert_eq!(report.runs.pass, 1);
}

#[tokio::test]
async fn test_lineages_are_independent() {
    let backend = ScriptedBackend::new(|kind, _| match kind {
        Kind::Script => Ok(fenced("await page.click('#submit-btn');")),
        _ => Err(BackendError::Empty),
    });
    let engine = ScriptedEngine::new(|script, _| {
        if script.testcase_id.starts_with("stable") {
            RunResult::pass(&script.id, 5)
        } else {
            RunResult::failed(
                &script.id,
                RunOutcome::Fail,
                Diagnostic::new("AssertionError: expected 'Welcome' but got 'Login'"),
                5,
            )
        }
    });
    let h = harness(backend, engine, 3, 2).await;
    let snapshot = login_snapshot();
    let cases = vec![
        (login_case(&snapshot, "Stable login"), Some(snapshot.clone())),
        (login_case(&snapshot, "Broken login"), Some(snapshot.clone())),
    ];

    let summary = h.pipeline.run(cases, &CancellationToken::new()).await.unwrap();
    assert_eq!(summary.passed(), 1);
    assert_eq!(summary.abandoned(), 1);

    let broken = summary
        .records
        .iter()
        .find(|r| r.testcase_id.starts_with("broken"))
        .unwrap();
    assert_eq!(broken.abandon_reason, Some(AbandonReason::HealUnavailable));

    let report = h.pipeline.report().unwrap();
    assert_eq!(report.passed, 1);
    assert_eq!(report.abandoned, 1);
}

#[tokio::test]
async fn test_cancellation_aborts_every_lineage() {
    let backend = ScriptedBackend::new(|kind, _| match kind {
        Kind::Script => Ok(fenced("await page.click('#submit-btn');")),
        _ => Err(BackendError::Empty),
    });
    let h = harness(backend, ScriptedEngine::slow(Duration::from_secs(30)), 3, 1).await;
    let snapshot = login_snapshot();
    let cases = (0..3)
        .map(|i| (login_case(&snapshot, &format!("Case {}", i)), Some(snapshot.clone())))
        .collect();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let summary = tokio::time::timeout(Duration::from_secs(10), h.pipeline.run(cases, &cancel))
        .await
        .expect("pipeline stops promptly after cancellation")
        .unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.records.len(), 3);
    for record in &summary.records {
        assert_eq!(record.phase, LineagePhase::Abandoned);
        assert_eq!(record.abandon_reason, Some(AbandonReason::Aborted));
    }
}

#[tokio::test]
async fn test_unreachable_backend_is_systemic() {
    let backend =
        ScriptedBackend::new(|_, _| Err(BackendError::Network("connection refused".into())));
    let h = harness(backend, selector_engine(), 3, 2).await;
    let snapshot = login_snapshot();

    let summary = h
        .pipeline
        .run(
            vec![(login_case(&snapshot, "Needs a script"), Some(snapshot))],
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(summary.backend_unreachable);
    assert!(summary.is_systemic_failure());
    assert_eq!(
        summary.records[0].abandon_reason,
        Some(AbandonReason::GenerationFailure)
    );
    assert_eq!(h.engine.runs(), 0);
}
