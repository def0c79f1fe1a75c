//! Shared fakes for pipeline integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use uiheal_common::config::HealConfig;
use uiheal_common::{
    Diagnostic, ElementInfo, RunLedger, RunOutcome, RunResult, Script, Snapshot, StepAction,
    TestCaseSpec, TestStep, Workspace,
};
use uiheal_e2e::{ExecResult, ExecutionEngine};
use uiheal_pipeline::{
    BackendError, CompletionBackend, GenerationClient, LineageDriver, Pipeline, Prompt,
    RetryPolicy, ScriptSynthesizer, TestCaseSynthesizer,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Testcases,
    Script,
    Repair,
}

fn kind_of(prompt: &Prompt) -> Kind {
    if prompt.user.starts_with("This Playwright script failed") {
        Kind::Repair
    } else if prompt.user.starts_with("Write a Playwright script") {
        Kind::Script
    } else {
        Kind::Testcases
    }
}

type Responder = dyn Fn(Kind, usize) -> Result<String, BackendError> + Send + Sync;

/// Backend answering from a closure of (prompt kind, call index for that kind)
pub struct ScriptedBackend {
    respond: Box<Responder>,
    calls: Mutex<Vec<(Kind, Prompt)>>,
}

impl ScriptedBackend {
    pub fn new<F>(respond: F) -> Arc<Self>
    where
        F: Fn(Kind, usize) -> Result<String, BackendError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            respond: Box::new(respond),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn prompts(&self, kind: Kind) -> Vec<Prompt> {
        self.calls
            .lock()
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, p)| p.clone())
            .collect()
    }

    pub fn count(&self, kind: Kind) -> usize {
        self.prompts(kind).len()
    }
}

#[async_trait]
impl CompletionBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, prompt: &Prompt) -> Result<String, BackendError> {
        let kind = kind_of(prompt);
        let index = {
            let mut calls = self.calls.lock();
            let index = calls.iter().filter(|(k, _)| *k == kind).count();
            calls.push((kind, prompt.clone()));
            index
        };
        (self.respond)(kind, index)
    }
}

type Verdict = dyn Fn(&Script, &str) -> RunResult + Send + Sync;

/// Engine that reads the persisted script and decides the outcome from it
pub struct ScriptedEngine {
    verdict: Box<Verdict>,
    delay: Duration,
    runs: AtomicUsize,
}

impl ScriptedEngine {
    pub fn new<F>(verdict: F) -> Arc<Self>
    where
        F: Fn(&Script, &str) -> RunResult + Send + Sync + 'static,
    {
        Arc::new(Self {
            verdict: Box::new(verdict),
            delay: Duration::ZERO,
            runs: AtomicUsize::new(0),
        })
    }

    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            verdict: Box::new(|script, _| RunResult::pass(&script.id, 1)),
            delay,
            runs: AtomicUsize::new(0),
        })
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExecutionEngine for ScriptedEngine {
    async fn execute(&self, script: &Script, path: &Path) -> ExecResult<RunResult> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let source = std::fs::read_to_string(path)?;
        Ok((self.verdict)(script, &source))
    }
}

/// Pass when the script uses `#submit-btn`, otherwise fail on `#submit`
pub fn selector_engine() -> Arc<ScriptedEngine> {
    ScriptedEngine::new(|script, source| {
        if source.contains("#submit-btn") {
            RunResult::pass(&script.id, 12)
        } else {
            let mut diagnostic = Diagnostic::new("Error: element not found: #submit");
            diagnostic.selector = Some("#submit".into());
            RunResult::failed(&script.id, RunOutcome::Fail, diagnostic, 30)
        }
    })
}

pub fn fenced(code: &str) -> String {
    format!("```javascript\n{}\n```", code)
}

pub fn login_snapshot() -> Snapshot {
    Snapshot::new(
        "http://localhost:3000/login",
        vec![
            ElementInfo::new("#username").with_role("textbox").with_attribute("tag", "input"),
            ElementInfo::new("#password").with_role("textbox").with_attribute("tag", "input"),
            ElementInfo::new("#submit-btn")
                .with_role("button")
                .with_text("Sign in")
                .with_attribute("id", "submit-btn"),
        ],
    )
}

pub fn login_case(snapshot: &Snapshot, title: &str) -> TestCaseSpec {
    TestCaseSpec::new(
        snapshot,
        title,
        vec![
            TestStep {
                action: StepAction::Fill,
                target_selector: Some("#username".into()),
                value: Some("alice".into()),
                expected_outcome: String::new(),
            },
            TestStep {
                action: StepAction::Click,
                target_selector: Some("#submit-btn".into()),
                value: None,
                expected_outcome: "dashboard is shown".into(),
            },
        ],
    )
}

pub struct Harness {
    pub pipeline: Pipeline,
    pub workspace: Workspace,
    pub backend: Arc<ScriptedBackend>,
    pub engine: Arc<ScriptedEngine>,
    _tmp: TempDir,
}

pub async fn harness(
    backend: Arc<ScriptedBackend>,
    engine: Arc<ScriptedEngine>,
    max_heals: u32,
    workers: usize,
) -> Harness {
    let tmp = tempfile::tempdir().unwrap();
    let workspace = Workspace::open(tmp.path()).await.unwrap();

    let client = GenerationClient::new(backend.clone(), RetryPolicy::none(), Duration::from_secs(5));
    let scripts = ScriptSynthesizer::new(client.clone()).with_artifacts(workspace.artifacts().clone());
    let driver = LineageDriver::new(
        Arc::new(RunLedger::new()),
        Arc::new(workspace.clone()),
        workspace.artifacts().clone(),
        scripts,
        engine.clone(),
        &HealConfig {
            max_heals,
            max_candidate_selectors: 5,
        },
    );
    let pipeline = Pipeline::new(driver, TestCaseSynthesizer::new(client), workers);

    Harness {
        pipeline,
        workspace,
        backend,
        engine,
        _tmp: tmp,
    }
}
