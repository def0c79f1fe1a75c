//! Test-case synthesis from snapshots

use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uiheal_common::{Snapshot, TestCaseSpec, TestStep};

use crate::client::GenerationClient;
use crate::error::GenerationError;
use crate::prompts::testcase_prompt;
use crate::text::extract_code_block;

#[derive(Debug, Deserialize)]
struct DraftCase {
    title: String,
    #[serde(default)]
    steps: Vec<TestStep>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DraftDocument {
    List(Vec<DraftCase>),
    Wrapped { test_cases: Vec<DraftCase> },
}

/// Why a drafted case cannot be used against `snapshot`
fn check_draft(draft: &DraftCase, snapshot: &Snapshot) -> Result<(), String> {
    if draft.title.trim().is_empty() {
        return Err("empty title".into());
    }
    if draft.steps.is_empty() {
        return Err("no steps".into());
    }
    for (i, step) in draft.steps.iter().enumerate() {
        match step.target_selector.as_deref() {
            Some(sel) if !snapshot.contains_selector(sel) => {
                return Err(format!("step {} uses unknown selector {}", i + 1, sel));
            }
            None if step.action.requires_element() => {
                return Err(format!("step {} ({}) needs a target selector", i + 1, step.action));
            }
            _ => {}
        }
    }
    Ok(())
}

/// Parse model output into specs, dropping drafts that reference the void
pub fn parse_testcases(text: &str, snapshot: &Snapshot) -> Result<Vec<TestCaseSpec>, String> {
    let body = extract_code_block(text);
    let document: DraftDocument =
        serde_yaml::from_str(&body).map_err(|e| format!("not a test case list: {}", e))?;
    let drafts = match document {
        DraftDocument::List(drafts) => drafts,
        DraftDocument::Wrapped { test_cases } => test_cases,
    };

    let mut specs = Vec::new();
    for draft in drafts {
        match check_draft(&draft, snapshot) {
            Ok(()) => specs.push(TestCaseSpec::new(snapshot, draft.title, draft.steps)),
            Err(reason) => warn!(title = %draft.title, "Dropping test case: {}", reason),
        }
    }
    if specs.is_empty() {
        return Err("no usable test cases".into());
    }
    Ok(specs)
}

/// Turns snapshots into test-case specs
pub struct TestCaseSynthesizer {
    client: GenerationClient,
    requirements: Vec<String>,
}

impl TestCaseSynthesizer {
    pub fn new(client: GenerationClient) -> Self {
        Self {
            client,
            requirements: Vec::new(),
        }
    }

    /// Requirements every prompt asks the backend to cover
    pub fn with_requirements(mut self, requirements: Vec<String>) -> Self {
        self.requirements = requirements;
        self
    }

    /// Every returned spec references only selectors present in `snapshot`
    pub async fn synthesize(
        &self,
        snapshot: &Snapshot,
        cancel: &CancellationToken,
    ) -> Result<Vec<TestCaseSpec>, GenerationError> {
        if snapshot.is_empty() {
            return Err(GenerationError::EmptySnapshot(snapshot.id.clone()));
        }

        let prompt = testcase_prompt(snapshot, &self.requirements);
        let specs = self
            .client
            .generate("testcases", &prompt, cancel, |text| parse_testcases(text, snapshot))
            .await?;
        info!(
            snapshot = %snapshot.id,
            "Synthesized {} test case(s) for {}",
            specs.len(),
            snapshot.source_url
        );
        Ok(specs)
    }
}
