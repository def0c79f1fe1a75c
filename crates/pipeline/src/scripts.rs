//! Script synthesis and repair
//!
//! Model output goes through the same gate in both directions: take the
//! fenced code, add missing imports, then lint. Output that never clears
//! the gate is kept aside as an `.error.js` file for inspection.

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uiheal_common::{ArtifactStore, Script, Snapshot, TestCaseSpec};
use uiheal_e2e::lint::describe;
use uiheal_e2e::{ensure_imports, lint, render_scaffold};

use crate::client::GenerationClient;
use crate::error::GenerationError;
use crate::prompts::{repair_prompt, script_prompt, RepairRequest};
use crate::text::extract_code_block;

/// Normalize model output into a script source, or explain why it is unusable
pub fn accept_script(text: &str) -> Result<String, String> {
    let code = extract_code_block(text);
    let code = ensure_imports(&code);
    let issues = lint(&code);
    if issues.is_empty() {
        Ok(code)
    } else {
        Err(describe(&issues))
    }
}

/// Produces and repairs Playwright scripts through the backend
#[derive(Clone)]
pub struct ScriptSynthesizer {
    client: GenerationClient,
    artifacts: Option<ArtifactStore>,
}

impl ScriptSynthesizer {
    pub fn new(client: GenerationClient) -> Self {
        Self {
            client,
            artifacts: None,
        }
    }

    /// Keep rejected output under the store's `rejected/` directory
    pub fn with_artifacts(mut self, artifacts: ArtifactStore) -> Self {
        self.artifacts = Some(artifacts);
        self
    }

    pub fn client(&self) -> &GenerationClient {
        &self.client
    }

    async fn keep_rejected(&self, testcase_id: &str, err: &GenerationError) {
        let (Some(artifacts), GenerationError::Rejected { output, .. }) = (&self.artifacts, err) else {
            return;
        };
        match artifacts.write_rejected(testcase_id, output).await {
            Ok(path) => warn!(testcase = testcase_id, "Rejected output kept at {}", path.display()),
            Err(e) => warn!(testcase = testcase_id, "Could not keep rejected output: {}", e),
        }
    }

    /// Generation-0 script for `spec`
    pub async fn synthesize(
        &self,
        spec: &TestCaseSpec,
        snapshot: Option<&Snapshot>,
        cancel: &CancellationToken,
    ) -> Result<Script, GenerationError> {
        let scaffold = render_scaffold(spec);
        let prompt = script_prompt(spec, snapshot, &scaffold);

        match self.client.generate("script", &prompt, cancel, accept_script).await {
            Ok(source) => {
                info!(testcase = %spec.id, "Script synthesized ({} bytes)", source.len());
                Ok(Script::original(&spec.id, source))
            }
            Err(e) => {
                self.keep_rejected(&spec.id, &e).await;
                Err(e)
            }
        }
    }

    /// Corrected source for the failing script in `request`
    pub async fn repair(
        &self,
        request: &RepairRequest,
        cancel: &CancellationToken,
    ) -> Result<String, GenerationError> {
        let prompt = repair_prompt(request);
        match self.client.generate("repair", &prompt, cancel, accept_script).await {
            Ok(source) => Ok(source),
            Err(e) => {
                self.keep_rejected(&request.testcase.id, &e).await;
                Err(e)
            }
        }
    }
}
