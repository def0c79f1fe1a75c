//! Test execution engine
//!
//! Runs a script file with Node and turns the process outcome into a
//! [`RunResult`]:
//!
//! | process                                  | outcome |
//! |------------------------------------------|---------|
//! | exit 0, no failure report                | Pass    |
//! | failure report, or exit 1                | Fail    |
//! | any other exit, or killed by a signal    | Error   |
//! | deadline exceeded                        | Fail (timed out) |
//!
//! Failing to start the process at all is an [`ExecError`].

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, info, warn};
use uiheal_common::config::ExecutionConfig;
use uiheal_common::{Diagnostic, RunOutcome, RunResult, Script};

use crate::diagnostic::{build_diagnostic, harness_report, RESULT_MARKER};
use crate::error::{ExecError, ExecResult};
use crate::process::run_with_timeout;
use crate::scaffold::{BASE_URL_ENV, BROWSER_ENV, HEADLESS_ENV};

/// Runs scripts and reports structured results
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    /// Execute `script`, whose source lives at `path`
    async fn execute(&self, script: &Script, path: &Path) -> ExecResult<RunResult>;
}

/// Engine settings
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub node_binary: PathBuf,
    pub timeout: Duration,
    pub browser: String,
    pub headless: bool,
    pub base_url: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from(&ExecutionConfig::default())
    }
}

impl From<&ExecutionConfig> for EngineConfig {
    fn from(config: &ExecutionConfig) -> Self {
        Self {
            node_binary: config.node_binary.clone(),
            timeout: config.timeout(),
            browser: config.browser.clone(),
            headless: config.headless,
            base_url: config.base_url.clone(),
        }
    }
}

/// Preloaded into every run so uncaught failures still yield a report line
fn preload_source() -> String {
    format!(
        r#"'use strict';
const marker = '{marker}';
function report(err) {{
  const payload = {{
    success: false,
    error: String((err && err.message) || err),
    stack: (err && err.stack) || null,
  }};
  process.stderr.write(marker + JSON.stringify(payload) + '\n');
}}
process.on('uncaughtException', (err) => {{ report(err); process.exit(1); }});
process.on('unhandledRejection', (err) => {{ report(err); process.exit(1); }});
"#,
        marker = RESULT_MARKER
    )
}

/// Node + Playwright implementation of [`ExecutionEngine`]
pub struct PlaywrightEngine {
    config: EngineConfig,
    preload: PathBuf,
    _scratch: TempDir,
}

impl PlaywrightEngine {
    pub fn new(config: EngineConfig) -> ExecResult<Self> {
        let scratch = tempfile::Builder::new().prefix("uiheal-engine").tempdir()?;
        let preload = scratch.path().join("harness.js");
        std::fs::write(&preload, preload_source())?;
        debug!("Engine harness written to {}", preload.display());

        Ok(Self {
            config,
            preload,
            _scratch: scratch,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn command(&self, path: &Path, base_url: &str) -> Command {
        let mut cmd = Command::new(&self.config.node_binary);
        cmd.arg("--require")
            .arg(&self.preload)
            .arg(path)
            .env(BROWSER_ENV, &self.config.browser)
            .env(HEADLESS_ENV, if self.config.headless { "true" } else { "false" });
        if !base_url.is_empty() {
            cmd.env(BASE_URL_ENV, base_url);
        }
        cmd
    }
}

#[async_trait]
impl ExecutionEngine for PlaywrightEngine {
    async fn execute(&self, script: &Script, path: &Path) -> ExecResult<RunResult> {
        if !path.exists() {
            return Err(ExecError::ScriptMissing(path.to_path_buf()));
        }

        let base_url = self.config.base_url.clone().unwrap_or_default();
        info!(
            script = %script.id,
            testcase = %script.testcase_id,
            generation = script.generation,
            "Running {}",
            path.display()
        );

        let output = run_with_timeout(
            self.command(path, &base_url),
            &self.config.node_binary,
            self.config.timeout,
        )
        .await?;
        let duration_ms = output.duration_ms();

        if output.timed_out {
            warn!(script = %script.id, "Run exceeded {:?}", self.config.timeout);
            let mut diagnostic = build_diagnostic(&output.stdout, &output.stderr, None);
            diagnostic.message = format!(
                "Timeout {}ms exceeded while running script",
                self.config.timeout.as_millis()
            );
            diagnostic.timed_out = true;
            return Ok(RunResult::failed(
                &script.id,
                RunOutcome::Fail,
                diagnostic,
                duration_ms,
            ));
        }

        let report = harness_report(&output.stdout, &output.stderr);
        let reported_failure = report.as_ref().map(|r| !r.success).unwrap_or(false);

        if output.exit_code == Some(0) && !reported_failure {
            info!(script = %script.id, duration_ms, "Run passed");
            return Ok(RunResult::pass(&script.id, duration_ms));
        }

        let outcome = if reported_failure || output.exit_code == Some(1) {
            RunOutcome::Fail
        } else {
            RunOutcome::Error
        };
        let diagnostic: Diagnostic =
            build_diagnostic(&output.stdout, &output.stderr, output.exit_code);
        info!(
            script = %script.id,
            duration_ms,
            %outcome,
            "Run did not pass: {}",
            diagnostic.message
        );
        Ok(RunResult::failed(&script.id, outcome, diagnostic, duration_ms))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    /// Stand-in for node: a shell script that runs the script file with sh
    fn fake_node(dir: &Path) -> PathBuf {
        let path = dir.join("fake-node");
        std::fs::write(&path, "#!/bin/sh\nshift 2\nexec sh \"$1\"\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn engine(dir: &Path, timeout: Duration) -> PlaywrightEngine {
        PlaywrightEngine::new(EngineConfig {
            node_binary: fake_node(dir),
            timeout,
            ..EngineConfig::default()
        })
        .unwrap()
    }

    async fn run(body: &str, timeout: Duration) -> RunResult {
        let tmp = tempfile::tempdir().unwrap();
        let script_path = tmp.path().join("case.js");
        std::fs::write(&script_path, body).unwrap();
        let script = Script::original("case", body);
        engine(tmp.path(), timeout)
            .execute(&script, &script_path)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_exit_zero_passes() {
        let result = run("echo '{\"success\":true}'\n", Duration::from_secs(5)).await;
        assert!(result.passed());
        assert!(result.diagnostic.is_none());
    }

    #[tokio::test]
    async fn test_reported_failure_is_fail() {
        let body = "echo '{\"success\":false,\"error\":\"element not found: #submit\"}' 1>&2\nexit 1\n";
        let result = run(body, Duration::from_secs(5)).await;
        assert_eq!(result.outcome, RunOutcome::Fail);
        let diagnostic = result.diagnostic.unwrap();
        assert_eq!(diagnostic.selector.as_deref(), Some("#submit"));
    }

    #[tokio::test]
    async fn test_crash_is_error() {
        let result = run("echo 'Segmentation fault' 1>&2\nexit 139\n", Duration::from_secs(5)).await;
        assert_eq!(result.outcome, RunOutcome::Error);
    }

    #[tokio::test]
    async fn test_deadline_is_timed_out_fail() {
        let result = run("sleep 30\n", Duration::from_millis(300)).await;
        assert_eq!(result.outcome, RunOutcome::Fail);
        let diagnostic = result.diagnostic.unwrap();
        assert!(diagnostic.timed_out);
        assert!(diagnostic.message.contains("Timeout 300ms exceeded"));
    }

    #[tokio::test]
    async fn test_missing_script_is_exec_error() {
        let tmp = tempfile::tempdir().unwrap();
        let script = Script::original("case", "x");
        let err = engine(tmp.path(), Duration::from_secs(1))
            .execute(&script, &tmp.path().join("absent.js"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::ScriptMissing(_)));
    }
}
