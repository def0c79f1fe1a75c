//! Resolved configuration and the collaborators built from it

use anyhow::{Context as _, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uiheal_common::{PipelineConfig, RunLedger, Workspace};
use uiheal_e2e::{EngineConfig, ExecutionEngine, PlaywrightEngine, SnapshotCollector};
use uiheal_pipeline::{
    ChatCompletionsBackend, GenerationClient, LineageDriver, Pipeline, RetryPolicy,
    ScriptSynthesizer, TestCaseSynthesizer,
};

use crate::cli::Cli;
use crate::output::OutputFormat;

/// Everything a command needs, after CLI overrides
pub struct Context {
    pub config: PipelineConfig,
    pub format: OutputFormat,
}

impl Context {
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut config = PipelineConfig::load(&cli.config)
            .with_context(|| format!("loading {}", cli.config.display()))?;

        if let Some(workdir) = &cli.workdir {
            config.pipeline.workdir = workdir.clone();
        }
        if let Some(workers) = cli.workers {
            config.pipeline.workers = workers;
        }
        if let Some(max_heals) = cli.max_heals {
            config.heal.max_heals = max_heals;
        }
        config.validate()?;
        debug!(workdir = %config.pipeline.workdir.display(), workers = config.pipeline.workers, "Configuration loaded");

        Ok(Self {
            config,
            format: cli.format,
        })
    }

    pub fn workers(&self) -> usize {
        self.config.pipeline.workers
    }

    pub async fn workspace(&self) -> Result<Workspace> {
        let workdir = &self.config.pipeline.workdir;
        Workspace::open(workdir)
            .await
            .with_context(|| format!("opening workspace {}", workdir.display()))
    }

    pub fn collector(&self) -> Result<SnapshotCollector> {
        let exec = &self.config.execution;
        Ok(SnapshotCollector::new(
            &exec.node_binary,
            exec.browser.clone(),
            exec.headless,
            exec.timeout(),
        )?)
    }

    pub fn client(&self) -> Result<GenerationClient> {
        let backend = ChatCompletionsBackend::from_config(&self.config.backend)
            .context("AI backend is not usable")?;
        Ok(GenerationClient::new(
            Arc::new(backend),
            RetryPolicy::from(&self.config.generation),
            self.config.backend.request_timeout(),
        ))
    }

    pub fn engine(&self) -> Result<Arc<dyn ExecutionEngine>> {
        let engine = PlaywrightEngine::new(EngineConfig::from(&self.config.execution))?;
        Ok(Arc::new(engine))
    }

    fn exec_retry(&self) -> RetryPolicy {
        let exec = &self.config.execution;
        RetryPolicy::new(exec.max_retries, Duration::from_millis(exec.retry_backoff_ms))
    }

    /// Driver for stage commands; failures go to the workspace queue
    pub fn driver(&self, workspace: &Workspace, ledger: Arc<RunLedger>) -> Result<LineageDriver> {
        Ok(self
            .build_driver(workspace, ledger, self.client()?)?
            .with_queue(Arc::new(workspace.failure_queue())))
    }

    fn build_driver(
        &self,
        workspace: &Workspace,
        ledger: Arc<RunLedger>,
        client: GenerationClient,
    ) -> Result<LineageDriver> {
        let scripts = ScriptSynthesizer::new(client).with_artifacts(workspace.artifacts().clone());
        Ok(LineageDriver::new(
            ledger,
            Arc::new(workspace.clone()),
            workspace.artifacts().clone(),
            scripts,
            self.engine()?,
            &self.config.heal,
        )
        .with_exec_retry(self.exec_retry()))
    }

    /// Whole pipeline over a fresh ledger, with an in-memory failure queue
    pub fn pipeline(&self, workspace: &Workspace) -> Result<Pipeline> {
        let client = self.client()?;
        let driver = self.build_driver(workspace, Arc::new(RunLedger::new()), client.clone())?;
        Ok(Pipeline::new(
            driver,
            TestCaseSynthesizer::new(client),
            self.workers(),
        ))
    }
}
