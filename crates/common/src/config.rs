//! Pipeline configuration
//!
//! Loaded from `uiheal.toml`; every section falls back to its defaults when
//! absent, and CLI flags override individual values afterwards.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Upper bound accepted for `heal.max_heals`
pub const MAX_HEALS_LIMIT: u32 = 10;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub backend: BackendConfig,
    pub generation: GenerationConfig,
    pub execution: ExecutionConfig,
    pub heal: HealConfig,
    pub pipeline: WorkerConfig,
}

/// AI backend (OpenAI-compatible chat completions)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub base_url: String,
    pub model: String,
    /// Environment variable holding the credential
    pub api_key_env: String,
    pub request_timeout_secs: u64,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.deepseek.com/v1".to_string(),
            model: "deepseek-chat".to_string(),
            api_key_env: "UIHEAL_API_KEY".to_string(),
            request_timeout_secs: 180,
            temperature: None,
            max_tokens: None,
        }
    }
}

impl BackendConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Credential from `api_key_env`, falling back to `DEEPSEEK_API_KEY`
    pub fn resolve_api_key(&self) -> Option<String> {
        [self.api_key_env.as_str(), "DEEPSEEK_API_KEY"]
            .iter()
            .filter_map(|name| std::env::var(name).ok())
            .find(|key| !key.trim().is_empty())
    }
}

/// Bounded retry for synthesis and repair calls
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_retries: 1,
            retry_backoff_ms: 2000,
        }
    }
}

/// Test execution engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub node_binary: PathBuf,
    pub timeout_secs: u64,
    /// Retries when the engine itself fails, not when a test fails
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub browser: String,
    pub headless: bool,
    /// Overrides the snapshot URL as the application base URL
    pub base_url: Option<String>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            node_binary: PathBuf::from("node"),
            timeout_secs: 120,
            max_retries: 1,
            retry_backoff_ms: 1000,
            browser: "chromium".to_string(),
            headless: true,
            base_url: None,
        }
    }
}

impl ExecutionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Auto-healer limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealConfig {
    pub max_heals: u32,
    pub max_candidate_selectors: usize,
}

impl Default for HealConfig {
    fn default() -> Self {
        Self {
            max_heals: 3,
            max_candidate_selectors: 5,
        }
    }
}

/// Worker pool and working directory
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub workers: usize,
    pub workdir: PathBuf,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            workdir: PathBuf::from(".uiheal"),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from file, or defaults when the file is absent
    pub fn load(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str(&content)?
        } else {
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = self.to_toml()?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.heal.max_heals == 0 || self.heal.max_heals > MAX_HEALS_LIMIT {
            return Err(Error::InvalidConfig(format!(
                "heal.max_heals must be between 1 and {}, got {}",
                MAX_HEALS_LIMIT, self.heal.max_heals
            )));
        }
        if self.pipeline.workers == 0 {
            return Err(Error::InvalidConfig("pipeline.workers must be at least 1".into()));
        }
        if self.execution.timeout_secs == 0 {
            return Err(Error::InvalidConfig("execution.timeout_secs must be positive".into()));
        }
        if self.backend.request_timeout_secs == 0 {
            return Err(Error::InvalidConfig(
                "backend.request_timeout_secs must be positive".into(),
            ));
        }
        if !matches!(self.execution.browser.as_str(), "chromium" | "firefox" | "webkit") {
            return Err(Error::InvalidConfig(format!(
                "execution.browser must be chromium, firefox or webkit, got {}",
                self.execution.browser
            )));
        }
        Ok(())
    }
}
