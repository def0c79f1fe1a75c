//! Bounded, cancellable calls to the completion backend
//!
//! Every synthesis and repair call goes through [`GenerationClient::generate`],
//! which owns the retry loop, the per-call deadline and the output
//! validation. Transport failures are counted in [`BackendStats`] so the
//! orchestrator can tell "the backend is down" apart from "one case failed".

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uiheal_common::config::GenerationConfig;

use crate::backend::{CompletionBackend, Prompt};
use crate::error::{BackendError, GenerationError};

/// Upper bound for a single backoff delay
pub const MAX_BACKOFF: Duration = Duration::from_secs(30);

const BACKOFF_MULTIPLIER: u32 = 2;

/// Retry budget for one logical generation call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_base: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff_base: Duration) -> Self {
        Self {
            max_retries,
            backoff_base,
        }
    }

    /// No retries and no delay
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    pub fn attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Delay before retry number `attempt` (1-indexed), doubling each time
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let multiplier = BACKOFF_MULTIPLIER.saturating_pow(exponent);
        self.backoff_base
            .checked_mul(multiplier)
            .unwrap_or(MAX_BACKOFF)
            .min(MAX_BACKOFF)
    }
}

impl From<&GenerationConfig> for RetryPolicy {
    fn from(config: &GenerationConfig) -> Self {
        Self::new(
            config.max_retries,
            Duration::from_millis(config.retry_backoff_ms),
        )
    }
}

/// Outcome counters shared by every caller of one backend
#[derive(Debug, Default)]
pub struct BackendStats {
    successes: AtomicU64,
    transport_failures: AtomicU64,
}

impl BackendStats {
    pub fn successes(&self) -> u64 {
        self.successes.load(Ordering::Relaxed)
    }

    pub fn transport_failures(&self) -> u64 {
        self.transport_failures.load(Ordering::Relaxed)
    }

    /// Every call so far failed at the transport level
    pub fn unreachable(&self) -> bool {
        self.successes() == 0 && self.transport_failures() > 0
    }
}

/// Backend handle with retry, deadline and cancellation
#[derive(Clone)]
pub struct GenerationClient {
    backend: Arc<dyn CompletionBackend>,
    policy: RetryPolicy,
    call_timeout: Duration,
    stats: Arc<BackendStats>,
}

impl GenerationClient {
    pub fn new(backend: Arc<dyn CompletionBackend>, policy: RetryPolicy, call_timeout: Duration) -> Self {
        Self {
            backend,
            policy,
            call_timeout,
            stats: Arc::new(BackendStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<BackendStats> {
        self.stats.clone()
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    async fn call_once(&self, prompt: &Prompt) -> Result<String, BackendError> {
        match tokio::time::timeout(self.call_timeout, self.backend.complete(prompt)).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::Timeout),
        }
    }

    /// Request a completion and validate it, retrying within the policy.
    ///
    /// `validate` turns raw text into the caller's value or a rejection
    /// reason; rejections are retried like backend errors.
    pub async fn generate<T, F>(
        &self,
        label: &str,
        prompt: &Prompt,
        cancel: &CancellationToken,
        validate: F,
    ) -> Result<T, GenerationError>
    where
        F: Fn(&str) -> Result<T, String>,
    {
        let attempts = self.policy.attempts();
        let mut last_error: Option<GenerationError> = None;

        for attempt in 1..=attempts {
            if cancel.is_cancelled() {
                return Err(GenerationError::Cancelled);
            }

            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(GenerationError::Cancelled),
                r = self.call_once(prompt) => r,
            };

            match result {
                Ok(text) => {
                    self.stats.successes.fetch_add(1, Ordering::Relaxed);
                    match validate(&text) {
                        Ok(value) => {
                            debug!(label, attempt, "Generation accepted");
                            return Ok(value);
                        }
                        Err(reason) => {
                            warn!(label, attempt, "Generated output rejected: {}", reason);
                            last_error = Some(GenerationError::Rejected {
                                attempts: attempt,
                                reason,
                                output: text,
                            });
                        }
                    }
                }
                Err(e) => {
                    if e.is_transport() {
                        self.stats.transport_failures.fetch_add(1, Ordering::Relaxed);
                    }
                    warn!(label, attempt, backend = self.backend.name(), "Backend call failed: {}", e);
                    let permanent = e.is_permanent();
                    last_error = Some(GenerationError::Backend {
                        attempts: attempt,
                        source: e,
                    });
                    if permanent {
                        break;
                    }
                }
            }

            if attempt < attempts {
                let delay = self.policy.backoff(attempt);
                tokio::select! {
                    _ = cancel.cancelled() => return Err(GenerationError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        Err(last_error.unwrap_or(GenerationError::Rejected {
            attempts: 0,
            reason: "no attempts were made".into(),
            output: String::new(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    struct Scripted {
        replies: Mutex<VecDeque<Result<String, BackendError>>>,
        calls: AtomicU64,
    }

    impl Scripted {
        fn new(replies: Vec<Result<String, BackendError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                calls: AtomicU64::new(0),
            })
        }
    }

    #[async_trait]
    impl CompletionBackend for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, _prompt: &Prompt) -> Result<String, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.replies
                .lock()
                .pop_front()
                .unwrap_or(Err(BackendError::Empty))
        }
    }

    struct Hanging;

    #[async_trait]
    impl CompletionBackend for Hanging {
        fn name(&self) -> &str {
            "hanging"
        }

        async fn complete(&self, _prompt: &Prompt) -> Result<String, BackendError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(String::new())
        }
    }

    fn client(backend: Arc<dyn CompletionBackend>, retries: u32) -> GenerationClient {
        GenerationClient::new(
            backend,
            RetryPolicy::new(retries, Duration::ZERO),
            Duration::from_secs(5),
        )
    }

    fn accept(text: &str) -> Result<String, String> {
        Ok(text.to_string())
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::new(5, Duration::from_millis(2000));
        assert_eq!(policy.backoff(1), Duration::from_millis(2000));
        assert_eq!(policy.backoff(2), Duration::from_millis(4000));
        assert_eq!(policy.backoff(3), Duration::from_millis(8000));
        assert_eq!(policy.backoff(10), MAX_BACKOFF);
    }

    #[tokio::test]
    async fn test_retries_after_transient_error() {
        let backend = Scripted::new(vec![Err(BackendError::RateLimited), Ok("done".into())]);
        let client = client(backend.clone(), 1);

        let out = client
            .generate("t", &Prompt::new("s", "u"), &CancellationToken::new(), accept)
            .await
            .unwrap();
        assert_eq!(out, "done");
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
        assert!(!client.stats().unreachable());
    }

    #[tokio::test]
    async fn test_rejected_output_is_retried_then_reported() {
        let backend = Scripted::new(vec![Ok("bad".into()), Ok("still bad".into())]);
        let client = client(backend.clone(), 1);

        let err = client
            .generate::<String, _>("t", &Prompt::new("s", "u"), &CancellationToken::new(), |_| {
                Err("nope".to_string())
            })
            .await
            .unwrap_err();
        match err {
            GenerationError::Rejected { attempts, output, .. } => {
                assert_eq!(attempts, 2);
                assert_eq!(output, "still bad");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unauthorized_is_not_retried() {
        let backend = Scripted::new(vec![Err(BackendError::Unauthorized), Ok("x".into())]);
        let client = client(backend.clone(), 3);

        let err = client
            .generate("t", &Prompt::new("s", "u"), &CancellationToken::new(), accept)
            .await
            .unwrap_err();
        assert!(err.is_transport());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
        assert!(client.stats().unreachable());
    }

    #[tokio::test]
    async fn test_call_deadline_is_timeout() {
        let client = GenerationClient::new(
            Arc::new(Hanging),
            RetryPolicy::none(),
            Duration::from_millis(50),
        );
        let err = client
            .generate("t", &Prompt::new("s", "u"), &CancellationToken::new(), accept)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GenerationError::Backend {
                source: BackendError::Timeout,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_call() {
        let client = client(Arc::new(Hanging), 0);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = client
            .generate("t", &Prompt::new("s", "u"), &cancel, accept)
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::Cancelled));
    }
}
