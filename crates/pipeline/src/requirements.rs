//! Requirement extraction from product documents
//!
//! A PRD goes to the backend once; the ordered list that comes back is
//! handed to test-case synthesis as coverage targets.

use once_cell::sync::Lazy;
use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::client::GenerationClient;
use crate::error::GenerationError;
use crate::prompts::requirements_prompt;
use crate::text::extract_code_block;

static LIST_ITEM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:\d+[.)]|[-*•])\s+(.+?)\s*$").expect("valid regex"));

/// Requirements from a numbered or bulleted list, in order
pub fn parse_requirements(text: &str) -> Result<Vec<String>, String> {
    let body = extract_code_block(text);
    let requirements: Vec<String> = body
        .lines()
        .filter_map(|line| LIST_ITEM.captures(line))
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().replace("**", "").trim().to_string())
        .filter(|r| !r.is_empty())
        .collect();
    if requirements.is_empty() {
        return Err("no list of requirements in the response".into());
    }
    Ok(requirements)
}

/// Turns a requirements document into test requirements
pub struct RequirementExtractor {
    client: GenerationClient,
}

impl RequirementExtractor {
    pub fn new(client: GenerationClient) -> Self {
        Self { client }
    }

    pub async fn extract(
        &self,
        document: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, GenerationError> {
        if document.trim().is_empty() {
            return Err(GenerationError::EmptyDocument);
        }
        let prompt = requirements_prompt(document);
        let requirements = self
            .client
            .generate("requirements", &prompt, cancel, parse_requirements)
            .await?;
        info!("Extracted {} requirement(s)", requirements.len());
        Ok(requirements)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{CompletionBackend, Prompt};
    use crate::client::RetryPolicy;
    use crate::error::BackendError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_parses_numbered_and_bulleted_lists() {
        let text = "Here are the requirements:\n\n1. Users can sign in with a username and password\n2) Wrong passwords show an error\n- Sessions expire after logout\n* **Admins** can reset passwords\n\nLet me know if you need more.";
        assert_eq!(
            parse_requirements(text).unwrap(),
            vec![
                "Users can sign in with a username and password",
                "Wrong passwords show an error",
                "Sessions expire after logout",
                "Admins can reset passwords",
            ]
        );
    }

    #[test]
    fn test_prose_is_rejected() {
        assert!(parse_requirements("The document does not describe any behaviour.").is_err());
    }

    struct Counting {
        reply: &'static str,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CompletionBackend for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        async fn complete(&self, prompt: &Prompt) -> Result<String, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert!(prompt.user.contains("Login page"));
            Ok(self.reply.to_string())
        }
    }

    fn extractor(backend: Arc<Counting>) -> RequirementExtractor {
        RequirementExtractor::new(GenerationClient::new(
            backend,
            RetryPolicy::none(),
            Duration::from_secs(5),
        ))
    }

    #[tokio::test]
    async fn test_extract_through_backend() {
        let backend = Arc::new(Counting {
            reply: "1. Sign in works\n2. Sign out works",
            calls: AtomicUsize::new(0),
        });
        let requirements = extractor(backend.clone())
            .extract("# Login page\nUsers sign in and out.", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(requirements, vec!["Sign in works", "Sign out works"]);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_document_skips_backend() {
        let backend = Arc::new(Counting {
            reply: "1. unused",
            calls: AtomicUsize::new(0),
        });
        let err = extractor(backend.clone())
            .extract("  \n", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::EmptyDocument));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }
}
