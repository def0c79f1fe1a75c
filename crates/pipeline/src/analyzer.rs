//! Failure classification
//!
//! Maps a run diagnostic to a [`FailureClass`] with an ordered rule table.
//! The first matching rule wins, in this order: SelectorNotFound, Timeout,
//! AssertionMismatch, NetworkError. A missing element mentioned next to a
//! connection error is still a selector problem, and a timed-out
//! `expect(...)` is a timeout rather than a mismatch.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;
use uiheal_common::{FailureCategory, FailureClass, RunResult};
use uiheal_e2e::diagnostic::extract_selector;

struct Rule {
    category: FailureCategory,
    confidence: f32,
    pattern: Regex,
}

static RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    [
        (
            FailureCategory::SelectorNotFound,
            0.9,
            r"(?i)(not found|no (such )?element|resolved to 0 elements|unable to (find|locate)|did not match any|strict mode violation)",
        ),
        (
            FailureCategory::Timeout,
            0.75,
            r"(?i)(timeout \d+\s*ms exceeded|timed out|TimeoutError|exceeded while waiting)",
        ),
        (
            FailureCategory::AssertionMismatch,
            0.8,
            r"(?i)(expect\(.*\)\.|AssertionError|expected .*(received|but got|to (be|equal|contain|have))|to(Have|Contain)Text|toBe(Visible|Hidden|Checked)|toHave(URL|Title|Value))",
        ),
        (
            FailureCategory::NetworkError,
            0.85,
            r"(?i)(net::ERR_|ECONNREFUSED|ECONNRESET|ENOTFOUND|EAI_AGAIN|getaddrinfo|socket hang up|connection refused|NS_ERROR_)",
        ),
    ]
    .into_iter()
    .map(|(category, confidence, pattern)| Rule {
        category,
        confidence,
        pattern: Regex::new(pattern).expect("valid regex"),
    })
    .collect()
});

/// Confidence when the engine itself killed the run
const DEADLINE_CONFIDENCE: f32 = 0.95;
const UNKNOWN_CONFIDENCE: f32 = 0.2;

fn fix_hint(category: FailureCategory, selector: Option<&str>) -> String {
    match (category, selector) {
        (FailureCategory::SelectorNotFound, Some(sel)) => format!(
            "Selector {} no longer matches; replace it with the closest element in the current snapshot",
            sel
        ),
        (FailureCategory::SelectorNotFound, None) => {
            "A locator matched no element; use a selector from the current snapshot".into()
        }
        (FailureCategory::Timeout, _) => {
            "The run did not finish in time; rerun, and add explicit waits if it recurs".into()
        }
        (FailureCategory::AssertionMismatch, _) => {
            "An assertion did not hold; check the expected text or state against the page".into()
        }
        (FailureCategory::NetworkError, _) => {
            "The application was unreachable; rerun once it responds".into()
        }
        (FailureCategory::Unknown, _) => {
            "Unrecognized failure; regenerate the script from the diagnostic".into()
        }
    }
}

/// Stateless classifier; the same input always yields the same class
#[derive(Debug, Default, Clone, Copy)]
pub struct FailureAnalyzer;

impl FailureAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// `None` for a passing run
    pub fn classify(&self, run: &RunResult) -> Option<FailureClass> {
        if run.passed() {
            return None;
        }

        let diagnostic = run.diagnostic.clone().unwrap_or_default();
        let text = match &diagnostic.stack {
            Some(stack) => format!("{}\n{}", diagnostic.message, stack),
            None => diagnostic.message.clone(),
        };

        let (category, confidence) = if diagnostic.timed_out {
            (FailureCategory::Timeout, DEADLINE_CONFIDENCE)
        } else {
            RULES
                .iter()
                .find(|rule| rule.pattern.is_match(&text))
                .map(|rule| (rule.category, rule.confidence))
                .unwrap_or((FailureCategory::Unknown, UNKNOWN_CONFIDENCE))
        };

        let selector = diagnostic.selector.clone().or_else(|| extract_selector(&text));
        debug!(run = %run.id, %category, confidence, "Classified failure");

        Some(FailureClass {
            category,
            confidence,
            suggested_fix_hint: fix_hint(category, selector.as_deref()),
            selector,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;
    use uiheal_common::{Diagnostic, RunOutcome};

    fn failed(message: &str) -> RunResult {
        RunResult::failed("s", RunOutcome::Fail, Diagnostic::new(message), 10)
    }

    #[test_case("Error: element not found: #submit", FailureCategory::SelectorNotFound ; "not found")]
    #[test_case("locator.click: Error: strict mode violation: locator('button') resolved to 2 elements", FailureCategory::SelectorNotFound ; "strict mode")]
    #[test_case("page.goto: net::ERR_CONNECTION_REFUSED at http://localhost:3000", FailureCategory::NetworkError ; "connection refused")]
    #[test_case("Error: expect(locator).toHaveText(expected)\nExpected string: \"Welcome\"\nReceived string: \"Login\"", FailureCategory::AssertionMismatch ; "assertion")]
    #[test_case("page.click: Timeout 30000ms exceeded.\nwaiting for locator('#slow')", FailureCategory::Timeout ; "locator wait timeout")]
    #[test_case("TypeError: Cannot read properties of undefined", FailureCategory::Unknown ; "unknown")]
    #[test_case("element not found: #submit (after page.goto: net::ERR_CONNECTION_RESET)", FailureCategory::SelectorNotFound ; "selector before network")]
    #[test_case("Timed out 5000ms waiting for expect(locator).toHaveText(expected)", FailureCategory::Timeout ; "timeout before assertion")]
    #[test_case("page.goto: Timeout 30000ms exceeded; last error: ECONNREFUSED", FailureCategory::Timeout ; "timeout before network")]
    #[test_case("expect(received).toBe(expected) after net::ERR_ABORTED", FailureCategory::AssertionMismatch ; "assertion before network")]
    #[test_case("waiting for locator('#late'): element not found, timed out", FailureCategory::SelectorNotFound ; "selector before timeout")]
    fn test_classification(message: &str, expected: FailureCategory) {
        let class = FailureAnalyzer::new().classify(&failed(message)).unwrap();
        assert_eq!(class.category, expected);
        assert!(class.confidence > 0.0 && class.confidence <= 1.0);
    }

    #[test]
    fn test_pass_has_no_class() {
        assert!(FailureAnalyzer::new().classify(&RunResult::pass("s", 5)).is_none());
    }

    #[test]
    fn test_engine_deadline_wins() {
        let mut diagnostic = Diagnostic::new("Error: element not found: #late");
        diagnostic.timed_out = true;
        let run = RunResult::failed("s", RunOutcome::Fail, diagnostic, 120_000);

        let class = FailureAnalyzer::new().classify(&run).unwrap();
        assert_eq!(class.category, FailureCategory::Timeout);
        assert_eq!(class.confidence, DEADLINE_CONFIDENCE);
    }

    #[test]
    fn test_selector_taken_from_message() {
        let class = FailureAnalyzer::new()
            .classify(&failed("waiting for locator('#submit') ... element not found"))
            .unwrap();
        assert_eq!(class.selector.as_deref(), Some("#submit"));
        assert!(class.suggested_fix_hint.contains("#submit"));
    }

    #[test]
    fn test_classification_is_idempotent() {
        let analyzer = FailureAnalyzer::new();
        let run = failed("Error: element not found: #submit");
        assert_eq!(analyzer.classify(&run), analyzer.classify(&run));
    }
}
