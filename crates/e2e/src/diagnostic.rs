//! Diagnostic extraction from runner output
//!
//! The harness prints one JSON line `{success, error, stack}`, optionally
//! prefixed by [`RESULT_MARKER`]. When no such line exists (the script
//! crashed before the harness could report) the stderr tail is used.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::path::PathBuf;
use uiheal_common::Diagnostic;

/// Prefix written by the preload harness in front of its JSON report
pub const RESULT_MARKER: &str = "UIHEAL_RESULT ";

const STDERR_TAIL_LINES: usize = 30;

static SELECTOR_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r#"(?i)element not found:\s*["'`]?([^\s"'`]+)"#,
        r#"waiting for selector\s+["']([^"']+)["']"#,
        r#"waiting for locator\(\s*["']([^"']+)["']\s*\)"#,
        r#"locator\(\s*'([^']+)'\s*\)"#,
        r#"locator\(\s*"([^"]+)"\s*\)"#,
        r#"page\.(?:click|fill|type|hover|check|uncheck|selectOption|press|waitForSelector)\(\s*['"]([^'"]+)['"]"#,
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid regex"))
    .collect()
});

static ERROR_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(error|timeout|exceeded|failed|not found|expect)").expect("valid regex")
});

/// Report printed by the harness
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HarnessReport {
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub stack: Option<String>,
    #[serde(default)]
    pub selector: Option<String>,
    #[serde(default)]
    pub screenshot: Option<PathBuf>,
}

/// Last harness report found in the output, stderr first
pub fn harness_report(stdout: &str, stderr: &str) -> Option<HarnessReport> {
    for stream in [stderr, stdout] {
        for line in stream.lines().rev() {
            let line = line.trim();
            let body = line.strip_prefix(RESULT_MARKER.trim_end()).unwrap_or(line).trim();
            if !body.starts_with('{') || !body.contains("\"success\"") {
                continue;
            }
            if let Ok(report) = serde_json::from_str::<HarnessReport>(body) {
                return Some(report);
            }
        }
    }
    None
}

/// First selector mentioned by a Playwright error text
pub fn extract_selector(text: &str) -> Option<String> {
    SELECTOR_PATTERNS.iter().find_map(|re| {
        re.captures(text)
            .and_then(|c| c.get(1))
            .map(|m| {
                m.as_str()
                    .trim_end_matches(|c: char| matches!(c, '.' | ',' | ';' | ':'))
                    .to_string()
            })
            .filter(|s| !s.is_empty())
    })
}

fn stderr_tail(stderr: &str) -> Vec<&str> {
    let lines: Vec<&str> = stderr.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].to_vec()
}

/// Build the diagnostic for a run that did not pass
pub fn build_diagnostic(stdout: &str, stderr: &str, exit_code: Option<i32>) -> Diagnostic {
    let mut diagnostic = match harness_report(stdout, stderr) {
        Some(report) if !report.success => {
            let mut d = Diagnostic::new(
                report
                    .error
                    .unwrap_or_else(|| "script reported failure without a message".to_string()),
            );
            d.stack = report.stack;
            d.selector = report.selector;
            d.screenshot = report.screenshot;
            d
        }
        _ => {
            let tail = stderr_tail(stderr);
            let message = tail
                .iter()
                .find(|l| ERROR_LINE.is_match(l))
                .or_else(|| tail.last())
                .map(|l| l.trim().to_string())
                .unwrap_or_else(|| match exit_code {
                    Some(code) => format!("process exited with status {}", code),
                    None => "process terminated by signal".to_string(),
                });
            let mut d = Diagnostic::new(message);
            if !tail.is_empty() {
                d.stack = Some(tail.join("\n"));
            }
            d
        }
    };

    if diagnostic.selector.is_none() {
        let haystack = match &diagnostic.stack {
            Some(stack) => format!("{}\n{}", diagnostic.message, stack),
            None => diagnostic.message.clone(),
        };
        diagnostic.selector = extract_selector(&haystack);
    }
    diagnostic
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("element not found: #submit" => Some("#submit".to_string()); "explicit not found")]
    #[test_case("Error: element not found: '#login-btn'." => Some("#login-btn".to_string()); "quoted with period")]
    #[test_case("waiting for selector \"button.primary\" to be visible" => Some("button.primary".to_string()); "legacy wait")]
    #[test_case("page.click: Timeout 30000ms exceeded.\nCall log:\n  - waiting for locator('#submit')" => Some("#submit".to_string()); "call log")]
    #[test_case("await page.fill(\"input[name=q]\", 'x')" => Some("input[name=q]".to_string()); "page call")]
    #[test_case("net::ERR_CONNECTION_REFUSED at http://localhost:3000" => None; "no selector")]
    fn test_extract_selector(text: &str) -> Option<String> {
        extract_selector(text)
    }

    #[test]
    fn test_harness_json_line() {
        let stderr = format!(
            "some noise\n{}{{\"success\":false,\"error\":\"element not found: #submit\",\"stack\":\"at main.js:4\"}}\n",
            RESULT_MARKER
        );
        let d = build_diagnostic("", &stderr, Some(1));
        assert_eq!(d.message, "element not found: #submit");
        assert_eq!(d.stack.as_deref(), Some("at main.js:4"));
        assert_eq!(d.selector.as_deref(), Some("#submit"));
    }

    #[test]
    fn test_unmarked_json_line_from_scaffold_footer() {
        let stderr = r#"{"success":false,"error":"expect(received).toHaveText(expected)","stack":null}"#;
        let report = harness_report("", stderr).unwrap();
        assert!(!report.success);
    }

    #[test]
    fn test_stderr_fallback() {
        let stderr = "node:internal/modules/cjs/loader:1080\n  throw err;\n\nError: Cannot find module 'playwright'\n";
        let d = build_diagnostic("", stderr, Some(1));
        assert_eq!(d.message, "Error: Cannot find module 'playwright'");
        assert!(d.stack.unwrap().contains("loader"));
    }

    #[test]
    fn test_empty_output_mentions_exit_code() {
        let d = build_diagnostic("", "", Some(3));
        assert_eq!(d.message, "process exited with status 3");
        assert!(d.selector.is_none());
    }
}
