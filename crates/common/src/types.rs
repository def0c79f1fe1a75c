//! Core types for uiheal
//!
//! Snapshots, test-case specs, scripts, run results and heal attempts.
//! Records are created once and never edited in place; a heal produces a
//! new [`Script`] that points back at its parent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::PathBuf;
use uuid::Uuid;

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Lowercase, dash-separated identifier fragment safe for file names.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut last_dash = true;
    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
        if slug.len() >= 40 {
            break;
        }
    }
    let slug = slug.trim_matches('-').to_string();
    if slug.is_empty() {
        "case".to_string()
    } else {
        slug
    }
}

/// SHA-256 of a script source, hex encoded
pub fn source_digest(source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hex::encode(hasher.finalize())
}

// ============================================================================
// Snapshot
// ============================================================================

/// One visible element captured from the page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementInfo {
    pub selector: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl ElementInfo {
    pub fn new(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            role: None,
            text: String::new(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn tag(&self) -> Option<&str> {
        self.attributes.get("tag").map(String::as_str)
    }
}

/// Immutable record of a captured page state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
    pub captured_at: DateTime<Utc>,
    pub source_url: String,
    pub element_index: Vec<ElementInfo>,
}

impl Snapshot {
    pub fn new(source_url: impl Into<String>, element_index: Vec<ElementInfo>) -> Self {
        Self {
            id: new_id(),
            captured_at: Utc::now(),
            source_url: source_url.into(),
            element_index,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.element_index.is_empty()
    }

    pub fn selectors(&self) -> impl Iterator<Item = &str> {
        self.element_index.iter().map(|e| e.selector.as_str())
    }

    pub fn contains_selector(&self, selector: &str) -> bool {
        self.element_index.iter().any(|e| e.selector == selector)
    }

    pub fn element(&self, selector: &str) -> Option<&ElementInfo> {
        self.element_index.iter().find(|e| e.selector == selector)
    }
}

// ============================================================================
// Test case specs
// ============================================================================

/// Action performed by a test step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepAction {
    Navigate,
    Click,
    Fill,
    Type,
    Press,
    Select,
    Check,
    Uncheck,
    Hover,
    Wait,
    Assert,
}

impl StepAction {
    /// Whether the step cannot run without a target element.
    pub fn requires_element(&self) -> bool {
        !matches!(self, StepAction::Navigate | StepAction::Wait | StepAction::Press)
    }
}

impl std::fmt::Display for StepAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StepAction::Navigate => "navigate",
            StepAction::Click => "click",
            StepAction::Fill => "fill",
            StepAction::Type => "type",
            StepAction::Press => "press",
            StepAction::Select => "select",
            StepAction::Check => "check",
            StepAction::Uncheck => "uncheck",
            StepAction::Hover => "hover",
            StepAction::Wait => "wait",
            StepAction::Assert => "assert",
        };
        f.write_str(name)
    }
}

/// A single step in a test case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestStep {
    pub action: StepAction,
    #[serde(default)]
    pub target_selector: Option<String>,
    /// Input text, URL or key, depending on the action
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub expected_outcome: String,
}

/// Structured test intent derived from a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCaseSpec {
    pub id: String,
    /// Weak reference; the snapshot may be pruned independently
    pub snapshot_id: String,
    pub title: String,
    #[serde(default)]
    pub target_url: String,
    pub steps: Vec<TestStep>,
}

impl TestCaseSpec {
    pub fn new(snapshot: &Snapshot, title: impl Into<String>, steps: Vec<TestStep>) -> Self {
        let title = title.into();
        let suffix = Uuid::new_v4().simple().to_string();
        Self {
            id: format!("{}-{}", slugify(&title), &suffix[..8]),
            snapshot_id: snapshot.id.clone(),
            title,
            target_url: snapshot.source_url.clone(),
            steps,
        }
    }

    /// Selectors referenced by the steps, in order of first use
    pub fn selectors(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for sel in self.steps.iter().filter_map(|s| s.target_selector.as_deref()) {
            if !seen.contains(&sel) {
                seen.push(sel);
            }
        }
        seen
    }
}

// ============================================================================
// Scripts
// ============================================================================

/// Lifecycle status of a script
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptStatus {
    Generated,
    Passed,
    Failed,
    Healed,
    Abandoned,
}

impl ScriptStatus {
    pub fn can_transition_to(&self, next: ScriptStatus) -> bool {
        use ScriptStatus::*;
        matches!(
            (self, next),
            (Generated, Passed)
                | (Generated, Failed)
                | (Generated, Abandoned)
                // a rerun without code change keeps the same script
                | (Failed, Passed)
                | (Failed, Failed)
                | (Failed, Healed)
                | (Failed, Abandoned)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ScriptStatus::Passed | ScriptStatus::Healed | ScriptStatus::Abandoned)
    }
}

impl Default for ScriptStatus {
    fn default() -> Self {
        Self::Generated
    }
}

impl std::fmt::Display for ScriptStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScriptStatus::Generated => write!(f, "generated"),
            ScriptStatus::Passed => write!(f, "passed"),
            ScriptStatus::Failed => write!(f, "failed"),
            ScriptStatus::Healed => write!(f, "healed"),
            ScriptStatus::Abandoned => write!(f, "abandoned"),
        }
    }
}

/// One generation of an automation script
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Script {
    pub id: String,
    pub testcase_id: String,
    /// 0 for the original, N for the Nth heal
    pub generation: u32,
    pub parent_id: Option<String>,
    pub source_text: String,
    pub digest: String,
    #[serde(default)]
    pub status: ScriptStatus,
    #[serde(default)]
    pub path: Option<PathBuf>,
    pub created_at: DateTime<Utc>,
}

impl Script {
    /// Generation-0 script for a test case
    pub fn original(testcase_id: impl Into<String>, source_text: impl Into<String>) -> Self {
        let source_text = source_text.into();
        Self {
            id: new_id(),
            testcase_id: testcase_id.into(),
            generation: 0,
            parent_id: None,
            digest: source_digest(&source_text),
            source_text,
            status: ScriptStatus::Generated,
            path: None,
            created_at: Utc::now(),
        }
    }

    /// Next generation in this lineage, carrying a back-reference to `self`
    pub fn derive_healed(&self, source_text: impl Into<String>) -> Self {
        let source_text = source_text.into();
        Self {
            id: new_id(),
            testcase_id: self.testcase_id.clone(),
            generation: self.generation + 1,
            parent_id: Some(self.id.clone()),
            digest: source_digest(&source_text),
            source_text,
            status: ScriptStatus::Generated,
            path: None,
            created_at: Utc::now(),
        }
    }

    /// True when `candidate` is byte-identical to this script's source
    pub fn is_identical_to(&self, candidate: &str) -> bool {
        self.source_text.as_bytes() == candidate.as_bytes()
    }
}

// ============================================================================
// Run results
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Pass,
    Fail,
    Error,
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunOutcome::Pass => write!(f, "pass"),
            RunOutcome::Fail => write!(f, "fail"),
            RunOutcome::Error => write!(f, "error"),
        }
    }
}

/// Diagnostic payload of a non-passing run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub message: String,
    #[serde(default)]
    pub stack: Option<String>,
    /// Failing selector, when the runner reported one
    #[serde(default)]
    pub selector: Option<String>,
    #[serde(default)]
    pub screenshot: Option<PathBuf>,
    #[serde(default)]
    pub timed_out: bool,
}

impl Diagnostic {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    /// Single string carrying message, selector and stack
    pub fn render(&self) -> String {
        let mut out = self.message.clone();
        if let Some(sel) = &self.selector {
            out.push_str(&format!("\nselector: {}", sel));
        }
        if self.timed_out {
            out.push_str("\ntimed_out: true");
        }
        if let Some(stack) = &self.stack {
            out.push('\n');
            out.push_str(stack);
        }
        out
    }
}

/// Outcome of one execution attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub id: String,
    pub script_id: String,
    pub outcome: RunOutcome,
    #[serde(default)]
    pub diagnostic: Option<Diagnostic>,
    pub duration_ms: u64,
    pub started_at: DateTime<Utc>,
}

impl RunResult {
    pub fn pass(script_id: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            id: new_id(),
            script_id: script_id.into(),
            outcome: RunOutcome::Pass,
            diagnostic: None,
            duration_ms,
            started_at: Utc::now(),
        }
    }

    pub fn failed(
        script_id: impl Into<String>,
        outcome: RunOutcome,
        diagnostic: Diagnostic,
        duration_ms: u64,
    ) -> Self {
        Self {
            id: new_id(),
            script_id: script_id.into(),
            outcome,
            diagnostic: Some(diagnostic),
            duration_ms,
            started_at: Utc::now(),
        }
    }

    pub fn passed(&self) -> bool {
        self.outcome == RunOutcome::Pass
    }
}

// ============================================================================
// Failure classification
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    SelectorNotFound,
    Timeout,
    AssertionMismatch,
    NetworkError,
    Unknown,
}

impl std::fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureCategory::SelectorNotFound => write!(f, "selector_not_found"),
            FailureCategory::Timeout => write!(f, "timeout"),
            FailureCategory::AssertionMismatch => write!(f, "assertion_mismatch"),
            FailureCategory::NetworkError => write!(f, "network_error"),
            FailureCategory::Unknown => write!(f, "unknown"),
        }
    }
}

/// Actionable reason a run did not pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureClass {
    pub category: FailureCategory,
    pub confidence: f32,
    pub suggested_fix_hint: String,
    #[serde(default)]
    pub selector: Option<String>,
}

// ============================================================================
// Heal attempts
// ============================================================================

/// How a failed script is repaired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealStrategy {
    /// Ask the backend for a corrected script
    Regenerate,
    /// Run the same script again; no code defect implied
    Rerun,
}

/// What came of a heal attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealDisposition {
    /// A new generation was produced and persisted
    Applied,
    /// The script is scheduled to run again unchanged
    Rerun,
    /// The backend returned the parent source byte-for-byte
    NoOp,
    /// The backend failed or returned unusable output
    Unavailable,
    /// The heal budget was already spent
    BudgetExhausted,
}

impl HealDisposition {
    pub fn is_accepted(&self) -> bool {
        matches!(self, HealDisposition::Applied | HealDisposition::Rerun)
    }

    /// Budget-exhaustion markers are bookkeeping, not attempts.
    pub fn counts_against_budget(&self) -> bool {
        !matches!(self, HealDisposition::BudgetExhausted)
    }
}

impl std::fmt::Display for HealDisposition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealDisposition::Applied => write!(f, "applied"),
            HealDisposition::Rerun => write!(f, "rerun"),
            HealDisposition::NoOp => write!(f, "no-op"),
            HealDisposition::Unavailable => write!(f, "unavailable"),
            HealDisposition::BudgetExhausted => write!(f, "budget-exhausted"),
        }
    }
}

/// Audit record linking a failure to its repair outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealAttempt {
    pub id: String,
    pub original_script_id: String,
    pub failure_class: FailureClass,
    pub strategy: HealStrategy,
    pub healed_script_id: Option<String>,
    pub accepted: bool,
    pub disposition: HealDisposition,
    #[serde(default)]
    pub detail: Option<String>,
    pub attempted_at: DateTime<Utc>,
}

impl HealAttempt {
    pub fn new(
        original: &Script,
        failure_class: FailureClass,
        strategy: HealStrategy,
        disposition: HealDisposition,
    ) -> Self {
        Self {
            id: new_id(),
            original_script_id: original.id.clone(),
            failure_class,
            strategy,
            healed_script_id: None,
            accepted: disposition.is_accepted(),
            disposition,
            detail: None,
            attempted_at: Utc::now(),
        }
    }

    pub fn with_healed(mut self, healed: &Script) -> Self {
        self.healed_script_id = Some(healed.id.clone());
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Login with valid credentials!"), "login-with-valid-credentials");
        assert_eq!(slugify("  --  "), "case");
        assert!(slugify(&"x".repeat(100)).len() <= 40);
    }

    #[test]
    fn test_derive_healed_links_parent() {
        let original = Script::original("tc-1", "await page.click('#a');");
        let healed = original.derive_healed("await page.click('#b');");

        assert_eq!(healed.generation, 1);
        assert_eq!(healed.parent_id.as_deref(), Some(original.id.as_str()));
        assert_eq!(healed.testcase_id, "tc-1");
        assert_ne!(healed.digest, original.digest);
    }

    #[test]
    fn test_identical_source_detection() {
        let script = Script::original("tc-1", "a\nb");
        assert!(script.is_identical_to("a\nb"));
        assert!(!script.is_identical_to("a\nb\n"));
    }

    #[test]
    fn test_passed_script_never_heals() {
        assert!(!ScriptStatus::Passed.can_transition_to(ScriptStatus::Healed));
        assert!(ScriptStatus::Failed.can_transition_to(ScriptStatus::Healed));
        assert!(ScriptStatus::Passed.is_terminal());
    }

    #[test]
    fn test_step_action_serde() {
        let step: TestStep = serde_json::from_str(
            r##"{"action":"click","target_selector":"#submit","expected_outcome":"form submits"}"##,
        )
        .unwrap();
        assert_eq!(step.action, StepAction::Click);
        assert!(step.action.requires_element());
        assert!(!StepAction::Navigate.requires_element());
    }

    #[test]
    fn test_budget_accounting() {
        assert!(HealDisposition::NoOp.counts_against_budget());
        assert!(!HealDisposition::BudgetExhausted.counts_against_budget());
        assert!(!HealDisposition::NoOp.is_accepted());
        assert!(HealDisposition::Rerun.is_accepted());
    }
}
