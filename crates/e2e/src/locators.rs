//! Locators referenced by generated scripts
//!
//! Pulls every `locator(...)`, `getByLabel(...)`, `getByText(...)` and
//! friends out of a script, plus the selector argument of page shorthands
//! such as `page.click('#submit')`, and checks them against a page. The
//! offline check uses a stored [`Snapshot`]; the live check goes through
//! [`crate::SnapshotCollector::check_locators`].

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uiheal_common::{ElementInfo, Snapshot};

/// How a locator addresses the page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocatorKind {
    Css,
    Label,
    Text,
    Placeholder,
    TestId,
}

impl std::fmt::Display for LocatorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LocatorKind::Css => write!(f, "locator"),
            LocatorKind::Label => write!(f, "getByLabel"),
            LocatorKind::Text => write!(f, "getByText"),
            LocatorKind::Placeholder => write!(f, "getByPlaceholder"),
            LocatorKind::TestId => write!(f, "getByTestId"),
        }
    }
}

/// One locator found in a script
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScriptLocator {
    pub kind: LocatorKind,
    pub value: String,
}

impl ScriptLocator {
    pub fn new(kind: LocatorKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }
}

impl std::fmt::Display for ScriptLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.value)
    }
}

/// Result of resolving one locator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LocatorStatus {
    Found { count: usize },
    NotFound,
    Error { reason: String },
}

impl LocatorStatus {
    pub fn from_count(count: usize) -> Self {
        if count == 0 {
            LocatorStatus::NotFound
        } else {
            LocatorStatus::Found { count }
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, LocatorStatus::Found { .. })
    }
}

impl std::fmt::Display for LocatorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LocatorStatus::Found { count } => write!(f, "OK ({})", count),
            LocatorStatus::NotFound => write!(f, "NOT FOUND"),
            LocatorStatus::Error { reason } => write!(f, "ERROR: {}", reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocatorCheck {
    pub locator: ScriptLocator,
    pub status: LocatorStatus,
}

/// Single- or double-quoted literal; group 1 or 2 holds the body
const QUOTED: &str = r#"(?:'((?:[^'\\\n]|\\.)*)'|"((?:[^"\\\n]|\\.)*)")"#;

static PATTERNS: Lazy<Vec<(LocatorKind, Regex)>> = Lazy::new(|| {
    [
        (LocatorKind::Css, r"\.locator\(\s*"),
        (
            LocatorKind::Css,
            r"\bpage\.(?:click|dblclick|fill|type|hover|focus|check|uncheck|selectOption|press|tap|waitForSelector|textContent|innerText|inputValue|isVisible|isChecked)\(\s*",
        ),
        (LocatorKind::Label, r"\.(?:getByLabel|get_by_label)\(\s*"),
        (LocatorKind::Text, r"\.(?:getByText|get_by_text)\(\s*"),
        (LocatorKind::Placeholder, r"\.(?:getByPlaceholder|get_by_placeholder)\(\s*"),
        (LocatorKind::TestId, r"\.(?:getByTestId|get_by_test_id)\(\s*"),
    ]
    .into_iter()
    .map(|(kind, prefix)| (kind, Regex::new(&format!("{}{}", prefix, QUOTED)).expect("valid regex")))
    .collect()
});

fn unescape(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Locators in order of first appearance, without duplicates
pub fn extract_locators(source: &str) -> Vec<ScriptLocator> {
    let mut found: Vec<(usize, ScriptLocator)> = Vec::new();
    for (kind, re) in PATTERNS.iter() {
        for caps in re.captures_iter(source) {
            let Some(body) = caps.get(1).or_else(|| caps.get(2)) else {
                continue;
            };
            let value = unescape(body.as_str());
            if value.trim().is_empty() {
                continue;
            }
            found.push((body.start(), ScriptLocator::new(*kind, value)));
        }
    }
    found.sort_by_key(|(pos, _)| *pos);

    let mut seen = HashSet::new();
    found
        .into_iter()
        .map(|(_, locator)| locator)
        .filter(|locator| seen.insert(locator.clone()))
        .collect()
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

fn attribute<'a>(element: &'a ElementInfo, name: &str) -> Option<&'a str> {
    element.attributes.get(name).map(String::as_str)
}

fn matches_element(locator: &ScriptLocator, element: &ElementInfo) -> bool {
    let value = locator.value.trim();
    match locator.kind {
        LocatorKind::Css => {
            element.selector == value
                || value
                    .strip_prefix('#')
                    .is_some_and(|id| attribute(element, "id") == Some(id))
        }
        LocatorKind::Label => ["aria-label", "label"]
            .iter()
            .filter_map(|name| attribute(element, name))
            .any(|label| contains_ignore_case(label, value)),
        LocatorKind::Text => contains_ignore_case(&element.text, value),
        LocatorKind::Placeholder => {
            attribute(element, "placeholder").is_some_and(|p| contains_ignore_case(p, value))
        }
        LocatorKind::TestId => attribute(element, "data-testid") == Some(value),
    }
}

/// Resolve locators against the visible elements of a stored snapshot
pub fn check_against_snapshot(locators: &[ScriptLocator], snapshot: &Snapshot) -> Vec<LocatorCheck> {
    locators
        .iter()
        .map(|locator| {
            let count = snapshot
                .element_index
                .iter()
                .filter(|element| matches_element(locator, element))
                .count();
            LocatorCheck {
                locator: locator.clone(),
                status: LocatorStatus::from_count(count),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    const SCRIPT: &str = r#"
const { chromium } = require('playwright');
(async () => {
  await page.fill('#username', 'alice');
  await page.locator("input[name=\"password\"]").fill('secret');
  await page.getByLabel('Remember me').check();
  await page.getByText("Sign in").click();
  await page.click('#username');
  await expect(page.getByTestId('welcome')).toBeVisible();
})();
"#;

    #[test]
    fn test_extract_in_source_order() {
        let locators = extract_locators(SCRIPT);
        assert_eq!(
            locators,
            vec![
                ScriptLocator::new(LocatorKind::Css, "#username"),
                ScriptLocator::new(LocatorKind::Css, "input[name=\"password\"]"),
                ScriptLocator::new(LocatorKind::Label, "Remember me"),
                ScriptLocator::new(LocatorKind::Text, "Sign in"),
                ScriptLocator::new(LocatorKind::TestId, "welcome"),
            ]
        );
    }

    #[test_case("page.get_by_label('Email').fill(x)" => Some(LocatorKind::Label); "python style label")]
    #[test_case("page.getByPlaceholder('Search')" => Some(LocatorKind::Placeholder); "placeholder")]
    #[test_case("row.locator('td')" => Some(LocatorKind::Css); "chained locator")]
    #[test_case("page.locator(selector)" => None; "variable argument")]
    #[test_case("page.goto('http://localhost')" => None; "navigation is not a locator")]
    fn test_extract_kind(source: &str) -> Option<LocatorKind> {
        extract_locators(source).first().map(|l| l.kind)
    }

    fn snapshot() -> Snapshot {
        Snapshot::new(
            "http://localhost:3000/login",
            vec![
                ElementInfo::new("#username").with_attribute("id", "username"),
                ElementInfo::new("input[name=\"password\"]").with_attribute("placeholder", "Password"),
                ElementInfo::new("button:has-text(\"Sign in\")").with_text("Sign in"),
                ElementInfo::new("a >> nth=0").with_text("Sign in with SSO"),
                ElementInfo::new("[data-testid=\"remember\"]")
                    .with_attribute("aria-label", "Remember me")
                    .with_attribute("data-testid", "remember"),
            ],
        )
    }

    #[test]
    fn test_offline_check() {
        let checks = check_against_snapshot(&extract_locators(SCRIPT), &snapshot());
        let statuses: Vec<_> = checks.iter().map(|c| c.status.clone()).collect();
        assert_eq!(
            statuses,
            vec![
                LocatorStatus::Found { count: 1 },
                LocatorStatus::Found { count: 1 },
                LocatorStatus::Found { count: 1 },
                LocatorStatus::Found { count: 2 },
                LocatorStatus::NotFound,
            ]
        );
        assert_eq!(checks[4].status.to_string(), "NOT FOUND");
        assert_eq!(checks[0].status.to_string(), "OK (1)");
    }

    #[test]
    fn test_placeholder_and_id_fallback() {
        let snap = snapshot();
        let locators = vec![
            ScriptLocator::new(LocatorKind::Placeholder, "password"),
            ScriptLocator::new(LocatorKind::Css, "#missing"),
        ];
        let checks = check_against_snapshot(&locators, &snap);
        assert!(checks[0].status.is_found());
        assert_eq!(checks[1].status, LocatorStatus::NotFound);
    }
}
