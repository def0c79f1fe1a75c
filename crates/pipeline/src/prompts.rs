//! Prompt construction
//!
//! Prompts are plain data; nothing here talks to the backend.

use std::fmt::Write as _;
use uiheal_common::{Diagnostic, FailureClass, Script, Snapshot, TestCaseSpec};

use crate::backend::Prompt;

/// Everything the backend needs to repair a failing script
#[derive(Debug, Clone)]
pub struct RepairRequest {
    pub testcase: TestCaseSpec,
    pub script: Script,
    pub diagnostic: Diagnostic,
    pub failure: FailureClass,
    /// Ranked alternatives from the snapshot, best first
    pub candidate_selectors: Vec<String>,
}

const TESTCASE_SYSTEM: &str = "You are a senior QA engineer. You design functional UI test cases \
from a description of the interactive elements on a web page. You only ever reference selectors \
that appear in the element inventory you are given.";

const REQUIREMENTS_SYSTEM: &str = "You are a senior QA engineer. You read product requirement \
documents and list the behaviours that need functional UI tests.";

const SCRIPT_SYSTEM: &str = "You are an experienced test automation engineer who writes \
end-to-end tests with the Playwright library for Node.js. You produce complete scripts that run \
as-is with `node script.js`.";

const REPAIR_SYSTEM: &str = "You are an experienced test automation engineer. You fix failing \
Playwright scripts for Node.js using the failure diagnostic and the current page inventory. You \
change as little as needed and return the whole corrected script.";

/// One line per element: selector, role, visible text and attributes
pub fn element_inventory(snapshot: &Snapshot) -> String {
    let mut out = String::new();
    for element in &snapshot.element_index {
        let _ = write!(out, "- `{}`", element.selector);
        if let Some(role) = &element.role {
            let _ = write!(out, " role={}", role);
        }
        let text = element.text.trim();
        if !text.is_empty() {
            let short: String = text.chars().take(60).collect();
            let _ = write!(out, " text=\"{}\"", short);
        }
        for (name, value) in &element.attributes {
            if name == "tag" {
                continue;
            }
            let _ = write!(out, " {}=\"{}\"", name, value);
        }
        out.push('\n');
    }
    out
}

fn render_steps(spec: &TestCaseSpec) -> String {
    let mut out = String::new();
    for (i, step) in spec.steps.iter().enumerate() {
        let _ = write!(out, "{}. {}", i + 1, step.action);
        if let Some(sel) = &step.target_selector {
            let _ = write!(out, " `{}`", sel);
        }
        if let Some(value) = &step.value {
            let _ = write!(out, " value=\"{}\"", value);
        }
        if !step.expected_outcome.is_empty() {
            let _ = write!(out, " -> expect: {}", step.expected_outcome);
        }
        out.push('\n');
    }
    out
}

/// Ask for the testable requirements in a product document
pub fn requirements_prompt(document: &str) -> Prompt {
    let user = format!(
        "Extract every testable requirement from the product requirements document below.\n\
         Respond with an ordered list, one requirement per line, formatted as `1. ...`.\n\
         Leave out anything that cannot be checked through the user interface.\n\n\
         Document:\n```\n{document}\n```",
        document = document.trim(),
    );
    Prompt::new(REQUIREMENTS_SYSTEM, user)
}

fn render_requirements(requirements: &[String]) -> String {
    if requirements.is_empty() {
        return String::new();
    }
    let mut out = String::from("Requirements to cover where this page supports them:\n");
    for (i, requirement) in requirements.iter().enumerate() {
        let _ = writeln!(out, "{}. {}", i + 1, requirement);
    }
    out.push('\n');
    out
}

/// Ask for test cases covering the page's functionality
pub fn testcase_prompt(snapshot: &Snapshot, requirements: &[String]) -> Prompt {
    let user = format!(
        "Analyze the page below and design functional test cases for it.\n\n\
         Page URL: {url}\n\
         Interactive elements:\n{inventory}\n\
         {requirements}\
         Respond with a single ```yaml block holding a list. Each item has:\n\
         - title: short name of the scenario\n\
         - steps: list of {{action, target_selector, value, expected_outcome}}\n\n\
         Allowed actions: navigate, click, fill, type, press, select, check, uncheck, hover, wait, assert.\n\
         Every target_selector must be copied exactly from the inventory above.\n\
         navigate, wait and press may omit target_selector; navigate puts the URL in value.",
        url = snapshot.source_url,
        inventory = element_inventory(snapshot),
        requirements = render_requirements(requirements),
    );
    Prompt::new(TESTCASE_SYSTEM, user)
}

/// Ask for a runnable script implementing `spec`, starting from `scaffold`
pub fn script_prompt(spec: &TestCaseSpec, snapshot: Option<&Snapshot>, scaffold: &str) -> Prompt {
    let inventory = snapshot
        .map(element_inventory)
        .unwrap_or_else(|| "(snapshot unavailable)\n".to_string());
    let user = format!(
        "Write a Playwright script for this test case.\n\n\
         Test case: {title}\n\
         Target URL: {url}\n\
         Steps:\n{steps}\n\
         Page elements:\n{inventory}\n\
         Start from this skeleton and keep its structure:\n```javascript\n{scaffold}\n```\n\n\
         Rules:\n\
         1. CommonJS: require('playwright') and require('@playwright/test') for expect.\n\
         2. Only use selectors from the page elements list.\n\
         3. Click every input field before filling or typing into it.\n\
         4. Wait for elements and navigation with explicit timeouts.\n\
         5. On success print one JSON line {{\"success\": true}}; on failure print \
         {{\"success\": false, \"error\": ..., \"stack\": ...}} and exit with status 1.\n\
         6. Return only the code, in one ```javascript block.",
        title = spec.title,
        url = spec.target_url,
        steps = render_steps(spec),
        inventory = inventory,
        scaffold = scaffold.trim_end(),
    );
    Prompt::new(SCRIPT_SYSTEM, user)
}

/// Ask for a corrected version of a failing script
pub fn repair_prompt(request: &RepairRequest) -> Prompt {
    let mut user = format!(
        "This Playwright script failed.\n\n\
         Test case: {title}\n\
         Steps:\n{steps}\n\
         Script (generation {generation}):\n```javascript\n{source}\n```\n\n\
         Failure category: {category} (confidence {confidence:.2})\n\
         Hint: {hint}\n\
         Diagnostic:\n```\n{diagnostic}\n```\n",
        title = request.testcase.title,
        steps = render_steps(&request.testcase),
        generation = request.script.generation,
        source = request.script.source_text.trim_end(),
        category = request.failure.category,
        confidence = request.failure.confidence,
        hint = request.failure.suggested_fix_hint,
        diagnostic = request.diagnostic.render(),
    );

    if !request.candidate_selectors.is_empty() {
        user.push_str("\nSelectors that exist on the page now, most likely replacement first:\n");
        for sel in &request.candidate_selectors {
            let _ = writeln!(user, "- `{}`", sel);
        }
    }

    user.push_str(
        "\nFix the script:\n\
         - If an element cannot be found, switch to one of the listed selectors or a more \
         precise locator (.first(), .nth(i), chained locators).\n\
         - If an element is not visible or editable yet, wait for it before interacting.\n\
         - If an input is readonly, set its value with page.evaluate instead of fill.\n\
         - Keep the imports and the JSON result line.\n\
         Return the complete corrected script in one ```javascript block and nothing else.",
    );
    Prompt::new(REPAIR_SYSTEM, user)
}
