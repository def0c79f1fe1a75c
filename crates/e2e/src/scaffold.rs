//! Deterministic script skeletons
//!
//! Renders a test case as a runnable Node/Playwright script. The skeleton is
//! handed to the code generator as a starting point, and its harness shape
//! (JSON result line, exit code 1 on failure) is what the engine expects.

use uiheal_common::{StepAction, TestCaseSpec, TestStep};

/// Environment variable carrying the application base URL at run time
pub const BASE_URL_ENV: &str = "UIHEAL_BASE_URL";
pub const BROWSER_ENV: &str = "UIHEAL_BROWSER";
pub const HEADLESS_ENV: &str = "UIHEAL_HEADLESS";

const DEFAULT_ACTION_TIMEOUT_MS: u64 = 10_000;

/// Quote a string as a single-quoted JavaScript literal
pub fn js_str(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{2028}' => out.push_str("\\u2028"),
            '\u{2029}' => out.push_str("\\u2029"),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

/// Render the full skeleton for a test case
pub fn render_scaffold(spec: &TestCaseSpec) -> String {
    let mut script = String::new();

    // Header
    script.push_str(&format!(
        r#"// {title}
const {{ chromium, firefox, webkit }} = require('playwright');
const {{ expect }} = require('@playwright/test');

(async () => {{
  const browserType = {{ chromium, firefox, webkit }}[process.env.{browser_env} || 'chromium'];
  const browser = await browserType.launch({{ headless: process.env.{headless_env} !== 'false' }});
  const context = await browser.newContext();
  const page = await context.newPage();
  const baseUrl = process.env.{base_env} || {target};

  try {{
"#,
        title = spec.title.replace('\n', " "),
        browser_env = BROWSER_ENV,
        headless_env = HEADLESS_ENV,
        base_env = BASE_URL_ENV,
        target = js_str(&spec.target_url),
    ));

    if !spec
        .steps
        .first()
        .map(|s| s.action == StepAction::Navigate)
        .unwrap_or(false)
    {
        script.push_str("    await page.goto(baseUrl);\n");
    }

    for (i, step) in spec.steps.iter().enumerate() {
        let note = step.expected_outcome.replace('\n', " ");
        if note.is_empty() {
            script.push_str(&format!("\n    // Step {}: {}\n", i + 1, step.action));
        } else {
            script.push_str(&format!("\n    // Step {}: {} ({})\n", i + 1, step.action, note));
        }
        script.push_str(&step_to_js(step));
        script.push('\n');
    }

    // Footer
    script.push_str(
        r#"
    console.log(JSON.stringify({ success: true }));
  } catch (error) {
    console.error(JSON.stringify({ success: false, error: error.message, stack: error.stack }));
    process.exitCode = 1;
  } finally {
    await browser.close();
  }
})();
"#,
    );

    script
}

/// Convert a step to JavaScript code
fn step_to_js(step: &TestStep) -> String {
    let value = step.value.as_deref().unwrap_or("");
    let selector = match (&step.target_selector, step.action.requires_element()) {
        (Some(sel), _) => Some(js_str(sel)),
        (None, false) => None,
        (None, true) => {
            return format!("    // skipped: {} step has no target selector", step.action);
        }
    };
    // requires_element() guarantees a selector below for element actions
    let sel = selector.clone().unwrap_or_default();

    match step.action {
        StepAction::Navigate => {
            if value.is_empty() {
                "    await page.goto(baseUrl);".to_string()
            } else if value.starts_with("http://") || value.starts_with("https://") {
                format!("    await page.goto({});", js_str(value))
            } else {
                format!(
                    "    await page.goto(new URL({}, baseUrl).toString());",
                    js_str(value)
                )
            }
        }
        StepAction::Click => format!(
            "    await page.click({}, {{ timeout: {} }});",
            sel, DEFAULT_ACTION_TIMEOUT_MS
        ),
        // focus the input first; some forms ignore fill() on unfocused fields
        StepAction::Fill => format!(
            "    await page.click({sel});\n    await page.fill({sel}, {});",
            js_str(value),
            sel = sel
        ),
        StepAction::Type => format!(
            "    await page.type({}, {}, {{ delay: 50 }});",
            sel,
            js_str(value)
        ),
        StepAction::Press => {
            let key = if value.is_empty() { "Enter" } else { value };
            match selector {
                Some(sel) => format!("    await page.locator({}).press({});", sel, js_str(key)),
                None => format!("    await page.keyboard.press({});", js_str(key)),
            }
        }
        StepAction::Select => format!("    await page.selectOption({}, {});", sel, js_str(value)),
        StepAction::Check => format!("    await page.check({});", sel),
        StepAction::Uncheck => format!("    await page.uncheck({});", sel),
        StepAction::Hover => format!("    await page.hover({});", sel),
        StepAction::Wait => match selector {
            Some(sel) => format!(
                "    await page.waitForSelector({}, {{ state: 'visible', timeout: {} }});",
                sel, DEFAULT_ACTION_TIMEOUT_MS
            ),
            None => {
                let ms: u64 = value.trim().parse().unwrap_or(1000);
                format!("    await page.waitForTimeout({});", ms)
            }
        },
        StepAction::Assert => {
            if value.is_empty() {
                format!("    await expect(page.locator({})).toBeVisible();", sel)
            } else {
                format!(
                    "    await expect(page.locator({})).toContainText({});",
                    sel,
                    js_str(value)
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lint::lint;
    use uiheal_common::{ElementInfo, Snapshot};

    fn step(action: StepAction, selector: Option<&str>, value: Option<&str>) -> TestStep {
        TestStep {
            action,
            target_selector: selector.map(String::from),
            value: value.map(String::from),
            expected_outcome: String::new(),
        }
    }

    fn login_spec() -> TestCaseSpec {
        let snapshot = Snapshot::new(
            "http://localhost:3000/login",
            vec![ElementInfo::new("#username"), ElementInfo::new("#submit")],
        );
        TestCaseSpec::new(
            &snapshot,
            "Login",
            vec![
                step(StepAction::Navigate, None, Some("/login")),
                step(StepAction::Fill, Some("#username"), Some("o'brien")),
                step(StepAction::Press, None, Some("Tab")),
                step(StepAction::Click, Some("#submit"), None),
                step(StepAction::Assert, Some("h1"), Some("Welcome")),
            ],
        )
    }

    #[test]
    fn test_js_str_escapes() {
        assert_eq!(js_str("it's"), r"'it\'s'");
        assert_eq!(js_str("a\\b\nc"), r"'a\\b\nc'");
    }

    #[test]
    fn test_scaffold_passes_lint() {
        let script = render_scaffold(&login_spec());
        assert!(lint(&script).is_empty(), "{:?}", lint(&script));
        assert!(script.contains("await page.click('#username');\n    await page.fill('#username', 'o\\'brien');"));
        assert!(script.contains("await page.keyboard.press('Tab');"));
        assert!(script.contains("new URL('/login', baseUrl)"));
        assert!(script.contains("toContainText('Welcome')"));
    }

    #[test]
    fn test_missing_selector_is_skipped_not_invented() {
        let js = step_to_js(&step(StepAction::Click, None, None));
        assert!(js.trim_start().starts_with("// skipped"));
    }

    #[test]
    fn test_leading_navigation_added_when_absent() {
        let mut spec = login_spec();
        spec.steps.remove(0);
        let script = render_scaffold(&spec);
        assert!(script.contains("    await page.goto(baseUrl);\n"));
    }
}
