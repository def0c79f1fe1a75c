//! Snapshot collector
//!
//! Loads a page in a headless browser, lists its visible interactive
//! elements and records them as an immutable [`Snapshot`]. Selectors are
//! derived here, preferring the most stable attribute available. The same
//! browser setup resolves a script's locators against the live page.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, info};
use uiheal_common::{ElementInfo, Snapshot};

use crate::error::{ExecError, ExecResult};
use crate::locators::{LocatorCheck, LocatorStatus, ScriptLocator};
use crate::process::{run_with_timeout, ProcessOutput};
use crate::scaffold::{BROWSER_ENV, HEADLESS_ENV};

/// Elements considered interactive
pub const INTERACTIVE_SELECTOR: &str =
    r#"input, button, a, select, textarea, [role="button"], [onclick]"#;

const TARGET_URL_ENV: &str = "UIHEAL_TARGET_URL";
const SNAPSHOT_MARKER: &str = "UIHEAL_SNAPSHOT ";
const LOCATORS_ENV: &str = "UIHEAL_LOCATORS";
const LOCATORS_MARKER: &str = "UIHEAL_LOCATOR_COUNTS ";
const MAX_TEXT_CHARS: usize = 80;

static CSS_IDENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_-]*$").expect("valid regex"));

/// Element as reported by the browser
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawElement {
    pub tag: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "type")]
    pub input_type: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub placeholder: Option<String>,
    #[serde(default)]
    pub href: Option<String>,
    #[serde(default, alias = "data-testid")]
    pub testid: Option<String>,
    #[serde(default, alias = "aria-label")]
    pub aria_label: Option<String>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn attr_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

impl RawElement {
    fn tag(&self) -> String {
        let tag = self.tag.trim().to_ascii_lowercase();
        if tag.is_empty() {
            "*".to_string()
        } else {
            tag
        }
    }

    /// Most stable selector for this element, ignoring duplicates
    pub fn derive_selector(&self) -> String {
        let tag = self.tag();
        if let Some(id) = non_empty(&self.id) {
            return if CSS_IDENT.is_match(id) {
                format!("#{}", id)
            } else {
                format!("[id=\"{}\"]", attr_value(id))
            };
        }
        if let Some(testid) = non_empty(&self.testid) {
            return format!("[data-testid=\"{}\"]", attr_value(testid));
        }
        if let Some(name) = non_empty(&self.name) {
            return format!("{}[name=\"{}\"]", tag, attr_value(name));
        }
        let text = self.text.trim();
        let clickable = matches!(tag.as_str(), "button" | "a")
            || self.role.as_deref() == Some("button");
        if clickable && !text.is_empty() && text.len() <= 40 && !text.contains('"') {
            return format!("{}:has-text(\"{}\")", tag, text);
        }
        if let Some(placeholder) = non_empty(&self.placeholder) {
            return format!("{}[placeholder=\"{}\"]", tag, attr_value(placeholder));
        }
        if let Some(label) = non_empty(&self.aria_label) {
            return format!("{}[aria-label=\"{}\"]", tag, attr_value(label));
        }
        tag
    }

    fn implicit_role(&self) -> Option<String> {
        if let Some(role) = non_empty(&self.role) {
            return Some(role.to_string());
        }
        let input_type = self.input_type.as_deref().unwrap_or("text");
        let role = match self.tag().as_str() {
            "button" => "button",
            "a" if non_empty(&self.href).is_some() => "link",
            "select" => "combobox",
            "textarea" => "textbox",
            "input" => match input_type {
                "checkbox" => "checkbox",
                "radio" => "radio",
                "submit" | "button" | "reset" => "button",
                "hidden" => return None,
                _ => "textbox",
            },
            _ => return None,
        };
        Some(role.to_string())
    }

    fn into_element(self, selector: String) -> ElementInfo {
        let mut attributes = BTreeMap::new();
        attributes.insert("tag".to_string(), self.tag());
        let optional = [
            ("id", &self.id),
            ("name", &self.name),
            ("type", &self.input_type),
            ("placeholder", &self.placeholder),
            ("href", &self.href),
            ("data-testid", &self.testid),
            ("aria-label", &self.aria_label),
        ];
        for (key, value) in optional {
            if let Some(v) = non_empty(value) {
                attributes.insert(key.to_string(), v.to_string());
            }
        }

        let text: String = self.text.trim().chars().take(MAX_TEXT_CHARS).collect();
        ElementInfo {
            selector,
            role: self.implicit_role(),
            text,
            attributes,
        }
    }
}

/// Turn raw elements into indexed elements with unique selectors.
///
/// A selector matching several elements gets a positional `>> nth=` suffix
/// on every occurrence so none of them is ambiguous.
pub fn index_elements(raw: Vec<RawElement>) -> Vec<ElementInfo> {
    let selectors: Vec<String> = raw.iter().map(RawElement::derive_selector).collect();
    let mut totals: HashMap<&str, usize> = HashMap::new();
    for sel in &selectors {
        *totals.entry(sel.as_str()).or_insert(0) += 1;
    }

    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut elements = Vec::with_capacity(raw.len());
    for (element, base) in raw.into_iter().zip(selectors.iter()) {
        let selector = if totals.get(base.as_str()).copied().unwrap_or(0) > 1 {
            let n = seen.entry(base.clone()).or_insert(0);
            let sel = format!("{} >> nth={}", base, n);
            *n += 1;
            sel
        } else {
            base.clone()
        };
        elements.push(element.into_element(selector));
    }
    elements
}

/// Parse a stored snapshot document.
///
/// Accepts a single snapshot, a list of snapshots, or a map of
/// `url -> [raw elements]` as written by simple page crawlers.
pub fn parse_snapshot_document(text: &str) -> ExecResult<Vec<Snapshot>> {
    if let Ok(snapshot) = serde_json::from_str::<Snapshot>(text) {
        return Ok(vec![snapshot]);
    }
    if let Ok(snapshots) = serde_json::from_str::<Vec<Snapshot>>(text) {
        return Ok(snapshots);
    }
    match serde_json::from_str::<BTreeMap<String, Vec<RawElement>>>(text) {
        Ok(pages) if !pages.is_empty() => Ok(pages
            .into_iter()
            .map(|(url, raw)| Snapshot::new(url, index_elements(raw)))
            .collect()),
        Ok(_) => Err(ExecError::InvalidSnapshot("document contains no pages".into())),
        Err(e) => Err(ExecError::InvalidSnapshot(e.to_string())),
    }
}

fn collector_source() -> String {
    format!(
        r#"'use strict';
const playwright = require('playwright');

(async () => {{
  const browserType = playwright[process.env.{browser_env} || 'chromium'];
  const browser = await browserType.launch({{ headless: process.env.{headless_env} !== 'false' }});
  try {{
    const page = await browser.newPage();
    await page.goto(process.env.{url_env}, {{ waitUntil: 'networkidle' }});
    const elements = await page.$$eval({selector}, (nodes) => nodes
      .filter((el) => {{
        const style = window.getComputedStyle(el);
        const box = el.getBoundingClientRect();
        return style.visibility !== 'hidden' && style.display !== 'none' && box.width > 0 && box.height > 0;
      }})
      .map((el) => ({{
        tag: el.tagName.toLowerCase(),
        text: (el.innerText || el.value || '').trim().slice(0, 200),
        id: el.id || null,
        name: el.getAttribute('name'),
        type: el.getAttribute('type'),
        role: el.getAttribute('role'),
        placeholder: el.getAttribute('placeholder'),
        href: el.getAttribute('href'),
        testid: el.getAttribute('data-testid'),
        aria_label: el.getAttribute('aria-label'),
      }})));
    console.log('{marker}' + JSON.stringify(elements));
  }} finally {{
    await browser.close();
  }}
}})().catch((err) => {{
  console.error(err && err.stack ? err.stack : String(err));
  process.exit(1);
}});
"#,
        browser_env = BROWSER_ENV,
        headless_env = HEADLESS_ENV,
        url_env = TARGET_URL_ENV,
        selector = crate::scaffold::js_str(INTERACTIVE_SELECTOR),
        marker = SNAPSHOT_MARKER,
    )
}

fn checker_source() -> String {
    format!(
        r#"'use strict';
const playwright = require('playwright');

(async () => {{
  const locators = JSON.parse(process.env.{locators_env} || '[]');
  const browserType = playwright[process.env.{browser_env} || 'chromium'];
  const browser = await browserType.launch({{ headless: process.env.{headless_env} !== 'false' }});
  try {{
    const page = await browser.newPage();
    await page.goto(process.env.{url_env}, {{ waitUntil: 'networkidle' }});
    const counts = [];
    for (const {{ kind, value }} of locators) {{
      try {{
        const target = kind === 'label' ? page.getByLabel(value)
          : kind === 'text' ? page.getByText(value)
          : kind === 'placeholder' ? page.getByPlaceholder(value)
          : kind === 'test_id' ? page.getByTestId(value)
          : page.locator(value);
        counts.push({{ count: await target.count() }});
      }} catch (err) {{
        counts.push({{ error: String((err && err.message) || err).split('\n')[0] }});
      }}
    }}
    console.log('{marker}' + JSON.stringify(counts));
  }} finally {{
    await browser.close();
  }}
}})().catch((err) => {{
  console.error(err && err.stack ? err.stack : String(err));
  process.exit(1);
}});
"#,
        locators_env = LOCATORS_ENV,
        browser_env = BROWSER_ENV,
        headless_env = HEADLESS_ENV,
        url_env = TARGET_URL_ENV,
        marker = LOCATORS_MARKER,
    )
}

fn marked_line<T: serde::de::DeserializeOwned>(stdout: &str, marker: &str) -> Option<T> {
    stdout.lines().rev().find_map(|line| {
        line.trim()
            .strip_prefix(marker.trim_end())
            .and_then(|body| serde_json::from_str(body.trim()).ok())
    })
}

fn parse_collector_output(stdout: &str) -> Option<Vec<RawElement>> {
    marked_line(stdout, SNAPSHOT_MARKER)
}

/// Per-locator answer from the checker script
#[derive(Debug, Deserialize)]
struct RawCount {
    #[serde(default)]
    count: Option<usize>,
    #[serde(default)]
    error: Option<String>,
}

fn parse_checker_output(stdout: &str, locators: &[ScriptLocator]) -> Option<Vec<LocatorCheck>> {
    let counts: Vec<RawCount> = marked_line(stdout, LOCATORS_MARKER)?;
    if counts.len() != locators.len() {
        return None;
    }
    Some(
        locators
            .iter()
            .zip(counts)
            .map(|(locator, raw)| LocatorCheck {
                locator: locator.clone(),
                status: match (raw.count, raw.error) {
                    (_, Some(reason)) => LocatorStatus::Error { reason },
                    (Some(count), None) => LocatorStatus::from_count(count),
                    (None, None) => LocatorStatus::Error {
                        reason: "no count reported".into(),
                    },
                },
            })
            .collect(),
    )
}

fn last_error_line(output: &ProcessOutput, fallback: &str) -> String {
    output
        .stderr
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .unwrap_or(fallback)
        .trim()
        .to_string()
}

/// Captures page snapshots through Node + Playwright
pub struct SnapshotCollector {
    node_binary: PathBuf,
    browser: String,
    headless: bool,
    timeout: Duration,
    script: PathBuf,
    checker: PathBuf,
    _scratch: TempDir,
}

impl SnapshotCollector {
    pub fn new(
        node_binary: impl AsRef<Path>,
        browser: impl Into<String>,
        headless: bool,
        timeout: Duration,
    ) -> ExecResult<Self> {
        let scratch = tempfile::Builder::new().prefix("uiheal-collector").tempdir()?;
        let script = scratch.path().join("collect.js");
        std::fs::write(&script, collector_source())?;
        let checker = scratch.path().join("check.js");
        std::fs::write(&checker, checker_source())?;

        Ok(Self {
            node_binary: node_binary.as_ref().to_path_buf(),
            browser: browser.into(),
            headless,
            timeout,
            script,
            checker,
            _scratch: scratch,
        })
    }

    /// Run one of the scratch scripts against `url`
    async fn run_page_script(
        &self,
        script: &Path,
        url: &str,
        extra_env: Option<(&str, String)>,
    ) -> ExecResult<ProcessOutput> {
        let mut cmd = Command::new(&self.node_binary);
        cmd.arg(script)
            .env(TARGET_URL_ENV, url)
            .env(BROWSER_ENV, &self.browser)
            .env(HEADLESS_ENV, if self.headless { "true" } else { "false" });
        if let Some((key, value)) = extra_env {
            cmd.env(key, value);
        }

        let output = run_with_timeout(cmd, &self.node_binary, self.timeout).await?;
        if output.timed_out {
            return Err(ExecError::CollectorTimeout(self.timeout.as_secs()));
        }
        if !output.success() {
            return Err(ExecError::Collector {
                url: url.to_string(),
                reason: last_error_line(&output, "page script exited without output"),
            });
        }
        Ok(output)
    }

    /// Capture a snapshot of `url`
    pub async fn collect(&self, url: &str) -> ExecResult<Snapshot> {
        info!("Collecting snapshot of {}", url);
        let output = self.run_page_script(&self.script, url, None).await?;

        let raw = parse_collector_output(&output.stdout).ok_or_else(|| ExecError::Collector {
            url: url.to_string(),
            reason: "no element list in collector output".into(),
        })?;
        debug!("Collector reported {} elements", raw.len());

        Ok(Snapshot::new(url, index_elements(raw)))
    }

    /// Count the matches of each locator on the live page at `url`
    pub async fn check_locators(
        &self,
        url: &str,
        locators: &[ScriptLocator],
    ) -> ExecResult<Vec<LocatorCheck>> {
        if locators.is_empty() {
            return Ok(Vec::new());
        }
        info!("Checking {} locator(s) on {}", locators.len(), url);
        let payload = serde_json::to_string(locators)?;
        let output = self
            .run_page_script(&self.checker, url, Some((LOCATORS_ENV, payload)))
            .await?;

        let checks = parse_checker_output(&output.stdout, locators).ok_or_else(|| ExecError::Collector {
            url: url.to_string(),
            reason: "no locator counts in checker output".into(),
        })?;
        debug!(
            missing = checks.iter().filter(|c| !c.status.is_found()).count(),
            "Locator check finished"
        );
        Ok(checks)
    }
}
