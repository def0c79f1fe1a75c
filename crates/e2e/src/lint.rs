//! Lightweight static checks for generated scripts
//!
//! Not a JavaScript parser. The scan tracks string, template, comment and
//! regex context well enough to catch what generated code usually gets
//! wrong: truncated output, unbalanced delimiters, missing imports.

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

static PLAYWRIGHT_IMPORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(require\(\s*['"](@playwright/test|playwright(-core)?)['"]\s*\)|from\s+['"](@playwright/test|playwright(-core)?)['"])"#,
    )
    .expect("valid regex")
});

static EXPECT_IMPORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\{[^}]*\bexpect\b[^}]*\}\s*(=\s*require\(|from\s)"#).expect("valid regex")
});

static EXPECT_USE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bexpect\s*\(").expect("valid regex"));

static PAGE_USE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bpage\s*\.\s*\w+").expect("valid regex"));

static ESM_IMPORT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*import\s.+\sfrom\s").expect("valid regex"));

/// A problem found in a script
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LintIssue {
    pub line: usize,
    pub message: String,
}

impl LintIssue {
    fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

impl fmt::Display for LintIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

/// Render issues as a single reason string
pub fn describe(issues: &[LintIssue]) -> String {
    issues
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Code,
    Str(char, usize),
    Template(usize),
    LineComment,
    BlockComment(usize),
    Regex { start: usize, in_class: bool },
}

/// Marker pushed for `${` so the matching `}` resumes the template
const TEMPLATE_EXPR: char = '$';

fn closing_for(open: char) -> char {
    match open {
        '(' => ')',
        '[' => ']',
        _ => '}',
    }
}

/// Whether a `/` after `prev` starts a regex literal rather than a division
fn regex_allowed(prev: Option<char>) -> bool {
    match prev {
        None => true,
        Some(c) => "(,=:[!&|?{};+-*%<>~^".contains(c),
    }
}

fn scan_structure(source: &str) -> Vec<LintIssue> {
    let chars: Vec<char> = source.chars().collect();
    let mut issues = Vec::new();
    let mut stack: Vec<(char, usize)> = Vec::new();
    let mut mode = Mode::Code;
    let mut line = 1;
    let mut prev: Option<char> = None;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        if c == '\n' {
            line += 1;
        }

        match mode {
            Mode::Code => match c {
                '/' if next == Some('/') => {
                    mode = Mode::LineComment;
                    i += 1;
                }
                '/' if next == Some('*') => {
                    mode = Mode::BlockComment(line);
                    i += 1;
                }
                '/' if regex_allowed(prev) => {
                    mode = Mode::Regex {
                        start: line,
                        in_class: false,
                    };
                }
                '\'' | '"' => mode = Mode::Str(c, line),
                '`' => mode = Mode::Template(line),
                '(' | '[' | '{' => stack.push((c, line)),
                ')' | ']' | '}' => match stack.pop() {
                    Some((TEMPLATE_EXPR, _)) if c == '}' => {
                        mode = Mode::Template(line);
                    }
                    Some((open, _)) if open != TEMPLATE_EXPR && closing_for(open) == c => {}
                    Some((open, open_line)) => {
                        let expected = if open == TEMPLATE_EXPR { '}' } else { closing_for(open) };
                        issues.push(LintIssue::new(
                            line,
                            format!(
                                "unexpected '{}', expected '{}' to close line {}",
                                c, expected, open_line
                            ),
                        ));
                        return issues;
                    }
                    None => {
                        issues.push(LintIssue::new(line, format!("unexpected '{}'", c)));
                        return issues;
                    }
                },
                _ => {}
            },
            Mode::Str(quote, start) => match c {
                '\\' => i += 1,
                '\n' => {
                    issues.push(LintIssue::new(start, "unterminated string literal"));
                    return issues;
                }
                _ if c == quote => mode = Mode::Code,
                _ => {}
            },
            Mode::Template(_) => match c {
                '\\' => i += 1,
                '`' => mode = Mode::Code,
                '$' if next == Some('{') => {
                    stack.push((TEMPLATE_EXPR, line));
                    mode = Mode::Code;
                    i += 1;
                }
                _ => {}
            },
            Mode::LineComment => {
                if c == '\n' {
                    mode = Mode::Code;
                }
            }
            Mode::BlockComment(_) => {
                if c == '*' && next == Some('/') {
                    mode = Mode::Code;
                    i += 1;
                }
            }
            Mode::Regex { start, in_class } => match c {
                '\\' => i += 1,
                '[' => mode = Mode::Regex { start, in_class: true },
                ']' => mode = Mode::Regex { start, in_class: false },
                '/' if !in_class => mode = Mode::Code,
                '\n' => {
                    issues.push(LintIssue::new(start, "unterminated regular expression"));
                    return issues;
                }
                _ => {}
            },
        }

        // an escaped newline still ends a line
        if c != '\n' && chars.get(i) == Some(&'\n') {
            line += 1;
        }

        if matches!(mode, Mode::Code) && !c.is_whitespace() {
            prev = Some(c);
        } else if !matches!(mode, Mode::Code) {
            // a literal or comment ends an operand
            prev = Some('a');
        }
        i += 1;
    }

    match mode {
        Mode::Str(_, start) => issues.push(LintIssue::new(start, "unterminated string literal")),
        Mode::Template(start) => {
            issues.push(LintIssue::new(start, "unterminated template literal"))
        }
        Mode::BlockComment(start) => {
            issues.push(LintIssue::new(start, "unterminated block comment"))
        }
        Mode::Regex { start, .. } => {
            issues.push(LintIssue::new(start, "unterminated regular expression"))
        }
        Mode::Code | Mode::LineComment => {}
    }

    if let Some((open, open_line)) = stack.pop() {
        let what = if open == TEMPLATE_EXPR {
            "template expression '${'".to_string()
        } else {
            format!("'{}'", open)
        };
        issues.push(LintIssue::new(open_line, format!("unclosed {}", what)));
    }

    issues
}

/// Check a script before it is accepted; an empty result means it passed
pub fn lint(source: &str) -> Vec<LintIssue> {
    if source.trim().is_empty() {
        return vec![LintIssue::new(1, "script is empty")];
    }

    let mut issues = scan_structure(source);
    if !PLAYWRIGHT_IMPORT.is_match(source) {
        issues.push(LintIssue::new(1, "script does not import playwright"));
    }
    if !PAGE_USE.is_match(source) {
        issues.push(LintIssue::new(1, "script never interacts with a page"));
    }
    issues
}

/// Prepend the Playwright imports a generated script forgot
pub fn ensure_imports(source: &str) -> String {
    let esm = ESM_IMPORT.is_match(source);
    let mut header = String::new();

    if !PLAYWRIGHT_IMPORT.is_match(source) {
        if esm {
            header.push_str("import { chromium, firefox, webkit } from 'playwright';\n");
        } else {
            header.push_str("const { chromium, firefox, webkit } = require('playwright');\n");
        }
    }
    if EXPECT_USE.is_match(source) && !EXPECT_IMPORT.is_match(source) {
        if esm {
            header.push_str("import { expect } from '@playwright/test';\n");
        } else {
            header.push_str("const { expect } = require('@playwright/test');\n");
        }
    }

    if header.is_empty() {
        source.to_string()
    } else {
        format!("{}{}", header, source)
    }
}
