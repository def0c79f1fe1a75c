//! Candidate selectors for a broken locator
//!
//! Ranks snapshot elements by how closely they resemble the selector that
//! stopped matching: edit distance on the selector text plus token overlap
//! with the element's selector, text and identifying attributes.

use std::collections::BTreeSet;
use uiheal_common::{ElementInfo, Snapshot};

const IDENTIFYING_ATTRIBUTES: &[&str] = &["id", "name", "placeholder", "aria-label", "data-testid"];
const ROLE_BONUS: f64 = 0.1;

fn tokens(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_ascii_lowercase())
        .collect()
}

fn element_tokens(element: &ElementInfo) -> BTreeSet<String> {
    let mut set = tokens(&element.selector);
    set.extend(tokens(&element.text));
    for name in IDENTIFYING_ATTRIBUTES {
        if let Some(value) = element.attributes.get(*name) {
            set.extend(tokens(value));
        }
    }
    set
}

fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let shared = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    shared / union
}

/// Edit distance between two strings, in characters
pub fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    if a_chars.is_empty() {
        return b_chars.len();
    }
    if b_chars.is_empty() {
        return a_chars.len();
    }

    // two rows are enough
    let mut prev: Vec<usize> = (0..=b_chars.len()).collect();
    let mut curr = vec![0usize; b_chars.len() + 1];
    for (i, ca) in a_chars.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b_chars.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b_chars.len()]
}

/// Similarity in [0, 1.1] between a query selector and an element
fn similarity(query: &str, query_tokens: &BTreeSet<String>, element: &ElementInfo) -> f64 {
    let a = query.to_ascii_lowercase();
    let b = element.selector.to_ascii_lowercase();
    let longest = a.chars().count().max(b.chars().count()).max(1);
    let edit = 1.0 - levenshtein_distance(&a, &b) as f64 / longest as f64;

    let overlap = jaccard(query_tokens, &element_tokens(element));

    let role_hit = element
        .role
        .iter()
        .map(String::as_str)
        .chain(element.tag())
        .any(|r| query_tokens.contains(&r.to_ascii_lowercase()));
    let bonus = if role_hit { ROLE_BONUS } else { 0.0 };

    0.5 * edit + 0.5 * overlap + bonus
}

/// Best replacements for `queries`, most similar first.
///
/// Selectors listed in `exclude` are never proposed; ties break on the
/// selector text so the ranking is deterministic.
pub fn rank_alternatives(
    snapshot: &Snapshot,
    queries: &[&str],
    exclude: &[&str],
    limit: usize,
) -> Vec<String> {
    if queries.is_empty() || limit == 0 {
        return Vec::new();
    }
    let query_tokens: Vec<(&str, BTreeSet<String>)> =
        queries.iter().map(|q| (*q, tokens(q))).collect();

    let mut scored: Vec<(f64, &str)> = snapshot
        .element_index
        .iter()
        .filter(|e| !exclude.contains(&e.selector.as_str()))
        .map(|e| {
            let best = query_tokens
                .iter()
                .map(|(q, t)| similarity(q, t, e))
                .fold(0.0_f64, f64::max);
            (best, e.selector.as_str())
        })
        .filter(|(score, _)| *score > 0.0)
        .collect();

    scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(b.1)));

    let mut out: Vec<String> = Vec::new();
    for (_, sel) in scored {
        if !out.iter().any(|s| s == sel) {
            out.push(sel.to_string());
        }
        if out.len() == limit {
            break;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> Snapshot {
        Snapshot::new(
            "http://localhost/login",
            vec![
                ElementInfo::new("#username").with_role("textbox"),
                ElementInfo::new("#password").with_role("textbox"),
                ElementInfo::new("#submit-btn")
                    .with_role("button")
                    .with_text("Submit")
                    .with_attribute("id", "submit-btn"),
                ElementInfo::new("a:has-text(\"Help\")").with_role("link").with_text("Help"),
            ],
        )
    }

    #[test]
    fn test_levenshtein_distance() {
        assert_eq!(levenshtein_distance("", ""), 0);
        assert_eq!(levenshtein_distance("abc", "abc"), 0);
        assert_eq!(levenshtein_distance("abc", "abd"), 1);
        assert_eq!(levenshtein_distance("#submit", "#submit-btn"), 4);
        assert_eq!(levenshtein_distance("kitten", "sitting"), 3);
    }

    #[test]
    fn test_renamed_id_ranks_first() {
        let ranked = rank_alternatives(&snapshot(), &["#submit"], &["#submit"], 3);
        assert_eq!(ranked.first().map(String::as_str), Some("#submit-btn"));
        assert!(ranked.len() <= 3);
    }

    #[test]
    fn test_excluded_selector_never_proposed() {
        let ranked = rank_alternatives(&snapshot(), &["#username"], &["#username"], 10);
        assert!(!ranked.iter().any(|s| s == "#username"));
    }

    #[test]
    fn test_ranking_is_deterministic() {
        let snap = snapshot();
        let a = rank_alternatives(&snap, &["#pass", "#user"], &[], 4);
        let b = rank_alternatives(&snap, &["#pass", "#user"], &[], 4);
        assert_eq!(a, b);
    }

    #[test]
    fn test_empty_inputs() {
        assert!(rank_alternatives(&snapshot(), &[], &[], 5).is_empty());
        assert!(rank_alternatives(&snapshot(), &["#x"], &[], 0).is_empty());
    }
}
