//! Extracting payloads from model output

/// Body of the first fenced code block, or the whole text when unfenced.
///
/// A missing closing fence takes everything after the opening one.
pub fn extract_code_block(text: &str) -> String {
    let text = text.trim_start_matches('\u{feff}');
    let Some(open) = text.find("```") else {
        return text.trim().to_string();
    };

    let after_fence = &text[open + 3..];
    // skip the info string ("javascript", "yaml", ...)
    let body = match after_fence.find('\n') {
        Some(newline) => &after_fence[newline + 1..],
        None => return String::new(),
    };
    let body = match body.find("```") {
        Some(close) => &body[..close],
        None => body,
    };
    body.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("```javascript\nconst a = 1;\n```", "const a = 1;" ; "tagged fence")]
    #[test_case("Here you go:\n```\nx()\n```\nThanks", "x()" ; "surrounding prose")]
    #[test_case("const b = 2;\n", "const b = 2;" ; "no fence")]
    #[test_case("```js\nfirst()\n```\n```js\nsecond()\n```", "first()" ; "first block wins")]
    #[test_case("```yaml\n- title: a\n", "- title: a" ; "unterminated fence")]
    #[test_case("\u{feff}```\nbom()\n```", "bom()" ; "byte order mark")]
    fn test_extract_code_block(input: &str, expected: &str) {
        assert_eq!(extract_code_block(input), expected);
    }
}
