//! Response cleanup: deterministic repair of model text before JSON parsing.
//!
//! With `responseMimeType: application/json` Gemini returns bare JSON, but
//! chat providers reached through edgequake-llm have no such switch and
//! regularly disobey "no code fences" instructions. Each rule below is cheap,
//! pure and independently testable.
//!
//! Rules (applied in order):
//! 1. Strip invisible Unicode (BOM, zero-width spaces)
//! 2. Strip outer code fences (```` ```json ... ``` ````)
//! 3. Cut surrounding prose down to the outermost `{ … }` object

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply all cleanup rules to the raw model output.
pub fn clean_json_text(input: &str) -> String {
    let s = remove_invisible_chars(input);
    let s = strip_code_fences(&s);
    extract_object(&s)
}

// ── Rule 1: Strip invisible Unicode ─────────────────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input
        .chars()
        .filter(|c| !matches!(c, '\u{FEFF}' | '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{2060}'))
        .collect()
}

// ── Rule 2: Strip outer code fences ──────────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^```[A-Za-z]*[ \t]*\r?\n(.*?)\r?\n?```\s*$").expect("valid fence regex")
});

fn strip_code_fences(input: &str) -> String {
    let trimmed = input.trim();
    match RE_OUTER_FENCES.captures(trimmed) {
        Some(caps) => caps[1].trim().to_string(),
        None => trimmed.to_string(),
    }
}

// ── Rule 3: Cut to the outermost object ─────────────────────────────────────

/// Keep text from the first `{` to the last `}` when the model wrapped the
/// object in prose ("Here is the data: {...}"). Left untouched otherwise so
/// the parser reports the real problem.
fn extract_object(input: &str) -> String {
    match (input.find('{'), input.rfind('}')) {
        (Some(start), Some(end)) if start < end && (start > 0 || end + 1 < input.len()) => {
            input[start..=end].to_string()
        }
        _ => input.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_json_unchanged() {
        let input = r#"{"invoice_number":"1"}"#;
        assert_eq!(clean_json_text(input), input);
    }

    #[test]
    fn strips_json_fence() {
        let input = "```json\n{\"a\": 1}\n```";
        assert_eq!(clean_json_text(input), "{\"a\": 1}");
    }

    #[test]
    fn strips_plain_fence_and_crlf() {
        let input = "```\r\n{\"a\": null}\r\n```\n";
        assert_eq!(clean_json_text(input), "{\"a\": null}");
    }

    #[test]
    fn strips_bom_and_prose() {
        let input = "\u{FEFF}Here is the extracted data:\n{\"a\": [1, 2]}\nLet me know!";
        assert_eq!(clean_json_text(input), "{\"a\": [1, 2]}");
    }

    #[test]
    fn non_object_left_for_parser() {
        assert_eq!(clean_json_text("  [1, 2] "), "[1, 2]");
        assert_eq!(clean_json_text("no json here"), "no json here");
    }
}
