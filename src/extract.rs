//! Tolerant extraction of a JSON object from free-form model output.
//!
//! Models wrap JSON in markdown fences, prepend prose, or trail
//! explanations. The extractor tries, in order: a fenced block tagged
//! `json`, the whole output, and finally the outermost balanced `{...}`
//! substring. It never errors and performs no repair beyond stripping
//! fences and surrounding whitespace.

use serde_json::Value;

/// Extracts a JSON object from model output.
///
/// Returns `None` when no parseable object is present. Non-object JSON
/// (arrays, scalars) is not accepted: every agent schema is an object.
#[must_use]
pub fn extract_object(text: &str) -> Option<Value> {
    if let Some(block) = fenced_json_block(text)
        && let Some(value) = parse_object(block)
    {
        return Some(value);
    }

    let trimmed = text.trim();
    if let Some(value) = parse_object(trimmed) {
        return Some(value);
    }

    balanced_object(trimmed).and_then(parse_object)
}

fn parse_object(candidate: &str) -> Option<Value> {
    serde_json::from_str::<Value>(candidate.trim())
        .ok()
        .filter(Value::is_object)
}

/// Returns the contents of the first ```` ```json ```` fenced block.
fn fenced_json_block(text: &str) -> Option<&str> {
    let start = text.find("```json")? + "```json".len();
    let rest = &text[start..];
    let end = rest.find("```")?;
    Some(&rest[..end])
}

/// Locates the outermost balanced `{...}` substring, respecting string
/// literals and escapes.
fn balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}
