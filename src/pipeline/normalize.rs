//! Response normalisation: strip Markdown fences from raw service output.
//!
//! Even with a prompt that asks for bare JSON, models routinely wrap the
//! object in ` ```json ... ``` ` fences, and occasionally return a fence
//! pair with nothing inside. Normalisation happens here, before parsing, so
//! the worker's parse step sees clean input and the cache keeps the raw
//! text exactly as the provider sent it.

use once_cell::sync::Lazy;
use regex::Regex;

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:json)?\s*(.*?)\s*```\s*$").unwrap());

/// Strip an outer code fence (with optional `json` language tag) and
/// surrounding whitespace from a raw response.
pub fn strip_response_fences(raw: &str) -> String {
    let trimmed = raw.trim();
    if let Some(caps) = RE_OUTER_FENCES.captures(trimmed) {
        caps[1].to_string()
    } else {
        trimmed.to_string()
    }
}

/// True when the response carries no content worth caching or parsing:
/// empty, whitespace-only, or a fence pair with nothing inside
/// (the literal "```json```" case included).
pub fn is_blank_response(raw: &str) -> bool {
    strip_response_fences(raw).is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_json_passes_through() {
        assert_eq!(strip_response_fences(r#"{"total": 5}"#), r#"{"total": 5}"#);
    }

    #[test]
    fn strips_json_fence() {
        let raw = "```json\n{\"total\": 5}\n```";
        assert_eq!(strip_response_fences(raw), r#"{"total": 5}"#);
    }

    #[test]
    fn strips_plain_fence() {
        let raw = "```\n{\"a\": 1}\n```";
        assert_eq!(strip_response_fences(raw), r#"{"a": 1}"#);
    }

    #[test]
    fn strips_fence_with_trailing_whitespace() {
        let raw = "```json\n{\"a\": 1}\n```  \n";
        assert_eq!(strip_response_fences(raw), r#"{"a": 1}"#);
    }

    #[test]
    fn inner_fences_survive() {
        // Only the outer wrapper is stripped; fences inside string values
        // belong to the payload.
        let raw = "{\"note\": \"use ``` for code\"}";
        assert_eq!(strip_response_fences(raw), raw);
    }

    #[test]
    fn blank_detection() {
        assert!(is_blank_response(""));
        assert!(is_blank_response("   \n"));
        assert!(is_blank_response("```json```"));
        assert!(is_blank_response("```json\n```"));
        assert!(is_blank_response("``````"));
        assert!(!is_blank_response(r#"{"total": 5}"#));
        assert!(!is_blank_response("```json\n{}\n```"));
    }
}
