//! Strict JSON extraction from model output.
//!
//! Small instruction-tuned models wrap JSON in markdown fences, prepend
//! chatter, or trail commentary. We strip that noise, then parse strictly:
//! a response that still isn't valid JSON is a typed error, never a
//! fabricated default.

use serde::de::DeserializeOwned;

use crate::backend::BackendError;

/// Strip markdown code fences and any text outside the outermost JSON
/// object. Returns the original string when no object is found so the
/// parse error carries the real payload.
pub fn strip_json_noise(raw: &str) -> &str {
    let trimmed = raw.trim();

    // Fenced block: take the interior.
    let inner = if let Some(rest) = trimmed.strip_prefix("```") {
        // Skip an optional language tag on the fence line.
        let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
        rest.rsplit_once("```").map(|(body, _)| body).unwrap_or(rest)
    } else {
        trimmed
    };

    // Outermost object: first '{' through last '}'.
    match (inner.find('{'), inner.rfind('}')) {
        (Some(start), Some(end)) if start < end => &inner[start..=end],
        _ => inner,
    }
}

/// Parse model output into `T` after noise stripping.
pub fn parse_model_json<T: DeserializeOwned>(raw: &str) -> Result<T, BackendError> {
    let cleaned = strip_json_noise(raw);
    serde_json::from_str(cleaned)
        .map_err(|e| BackendError::Parse(format!("model output is not the expected JSON: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize, PartialEq, Debug)]
    struct Verdict {
        safe: bool,
    }

    #[test]
    fn parses_bare_json() {
        let v: Verdict = parse_model_json(r#"{"safe": true}"#).unwrap();
        assert!(v.safe);
    }

    #[test]
    fn strips_fences_and_language_tag() {
        let raw = "```json\n{\"safe\": false}\n```";
        let v: Verdict = parse_model_json(raw).unwrap();
        assert!(!v.safe);
    }

    #[test]
    fn strips_leading_chatter() {
        let raw = "Sure! Here is the result:\n{\"safe\": true}\nHope that helps.";
        let v: Verdict = parse_model_json(raw).unwrap();
        assert!(v.safe);
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let err = parse_model_json::<Verdict>("the input looks fine to me").unwrap_err();
        assert!(matches!(err, BackendError::Parse(_)));
    }
}
