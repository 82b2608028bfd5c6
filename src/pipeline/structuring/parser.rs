use serde_json::{Map, Value};
use tracing::{debug, error};

use super::types::ExtractionPayload;

/// Read the model's answer into a payload.
///
/// Empty output counts as `{}`. Output that is not a JSON object on its own
/// gets one more chance: the span from the first `{` to the last `}`.
/// Anything still unreadable becomes the fallback payload.
pub fn recover_payload(raw: &str) -> ExtractionPayload {
    let raw = if raw.trim().is_empty() { "{}" } else { raw };

    if let Some(map) = parse_object(raw) {
        return ExtractionPayload::new(map);
    }

    if let Some(map) = enclosed_object(raw).and_then(parse_object) {
        debug!("Recovered JSON object from surrounding text");
        return ExtractionPayload::new(map);
    }

    error!(raw_len = raw.len(), raw = %truncate(raw, 200), "Unable to parse model output");
    ExtractionPayload::fallback()
}

fn parse_object(s: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(s) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Slice from the first `{` through the last `}`.
fn enclosed_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (start < end).then(|| &raw[start..=end])
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn direct_json_object() {
        let p = recover_payload(r#"{"document_type": "invoice", "confidence_score": 0.9}"#);
        assert_eq!(p.reported_type(), Some("invoice"));
        assert_eq!(p.reported_confidence(), Some(0.9));
    }

    #[test]
    fn prose_around_object_equals_enclosed_object() {
        let inner = r#"{"supplier": "ACME SARL", "amount_ttc": 120.0, "meta": {"page": 1}}"#;
        let wrapped = format!("Voici le résultat :\n```json\n{inner}\n```\nBonne journée");
        let expected: Value = serde_json::from_str(inner).unwrap();
        assert_eq!(
            serde_json::to_value(recover_payload(&wrapped)).unwrap(),
            expected
        );
    }

    #[test]
    fn no_brace_gives_fallback() {
        assert_eq!(
            recover_payload("I could not read this document."),
            ExtractionPayload::fallback()
        );
    }

    #[test]
    fn empty_output_is_empty_object() {
        let p = recover_payload("   \n");
        assert!(p.as_map().is_empty());
    }

    #[test]
    fn non_object_json_gives_fallback() {
        assert_eq!(recover_payload("[1, 2, 3]"), ExtractionPayload::fallback());
        assert_eq!(recover_payload("42"), ExtractionPayload::fallback());
    }

    #[test]
    fn closing_brace_before_opening_gives_fallback() {
        assert_eq!(recover_payload("} nothing {"), ExtractionPayload::fallback());
    }

    #[test]
    fn broken_enclosed_json_gives_fallback() {
        assert_eq!(
            recover_payload("result: {\"supplier\": \"ACME\", } trailing"),
            ExtractionPayload::fallback()
        );
    }

    #[test]
    fn nested_array_is_kept() {
        let p = recover_payload(r#"ok {"lines": [{"label": "Conseil", "amount": 100}]}"#);
        assert_eq!(p.get("lines"), Some(&json!([{"label": "Conseil", "amount": 100}])));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("réçu", 2), "ré");
        assert_eq!(truncate("abc", 10), "abc");
    }
}
