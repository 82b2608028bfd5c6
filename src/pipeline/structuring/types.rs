use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::StructuringError;
use crate::models::enums::DocumentType;

pub const DOCUMENT_TYPE_KEY: &str = "document_type";
pub const CONFIDENCE_KEY: &str = "confidence_score";
pub const TYPE_CONFIDENCE_KEY: &str = "document_type_confidence";

/// Keys describing the extraction itself rather than document content.
const METADATA_KEYS: &[&str] = &[CONFIDENCE_KEY, DOCUMENT_TYPE_KEY, TYPE_CONFIDENCE_KEY];

/// Open field map produced by the model. Keys are not fixed; only
/// `document_type` and `confidence_score` carry meaning for the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExtractionPayload(Map<String, Value>);

impl ExtractionPayload {
    pub fn new(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// Minimal payload used whenever the model cannot be reached or read.
    pub fn fallback() -> Self {
        let mut map = Map::new();
        map.insert(DOCUMENT_TYPE_KEY.into(), Value::from(DocumentType::Other.as_str()));
        map.insert(CONFIDENCE_KEY.into(), Value::from(0.0));
        Self(map)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    /// `document_type` as the model wrote it, if it is a string.
    pub fn reported_type(&self) -> Option<&str> {
        self.0.get(DOCUMENT_TYPE_KEY).and_then(Value::as_str)
    }

    /// `confidence_score` if the model returned a number.
    pub fn reported_confidence(&self) -> Option<f64> {
        self.0.get(CONFIDENCE_KEY).and_then(Value::as_f64)
    }

    /// Content fields holding something: not null, not "", not [].
    pub fn filled_field_count(&self) -> usize {
        self.0
            .iter()
            .filter(|(key, _)| !METADATA_KEYS.contains(&key.as_str()))
            .filter(|(_, value)| is_filled(value))
            .count()
    }

    pub fn set_document_type(&mut self, doc_type: DocumentType) {
        self.0
            .insert(DOCUMENT_TYPE_KEY.into(), Value::from(doc_type.as_str()));
    }

    pub fn set_confidence(&mut self, confidence: f64) {
        self.0.insert(CONFIDENCE_KEY.into(), Value::from(confidence));
    }
}

fn is_filled(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        _ => true,
    }
}

/// Text-generation backend (allows mocking).
pub trait LlmClient {
    /// Send `prompt` and return the model's raw text answer.
    fn complete(&self, prompt: &str) -> Result<String, StructuringError>;

    /// Model identifier, for logs.
    fn model_name(&self) -> &str;
}

impl<T: LlmClient + ?Sized> LlmClient for std::sync::Arc<T> {
    fn complete(&self, prompt: &str) -> Result<String, StructuringError> {
        (**self).complete(prompt)
    }

    fn model_name(&self) -> &str {
        (**self).model_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: Value) -> ExtractionPayload {
        match value {
            Value::Object(map) => ExtractionPayload::new(map),
            other => panic!("not an object: {other}"),
        }
    }

    #[test]
    fn fallback_is_other_with_zero_confidence() {
        let p = ExtractionPayload::fallback();
        assert_eq!(p.reported_type(), Some("other"));
        assert_eq!(p.reported_confidence(), Some(0.0));
        assert_eq!(p.filled_field_count(), 0);
    }

    #[test]
    fn filled_fields_skip_empty_values_and_metadata() {
        let p = payload(json!({
            "invoice_number": "F-2024-001",
            "supplier": "",
            "tva": null,
            "lines": [],
            "amount_ttc": 120.0,
            "paid": false,
            "document_type": "invoice",
            "confidence_score": 0.9,
            "document_type_confidence": 0.8
        }));
        assert_eq!(p.filled_field_count(), 3);
    }

    #[test]
    fn non_numeric_confidence_is_not_reported() {
        let p = payload(json!({"confidence_score": "high"}));
        assert_eq!(p.reported_confidence(), None);
        let p = payload(json!({"confidence_score": 1}));
        assert_eq!(p.reported_confidence(), Some(1.0));
    }

    #[test]
    fn setters_overwrite() {
        let mut p = ExtractionPayload::fallback();
        p.set_document_type(DocumentType::Receipt);
        p.set_confidence(0.65);
        assert_eq!(p.reported_type(), Some("receipt"));
        assert_eq!(p.reported_confidence(), Some(0.65));
    }

    #[test]
    fn serializes_as_plain_object() {
        let json = serde_json::to_value(ExtractionPayload::fallback()).unwrap();
        assert_eq!(json, json!({"document_type": "other", "confidence_score": 0.0}));
    }
}
