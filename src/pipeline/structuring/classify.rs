//! Keyword override of the reported document type and rule-based confidence
//! floors. The rules only ever raise confidence, and always in the same order.

use super::types::ExtractionPayload;
use crate::models::enums::DocumentType;

/// Keyword sets in priority order: the first set with a hit wins.
const TYPE_KEYWORDS: &[(DocumentType, &[&str])] = &[
    (
        DocumentType::Invoice,
        &["facture", "invoice", "montant", "tva", "numéro de facture"],
    ),
    (
        DocumentType::Contract,
        &["contrat", "agreement", "signature", "clause"],
    ),
    (DocumentType::Receipt, &["receipt", "reçu", "cash", "payment"]),
];

/// Ceiling for heuristic confidence; 1.0 is reserved for manual corrections.
pub const MAX_HEURISTIC_CONFIDENCE: f64 = 0.99;

const RICH_FIELD_COUNT: usize = 3;
const RICH_FLOOR: f64 = 0.7;
const SPARSE_FLOOR: f64 = 0.4;
const OVERRIDE_THRESHOLD: f64 = 0.6;
const OVERRIDE_FLOOR: f64 = 0.65;

/// Document type suggested by keywords in `text`, if any.
pub fn detect_type_by_keywords(text: &str) -> Option<DocumentType> {
    let lowered = text.to_lowercase();
    TYPE_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| lowered.contains(k)))
        .map(|(doc_type, _)| *doc_type)
}

/// Final `(document_type, confidence)` for an extraction.
///
/// Keywords in the text override the reported type. Confidence starts from
/// the reported value (0 when absent, negative or not a number), is raised by
/// the filled-field floors, then by the override floor, and is capped at
/// [`MAX_HEURISTIC_CONFIDENCE`].
///
/// The override check compares mapped types, not raw labels: a reported
/// "facture" and detected invoice keywords agree and leave confidence alone.
pub fn reconcile_metadata(
    reported_type: Option<&str>,
    reported_confidence: Option<f64>,
    text: &str,
    payload: &ExtractionPayload,
) -> (DocumentType, f64) {
    let reported = reported_type
        .map(DocumentType::from_label)
        .unwrap_or(DocumentType::Other);
    let detected = detect_type_by_keywords(text).unwrap_or(reported);

    let mut confidence = match reported_confidence {
        Some(c) if c.is_finite() && c > 0.0 => c,
        _ => 0.0,
    };

    let filled = payload.filled_field_count();
    if filled >= RICH_FIELD_COUNT && confidence < RICH_FLOOR {
        confidence = RICH_FLOOR;
    } else if filled >= 1 && confidence < SPARSE_FLOOR {
        confidence = SPARSE_FLOOR;
    }

    if detected != reported && confidence < OVERRIDE_THRESHOLD {
        confidence = OVERRIDE_FLOOR;
    }

    (detected, confidence.min(MAX_HEURISTIC_CONFIDENCE))
}
