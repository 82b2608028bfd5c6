/// Fields the model is asked to fill, in prompt order.
pub const EXTRACTION_FIELDS: &[(&str, &str)] = &[
    ("invoice_number", "document or invoice number"),
    ("supplier", "issuing company or person"),
    ("date", "issue date"),
    ("amount_ht", "amount before tax"),
    ("tva", "VAT amount"),
    ("amount_ttc", "amount including tax"),
    ("currency", "ISO 4217 code, e.g. EUR"),
];

/// Build the extraction prompt around the document text.
pub fn build_extraction_prompt(ocr_text: &str) -> String {
    let fields: String = EXTRACTION_FIELDS
        .iter()
        .map(|(name, hint)| format!("- {name}: {hint}\n"))
        .collect();

    format!(
        "You are an expert at extracting structured data from OCR text of French business documents.\n\
\n\
TASK: Extract the key information from the text below and return ONLY one valid JSON object.\n\
\n\
FIELDS:\n\
{fields}\
\n\
RULES:\n\
1. Dates must be ISO format (YYYY-MM-DD)\n\
2. Amounts must be plain numbers (no currency symbols, dot as decimal separator)\n\
3. If a field is not found, use null\n\
4. Include \"confidence_score\": 0.0-1.0 based on how clearly the fields were read\n\
5. Include \"document_type\": \"invoice\" | \"contract\" | \"receipt\" | \"other\"\n\
\n\
OCR TEXT:\n\
{ocr_text}\n\
\n\
JSON OUTPUT:\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_embeds_text_and_ends_with_output_marker() {
        let prompt = build_extraction_prompt("FACTURE N° 42");
        assert!(prompt.contains("OCR TEXT:\nFACTURE N° 42\n"));
        assert!(prompt.ends_with("JSON OUTPUT:\n"));
    }

    #[test]
    fn prompt_lists_every_field_and_closed_type_set() {
        let prompt = build_extraction_prompt("");
        for (name, _) in EXTRACTION_FIELDS {
            assert!(prompt.contains(&format!("- {name}:")), "missing {name}");
        }
        assert!(prompt.contains("\"invoice\" | \"contract\" | \"receipt\" | \"other\""));
        assert!(prompt.contains("YYYY-MM-DD"));
    }
}
